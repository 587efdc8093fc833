//! Completion events for queued device work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{CalcError, Result, STATUS_KERNEL_PANIC};

/// Completion handle for an enqueued operation.
///
/// Cloning an event clones the handle, not the operation; every clone
/// observes the same completion.
#[derive(Clone)]
pub struct Event {
    state: EventState,
}

#[derive(Clone)]
enum EventState {
    Complete,
    Host(Arc<Signal>),
    #[cfg(feature = "gpu")]
    Gpu(crate::gpu::GpuSignal),
}

impl Event {
    /// An event that is already complete.
    pub fn complete() -> Self {
        Self {
            state: EventState::Complete,
        }
    }

    pub(crate) fn from_signal(signal: Arc<Signal>) -> Self {
        Self {
            state: EventState::Host(signal),
        }
    }

    #[cfg(feature = "gpu")]
    pub(crate) fn from_gpu(signal: crate::gpu::GpuSignal) -> Self {
        Self {
            state: EventState::Gpu(signal),
        }
    }

    /// Block until the operation completes.
    ///
    /// Returns the failure of the operation if it did not complete
    /// successfully.
    pub fn wait(&self) -> Result<()> {
        match &self.state {
            EventState::Complete => Ok(()),
            EventState::Host(signal) => signal.wait(),
            #[cfg(feature = "gpu")]
            EventState::Gpu(signal) => signal.wait(),
        }
    }

    /// Block until the operation completes or `timeout` elapses.
    ///
    /// Returns `Ok(true)` when the operation completed in time.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool> {
        match &self.state {
            EventState::Complete => Ok(true),
            EventState::Host(signal) => signal.wait_for(timeout),
            #[cfg(feature = "gpu")]
            EventState::Gpu(signal) => signal.wait_for(timeout),
        }
    }

    /// Non-blocking completion poll.
    pub fn is_complete(&self) -> bool {
        match &self.state {
            EventState::Complete => true,
            EventState::Host(signal) => signal.is_complete(),
            #[cfg(feature = "gpu")]
            EventState::Gpu(signal) => signal.is_complete(),
        }
    }

    /// Wait for every event in `events`, returning the first failure.
    pub fn wait_all(events: &[Event]) -> Result<()> {
        for event in events {
            event.wait()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum SignalState {
    Pending,
    Complete,
    Failed { status: i32, message: String },
}

/// One-shot completion flag shared between a host queue worker and waiters.
#[derive(Debug)]
pub(crate) struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SignalState::Pending),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn complete(&self) {
        *self.state.lock() = SignalState::Complete;
        self.cond.notify_all();
    }

    pub(crate) fn fail(&self, status: i32, message: String) {
        *self.state.lock() = SignalState::Failed { status, message };
        self.cond.notify_all();
    }

    fn wait(&self) -> Result<()> {
        let mut state = self.state.lock();
        while matches!(*state, SignalState::Pending) {
            self.cond.wait(&mut state);
        }
        Self::outcome(&state)
    }

    fn wait_for(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while matches!(*state, SignalState::Pending) {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        match *state {
            SignalState::Pending => Ok(false),
            _ => Self::outcome(&state).map(|_| true),
        }
    }

    fn is_complete(&self) -> bool {
        !matches!(*self.state.lock(), SignalState::Pending)
    }

    fn outcome(state: &SignalState) -> Result<()> {
        match state {
            SignalState::Failed { status, message } => Err(CalcError::Backend {
                status: *status,
                message: message.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Convert a caught panic payload into a failure message.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> (i32, String) {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "kernel panicked".to_string()
    };
    (STATUS_KERNEL_PANIC, message)
}
