//! In-order host command queues.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::{CalcError, Result, STATUS_DEPENDENCY_FAILED};
use crate::event::{panic_message, Event, Signal};

type Work = Box<dyn FnOnce() -> Result<()> + Send>;

struct Job {
    deps: Vec<Event>,
    work: Work,
    signal: Arc<Signal>,
}

/// A worker thread draining jobs in submission order.
pub(crate) struct HostQueue {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl HostQueue {
    pub(crate) fn spawn(index: u32) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let worker = std::thread::Builder::new()
            .name(format!("raycast-queue-{index}"))
            .spawn(move || run(receiver))
            .map_err(|e| CalcError::Backend {
                status: -1,
                message: format!("failed to spawn queue thread: {e}"),
            })?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queue `work` behind `deps`.
    pub(crate) fn submit<F>(&self, deps: &[Event], work: F) -> Result<Event>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let signal = Signal::new();
        let job = Job {
            deps: deps.to_vec(),
            work: Box::new(work),
            signal: signal.clone(),
        };
        self.sender
            .as_ref()
            .ok_or_else(|| CalcError::logic("queue is shut down"))?
            .send(job)
            .map_err(|_| CalcError::logic("queue worker has exited"))?;
        Ok(Event::from_signal(signal))
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once queued jobs drain.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(receiver: Receiver<Job>) {
    'jobs: for job in receiver {
        for dep in &job.deps {
            if let Err(e) = dep.wait() {
                job.signal.fail(STATUS_DEPENDENCY_FAILED, e.to_string());
                continue 'jobs;
            }
        }
        match catch_unwind(AssertUnwindSafe(job.work)) {
            Ok(Ok(())) => job.signal.complete(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "queued command failed");
                let status = match &e {
                    CalcError::Backend { status, .. } => *status,
                    _ => -1,
                };
                job.signal.fail(status, e.to_string());
            }
            Err(payload) => {
                let (status, message) = panic_message(payload);
                tracing::warn!(%message, "host kernel panicked");
                job.signal.fail(status, message);
            }
        }
    }
}
