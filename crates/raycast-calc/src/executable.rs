//! Kernel programs, compiled executables and bound functions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::{Buffer, BufferHandle};
use crate::error::{CalcError, Result};
use crate::host::HostKernel;

/// How a kernel consumes one of its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Storage buffer the kernel only reads.
    ReadBuffer,
    /// Storage buffer the kernel reads and writes.
    RwBuffer,
    /// 32-bit scalar (`u32`, `i32` or `f32`).
    Scalar,
}

impl ArgKind {
    /// Whether the argument is a buffer.
    pub fn is_buffer(self) -> bool {
        !matches!(self, ArgKind::Scalar)
    }
}

/// One kernel of a program.
///
/// Every kernel ships in two forms: WGSL for GPU devices and a native
/// function for the host device. Both must agree on the argument list.
///
/// WGSL binding convention: buffer argument `i` is declared at
/// `@group(0) @binding(i)`; scalar arguments are packed in order into a
/// uniform struct of 32-bit fields at `@group(1) @binding(0)`.
#[derive(Clone)]
pub struct KernelSource {
    /// Entry point name.
    pub name: String,
    /// Argument kinds in binding order.
    pub args: Vec<ArgKind>,
    /// WGSL module body containing the entry point.
    pub wgsl: String,
    /// Native implementation.
    pub host: HostKernel,
}

impl KernelSource {
    /// Describe a kernel.
    pub fn new(
        name: impl Into<String>,
        args: &[ArgKind],
        wgsl: impl Into<String>,
        host: HostKernel,
    ) -> Self {
        Self {
            name: name.into(),
            args: args.to_vec(),
            wgsl: wgsl.into(),
            host,
        }
    }
}

impl std::fmt::Debug for KernelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelSource")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// A named set of kernels sharing common WGSL headers.
#[derive(Debug, Clone, Default)]
pub struct ProgramSource {
    /// Program name, used in logs and compile errors.
    pub name: String,
    /// WGSL prepended to every kernel module.
    pub headers: Vec<String>,
    /// Kernels of the program.
    pub kernels: Vec<KernelSource>,
}

impl ProgramSource {
    /// Empty program.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a WGSL header.
    pub fn header(mut self, wgsl: impl Into<String>) -> Self {
        self.headers.push(wgsl.into());
        self
    }

    /// Add a kernel.
    pub fn kernel(mut self, kernel: KernelSource) -> Self {
        self.kernels.push(kernel);
        self
    }

    /// Full WGSL module text for `kernel`.
    pub fn module_source(&self, kernel: &KernelSource, options: &BuildOptions) -> String {
        let mut src = String::new();
        for (name, value) in &options.constants {
            src.push_str(&format!("const {name} = {value};\n"));
        }
        for header in &self.headers {
            src.push_str(header);
            src.push('\n');
        }
        src.push_str(&kernel.wgsl);
        src
    }
}

/// Program build options.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Module-scope WGSL constants, emitted as `const NAME = VALUE;`.
    pub constants: Vec<(String, String)>,
}

pub(crate) enum KernelCode {
    Host(HostKernel),
    #[cfg(feature = "gpu")]
    Gpu(crate::gpu::GpuKernel),
}

impl std::fmt::Debug for KernelCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelCode::Host(_) => f.write_str("Host"),
            #[cfg(feature = "gpu")]
            KernelCode::Gpu(_) => f.write_str("Gpu"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct CompiledKernel {
    pub(crate) name: String,
    pub(crate) args: Vec<ArgKind>,
    pub(crate) code: KernelCode,
}

/// A compiled program.
#[derive(Debug)]
pub struct Executable {
    program: String,
    kernels: HashMap<String, Arc<CompiledKernel>>,
}

impl Executable {
    pub(crate) fn new(program: String, kernels: Vec<CompiledKernel>) -> Self {
        Self {
            program,
            kernels: kernels
                .into_iter()
                .map(|k| (k.name.clone(), Arc::new(k)))
                .collect(),
        }
    }

    /// Program name.
    pub fn name(&self) -> &str {
        &self.program
    }

    /// Create an argument-binding handle for the kernel `name`.
    pub fn create_function(&self, name: &str) -> Result<Function> {
        let kernel = self.kernels.get(name).ok_or_else(|| {
            CalcError::logic(format!("program `{}` has no kernel `{name}`", self.program))
        })?;
        Ok(Function {
            kernel: kernel.clone(),
            args: vec![None; kernel.args.len()],
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum BoundArg {
    Buffer(BufferHandle),
    U32(u32),
    I32(i32),
    F32(f32),
}

/// A kernel with its arguments.
///
/// Cloning is cheap and produces an independent set of bindings, which is
/// how concurrent callers avoid racing on argument state.
#[derive(Debug, Clone)]
pub struct Function {
    pub(crate) kernel: Arc<CompiledKernel>,
    pub(crate) args: Vec<Option<BoundArg>>,
}

impl Function {
    /// Kernel name.
    pub fn name(&self) -> &str {
        &self.kernel.name
    }

    /// Bind `buffer` to argument `index`.
    pub fn set_buffer(&mut self, index: usize, buffer: &Buffer) -> Result<&mut Self> {
        self.check(index, true)?;
        self.args[index] = Some(BoundArg::Buffer(buffer.handle.clone()));
        Ok(self)
    }

    /// Bind an unsigned scalar to argument `index`.
    pub fn set_u32(&mut self, index: usize, value: u32) -> Result<&mut Self> {
        self.check(index, false)?;
        self.args[index] = Some(BoundArg::U32(value));
        Ok(self)
    }

    /// Bind a signed scalar to argument `index`.
    pub fn set_i32(&mut self, index: usize, value: i32) -> Result<&mut Self> {
        self.check(index, false)?;
        self.args[index] = Some(BoundArg::I32(value));
        Ok(self)
    }

    /// Bind a float scalar to argument `index`.
    pub fn set_f32(&mut self, index: usize, value: f32) -> Result<&mut Self> {
        self.check(index, false)?;
        self.args[index] = Some(BoundArg::F32(value));
        Ok(self)
    }

    fn check(&self, index: usize, buffer: bool) -> Result<()> {
        let kind = self.kernel.args.get(index).ok_or_else(|| {
            CalcError::logic(format!(
                "kernel `{}` has {} arguments, got index {index}",
                self.kernel.name,
                self.kernel.args.len()
            ))
        })?;
        if kind.is_buffer() != buffer {
            return Err(CalcError::logic(format!(
                "kernel `{}` argument {index} expects {kind:?}",
                self.kernel.name
            )));
        }
        Ok(())
    }

    /// All arguments, failing if any is unset.
    pub(crate) fn bound_args(&self) -> Result<Vec<BoundArg>> {
        self.args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                arg.clone().ok_or_else(|| {
                    let name = &self.kernel.name;
                    CalcError::logic(format!("kernel `{name}` argument {i} is not set"))
                })
            })
            .collect()
    }
}
