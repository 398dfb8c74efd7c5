use std::fmt::Display;

use crate::backend::OpenCLStatus;

/// Enumeration representing the various errors that can occur within ysmm.
///
/// Every variant maps onto a native OpenCL status code, see [`SmmError::code`].
#[derive(Debug)]
pub enum SmmError {
    /// Small matrix multiplication descriptor failed validation
    InvalidDescriptor(Box<str>),
    /// Invalid argument passed to handle operation
    InvalidValue(Box<str>),
    /// Host memory allocation failed
    OutOfHostMemory,
    /// Error returned by the compute backend
    BackendError(BackendError),
}

impl SmmError {
    /// Native OpenCL status code of this error
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            SmmError::InvalidDescriptor(_) | SmmError::InvalidValue(_) => {
                OpenCLStatus::CL_INVALID_VALUE as i32
            }
            SmmError::OutOfHostMemory => OpenCLStatus::CL_OUT_OF_HOST_MEMORY as i32,
            SmmError::BackendError(e) => e.code,
        }
    }

    /// Is this a descriptor validation failure?
    #[must_use]
    pub const fn is_invalid_descriptor(&self) -> bool {
        matches!(self, SmmError::InvalidDescriptor(_))
    }
}

impl std::fmt::Display for SmmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SmmError::InvalidDescriptor(e) => f.write_fmt(format_args!("Invalid descriptor: {e}")),
            SmmError::InvalidValue(e) => f.write_fmt(format_args!("Invalid value: {e}")),
            SmmError::OutOfHostMemory => f.write_str("Out of host memory"),
            SmmError::BackendError(e) => f.write_fmt(format_args!("Backend {e}")),
        }
    }
}

impl std::error::Error for SmmError {}

impl From<std::collections::TryReserveError> for SmmError {
    fn from(_: std::collections::TryReserveError) -> Self {
        SmmError::OutOfHostMemory
    }
}

#[derive(Debug, Clone)]
pub struct BackendError {
    /// Which stage of the backend failed
    pub status: ErrorStatus,
    /// Native status code returned by the backend
    pub code: i32,
    pub context: Box<str>,
}

impl BackendError {
    pub(crate) fn new(status: ErrorStatus, code: OpenCLStatus, context: impl Into<Box<str>>) -> Self {
        BackendError { status, code: code as i32, context: context.into() }
    }
}

impl From<BackendError> for SmmError {
    fn from(value: BackendError) -> Self {
        SmmError::BackendError(value)
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{:?} ({:?}): {}",
            self.status,
            OpenCLStatus::from(self.code),
            self.context
        ))
    }
}

impl std::error::Error for BackendError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// Dynamic library was not found on the disk
    DyLibNotFound,
    /// Backend initialization failure
    Initialization,
    /// Failed to enumerate platforms or devices
    DeviceEnumeration,
    /// Failed to query device or platform for information
    DeviceQuery,
    /// Failed to create a command queue
    QueueCreation,
    /// Failed to allocate memory
    MemoryAllocation,
    /// Failed to copy memory to device
    MemoryCopyH2D,
    /// Failed to copy memory to host
    MemoryCopyD2H,
    /// Kernel argument was not correct
    IncorrectKernelArg,
    /// Failed to compile program
    KernelCompilation,
    /// Failed to create or clone kernel
    KernelCreation,
    /// Failed to launch kernel
    KernelLaunch,
    /// Failed to synchronize queue or events
    KernelSync,
    /// Profiling information is not available
    Profiling,
}
