//! Backend agnostic interface to the host compute runtime.
//!
//! The engine only ever talks to a device through [`Backend`]. Backend objects
//! are plain copyable handles, ownership of the ones the engine creates is
//! tracked by [`DeviceBuffer`], [`Event`] and the kernel and handle types.

use std::{fmt::Debug, sync::Arc};

use crate::error::BackendError;

mod dummy;
mod opencl;

pub use dummy::{Dummy, DummyConfig, DummyId, DummyStats, LaunchCost};
pub use opencl::{
    OpenCL, OpenCLContext, OpenCLDevice, OpenCLEvent, OpenCLKernel, OpenCLMem, OpenCLPlatform,
    OpenCLProgram, OpenCLQueue, OpenCLStatus,
};

/// Platform properties queried by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformInfo {
    Name,
    Extensions,
}

/// Device properties queried by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceInfo {
    Name,
    Extensions,
}

/// Access mode of device buffer from kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    ReadOnly,
    ReadWrite,
}

/// Event timestamps in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilingInfo {
    CommandStart,
    CommandEnd,
}

/// Value bound to kernel argument slot
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<M> {
    Mem(M),
    I32(i32),
}

/// Host compute runtime used to build and run kernels.
///
/// Failed calls return the runtime's native status inside [`BackendError`].
/// Release functions never fail from the caller's point of view,
/// they are called from destructors.
pub trait Backend: Debug + Send + Sync + 'static {
    type Platform: Copy + Debug + Send + Sync;
    type Device: Copy + Debug + PartialEq + Send + Sync;
    type Context: Copy + Debug + Send + Sync;
    type Queue: Copy + Debug + Send + Sync;
    type Mem: Copy + Debug + PartialEq + Send + Sync;
    type Program: Copy + Debug + Send + Sync;
    type Kernel: Copy + Debug + Send + Sync;
    type Event: Copy + Debug + Send + Sync;

    fn device_platform(&self, device: Self::Device) -> Result<Self::Platform, BackendError>;

    fn platform_info(
        &self,
        platform: Self::Platform,
        info: PlatformInfo,
    ) -> Result<String, BackendError>;

    fn device_info(&self, device: Self::Device, info: DeviceInfo) -> Result<String, BackendError>;

    fn create_queue(
        &self,
        context: Self::Context,
        device: Self::Device,
        profiling: bool,
    ) -> Result<Self::Queue, BackendError>;

    fn release_queue(&self, queue: Self::Queue);

    /// Creates buffer of `bytes` bytes, initialized from `host` if given.
    fn create_buffer(
        &self,
        context: Self::Context,
        access: MemAccess,
        bytes: usize,
        host: Option<&[u8]>,
    ) -> Result<Self::Mem, BackendError>;

    /// Increments reference count of memory object
    fn retain_buffer(&self, mem: Self::Mem) -> Result<(), BackendError>;

    /// Decrements reference count of memory object, it is freed when it reaches zero
    fn release_buffer(&self, mem: Self::Mem);

    /// Blocking write of `src` at the start of `mem`
    fn write_buffer(&self, queue: Self::Queue, mem: Self::Mem, src: &[u8])
        -> Result<(), BackendError>;

    /// Blocking read from the start of `mem` into `dst`
    fn read_buffer(
        &self,
        queue: Self::Queue,
        mem: Self::Mem,
        dst: &mut [u8],
    ) -> Result<(), BackendError>;

    /// Creates program from source and builds it for device.
    /// Program is not leaked on build failure.
    fn build_program(
        &self,
        context: Self::Context,
        device: Self::Device,
        source: &str,
        options: &str,
    ) -> Result<Self::Program, BackendError>;

    fn release_program(&self, program: Self::Program);

    fn create_kernel(&self, program: Self::Program, name: &str)
        -> Result<Self::Kernel, BackendError>;

    /// Duplicates kernel object including currently set arguments
    fn clone_kernel(&self, kernel: Self::Kernel) -> Result<Self::Kernel, BackendError>;

    fn release_kernel(&self, kernel: Self::Kernel);

    fn set_kernel_arg(
        &self,
        kernel: Self::Kernel,
        index: u32,
        arg: KernelArg<Self::Mem>,
    ) -> Result<(), BackendError>;

    /// Non blocking launch, returns completion event if `event` is true
    #[allow(clippy::too_many_arguments)]
    fn enqueue_kernel(
        &self,
        queue: Self::Queue,
        kernel: Self::Kernel,
        global_work_size: &[usize],
        local_work_size: &[usize],
        event_wait_list: &[Self::Event],
        event: bool,
    ) -> Result<Option<Self::Event>, BackendError>;

    fn finish(&self, queue: Self::Queue) -> Result<(), BackendError>;

    fn wait_for_events(&self, events: &[Self::Event]) -> Result<(), BackendError>;

    /// Profiling timestamp in nanoseconds
    fn profiling_info(&self, event: Self::Event, info: ProfilingInfo)
        -> Result<u64, BackendError>;

    fn release_event(&self, event: Self::Event);
}

/// One owned reference to device memory object.
///
/// Clones share the memory object and hold their own reference,
/// the memory is freed once the last reference is dropped.
#[derive(Debug)]
pub struct DeviceBuffer<B: Backend> {
    backend: Arc<B>,
    mem: B::Mem,
    bytes: usize,
}

impl<B: Backend> DeviceBuffer<B> {
    /// Allocates buffer and copies `data` into it
    pub fn from_slice(
        backend: &Arc<B>,
        context: B::Context,
        access: MemAccess,
        data: &[f32],
    ) -> Result<Self, BackendError> {
        let src = as_bytes(data);
        let mem = backend.create_buffer(context, access, src.len(), Some(src))?;
        Ok(DeviceBuffer { backend: backend.clone(), mem, bytes: src.len() })
    }

    /// Allocates uninitialized buffer of `len` floats
    pub fn uninit(
        backend: &Arc<B>,
        context: B::Context,
        access: MemAccess,
        len: usize,
    ) -> Result<Self, BackendError> {
        let bytes = len * std::mem::size_of::<f32>();
        let mem = backend.create_buffer(context, access, bytes, None)?;
        Ok(DeviceBuffer { backend: backend.clone(), mem, bytes })
    }

    /// Takes ownership of existing reference to memory object
    pub fn from_raw(backend: &Arc<B>, mem: B::Mem, bytes: usize) -> Self {
        DeviceBuffer { backend: backend.clone(), mem, bytes }
    }

    /// Retains memory object, returned buffer holds its own reference
    pub fn try_clone(&self) -> Result<Self, BackendError> {
        self.backend.retain_buffer(self.mem)?;
        Ok(DeviceBuffer { backend: self.backend.clone(), mem: self.mem, bytes: self.bytes })
    }

    #[must_use]
    pub fn raw(&self) -> B::Mem {
        self.mem
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn write(&self, queue: B::Queue, data: &[f32]) -> Result<(), BackendError> {
        self.backend.write_buffer(queue, self.mem, as_bytes(data))
    }

    pub fn read(&self, queue: B::Queue, data: &mut [f32]) -> Result<(), BackendError> {
        self.backend.read_buffer(queue, self.mem, as_bytes_mut(data))
    }
}

impl<B: Backend> Drop for DeviceBuffer<B> {
    fn drop(&mut self) {
        self.backend.release_buffer(self.mem);
    }
}

/// Completion event of enqueued command, released on drop
#[derive(Debug)]
pub struct Event<B: Backend> {
    backend: Arc<B>,
    event: B::Event,
}

impl<B: Backend> Event<B> {
    pub(crate) fn new(backend: &Arc<B>, event: B::Event) -> Self {
        Event { backend: backend.clone(), event }
    }

    #[must_use]
    pub fn raw(&self) -> B::Event {
        self.event
    }

    /// Blocks until the command finished
    pub fn wait(&self) -> Result<(), BackendError> {
        self.backend.wait_for_events(&[self.event])
    }

    /// Device time in seconds between start of `start` and end of this command
    pub fn elapsed_since(&self, start: &Event<B>) -> Result<f64, BackendError> {
        let end = self.backend.profiling_info(self.event, ProfilingInfo::CommandEnd)?;
        let start = self.backend.profiling_info(start.event, ProfilingInfo::CommandStart)?;
        Ok((end as f64 - start as f64) / 1e9)
    }
}

impl<B: Backend> Drop for Event<B> {
    fn drop(&mut self) {
        self.backend.release_event(self.event);
    }
}

pub(crate) fn as_bytes(data: &[f32]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(data.as_ptr().cast(), std::mem::size_of_val(data)) }
}

pub(crate) fn as_bytes_mut(data: &mut [f32]) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(data.as_mut_ptr().cast(), std::mem::size_of_val(data)) }
}
