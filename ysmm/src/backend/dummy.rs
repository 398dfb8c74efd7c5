//! Host only backend.
//!
//! Keeps device memory in host vectors and never runs kernels, launches only
//! advance a virtual clock by the cost returned from [`DummyConfig::launch_cost`].
//! Used to test caching, ownership and autotuning without a GPU.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};

use super::{Backend, DeviceInfo, KernelArg, MemAccess, OpenCLStatus, PlatformInfo, ProfilingInfo};
use crate::error::{BackendError, ErrorStatus};

/// Launch cost in nanoseconds as function of global and local work size,
/// `None` makes the launch fail
pub type LaunchCost = Arc<dyn Fn(&[usize], &[usize]) -> Option<u64> + Send + Sync>;

/// Identifier of any dummy backend object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DummyId(u64);

pub struct DummyConfig {
    pub platform_name: String,
    pub platform_extensions: String,
    pub device_name: String,
    pub device_extensions: String,
    /// Can queues with profiling enabled be created
    pub profiling: bool,
    /// Fail allocations once this many buffers are alive
    pub max_buffers: Option<usize>,
    pub launch_cost: LaunchCost,
}

impl Default for DummyConfig {
    fn default() -> Self {
        DummyConfig {
            platform_name: "Dummy platform".into(),
            platform_extensions: "cl_khr_icd".into(),
            device_name: "Dummy device".into(),
            device_extensions: "cl_khr_fp64".into(),
            profiling: true,
            max_buffers: None,
            launch_cost: Arc::new(|_, _| Some(1000)),
        }
    }
}

impl std::fmt::Debug for DummyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyConfig")
            .field("platform_name", &self.platform_name)
            .field("platform_extensions", &self.platform_extensions)
            .field("device_name", &self.device_name)
            .field("device_extensions", &self.device_extensions)
            .field("profiling", &self.profiling)
            .field("max_buffers", &self.max_buffers)
            .finish_non_exhaustive()
    }
}

/// Snapshot of live objects and counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    pub programs_built: usize,
    pub programs_live: usize,
    pub buffers_live: usize,
    pub kernels_live: usize,
    pub events_live: usize,
    pub queues_live: usize,
    pub launches: usize,
}

#[derive(Debug)]
struct DummyBuffer {
    refs: usize,
    data: Vec<u8>,
}

#[derive(Debug)]
struct DummyKernel {
    program: DummyId,
    name: String,
    args: BTreeMap<u32, KernelArg<DummyId>>,
}

#[derive(Debug, Clone, Copy)]
struct DummyEvent {
    start: u64,
    end: u64,
    profiled: bool,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    clock: u64,
    queues: BTreeMap<DummyId, bool>,
    buffers: BTreeMap<DummyId, DummyBuffer>,
    programs: BTreeMap<DummyId, String>,
    kernels: BTreeMap<DummyId, DummyKernel>,
    events: BTreeMap<DummyId, DummyEvent>,
    programs_built: usize,
    launches: usize,
    sources: Vec<String>,
}

impl State {
    fn id(&mut self) -> DummyId {
        self.next_id += 1;
        DummyId(self.next_id)
    }
}

#[derive(Debug)]
pub struct Dummy {
    config: DummyConfig,
    state: Mutex<State>,
}

const PLATFORM: DummyId = DummyId(1);
const DEVICE: DummyId = DummyId(2);
const CONTEXT: DummyId = DummyId(3);

fn error(status: ErrorStatus, code: OpenCLStatus, context: &str) -> BackendError {
    BackendError::new(status, code, context)
}

impl Dummy {
    #[must_use]
    pub fn new(config: DummyConfig) -> Arc<Self> {
        Arc::new(Dummy { config, state: Mutex::new(State { next_id: 16, ..State::default() }) })
    }

    /// The only device of this backend
    #[must_use]
    pub const fn device(&self) -> DummyId {
        DEVICE
    }

    /// Context holding [`Dummy::device`]
    #[must_use]
    pub const fn context(&self) -> DummyId {
        CONTEXT
    }

    /// Identifier which is not a device, every query on it fails
    #[must_use]
    pub const fn invalid_device(&self) -> DummyId {
        DummyId(0)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // State stays consistent even if a test panicked while holding the lock
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> DummyStats {
        let state = self.state();
        DummyStats {
            programs_built: state.programs_built,
            programs_live: state.programs.len(),
            buffers_live: state.buffers.len(),
            kernels_live: state.kernels.len(),
            events_live: state.events.len(),
            queues_live: state.queues.len(),
            launches: state.launches,
        }
    }

    /// Reference count of buffer, `None` once it was freed
    #[must_use]
    pub fn buffer_refcount(&self, mem: DummyId) -> Option<usize> {
        self.state().buffers.get(&mem).map(|buffer| buffer.refs)
    }

    /// Contents of buffer interpreted as floats
    #[must_use]
    pub fn buffer_contents(&self, mem: DummyId) -> Option<Vec<f32>> {
        self.state().buffers.get(&mem).map(|buffer| {
            buffer
                .data
                .chunks_exact(4)
                .map(|x| f32::from_ne_bytes([x[0], x[1], x[2], x[3]]))
                .collect()
        })
    }

    /// Sources of all programs built so far, in build order
    #[must_use]
    pub fn program_sources(&self) -> Vec<String> {
        self.state().sources.clone()
    }

    fn check_device(device: DummyId) -> Result<(), BackendError> {
        if device == DEVICE {
            Ok(())
        } else {
            Err(error(ErrorStatus::DeviceQuery, OpenCLStatus::CL_INVALID_DEVICE, "Unknown device"))
        }
    }
}

impl Backend for Dummy {
    type Platform = DummyId;
    type Device = DummyId;
    type Context = DummyId;
    type Queue = DummyId;
    type Mem = DummyId;
    type Program = DummyId;
    type Kernel = DummyId;
    type Event = DummyId;

    fn device_platform(&self, device: DummyId) -> Result<DummyId, BackendError> {
        Self::check_device(device)?;
        Ok(PLATFORM)
    }

    fn platform_info(&self, platform: DummyId, info: PlatformInfo) -> Result<String, BackendError> {
        if platform != PLATFORM {
            return Err(error(
                ErrorStatus::DeviceQuery,
                OpenCLStatus::CL_INVALID_PLATFORM,
                "Unknown platform",
            ));
        }
        Ok(match info {
            PlatformInfo::Name => self.config.platform_name.clone(),
            PlatformInfo::Extensions => self.config.platform_extensions.clone(),
        })
    }

    fn device_info(&self, device: DummyId, info: DeviceInfo) -> Result<String, BackendError> {
        Self::check_device(device)?;
        Ok(match info {
            DeviceInfo::Name => self.config.device_name.clone(),
            DeviceInfo::Extensions => self.config.device_extensions.clone(),
        })
    }

    fn create_queue(
        &self,
        context: DummyId,
        device: DummyId,
        profiling: bool,
    ) -> Result<DummyId, BackendError> {
        Self::check_device(device)?;
        if context != CONTEXT {
            return Err(error(
                ErrorStatus::QueueCreation,
                OpenCLStatus::CL_INVALID_CONTEXT,
                "Unknown context",
            ));
        }
        if profiling && !self.config.profiling {
            return Err(error(
                ErrorStatus::QueueCreation,
                OpenCLStatus::CL_INVALID_QUEUE_PROPERTIES,
                "Profiling is not supported",
            ));
        }
        let mut state = self.state();
        let id = state.id();
        state.queues.insert(id, profiling);
        Ok(id)
    }

    fn release_queue(&self, queue: DummyId) {
        self.state().queues.remove(&queue);
    }

    fn create_buffer(
        &self,
        context: DummyId,
        access: MemAccess,
        bytes: usize,
        host: Option<&[u8]>,
    ) -> Result<DummyId, BackendError> {
        let _ = access;
        if context != CONTEXT {
            return Err(error(
                ErrorStatus::MemoryAllocation,
                OpenCLStatus::CL_INVALID_CONTEXT,
                "Unknown context",
            ));
        }
        if bytes == 0 {
            return Err(error(
                ErrorStatus::MemoryAllocation,
                OpenCLStatus::CL_INVALID_BUFFER_SIZE,
                "Zero sized buffer",
            ));
        }
        let mut state = self.state();
        if let Some(max) = self.config.max_buffers {
            if state.buffers.len() >= max {
                return Err(error(
                    ErrorStatus::MemoryAllocation,
                    OpenCLStatus::CL_MEM_OBJECT_ALLOCATION_FAILURE,
                    "Buffer limit reached",
                ));
            }
        }
        let data = match host {
            Some(host) if host.len() == bytes => host.to_vec(),
            Some(_) => {
                return Err(error(
                    ErrorStatus::MemoryAllocation,
                    OpenCLStatus::CL_INVALID_HOST_PTR,
                    "Host data does not match buffer size",
                ))
            }
            None => vec![0; bytes],
        };
        let id = state.id();
        state.buffers.insert(id, DummyBuffer { refs: 1, data });
        Ok(id)
    }

    fn retain_buffer(&self, mem: DummyId) -> Result<(), BackendError> {
        match self.state().buffers.get_mut(&mem) {
            Some(buffer) => {
                buffer.refs += 1;
                Ok(())
            }
            None => Err(error(
                ErrorStatus::MemoryAllocation,
                OpenCLStatus::CL_INVALID_MEM_OBJECT,
                "Retain of freed buffer",
            )),
        }
    }

    fn release_buffer(&self, mem: DummyId) {
        let mut state = self.state();
        let free = match state.buffers.get_mut(&mem) {
            Some(buffer) => {
                buffer.refs -= 1;
                buffer.refs == 0
            }
            None => false,
        };
        if free {
            state.buffers.remove(&mem);
        }
    }

    fn write_buffer(&self, queue: DummyId, mem: DummyId, src: &[u8]) -> Result<(), BackendError> {
        let mut state = self.state();
        if !state.queues.contains_key(&queue) {
            return Err(error(
                ErrorStatus::MemoryCopyH2D,
                OpenCLStatus::CL_INVALID_COMMAND_QUEUE,
                "Unknown queue",
            ));
        }
        match state.buffers.get_mut(&mem) {
            Some(buffer) if buffer.data.len() >= src.len() => {
                buffer.data[..src.len()].copy_from_slice(src);
                Ok(())
            }
            Some(_) => Err(error(
                ErrorStatus::MemoryCopyH2D,
                OpenCLStatus::CL_INVALID_VALUE,
                "Write out of bounds",
            )),
            None => Err(error(
                ErrorStatus::MemoryCopyH2D,
                OpenCLStatus::CL_INVALID_MEM_OBJECT,
                "Unknown buffer",
            )),
        }
    }

    fn read_buffer(&self, queue: DummyId, mem: DummyId, dst: &mut [u8]) -> Result<(), BackendError> {
        let state = self.state();
        if !state.queues.contains_key(&queue) {
            return Err(error(
                ErrorStatus::MemoryCopyD2H,
                OpenCLStatus::CL_INVALID_COMMAND_QUEUE,
                "Unknown queue",
            ));
        }
        match state.buffers.get(&mem) {
            Some(buffer) if buffer.data.len() >= dst.len() => {
                dst.copy_from_slice(&buffer.data[..dst.len()]);
                Ok(())
            }
            Some(_) => Err(error(
                ErrorStatus::MemoryCopyD2H,
                OpenCLStatus::CL_INVALID_VALUE,
                "Read out of bounds",
            )),
            None => Err(error(
                ErrorStatus::MemoryCopyD2H,
                OpenCLStatus::CL_INVALID_MEM_OBJECT,
                "Unknown buffer",
            )),
        }
    }

    fn build_program(
        &self,
        context: DummyId,
        device: DummyId,
        source: &str,
        options: &str,
    ) -> Result<DummyId, BackendError> {
        let _ = options;
        Self::check_device(device)?;
        if context != CONTEXT {
            return Err(error(
                ErrorStatus::KernelCompilation,
                OpenCLStatus::CL_INVALID_CONTEXT,
                "Unknown context",
            ));
        }
        if !source.contains("__kernel") {
            return Err(error(
                ErrorStatus::KernelCompilation,
                OpenCLStatus::CL_BUILD_PROGRAM_FAILURE,
                "error: no kernels in program",
            ));
        }
        let mut state = self.state();
        let id = state.id();
        state.programs.insert(id, source.into());
        state.programs_built += 1;
        state.sources.push(source.into());
        Ok(id)
    }

    fn release_program(&self, program: DummyId) {
        self.state().programs.remove(&program);
    }

    fn create_kernel(&self, program: DummyId, name: &str) -> Result<DummyId, BackendError> {
        let mut state = self.state();
        let Some(source) = state.programs.get(&program) else {
            return Err(error(
                ErrorStatus::KernelCreation,
                OpenCLStatus::CL_INVALID_PROGRAM,
                "Unknown program",
            ));
        };
        if !source.contains(&format!(" {name}(")) {
            return Err(error(
                ErrorStatus::KernelCreation,
                OpenCLStatus::CL_INVALID_KERNEL_NAME,
                "Kernel not found in program",
            ));
        }
        let id = state.id();
        state.kernels.insert(id, DummyKernel { program, name: name.into(), args: BTreeMap::new() });
        Ok(id)
    }

    fn clone_kernel(&self, kernel: DummyId) -> Result<DummyId, BackendError> {
        let mut state = self.state();
        let Some(source) = state.kernels.get(&kernel) else {
            return Err(error(
                ErrorStatus::KernelCreation,
                OpenCLStatus::CL_INVALID_KERNEL,
                "Unknown kernel",
            ));
        };
        let clone =
            DummyKernel { program: source.program, name: source.name.clone(), args: source.args.clone() };
        let id = state.id();
        state.kernels.insert(id, clone);
        Ok(id)
    }

    fn release_kernel(&self, kernel: DummyId) {
        self.state().kernels.remove(&kernel);
    }

    fn set_kernel_arg(
        &self,
        kernel: DummyId,
        index: u32,
        arg: KernelArg<DummyId>,
    ) -> Result<(), BackendError> {
        let mut state = self.state();
        if let KernelArg::Mem(mem) = arg {
            if !state.buffers.contains_key(&mem) {
                return Err(error(
                    ErrorStatus::IncorrectKernelArg,
                    OpenCLStatus::CL_INVALID_MEM_OBJECT,
                    "Unknown buffer",
                ));
            }
        }
        match state.kernels.get_mut(&kernel) {
            Some(kernel) => {
                kernel.args.insert(index, arg);
                Ok(())
            }
            None => Err(error(
                ErrorStatus::IncorrectKernelArg,
                OpenCLStatus::CL_INVALID_KERNEL,
                "Unknown kernel",
            )),
        }
    }

    fn enqueue_kernel(
        &self,
        queue: DummyId,
        kernel: DummyId,
        global_work_size: &[usize],
        local_work_size: &[usize],
        event_wait_list: &[DummyId],
        event: bool,
    ) -> Result<Option<DummyId>, BackendError> {
        let mut state = self.state();
        let Some(&profiled) = state.queues.get(&queue) else {
            return Err(error(
                ErrorStatus::KernelLaunch,
                OpenCLStatus::CL_INVALID_COMMAND_QUEUE,
                "Unknown queue",
            ));
        };
        let Some(kernel) = state.kernels.get(&kernel) else {
            return Err(error(ErrorStatus::KernelLaunch, OpenCLStatus::CL_INVALID_KERNEL, "Unknown kernel"));
        };
        // Arguments must be set without gaps and memory objects must still be alive
        let bound: BTreeSet<u32> = kernel.args.keys().copied().collect();
        if bound.iter().enumerate().any(|(i, &index)| i as u32 != index) || !bound.contains(&0) {
            return Err(error(
                ErrorStatus::KernelLaunch,
                OpenCLStatus::CL_INVALID_KERNEL_ARGS,
                "Kernel arguments are not set",
            ));
        }
        if kernel.args.values().any(|arg| matches!(arg, KernelArg::Mem(mem) if !state.buffers.contains_key(mem))) {
            return Err(error(
                ErrorStatus::KernelLaunch,
                OpenCLStatus::CL_INVALID_MEM_OBJECT,
                "Kernel argument refers to freed buffer",
            ));
        }
        if event_wait_list.iter().any(|event| !state.events.contains_key(event)) {
            return Err(error(
                ErrorStatus::KernelLaunch,
                OpenCLStatus::CL_INVALID_EVENT_WAIT_LIST,
                "Unknown event in wait list",
            ));
        }
        if global_work_size.is_empty()
            || global_work_size.len() != local_work_size.len()
            || global_work_size.iter().zip(local_work_size).any(|(&g, &l)| l == 0 || g % l != 0)
        {
            return Err(error(
                ErrorStatus::KernelLaunch,
                OpenCLStatus::CL_INVALID_WORK_GROUP_SIZE,
                "Global work size is not multiple of local work size",
            ));
        }
        let Some(cost) = (self.config.launch_cost)(global_work_size, local_work_size) else {
            return Err(error(
                ErrorStatus::KernelLaunch,
                OpenCLStatus::CL_OUT_OF_RESOURCES,
                "Launch rejected by device",
            ));
        };
        let start = state.clock;
        state.clock += cost;
        state.launches += 1;
        if !event {
            return Ok(None);
        }
        let end = state.clock;
        let id = state.id();
        state.events.insert(id, DummyEvent { start, end, profiled });
        Ok(Some(id))
    }

    fn finish(&self, queue: DummyId) -> Result<(), BackendError> {
        if self.state().queues.contains_key(&queue) {
            Ok(())
        } else {
            Err(error(ErrorStatus::KernelSync, OpenCLStatus::CL_INVALID_COMMAND_QUEUE, "Unknown queue"))
        }
    }

    fn wait_for_events(&self, events: &[DummyId]) -> Result<(), BackendError> {
        let state = self.state();
        if events.iter().all(|event| state.events.contains_key(event)) {
            Ok(())
        } else {
            Err(error(ErrorStatus::KernelSync, OpenCLStatus::CL_INVALID_EVENT, "Unknown event"))
        }
    }

    fn profiling_info(&self, event: DummyId, info: ProfilingInfo) -> Result<u64, BackendError> {
        let state = self.state();
        let Some(event) = state.events.get(&event) else {
            return Err(error(ErrorStatus::Profiling, OpenCLStatus::CL_INVALID_EVENT, "Unknown event"));
        };
        if !event.profiled {
            return Err(error(
                ErrorStatus::Profiling,
                OpenCLStatus::CL_PROFILING_INFO_NOT_AVAILABLE,
                "Queue was created without profiling",
            ));
        }
        Ok(match info {
            ProfilingInfo::CommandStart => event.start,
            ProfilingInfo::CommandEnd => event.end,
        })
    }

    fn release_event(&self, event: DummyId) {
        self.state().events.remove(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::{Dummy, DummyConfig};
    use crate::backend::{Backend, KernelArg, MemAccess, ProfilingInfo};

    #[test]
    fn buffer_refcount() {
        let dummy = Dummy::new(DummyConfig::default());
        let mem = dummy.create_buffer(dummy.context(), MemAccess::ReadOnly, 16, None).unwrap();
        dummy.retain_buffer(mem).unwrap();
        assert_eq!(dummy.buffer_refcount(mem), Some(2));
        dummy.release_buffer(mem);
        assert_eq!(dummy.buffer_refcount(mem), Some(1));
        dummy.release_buffer(mem);
        assert_eq!(dummy.buffer_refcount(mem), None);
        assert_eq!(dummy.stats().buffers_live, 0);
    }

    #[test]
    fn launch_advances_clock() {
        let dummy = Dummy::new(DummyConfig {
            launch_cost: std::sync::Arc::new(|gws, _| Some(gws[0] as u64)),
            ..DummyConfig::default()
        });
        let (ctx, dev) = (dummy.context(), dummy.device());
        let queue = dummy.create_queue(ctx, dev, true).unwrap();
        let program = dummy.build_program(ctx, dev, "__kernel void f(int x) {}", "").unwrap();
        let kernel = dummy.create_kernel(program, "f").unwrap();
        assert!(dummy.enqueue_kernel(queue, kernel, &[64], &[8], &[], true).is_err());
        dummy.set_kernel_arg(kernel, 0, KernelArg::I32(1)).unwrap();
        let e1 = dummy.enqueue_kernel(queue, kernel, &[64], &[8], &[], true).unwrap().unwrap();
        let e2 = dummy.enqueue_kernel(queue, kernel, &[128], &[8], &[e1], true).unwrap().unwrap();
        assert_eq!(dummy.profiling_info(e1, ProfilingInfo::CommandStart).unwrap(), 0);
        assert_eq!(dummy.profiling_info(e2, ProfilingInfo::CommandEnd).unwrap(), 192);
        dummy.release_event(e1);
        dummy.release_event(e2);
        dummy.release_kernel(kernel);
        dummy.release_program(program);
        dummy.release_queue(queue);
        let stats = dummy.stats();
        assert_eq!(stats.launches, 2);
        assert_eq!(stats.events_live + stats.kernels_live + stats.programs_live + stats.queues_live, 0);
    }
}
