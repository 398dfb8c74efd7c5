//! `OpenCL` backend
//!
//! The runtime is loaded dynamically, so binaries built with ysmm start
//! on machines without an `OpenCL` installation and fail only once
//! [`OpenCL::new`] is called.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use super::{Backend, DeviceInfo, KernelArg, MemAccess, PlatformInfo, ProfilingInfo};
use crate::error::{BackendError, ErrorStatus};
use libloading::Library;
use std::{
    ffi::{c_void, CString},
    ptr,
    sync::Arc,
};

type cl_int = i32;
type cl_uint = u32;
type cl_bitfield = u64;

macro_rules! cl_object {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(transparent)]
        pub struct $name(*mut c_void);

        // OpenCL objects are thread safe, except kernels which the engine never
        // mutates from two threads at once
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}

        impl $name {
            /// Wraps raw `OpenCL` object, the pointer is not retained
            #[must_use]
            pub const fn from_raw(ptr: *mut c_void) -> Self {
                Self(ptr)
            }

            #[must_use]
            pub const fn as_raw(self) -> *mut c_void {
                self.0
            }
        }
    };
}

cl_object!(
    /// `cl_platform_id`
    OpenCLPlatform
);
cl_object!(
    /// `cl_device_id`
    OpenCLDevice
);
cl_object!(
    /// `cl_context`
    OpenCLContext
);
cl_object!(
    /// `cl_command_queue`
    OpenCLQueue
);
cl_object!(
    /// `cl_mem`
    OpenCLMem
);
cl_object!(
    /// `cl_program`
    OpenCLProgram
);
cl_object!(
    /// `cl_kernel`
    OpenCLKernel
);
cl_object!(
    /// `cl_event`
    OpenCLEvent
);

/// Dynamically loaded `OpenCL` runtime
pub struct OpenCL {
    // Keeps function pointers valid
    #[allow(unused)]
    library: Library,
    clGetPlatformIDs: unsafe extern "C" fn(cl_uint, *mut *mut c_void, *mut cl_uint) -> cl_int,
    clGetPlatformInfo:
        unsafe extern "C" fn(*mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> cl_int,
    clGetDeviceIDs: unsafe extern "C" fn(
        *mut c_void,
        cl_bitfield,
        cl_uint,
        *mut *mut c_void,
        *mut cl_uint,
    ) -> cl_int,
    clGetDeviceInfo:
        unsafe extern "C" fn(*mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> cl_int,
    clCreateContext: unsafe extern "C" fn(
        *const isize,
        cl_uint,
        *const *mut c_void,
        Option<unsafe extern "C" fn(*const i8, *const c_void, usize, *mut c_void)>,
        *mut c_void,
        *mut cl_int,
    ) -> *mut c_void,
    clReleaseContext: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clCreateCommandQueue:
        unsafe extern "C" fn(*mut c_void, *mut c_void, cl_bitfield, *mut cl_int) -> *mut c_void,
    clCreateCommandQueueWithProperties: Option<
        unsafe extern "C" fn(*mut c_void, *mut c_void, *const cl_bitfield, *mut cl_int) -> *mut c_void,
    >,
    clReleaseCommandQueue: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clCreateBuffer:
        unsafe extern "C" fn(*mut c_void, cl_bitfield, usize, *mut c_void, *mut cl_int) -> *mut c_void,
    clRetainMemObject: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clReleaseMemObject: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clEnqueueReadBuffer: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        usize,
        *mut c_void,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> cl_int,
    clEnqueueWriteBuffer: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        usize,
        *const c_void,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> cl_int,
    clCreateProgramWithSource: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        *const *const i8,
        *const usize,
        *mut cl_int,
    ) -> *mut c_void,
    clBuildProgram: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        *const *mut c_void,
        *const i8,
        Option<unsafe extern "C" fn(*mut c_void, *mut c_void)>,
        *mut c_void,
    ) -> cl_int,
    clGetProgramBuildInfo: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        *mut c_void,
        *mut usize,
    ) -> cl_int,
    clReleaseProgram: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clCreateKernel: unsafe extern "C" fn(*mut c_void, *const i8, *mut cl_int) -> *mut c_void,
    clCloneKernel: Option<unsafe extern "C" fn(*mut c_void, *mut cl_int) -> *mut c_void>,
    clGetKernelInfo:
        unsafe extern "C" fn(*mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> cl_int,
    clReleaseKernel: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clSetKernelArg: unsafe extern "C" fn(*mut c_void, cl_uint, usize, *const c_void) -> cl_int,
    clEnqueueNDRangeKernel: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        *const usize,
        *const usize,
        *const usize,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> cl_int,
    clFinish: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clWaitForEvents: unsafe extern "C" fn(cl_uint, *const *mut c_void) -> cl_int,
    clGetEventProfilingInfo:
        unsafe extern "C" fn(*mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> cl_int,
    clReleaseEvent: unsafe extern "C" fn(*mut c_void) -> cl_int,
}

impl std::fmt::Debug for OpenCL {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenCL")
            .field("clone_kernel", &self.clCloneKernel.is_some())
            .field("queue_with_properties", &self.clCreateCommandQueueWithProperties.is_some())
            .finish_non_exhaustive()
    }
}

fn load<T: Copy>(library: &Library, name: &[u8]) -> Result<T, BackendError> {
    match unsafe { library.get::<T>(name) } {
        Ok(symbol) => Ok(*symbol),
        Err(e) => Err(BackendError::new(
            ErrorStatus::DyLibNotFound,
            OpenCLStatus::UNKNOWN,
            format!("{} not found in OpenCL runtime, {e}", symbol_name(name)),
        )),
    }
}

fn load_optional<T: Copy>(library: &Library, name: &[u8]) -> Option<T> {
    unsafe { library.get::<T>(name) }.ok().map(|symbol| *symbol)
}

fn symbol_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name)).into_owned()
}

impl OpenCL {
    /// Loads `OpenCL` runtime from one of the usual locations.
    pub fn new() -> Result<Arc<Self>, BackendError> {
        let opencl_paths = [
            "libOpenCL.so.1",
            "libOpenCL.so",
            "/lib/libOpenCL.so",
            "/lib64/libOpenCL.so",
            "/lib/x86_64-linux-gnu/libOpenCL.so.1",
            "/usr/lib/libOpenCL.so",
            "/usr/lib64/libOpenCL.so",
            "/usr/lib/x86_64-linux-gnu/libOpenCL.so.1",
            "/usr/lib/x86_64-linux-gnu/libOpenCL.so",
            "/System/Library/Frameworks/OpenCL.framework/OpenCL",
            "OpenCL.dll",
        ];
        let opencl = opencl_paths.iter().find_map(|path| unsafe { Library::new(path) }.ok());
        let Some(library) = opencl else {
            return Err(BackendError::new(
                ErrorStatus::DyLibNotFound,
                OpenCLStatus::UNKNOWN,
                "OpenCL runtime not found.",
            ));
        };
        Ok(Arc::new(OpenCL {
            clGetPlatformIDs: load(&library, b"clGetPlatformIDs\0")?,
            clGetPlatformInfo: load(&library, b"clGetPlatformInfo\0")?,
            clGetDeviceIDs: load(&library, b"clGetDeviceIDs\0")?,
            clGetDeviceInfo: load(&library, b"clGetDeviceInfo\0")?,
            clCreateContext: load(&library, b"clCreateContext\0")?,
            clReleaseContext: load(&library, b"clReleaseContext\0")?,
            clCreateCommandQueue: load(&library, b"clCreateCommandQueue\0")?,
            clCreateCommandQueueWithProperties: load_optional(
                &library,
                b"clCreateCommandQueueWithProperties\0",
            ),
            clReleaseCommandQueue: load(&library, b"clReleaseCommandQueue\0")?,
            clCreateBuffer: load(&library, b"clCreateBuffer\0")?,
            clRetainMemObject: load(&library, b"clRetainMemObject\0")?,
            clReleaseMemObject: load(&library, b"clReleaseMemObject\0")?,
            clEnqueueReadBuffer: load(&library, b"clEnqueueReadBuffer\0")?,
            clEnqueueWriteBuffer: load(&library, b"clEnqueueWriteBuffer\0")?,
            clCreateProgramWithSource: load(&library, b"clCreateProgramWithSource\0")?,
            clBuildProgram: load(&library, b"clBuildProgram\0")?,
            clGetProgramBuildInfo: load(&library, b"clGetProgramBuildInfo\0")?,
            clReleaseProgram: load(&library, b"clReleaseProgram\0")?,
            clCreateKernel: load(&library, b"clCreateKernel\0")?,
            clCloneKernel: load_optional(&library, b"clCloneKernel\0"),
            clGetKernelInfo: load(&library, b"clGetKernelInfo\0")?,
            clReleaseKernel: load(&library, b"clReleaseKernel\0")?,
            clSetKernelArg: load(&library, b"clSetKernelArg\0")?,
            clEnqueueNDRangeKernel: load(&library, b"clEnqueueNDRangeKernel\0")?,
            clFinish: load(&library, b"clFinish\0")?,
            clWaitForEvents: load(&library, b"clWaitForEvents\0")?,
            clGetEventProfilingInfo: load(&library, b"clGetEventProfilingInfo\0")?,
            clReleaseEvent: load(&library, b"clReleaseEvent\0")?,
            library,
        }))
    }

    /// All platforms of the installed runtime
    pub fn platforms(&self) -> Result<Vec<OpenCLPlatform>, BackendError> {
        let mut count: cl_uint = 0;
        let status = unsafe { (self.clGetPlatformIDs)(0, ptr::null_mut(), &mut count) };
        // Khronos ICD loader reports no platforms as an error
        if status == OpenCLStatus::CL_PLATFORM_NOT_FOUND_KHR as cl_int {
            return Ok(Vec::new());
        }
        check(status, ErrorStatus::DeviceEnumeration, "clGetPlatformIDs")?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut ids: Vec<*mut c_void> = vec![ptr::null_mut(); count as usize];
        check(
            unsafe { (self.clGetPlatformIDs)(count, ids.as_mut_ptr(), ptr::null_mut()) },
            ErrorStatus::DeviceEnumeration,
            "clGetPlatformIDs",
        )?;
        Ok(ids.into_iter().map(OpenCLPlatform).collect())
    }

    /// All devices of a platform, platform without devices is not an error
    pub fn devices(&self, platform: OpenCLPlatform) -> Result<Vec<OpenCLDevice>, BackendError> {
        let mut count: cl_uint = 0;
        let status = unsafe {
            (self.clGetDeviceIDs)(platform.0, CL_DEVICE_TYPE_ALL, 0, ptr::null_mut(), &mut count)
        };
        if status == OpenCLStatus::CL_DEVICE_NOT_FOUND as cl_int {
            return Ok(Vec::new());
        }
        check(status, ErrorStatus::DeviceEnumeration, "clGetDeviceIDs")?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut ids: Vec<*mut c_void> = vec![ptr::null_mut(); count as usize];
        check(
            unsafe {
                (self.clGetDeviceIDs)(
                    platform.0,
                    CL_DEVICE_TYPE_ALL,
                    count,
                    ids.as_mut_ptr(),
                    ptr::null_mut(),
                )
            },
            ErrorStatus::DeviceEnumeration,
            "clGetDeviceIDs",
        )?;
        Ok(ids.into_iter().map(OpenCLDevice).collect())
    }

    /// Creates context holding single device, release it with [`OpenCL::release_context`]
    pub fn create_context(&self, device: OpenCLDevice) -> Result<OpenCLContext, BackendError> {
        let mut status = OpenCLStatus::CL_SUCCESS as cl_int;
        let devices = [device.0];
        let context = unsafe {
            (self.clCreateContext)(
                ptr::null(),
                1,
                devices.as_ptr(),
                None,
                ptr::null_mut(),
                &mut status,
            )
        };
        check(status, ErrorStatus::Initialization, "clCreateContext")?;
        Ok(OpenCLContext(context))
    }

    pub fn release_context(&self, context: OpenCLContext) {
        let _ = unsafe { (self.clReleaseContext)(context.0) };
    }

    fn info_string(
        &self,
        query: unsafe extern "C" fn(*mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> cl_int,
        object: *mut c_void,
        param_name: cl_uint,
    ) -> Result<String, BackendError> {
        let mut data = get_info_data(query, object, param_name)?;
        while data.last() == Some(&0) {
            data.pop();
        }
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    fn build_log(&self, program: *mut c_void, device: *mut c_void) -> String {
        let mut size: usize = 0;
        let status = unsafe {
            (self.clGetProgramBuildInfo)(
                program,
                device,
                CL_PROGRAM_BUILD_LOG,
                0,
                ptr::null_mut(),
                &mut size,
            )
        };
        if status != OpenCLStatus::CL_SUCCESS as cl_int || size == 0 {
            return String::new();
        }
        let mut data: Vec<u8> = vec![0; size];
        let status = unsafe {
            (self.clGetProgramBuildInfo)(
                program,
                device,
                CL_PROGRAM_BUILD_LOG,
                size,
                data.as_mut_ptr().cast(),
                ptr::null_mut(),
            )
        };
        if status != OpenCLStatus::CL_SUCCESS as cl_int {
            return String::new();
        }
        while data.last() == Some(&0) {
            data.pop();
        }
        String::from_utf8_lossy(&data).into_owned()
    }
}

fn get_info_data(
    query: unsafe extern "C" fn(*mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> cl_int,
    object: *mut c_void,
    param_name: cl_uint,
) -> Result<Vec<u8>, BackendError> {
    let mut size: usize = 0;
    check(
        unsafe { query(object, param_name, 0, ptr::null_mut(), &mut size) },
        ErrorStatus::DeviceQuery,
        format!("Failed to get info {param_name:#x}"),
    )?;
    let mut data: Vec<u8> = vec![0; size];
    if size > 0 {
        check(
            unsafe { query(object, param_name, size, data.as_mut_ptr().cast(), ptr::null_mut()) },
            ErrorStatus::DeviceQuery,
            format!("Failed to get info {param_name:#x}"),
        )?;
    }
    Ok(data)
}

impl Backend for OpenCL {
    type Platform = OpenCLPlatform;
    type Device = OpenCLDevice;
    type Context = OpenCLContext;
    type Queue = OpenCLQueue;
    type Mem = OpenCLMem;
    type Program = OpenCLProgram;
    type Kernel = OpenCLKernel;
    type Event = OpenCLEvent;

    fn device_platform(&self, device: OpenCLDevice) -> Result<OpenCLPlatform, BackendError> {
        let mut platform: *mut c_void = ptr::null_mut();
        check(
            unsafe {
                (self.clGetDeviceInfo)(
                    device.0,
                    CL_DEVICE_PLATFORM,
                    std::mem::size_of::<*mut c_void>(),
                    ptr::addr_of_mut!(platform).cast(),
                    ptr::null_mut(),
                )
            },
            ErrorStatus::DeviceQuery,
            "CL_DEVICE_PLATFORM",
        )?;
        Ok(OpenCLPlatform(platform))
    }

    fn platform_info(
        &self,
        platform: OpenCLPlatform,
        info: PlatformInfo,
    ) -> Result<String, BackendError> {
        let param_name = match info {
            PlatformInfo::Name => CL_PLATFORM_NAME,
            PlatformInfo::Extensions => CL_PLATFORM_EXTENSIONS,
        };
        self.info_string(self.clGetPlatformInfo, platform.0, param_name)
    }

    fn device_info(&self, device: OpenCLDevice, info: DeviceInfo) -> Result<String, BackendError> {
        let param_name = match info {
            DeviceInfo::Name => CL_DEVICE_NAME,
            DeviceInfo::Extensions => CL_DEVICE_EXTENSIONS,
        };
        self.info_string(self.clGetDeviceInfo, device.0, param_name)
    }

    fn create_queue(
        &self,
        context: OpenCLContext,
        device: OpenCLDevice,
        profiling: bool,
    ) -> Result<OpenCLQueue, BackendError> {
        let properties = if profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };
        let mut status = OpenCLStatus::CL_SUCCESS as cl_int;
        let queue = if let Some(create) = self.clCreateCommandQueueWithProperties {
            let props = [CL_QUEUE_PROPERTIES, properties, 0];
            unsafe { create(context.0, device.0, props.as_ptr(), &mut status) }
        } else {
            unsafe { (self.clCreateCommandQueue)(context.0, device.0, properties, &mut status) }
        };
        check(status, ErrorStatus::QueueCreation, "clCreateCommandQueue")?;
        Ok(OpenCLQueue(queue))
    }

    fn release_queue(&self, queue: OpenCLQueue) {
        let _ = unsafe { (self.clReleaseCommandQueue)(queue.0) };
    }

    fn create_buffer(
        &self,
        context: OpenCLContext,
        access: MemAccess,
        bytes: usize,
        host: Option<&[u8]>,
    ) -> Result<OpenCLMem, BackendError> {
        let mut flags = match access {
            MemAccess::ReadOnly => CL_MEM_READ_ONLY,
            MemAccess::ReadWrite => CL_MEM_READ_WRITE,
        };
        let mut host_ptr = ptr::null_mut();
        if let Some(host) = host {
            debug_assert_eq!(host.len(), bytes);
            flags |= CL_MEM_COPY_HOST_PTR;
            // With CL_MEM_COPY_HOST_PTR the runtime only reads from host_ptr
            host_ptr = host.as_ptr().cast_mut().cast();
        }
        let mut status = OpenCLStatus::CL_SUCCESS as cl_int;
        let buffer = unsafe { (self.clCreateBuffer)(context.0, flags, bytes, host_ptr, &mut status) };
        check(status, ErrorStatus::MemoryAllocation, format!("clCreateBuffer of {bytes} B"))?;
        Ok(OpenCLMem(buffer))
    }

    fn retain_buffer(&self, mem: OpenCLMem) -> Result<(), BackendError> {
        check(unsafe { (self.clRetainMemObject)(mem.0) }, ErrorStatus::MemoryAllocation, "clRetainMemObject")
    }

    fn release_buffer(&self, mem: OpenCLMem) {
        let _ = unsafe { (self.clReleaseMemObject)(mem.0) };
    }

    fn write_buffer(
        &self,
        queue: OpenCLQueue,
        mem: OpenCLMem,
        src: &[u8],
    ) -> Result<(), BackendError> {
        check(
            unsafe {
                (self.clEnqueueWriteBuffer)(
                    queue.0,
                    mem.0,
                    CL_BLOCKING,
                    0,
                    src.len(),
                    src.as_ptr().cast(),
                    0,
                    ptr::null(),
                    ptr::null_mut(),
                )
            },
            ErrorStatus::MemoryCopyH2D,
            "clEnqueueWriteBuffer",
        )
    }

    fn read_buffer(
        &self,
        queue: OpenCLQueue,
        mem: OpenCLMem,
        dst: &mut [u8],
    ) -> Result<(), BackendError> {
        check(
            unsafe {
                (self.clEnqueueReadBuffer)(
                    queue.0,
                    mem.0,
                    CL_BLOCKING,
                    0,
                    dst.len(),
                    dst.as_mut_ptr().cast(),
                    0,
                    ptr::null(),
                    ptr::null_mut(),
                )
            },
            ErrorStatus::MemoryCopyD2H,
            "clEnqueueReadBuffer",
        )
    }

    fn build_program(
        &self,
        context: OpenCLContext,
        device: OpenCLDevice,
        source: &str,
        options: &str,
    ) -> Result<OpenCLProgram, BackendError> {
        let sources: &[&str] = &[source];
        let lengths: Vec<usize> = sources.iter().map(|s| s.len()).collect();
        let sources: Vec<*const i8> = sources.iter().map(|s| s.as_ptr().cast()).collect();
        let mut status = OpenCLStatus::CL_SUCCESS as cl_int;
        let program = unsafe {
            (self.clCreateProgramWithSource)(
                context.0,
                1,
                sources.as_ptr(),
                lengths.as_ptr(),
                &mut status,
            )
        };
        check(status, ErrorStatus::KernelCompilation, "clCreateProgramWithSource")?;
        let Ok(options) = CString::new(options) else {
            let _ = unsafe { (self.clReleaseProgram)(program) };
            return Err(BackendError::new(
                ErrorStatus::KernelCompilation,
                OpenCLStatus::CL_INVALID_BUILD_OPTIONS,
                "Build options contain nul byte",
            ));
        };
        let devices = [device.0];
        let status = unsafe {
            (self.clBuildProgram)(
                program,
                1,
                devices.as_ptr(),
                options.as_ptr().cast(),
                None,
                ptr::null_mut(),
            )
        };
        if status != OpenCLStatus::CL_SUCCESS as cl_int {
            let log = self.build_log(program, device.0);
            let _ = unsafe { (self.clReleaseProgram)(program) };
            return Err(BackendError {
                status: ErrorStatus::KernelCompilation,
                code: status,
                context: log.into(),
            });
        }
        Ok(OpenCLProgram(program))
    }

    fn release_program(&self, program: OpenCLProgram) {
        let _ = unsafe { (self.clReleaseProgram)(program.0) };
    }

    fn create_kernel(&self, program: OpenCLProgram, name: &str) -> Result<OpenCLKernel, BackendError> {
        let Ok(name) = CString::new(name) else {
            return Err(BackendError::new(
                ErrorStatus::KernelCreation,
                OpenCLStatus::CL_INVALID_KERNEL_NAME,
                "Kernel name contains nul byte",
            ));
        };
        let mut status = OpenCLStatus::CL_SUCCESS as cl_int;
        let kernel = unsafe { (self.clCreateKernel)(program.0, name.as_ptr().cast(), &mut status) };
        check(status, ErrorStatus::KernelCreation, format!("clCreateKernel {name:?}"))?;
        Ok(OpenCLKernel(kernel))
    }

    fn clone_kernel(&self, kernel: OpenCLKernel) -> Result<OpenCLKernel, BackendError> {
        let mut status = OpenCLStatus::CL_SUCCESS as cl_int;
        if let Some(clone) = self.clCloneKernel {
            let kernel = unsafe { clone(kernel.0, &mut status) };
            check(status, ErrorStatus::KernelCreation, "clCloneKernel")?;
            return Ok(OpenCLKernel(kernel));
        }
        // Pre 2.1 runtimes, create fresh kernel from the same program,
        // arguments are not carried over
        let mut program: *mut c_void = ptr::null_mut();
        check(
            unsafe {
                (self.clGetKernelInfo)(
                    kernel.0,
                    CL_KERNEL_PROGRAM,
                    std::mem::size_of::<*mut c_void>(),
                    ptr::addr_of_mut!(program).cast(),
                    ptr::null_mut(),
                )
            },
            ErrorStatus::KernelCreation,
            "CL_KERNEL_PROGRAM",
        )?;
        let mut name = get_info_data(self.clGetKernelInfo, kernel.0, CL_KERNEL_FUNCTION_NAME)?;
        while name.last() == Some(&0) {
            name.pop();
        }
        self.create_kernel(OpenCLProgram(program), &String::from_utf8_lossy(&name))
    }

    fn release_kernel(&self, kernel: OpenCLKernel) {
        let _ = unsafe { (self.clReleaseKernel)(kernel.0) };
    }

    fn set_kernel_arg(
        &self,
        kernel: OpenCLKernel,
        index: u32,
        arg: KernelArg<OpenCLMem>,
    ) -> Result<(), BackendError> {
        let status = match arg {
            KernelArg::Mem(mem) => unsafe {
                (self.clSetKernelArg)(
                    kernel.0,
                    index,
                    std::mem::size_of::<*mut c_void>(),
                    ptr::addr_of!(mem.0).cast(),
                )
            },
            KernelArg::I32(value) => unsafe {
                (self.clSetKernelArg)(
                    kernel.0,
                    index,
                    std::mem::size_of::<i32>(),
                    ptr::addr_of!(value).cast(),
                )
            },
        };
        check(status, ErrorStatus::IncorrectKernelArg, format!("Kernel argument {index}"))
    }

    fn enqueue_kernel(
        &self,
        queue: OpenCLQueue,
        kernel: OpenCLKernel,
        global_work_size: &[usize],
        local_work_size: &[usize],
        event_wait_list: &[OpenCLEvent],
        event: bool,
    ) -> Result<Option<OpenCLEvent>, BackendError> {
        let mut out: *mut c_void = ptr::null_mut();
        let wait_list = if event_wait_list.is_empty() {
            ptr::null()
        } else {
            event_wait_list.as_ptr().cast()
        };
        let local = if local_work_size.is_empty() { ptr::null() } else { local_work_size.as_ptr() };
        check(
            unsafe {
                (self.clEnqueueNDRangeKernel)(
                    queue.0,
                    kernel.0,
                    u32::try_from(global_work_size.len()).unwrap_or(u32::MAX),
                    ptr::null(),
                    global_work_size.as_ptr(),
                    local,
                    u32::try_from(event_wait_list.len()).unwrap_or(u32::MAX),
                    wait_list,
                    if event { ptr::addr_of_mut!(out) } else { ptr::null_mut() },
                )
            },
            ErrorStatus::KernelLaunch,
            format!("clEnqueueNDRangeKernel gws={global_work_size:?} lws={local_work_size:?}"),
        )?;
        Ok(event.then_some(OpenCLEvent(out)))
    }

    fn finish(&self, queue: OpenCLQueue) -> Result<(), BackendError> {
        check(unsafe { (self.clFinish)(queue.0) }, ErrorStatus::KernelSync, "clFinish")
    }

    fn wait_for_events(&self, events: &[OpenCLEvent]) -> Result<(), BackendError> {
        if events.is_empty() {
            return Ok(());
        }
        check(
            unsafe {
                (self.clWaitForEvents)(
                    u32::try_from(events.len()).unwrap_or(u32::MAX),
                    events.as_ptr().cast(),
                )
            },
            ErrorStatus::KernelSync,
            "clWaitForEvents",
        )
    }

    fn profiling_info(&self, event: OpenCLEvent, info: ProfilingInfo) -> Result<u64, BackendError> {
        let param_name = match info {
            ProfilingInfo::CommandStart => CL_PROFILING_COMMAND_START,
            ProfilingInfo::CommandEnd => CL_PROFILING_COMMAND_END,
        };
        let mut value: u64 = 0;
        check(
            unsafe {
                (self.clGetEventProfilingInfo)(
                    event.0,
                    param_name,
                    std::mem::size_of::<u64>(),
                    ptr::addr_of_mut!(value).cast(),
                    ptr::null_mut(),
                )
            },
            ErrorStatus::Profiling,
            "clGetEventProfilingInfo",
        )?;
        Ok(value)
    }

    fn release_event(&self, event: OpenCLEvent) {
        let _ = unsafe { (self.clReleaseEvent)(event.0) };
    }
}

fn check(status: cl_int, stage: ErrorStatus, context: impl Into<Box<str>>) -> Result<(), BackendError> {
    if status == OpenCLStatus::CL_SUCCESS as cl_int {
        Ok(())
    } else {
        let context: Box<str> = context.into();
        Err(BackendError {
            status: stage,
            code: status,
            context: format!("{context}, {:?}", OpenCLStatus::from(status)).into(),
        })
    }
}

const CL_DEVICE_TYPE_ALL: cl_bitfield = 0xFFFF_FFFF;
const CL_PLATFORM_NAME: cl_uint = 0x0902;
const CL_PLATFORM_EXTENSIONS: cl_uint = 0x0904;
const CL_DEVICE_NAME: cl_uint = 0x102B;
const CL_DEVICE_EXTENSIONS: cl_uint = 0x1030;
const CL_DEVICE_PLATFORM: cl_uint = 0x1031;
const CL_QUEUE_PROPERTIES: cl_bitfield = 0x1093;
const CL_QUEUE_PROFILING_ENABLE: cl_bitfield = 1 << 1;
const CL_MEM_READ_WRITE: cl_bitfield = 1;
const CL_MEM_READ_ONLY: cl_bitfield = 4;
const CL_MEM_COPY_HOST_PTR: cl_bitfield = 1 << 5;
const CL_BLOCKING: cl_uint = 1;
const CL_PROGRAM_BUILD_LOG: cl_uint = 0x1183;
const CL_KERNEL_FUNCTION_NAME: cl_uint = 0x1190;
const CL_KERNEL_PROGRAM: cl_uint = 0x1194;
const CL_PROFILING_COMMAND_START: cl_uint = 0x1282;
const CL_PROFILING_COMMAND_END: cl_uint = 0x1283;

/// Native `OpenCL` status codes
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, PartialEq, Debug, Eq)]
#[repr(i32)]
pub enum OpenCLStatus {
    CL_SUCCESS = 0,
    CL_DEVICE_NOT_FOUND = -1,
    CL_DEVICE_NOT_AVAILABLE = -2,
    CL_COMPILER_NOT_AVAILABLE = -3,
    CL_MEM_OBJECT_ALLOCATION_FAILURE = -4,
    CL_OUT_OF_RESOURCES = -5,
    CL_OUT_OF_HOST_MEMORY = -6,
    CL_PROFILING_INFO_NOT_AVAILABLE = -7,
    CL_IMAGE_FORMAT_NOT_SUPPORTED = -10,
    CL_BUILD_PROGRAM_FAILURE = -11,
    CL_MISALIGNED_SUB_BUFFER_OFFSET = -13,
    CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST = -14,
    CL_INVALID_VALUE = -30,
    CL_INVALID_DEVICE_TYPE = -31,
    CL_INVALID_PLATFORM = -32,
    CL_INVALID_DEVICE = -33,
    CL_INVALID_CONTEXT = -34,
    CL_INVALID_QUEUE_PROPERTIES = -35,
    CL_INVALID_COMMAND_QUEUE = -36,
    CL_INVALID_HOST_PTR = -37,
    CL_INVALID_MEM_OBJECT = -38,
    CL_INVALID_IMAGE_SIZE = -40,
    CL_INVALID_SAMPLER = -41,
    CL_INVALID_BINARY = -42,
    CL_INVALID_BUILD_OPTIONS = -43,
    CL_INVALID_PROGRAM = -44,
    CL_INVALID_PROGRAM_EXECUTABLE = -45,
    CL_INVALID_KERNEL_NAME = -46,
    CL_INVALID_KERNEL_DEFINITION = -47,
    CL_INVALID_KERNEL = -48,
    CL_INVALID_ARG_INDEX = -49,
    CL_INVALID_ARG_VALUE = -50,
    CL_INVALID_ARG_SIZE = -51,
    CL_INVALID_KERNEL_ARGS = -52,
    CL_INVALID_WORK_DIMENSION = -53,
    CL_INVALID_WORK_GROUP_SIZE = -54,
    CL_INVALID_WORK_ITEM_SIZE = -55,
    CL_INVALID_GLOBAL_OFFSET = -56,
    CL_INVALID_EVENT_WAIT_LIST = -57,
    CL_INVALID_EVENT = -58,
    CL_INVALID_OPERATION = -59,
    CL_INVALID_BUFFER_SIZE = -61,
    CL_INVALID_GLOBAL_WORK_SIZE = -63,
    CL_INVALID_PROPERTY = -64,
    CL_INVALID_DEVICE_QUEUE = -70,
    CL_MAX_SIZE_RESTRICTION_EXCEEDED = -72,
    CL_PLATFORM_NOT_FOUND_KHR = -1001,
    UNKNOWN = i32::MIN,
}

impl From<cl_int> for OpenCLStatus {
    fn from(status: cl_int) -> Self {
        match status {
            0 => Self::CL_SUCCESS,
            -1 => Self::CL_DEVICE_NOT_FOUND,
            -2 => Self::CL_DEVICE_NOT_AVAILABLE,
            -3 => Self::CL_COMPILER_NOT_AVAILABLE,
            -4 => Self::CL_MEM_OBJECT_ALLOCATION_FAILURE,
            -5 => Self::CL_OUT_OF_RESOURCES,
            -6 => Self::CL_OUT_OF_HOST_MEMORY,
            -7 => Self::CL_PROFILING_INFO_NOT_AVAILABLE,
            -10 => Self::CL_IMAGE_FORMAT_NOT_SUPPORTED,
            -11 => Self::CL_BUILD_PROGRAM_FAILURE,
            -13 => Self::CL_MISALIGNED_SUB_BUFFER_OFFSET,
            -14 => Self::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
            -30 => Self::CL_INVALID_VALUE,
            -31 => Self::CL_INVALID_DEVICE_TYPE,
            -32 => Self::CL_INVALID_PLATFORM,
            -33 => Self::CL_INVALID_DEVICE,
            -34 => Self::CL_INVALID_CONTEXT,
            -35 => Self::CL_INVALID_QUEUE_PROPERTIES,
            -36 => Self::CL_INVALID_COMMAND_QUEUE,
            -37 => Self::CL_INVALID_HOST_PTR,
            -38 => Self::CL_INVALID_MEM_OBJECT,
            -40 => Self::CL_INVALID_IMAGE_SIZE,
            -41 => Self::CL_INVALID_SAMPLER,
            -42 => Self::CL_INVALID_BINARY,
            -43 => Self::CL_INVALID_BUILD_OPTIONS,
            -44 => Self::CL_INVALID_PROGRAM,
            -45 => Self::CL_INVALID_PROGRAM_EXECUTABLE,
            -46 => Self::CL_INVALID_KERNEL_NAME,
            -47 => Self::CL_INVALID_KERNEL_DEFINITION,
            -48 => Self::CL_INVALID_KERNEL,
            -49 => Self::CL_INVALID_ARG_INDEX,
            -50 => Self::CL_INVALID_ARG_VALUE,
            -51 => Self::CL_INVALID_ARG_SIZE,
            -52 => Self::CL_INVALID_KERNEL_ARGS,
            -53 => Self::CL_INVALID_WORK_DIMENSION,
            -54 => Self::CL_INVALID_WORK_GROUP_SIZE,
            -55 => Self::CL_INVALID_WORK_ITEM_SIZE,
            -56 => Self::CL_INVALID_GLOBAL_OFFSET,
            -57 => Self::CL_INVALID_EVENT_WAIT_LIST,
            -58 => Self::CL_INVALID_EVENT,
            -59 => Self::CL_INVALID_OPERATION,
            -61 => Self::CL_INVALID_BUFFER_SIZE,
            -63 => Self::CL_INVALID_GLOBAL_WORK_SIZE,
            -64 => Self::CL_INVALID_PROPERTY,
            -70 => Self::CL_INVALID_DEVICE_QUEUE,
            -72 => Self::CL_MAX_SIZE_RESTRICTION_EXCEEDED,
            -1001 => Self::CL_PLATFORM_NOT_FOUND_KHR,
            _ => Self::UNKNOWN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OpenCLStatus;

    #[test]
    fn status_codes() {
        assert_eq!(OpenCLStatus::from(-11), OpenCLStatus::CL_BUILD_PROGRAM_FAILURE);
        assert_eq!(OpenCLStatus::from(-30), OpenCLStatus::CL_INVALID_VALUE);
        assert_eq!(OpenCLStatus::from(12345), OpenCLStatus::UNKNOWN);
        assert_eq!(OpenCLStatus::CL_OUT_OF_HOST_MEMORY as i32, -6);
    }
}
