//! Compiled small matrix multiplication kernel ready for dispatch

use std::sync::Arc;

use crate::{
    backend::{Backend, DeviceBuffer, Event, KernelArg, OpenCLStatus},
    error::{BackendError, ErrorStatus, SmmError},
    pack::round_up,
    smm::{KernelVariant, SmmDescriptor},
};

/// Columns of C computed by one work item of tiled kernel
pub const COLS_PER_THREAD: usize = 4;
/// Rows of C computed by one work item of tiled kernel
pub const ROWS_PER_THREAD: usize = 16;
/// Work items along columns in one block of tiled kernel
pub const SUBGROUP_SIZE: usize = 8;
/// Work group edge of basic kernel
pub const BASIC_GROUP: usize = 16;

/// Work group shape of tiled kernel in units of subgroups (columns) and rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blocking {
    pub cols: usize,
    pub rows: usize,
}

impl Blocking {
    #[must_use]
    pub const fn new(cols: usize, rows: usize) -> Self {
        Blocking { cols, rows }
    }

    #[must_use]
    pub const fn local_work_size(self) -> [usize; 2] {
        [SUBGROUP_SIZE * self.cols, self.rows]
    }

    #[must_use]
    pub const fn global_work_size(self, m: usize, n: usize) -> [usize; 2] {
        [
            round_up(n, COLS_PER_THREAD * SUBGROUP_SIZE * self.cols) / COLS_PER_THREAD,
            round_up(m, ROWS_PER_THREAD * self.rows) / ROWS_PER_THREAD,
        ]
    }
}

/// One compiled kernel instance with its packed A and launch geometry.
///
/// Buffers passed to [`SmmKernel::bind`] are not retained,
/// they must stay alive until launches using them complete.
#[derive(Debug)]
pub struct SmmKernel<B: Backend> {
    backend: Arc<B>,
    kernel: B::Kernel,
    a: DeviceBuffer<B>,
    smm: SmmDescriptor<'static>,
    variant: KernelVariant,
    /// Integer arguments following the three buffers
    scalars: [i32; 6],
    bound: Option<[B::Mem; 2]>,
    blocking: Option<Blocking>,
    global: [usize; 2],
    local: [usize; 2],
}

impl<B: Backend> SmmKernel<B> {
    /// Takes ownership of `kernel` and `a`, both are released if binding fails
    pub(crate) fn new(
        backend: &Arc<B>,
        kernel: B::Kernel,
        a: DeviceBuffer<B>,
        smm: SmmDescriptor<'static>,
        variant: KernelVariant,
        scalars: [i32; 6],
    ) -> Result<Self, BackendError> {
        let mut smmk = SmmKernel {
            backend: backend.clone(),
            kernel,
            a,
            smm,
            variant,
            scalars,
            bound: None,
            blocking: None,
            global: [0; 2],
            local: [0; 2],
        };
        match variant {
            KernelVariant::Tiled => smmk.set_blocking(crate::autotune::BLOCKINGS[0]),
            KernelVariant::Basic => {
                smmk.local = [BASIC_GROUP, BASIC_GROUP];
                smmk.global = [round_up(smm.m, BASIC_GROUP), round_up(smm.n, BASIC_GROUP)];
            }
        }
        smmk.set_args()?;
        Ok(smmk)
    }

    fn set_args(&self) -> Result<(), BackendError> {
        self.backend.set_kernel_arg(self.kernel, 0, KernelArg::Mem(self.a.raw()))?;
        for (i, &x) in (3..).zip(self.scalars.iter()) {
            self.backend.set_kernel_arg(self.kernel, i, KernelArg::I32(x))?;
        }
        if let Some([b, c]) = self.bound {
            self.backend.set_kernel_arg(self.kernel, 1, KernelArg::Mem(b))?;
            self.backend.set_kernel_arg(self.kernel, 2, KernelArg::Mem(c))?;
        }
        Ok(())
    }

    /// Sets B (k × n, stride ldb) and C (m × n, stride ldc) device buffers
    pub fn bind(&mut self, b: B::Mem, c: B::Mem) -> Result<(), SmmError> {
        self.backend.set_kernel_arg(self.kernel, 1, KernelArg::Mem(b))?;
        self.backend.set_kernel_arg(self.kernel, 2, KernelArg::Mem(c))?;
        self.bound = Some([b, c]);
        Ok(())
    }

    /// Submits kernel to `queue` after `wait_list` completes, does not block
    pub fn enqueue(&self, queue: B::Queue, wait_list: &[B::Event]) -> Result<Event<B>, SmmError> {
        match self.launch(queue, wait_list, true)? {
            Some(event) => Ok(event),
            None => Err(BackendError::new(
                ErrorStatus::KernelLaunch,
                OpenCLStatus::CL_INVALID_EVENT,
                "Backend returned no event",
            )
            .into()),
        }
    }

    pub(crate) fn launch(
        &self,
        queue: B::Queue,
        wait_list: &[B::Event],
        event: bool,
    ) -> Result<Option<Event<B>>, BackendError> {
        let event = self.backend.enqueue_kernel(
            queue,
            self.kernel,
            &self.global,
            &self.local,
            wait_list,
            event,
        )?;
        Ok(event.map(|event| Event::new(&self.backend, event)))
    }

    /// Independent kernel object sharing packed A and current arguments
    pub fn try_clone(&self) -> Result<Self, SmmError> {
        let a = self.a.try_clone()?;
        let kernel = self.backend.clone_kernel(self.kernel)?;
        let clone = SmmKernel {
            backend: self.backend.clone(),
            kernel,
            a,
            smm: self.smm,
            variant: self.variant,
            scalars: self.scalars,
            bound: self.bound,
            blocking: self.blocking,
            global: self.global,
            local: self.local,
        };
        // Runtimes without native kernel cloning do not copy arguments
        clone.set_args()?;
        Ok(clone)
    }

    pub(crate) fn set_blocking(&mut self, blocking: Blocking) {
        self.blocking = Some(blocking);
        self.local = blocking.local_work_size();
        self.global = blocking.global_work_size(self.smm.m, self.smm.n);
    }

    /// Accepted descriptor, without A
    #[must_use]
    pub const fn descriptor(&self) -> &SmmDescriptor<'static> {
        &self.smm
    }

    #[must_use]
    pub const fn variant(&self) -> KernelVariant {
        self.variant
    }

    #[must_use]
    pub const fn work_dim(&self) -> usize {
        2
    }

    #[must_use]
    pub const fn global_work_size(&self) -> [usize; 2] {
        self.global
    }

    #[must_use]
    pub const fn local_work_size(&self) -> [usize; 2] {
        self.local
    }

    /// Selected blocking, `None` for basic kernel
    #[must_use]
    pub const fn blocking(&self) -> Option<Blocking> {
        self.blocking
    }

    /// Device buffer with A as read by the kernel
    #[must_use]
    pub const fn a_buffer(&self) -> &DeviceBuffer<B> {
        &self.a
    }

    pub(crate) fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

impl<B: Backend> Drop for SmmKernel<B> {
    fn drop(&mut self) {
        self.backend.release_kernel(self.kernel);
    }
}
