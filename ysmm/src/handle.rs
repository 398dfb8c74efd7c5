//! Handle bound to one device, builds and caches kernels for it

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    autotune,
    backend::{Backend, DeviceBuffer, MemAccess},
    config::{Config, DebugMask},
    device::DeviceProperties,
    error::SmmError,
    kernel::SmmKernel,
    pack::{pack_a, round_up, scale_a, TILE_DEPTH},
    smm::{KernelVariant, SmmDescriptor},
    template::{render, TemplateArgs, Templates},
};

/// Name of the kernel function in every template
const KERNEL_NAME: &str = "mm";

/// Compiled programs keyed by template text and canonical parameters
struct ProgramCache<B: Backend> {
    programs: BTreeMap<(String, String), B::Program>,
}

/// Entry point of the engine, bound to one context and device.
///
/// All kernel construction is serialized by one lock. Programs stay cached
/// until the handle is dropped, kernel objects built from the handle may
/// outlive it.
pub struct Handle<B: Backend> {
    backend: Arc<B>,
    context: B::Context,
    device: B::Device,
    props: DeviceProperties,
    config: Config,
    templates: Templates,
    /// Profiling queue used only by autotuning
    queue: Option<B::Queue>,
    cache: Mutex<ProgramCache<B>>,
}

impl<B: Backend> std::fmt::Debug for Handle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("device", &self.props.name)
            .field("platform", &self.props.platform.name)
            .field("profiling", &self.queue.is_some())
            .finish_non_exhaustive()
    }
}

impl<B: Backend> Handle<B> {
    /// Creates handle with configuration loaded from disk and environment.
    /// The context is borrowed, caller keeps it alive for the lifetime
    /// of the handle and of all kernels built from it.
    pub fn new(backend: &Arc<B>, context: B::Context, device: B::Device) -> Result<Self, SmmError> {
        Self::with_config(backend, context, device, Config::load(), Templates::default())
    }

    pub fn with_config(
        backend: &Arc<B>,
        context: B::Context,
        device: B::Device,
        config: Config,
        templates: Templates,
    ) -> Result<Self, SmmError> {
        let debug = config.debug_mask();
        let props = DeviceProperties::query(backend.as_ref(), device)?;
        if debug.dev() {
            println!(
                "Using {} on {}, support level {:?}",
                props.name,
                props.platform.name,
                props.support_level()
            );
        }
        let queue = match backend.create_queue(context, device, true) {
            Ok(queue) => Some(queue),
            Err(e) => {
                if debug.dev() {
                    println!("Profiling queue not available, autotuning disabled, {e}");
                }
                None
            }
        };
        Ok(Handle {
            backend: backend.clone(),
            context,
            device,
            props,
            config,
            templates,
            queue,
            cache: Mutex::new(ProgramCache { programs: BTreeMap::new() }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ProgramCache<B>> {
        // Cache is only modified by single insert, poisoning cannot leave it inconsistent
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn debug(&self) -> DebugMask {
        self.config.debug_mask()
    }

    /// Builds kernel for `smm`.
    ///
    /// `size_of_smm` must be `size_of::<SmmDescriptor>()`, `timeout` is ignored.
    ///
    /// # Panics
    /// Panics if `size_of_smm` does not match descriptor size.
    pub fn create_smm_kernel(
        &self,
        smm: &SmmDescriptor<'_>,
        size_of_smm: usize,
        timeout: Option<Duration>,
    ) -> Result<SmmKernel<B>, SmmError> {
        assert_eq!(
            size_of_smm,
            std::mem::size_of::<SmmDescriptor<'_>>(),
            "SmmDescriptor size mismatch"
        );
        let _ = timeout;
        let mut cache = self.lock();

        let variant =
            if self.config.basic_kernel() { KernelVariant::Basic } else { KernelVariant::Tiled };
        let a = smm.validate(variant)?;
        let (m, n, k) = (smm.m, smm.n, smm.k);
        let tk = round_up(k, TILE_DEPTH);
        let scalars = [
            to_i32("m", m)?,
            to_i32("n", n)?,
            to_i32("k", k)?,
            match variant {
                KernelVariant::Tiled => to_i32("tk", tk)?,
                KernelVariant::Basic => to_i32("lda", smm.lda)?,
            },
            to_i32("ldb", smm.ldb)?,
            to_i32("ldc", smm.ldc)?,
        ];
        // Kernels index B, C and A with these products in 32 bit arithmetic
        check_product("k*ldb", k, smm.ldb)?;
        check_product("m*ldc", m, smm.ldc)?;
        match variant {
            KernelVariant::Tiled => check_product("round_up(m, 16)*tk", round_up(m, 16), tk)?,
            KernelVariant::Basic => check_product("m*lda", m, smm.lda)?,
        }

        let (data, template, args) = match variant {
            KernelVariant::Tiled => {
                let packed = pack_a(a, m, k, smm.lda, smm.alpha)?;
                debug_assert_eq!(packed.cols, tk);
                let args = TemplateArgs::new()
                    .with("beta", smm.beta)
                    .with("k_mod_4", k % 4)
                    .with("m_mod_16", m % 16)
                    .with("subgroups", self.props.has_intel_subgroups);
                (packed.data, &self.templates.tiled, args)
            }
            KernelVariant::Basic => {
                let scaled = scale_a(a, m, k, smm.lda, smm.alpha)?;
                (scaled, &self.templates.basic, TemplateArgs::new().with("beta", smm.beta))
            }
        };
        let a_buf = DeviceBuffer::from_slice(&self.backend, self.context, MemAccess::ReadOnly, &data)?;
        drop(data);

        let program = self.build_program(&mut cache, template, &args)?;
        let kernel = self.backend.create_kernel(program, KERNEL_NAME)?;
        let mut smmk =
            SmmKernel::new(&self.backend, kernel, a_buf, smm.detached(), variant, scalars)?;

        if variant == KernelVariant::Tiled && self.config.autotune() {
            if let Some(queue) = self.queue {
                autotune::tune(
                    &mut smmk,
                    self.context,
                    queue,
                    self.config.bench_iterations(),
                    self.debug(),
                )?;
            }
        }
        if self.debug().dev() {
            println!(
                "Built {variant:?} kernel m={m} n={n} k={k}, global {:?} local {:?}",
                smmk.global_work_size(),
                smmk.local_work_size()
            );
        }
        Ok(smmk)
    }

    /// Same as [`Handle::create_smm_kernel`] without timeout
    pub fn smm_kernel(&self, smm: &SmmDescriptor<'_>) -> Result<SmmKernel<B>, SmmError> {
        self.create_smm_kernel(smm, std::mem::size_of::<SmmDescriptor<'_>>(), None)
    }

    /// Returns cached program or renders and builds a new one
    fn build_program(
        &self,
        cache: &mut ProgramCache<B>,
        template: &str,
        args: &TemplateArgs,
    ) -> Result<B::Program, SmmError> {
        let key = (template.to_owned(), args.canonical());
        if let Some(&program) = cache.programs.get(&key) {
            if self.debug().cache() {
                println!("Program cache hit {}", key.1);
            }
            return Ok(program);
        }
        if self.debug().cache() {
            println!("Program cache miss {}", key.1);
        }
        let source = render(template, args)?;
        if self.debug().source() {
            println!("{source}");
        }
        let program = self
            .backend
            .build_program(self.context, self.device, &source, &self.config.build_options())
            .inspect_err(|e| {
                if self.debug().source() {
                    println!("Failed to build program, {e}");
                }
            })?;
        cache.programs.insert(key, program);
        Ok(program)
    }

    /// Serialized tuning state, currently always empty
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let _guard = self.lock();
        Vec::new()
    }

    /// Restores state produced by [`Handle::serialize`], only empty state is accepted
    pub fn unserialize(&self, state: &[u8]) -> Result<(), SmmError> {
        let _guard = self.lock();
        if state.is_empty() {
            Ok(())
        } else {
            Err(SmmError::InvalidValue("unrecognized handle state".into()))
        }
    }

    /// Number of compiled programs in cache
    #[must_use]
    pub fn cached_programs(&self) -> usize {
        self.lock().programs.len()
    }

    /// Canonical template parameters of cached programs
    #[must_use]
    pub fn cached_program_args(&self) -> Vec<String> {
        self.lock().programs.keys().map(|(_, args)| args.clone()).collect()
    }

    #[must_use]
    pub const fn properties(&self) -> &DeviceProperties {
        &self.props
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Is autotuning possible on this device
    #[must_use]
    pub const fn has_profiling_queue(&self) -> bool {
        self.queue.is_some()
    }
}

fn to_i32(name: &str, x: usize) -> Result<i32, SmmError> {
    i32::try_from(x).map_err(|_| {
        SmmError::InvalidDescriptor(format!("{name}={x} does not fit into 32 bit integer").into())
    })
}

fn check_product(name: &str, x: usize, y: usize) -> Result<(), SmmError> {
    match x.checked_mul(y) {
        Some(p) => to_i32(name, p).map(|_| ()),
        None => Err(SmmError::InvalidDescriptor(format!("{name} overflows").into())),
    }
}

impl<B: Backend> Drop for Handle<B> {
    fn drop(&mut self) {
        let cache = match self.cache.get_mut() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, program) in std::mem::take(&mut cache.programs) {
            self.backend.release_program(program);
        }
        if let Some(queue) = self.queue.take() {
            self.backend.release_queue(queue);
        }
    }
}
