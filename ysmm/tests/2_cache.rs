use std::sync::Arc;

use ysmm::{
    backend::{Backend, DeviceBuffer, Dummy, DummyConfig, MemAccess},
    Config, Handle, SmmDescriptor, SmmError, Templates,
};

fn handle(dummy: &Arc<Dummy>, config: Config) -> Result<Handle<Dummy>, SmmError> {
    Handle::with_config(dummy, dummy.context(), dummy.device(), config, Templates::default())
}

fn quick() -> Config {
    Config { bench_iterations: Some(2), ..Config::default() }
}

#[test]
fn same_parameters_reuse_program() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig::default());
    let handle = handle(&dummy, quick())?;
    let a = vec![1f32; 64 * 64];
    let k1 = handle.smm_kernel(&SmmDescriptor::new(64, 64, 64, &a))?;
    let k2 = handle.smm_kernel(&SmmDescriptor::new(32, 96, 16, &a))?;
    let k3 = handle.smm_kernel(&SmmDescriptor::new(64, 64, 64, &a))?;
    assert_eq!(handle.cached_programs(), 1);
    assert_eq!(dummy.stats().programs_built, 1);
    assert_eq!(handle.cached_program_args(), ["beta=0.0;k_mod_4=0;m_mod_16=0;subgroups=0;"]);
    // Every kernel owns its own packed A
    assert_ne!(k1.a_buffer().raw(), k3.a_buffer().raw());
    assert_eq!(dummy.stats().buffers_live, 3);
    assert_eq!(dummy.stats().kernels_live, 3);
    drop((k1, k2, k3));
    assert_eq!(dummy.stats().buffers_live, 0);
    assert_eq!(dummy.stats().kernels_live, 0);
    Ok(())
}

#[test]
fn remainders_select_program() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig::default());
    let handle = handle(&dummy, quick())?;
    let a = vec![1f32; 64 * 64];
    handle.smm_kernel(&SmmDescriptor::new(64, 64, 64, &a))?;
    handle.smm_kernel(&SmmDescriptor::new(64, 64, 63, &a))?;
    assert_eq!(handle.cached_programs(), 2);
    handle.smm_kernel(&SmmDescriptor::new(50, 64, 63, &a))?;
    assert_eq!(handle.cached_programs(), 3);
    // Same remainders as the previous one
    handle.smm_kernel(&SmmDescriptor::new(18, 32, 7, &a))?;
    assert_eq!(handle.cached_programs(), 3);
    assert_eq!(dummy.stats().programs_built, 3);

    let sources = dummy.program_sources();
    let tail = "for (; kk < k; kk++)";
    assert!(!sources[0].contains(tail) && !sources[0].contains("min("));
    assert!(sources[1].contains(tail) && !sources[1].contains("min("));
    assert!(sources[2].contains(tail) && sources[2].contains("min("));
    Ok(())
}

#[test]
fn subgroups_are_part_of_program() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig {
        device_extensions: "cl_khr_fp64 cl_intel_subgroups cl_intel_required_subgroup_size".into(),
        ..DummyConfig::default()
    });
    let handle = handle(&dummy, quick())?;
    let a = vec![1f32; 64 * 64];
    handle.smm_kernel(&SmmDescriptor::new(64, 64, 64, &a))?;
    assert_eq!(handle.cached_program_args(), ["beta=0.0;k_mod_4=0;m_mod_16=0;subgroups=1;"]);
    assert!(dummy.program_sources()[0].contains("intel_reqd_sub_group_size(8)"));

    let dummy = Dummy::new(DummyConfig::default());
    let handle = self::handle(&dummy, quick())?;
    handle.smm_kernel(&SmmDescriptor::new(64, 64, 64, &a))?;
    assert!(!dummy.program_sources()[0].contains("intel_reqd_sub_group_size"));
    Ok(())
}

#[test]
fn failed_build_is_not_cached() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig::default());
    let templates = Templates { tiled: "void mm() {}".into(), ..Templates::default() };
    let handle = Handle::with_config(&dummy, dummy.context(), dummy.device(), quick(), templates)?;
    let a = vec![1f32; 64 * 64];
    let smm = SmmDescriptor::new(64, 64, 64, &a);
    for _ in 0..2 {
        let err = handle.smm_kernel(&smm).unwrap_err();
        assert_eq!(err.code(), -11);
        assert!(!err.is_invalid_descriptor());
        assert_eq!(handle.cached_programs(), 0);
        let stats = dummy.stats();
        assert_eq!((stats.buffers_live, stats.kernels_live, stats.programs_live), (0, 0, 0));
    }
    Ok(())
}

#[test]
fn malformed_template_fails_like_build() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig::default());
    let templates = Templates { tiled: "__kernel void mm() { {{ missing }} }".into(), ..Templates::default() };
    let handle = Handle::with_config(&dummy, dummy.context(), dummy.device(), quick(), templates)?;
    let a = vec![1f32; 64 * 64];
    let err = handle.smm_kernel(&SmmDescriptor::new(64, 64, 64, &a)).unwrap_err();
    assert_eq!(err.code(), -11);
    assert_eq!(dummy.stats().programs_built, 0);
    assert_eq!(dummy.stats().buffers_live, 0);
    Ok(())
}

#[test]
fn missing_kernel_function() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig::default());
    let templates = Templates { tiled: "__kernel void other(int x) {}".into(), ..Templates::default() };
    let handle = Handle::with_config(&dummy, dummy.context(), dummy.device(), quick(), templates)?;
    let a = vec![1f32; 64 * 64];
    let err = handle.smm_kernel(&SmmDescriptor::new(64, 64, 64, &a)).unwrap_err();
    assert_eq!(err.code(), -46);
    // Program itself compiled fine and stays cached
    assert_eq!(handle.cached_programs(), 1);
    assert_eq!(dummy.stats().buffers_live, 0);
    assert_eq!(dummy.stats().kernels_live, 0);
    Ok(())
}

#[test]
fn kernels_outlive_handle() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig::default());
    let a = vec![1f32; 64 * 64];
    let mut kernel = {
        let handle = handle(&dummy, quick())?;
        let kernel = handle.smm_kernel(&SmmDescriptor::new(64, 64, 64, &a))?;
        kernel
    };
    let stats = dummy.stats();
    assert_eq!((stats.programs_live, stats.queues_live), (0, 0));
    assert_eq!(stats.kernels_live, 1);

    let queue = dummy.create_queue(dummy.context(), dummy.device(), false)?;
    let b = DeviceBuffer::from_slice(&dummy, dummy.context(), MemAccess::ReadOnly, &a)?;
    let c = DeviceBuffer::uninit(&dummy, dummy.context(), MemAccess::ReadWrite, 64 * 64)?;
    kernel.bind(b.raw(), c.raw())?;
    kernel.enqueue(queue, &[])?.wait()?;
    dummy.release_queue(queue);
    Ok(())
}
