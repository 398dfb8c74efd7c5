use std::sync::Arc;

use ysmm::{
    backend::{Dummy, DummyConfig, LaunchCost},
    Blocking, Config, Handle, SmmDescriptor, SmmError, Templates, BLOCKINGS,
};

fn handle(dummy: &Arc<Dummy>, config: Config) -> Result<Handle<Dummy>, SmmError> {
    Handle::with_config(dummy, dummy.context(), dummy.device(), config, Templates::default())
}

fn tuned(cost: LaunchCost, config: Config) -> Result<(Arc<Dummy>, Option<Blocking>), SmmError> {
    let dummy = Dummy::new(DummyConfig { launch_cost: cost, ..DummyConfig::default() });
    let handle = handle(&dummy, config)?;
    let a = vec![1f32; 64 * 64];
    let kernel = handle.smm_kernel(&SmmDescriptor::new(64, 64, 64, &a))?;
    Ok((dummy, kernel.blocking()))
}

fn bench(iterations: usize) -> Config {
    Config { bench_iterations: Some(iterations), ..Config::default() }
}

#[test]
fn fastest_blocking_wins() -> Result<(), SmmError> {
    let cost: LaunchCost = Arc::new(|_, local| Some(if local == [16, 4] { 100 } else { 1000 }));
    let (dummy, blocking) = tuned(cost, bench(3))?;
    assert_eq!(blocking, Some(Blocking::new(2, 4)));
    // Warmup plus three timed launches per candidate
    assert_eq!(dummy.stats().launches, 4 * BLOCKINGS.len());
    // Kernel and handle are gone, scratch buffers and clones were released earlier
    let stats = dummy.stats();
    assert_eq!((stats.buffers_live, stats.kernels_live, stats.events_live), (0, 0, 0));
    assert_eq!((stats.programs_live, stats.queues_live), (0, 0));
    Ok(())
}

#[test]
fn ties_keep_first_candidate() -> Result<(), SmmError> {
    let (_, blocking) = tuned(Arc::new(|_, _| Some(500)), bench(2))?;
    assert_eq!(blocking, Some(BLOCKINGS[0]));
    Ok(())
}

#[test]
fn failed_launches_are_ignored() -> Result<(), SmmError> {
    // Default candidate fails, 4x2 is the fastest of the rest
    let cost: LaunchCost = Arc::new(|_, local| match local {
        [8, 1] => None,
        [32, 2] => Some(10),
        [32, 4] => None,
        _ => Some(50),
    });
    let (_, blocking) = tuned(cost, bench(2))?;
    assert_eq!(blocking, Some(Blocking::new(4, 2)));
    Ok(())
}

#[test]
fn all_failed_keeps_default() -> Result<(), SmmError> {
    let (dummy, blocking) = tuned(Arc::new(|_, _| None), bench(2))?;
    assert_eq!(blocking, Some(BLOCKINGS[0]));
    assert_eq!(dummy.stats().launches, 0);
    assert_eq!(dummy.stats().buffers_live, 0);
    Ok(())
}

#[test]
fn zero_time_never_wins() -> Result<(), SmmError> {
    let cost: LaunchCost = Arc::new(|_, local| Some(if local == [16, 1] { 0 } else { 100 }));
    let (_, blocking) = tuned(cost, bench(2))?;
    assert_eq!(blocking, Some(BLOCKINGS[0]));
    Ok(())
}

#[test]
fn single_iteration_times_one_launch() -> Result<(), SmmError> {
    let cost: LaunchCost = Arc::new(|_, local| Some(if local == [32, 4] { 1 } else { 7 }));
    let (dummy, blocking) = tuned(cost, bench(1))?;
    assert_eq!(blocking, Some(Blocking::new(4, 4)));
    assert_eq!(dummy.stats().launches, 2 * BLOCKINGS.len());
    Ok(())
}

#[test]
fn disabled_autotune_uses_default() -> Result<(), SmmError> {
    let cost: LaunchCost = Arc::new(|_, local| Some(if local == [16, 4] { 100 } else { 1000 }));
    let config = Config { autotune: Some(false), ..bench(2) };
    let (dummy, blocking) = tuned(cost, config)?;
    assert_eq!(blocking, Some(BLOCKINGS[0]));
    assert_eq!(dummy.stats().launches, 0);
    Ok(())
}

#[test]
fn no_profiling_uses_default() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig { profiling: false, ..DummyConfig::default() });
    let handle = handle(&dummy, bench(2))?;
    assert!(!handle.has_profiling_queue());
    let a = vec![1f32; 64 * 64];
    let kernel = handle.smm_kernel(&SmmDescriptor::new(64, 64, 64, &a))?;
    assert_eq!(kernel.blocking(), Some(BLOCKINGS[0]));
    assert_eq!(kernel.local_work_size(), [8, 1]);
    assert_eq!(kernel.global_work_size(), [16, 4]);
    assert_eq!(dummy.stats().launches, 0);
    Ok(())
}

#[test]
fn tuned_geometry_matches_blocking() -> Result<(), SmmError> {
    let cost: LaunchCost = Arc::new(|_, local| Some(if local == [32, 2] { 1 } else { 2 }));
    let dummy = Dummy::new(DummyConfig { launch_cost: cost, ..DummyConfig::default() });
    let handle = handle(&dummy, bench(2))?;
    let a = vec![1f32; 50 * 9];
    let kernel = handle.smm_kernel(&SmmDescriptor::new(50, 96, 9, &a))?;
    assert_eq!(kernel.blocking(), Some(Blocking::new(4, 2)));
    assert_eq!(kernel.local_work_size(), [32, 2]);
    // n = 96 rounded to 128 columns, m = 50 rounded to 64 rows
    assert_eq!(kernel.global_work_size(), [32, 4]);
    Ok(())
}
