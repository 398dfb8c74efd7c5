use std::sync::Arc;

use ysmm::{
    backend::{Dummy, DummyConfig},
    Config, DType, Handle, Layout, SmmDescriptor, SmmError, Templates, Transpose,
    COLS_PER_THREAD, ROWS_PER_THREAD,
};

fn handle(dummy: &Arc<Dummy>, config: Config) -> Result<Handle<Dummy>, SmmError> {
    Handle::with_config(dummy, dummy.context(), dummy.device(), config, Templates::default())
}

fn quick() -> Config {
    Config { bench_iterations: Some(2), ..Config::default() }
}

#[test]
fn valid_shapes_cover_problem() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig::default());
    let handle = handle(&dummy, quick())?;
    let a = vec![0.5f32; 100 * 80];
    for &(m, n, k, lda) in &[(1, 32, 1, 1), (64, 64, 64, 64), (17, 96, 5, 8), (100, 32, 80, 80)] {
        let smm = SmmDescriptor { lda, ..SmmDescriptor::new(m, n, k, &a) };
        let kernel = handle.smm_kernel(&smm)?;
        let [gx, gy] = kernel.global_work_size();
        let [lx, ly] = kernel.local_work_size();
        assert_eq!(kernel.work_dim(), 2);
        assert!(gx * COLS_PER_THREAD >= n);
        assert!(gy * ROWS_PER_THREAD >= m);
        assert_eq!(gx % lx, 0);
        assert_eq!(gy % ly, 0);
        assert_eq!(kernel.descriptor().a, None);
        assert_eq!(kernel.descriptor().m, m);
    }
    Ok(())
}

#[test]
fn invalid_descriptors_leave_handle_unchanged() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig::default());
    let handle = handle(&dummy, quick())?;
    let a = vec![1f32; 64 * 64];
    let valid = SmmDescriptor::new(64, 64, 64, &a);
    let kernel = handle.smm_kernel(&valid)?;
    let keys = handle.cached_program_args();
    let stats = dummy.stats();

    let invalid = [
        SmmDescriptor { m: 0, ..valid },
        SmmDescriptor { n: 0, ..valid },
        SmmDescriptor { k: 0, ..valid },
        SmmDescriptor { n: 31, ldb: 31, ldc: 31, ..valid },
        SmmDescriptor { n: 48, ..valid },
        SmmDescriptor { beta: 0.5, ..valid },
        SmmDescriptor { dtype: DType::F64, ..valid },
        SmmDescriptor { transpose: Transpose::TT, ..valid },
        SmmDescriptor { layout: Layout::ColMajor, ..valid },
        SmmDescriptor { lda: 32, ..valid },
        SmmDescriptor { ldb: 32, ..valid },
        SmmDescriptor { ldc: 32, ..valid },
        SmmDescriptor { a: None, ..valid },
        SmmDescriptor { a: Some(&a[..64 * 63]), ..valid },
        SmmDescriptor { flags: 4, ..valid },
        SmmDescriptor { m: 3, lda: usize::MAX, ..valid },
        SmmDescriptor { m: 1 << 40, lda: 1 << 40, ..valid },
    ];
    for smm in &invalid {
        let err = handle.smm_kernel(smm).unwrap_err();
        assert!(err.is_invalid_descriptor(), "{smm:?} {err}");
        assert_eq!(err.code(), -30);
        assert_eq!(handle.cached_program_args(), keys);
        assert_eq!(dummy.stats(), stats);
    }
    drop(kernel);
    Ok(())
}

#[test]
#[should_panic(expected = "SmmDescriptor size mismatch")]
fn descriptor_size_is_checked() {
    let dummy = Dummy::new(DummyConfig::default());
    let handle = handle(&dummy, quick()).unwrap();
    let a = vec![1f32; 64 * 64];
    let _ = handle.create_smm_kernel(&SmmDescriptor::new(64, 64, 64, &a), 8, None);
}

#[test]
fn timeout_is_accepted() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig::default());
    let handle = handle(&dummy, quick())?;
    let a = vec![1f32; 32 * 32];
    let smm = SmmDescriptor::new(32, 32, 32, &a);
    let size = std::mem::size_of::<SmmDescriptor<'_>>();
    handle.create_smm_kernel(&smm, size, Some(std::time::Duration::from_millis(1)))?;
    Ok(())
}

#[test]
fn basic_kernel_relaxes_tile_checks() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig::default());
    let handle = handle(&dummy, Config { basic_kernel: Some(true), ..quick() })?;
    let a = vec![1f32; 20 * 7];
    let smm = SmmDescriptor { beta: 0.5, ..SmmDescriptor::new(20, 31, 7, &a) };
    let kernel = handle.smm_kernel(&smm)?;
    assert_eq!(kernel.global_work_size(), [32, 32]);
    assert_eq!(kernel.local_work_size(), [16, 16]);
    assert_eq!(kernel.blocking(), None);
    // Basic kernel is never benchmarked
    assert_eq!(dummy.stats().launches, 0);
    // Other checks still apply
    assert!(handle.smm_kernel(&SmmDescriptor { m: 0, ..smm }).unwrap_err().is_invalid_descriptor());
    Ok(())
}

#[test]
fn strided_offsets_must_fit_int() -> Result<(), SmmError> {
    let dummy = Dummy::new(DummyConfig::default());
    let handle = handle(&dummy, quick())?;
    let a = vec![1f32; 1 << 16];
    let stats = dummy.stats();
    // Every scalar fits 32 bits, k*ldb and m*ldc do not
    let tall_b = SmmDescriptor { ldb: 1 << 16, ..SmmDescriptor::new(1, 32, 1 << 16, &a) };
    let tall_c = SmmDescriptor { ldc: 1 << 16, lda: 1, ..SmmDescriptor::new(1 << 16, 32, 1, &a) };
    for smm in [tall_b, tall_c] {
        let err = handle.smm_kernel(&smm).unwrap_err();
        assert!(err.is_invalid_descriptor(), "{err}");
        assert_eq!(dummy.stats(), stats);
    }
    assert_eq!(handle.cached_programs(), 0);
    Ok(())
}
