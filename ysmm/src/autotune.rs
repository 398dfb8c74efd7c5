//! Empirical search of tiled kernel launch geometry

use rand::{distributions::Uniform, Rng, SeedableRng};

use crate::{
    backend::{Backend, DeviceBuffer, MemAccess},
    config::DebugMask,
    error::SmmError,
    kernel::{Blocking, SmmKernel},
};

/// Candidate blockings, the first one is used when nothing is measured
pub const BLOCKINGS: [Blocking; 7] = [
    Blocking::new(1, 1),
    Blocking::new(2, 1),
    Blocking::new(1, 2),
    Blocking::new(2, 2),
    Blocking::new(2, 4),
    Blocking::new(4, 2),
    Blocking::new(4, 4),
];

/// Result of tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub blocking: Blocking,
    /// Device time of benchmark run in seconds, `None` if no run succeeded
    pub seconds: Option<f64>,
}

/// Keeps the fastest of offered candidates.
///
/// The first candidate is best until a later one has strictly positive time
/// lower than current best, or current best has no valid time.
/// Failed or nonpositive measurements never replace anything.
#[derive(Debug, Default)]
pub struct Selector {
    best: Option<Tuning>,
}

impl Selector {
    #[must_use]
    pub const fn new() -> Self {
        Selector { best: None }
    }

    pub fn offer(&mut self, blocking: Blocking, seconds: Option<f64>) {
        let seconds = seconds.filter(|&dt| dt > 0.0);
        let replace = match self.best {
            None => true,
            Some(Tuning { seconds: None, .. }) => seconds.is_some(),
            Some(Tuning { seconds: Some(best), .. }) => seconds.is_some_and(|dt| dt < best),
        };
        if replace {
            self.best = Some(Tuning { blocking, seconds });
        }
    }

    #[must_use]
    pub const fn best(&self) -> Option<Tuning> {
        self.best
    }
}

/// Uniformly random values in `[0.1, 1.0)`, identical for every call
pub(crate) fn scratch_data(len: usize) -> Result<Vec<f32>, SmmError> {
    let mut rng = rand::rngs::SmallRng::seed_from_u64(420_694_206_942_069);
    let dist = Uniform::new(0.1f32, 1.0);
    let mut data = Vec::new();
    data.try_reserve_exact(len)?;
    data.extend((0..len).map(|_| rng.sample(dist)));
    Ok(data)
}

/// Device time in seconds of `nbench` launches of clone of `smmk` with `blocking`.
///
/// The first launch is a warmup, timing spans from start of the second launch
/// to the end of the last one.
pub(crate) fn benchmark<B: Backend>(
    smmk: &SmmKernel<B>,
    blocking: Blocking,
    context: B::Context,
    queue: B::Queue,
    scratch: &[f32],
    nbench: usize,
) -> Result<f64, SmmError> {
    let smm = smmk.descriptor();
    let backend = smmk.backend();
    let b = DeviceBuffer::from_slice(backend, context, MemAccess::ReadOnly, &scratch[..smm.k * smm.ldb])?;
    let c = DeviceBuffer::from_slice(backend, context, MemAccess::ReadWrite, &scratch[..smm.m * smm.ldc])?;
    let mut clone = smmk.try_clone()?;
    clone.set_blocking(blocking);
    clone.bind(b.raw(), c.raw())?;

    let nbench = nbench.max(1);
    let mut start = None;
    let mut end = None;
    let mut launched = Ok(());
    for i in 0..=nbench {
        match clone.launch(queue, &[], i == 1 || i == nbench) {
            Ok(event) if i == 1 => start = event,
            Ok(event) if i == nbench => end = event,
            Ok(_) => {}
            Err(e) => {
                launched = Err(e);
                break;
            }
        }
    }
    // Scratch buffers must not be freed while launches are pending
    backend.finish(queue)?;
    launched?;

    let Some(start) = start else {
        return Err(SmmError::InvalidValue("benchmark produced no start event".into()));
    };
    Ok(end.as_ref().unwrap_or(&start).elapsed_since(&start)?)
}

/// Benchmarks every candidate blocking and commits the fastest one to `smmk`
pub(crate) fn tune<B: Backend>(
    smmk: &mut SmmKernel<B>,
    context: B::Context,
    queue: B::Queue,
    nbench: usize,
    debug: DebugMask,
) -> Result<Tuning, SmmError> {
    let smm = smmk.descriptor();
    let scratch = scratch_data((smm.k * smm.ldb).max(smm.m * smm.ldc))?;
    let mut selector = Selector::new();
    for blocking in BLOCKINGS {
        let seconds = match benchmark(smmk, blocking, context, queue, &scratch, nbench) {
            Ok(dt) => Some(dt),
            Err(SmmError::OutOfHostMemory) => return Err(SmmError::OutOfHostMemory),
            Err(e) => {
                if debug.tune() {
                    println!("Benchmark of {blocking:?} failed, {e}");
                }
                None
            }
        };
        if debug.tune() {
            if let Some(dt) = seconds {
                println!("Blocking {}x{} took {:.3} us", blocking.cols, blocking.rows, dt * 1e6);
            }
        }
        selector.offer(blocking, seconds);
    }
    let tuning = selector.best().unwrap_or(Tuning { blocking: BLOCKINGS[0], seconds: None });
    if debug.tune() {
        println!("Selected {:?}", tuning);
    }
    smmk.set_blocking(tuning.blocking);
    Ok(tuning)
}

#[cfg(test)]
mod tests {
    use super::{scratch_data, Selector, BLOCKINGS};

    #[test]
    fn first_candidate_is_default() {
        let mut s = Selector::new();
        s.offer(BLOCKINGS[0], Some(2.0));
        s.offer(BLOCKINGS[1], Some(3.0));
        s.offer(BLOCKINGS[2], Some(2.0));
        assert_eq!(s.best().unwrap().blocking, BLOCKINGS[0]);
    }

    #[test]
    fn faster_replaces() {
        let mut s = Selector::new();
        s.offer(BLOCKINGS[0], Some(2.0));
        s.offer(BLOCKINGS[1], Some(1.0));
        s.offer(BLOCKINGS[2], Some(1.5));
        let best = s.best().unwrap();
        assert_eq!(best.blocking, BLOCKINGS[1]);
        assert_eq!(best.seconds, Some(1.0));
    }

    #[test]
    fn invalid_never_replaces_valid() {
        let mut s = Selector::new();
        s.offer(BLOCKINGS[0], Some(2.0));
        s.offer(BLOCKINGS[1], None);
        s.offer(BLOCKINGS[2], Some(0.0));
        s.offer(BLOCKINGS[3], Some(-1.0));
        assert_eq!(s.best().unwrap().blocking, BLOCKINGS[0]);
    }

    #[test]
    fn failed_first_is_replaced() {
        let mut s = Selector::new();
        s.offer(BLOCKINGS[0], None);
        s.offer(BLOCKINGS[1], None);
        assert_eq!(s.best().unwrap().blocking, BLOCKINGS[0]);
        s.offer(BLOCKINGS[2], Some(5.0));
        s.offer(BLOCKINGS[3], Some(4.0));
        assert_eq!(s.best().unwrap().blocking, BLOCKINGS[3]);
    }

    #[test]
    fn scratch_range() {
        let data = scratch_data(1000).unwrap();
        assert_eq!(data.len(), 1000);
        assert!(data.iter().all(|&x| (0.1..1.0).contains(&x)));
        assert_eq!(data, scratch_data(1000).unwrap());
    }
}
