//! Builds tuned kernel on the first `OpenCL` device, checks and times it.
//!
//! `cargo run --example smm -- [m] [n] [k] [iterations]`

use std::time::Instant;

use ysmm::{
    backend::{Backend, DeviceBuffer, MemAccess, OpenCL, OpenCLContext, OpenCLDevice},
    get_support_level, Handle, SmmDescriptor, SmmError,
};

fn main() -> Result<(), SmmError> {
    let args: Vec<usize> = std::env::args().skip(1).filter_map(|x| x.parse().ok()).collect();
    let arg = |i: usize, default: usize| args.get(i).copied().unwrap_or(default);
    let (m, n, k, iterations) = (arg(0, 64), arg(1, 64), arg(2, 64), arg(3, 100));

    let cl = OpenCL::new()?;
    let Some(device) = cl.platforms()?.into_iter().find_map(|p| cl.devices(p).ok()?.first().copied())
    else {
        println!("No OpenCL device found");
        return Ok(());
    };
    println!("ysmm {}, support level {:?}", ysmm::version().string, get_support_level(cl.as_ref(), device));
    let context = cl.create_context(device)?;
    let res = run(&cl, context, device, m, n, k, iterations);
    cl.release_context(context);
    res
}

fn run(
    cl: &std::sync::Arc<OpenCL>,
    context: OpenCLContext,
    device: OpenCLDevice,
    m: usize,
    n: usize,
    k: usize,
    iterations: usize,
) -> Result<(), SmmError> {
    let handle = Handle::new(cl, context, device)?;
    println!("{handle:?}");

    let a: Vec<f32> = (0..m * k).map(|i| (i % 17) as f32 / 17.0).collect();
    let b: Vec<f32> = (0..k * n).map(|i| (i % 11) as f32 / 11.0).collect();
    let smm = SmmDescriptor::new(m, n, k, &a);

    let begin = Instant::now();
    let mut kernel = handle.smm_kernel(&smm)?;
    println!(
        "Kernel built in {:.1} ms, blocking {:?}, global {:?}, local {:?}",
        begin.elapsed().as_secs_f64() * 1e3,
        kernel.blocking(),
        kernel.global_work_size(),
        kernel.local_work_size()
    );

    let b_buf = DeviceBuffer::from_slice(cl, context, MemAccess::ReadOnly, &b)?;
    let c_buf = DeviceBuffer::uninit(cl, context, MemAccess::ReadWrite, m * n)?;
    let queue = cl.create_queue(context, device, false)?;
    kernel.bind(b_buf.raw(), c_buf.raw())?;

    let begin = Instant::now();
    for _ in 0..iterations {
        drop(kernel.enqueue(queue, &[])?);
    }
    cl.finish(queue)?;
    let elapsed = begin.elapsed().as_secs_f64();
    let flops = 2.0 * (m * n * k * iterations) as f64;
    println!(
        "{iterations} launches in {:.3} ms, {:.2} GFLOP/s",
        elapsed * 1e3,
        flops / elapsed / 1e9
    );

    let mut c = vec![0f32; m * n];
    c_buf.read(queue, &mut c)?;
    cl.release_queue(queue);
    let mut max_err = 0f32;
    for i in 0..m {
        for j in 0..n {
            let x: f32 = (0..k).map(|l| a[i * k + l] * b[l * n + j]).sum();
            max_err = max_err.max((x - c[i * n + j]).abs());
        }
    }
    println!("Max abs error {max_err:e}");
    Ok(())
}
