//! # ysmm
//!
//! Autotuned `OpenCL` kernels for small matrix multiplications
//! `C = alpha·A·B + beta·C` where `A` is known ahead of time.
//!
//! A [`Handle`] is bound to one device. Given [`SmmDescriptor`] it validates
//! the problem, packs `A` into device friendly layout, renders and compiles
//! kernel source (compiled programs are cached per handle) and benchmarks
//! candidate launch geometries. The resulting [`SmmKernel`] is then bound to
//! `B` and `C` buffers and enqueued as many times as needed.
//!
//! ```no_run
//! use ysmm::{backend::OpenCL, Handle, SmmDescriptor};
//!
//! let cl = OpenCL::new()?;
//! let platform = cl.platforms()?[0];
//! let device = cl.devices(platform)?[0];
//! let context = cl.create_context(device)?;
//! let handle = Handle::new(&cl, context, device)?;
//! let a = vec![1f32; 64 * 64];
//! let kernel = handle.smm_kernel(&SmmDescriptor::new(64, 64, 64, &a))?;
//! println!("{:?}", kernel.global_work_size());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Behavior is configured by `ysmm/config.json` in XDG config directories
//! and by environment variables `YSMM_DEBUG` and `YSMM_BENCH`, see [`Config`].

#![forbid(rustdoc::broken_intra_doc_links)]
#![forbid(rustdoc::private_intra_doc_links)]
#![forbid(rustdoc::invalid_codeblock_attributes)]

mod autotune;
pub mod backend;
mod config;
mod device;
mod error;
mod handle;
mod kernel;
mod pack;
mod smm;
mod template;

pub use autotune::{Selector, Tuning, BLOCKINGS};
pub use config::{Config, DebugMask};
pub use device::{get_support_level, DeviceProperties, Platform, SupportLevel};
pub use error::{BackendError, ErrorStatus, SmmError};
pub use handle::Handle;
pub use kernel::{Blocking, SmmKernel, BASIC_GROUP, COLS_PER_THREAD, ROWS_PER_THREAD, SUBGROUP_SIZE};
pub use pack::{pack_a, round_up, scale_a, tile_matrix, PackedMatrix, TILE_DEPTH, TILE_ROWS};
pub use smm::{DType, KernelVariant, Layout, SmmDescriptor, Transpose, TILE_COLS};
pub use template::{render, TemplateArgs, TemplateValue, Templates};

/// Version of the library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub string: &'static str,
}

const fn parse_u32(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut x = 0;
    while i < bytes.len() {
        x = x * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    x
}

/// Version of the library
#[must_use]
pub const fn version() -> Version {
    Version {
        major: parse_u32(env!("CARGO_PKG_VERSION_MAJOR")),
        minor: parse_u32(env!("CARGO_PKG_VERSION_MINOR")),
        patch: parse_u32(env!("CARGO_PKG_VERSION_PATCH")),
        string: env!("CARGO_PKG_VERSION"),
    }
}

#[test]
fn version_matches_manifest() {
    let v = version();
    assert_eq!(format!("{}.{}.{}", v.major, v.minor, v.patch), v.string);
}
