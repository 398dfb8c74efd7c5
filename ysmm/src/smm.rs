//! Small matrix multiplication descriptor and its validation

use crate::error::SmmError;

/// Element type of matrices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DType {
    F32 = 1,
    F64 = 2,
}

/// Memory layout of matrices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Layout {
    ColMajor = 1,
    RowMajor = 2,
}

/// Which operands are transposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Transpose {
    NN = 1,
    NT = 2,
    TT = 3,
}

/// Describes `C = alpha·A·B + beta·C` where `A` (m × k) is known when the
/// kernel is built and `B` (k × n) and `C` (m × n) are bound later.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmmDescriptor<'a> {
    pub dtype: DType,
    pub layout: Layout,
    pub transpose: Transpose,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
    pub alpha: f64,
    pub beta: f64,
    /// Host data of `A`, row major with stride `lda`
    pub a: Option<&'a [f32]>,
    /// Reserved, must be zero
    pub flags: u32,
}

impl<'a> SmmDescriptor<'a> {
    /// Row major, non transposed `f32` problem with tight leading dimensions,
    /// `alpha = 1` and `beta = 0`
    #[must_use]
    pub const fn new(m: usize, n: usize, k: usize, a: &'a [f32]) -> Self {
        SmmDescriptor {
            dtype: DType::F32,
            layout: Layout::RowMajor,
            transpose: Transpose::NN,
            m,
            n,
            k,
            lda: k,
            ldb: n,
            ldc: n,
            alpha: 1.0,
            beta: 0.0,
            a: Some(a),
            flags: 0,
        }
    }

    /// Copy of the descriptor which does not borrow `A`
    #[must_use]
    pub const fn detached(&self) -> SmmDescriptor<'static> {
        SmmDescriptor {
            dtype: self.dtype,
            layout: self.layout,
            transpose: self.transpose,
            m: self.m,
            n: self.n,
            k: self.k,
            lda: self.lda,
            ldb: self.ldb,
            ldc: self.ldc,
            alpha: self.alpha,
            beta: self.beta,
            a: None,
            flags: self.flags,
        }
    }

    /// Checks descriptor for the given kernel variant, returns data of `A`.
    ///
    /// Checks run in fixed order and the first failing one is reported.
    pub fn validate(&self, variant: KernelVariant) -> Result<&'a [f32], SmmError> {
        let (m, n, k) = (self.m, self.n, self.k);
        if m == 0 || n == 0 || k == 0 {
            return Err(invalid(format!("dimensions must be positive, got m={m} n={n} k={k}")));
        }
        if self.dtype != DType::F32 {
            return Err(invalid(format!("unsupported dtype {:?}", self.dtype)));
        }
        if self.transpose != Transpose::NN {
            return Err(invalid(format!("unsupported transpose {:?}", self.transpose)));
        }
        if self.layout != Layout::RowMajor {
            return Err(invalid(format!("unsupported layout {:?}", self.layout)));
        }
        if self.lda < k || self.ldb < n || self.ldc < n {
            return Err(invalid(format!(
                "leading dimensions lda={} ldb={} ldc={} too small for m={m} n={n} k={k}",
                self.lda, self.ldb, self.ldc
            )));
        }
        if variant == KernelVariant::Tiled {
            if n % TILE_COLS != 0 {
                return Err(invalid(format!("n={n} is not multiple of {TILE_COLS}")));
            }
            if self.beta != 0.0 {
                return Err(invalid(format!("beta={} is not supported, must be 0", self.beta)));
            }
        }
        let Some(a) = self.a else {
            return Err(invalid("A is missing".into()));
        };
        let Some(needed) = (m - 1).checked_mul(self.lda).and_then(|x| x.checked_add(k)) else {
            return Err(invalid(format!("A with m={m} lda={} is not addressable", self.lda)));
        };
        if a.len() < needed {
            return Err(invalid(format!("A has {} elements, {needed} are addressed", a.len())));
        }
        if self.flags != 0 {
            return Err(invalid(format!("flags must be zero, got {:#x}", self.flags)));
        }
        Ok(a)
    }
}

/// Column tile width of tiled kernel, `n` must be its multiple
pub const TILE_COLS: usize = 32;

/// Kernel shape used for descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelVariant {
    /// One work item per element of C, A stays row major
    Basic,
    /// Register blocked kernel over packed A, autotuned
    Tiled,
}

fn invalid(msg: String) -> SmmError {
    SmmError::InvalidDescriptor(msg.into())
}
