//! Typed n-dimensional dataset values.
//!
//! KWIK/KWX files hold homogeneous numeric arrays of a handful of element
//! types. [`Dataset`] wraps an `ndarray::ArrayD` of one of those types so that
//! co-indexed datasets of different types can be filtered uniformly along
//! their first (spike) axis.

use ndarray::{Array1, ArrayD, Axis};
use thiserror::Error;

/// Errors raised when a dataset does not have the expected shape or type.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Keep-mask length does not match the number of rows.
    #[error("keep mask has {mask_len} entries but dataset has {rows} rows")]
    RowCountMismatch { rows: usize, mask_len: usize },

    /// Dataset has the wrong number of dimensions.
    #[error("expected a {expected}-dimensional dataset, found shape {shape:?}")]
    Rank { expected: usize, shape: Vec<usize> },

    /// Integer values were required but the dataset is floating point.
    #[error("expected integer values, found {0} dataset")]
    NotInteger(&'static str),

    /// Negative value where an unsigned quantity was required.
    #[error("negative value {value} at row {row}")]
    NegativeValue { row: usize, value: i64 },
}

/// Result type for dataset operations.
pub type Result<T> = std::result::Result<T, DatasetError>;

/// A numeric n-dimensional array of one of the element types used by KWIK.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

/// Evaluate `$body` with `$a` bound to the inner array, whatever its type.
macro_rules! with_array {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            Dataset::U8($a) => $body,
            Dataset::U16($a) => $body,
            Dataset::U32($a) => $body,
            Dataset::U64($a) => $body,
            Dataset::I16($a) => $body,
            Dataset::I32($a) => $body,
            Dataset::I64($a) => $body,
            Dataset::F32($a) => $body,
            Dataset::F64($a) => $body,
        }
    };
}

/// Like `with_array!`, but rewraps the resulting array in the same variant.
macro_rules! map_array {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            Dataset::U8($a) => Dataset::U8($body),
            Dataset::U16($a) => Dataset::U16($body),
            Dataset::U32($a) => Dataset::U32($body),
            Dataset::U64($a) => Dataset::U64($body),
            Dataset::I16($a) => Dataset::I16($body),
            Dataset::I32($a) => Dataset::I32($body),
            Dataset::I64($a) => Dataset::I64($body),
            Dataset::F32($a) => Dataset::F32($body),
            Dataset::F64($a) => Dataset::F64($body),
        }
    };
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<ArrayD<$ty>> for Dataset {
                fn from(array: ArrayD<$ty>) -> Self {
                    Dataset::$variant(array)
                }
            }

            impl From<Vec<$ty>> for Dataset {
                fn from(values: Vec<$ty>) -> Self {
                    Dataset::$variant(Array1::from(values).into_dyn())
                }
            }
        )*
    };
}

impl_from!(
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
);

impl Dataset {
    /// Name of the element type, as used in error messages.
    pub fn dtype_name(&self) -> &'static str {
        match self {
            Dataset::U8(_) => "u8",
            Dataset::U16(_) => "u16",
            Dataset::U32(_) => "u32",
            Dataset::U64(_) => "u64",
            Dataset::I16(_) => "i16",
            Dataset::I32(_) => "i32",
            Dataset::I64(_) => "i64",
            Dataset::F32(_) => "f32",
            Dataset::F64(_) => "f64",
        }
    }

    /// Returns true for floating-point element types.
    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, Dataset::F32(_) | Dataset::F64(_))
    }

    /// Shape of the underlying array.
    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    /// Number of dimensions.
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Length of the first axis (the spike axis for co-indexed datasets).
    #[inline]
    pub fn rows(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    /// Keep only the rows whose entry in `keep` is true.
    ///
    /// The element type and trailing dimensions are preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset is zero-dimensional or if `keep` does
    /// not have one entry per row.
    pub fn select_rows(&self, keep: &[bool]) -> Result<Dataset> {
        if self.ndim() == 0 {
            return Err(DatasetError::Rank {
                expected: 1,
                shape: self.shape().to_vec(),
            });
        }
        if self.rows() != keep.len() {
            return Err(DatasetError::RowCountMismatch {
                rows: self.rows(),
                mask_len: keep.len(),
            });
        }

        let indices: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect();

        Ok(map_array!(self, a => a.select(Axis(0), &indices)))
    }

    /// Convert a one-dimensional integer dataset into `u64` values.
    pub fn to_u64_vec(&self) -> Result<Vec<u64>> {
        if self.ndim() != 1 {
            return Err(DatasetError::Rank {
                expected: 1,
                shape: self.shape().to_vec(),
            });
        }

        fn signed<T: Copy + Into<i64>>(a: &ArrayD<T>) -> Result<Vec<u64>> {
            a.iter()
                .enumerate()
                .map(|(row, &v)| {
                    let value: i64 = v.into();
                    u64::try_from(value).map_err(|_| DatasetError::NegativeValue { row, value })
                })
                .collect()
        }

        match self {
            Dataset::U8(a) => Ok(a.iter().map(|&v| u64::from(v)).collect()),
            Dataset::U16(a) => Ok(a.iter().map(|&v| u64::from(v)).collect()),
            Dataset::U32(a) => Ok(a.iter().map(|&v| u64::from(v)).collect()),
            Dataset::U64(a) => Ok(a.iter().copied().collect()),
            Dataset::I16(a) => signed(a),
            Dataset::I32(a) => signed(a),
            Dataset::I64(a) => signed(a),
            Dataset::F32(_) | Dataset::F64(_) => Err(DatasetError::NotInteger(self.dtype_name())),
        }
    }

    /// Convert to `f32`, whatever the element type.
    pub fn to_f32(&self) -> ArrayD<f32> {
        with_array!(self, a => a.mapv(|v| v as f32))
    }

    /// Convert to `f64`, whatever the element type.
    pub fn to_f64(&self) -> ArrayD<f64> {
        with_array!(self, a => a.mapv(|v| v as f64))
    }
}
