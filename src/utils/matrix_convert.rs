//! Conversions between ndarray and faer containers.
//!
//! Problems and results speak ndarray; the normal equations are assembled and
//! reduced with faer.

use faer::{Col, Mat};
use ndarray::{Array1, Array2};

/// Copy an ndarray matrix into a faer matrix.
pub fn ndarray_to_faer(arr: &Array2<f64>) -> Mat<f64> {
    Mat::from_fn(arr.nrows(), arr.ncols(), |i, j| arr[[i, j]])
}

/// Copy an ndarray vector into a faer column.
pub fn ndarray_vec_to_faer(arr: &Array1<f64>) -> Col<f64> {
    Col::from_fn(arr.len(), |i| arr[i])
}

/// Copy a faer matrix into an ndarray matrix.
pub fn faer_to_ndarray(mat: &Mat<f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

/// Copy a faer column into an ndarray vector.
pub fn faer_vec_to_ndarray(col: &Col<f64>) -> Array1<f64> {
    Array1::from_shape_fn(col.nrows(), |i| col[i])
}
