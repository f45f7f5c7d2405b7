//! Feature preprocessing
//!
//! Column-wise standardization of feature matrices.

mod scaler;

pub use scaler::{scale_data, StandardScaler};
