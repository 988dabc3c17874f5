//! Core types shared by differential privacy accountants.
//!
//! This crate holds the error type and the neighboring relation; the
//! numerical accounting lives in `dp_accounting`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod relation;

pub use error::{DpError, Result};
pub use relation::NeighboringRelation;

/// Common imports for downstream users.
pub mod prelude {
    pub use crate::{DpError, NeighboringRelation, Result};
}
