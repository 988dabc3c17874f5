//! Rényi differential privacy accounting.
//!
//! Describe what a computation did as a [`DpEvent`] tree, compose it into an
//! [`RdpAccountant`], and query the resulting (epsilon, delta) guarantee.
//!
//! ```
//! use dp_accounting::prelude::*;
//!
//! let mut accountant = RdpAccountant::new();
//! let step = DpEvent::poisson_sampled(0.01, DpEvent::gaussian(1.0));
//! assert!(accountant.compose(&step, 1000).unwrap());
//! let epsilon = accountant.get_epsilon(1e-5).unwrap();
//! assert!(epsilon.is_finite());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accountants;
pub mod conversion;
pub mod event;
pub mod forward_diff;
pub mod log_math;
pub mod mechanisms;
pub mod rdp;
pub mod special;

pub use accountants::{DpAccountantConfig, PrivacyAccountant, RdpAccountantConfig};
pub use conversion::{
    compute_delta, compute_delta_and_optimal_order, compute_epsilon,
    compute_epsilon_and_optimal_order,
};
pub use dp_accounting_core::{DpError, NeighboringRelation, Result};
pub use event::{dpsgd_event, fixed_batch_dpsgd_event, DpEvent};
pub use mechanisms::{
    rdp_poisson_subsampled_gaussian, rdp_sample_wor_gaussian, rdp_single_epoch_tree_aggregation,
};
pub use rdp::{default_orders, effective_gaussian_noise_multiplier, RdpAccountant};

/// Common imports for privacy accounting.
pub mod prelude {
    pub use crate::{
        compute_delta, compute_epsilon, default_orders, dpsgd_event, fixed_batch_dpsgd_event,
        DpAccountantConfig, DpError, DpEvent, NeighboringRelation, PrivacyAccountant,
        RdpAccountant, RdpAccountantConfig, Result,
    };
}
