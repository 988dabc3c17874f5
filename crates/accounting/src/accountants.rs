//! Accountant interface and configuration types.

use dp_accounting_core::{DpError, NeighboringRelation, Result};

use crate::event::DpEvent;
use crate::rdp::{default_orders, RdpAccountant};

/// Capability set shared by privacy accounting strategies.
///
/// Composition is validate-then-commit: an event that is not supported must
/// leave the accountant unchanged.
pub trait PrivacyAccountant {
    /// Neighboring relation the guarantees are stated with respect to.
    fn neighboring_relation(&self) -> NeighboringRelation;

    /// Whether `event` can be composed, without changing any state.
    fn supports(&self, event: &DpEvent) -> bool;

    /// Compose `event` `count` times into the accumulated guarantee.
    ///
    /// Returns `Ok(false)` without mutation when the event is unsupported.
    /// Errors report invalid event parameters; state is unchanged then too.
    fn compose(&mut self, event: &DpEvent, count: u64) -> Result<bool>;

    /// Smallest epsilon certified at `target_delta`.
    fn get_epsilon(&self, target_delta: f64) -> Result<f64>;

    /// Smallest delta certified at `target_epsilon`.
    fn get_delta(&self, target_epsilon: f64) -> Result<f64>;

    /// Like [`PrivacyAccountant::compose`], but an unsupported event is an
    /// error.
    fn compose_or_err(&mut self, event: &DpEvent, count: u64) -> Result<()> {
        if self.compose(event, count)? {
            Ok(())
        } else {
            Err(DpError::unsupported(format!(
                "{event} cannot be accounted under {}",
                self.neighboring_relation()
            )))
        }
    }
}

/// Configuration for constructing a privacy accountant with a fresh state.
pub trait DpAccountantConfig {
    /// Accountant type created by this config.
    type Accountant;

    /// Create a new accountant instance.
    fn create_accountant(&self) -> Self::Accountant;
}

/// Configuration for the RDP accountant.
#[derive(Clone, Debug, PartialEq)]
pub struct RdpAccountantConfig {
    /// Rényi orders to evaluate.
    pub orders: Vec<f64>,
    /// Neighboring relation to analyze.
    pub neighboring_relation: NeighboringRelation,
}

impl Default for RdpAccountantConfig {
    fn default() -> Self {
        Self {
            orders: default_orders(),
            neighboring_relation: NeighboringRelation::AddOrRemoveOne,
        }
    }
}

impl RdpAccountantConfig {
    /// Create a config with explicit orders.
    pub fn new(orders: Vec<f64>) -> Self {
        Self {
            orders,
            ..Self::default()
        }
    }

    /// Set the neighboring relation for the accountant.
    pub fn with_neighboring_relation(mut self, neighboring_relation: NeighboringRelation) -> Self {
        self.neighboring_relation = neighboring_relation;
        self
    }

    /// Create an accountant, rejecting invalid orders.
    pub fn try_create_accountant(&self) -> Result<RdpAccountant> {
        RdpAccountant::with_params(self.orders.clone(), self.neighboring_relation)
    }
}

impl DpAccountantConfig for RdpAccountantConfig {
    type Accountant = RdpAccountant;

    fn create_accountant(&self) -> Self::Accountant {
        self.try_create_accountant().unwrap_or_else(|err| {
            log::warn!("{err}; falling back to the default orders");
            RdpAccountant::for_relation(self.neighboring_relation)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rdp_config_creates_finite_accountant() {
        let cfg = RdpAccountantConfig::default();
        let mut acc = cfg.create_accountant();
        let event = DpEvent::poisson_sampled(0.01, DpEvent::gaussian(1.0));
        assert!(acc.compose(&event, 1).unwrap());
        assert!(acc.get_epsilon(1e-5).unwrap().is_finite());
    }

    #[test]
    fn rdp_config_carries_relation() {
        let cfg = RdpAccountantConfig::new(vec![2.0, 4.0])
            .with_neighboring_relation(NeighboringRelation::ReplaceOne);
        let acc = cfg.try_create_accountant().unwrap();
        assert_eq!(acc.orders(), &[2.0, 4.0]);
        assert_eq!(acc.neighboring_relation(), NeighboringRelation::ReplaceOne);
    }

    #[test]
    fn invalid_orders_fall_back_to_defaults() {
        let cfg = RdpAccountantConfig::new(vec![0.5])
            .with_neighboring_relation(NeighboringRelation::ReplaceSpecial);
        assert!(cfg.try_create_accountant().is_err());
        let acc = cfg.create_accountant();
        assert_eq!(acc.orders(), default_orders().as_slice());
        assert_eq!(acc.neighboring_relation(), NeighboringRelation::ReplaceSpecial);
    }

    #[test]
    fn compose_or_err_reports_unsupported() {
        let mut acc = RdpAccountant::new();
        let event = DpEvent::sampled_without_replacement(100, 10, DpEvent::gaussian(1.0));
        let err = acc.compose_or_err(&event, 1).unwrap_err();
        assert!(matches!(err, DpError::UnsupportedFeature { .. }));
        assert!(acc.rdp().iter().all(|&r| r == 0.0));
    }
}
