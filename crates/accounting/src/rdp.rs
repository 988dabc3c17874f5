//! Rényi Differential Privacy accounting.

use dp_accounting_core::{DpError, NeighboringRelation, Result};

use crate::accountants::PrivacyAccountant;
use crate::conversion::{compute_delta_and_optimal_order, compute_epsilon_and_optimal_order};
use crate::event::DpEvent;
use crate::mechanisms::{
    rdp_poisson_subsampled_gaussian, rdp_sample_wor_gaussian, rdp_single_epoch_tree_aggregation,
};

/// RDP accountant for privacy composition.
///
/// Holds a fixed grid of orders and the RDP accumulated at each of them.
/// Composition only ever adds to the accumulated curve.
#[derive(Clone, Debug)]
pub struct RdpAccountant {
    orders: Vec<f64>,
    rdp: Vec<f64>,
    neighboring_relation: NeighboringRelation,
}

impl Default for RdpAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl RdpAccountant {
    /// Create an accountant with default Rényi orders under add-or-remove-one.
    pub fn new() -> Self {
        Self::for_relation(NeighboringRelation::AddOrRemoveOne)
    }

    /// Create an accountant with default Rényi orders under `relation`.
    pub fn for_relation(neighboring_relation: NeighboringRelation) -> Self {
        let orders = default_orders();
        let rdp = vec![0.0; orders.len()];
        Self {
            orders,
            rdp,
            neighboring_relation,
        }
    }

    /// Create an accountant with custom orders under add-or-remove-one.
    pub fn with_orders(orders: Vec<f64>) -> Result<Self> {
        Self::with_params(orders, NeighboringRelation::AddOrRemoveOne)
    }

    /// Create an accountant with custom orders and neighboring relation.
    ///
    /// Orders must be non-empty and each at least 1. Subsampled events are
    /// only defined above order 1 and fail to compose on a grid holding it.
    pub fn with_params(
        orders: Vec<f64>,
        neighboring_relation: NeighboringRelation,
    ) -> Result<Self> {
        if orders.is_empty() {
            return Err(DpError::invalid("at least one Rényi order is required"));
        }
        if let Some(bad) = orders.iter().find(|&&a| a.is_nan() || a < 1.0) {
            return Err(DpError::invalid(format!(
                "Rényi orders must be at least 1, got {bad}"
            )));
        }
        let rdp = vec![0.0; orders.len()];
        Ok(Self {
            orders,
            rdp,
            neighboring_relation,
        })
    }

    /// Orders the accountant evaluates.
    pub fn orders(&self) -> &[f64] {
        &self.orders
    }

    /// Accumulated RDP, one value per order.
    pub fn rdp(&self) -> &[f64] {
        &self.rdp
    }

    /// Epsilon at `target_delta` and the order attaining it.
    pub fn get_epsilon_and_optimal_order(&self, target_delta: f64) -> Result<(f64, Option<f64>)> {
        let (epsilon, order) =
            compute_epsilon_and_optimal_order(&self.orders, &self.rdp, target_delta)?;
        log::debug!("epsilon {epsilon} at delta {target_delta} (order {order:?})");
        Ok((epsilon, order))
    }

    /// Delta at `target_epsilon` and the order attaining it.
    pub fn get_delta_and_optimal_order(&self, target_epsilon: f64) -> Result<(f64, Option<f64>)> {
        let (delta, order) =
            compute_delta_and_optimal_order(&self.orders, &self.rdp, target_epsilon)?;
        log::debug!("delta {delta} at epsilon {target_epsilon} (order {order:?})");
        Ok((delta, order))
    }

    /// Whether `event` is supported under the configured relation.
    fn check(&self, event: &DpEvent) -> bool {
        match event {
            DpEvent::NoOp | DpEvent::NonPrivate | DpEvent::Gaussian { .. } => true,
            DpEvent::SelfComposed { event, .. } => self.check(event),
            DpEvent::Composed { events } => events.iter().all(|e| self.check(e)),
            DpEvent::PoissonSampled { event, .. } => {
                self.neighboring_relation == NeighboringRelation::AddOrRemoveOne
                    && effective_gaussian_noise_multiplier(event).is_some()
            }
            DpEvent::SampledWithoutReplacement { event, .. } => {
                self.neighboring_relation == NeighboringRelation::ReplaceOne
                    && effective_gaussian_noise_multiplier(event).is_some()
            }
            DpEvent::SingleEpochTreeAggregation { .. } => {
                self.neighboring_relation == NeighboringRelation::ReplaceSpecial
            }
            DpEvent::Laplace { .. }
            | DpEvent::SampledWithReplacement { .. }
            | DpEvent::Unsupported => false,
        }
    }

    /// Adds the RDP of `count` repetitions of a supported `event` into `out`.
    fn accumulate(&self, event: &DpEvent, count: u64, out: &mut [f64]) -> Result<()> {
        match event {
            DpEvent::NoOp => Ok(()),
            DpEvent::NonPrivate => {
                if count > 0 {
                    out.fill(f64::INFINITY);
                }
                Ok(())
            }
            DpEvent::SelfComposed { event, count: inner } => {
                let total = count.checked_mul(*inner).ok_or_else(|| {
                    DpError::invalid(format!(
                        "composition count overflows: {count} x {inner} in {event}"
                    ))
                })?;
                self.accumulate(event, total, out)
            }
            DpEvent::Composed { events } => events
                .iter()
                .try_for_each(|e| self.accumulate(e, count, out)),
            DpEvent::Gaussian { noise_multiplier } => {
                let rdp = rdp_poisson_subsampled_gaussian(1.0, *noise_multiplier, &self.orders)?;
                add_scaled(out, count, &rdp);
                Ok(())
            }
            DpEvent::PoissonSampled {
                sampling_probability,
                event,
            } => {
                let sigma = reduced_noise_multiplier(event)?;
                let rdp =
                    rdp_poisson_subsampled_gaussian(*sampling_probability, sigma, &self.orders)?;
                add_scaled(out, count, &rdp);
                Ok(())
            }
            DpEvent::SampledWithoutReplacement {
                source_dataset_size,
                sample_size,
                event,
            } => {
                if *source_dataset_size <= 0 || !(0..=*source_dataset_size).contains(sample_size) {
                    return Err(DpError::invalid(format!(
                        "sample size must be in [0, source dataset size], got {sample_size} of {source_dataset_size}"
                    )));
                }
                let q = *sample_size as f64 / *source_dataset_size as f64;
                let sigma = reduced_noise_multiplier(event)?;
                let rdp = rdp_sample_wor_gaussian(q, sigma, &self.orders)?;
                add_scaled(out, count, &rdp);
                Ok(())
            }
            DpEvent::SingleEpochTreeAggregation {
                noise_multiplier,
                step_counts,
            } => {
                let rdp =
                    rdp_single_epoch_tree_aggregation(*noise_multiplier, step_counts, &self.orders)?;
                add_scaled(out, count, &rdp);
                Ok(())
            }
            DpEvent::Laplace { .. }
            | DpEvent::SampledWithReplacement { .. }
            | DpEvent::Unsupported => Err(DpError::unsupported(format!(
                "{event} is not supported by RDP accounting"
            ))),
        }
    }
}

impl PrivacyAccountant for RdpAccountant {
    fn neighboring_relation(&self) -> NeighboringRelation {
        self.neighboring_relation
    }

    fn supports(&self, event: &DpEvent) -> bool {
        self.check(event)
    }

    fn compose(&mut self, event: &DpEvent, count: u64) -> Result<bool> {
        if !self.check(event) {
            log::warn!(
                "rejecting {event}: unsupported under {}",
                self.neighboring_relation
            );
            return Ok(false);
        }
        if count == 0 || event.is_no_op() {
            log::trace!("skipping no-op {event}");
            return Ok(true);
        }

        let mut increment = vec![0.0; self.orders.len()];
        self.accumulate(event, count, &mut increment)?;
        for (total, delta) in self.rdp.iter_mut().zip(increment) {
            *total += delta;
        }
        log::debug!("composed {event} x{count}");
        Ok(true)
    }

    fn get_epsilon(&self, target_delta: f64) -> Result<f64> {
        self.get_epsilon_and_optimal_order(target_delta)
            .map(|(epsilon, _)| epsilon)
    }

    fn get_delta(&self, target_epsilon: f64) -> Result<f64> {
        self.get_delta_and_optimal_order(target_epsilon)
            .map(|(delta, _)| delta)
    }
}

fn add_scaled(out: &mut [f64], count: u64, rdp: &[f64]) {
    if count == 0 {
        return;
    }
    let scale = count as f64;
    for (o, &r) in out.iter_mut().zip(rdp) {
        *o += scale * r;
    }
}

/// Noise multiplier of the single Gaussian equivalent to `event`.
///
/// A series of Gaussian queries on the same data can be re-expressed as one
/// query with pre- and post-processing (section 3 of Mironov, Talwar and
/// Zhang, "Rényi Differential Privacy of the Sampled Gaussian Mechanism",
/// arXiv:1908.10530). Returns `None` unless `event` is a Gaussian or a
/// nesting of composed and self-composed events bottoming out in Gaussians.
pub fn effective_gaussian_noise_multiplier(event: &DpEvent) -> Option<f64> {
    match event {
        DpEvent::Gaussian { noise_multiplier } => Some(*noise_multiplier),
        DpEvent::Composed { events } => {
            let mut sum_sigma_inv_sq = 0.0;
            for e in events {
                sum_sigma_inv_sq += effective_gaussian_noise_multiplier(e)?.powi(-2);
            }
            Some(sum_sigma_inv_sq.powf(-0.5))
        }
        DpEvent::SelfComposed { event, count } => {
            let sigma = effective_gaussian_noise_multiplier(event)?;
            if *count == 0 {
                return Some(f64::INFINITY);
            }
            Some((*count as f64 * sigma.powi(-2)).powf(-0.5))
        }
        _ => None,
    }
}

/// Effective noise multiplier of a supported nested Gaussian, rejecting
/// negative leaves.
fn reduced_noise_multiplier(event: &DpEvent) -> Result<f64> {
    check_gaussian_leaves(event)?;
    effective_gaussian_noise_multiplier(event)
        .ok_or_else(|| DpError::unsupported(format!("{event} does not reduce to a Gaussian")))
}

fn check_gaussian_leaves(event: &DpEvent) -> Result<()> {
    match event {
        DpEvent::Gaussian { noise_multiplier } => {
            if noise_multiplier.is_nan() || *noise_multiplier < 0.0 {
                return Err(DpError::invalid(format!(
                    "noise_multiplier must be non-negative, got {noise_multiplier}"
                )));
            }
            Ok(())
        }
        DpEvent::Composed { events } => events.iter().try_for_each(check_gaussian_leaves),
        DpEvent::SelfComposed { event, .. } => check_gaussian_leaves(event),
        _ => Ok(()),
    }
}

/// Default Rényi orders, chosen to give good coverage for the Gaussian
/// mechanism in the privacy regime of interest.
pub fn default_orders() -> Vec<f64> {
    [
        2, 3, 4, 5, 6, 7, 8, 9, 10, 12, 14, 16, 20, 24, 28, 32, 48, 64, 128, 256, 512, 1024,
    ]
    .iter()
    .map(|&a| a as f64)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sampled_gaussian(q: f64, sigma: f64) -> DpEvent {
        DpEvent::poisson_sampled(q, DpEvent::gaussian(sigma))
    }

    #[test]
    fn test_single_step() {
        let mut acc = RdpAccountant::new();
        assert!(acc.compose(&sampled_gaussian(0.01, 1.0), 1).unwrap());
        let eps = acc.get_epsilon(1e-5).unwrap();
        assert!(eps.is_finite());
        assert!(eps > 0.0);
    }

    #[test]
    fn test_epsilon_increases() {
        let mut acc = RdpAccountant::new();
        acc.compose(&sampled_gaussian(0.01, 1.0), 1).unwrap();
        let eps1 = acc.get_epsilon(1e-5).unwrap();
        acc.compose(&sampled_gaussian(0.01, 1.0), 1).unwrap();
        let eps2 = acc.get_epsilon(1e-5).unwrap();
        assert!(eps2 > eps1);
    }

    #[test]
    fn default_orders_cover_large_alphas() {
        let orders = default_orders();
        assert_eq!(orders.len(), 22);
        assert_eq!(orders.first(), Some(&2.0));
        assert_eq!(orders.last(), Some(&1024.0));
    }

    #[test]
    fn rejects_invalid_orders() {
        assert!(RdpAccountant::with_orders(vec![]).is_err());
        assert!(RdpAccountant::with_orders(vec![2.0, 0.99]).is_err());
        assert!(RdpAccountant::with_orders(vec![f64::NAN]).is_err());
        let acc = RdpAccountant::with_orders(vec![1.5, 2.0, f64::INFINITY]).unwrap();
        assert_eq!(acc.rdp(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn self_composed_matches_repeated_compose() {
        let mut a = RdpAccountant::new();
        let mut b = RdpAccountant::new();
        let event = sampled_gaussian(0.02, 1.3);

        for _ in 0..5 {
            a.compose(&event, 1).unwrap();
        }
        b.compose(&DpEvent::self_composed(event, 5), 1).unwrap();

        for (x, y) in a.rdp().iter().zip(b.rdp()) {
            assert!((x - y).abs() <= 1e-9 * y.abs().max(1.0));
        }
    }

    #[test]
    fn count_multiplies_self_composition() {
        let mut a = RdpAccountant::new();
        let mut b = RdpAccountant::new();
        let inner = DpEvent::self_composed(DpEvent::gaussian(2.0), 3);
        a.compose(&inner, 4).unwrap();
        b.compose(&DpEvent::gaussian(2.0), 12).unwrap();
        assert_eq!(a.rdp(), b.rdp());
    }

    #[test]
    fn no_op_and_zero_count_leave_state_unchanged() {
        let mut acc = RdpAccountant::new();
        assert!(acc.compose(&DpEvent::NoOp, 1).unwrap());
        assert!(acc.compose(&DpEvent::NonPrivate, 0).unwrap());
        assert!(acc.compose(&DpEvent::self_composed(DpEvent::gaussian(1.0), 0), 1).unwrap());
        assert!(acc.rdp().iter().all(|&r| r == 0.0));
        assert_eq!(acc.get_epsilon(1e-5).unwrap(), 0.0);
    }

    #[test]
    fn no_op_shortcut_keeps_relation_gating() {
        let mut acc = RdpAccountant::for_relation(NeighboringRelation::ReplaceOne);
        let idle = DpEvent::poisson_sampled(0.0, DpEvent::gaussian(1.0));
        assert!(idle.is_no_op());
        assert!(!acc.compose(&idle, 1).unwrap());
        let empty = DpEvent::sampled_without_replacement(100, 0, DpEvent::gaussian(1.0));
        assert!(acc.compose(&empty, 3).unwrap());
        assert!(acc.rdp().iter().all(|&r| r == 0.0));
    }

    #[test]
    fn order_one_composes_gaussians_and_uses_kl_bound() {
        let mut acc = RdpAccountant::with_orders(vec![1.0, 2.0]).unwrap();
        assert!(acc.compose(&DpEvent::gaussian(1.0), 1).unwrap());
        assert_eq!(acc.rdp(), &[0.5, 1.0]);

        // At epsilon 0 the KL bound sqrt(1 - exp(-0.5)) at order 1 is the
        // tightest available.
        let (delta, order) = acc.get_delta_and_optimal_order(0.0).unwrap();
        assert!((delta - (1.0 - (-0.5f64).exp()).sqrt()).abs() < 1e-12);
        assert_eq!(order, Some(1.0));
        assert!((acc.get_delta(1.0).unwrap() - 0.25).abs() < 1e-12);

        // Subsampling divides by alpha - 1 and is rejected without mutation.
        let before = acc.rdp().to_vec();
        let sampled = sampled_gaussian(0.1, 1.0);
        assert!(acc.compose(&sampled, 1).unwrap_err().is_invalid());
        assert_eq!(acc.rdp(), before.as_slice());
    }

    #[test]
    fn overflowing_nested_counts_are_invalid() {
        let mut acc = RdpAccountant::new();
        let event = DpEvent::self_composed(DpEvent::gaussian(1.0), u64::MAX);
        let err = acc.compose(&event, 2).unwrap_err();
        assert!(err.is_invalid());
        assert!(acc.rdp().iter().all(|&r| r == 0.0));
        assert!(acc.compose(&event, 1).unwrap());
    }

    #[test]
    fn non_private_is_infinite() {
        let mut acc = RdpAccountant::new();
        acc.compose(&DpEvent::NonPrivate, 1).unwrap();
        assert_eq!(acc.get_epsilon(1e-5).unwrap(), f64::INFINITY);
        assert_eq!(acc.get_delta(3.0).unwrap(), 1.0);
    }

    #[test]
    fn sampling_variants_are_gated_by_relation() {
        let poisson = sampled_gaussian(0.1, 1.0);
        let wor = DpEvent::sampled_without_replacement(1000, 10, DpEvent::gaussian(1.0));
        let tree = DpEvent::single_epoch_tree_aggregation(1.0, vec![10]);

        let add_remove = RdpAccountant::for_relation(NeighboringRelation::AddOrRemoveOne);
        assert!(add_remove.supports(&poisson));
        assert!(!add_remove.supports(&wor));
        assert!(!add_remove.supports(&tree));

        let replace = RdpAccountant::for_relation(NeighboringRelation::ReplaceOne);
        assert!(!replace.supports(&poisson));
        assert!(replace.supports(&wor));
        assert!(!replace.supports(&tree));

        let special = RdpAccountant::for_relation(NeighboringRelation::ReplaceSpecial);
        assert!(!special.supports(&poisson));
        assert!(!special.supports(&wor));
        assert!(special.supports(&tree));

        for acc in [&add_remove, &replace, &special] {
            assert!(acc.supports(&DpEvent::gaussian(1.0)));
            assert!(acc.supports(&DpEvent::NonPrivate));
            assert!(!acc.supports(&DpEvent::laplace(1.0)));
            assert!(!acc.supports(&DpEvent::Unsupported));
        }
    }

    #[test]
    fn unsupported_child_blocks_whole_composition() {
        let mut acc = RdpAccountant::new();
        let event = DpEvent::composed(vec![
            DpEvent::gaussian(1.0),
            DpEvent::NonPrivate,
            DpEvent::Unsupported,
        ]);
        assert!(!acc.supports(&event));
        assert!(!acc.compose(&event, 1).unwrap());
        assert!(acc.rdp().iter().all(|&r| r == 0.0));
    }

    #[test]
    fn invalid_child_leaves_state_unchanged() {
        let mut acc = RdpAccountant::for_relation(NeighboringRelation::ReplaceSpecial);
        acc.compose(&DpEvent::gaussian(2.0), 1).unwrap();
        let before = acc.rdp().to_vec();
        let event = DpEvent::composed(vec![
            DpEvent::gaussian(1.0),
            DpEvent::single_epoch_tree_aggregation(1.0, vec![5, -2]),
        ]);
        assert!(acc.supports(&event));
        let err = acc.compose(&event, 1).unwrap_err();
        assert!(err.is_invalid());
        assert_eq!(acc.rdp(), before.as_slice());
    }

    #[test]
    fn nested_gaussians_reduce() {
        let nested = DpEvent::composed(vec![
            DpEvent::gaussian(2.0),
            DpEvent::self_composed(DpEvent::gaussian(2.0), 3),
        ]);
        // Four copies of sigma = 2 behave like sigma = 1.
        let sigma = effective_gaussian_noise_multiplier(&nested).unwrap();
        assert!((sigma - 1.0).abs() < 1e-12);
        let mixed = DpEvent::composed(vec![DpEvent::gaussian(1.0), DpEvent::laplace(1.0)]);
        assert_eq!(effective_gaussian_noise_multiplier(&mixed), None);

        let acc = RdpAccountant::new();
        assert!(!acc.supports(&DpEvent::poisson_sampled(0.1, mixed)));
        assert!(acc.supports(&DpEvent::poisson_sampled(0.1, nested.clone())));

        let mut a = RdpAccountant::new();
        let mut b = RdpAccountant::new();
        a.compose(&DpEvent::poisson_sampled(0.1, nested), 1).unwrap();
        b.compose(&sampled_gaussian(0.1, sigma), 1).unwrap();
        assert_eq!(a.rdp(), b.rdp());
    }

    #[test]
    fn negative_leaf_inside_sampling_is_invalid() {
        let mut acc = RdpAccountant::new();
        let event = sampled_gaussian(0.1, -1.0);
        assert!(acc.compose(&event, 1).unwrap_err().is_invalid());
        assert!(acc.rdp().iter().all(|&r| r == 0.0));
    }

    #[test]
    fn tree_aggregation_composes() {
        let mut acc = RdpAccountant::with_params(
            vec![2.0, 4.0],
            NeighboringRelation::ReplaceSpecial,
        )
        .unwrap();
        acc.compose(&DpEvent::single_epoch_tree_aggregation(2.0, vec![3, 7]), 2)
            .unwrap();
        // Depth 3, sigma 2: alpha * 3 / 8, twice.
        assert_eq!(acc.rdp(), &[1.5, 3.0]);
    }

    #[test]
    fn without_replacement_rejects_bad_sizes() {
        let mut acc = RdpAccountant::for_relation(NeighboringRelation::ReplaceOne);
        let event = DpEvent::sampled_without_replacement(10, 20, DpEvent::gaussian(1.0));
        assert!(acc.compose(&event, 1).unwrap_err().is_invalid());
        let event = DpEvent::sampled_without_replacement(0, 0, DpEvent::gaussian(1.0));
        assert!(acc.compose(&event, 1).unwrap_err().is_invalid());
    }

    proptest! {
        #[test]
        fn prop_gaussian_composition_is_additive(sigma in 0.2f64..10.0, n in 1u64..50) {
            let event = DpEvent::gaussian(sigma);
            let mut repeated = RdpAccountant::new();
            for _ in 0..n {
                repeated.compose(&event, 1).unwrap();
            }
            let mut once = RdpAccountant::new();
            once.compose(&DpEvent::self_composed(event, n), 1).unwrap();
            for (x, y) in repeated.rdp().iter().zip(once.rdp()) {
                prop_assert!((x - y).abs() <= 1e-6 * y.abs());
            }
        }

        #[test]
        fn prop_rdp_never_decreases(
            qs in prop::collection::vec(0.0f64..1.0, 1..6),
            sigma in 0.5f64..5.0,
        ) {
            let mut acc = RdpAccountant::with_orders(vec![1.5, 2.0, 8.0, 32.0]).unwrap();
            let mut prev = acc.rdp().to_vec();
            for q in qs {
                acc.compose(&sampled_gaussian(q, sigma), 1).unwrap();
                for (now, before) in acc.rdp().iter().zip(&prev) {
                    prop_assert!(now >= before);
                }
                prev = acc.rdp().to_vec();
            }
        }

        #[test]
        fn prop_epsilon_delta_soundness(
            q in 0.001f64..0.5,
            sigma in 0.5f64..4.0,
            steps in 1u64..500,
            log10_delta in -10.0f64..-2.0,
        ) {
            let mut acc = RdpAccountant::new();
            acc.compose(&sampled_gaussian(q, sigma), steps).unwrap();
            let delta = 10f64.powf(log10_delta);
            let eps = acc.get_epsilon(delta).unwrap();
            let back = acc.get_delta(eps).unwrap();
            prop_assert!(back <= delta * (1.0 + 1e-8));
        }
    }
}
