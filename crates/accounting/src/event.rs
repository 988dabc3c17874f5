//! DP events: declarative descriptions of what a computation did.
//!
//! An event tree is built by the caller and only read by accountants.

use std::fmt;

use dp_accounting_core::{DpError, NeighboringRelation, Result};

use crate::accountants::PrivacyAccountant;
use crate::rdp::RdpAccountant;

/// A composable description of a DP mechanism.
#[derive(Clone, Debug, PartialEq)]
pub enum DpEvent {
    /// An operation with no privacy impact.
    ///
    /// Useful as a placeholder where a `DpEvent` is expected.
    NoOp,
    /// An operation with no privacy guarantee at all.
    NonPrivate,
    /// A Gaussian mechanism.
    ///
    /// For values v_i and noise z ~ N(0, s^2 I) the mechanism returns
    /// sum_i v_i + z. If the norms are bounded ||v_i|| <= C, the noise
    /// multiplier is s / C.
    Gaussian {
        /// Noise standard deviation divided by l2-sensitivity.
        noise_multiplier: f64,
    },
    /// A Laplace mechanism with scale `noise_multiplier * C` for l1-norm
    /// bound C.
    Laplace {
        /// Laplace scale divided by l1-sensitivity.
        noise_multiplier: f64,
    },
    /// Poisson subsampling applied to an inner event.
    ///
    /// Each record is included independently with probability
    /// `sampling_probability`, then `event` is applied to the sample.
    PoissonSampled {
        /// Inclusion probability of each record.
        sampling_probability: f64,
        /// The inner event.
        event: Box<DpEvent>,
    },
    /// A fixed-size batch drawn with replacement, then `event` applied.
    SampledWithReplacement {
        /// Size of the dataset sampled from.
        source_dataset_size: i64,
        /// Number of (possibly repeated) records drawn.
        sample_size: i64,
        /// The inner event.
        event: Box<DpEvent>,
    },
    /// A fixed-size batch of unique records drawn uniformly, then `event`
    /// applied.
    SampledWithoutReplacement {
        /// Size of the dataset sampled from.
        source_dataset_size: i64,
        /// Number of unique records drawn.
        sample_size: i64,
        /// The inner event.
        event: Box<DpEvent>,
    },
    /// An event composed with itself `count` times.
    SelfComposed {
        /// The inner event.
        event: Box<DpEvent>,
        /// Number of compositions.
        count: u64,
    },
    /// A series of (possibly adaptively) composed events.
    Composed {
        /// The events, in order.
        events: Vec<DpEvent>,
    },
    /// Gaussian tree aggregation restarted every epoch, with no record
    /// appearing in more than one tree.
    SingleEpochTreeAggregation {
        /// Noise standard deviation divided by l2-sensitivity.
        noise_multiplier: f64,
        /// Number of steps of each epoch.
        step_counts: Vec<i64>,
    },
    /// An event no accountant can represent.
    Unsupported,
}

impl DpEvent {
    /// A no-op event.
    pub fn no_op() -> Self {
        Self::NoOp
    }

    /// A non-private event.
    pub fn non_private() -> Self {
        Self::NonPrivate
    }

    /// A Gaussian mechanism.
    pub fn gaussian(noise_multiplier: f64) -> Self {
        Self::Gaussian { noise_multiplier }
    }

    /// A Laplace mechanism.
    pub fn laplace(noise_multiplier: f64) -> Self {
        Self::Laplace { noise_multiplier }
    }

    /// Poisson subsampling of `event`.
    pub fn poisson_sampled(sampling_probability: f64, event: DpEvent) -> Self {
        Self::PoissonSampled {
            sampling_probability,
            event: Box::new(event),
        }
    }

    /// Sampling with replacement followed by `event`.
    pub fn sampled_with_replacement(
        source_dataset_size: i64,
        sample_size: i64,
        event: DpEvent,
    ) -> Self {
        Self::SampledWithReplacement {
            source_dataset_size,
            sample_size,
            event: Box::new(event),
        }
    }

    /// Sampling without replacement followed by `event`.
    pub fn sampled_without_replacement(
        source_dataset_size: i64,
        sample_size: i64,
        event: DpEvent,
    ) -> Self {
        Self::SampledWithoutReplacement {
            source_dataset_size,
            sample_size,
            event: Box::new(event),
        }
    }

    /// `event` composed with itself `count` times.
    pub fn self_composed(event: DpEvent, count: u64) -> Self {
        Self::SelfComposed {
            event: Box::new(event),
            count,
        }
    }

    /// Sequential composition of `events`.
    pub fn composed(events: Vec<DpEvent>) -> Self {
        Self::Composed { events }
    }

    /// Single-epoch tree aggregation.
    pub fn single_epoch_tree_aggregation(noise_multiplier: f64, step_counts: Vec<i64>) -> Self {
        Self::SingleEpochTreeAggregation {
            noise_multiplier,
            step_counts,
        }
    }

    /// Compose two events, flattening nested compositions and dropping
    /// no-ops.
    pub fn compose(self, other: Self) -> Self {
        match (self, other) {
            (DpEvent::NoOp, other) => other,
            (current, DpEvent::NoOp) => current,
            (DpEvent::Composed { events: mut v1 }, DpEvent::Composed { events: v2 }) => {
                v1.extend(v2);
                DpEvent::Composed { events: v1 }
            }
            (DpEvent::Composed { mut events }, other) => {
                events.push(other);
                DpEvent::Composed { events }
            }
            (current, DpEvent::Composed { events }) => DpEvent::Composed {
                events: std::iter::once(current).chain(events).collect(),
            },
            (current, other) => DpEvent::Composed {
                events: vec![current, other],
            },
        }
    }

    /// Whether the event has no privacy impact at all.
    ///
    /// Sampling from an empty or negative-size dataset is malformed and never
    /// counts as a no-op.
    pub fn is_no_op(&self) -> bool {
        match self {
            DpEvent::NoOp => true,
            DpEvent::Composed { events } => events.iter().all(DpEvent::is_no_op),
            DpEvent::SelfComposed { event, count } => *count == 0 || event.is_no_op(),
            DpEvent::PoissonSampled {
                sampling_probability,
                event,
            } => *sampling_probability == 0.0 || event.is_no_op(),
            DpEvent::SampledWithReplacement {
                source_dataset_size,
                sample_size,
                event,
            }
            | DpEvent::SampledWithoutReplacement {
                source_dataset_size,
                sample_size,
                event,
            } => *source_dataset_size > 0 && (*sample_size == 0 || event.is_no_op()),
            _ => false,
        }
    }

    /// Epsilon of this event at `delta` under add-or-remove-one, using a
    /// default RDP accountant.
    ///
    /// Without-replacement and tree-aggregation events need another relation;
    /// see [`DpEvent::epsilon_under`].
    pub fn epsilon(&self, delta: f64) -> Result<f64> {
        self.epsilon_under(NeighboringRelation::AddOrRemoveOne, delta)
    }

    /// Epsilon of this event at `delta` under `neighboring_relation`, using
    /// the default RDP orders.
    pub fn epsilon_under(
        &self,
        neighboring_relation: NeighboringRelation,
        delta: f64,
    ) -> Result<f64> {
        let mut accountant = RdpAccountant::for_relation(neighboring_relation);
        accountant.compose_or_err(self, 1)?;
        accountant.get_epsilon(delta)
    }
}

impl fmt::Display for DpEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpEvent::NoOp => write!(f, "NoOp"),
            DpEvent::NonPrivate => write!(f, "NonPrivate"),
            DpEvent::Gaussian { noise_multiplier } => write!(f, "Gaussian ({noise_multiplier})"),
            DpEvent::Laplace { noise_multiplier } => write!(f, "Laplace ({noise_multiplier})"),
            DpEvent::PoissonSampled {
                sampling_probability,
                event,
            } => write!(f, "PoissonSampled ({sampling_probability}, {event})"),
            DpEvent::SampledWithReplacement {
                source_dataset_size,
                sample_size,
                event,
            } => write!(
                f,
                "SampledWithReplacement ({sample_size}/{source_dataset_size}, {event})"
            ),
            DpEvent::SampledWithoutReplacement {
                source_dataset_size,
                sample_size,
                event,
            } => write!(
                f,
                "SampledWithoutReplacement ({sample_size}/{source_dataset_size}, {event})"
            ),
            DpEvent::SelfComposed { event, count } => write!(f, "SelfComposed ({event}, {count})"),
            DpEvent::Composed { events } => {
                write!(f, "Composed (")?;
                for (i, event) in events.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{event}")?;
                }
                write!(f, ")")
            }
            DpEvent::SingleEpochTreeAggregation {
                noise_multiplier,
                step_counts,
            } => write!(
                f,
                "SingleEpochTreeAggregation ({noise_multiplier}, {step_counts:?})"
            ),
            DpEvent::Unsupported => write!(f, "Unsupported"),
        }
    }
}

impl FromIterator<DpEvent> for DpEvent {
    fn from_iter<T: IntoIterator<Item = DpEvent>>(iter: T) -> Self {
        iter.into_iter()
            .fold(DpEvent::NoOp, |composed, event| composed.compose(event))
    }
}

impl From<Vec<DpEvent>> for DpEvent {
    fn from(v: Vec<DpEvent>) -> Self {
        v.into_iter().collect()
    }
}

fn validate_args(noise_multiplier: f64, sampling_prob: f64) -> Result<()> {
    if noise_multiplier.is_nan() || noise_multiplier < 0.0 {
        return Err(DpError::invalid(format!(
            "noise multiplier must be non-negative, got {noise_multiplier}"
        )));
    }
    if !(0.0..=1.0).contains(&sampling_prob) {
        return Err(DpError::invalid(format!(
            "sampling probability must be in [0, 1], got {sampling_prob}"
        )));
    }
    Ok(())
}

/// DP-SGD event: Poisson sampled Gaussian repeated `iterations` times.
pub fn dpsgd_event(noise_multiplier: f64, iterations: u64, sampling_prob: f64) -> Result<DpEvent> {
    validate_args(noise_multiplier, sampling_prob)?;
    let sampled = DpEvent::poisson_sampled(sampling_prob, DpEvent::gaussian(noise_multiplier));
    Ok(DpEvent::self_composed(sampled, iterations))
}

/// DP-SGD event with fixed-size batches drawn without replacement.
pub fn fixed_batch_dpsgd_event(
    noise_multiplier: f64,
    iterations: u64,
    batch_size: i64,
    dataset_size: i64,
) -> Result<DpEvent> {
    if dataset_size <= 0 {
        return Err(DpError::invalid(format!(
            "dataset size must be positive, got {dataset_size}"
        )));
    }
    if !(0..=dataset_size).contains(&batch_size) {
        return Err(DpError::invalid(format!(
            "batch size must be in [0, {dataset_size}], got {batch_size}"
        )));
    }
    validate_args(noise_multiplier, batch_size as f64 / dataset_size as f64)?;
    let sampled = DpEvent::sampled_without_replacement(
        dataset_size,
        batch_size,
        DpEvent::gaussian(noise_multiplier),
    );
    Ok(DpEvent::self_composed(sampled, iterations))
}
