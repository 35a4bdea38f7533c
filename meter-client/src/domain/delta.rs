use serde::Deserialize;

use super::reading::Reading;

/// How a sample whose counter equals the stored baseline is booked.
///
/// `Raw` books the counter value itself as the interval delta. That is what deployed
/// meters and dashboards have always seen, so it stays the default. `Zero` books no
/// consumption for an unchanged counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqualCounterPolicy {
    #[default]
    Raw,
    Zero,
}

/// The baseline kept for a device: the raw counter of its latest stored reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviousState {
    pub raw_counter: f64,
}

impl From<&Reading> for PreviousState {
    fn from(r: &Reading) -> Self {
        Self {
            raw_counter: r.raw_counter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaOutcome {
    /// Consumption booked for this interval. Always finite.
    pub delta: f64,
    /// Counter to store as the baseline for the next sample.
    pub raw_counter: f64,
    /// Set when the computed delta was not finite and got forced to 0.
    pub anomaly: bool,
}

/// Turns cumulative meter counters into per-interval consumption.
///
/// Negative deltas (counter went backwards after a reboot or rollover) are returned
/// unclamped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaCalculator {
    policy: EqualCounterPolicy,
}

impl DeltaCalculator {
    pub fn new(policy: EqualCounterPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> EqualCounterPolicy {
        self.policy
    }

    pub fn compute(&self, previous: Option<PreviousState>, incoming: Option<f64>) -> DeltaOutcome {
        let current = incoming.filter(|v| v.is_finite()).unwrap_or(0.0);

        let delta = match previous {
            // First sample for the device: no baseline, the whole counter is booked.
            None => current,
            Some(prev) if current == prev.raw_counter => match self.policy {
                EqualCounterPolicy::Raw => current,
                EqualCounterPolicy::Zero => 0.0,
            },
            Some(prev) => current - prev.raw_counter,
        };

        let anomaly = !delta.is_finite();
        DeltaOutcome {
            delta: if anomaly { 0.0 } else { delta },
            raw_counter: current,
            anomaly,
        }
    }
}
