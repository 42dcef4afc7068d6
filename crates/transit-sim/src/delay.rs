//! Randomised delay model applied at every segment transition.
//!
//! Two independent sources of delay are sampled when a vehicle reaches a
//! stop and moves on to the next segment:
//!
//! - **Traffic**: time-of-day dependent, drawn uniformly from a band chosen
//!   by the local hour and then scaled by a jitter factor in `[0.8, 1.2]`.
//! - **Operational**: a fixed set of independent events, each firing with
//!   its own probability and contributing a uniform delay up to its
//!   maximum.
//!
//! | Hour band                 | Traffic delay (min) |
//! |---------------------------|---------------------|
//! | 07-09, 17-19 (commute)    | 0.0 - 5.0           |
//! | 06-22 (daytime)           | 0.0 - 2.0           |
//! | otherwise (overnight)     | 0.0 - 0.5           |
//!
//! | Event             | Probability | Max delay (min) |
//! |-------------------|-------------|-----------------|
//! | normal boarding   | 0.50        | 0.8             |
//! | heavy boarding    | 0.10        | 2.0             |
//! | wheelchair access | 0.05        | 3.0             |
//! | minor mechanical  | 0.02        | 5.0             |
//! | driver break      | 0.01        | 10.0            |
//!
//! All sampling goes through a caller-supplied [`Rng`] so runs are
//! reproducible with a seeded generator.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Time-of-day traffic regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficBand {
    /// Morning and evening commute windows.
    Commute,
    /// Regular daytime hours.
    Daytime,
    /// Late night and early morning.
    Overnight,
}

impl TrafficBand {
    /// Classify a local hour of day (0-23).
    pub const fn for_hour(hour: u32) -> Self {
        match hour {
            7..=9 | 17..=19 => Self::Commute,
            6..=22 => Self::Daytime,
            _ => Self::Overnight,
        }
    }

    /// Upper bound of the base traffic delay for this band, in minutes.
    pub const fn max_delay_minutes(self) -> f64 {
        match self {
            Self::Commute => 5.0,
            Self::Daytime => 2.0,
            Self::Overnight => 0.5,
        }
    }

    /// Range of the normalised traffic level reported to the predictor.
    const fn level_range(self) -> (f64, f64) {
        match self {
            Self::Commute => (0.7, 0.9),
            Self::Daytime => (0.45, 0.7),
            Self::Overnight => (0.3, 0.45),
        }
    }
}

/// An independent operational event that may hold a vehicle at a stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationalFactor {
    /// Short name used in debug logs.
    pub name: &'static str,
    /// Chance the event fires on a given segment transition.
    pub probability: f64,
    /// Largest delay the event can add, in minutes.
    pub max_delay_minutes: f64,
}

/// The operational events sampled at each transition.
pub const OPERATIONAL_FACTORS: [OperationalFactor; 5] = [
    OperationalFactor {
        name: "normal_boarding",
        probability: 0.5,
        max_delay_minutes: 0.8,
    },
    OperationalFactor {
        name: "heavy_boarding",
        probability: 0.1,
        max_delay_minutes: 2.0,
    },
    OperationalFactor {
        name: "wheelchair_access",
        probability: 0.05,
        max_delay_minutes: 3.0,
    },
    OperationalFactor {
        name: "minor_mechanical",
        probability: 0.02,
        max_delay_minutes: 5.0,
    },
    OperationalFactor {
        name: "driver_break",
        probability: 0.01,
        max_delay_minutes: 10.0,
    },
];

/// Delay sampled for one segment transition.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SegmentDelay {
    /// Traffic contribution in minutes.
    pub traffic_minutes: f64,
    /// Operational contribution in minutes.
    pub operational_minutes: f64,
}

impl SegmentDelay {
    /// Total delay in minutes.
    pub fn total_minutes(self) -> f64 {
        self.traffic_minutes + self.operational_minutes
    }
}

/// Sample the traffic delay for a transition happening at `hour`.
pub fn sample_traffic_delay(rng: &mut impl Rng, hour: u32) -> f64 {
    let base = rng.random_range(0.0..=TrafficBand::for_hour(hour).max_delay_minutes());
    let jitter = rng.random_range(0.8..=1.2);
    base * jitter
}

/// Sample the summed operational delay for one transition.
pub fn sample_operational_delay(rng: &mut impl Rng) -> f64 {
    let mut total = 0.0;
    for factor in &OPERATIONAL_FACTORS {
        if rng.random::<f64>() < factor.probability {
            let minutes = rng.random_range(0.0..=factor.max_delay_minutes);
            tracing::trace!(factor = factor.name, minutes, "operational delay");
            total += minutes;
        }
    }
    total
}

/// Sample both delay sources for a transition happening at `hour`.
pub fn sample_segment_delay(rng: &mut impl Rng, hour: u32) -> SegmentDelay {
    SegmentDelay {
        traffic_minutes: sample_traffic_delay(rng, hour),
        operational_minutes: sample_operational_delay(rng),
    }
}

/// Speed for the next segment.
///
/// A delayed segment slows the vehicle to 80-95% of base speed; an
/// undelayed one lets it recover at 100-110%.
pub fn next_speed_kmh(rng: &mut impl Rng, base_speed_kmh: f64, delay_minutes: f64) -> f64 {
    let factor = if delay_minutes > 0.0 {
        rng.random_range(0.8..=0.95)
    } else {
        rng.random_range(1.0..=1.1)
    };
    base_speed_kmh * factor
}

/// Normalised traffic level in `[0, 1]` for the predictor, following the
/// same hour bands as the traffic delay.
pub fn traffic_level(rng: &mut impl Rng, hour: u32) -> f64 {
    let (low, high) = TrafficBand::for_hour(hour).level_range();
    rng.random_range(low..=high)
}

/// Random passenger load between 5 and 40 riders.
pub fn passenger_load(rng: &mut impl Rng) -> u32 {
    rng.random_range(5..=40)
}
