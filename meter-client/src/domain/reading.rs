use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::delta::DeltaOutcome;

/// A persisted sample from a power meter.
///
/// `delta_energy` is the consumption booked for the interval ending at this sample and
/// `raw_counter` is the cumulative counter it was derived from, kept as the baseline for
/// the device's next sample. The JSON field names match what existing dashboard clients
/// read (`energy`, `lastEnergy`, `createdAt`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    pub id: String,
    pub device_id: String,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub frequency: Option<f64>,
    #[serde(rename = "energy")]
    pub delta_energy: f64,
    #[serde(rename = "lastEnergy")]
    pub raw_counter: f64,
    #[serde(with = "time::serde::rfc3339")]
    #[sqlx(rename = "ts")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "createdAt", with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// A validated reading that has not been through delta computation yet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CandidateReading {
    pub device_id: String,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub frequency: Option<f64>,
    pub raw_counter: Option<f64>,
    pub timestamp: Option<OffsetDateTime>,
}

impl CandidateReading {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn with_raw_counter(mut self, raw_counter: f64) -> Self {
        self.raw_counter = Some(raw_counter);
        self
    }

    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl Reading {
    /// Build the record to persist from a candidate and its computed delta.
    pub fn from_candidate(
        candidate: CandidateReading,
        outcome: DeltaOutcome,
        timestamp: OffsetDateTime,
        recorded_at: OffsetDateTime,
    ) -> Self {
        let mut reading = Reading {
            id: String::new(),
            device_id: candidate.device_id,
            voltage: candidate.voltage,
            current: candidate.current,
            power: candidate.power,
            frequency: candidate.frequency,
            delta_energy: outcome.delta,
            raw_counter: outcome.raw_counter,
            timestamp,
            recorded_at,
        };
        reading.id = event_id(&reading);
        reading
    }
}

/// Filter shared by history queries and counts. Timestamp bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingFilter {
    pub device_id: Option<String>,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
}

impl ReadingFilter {
    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, reading: &Reading) -> bool {
        if let Some(device_id) = &self.device_id {
            if &reading.device_id != device_id {
                return false;
            }
        }
        if let Some(from) = self.from {
            if reading.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if reading.timestamp > to {
                return false;
            }
        }
        true
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u32).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_opt_f64(hasher: &mut blake3::Hasher, v: Option<f64>) {
    match v {
        Some(x) => {
            hasher.update(&[1]);
            hasher.update(&x.to_bits().to_le_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

/// Content-derived identifier; `recorded_at` is part of the input so two identical
/// samples posted at different moments stay distinct rows.
fn event_id(r: &Reading) -> String {
    let mut h = blake3::Hasher::new();
    hash_str(&mut h, &r.device_id);
    h.update(&r.timestamp.unix_timestamp_nanos().to_le_bytes());
    h.update(&r.recorded_at.unix_timestamp_nanos().to_le_bytes());
    hash_opt_f64(&mut h, r.voltage);
    hash_opt_f64(&mut h, r.current);
    hash_opt_f64(&mut h, r.power);
    hash_opt_f64(&mut h, r.frequency);
    hash_opt_f64(&mut h, Some(r.delta_energy));
    hash_opt_f64(&mut h, Some(r.raw_counter));
    h.finalize().to_hex().to_string()
}
