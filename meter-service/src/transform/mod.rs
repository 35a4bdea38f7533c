use meter_client::domain::CandidateReading;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{
    format_description::well_known::{Iso8601, Rfc3339},
    Date, OffsetDateTime, PrimitiveDateTime,
};

use crate::pipeline::{Envelope, PipelineError, Transform};

/// A reading as posted by a meter, before validation.
///
/// Numeric fields are kept as raw JSON so numbers and numeric strings are both
/// accepted. `energy` is the meter's cumulative counter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingReading {
    #[serde(default)]
    pub device_id: Option<Value>,
    #[serde(default)]
    pub voltage: Option<Value>,
    #[serde(default)]
    pub current: Option<Value>,
    #[serde(default)]
    pub power: Option<Value>,
    #[serde(default)]
    pub energy: Option<Value>,
    #[serde(default)]
    pub frequency: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>, value: Option<&Value>) -> Self {
        Self {
            field,
            message: message.into(),
            value: value.cloned(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate and normalize an incoming reading.
///
/// Rules:
/// - device_id must be a string, non-empty after trimming (the trimmed value is kept).
/// - voltage and current, when present, must be numbers >= 0.
/// - power, energy and frequency, when present, must be numbers.
/// - timestamp, when present, must be an ISO-8601 date or date-time; values without an
///   offset are taken as UTC.
///
/// JSON `null` counts as absent. All failing fields are reported together.
pub fn validate_incoming(input: &IncomingReading) -> Result<CandidateReading, Vec<FieldError>> {
    let mut errors = Vec::new();

    let device_id = match &input.device_id {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::String(s)) => {
            errors.push(FieldError::new("device_id", "must not be empty", Some(&Value::String(s.clone()))));
            None
        }
        None | Some(Value::Null) => {
            errors.push(FieldError::new("device_id", "is required", None));
            None
        }
        Some(other) => {
            errors.push(FieldError::new("device_id", "must be a string", Some(other)));
            None
        }
    };

    let voltage = numeric_field("voltage", input.voltage.as_ref(), true, &mut errors);
    let current = numeric_field("current", input.current.as_ref(), true, &mut errors);
    let power = numeric_field("power", input.power.as_ref(), false, &mut errors);
    let raw_counter = numeric_field("energy", input.energy.as_ref(), false, &mut errors);
    let frequency = numeric_field("frequency", input.frequency.as_ref(), false, &mut errors);

    let timestamp = match &input.timestamp {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => match parse_timestamp(s) {
            Some(ts) => Some(ts),
            None => {
                errors.push(FieldError::new(
                    "timestamp",
                    "must be an ISO-8601 date-time",
                    input.timestamp.as_ref(),
                ));
                None
            }
        },
        Some(other) => {
            errors.push(FieldError::new("timestamp", "must be an ISO-8601 date-time", Some(other)));
            None
        }
    };

    match device_id {
        Some(device_id) if errors.is_empty() => Ok(CandidateReading {
            device_id,
            voltage,
            current,
            power,
            frequency,
            raw_counter,
            timestamp,
        }),
        _ => Err(errors),
    }
}

fn numeric_field(
    field: &'static str,
    value: Option<&Value>,
    non_negative: bool,
    errors: &mut Vec<FieldError>,
) -> Option<f64> {
    let value = match value {
        None | Some(Value::Null) => return None,
        Some(v) => v,
    };

    match parse_number(value) {
        Some(n) if non_negative && n < 0.0 => {
            errors.push(FieldError::new(field, "must be a number >= 0", Some(value)));
            None
        }
        Some(n) => Some(n),
        None => {
            errors.push(FieldError::new(field, "must be a number", Some(value)));
            None
        }
    }
}

/// Finite number from a JSON number or a numeric string.
pub fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

pub fn parse_timestamp(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(ts);
    }
    if let Ok(ts) = OffsetDateTime::parse(s, &Iso8601::DEFAULT) {
        return Some(ts);
    }
    if let Ok(ts) = PrimitiveDateTime::parse(s, &Iso8601::DEFAULT) {
        return Some(ts.assume_utc());
    }
    Date::parse(s, &Iso8601::DEFAULT)
        .ok()
        .map(|d| d.midnight().assume_utc())
}

fn describe(errors: &[FieldError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

/// Pipeline stage turning raw records into validated candidates.
#[derive(Clone, Default)]
pub struct ReadingValidation;

#[async_trait::async_trait]
impl Transform<IncomingReading, CandidateReading> for ReadingValidation {
    async fn apply(
        &self,
        input: Envelope<IncomingReading>,
    ) -> Result<Envelope<CandidateReading>, PipelineError> {
        match validate_incoming(&input.payload) {
            Ok(candidate) => Ok(Envelope {
                payload: candidate,
                received_at: input.received_at,
            }),
            Err(errors) => {
                metrics::counter!("ingest_validation_rejected_total").increment(1);
                Err(PipelineError::Transform(describe(&errors)))
            }
        }
    }
}
