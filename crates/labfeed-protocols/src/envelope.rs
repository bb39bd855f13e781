//! Instrument result events.
//!
//! An [`EventEnvelope`] bundles one hematology analyzer result with the visit
//! and patient it belongs to, exactly as the broadcasting service delivers it:
//!
//! ```json
//! {
//!   "sysmexResult": { "id": 1, "doctorvisit_id": 42, "wbc": 6.1 },
//!   "doctorVisit":  { "id": 42, "patient_id": 7, "created_at": "2024-01-01T00:00:00Z" },
//!   "patient":      { "id": 7, "name": "A", "result_is_locked": true }
//! }
//! ```
//!
//! Envelopes are validated as a unit: a message that fails any check is
//! rejected whole.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PayloadError;

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;

pub type ResultId = u64;
pub type VisitId = u64;
pub type PatientId = u64;
pub type ShiftId = u64;

/// Identity fields checked before full deserialization, as (section, field).
const IDENTITY_FIELDS: [(&str, &str); 3] = [
    ("sysmexResult", "id"),
    ("doctorVisit", "id"),
    ("patient", "id"),
];

/// One analyzer run. Every parameter is optional: `None` means the
/// instrument did not report it, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentResult {
    pub id: ResultId,
    pub doctorvisit_id: VisitId,

    /// White blood cell count.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub wbc: Option<f64>,
    /// Red blood cell count.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub rbc: Option<f64>,
    /// Hemoglobin.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub hgb: Option<f64>,
    /// Hematocrit.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub hct: Option<f64>,
    /// Mean cell volume.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub mcv: Option<f64>,
    /// Mean cell hemoglobin.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub mch: Option<f64>,
    /// Mean cell hemoglobin concentration.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub mchc: Option<f64>,
    /// Platelet count.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub plt: Option<f64>,
    /// Lymphocytes, percent.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub lym_percent: Option<f64>,
    /// Monocytes + eosinophils + basophils, percent.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub mxd_percent: Option<f64>,
    /// Neutrophils, percent.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub neut_percent: Option<f64>,
    /// Lymphocytes, absolute count.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub lym_count: Option<f64>,
    /// Monocytes + eosinophils + basophils, absolute count.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub mxd_count: Option<f64>,
    /// Neutrophils, absolute count.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub neut_count: Option<f64>,
    /// Red cell distribution width, standard deviation.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub rdw_sd: Option<f64>,
    /// Red cell distribution width, coefficient of variation.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub rdw_cv: Option<f64>,
    /// Platelet distribution width.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub pdw: Option<f64>,
    /// Mean platelet volume.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub mpv: Option<f64>,
    /// Platelet-large-cell ratio.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub plcr: Option<f64>,
}

impl InstrumentResult {
    /// Number of analyzer parameters the instrument reported.
    pub fn reported_count(&self) -> usize {
        [
            self.wbc,
            self.rbc,
            self.hgb,
            self.hct,
            self.mcv,
            self.mch,
            self.mchc,
            self.plt,
            self.lym_percent,
            self.mxd_percent,
            self.neut_percent,
            self.lym_count,
            self.mxd_count,
            self.neut_count,
            self.rdw_sd,
            self.rdw_cv,
            self.pdw,
            self.mpv,
            self.plcr,
        ]
        .iter()
        .filter(|value| value.is_some())
        .count()
    }
}

/// Visit identity carried alongside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitContext {
    pub id: VisitId,
    pub patient_id: PatientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_id: Option<ShiftId>,
    #[serde(deserialize_with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Patient identity carried alongside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientContext {
    pub id: PatientId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Server-side lock state at event time. Advisory only: the REST record
    /// is authoritative for write permission.
    #[serde(default, deserialize_with = "lenient_flag", skip_serializing_if = "Option::is_none")]
    pub result_is_locked: Option<bool>,
}

/// A validated instrument result event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "sysmexResult")]
    pub result: InstrumentResult,
    #[serde(rename = "doctorVisit")]
    pub visit: VisitContext,
    pub patient: PatientContext,
}

impl EventEnvelope {
    /// Parse and validate a raw channel message.
    ///
    /// The message may be the JSON object itself or a JSON string wrapping
    /// it, as the broadcasting service double-encodes event data.
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| PayloadError::NotStructured(e.to_string()))?;

        let value = match value {
            Value::String(inner) => serde_json::from_str(&inner)
                .map_err(|e| PayloadError::NotStructured(e.to_string()))?,
            other => other,
        };

        Self::from_value(value)
    }

    /// Validate an already decoded message.
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        if !value.is_object() {
            return Err(PayloadError::NotStructured(
                "expected a JSON object".to_string(),
            ));
        }

        for (section, field) in IDENTITY_FIELDS {
            require_id(&value, section, field)?;
        }

        serde_json::from_value(value).map_err(|e| PayloadError::Schema(e.to_string()))
    }

    pub fn patient_id(&self) -> PatientId {
        self.patient.id
    }

    pub fn visit_id(&self) -> VisitId {
        self.visit.id
    }

    /// The advisory lock flag carried by this envelope.
    pub fn result_is_locked(&self) -> Option<bool> {
        self.patient.result_is_locked
    }
}

fn require_id(value: &Value, section: &str, field: &str) -> Result<u64, PayloadError> {
    match value.get(section).and_then(|s| s.get(field)) {
        None | Some(Value::Null) => Err(PayloadError::MissingField(format!("{section}.{field}"))),
        Some(id) => id.as_u64().ok_or_else(|| PayloadError::InvalidType {
            field: format!("{section}.{field}"),
            expected: "an unsigned integer",
        }),
    }
}

/// Parse the timestamp formats the producing service emits: RFC 3339, or
/// `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
}

/// Decimal columns arrive as numbers or numeric strings.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| de::Error::custom("number out of range")),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("invalid number: {s:?}")))
        }
        Some(other) => Err(de::Error::custom(format!("expected a number, found {other}"))),
    }
}

/// Boolean columns may arrive as `true`/`false` or `1`/`0`.
fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(flag)),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(de::Error::custom(format!("expected 0 or 1, found {n}"))),
        },
        Some(other) => Err(de::Error::custom(format!("expected a boolean, found {other}"))),
    }
}
