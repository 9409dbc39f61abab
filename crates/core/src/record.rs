//! Generic record container shared by every resource.
//!
//! A `Record` is a flat map of field name to value plus the identifiers that
//! track it. The shape of the map is constrained per resource by a `Schema`
//! (see `resource.rs`); the container itself stays resource-agnostic.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{DomainError, DomainResult};
use crate::id::{LocalId, RecordId};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single field value.
///
/// Numbers are kept as `Decimal` so sums over a table never drift from the sum
/// of per-row values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum FieldValue {
    Null,
    Text(String),
    Number(Decimal),
    Date(NaiveDate),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Null or whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Flat text rendering used by table exports.
    pub fn display(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => n.normalize().to_string(),
            FieldValue::Date(d) => d.format(DATE_FORMAT).to_string(),
        }
    }

    /// Parse a JSON number without going through `f64`.
    fn decimal_from_json(n: &Number) -> DomainResult<Decimal> {
        let repr = n.to_string();
        Decimal::from_str(&repr)
            .or_else(|_| Decimal::from_scientific(&repr))
            .map_err(|e| DomainError::validation(format!("number {repr} out of range: {e}")))
    }

    /// Only text shaped exactly `YYYY-MM-DD` is a date; timestamps stay text so
    /// they go back to the backend unchanged.
    fn date_from_text(s: &str) -> Option<NaiveDate> {
        let b = s.as_bytes();
        let shaped = b.len() == 10
            && b[4] == b'-'
            && b[7] == b'-'
            && b.iter()
                .enumerate()
                .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit());
        if !shaped {
            return None;
        }
        NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
    }
}

impl TryFrom<Value> for FieldValue {
    type Error = DomainError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(FieldValue::Null),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            Value::Number(n) => Self::decimal_from_json(&n).map(FieldValue::Number),
            Value::String(s) => Ok(match Self::date_from_text(&s) {
                Some(d) => FieldValue::Date(d),
                None => FieldValue::Text(s),
            }),
            Value::Array(_) | Value::Object(_) => Err(DomainError::validation(
                "nested values are not supported in records",
            )),
        }
    }
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Null => Value::Null,
            FieldValue::Text(s) => Value::String(s),
            FieldValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            // Written from the decimal's own text so no digit is lost.
            FieldValue::Number(n) => Number::from_str(&n.to_string())
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(n.to_string())),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(Decimal::from(value))
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Number(Decimal::from(value))
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

/// A resource row: field map plus identity.
///
/// `id` is absent until the backend has confirmed the record. `local_id` is
/// assigned on the client and never sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub local_id: LocalId,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self {
            id: None,
            local_id: LocalId::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn number(&self, name: &str) -> Option<Decimal> {
        self.get(name).and_then(FieldValue::as_number)
    }

    /// Numeric field, with missing or non-numeric values counted as zero.
    pub fn number_or_zero(&self, name: &str) -> Decimal {
        self.number(name).unwrap_or(Decimal::ZERO)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        self.get(name).and_then(FieldValue::as_date)
    }

    /// Whether the backend has confirmed this record.
    pub fn is_synced(&self) -> bool {
        self.id.is_some()
    }

    /// Whether `other` denotes the same logical record.
    ///
    /// Server ids win when both sides have one; otherwise the local id decides.
    pub fn same_record(&self, other: &Record) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.local_id == other.local_id,
        }
    }

    /// JSON body sent to the backend: the field map plus `id_field` when known.
    pub fn to_wire(&self, id_field: &str) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), Value::from(value.clone()));
        }
        if let Some(id) = &self.id {
            map.insert(id_field.to_string(), Value::String(id.to_string()));
        }
        Value::Object(map)
    }

    /// Decode a backend JSON object. The record gets a fresh local id.
    pub fn from_wire(value: Value, id_field: &str) -> DomainResult<Self> {
        let Value::Object(mut map) = value else {
            return Err(DomainError::validation("record must be a JSON object"));
        };

        let id = match map.remove(id_field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.parse::<RecordId>()?),
            Some(Value::Number(n)) => Some(RecordId::new(n.to_string())),
            Some(other) => {
                return Err(DomainError::invalid_id(format!(
                    "unexpected {id_field} value: {other}"
                )));
            }
        };

        let mut fields = BTreeMap::new();
        for (name, raw) in map {
            match FieldValue::try_from(raw) {
                Ok(value) => {
                    fields.insert(name, value);
                }
                // Nested metadata from the backend (audit blocks etc.) is not part of the row.
                Err(_) => continue,
            }
        }

        Ok(Self {
            id,
            local_id: LocalId::new(),
            fields,
        })
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_numbers_decode_exactly() {
        let rec = Record::from_wire(json!({ "id": "a1", "opening": 0.1, "stockIn": 0.2 }), "id").unwrap();
        assert_eq!(rec.id, Some(RecordId::new("a1")));
        let sum = rec.number_or_zero("opening") + rec.number_or_zero("stockIn");
        assert_eq!(sum, Decimal::from_str("0.3").unwrap());
    }

    #[test]
    fn only_plain_dates_become_dates() {
        let rec = Record::from_wire(
            json!({
                "date": "2024-03-05",
                "createdAt": "2024-03-06T10:00:00Z",
                "batch": "2024-3-5",
                "material": "Maize"
            }),
            "id",
        )
        .unwrap();
        assert_eq!(rec.date("date"), NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(rec.text("createdAt"), Some("2024-03-06T10:00:00Z"));
        assert_eq!(rec.text("batch"), Some("2024-3-5"));
        assert_eq!(rec.text("material"), Some("Maize"));
        assert!(!rec.is_synced());
    }

    #[test]
    fn backend_timestamps_go_back_unchanged() {
        let wire = json!({ "id": "a1", "createdAt": "2024-03-06T10:00:00Z", "date": "2024-03-05" });
        let rec = Record::from_wire(wire.clone(), "id").unwrap();
        assert_eq!(rec.to_wire("id"), wire);
    }

    #[test]
    fn decimals_survive_local_serialization_exactly() {
        let exact = Decimal::from_str("1234567.123456789012").unwrap();
        let rec = Record::new()
            .with_field("opening", exact)
            .with_field("stockIn", Decimal::new(2050, 2))
            .with_field("stockOut", 7);
        let text = serde_json::to_string(&rec).unwrap();
        let back: Record = serde_json::from_str(&text).unwrap();
        assert_eq!(back.number("opening"), Some(exact));
        assert_eq!(back.number("opening").unwrap().to_string(), "1234567.123456789012");
        assert_eq!(back.number("stockIn"), Some(Decimal::new(2050, 2)));
        assert_eq!(back, rec);

        let wire = rec.to_wire("id");
        assert_eq!(wire["stockOut"], json!(7));
        assert_eq!(wire["opening"].to_string(), "1234567.123456789012");
    }

    #[test]
    fn wire_form_omits_local_id_and_carries_server_id() {
        let rec = Record::new()
            .with_field("material", "Sorghum")
            .with_field("opening", 40)
            .with_id(RecordId::new("srv-9"));
        let wire = rec.to_wire("_id");
        assert_eq!(wire, json!({ "_id": "srv-9", "material": "Sorghum", "opening": 40 }));
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let rec = Record::from_wire(json!({ "id": 42, "item": "Bags" }), "id").unwrap();
        assert_eq!(rec.id, Some(RecordId::new("42")));
    }

    #[test]
    fn nested_backend_metadata_is_skipped() {
        let rec = Record::from_wire(json!({ "item": "Bags", "audit": { "by": "x" } }), "id").unwrap();
        assert!(rec.get("audit").is_none());
        assert_eq!(rec.text("item"), Some("Bags"));
    }

    #[test]
    fn same_record_prefers_server_ids() {
        let a = Record::new().with_id(RecordId::new("1"));
        let mut b = a.clone();
        b.local_id = LocalId::new();
        assert!(a.same_record(&b));

        let unsynced = Record::new();
        let mut confirmed = unsynced.clone();
        confirmed.id = Some(RecordId::new("7"));
        assert!(unsynced.same_record(&confirmed));
        assert!(!Record::new().same_record(&unsynced));
    }

    #[test]
    fn local_serialization_keeps_local_id() {
        let rec = Record::new().with_field("qty", 3);
        let text = serde_json::to_string(&rec).unwrap();
        let back: Record = serde_json::from_str(&text).unwrap();
        assert_eq!(back, rec);
    }
}
