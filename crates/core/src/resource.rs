//! Resource kinds and their field schemas.
//!
//! Every screen works on one `ResourceKind`. The schema is what a form is
//! validated against before a write is attempted; records coming back from
//! the backend are not re-validated.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::record::{FieldValue, Record};

/// Largest magnitude a numeric form field accepts.
///
/// Keeps every derived figure and column total well inside the `Decimal` range.
pub const MAX_QUANTITY: i64 = 1_000_000_000_000_000;

/// Processing stages tracked on finished-product batches, in pipeline order.
pub const PROCESSING_STAGES: [&str; 3] = ["cleaning", "milling", "packaging"];

/// The backend resources the dashboard reads and writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    RawMaterials,
    FinishedProducts,
    StockMovements,
    Dispatches,
    Stocks,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::RawMaterials,
        ResourceKind::FinishedProducts,
        ResourceKind::StockMovements,
        ResourceKind::Dispatches,
        ResourceKind::Stocks,
    ];

    /// REST path segment and storage key suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::RawMaterials => "raw-materials",
            ResourceKind::FinishedProducts => "finished-products",
            ResourceKind::StockMovements => "stock-movements",
            ResourceKind::Dispatches => "dispatches",
            ResourceKind::Stocks => "stocks",
        }
    }

    /// Human label used in banners and report headings.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::RawMaterials => "Raw Materials",
            ResourceKind::FinishedProducts => "Finished Products",
            ResourceKind::StockMovements => "Stock Movements",
            ResourceKind::Dispatches => "Dispatch & Delivery",
            ResourceKind::Stocks => "Stock Management",
        }
    }

    /// Whether rows carry opening / stock-in / stock-out balances.
    pub fn has_stock_balance(&self) -> bool {
        matches!(
            self,
            ResourceKind::RawMaterials | ResourceKind::FinishedProducts | ResourceKind::Stocks
        )
    }

    pub fn schema(&self) -> Schema {
        let fields = match self {
            ResourceKind::RawMaterials => vec![
                FieldSpec::text("material").required(),
                FieldSpec::date("date").required(),
                FieldSpec::text("supplier"),
                FieldSpec::text("unit"),
                FieldSpec::number("opening").non_negative(),
                FieldSpec::number("stockIn").non_negative(),
                FieldSpec::number("stockOut").non_negative(),
            ],
            ResourceKind::FinishedProducts => {
                let mut fields = vec![
                    FieldSpec::text("product").required(),
                    FieldSpec::date("date").required(),
                    FieldSpec::text("unit"),
                    FieldSpec::number("opening").non_negative(),
                    FieldSpec::number("stockIn").non_negative(),
                    FieldSpec::number("stockOut").non_negative(),
                    FieldSpec::number("plannedTons").non_negative(),
                    FieldSpec::number("finalOutputKg").non_negative(),
                ];
                for stage in PROCESSING_STAGES {
                    fields.push(FieldSpec::number(format!("{stage}Input")).non_negative());
                    fields.push(FieldSpec::number(format!("{stage}Output")).non_negative());
                }
                fields
            }
            ResourceKind::StockMovements => vec![
                FieldSpec::text("item").required(),
                FieldSpec::date("date").required(),
                FieldSpec::text("fromDepartment").required(),
                FieldSpec::text("toDepartment").required(),
                FieldSpec::number("quantity").required().non_negative(),
                FieldSpec::text("unit"),
                FieldSpec::text("reference"),
            ],
            ResourceKind::Dispatches => vec![
                FieldSpec::date("date").required(),
                FieldSpec::text("customer").required(),
                FieldSpec::text("destination"),
                FieldSpec::text("vehicle"),
                FieldSpec::text("driver"),
                FieldSpec::text("product"),
                FieldSpec::number("quantity").non_negative(),
                FieldSpec::text("tollGroup"),
                FieldSpec::number("fuelCost").non_negative(),
                FieldSpec::number("perDiemRate").non_negative(),
                FieldSpec::number("personnelCount").non_negative(),
            ],
            ResourceKind::Stocks => vec![
                FieldSpec::text("item").required(),
                FieldSpec::text("category"),
                FieldSpec::text("unit"),
                FieldSpec::number("opening").non_negative(),
                FieldSpec::number("stockIn").non_negative(),
                FieldSpec::number("stockOut").non_negative(),
                FieldSpec::number("reorderLevel").non_negative(),
            ],
        };
        Schema {
            resource: *self,
            fields,
        }
    }
}

impl core::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown resource: {s}")))
    }
}

/// Declared type of a field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub non_negative: bool,
}

impl FieldSpec {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            non_negative: false,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn non_negative(mut self) -> Self {
        self.non_negative = true;
        self
    }

    /// Coerce a raw value into this field's kind.
    fn coerce(&self, value: FieldValue) -> DomainResult<FieldValue> {
        if value.is_blank() {
            return Ok(FieldValue::Null);
        }
        let coerced = match (self.kind, value) {
            (FieldKind::Text, FieldValue::Text(s)) => FieldValue::Text(s.trim().to_string()),
            (FieldKind::Text, other) => FieldValue::Text(other.display()),
            (FieldKind::Number, FieldValue::Number(n)) => FieldValue::Number(n),
            (FieldKind::Number, FieldValue::Text(s)) => {
                let n = Decimal::from_str(s.trim()).map_err(|_| {
                    DomainError::validation(format!("{}: '{}' is not a number", self.name, s.trim()))
                })?;
                FieldValue::Number(n)
            }
            (FieldKind::Date, FieldValue::Date(d)) => FieldValue::Date(d),
            (FieldKind::Date, FieldValue::Text(s)) => {
                let d = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
                    DomainError::validation(format!("{}: '{}' is not a date (YYYY-MM-DD)", self.name, s.trim()))
                })?;
                FieldValue::Date(d)
            }
            (kind, other) => {
                return Err(DomainError::validation(format!(
                    "{}: expected {:?}, got '{}'",
                    self.name,
                    kind,
                    other.display()
                )));
            }
        };

        if let FieldValue::Number(n) = &coerced {
            if n.abs() > Decimal::from(MAX_QUANTITY) {
                return Err(DomainError::validation(format!("{}: value is too large", self.name)));
            }
        }

        if self.non_negative {
            if let FieldValue::Number(n) = &coerced {
                if n.is_sign_negative() && !n.is_zero() {
                    return Err(DomainError::validation(format!(
                        "{}: cannot be negative",
                        self.name
                    )));
                }
            }
        }
        Ok(coerced)
    }
}

/// Field schema of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub resource: ResourceKind,
    pub fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a record and return a copy with every declared field coerced.
    ///
    /// Unknown fields are kept unless blank; identifiers are untouched.
    pub fn normalize(&self, record: &Record) -> DomainResult<Record> {
        let mut out = record.clone();
        out.fields.clear();

        for (name, value) in &record.fields {
            match self.field(name) {
                Some(spec) => {
                    let coerced = spec.coerce(value.clone())?;
                    if coerced != FieldValue::Null {
                        out.fields.insert(name.clone(), coerced);
                    }
                }
                None if value.is_blank() => {}
                None => {
                    out.fields.insert(name.clone(), value.clone());
                }
            }
        }

        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|spec| spec.required && !out.fields.contains_key(&spec.name))
            .map(|spec| spec.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(DomainError::validation(format!(
                "{}: missing required field(s): {}",
                self.resource.label(),
                missing.join(", ")
            )));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn resource_names_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("widgets".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn normalize_coerces_form_text() {
        let schema = ResourceKind::RawMaterials.schema();
        let form = Record::new()
            .with_field("material", "  Maize ")
            .with_field("date", "2024-06-01")
            .with_field("opening", "100")
            .with_field("stockIn", "20.5")
            .with_field("stockOut", "");

        let rec = schema.normalize(&form).unwrap();
        assert_eq!(rec.text("material"), Some("Maize"));
        assert_eq!(rec.date("date"), NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(rec.number("opening"), Some(dec("100")));
        assert_eq!(rec.number("stockIn"), Some(dec("20.5")));
        assert!(rec.get("stockOut").is_none());
        assert_eq!(rec.local_id, form.local_id);
    }

    #[test]
    fn normalize_reports_missing_required_fields() {
        let schema = ResourceKind::StockMovements.schema();
        let err = schema
            .normalize(&Record::new().with_field("item", "Bran"))
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => {
                assert!(msg.contains("date"));
                assert!(msg.contains("quantity"));
                assert!(!msg.contains("item,"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn normalize_rejects_bad_numbers_and_negatives() {
        let schema = ResourceKind::Dispatches.schema();
        let base = Record::new()
            .with_field("date", "2024-06-01")
            .with_field("customer", "Agro Ltd");

        let bad = base.clone().with_field("fuelCost", "lots");
        assert!(matches!(schema.normalize(&bad), Err(DomainError::Validation(_))));

        let negative = base.clone().with_field("fuelCost", "-5");
        assert!(matches!(schema.normalize(&negative), Err(DomainError::Validation(_))));

        assert!(schema.normalize(&base).is_ok());
    }

    #[test]
    fn normalize_rejects_numbers_beyond_the_quantity_bound() {
        let schema = ResourceKind::FinishedProducts.schema();
        let form = Record::new()
            .with_field("product", "Flour")
            .with_field("date", "2024-06-01")
            .with_field("plannedTons", "79228162514264337593543950335");
        match schema.normalize(&form) {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("plannedTons")),
            other => panic!("expected Validation, got {other:?}"),
        }

        let at_bound = form.with_field("plannedTons", MAX_QUANTITY.to_string());
        assert!(schema.normalize(&at_bound).is_ok());
    }

    #[test]
    fn text_fields_accept_numbers_as_text() {
        let schema = ResourceKind::Dispatches.schema();
        let rec = Record::new()
            .with_field("date", "2024-06-01")
            .with_field("customer", "Agro Ltd")
            .with_field("vehicle", 4521);
        let rec = schema.normalize(&rec).unwrap();
        assert_eq!(rec.text("vehicle"), Some("4521"));
    }

    #[test]
    fn finished_product_schema_declares_every_stage() {
        let schema = ResourceKind::FinishedProducts.schema();
        for stage in PROCESSING_STAGES {
            assert!(schema.field(&format!("{stage}Input")).is_some());
            assert!(schema.field(&format!("{stage}Output")).is_some());
        }
    }
}
