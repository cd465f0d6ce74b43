//! Field-level value mediation between wire JSON and native values
//!
//! Every Podio-style field carries a `type` tag selecting how its
//! `values` array is interpreted. The functions in this module convert
//! one field's wire representation into a native [`FieldValue`]
//! ([`fetch`]), a native [`UpdateValue`] into a replacement `values`
//! array ([`update`]), and a field into the minimal wire-ready form for
//! create/update payloads ([`as_podio_dict`]).
//!
//! A field descriptor may carry a double-underscore modifier selecting a
//! fetch variant, e.g. `status__active` or `budget__float`. An unknown
//! modifier on a supported type yields `None`; an unknown field *type*
//! is a hard error, never a silent skip.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::Error;
use crate::session::WIRE_DATETIME_FORMAT;

/// Date-only fallback accepted when updating date fields from strings.
const WIRE_DATE_FORMAT: &str = "%Y-%m-%d";

/// The closed set of supported field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    App,
    Calculation,
    Category,
    Contact,
    Date,
    Email,
    Embed,
    Number,
    Text,
    Image,
}

impl FieldType {
    /// Parse a wire type tag.
    ///
    /// Unknown tags are a hard error at resolution time so that an
    /// unhandled field type surfaces immediately.
    pub fn parse(tag: &str) -> Result<Self, Error> {
        match tag {
            "app" => Ok(FieldType::App),
            "calculation" => Ok(FieldType::Calculation),
            "category" => Ok(FieldType::Category),
            "contact" => Ok(FieldType::Contact),
            "date" => Ok(FieldType::Date),
            "email" => Ok(FieldType::Email),
            "embed" => Ok(FieldType::Embed),
            "number" => Ok(FieldType::Number),
            "text" => Ok(FieldType::Text),
            "image" => Ok(FieldType::Image),
            other => Err(Error::UnsupportedFieldType(other.to_string())),
        }
    }

    /// The wire tag for this type
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::App => "app",
            FieldType::Calculation => "calculation",
            FieldType::Category => "category",
            FieldType::Contact => "contact",
            FieldType::Date => "date",
            FieldType::Email => "email",
            FieldType::Embed => "embed",
            FieldType::Number => "number",
            FieldType::Text => "text",
            FieldType::Image => "image",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed value slot on an item or in an app schema.
///
/// The `type` tag stays a plain string on the wire side; it is parsed
/// into a [`FieldType`] at resolution time. Unknown wire keys are kept
/// in `extra` so documents round-trip through the cache intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub external_id: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Field {
    /// Parse this field's type tag
    pub fn kind(&self) -> Result<FieldType, Error> {
        FieldType::parse(&self.field_type)
    }

    fn first_value(&self) -> Option<&Value> {
        self.values.first()
    }

    /// The option set declared for category fields
    fn options(&self) -> &[Value] {
        self.config
            .as_ref()
            .and_then(|c| c.get("settings"))
            .and_then(|s| s.get("options"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The declared return type of a calculation field
    fn return_type(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|c| c.get("settings"))
            .and_then(|s| s.get("return_type"))
            .and_then(Value::as_str)
    }
}

/// A native value produced by [`fetch`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Plain text, including formatted decimal strings and date strings
    Text(String),
    /// A truncated integer projection of a number field
    Int(i64),
    /// A floating-point projection of a number field
    Float(f64),
    /// A parsed timestamp
    DateTime(NaiveDateTime),
    /// A single referenced item id
    ItemId(i64),
    /// Referenced item ids, in wire order
    ItemIds(Vec<i64>),
    /// Attached file ids, in wire order
    FileIds(Vec<i64>),
    /// A list of plain strings (embed URLs, category labels)
    Strings(Vec<String>),
    /// Category choices as (id, text) pairs
    Choices(Vec<(i64, String)>),
    /// Category choices as a text-to-id mapping
    ChoiceMap(BTreeMap<String, i64>),
    /// One raw wire value object (option, contact, ...)
    Json(Value),
    /// Several raw wire value objects
    JsonList(Vec<Value>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) | FieldValue::ItemId(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_item_ids(&self) -> Option<&[i64]> {
        match self {
            FieldValue::ItemIds(ids) | FieldValue::FileIds(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FieldValue::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The string form used for cache columns and natural keys.
    ///
    /// Related-item fields flatten to the debug form of their id list,
    /// e.g. `[503454054]`.
    pub fn column_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Int(n) => write!(f, "{}", n),
            FieldValue::Float(n) => write!(f, "{}", n),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.format(WIRE_DATETIME_FORMAT)),
            FieldValue::ItemId(id) => write!(f, "{}", id),
            FieldValue::ItemIds(ids) | FieldValue::FileIds(ids) => write!(f, "{:?}", ids),
            FieldValue::Strings(items) => write!(f, "{:?}", items),
            FieldValue::Choices(pairs) => write!(f, "{:?}", pairs),
            FieldValue::ChoiceMap(map) => write!(f, "{:?}", map),
            FieldValue::Json(value) => match value.as_str() {
                Some(s) => f.write_str(s),
                None => write!(f, "{}", value),
            },
            FieldValue::JsonList(values) => write!(f, "{}", Value::from(values.clone())),
        }
    }
}

/// A native value accepted by [`update`]
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateValue {
    /// Clear the field
    Null,
    Text(String),
    Int(i64),
    ItemIds(Vec<i64>),
    DateTime(NaiveDateTime),
}

impl From<&str> for UpdateValue {
    fn from(value: &str) -> Self {
        UpdateValue::Text(value.to_string())
    }
}

impl From<String> for UpdateValue {
    fn from(value: String) -> Self {
        UpdateValue::Text(value)
    }
}

impl From<i64> for UpdateValue {
    fn from(value: i64) -> Self {
        UpdateValue::Int(value)
    }
}

impl From<Vec<i64>> for UpdateValue {
    fn from(value: Vec<i64>) -> Self {
        UpdateValue::ItemIds(value)
    }
}

impl From<NaiveDateTime> for UpdateValue {
    fn from(value: NaiveDateTime) -> Self {
        UpdateValue::DateTime(value)
    }
}

impl<T: Into<UpdateValue>> From<Option<T>> for UpdateValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => UpdateValue::Null,
        }
    }
}

/// Fetch the native projection of one field, or `None` when the field
/// holds no value (or the modifier does not apply).
pub fn fetch(field: &Field, modifier: Option<&str>) -> Result<Option<FieldValue>, Error> {
    match field.kind()? {
        FieldType::App => fetch_app(field, modifier),
        FieldType::Calculation => fetch_calculation(field, modifier),
        FieldType::Category => fetch_category(field, modifier),
        FieldType::Contact => fetch_contact(field, modifier),
        FieldType::Date => fetch_date(field, modifier),
        FieldType::Email => fetch_email(field, modifier),
        FieldType::Embed => fetch_embed(field, modifier),
        FieldType::Number => fetch_number(field, modifier),
        FieldType::Text => fetch_text(field, modifier),
        FieldType::Image => fetch_image(field),
    }
}

/// Produce the replacement `values` array for a native value.
///
/// Does not persist anything; the caller writes the result back into
/// the item document.
pub fn update(field: &Field, value: &UpdateValue) -> Result<Vec<Value>, Error> {
    match field.kind()? {
        FieldType::App => update_app(value),
        FieldType::Category => update_category(field, value),
        FieldType::Date => update_date(value),
        FieldType::Number => update_number(value),
        FieldType::Text => update_text(value),
        FieldType::Calculation => Err(Error::NotImplemented(
            "calculation fields are derived remotely and cannot be updated",
        )),
        FieldType::Contact => Err(Error::NotImplemented("updating contact fields")),
        FieldType::Email => Err(Error::NotImplemented("updating email fields")),
        FieldType::Embed => Err(Error::NotImplemented("updating embed fields")),
        FieldType::Image => Err(Error::NotImplemented("updating image fields")),
    }
}

/// Produce the minimal wire-ready value for a create/update payload
pub fn as_podio_dict(field: &Field) -> Result<Value, Error> {
    match field.kind()? {
        FieldType::App => {
            let ids = app_item_ids(field);
            Ok(json!(ids))
        }
        FieldType::Category => {
            let ids: Vec<i64> = field
                .values
                .iter()
                .filter_map(|v| v.get("value").and_then(|o| o.get("id")).and_then(Value::as_i64))
                .collect();
            Ok(json!(ids))
        }
        FieldType::Date => Ok(field
            .first_value()
            .and_then(|v| v.get("start"))
            .map(|start| json!({ "start": start }))
            .unwrap_or(Value::Null)),
        FieldType::Number => match first_decimal(field)? {
            Some(decimal) => Ok(Value::String(quantize(decimal))),
            None => Ok(Value::Null),
        },
        FieldType::Text => {
            // An empty text field serializes as an empty array, which is
            // what the remote update endpoint expects for "clear".
            match field.first_value().and_then(|v| v.get("value")) {
                Some(value) => Ok(value.clone()),
                None => Ok(json!([])),
            }
        }
        FieldType::Calculation => Err(Error::NotImplemented(
            "calculation fields are never serialized into payloads",
        )),
        FieldType::Contact => Err(Error::NotImplemented("serializing contact fields")),
        FieldType::Email => Err(Error::NotImplemented("serializing email fields")),
        FieldType::Embed => Err(Error::NotImplemented("serializing embed fields")),
        FieldType::Image => Err(Error::NotImplemented("serializing image fields")),
    }
}

// --- text ---------------------------------------------------------------

fn fetch_text(field: &Field, modifier: Option<&str>) -> Result<Option<FieldValue>, Error> {
    let key = match modifier {
        None => "value",
        Some("unformatted") => "unformatted_value",
        Some(_) => return Ok(None),
    };
    Ok(field
        .first_value()
        .and_then(|v| v.get(key))
        .and_then(Value::as_str)
        .map(|s| FieldValue::Text(s.to_string())))
}

fn update_text(value: &UpdateValue) -> Result<Vec<Value>, Error> {
    match value {
        UpdateValue::Null => Ok(vec![]),
        UpdateValue::Text(s) => Ok(vec![json!({ "value": s.trim() })]),
        other => Err(Error::invalid_value(format!(
            "text fields take a string, got {:?}",
            other
        ))),
    }
}

// --- number -------------------------------------------------------------

fn first_decimal(field: &Field) -> Result<Option<Decimal>, Error> {
    let raw = match field.first_value().and_then(|v| v.get("value")) {
        Some(raw) => raw,
        None => return Ok(None),
    };
    let parsed = match raw {
        Value::String(s) => Decimal::from_str(s),
        Value::Number(n) => Decimal::from_str(&n.to_string()),
        other => {
            return Err(Error::invalid_value(format!(
                "number field carries a non-numeric value: {}",
                other
            )))
        }
    };
    parsed
        .map(Some)
        .map_err(|err| Error::invalid_value(format!("bad decimal value: {}", err)))
}

/// Quantize to exactly four fractional digits, banker's rounding.
fn quantize(decimal: Decimal) -> String {
    format!("{:.4}", decimal.round_dp(4))
}

fn fetch_number(field: &Field, modifier: Option<&str>) -> Result<Option<FieldValue>, Error> {
    let decimal = match first_decimal(field)? {
        Some(decimal) => decimal,
        None => return Ok(None),
    };
    match modifier {
        None => Ok(Some(FieldValue::Text(quantize(decimal)))),
        Some("int") => Ok(decimal.trunc().to_i64().map(FieldValue::Int)),
        Some("float") => Ok(decimal.to_f64().map(FieldValue::Float)),
        Some(_) => Ok(None),
    }
}

fn update_number(value: &UpdateValue) -> Result<Vec<Value>, Error> {
    let decimal = match value {
        UpdateValue::Null => return Ok(vec![]),
        UpdateValue::Text(s) => Decimal::from_str(s)
            .map_err(|err| Error::invalid_value(format!("bad decimal value: {}", err)))?,
        UpdateValue::Int(n) => Decimal::from(*n),
        other => {
            return Err(Error::invalid_value(format!(
                "number fields take a decimal string or integer, got {:?}",
                other
            )))
        }
    };
    Ok(vec![json!({ "value": quantize(decimal) })])
}

// --- date ---------------------------------------------------------------

fn parse_wire_datetime(raw: &str) -> Result<NaiveDateTime, Error> {
    NaiveDateTime::parse_from_str(raw, WIRE_DATETIME_FORMAT)
        .map_err(|err| Error::invalid_value(format!("bad timestamp \"{}\": {}", raw, err)))
}

fn fetch_date(field: &Field, modifier: Option<&str>) -> Result<Option<FieldValue>, Error> {
    let value = match field.first_value() {
        Some(value) => value,
        None => return Ok(None),
    };
    let start = value.get("start").and_then(Value::as_str);
    let end = value.get("end").and_then(Value::as_str);
    match modifier {
        None | Some("start") => Ok(start.map(|s| FieldValue::Text(s.to_string()))),
        Some("end") => Ok(end.map(|s| FieldValue::Text(s.to_string()))),
        Some("datetime" | "start_datetime" | "startdatetime" | "start_dt" | "startdt") => {
            match start {
                Some(raw) => Ok(Some(FieldValue::DateTime(parse_wire_datetime(raw)?))),
                None => Ok(None),
            }
        }
        Some("end_datetime" | "enddatetime" | "end_dt" | "enddt") => match end {
            Some(raw) => Ok(Some(FieldValue::DateTime(parse_wire_datetime(raw)?))),
            None => Ok(None),
        },
        Some(_) => Ok(None),
    }
}

fn update_date(value: &UpdateValue) -> Result<Vec<Value>, Error> {
    let start = match value {
        UpdateValue::DateTime(dt) => dt.format(WIRE_DATETIME_FORMAT).to_string(),
        UpdateValue::Text(s) => {
            let parsed = match NaiveDateTime::parse_from_str(s, WIRE_DATETIME_FORMAT) {
                Ok(dt) => dt,
                Err(_) => chrono::NaiveDate::parse_from_str(s, WIRE_DATE_FORMAT)
                    .map_err(|err| {
                        Error::invalid_value(format!("bad date value \"{}\": {}", s, err))
                    })?
                    .and_hms_opt(0, 0, 0)
                    .ok_or_else(|| Error::invalid_value("midnight is not representable"))?,
            };
            parsed.format(WIRE_DATETIME_FORMAT).to_string()
        }
        other => {
            return Err(Error::invalid_value(format!(
                "date fields take a timestamp or date string, got {:?}",
                other
            )))
        }
    };
    Ok(vec![json!({ "start": start })])
}

// --- category -----------------------------------------------------------

fn option_is_active(option: &Value) -> bool {
    option.get("status").and_then(Value::as_str) == Some("active")
}

fn fetch_category(field: &Field, modifier: Option<&str>) -> Result<Option<FieldValue>, Error> {
    match modifier {
        None => Ok(field
            .first_value()
            .and_then(|v| v.get("value"))
            .and_then(|o| o.get("text"))
            .and_then(Value::as_str)
            .map(|s| FieldValue::Text(s.to_string()))),
        Some("active") => Ok(field
            .first_value()
            .and_then(|v| v.get("value"))
            .cloned()
            .map(FieldValue::Json)),
        Some("all") => Ok(Some(FieldValue::JsonList(
            field
                .values
                .iter()
                .filter_map(|v| v.get("value"))
                .cloned()
                .collect(),
        ))),
        Some("labels") => Ok(Some(FieldValue::Strings(
            field
                .values
                .iter()
                .filter_map(|v| v.get("value"))
                .filter_map(|o| o.get("text"))
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ))),
        Some("choices") => {
            let choices = field
                .options()
                .iter()
                .filter(|opt| option_is_active(opt))
                .filter_map(|opt| {
                    let id = opt.get("id").and_then(Value::as_i64)?;
                    let text = opt.get("text").and_then(Value::as_str)?;
                    Some((id, text.to_string()))
                })
                .collect();
            Ok(Some(FieldValue::Choices(choices)))
        }
        Some("choices_dict") => {
            let map = field
                .options()
                .iter()
                .filter(|opt| option_is_active(opt))
                .filter_map(|opt| {
                    let id = opt.get("id").and_then(Value::as_i64)?;
                    let text = opt.get("text").and_then(Value::as_str)?;
                    Some((text.to_string(), id))
                })
                .collect();
            Ok(Some(FieldValue::ChoiceMap(map)))
        }
        Some(_) => Ok(None),
    }
}

fn update_category(field: &Field, value: &UpdateValue) -> Result<Vec<Value>, Error> {
    let matched = match value {
        UpdateValue::Null => return Ok(vec![]),
        UpdateValue::Int(id) => field
            .options()
            .iter()
            .find(|opt| opt.get("id").and_then(Value::as_i64) == Some(*id)),
        UpdateValue::Text(text) => field
            .options()
            .iter()
            .find(|opt| opt.get("text").and_then(Value::as_str) == Some(text.as_str())),
        other => {
            return Err(Error::invalid_value(format!(
                "category fields take an option id or display text, got {:?}",
                other
            )))
        }
    };
    let option = matched.ok_or_else(|| {
        Error::invalid_value(format!(
            "no option matching {:?} on field \"{}\"",
            value, field.external_id
        ))
    })?;
    // The wire protocol wraps the entire matched option, not just its
    // id, in a single-key "value" object.
    Ok(vec![json!({ "value": option })])
}

// --- app (relation) -----------------------------------------------------

fn app_item_ids(field: &Field) -> Vec<i64> {
    field
        .values
        .iter()
        .filter_map(|v| v.get("value"))
        .filter_map(|o| o.get("item_id"))
        .filter_map(Value::as_i64)
        .collect()
}

fn fetch_app(field: &Field, modifier: Option<&str>) -> Result<Option<FieldValue>, Error> {
    match modifier {
        Some("values") => Ok(Some(FieldValue::JsonList(
            field
                .values
                .iter()
                .filter_map(|v| v.get("value"))
                .cloned()
                .collect(),
        ))),
        None => Ok(Some(FieldValue::ItemIds(app_item_ids(field)))),
        Some("first") => Ok(app_item_ids(field).first().copied().map(FieldValue::ItemId)),
        Some("last") => Ok(app_item_ids(field).last().copied().map(FieldValue::ItemId)),
        Some(_) => Ok(None),
    }
}

fn update_app(value: &UpdateValue) -> Result<Vec<Value>, Error> {
    let item_ids: Vec<i64> = match value {
        UpdateValue::Null => vec![],
        UpdateValue::Int(id) => vec![*id],
        UpdateValue::ItemIds(ids) => ids.clone(),
        other => {
            return Err(Error::invalid_value(format!(
                "app fields take an item id or a list of item ids, got {:?}",
                other
            )))
        }
    };
    Ok(item_ids
        .into_iter()
        .map(|item_id| json!({ "value": { "item_id": item_id } }))
        .collect())
}

// --- contact ------------------------------------------------------------

fn fetch_contact(field: &Field, modifier: Option<&str>) -> Result<Option<FieldValue>, Error> {
    match modifier {
        None => Ok(field
            .first_value()
            .and_then(|v| v.get("value"))
            .cloned()
            .map(FieldValue::Json)),
        Some("all") => Ok(Some(FieldValue::JsonList(
            field
                .values
                .iter()
                .filter_map(|v| v.get("value"))
                .cloned()
                .collect(),
        ))),
        Some(_) => Ok(None),
    }
}

// --- email --------------------------------------------------------------

fn fetch_email(field: &Field, modifier: Option<&str>) -> Result<Option<FieldValue>, Error> {
    match modifier {
        None => Ok(field
            .first_value()
            .and_then(|v| v.get("value"))
            .and_then(Value::as_str)
            .map(|s| FieldValue::Text(s.to_string()))),
        Some("all") => Ok(Some(FieldValue::JsonList(field.values.clone()))),
        Some(kind @ ("work" | "home" | "other")) => Ok(field
            .values
            .iter()
            .find(|v| v.get("type").and_then(Value::as_str) == Some(kind))
            .and_then(|v| v.get("value"))
            .and_then(Value::as_str)
            .map(|s| FieldValue::Text(s.to_string()))),
        Some(_) => Ok(None),
    }
}

// --- embed --------------------------------------------------------------

fn fetch_embed(field: &Field, modifier: Option<&str>) -> Result<Option<FieldValue>, Error> {
    let urls = || {
        field
            .values
            .iter()
            .filter_map(|v| v.get("embed"))
            .filter_map(|e| e.get("url"))
            .filter_map(Value::as_str)
            .map(str::to_string)
    };
    match modifier {
        None => Ok(urls().next().map(FieldValue::Text)),
        Some("all") => Ok(Some(FieldValue::Strings(urls().collect()))),
        Some(_) => Ok(None),
    }
}

// --- image --------------------------------------------------------------

fn fetch_image(field: &Field) -> Result<Option<FieldValue>, Error> {
    Ok(Some(FieldValue::FileIds(
        field
            .values
            .iter()
            .filter_map(|v| v.get("value"))
            .filter_map(|o| o.get("file_id"))
            .filter_map(Value::as_i64)
            .collect(),
    )))
}

// --- calculation --------------------------------------------------------

fn fetch_calculation(field: &Field, modifier: Option<&str>) -> Result<Option<FieldValue>, Error> {
    // Calculations returning dates carry date-shaped values and format
    // like a date field.
    if field.return_type() == Some("date") {
        let start = field
            .first_value()
            .and_then(|v| v.get("start"))
            .and_then(Value::as_str);
        return match start {
            Some(raw) => {
                let dt = parse_wire_datetime(raw)?;
                if modifier == Some("datetime") {
                    Ok(Some(FieldValue::DateTime(dt)))
                } else {
                    Ok(Some(FieldValue::Text(
                        dt.format(WIRE_DATETIME_FORMAT).to_string(),
                    )))
                }
            }
            None => Ok(None),
        };
    }
    Ok(field.first_value().and_then(|v| v.get("value")).map(|value| {
        match value.as_str() {
            Some(s) => FieldValue::Text(s.to_string()),
            None => FieldValue::Json(value.clone()),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number_field(raw: &str) -> Field {
        Field {
            external_id: "budget".to_string(),
            field_type: "number".to_string(),
            values: vec![json!({ "value": raw })],
            config: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn quantize_pads_and_rounds() {
        assert_eq!(quantize(Decimal::from_str("4").unwrap()), "4.0000");
        assert_eq!(quantize(Decimal::from_str("1.23456").unwrap()), "1.2346");
        assert_eq!(quantize(Decimal::from_str("-0.5").unwrap()), "-0.5000");
    }

    #[test]
    fn number_round_trips_through_update_and_fetch() {
        let field = number_field("1.5");
        let values = update(&field, &UpdateValue::from("1.5")).unwrap();
        assert_eq!(values, vec![json!({ "value": "1.5000" })]);

        let written = Field { values, ..field };
        let fetched = fetch(&written, None).unwrap().unwrap();
        assert_eq!(fetched, FieldValue::Text("1.5000".to_string()));
    }

    #[test]
    fn number_int_modifier_truncates() {
        let field = number_field("7.9000");
        let fetched = fetch(&field, Some("int")).unwrap().unwrap();
        assert_eq!(fetched, FieldValue::Int(7));
    }

    #[test]
    fn unknown_type_is_a_hard_error() {
        let field = Field {
            external_id: "mystery".to_string(),
            field_type: "hologram".to_string(),
            values: vec![],
            config: None,
            extra: Map::new(),
        };
        match fetch(&field, None) {
            Err(Error::UnsupportedFieldType(tag)) => assert_eq!(tag, "hologram"),
            other => panic!("expected UnsupportedFieldType, got {:?}", other),
        }
    }

    #[test]
    fn date_update_accepts_plain_dates() {
        let values = update_date(&UpdateValue::from("2018-10-15")).unwrap();
        assert_eq!(values, vec![json!({ "start": "2018-10-15 00:00:00" })]);
    }
}
