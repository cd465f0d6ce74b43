//! Records: items with field access, mutation tracking and saving
//!
//! A [`Record`] wraps one remote item document and exposes its fields
//! through the mediators in [`crate::field`]. Mutations are tracked in a
//! tainted set so that [`Record::save`] only sends the fields that
//! actually changed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::field::{self, Field, FieldValue, UpdateValue};
use crate::schema::AppConfig;
use crate::session::Session;

/// Reference to the app (schema) an item belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRef {
    pub app_id: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One remote item document, typed at the edges.
///
/// Unknown wire keys land in `extra` so a document loaded from the API
/// or the cache serializes back without loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDocument {
    #[serde(alias = "record_id")]
    pub item_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Split a field descriptor into its external id and optional modifier.
///
/// The part before the first `__` is the external id, the part after
/// selects a fetch variant (e.g. `status__active`).
pub fn split_descriptor(descriptor: &str) -> (&str, Option<&str>) {
    match descriptor.split_once("__") {
        Some((external_id, modifier)) => (external_id, Some(modifier)),
        None => (descriptor, None),
    }
}

/// Where (if anywhere) a descriptor resolved to a field.
///
/// Without a schema, "the field does not exist" and "the field exists
/// but is empty" cannot be told apart; `UnknownAbsent` keeps that
/// ambiguity explicit instead of collapsing it into `KnownAbsent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Located {
    /// Present in the item document at this index
    Document(usize),
    /// Absent from the document, declared in the schema at this index
    Schema(usize),
    /// Schema known, field provably missing
    KnownAbsent,
    /// No schema available, field not in the document
    UnknownAbsent,
}

/// Find a field by external id, tolerating the `_`/`-` word-separator
/// mismatch between the public naming convention and wire identifiers.
fn find_field(fields: &[Field], external_id: &str) -> Option<usize> {
    if let Some(index) = fields.iter().position(|f| f.external_id == external_id) {
        return Some(index);
    }
    let hyphenated = external_id.replace('_', "-");
    fields.iter().position(|f| f.external_id == hyphenated)
}

/// One remote item with tracked mutations
#[derive(Debug, Clone)]
pub struct Record {
    document: ItemDocument,
    app_config: Option<AppConfig>,
    tainted: BTreeSet<String>,
}

impl Record {
    /// Wrap an item document
    pub fn new(document: ItemDocument) -> Self {
        Self {
            document,
            app_config: None,
            tainted: BTreeSet::new(),
        }
    }

    /// Wrap a raw JSON item document
    pub fn from_value(value: Value) -> Result<Self, Error> {
        Ok(Self::new(serde_json::from_value(value)?))
    }

    /// Attach the app schema used for field validation and fallback
    pub fn with_app_config(mut self, config: AppConfig) -> Self {
        self.app_config = Some(config);
        self
    }

    /// The stable remote identity of this item
    pub fn item_id(&self) -> i64 {
        self.document.item_id
    }

    /// The id of the owning app, when the document carries it
    pub fn app_id(&self) -> Option<i64> {
        self.document.app.as_ref().map(|app| app.app_id)
    }

    /// The remote URL of this item
    pub fn link(&self) -> Option<&str> {
        self.document.link.as_deref()
    }

    /// The trailing numeric component of the item link
    pub fn unique_id(&self) -> Option<i64> {
        self.document
            .link
            .as_deref()
            .and_then(|link| link.rsplit('/').next())
            .and_then(|tail| tail.parse().ok())
    }

    /// The underlying document
    pub fn document(&self) -> &ItemDocument {
        &self.document
    }

    /// The attached app schema, if any
    pub fn app_config(&self) -> Option<&AppConfig> {
        self.app_config.as_ref()
    }

    /// Serialize the underlying document back to JSON
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(serde_json::to_value(&self.document)?)
    }

    /// External ids mutated since load or the last successful save
    pub fn tainted(&self) -> &BTreeSet<String> {
        &self.tainted
    }

    pub(crate) fn clear_tainted(&mut self) {
        self.tainted.clear();
    }

    fn locate(&self, external_id: &str) -> Located {
        if let Some(index) = find_field(&self.document.fields, external_id) {
            return Located::Document(index);
        }
        match &self.app_config {
            Some(config) => match find_field(&config.fields, external_id) {
                Some(index) => Located::Schema(index),
                // Only a provably negative schema lookup is an error.
                None => Located::KnownAbsent,
            },
            None => Located::UnknownAbsent,
        }
    }

    /// Fetch a field's native value through its mediator.
    ///
    /// Returns `Ok(None)` for an empty field, and also when no schema is
    /// available to prove the field does not exist.
    pub fn get(&self, descriptor: &str) -> Result<Option<FieldValue>, Error> {
        let (external_id, modifier) = split_descriptor(descriptor);
        match self.locate(external_id) {
            Located::Document(index) => field::fetch(&self.document.fields[index], modifier),
            Located::Schema(index) => {
                // Declared but absent from the document: an empty field.
                // `locate` only yields `Schema` when a config is attached.
                let config = self
                    .app_config
                    .as_ref()
                    .ok_or_else(|| Error::FieldNotFound(external_id.to_string()))?;
                field::fetch(&config.fields[index], modifier)
            }
            Located::KnownAbsent => Err(Error::FieldNotFound(external_id.to_string())),
            Located::UnknownAbsent => {
                log::warn!(
                    "Accessing field {} on item_id {}: unknown if field exists or does \
                     not contain a value. Returning value = None.",
                    external_id,
                    self.document.item_id
                );
                Ok(None)
            }
        }
    }

    /// Set a field to a native value through its mediator.
    ///
    /// Pure in-memory: the new wire values are written into the document
    /// (appending a schema-sourced field entry if the document omitted
    /// the field) and the field is added to the tainted set. Nothing is
    /// sent to the remote service until [`Record::save`].
    pub fn set<V: Into<UpdateValue>>(&mut self, descriptor: &str, value: V) -> Result<(), Error> {
        let value = value.into();
        let (external_id, _) = split_descriptor(descriptor);
        match self.locate(external_id) {
            Located::Document(index) => {
                let values = field::update(&self.document.fields[index], &value)?;
                self.document.fields[index].values = values;
                let wire_id = self.document.fields[index].external_id.clone();
                self.tainted.insert(wire_id);
                Ok(())
            }
            Located::Schema(index) => {
                let declaration = self
                    .app_config
                    .as_ref()
                    .ok_or_else(|| Error::FieldNotFound(external_id.to_string()))?
                    .fields[index]
                    .clone();
                let values = field::update(&declaration, &value)?;
                let mut new_field = declaration;
                new_field.values = values;
                self.tainted.insert(new_field.external_id.clone());
                self.document.fields.push(new_field);
                Ok(())
            }
            // Without a schema the field's type cannot be determined, so
            // assignment cannot invent a field entry.
            Located::KnownAbsent | Located::UnknownAbsent => {
                Err(Error::FieldNotFound(external_id.to_string()))
            }
        }
    }

    /// All files attached to this record through `file`-typed fields.
    ///
    /// File fields do not flow through the mediators; their value
    /// objects are returned verbatim.
    pub fn files(&self) -> Vec<Value> {
        self.document
            .fields
            .iter()
            .filter(|f| f.field_type == "file")
            .flat_map(|f| f.values.iter())
            .filter_map(|v| v.get("value"))
            .cloned()
            .collect()
    }

    /// Assemble a wire-ready payload for a remote create or update.
    ///
    /// Iterates the schema's field declarations (the document's fields
    /// when no schema is attached), always excluding calculation fields
    /// because the remote service derives them, and honoring the
    /// optional filter set.
    pub fn as_podio_dict(
        &self,
        fields: Option<&BTreeSet<String>>,
    ) -> Result<Map<String, Value>, Error> {
        let declarations = match &self.app_config {
            Some(config) => &config.fields,
            None => &self.document.fields,
        };
        let mut payload = Map::new();
        for declaration in declarations {
            if declaration.field_type == "calculation" {
                continue;
            }
            let external_id = &declaration.external_id;
            if let Some(filter) = fields {
                let underscored = external_id.replace('-', "_");
                if !filter.contains(external_id) && !filter.contains(&underscored) {
                    continue;
                }
            }
            let field = match self.locate(external_id) {
                Located::Document(index) => &self.document.fields[index],
                _ => declaration,
            };
            payload.insert(external_id.clone(), field::as_podio_dict(field)?);
        }
        Ok(payload)
    }

    /// Send the tainted fields as a partial update to the remote item.
    ///
    /// A no-op when nothing is tainted. On success the tainted set is
    /// cleared.
    pub async fn save(&mut self, session: &Session) -> Result<(), Error> {
        if self.tainted.is_empty() {
            return Ok(());
        }
        let payload = self.as_podio_dict(Some(&self.tainted))?;
        let url = session.url(&format!("item/{}/value", self.document.item_id));
        let response = session.put(&url, Some(&Value::Object(payload))).await?;
        Session::check(response).await?;
        self.tainted.clear();
        Ok(())
    }
}
