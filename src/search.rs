//! In-memory search over a complete app's item collection
//!
//! A [`SearchableList`] holds every record of one app together with a
//! lower-cased exact-match text index per external id. The list is
//! append-only; removal would invalidate the index.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::Error;
use crate::paging::{self, PageMethod};
use crate::record::Record;
use crate::session::Session;

/// How multiple search terms combine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Every term must match (intersection)
    And,
    /// At least one term must match (union)
    Or,
}

/// An append-only, searchable collection of records
#[derive(Debug, Default)]
pub struct SearchableList {
    records: Vec<Record>,
    // external id -> searchable text -> indexes into `records`
    index: HashMap<String, HashMap<String, Vec<usize>>>,
}

impl SearchableList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Append a record, indexing every field of its document.
    ///
    /// Fails when a field's type has no mediator; the index must not
    /// silently skip values.
    pub fn append(&mut self, record: Record) -> Result<(), Error> {
        let position = self.records.len();
        for field in &record.document().fields {
            let external_id = field.external_id.clone();
            let searchable = record
                .get(&external_id)?
                .map(|value| value.column_string())
                .unwrap_or_default()
                .trim()
                .to_lowercase();
            self.index
                .entry(external_id)
                .or_default()
                .entry(searchable)
                .or_default()
                .push(position);
        }
        self.records.push(record);
        Ok(())
    }

    /// All records whose field matches the term exactly
    /// (case-insensitive, surrounding whitespace ignored).
    pub fn search(&self, external_id: &str, look_for: &str) -> Vec<&Record> {
        if self.records.is_empty() {
            log::warn!("Tried search in empty list.");
            return Vec::new();
        }
        let field_index = match self.index.get(external_id) {
            Some(field_index) => field_index,
            None => {
                log::warn!(
                    "Searching for unknown field \"{}\", field might be null for \
                     every item in this list or not exist at all.",
                    external_id
                );
                return Vec::new();
            }
        };
        let query = look_for.trim().to_lowercase();
        match field_index.get(&query) {
            Some(positions) => {
                let mut sorted = positions.clone();
                sorted.sort_unstable();
                sorted.into_iter().map(|i| &self.records[i]).collect()
            }
            None => Vec::new(),
        }
    }

    /// Like [`SearchableList::search`], returning only the first hit
    pub fn search_first(&self, external_id: &str, look_for: &str) -> Option<&Record> {
        self.search(external_id, look_for).into_iter().next()
    }

    /// Search several fields at once, combining per-field results with
    /// the given mode.
    pub fn search_multiple(
        &self,
        terms: &BTreeMap<String, String>,
        mode: SearchMode,
    ) -> Vec<&Record> {
        if self.records.is_empty() {
            log::warn!("Tried search in empty list.");
            return Vec::new();
        }
        for external_id in terms.keys() {
            if !self.index.contains_key(external_id) {
                log::warn!(
                    "Searching for unknown field \"{}\", field might be null for \
                     every item in this list or not exist at all.",
                    external_id
                );
                if mode == SearchMode::And {
                    return Vec::new();
                }
            }
        }

        let mut combined: Option<BTreeSet<usize>> = None;
        for (external_id, term) in terms {
            let query = term.trim().to_lowercase();
            let positions: BTreeSet<usize> = self
                .index
                .get(external_id)
                .and_then(|field_index| field_index.get(&query))
                .map(|found| found.iter().copied().collect())
                .unwrap_or_default();
            combined = Some(match combined {
                None => positions,
                Some(accumulated) => match mode {
                    SearchMode::And => accumulated.intersection(&positions).copied().collect(),
                    SearchMode::Or => accumulated.union(&positions).copied().collect(),
                },
            });
        }

        combined
            .unwrap_or_default()
            .into_iter()
            .map(|i| &self.records[i])
            .collect()
    }
}

/// Page one app's full item collection into a [`SearchableList`].
pub async fn load_complete_app(session: &Session, app_id: i64) -> Result<SearchableList, Error> {
    let url = session.url(&format!("item/app/{}/filter/", app_id));
    let items = paging::fetch_collection(
        session,
        &url,
        PageMethod::Post,
        session.options().page_size,
        None,
    )
    .await?;

    let mut list = SearchableList::new();
    for item_data in items {
        list.append(Record::from_value(item_data)?)?;
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn crew_member(item_id: i64, name: &str, role: &str) -> Record {
        Record::from_value(json!({
            "item_id": item_id,
            "fields": [
                { "type": "text", "external_id": "name", "values": [{ "value": name }] },
                { "type": "text", "external_id": "role", "values": [{ "value": role }] }
            ]
        }))
        .unwrap()
    }

    fn crew() -> SearchableList {
        let mut list = SearchableList::new();
        list.append(crew_member(1, "Ada", "captain")).unwrap();
        list.append(crew_member(2, "Ben", "deckhand")).unwrap();
        list.append(crew_member(3, "Cleo", "deckhand")).unwrap();
        list
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let list = crew();
        let hits = list.search("role", "  DECKHAND ");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].item_id(), 2);
        assert_eq!(hits[1].item_id(), 3);
    }

    #[test]
    fn unknown_fields_and_empty_lists_find_nothing() {
        assert!(crew().search("rank", "captain").is_empty());
        assert!(SearchableList::new().search("name", "Ada").is_empty());
    }

    #[test]
    fn search_first_returns_the_lowest_position() {
        let list = crew();
        assert_eq!(list.search_first("role", "deckhand").unwrap().item_id(), 2);
        assert!(list.search_first("name", "Nobody").is_none());
    }

    #[test]
    fn multi_field_search_intersects_and_unions() {
        let list = crew();

        let mut terms = BTreeMap::new();
        terms.insert("name".to_string(), "Ben".to_string());
        terms.insert("role".to_string(), "deckhand".to_string());
        let hits = list.search_multiple(&terms, SearchMode::And);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id(), 2);

        let mut terms = BTreeMap::new();
        terms.insert("name".to_string(), "Ada".to_string());
        terms.insert("role".to_string(), "deckhand".to_string());
        let hits = list.search_multiple(&terms, SearchMode::Or);
        assert_eq!(hits.len(), 3);
    }
}
