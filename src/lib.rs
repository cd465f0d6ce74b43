//! Podio Rust Client Library
//!
//! A Rust client library and local caching layer for Podio-style
//! work-management APIs: typed field access on items, partial updates
//! of mutated fields, and a SQLite mirror of whole app collections for
//! offline querying.

pub mod cache;
pub mod config;
pub mod error;
pub mod field;
pub mod paging;
pub mod record;
pub mod schema;
pub mod search;
pub mod session;

use std::path::Path;

use rusqlite::Connection;

use crate::cache::CachedItemStore;
use crate::config::ClientOptions;
use crate::error::Error;
use crate::record::Record;
use crate::schema::AppConfigCache;
use crate::session::Session;

/// The main entry point for the Podio Rust client
pub struct Podio {
    session: Session,
    schemas: AppConfigCache,
}

impl Podio {
    /// Create a new client from an API token
    ///
    /// # Example
    ///
    /// ```no_run
    /// use podio_rust::Podio;
    ///
    /// let podio = Podio::new("your-api-token").unwrap();
    /// ```
    pub fn new(token: &str) -> Result<Self, Error> {
        Self::new_with_options(token, ClientOptions::default())
    }

    /// Create a new client with custom options
    ///
    /// # Example
    ///
    /// ```no_run
    /// use podio_rust::{Podio, config::ClientOptions};
    ///
    /// let options = ClientOptions::default().with_robust(false);
    /// let podio = Podio::new_with_options("your-api-token", options).unwrap();
    /// ```
    pub fn new_with_options(token: &str, options: ClientOptions) -> Result<Self, Error> {
        Ok(Self {
            session: Session::new(token, options)?,
            schemas: AppConfigCache::new(),
        })
    }

    /// Create a new client, discovering the token from the environment
    /// (`PODIO_API_KEY`) or a credentials file
    pub fn discover(credentials_file: Option<&Path>) -> Result<Self, Error> {
        let token = config::discover_token(None, credentials_file)?;
        Self::new(&token)
    }

    /// The underlying authenticated session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Fetch one remote item as a [`Record`]
    pub async fn item(&self, item_id: i64) -> Result<Record, Error> {
        let url = self.session.url(&format!("item/{}", item_id));
        let response = self.session.get(&url, None).await?;
        let response = Session::check(response).await?;
        Record::from_value(response.json().await?)
    }

    /// Fetch one remote item with its app schema attached, so that
    /// field lookups can distinguish missing from empty fields
    pub async fn item_with_schema(&mut self, item_id: i64) -> Result<Record, Error> {
        let record = self.item(item_id).await?;
        match record.app_id() {
            Some(app_id) => {
                let schema = self.schemas.get_or_fetch(&self.session, app_id).await?;
                Ok(record.with_app_config(schema))
            }
            None => Ok(record),
        }
    }

    /// Open a [`CachedItemStore`] over a SQLite database
    pub fn cache(&self, conn: Connection) -> Result<CachedItemStore, Error> {
        let mut store = CachedItemStore::new(conn, self.session.clone());
        store.init_cache()?;
        Ok(store)
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::cache::CachedItemStore;
    pub use crate::config::ClientOptions;
    pub use crate::error::Error;
    pub use crate::field::{FieldValue, UpdateValue};
    pub use crate::record::Record;
    pub use crate::search::{SearchMode, SearchableList};
    pub use crate::Podio;
}
