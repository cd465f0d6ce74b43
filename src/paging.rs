//! Offset-based paging over remote collections
//!
//! The item filter endpoint answers with `{"items": [...], "total": n}`
//! (a `filtered` count takes precedence when present); other endpoints
//! answer with a bare JSON array. Both are aggregated into one in-memory
//! sequence here.

use serde_json::{Map, Value};

use crate::error::Error;
use crate::session::Session;

/// HTTP method used to advance through a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMethod {
    Get,
    Post,
}

/// Fetch every document of an `{"items": ..., "total": ...}` collection.
///
/// Issues repeated requests advancing `offset` by `limit` until the
/// declared total is exhausted. The result preserves the remote order.
pub async fn fetch_collection(
    session: &Session,
    url: &str,
    method: PageMethod,
    limit: u32,
    base_params: Option<&Map<String, Value>>,
) -> Result<Vec<Value>, Error> {
    let mut all_items = Vec::new();

    let first = request_page(session, url, method, limit, 0, base_params).await?;
    let mut first_items = page_items(&first)?;
    log::debug!("Got {} items ...", first_items.len());
    all_items.append(&mut first_items);

    let mut total = first.get("total").and_then(Value::as_u64).unwrap_or(0);
    if let Some(filtered) = first.get("filtered").and_then(Value::as_u64) {
        total = filtered;
    }
    log::debug!("Getting items from offset: 0, total: {}", total);

    let mut offset = u64::from(limit);
    while offset < total {
        log::debug!("Getting items from offset: {}, total: {}", offset, total);
        let page = request_page(session, url, method, limit, offset, base_params).await?;
        all_items.append(&mut page_items(&page)?);
        offset += u64::from(limit);
    }

    log::debug!("Got all items!");
    Ok(all_items)
}

/// Fetch every element of an endpoint answering with a bare JSON array.
///
/// There is no declared total here: iteration stops as soon as a page
/// comes back shorter than the requested limit.
pub async fn fetch_array(
    session: &Session,
    url: &str,
    method: PageMethod,
    limit: u32,
    base_params: Option<&Map<String, Value>>,
) -> Result<Vec<Value>, Error> {
    let mut all_elements = Vec::new();
    let mut offset = 0u64;

    loop {
        let page = request_page(session, url, method, limit, offset, base_params).await?;
        let elements = page
            .as_array()
            .cloned()
            .ok_or_else(|| Error::invalid_value("expected a JSON array response"))?;
        let count = elements.len();
        all_elements.extend(elements);
        if count < limit as usize {
            return Ok(all_elements);
        }
        offset += u64::from(limit);
    }
}

async fn request_page(
    session: &Session,
    url: &str,
    method: PageMethod,
    limit: u32,
    offset: u64,
    base_params: Option<&Map<String, Value>>,
) -> Result<Value, Error> {
    let response = match method {
        PageMethod::Post => {
            let mut params = base_params.cloned().unwrap_or_default();
            params.insert("limit".to_string(), Value::from(limit));
            params.insert("offset".to_string(), Value::from(offset));
            session.post(url, Some(&Value::Object(params))).await?
        }
        PageMethod::Get => {
            let mut query: Vec<(&str, String)> = vec![
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ];
            if let Some(params) = base_params {
                for (key, value) in params {
                    let rendered = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    query.push((key.as_str(), rendered));
                }
            }
            session.get(url, Some(&query)).await?
        }
    };
    let response = Session::check(response).await?;
    Ok(response.json().await?)
}

fn page_items(page: &Value) -> Result<Vec<Value>, Error> {
    page.get("items")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| Error::invalid_value("collection response carries no items array"))
}
