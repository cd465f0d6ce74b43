use std::collections::BTreeMap;

use mockito::{Matcher, Server};
use rusqlite::Connection;
use serde_json::{json, Value};

use podio_rust::cache::CachedItemStore;
use podio_rust::config::ClientOptions;
use podio_rust::error::Error;
use podio_rust::record::Record;
use podio_rust::session::Session;
use podio_rust::Podio;

fn boat_item(item_id: i64, name: &str, length: &str) -> Value {
    json!({
        "item_id": item_id,
        "app": { "app_id": 77 },
        "link": format!("https://example.com/items/{}", item_id),
        "fields": [
            { "type": "text", "external_id": "name", "values": [{ "value": name }] },
            { "type": "number", "external_id": "length", "values": [{ "value": length }] }
        ]
    })
}

fn boat_schema(field_count: usize) -> Value {
    let fields = [
        json!({ "type": "text", "external_id": "name" }),
        json!({ "type": "number", "external_id": "length" }),
    ];
    json!({ "app_id": 77, "fields": fields[..field_count].to_vec() })
}

fn collection(items: Vec<Value>) -> String {
    let total = items.len();
    json!({ "items": items, "total": total }).to_string()
}

fn test_session(url: &str) -> Session {
    let options = ClientOptions::default()
        .with_base_url(url)
        .with_robust(false);
    Session::new("test-token", options).unwrap()
}

fn memory_store(server: &Server) -> CachedItemStore {
    CachedItemStore::new(
        Connection::open_in_memory().unwrap(),
        test_session(&server.url()),
    )
}

#[tokio::test]
async fn cache_app_populates_and_answers_lookups() {
    let mut server = Server::new_async().await;
    let _filter = server
        .mock("POST", "/item/app/77/filter/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(collection(vec![
            boat_item(1001, "Bow of boat", "4"),
            boat_item(1002, "Stern of boat", "2"),
        ]))
        .create_async()
        .await;

    let mut store = memory_store(&server);
    let count = store.cache_app(77, &["name"], Some(&["name"])).await.unwrap();
    assert_eq!(count, 2);

    let record = store.get_by_id(77, 1001).unwrap();
    assert_eq!(record.item_id(), 1001);
    assert_eq!(record.get("name").unwrap().unwrap().as_str(), Some("Bow of boat"));

    let record = store.get_by_natural_key(77, &["Stern of boat"]).unwrap();
    assert_eq!(record.item_id(), 1002);

    let mut select = BTreeMap::new();
    select.insert("name".to_string(), "Bow of boat".to_string());
    assert_eq!(store.get_by_join_ids(77, &select).unwrap().item_id(), 1001);

    assert!(matches!(
        store.get_by_id(77, 9999),
        Err(Error::CachedItemNotFound(_))
    ));
}

#[tokio::test]
async fn referenced_lookups_respect_the_allow_list() {
    let mut server = Server::new_async().await;
    let _filter = server
        .mock("POST", "/item/app/77/filter/")
        .with_status(200)
        .with_body(collection(vec![
            boat_item(1001, "Bow of boat", "4"),
            boat_item(1002, "Stern of boat", "2"),
        ]))
        .create_async()
        .await;

    let mut store = memory_store(&server);
    store.cache_app(77, &["name"], Some(&["name"])).await.unwrap();

    let mut select = BTreeMap::new();
    select.insert("name".to_string(), "Bow of boat".to_string());

    let hit = store.get_referenced(77, &[1001, 1002], &select).unwrap();
    assert_eq!(hit.item_id(), 1001);

    // The matching row exists but sits outside the allow-list.
    assert!(matches!(
        store.get_referenced(77, &[1002], &select),
        Err(Error::CachedItemNotFound(_))
    ));

    // An empty allow-list can never match anything.
    assert!(matches!(
        store.get_referenced(77, &[], &select),
        Err(Error::CachedItemNotFound(_))
    ));
}

#[tokio::test]
async fn caching_twice_is_idempotent_and_adds_new_columns() {
    let mut server = Server::new_async().await;
    let _filter = server
        .mock("POST", "/item/app/77/filter/")
        .with_status(200)
        .with_body(collection(vec![
            boat_item(1001, "Bow of boat", "4"),
            boat_item(1002, "Stern of boat", "2"),
        ]))
        .create_async()
        .await;

    let mut store = memory_store(&server);
    store.cache_app(77, &["name"], Some(&["name"])).await.unwrap();
    // Re-caching with an extra projection column keeps the row count and
    // widens the table instead of failing.
    store
        .cache_app(77, &["name", "length"], Some(&["name"]))
        .await
        .unwrap();

    let rows: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM podio_app_77", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 2);

    let length: String = store
        .connection()
        .query_row(
            "SELECT \"length\" FROM podio_app_77 WHERE item_id = 1001",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(length, "4.0000");
}

#[tokio::test]
async fn duplicate_natural_keys_fail_the_population() {
    let mut server = Server::new_async().await;
    let _filter = server
        .mock("POST", "/item/app/77/filter/")
        .with_status(200)
        .with_body(collection(vec![
            boat_item(1001, "Bow of boat", "4"),
            boat_item(1002, "Bow of boat", "2"),
        ]))
        .create_async()
        .await;

    let mut store = memory_store(&server);
    match store.cache_app(77, &[], Some(&["name"])).await {
        Err(Error::DuplicateNaturalKey(_)) => {}
        other => panic!("expected DuplicateNaturalKey, got {:?}", other),
    }
}

#[tokio::test]
async fn save_item_sends_tainted_fields_and_resyncs_the_row() {
    let mut server = Server::new_async().await;
    let _filter = server
        .mock("POST", "/item/app/77/filter/")
        .with_status(200)
        .with_body(collection(vec![boat_item(1001, "Bow of boat", "4")]))
        .create_async()
        .await;
    let put = server
        .mock("PUT", "/item/1001/value")
        .match_body(Matcher::Json(json!({ "name": "Bow of ship" })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let mut store = memory_store(&server);
    store.cache_app(77, &["name"], Some(&["name"])).await.unwrap();

    let mut record = store.get_by_id(77, 1001).unwrap();
    record.set("name", "Bow of ship").unwrap();
    store.save_item(&mut record).await.unwrap();
    assert!(record.tainted().is_empty());

    // An untainted record never touches the network.
    store.save_item(&mut record).await.unwrap();
    put.assert_async().await;

    let name: String = store
        .connection()
        .query_row(
            "SELECT \"name\" FROM podio_app_77 WHERE item_id = 1001",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(name, "Bow of ship");
}

#[tokio::test]
async fn create_item_round_trips_through_the_cache() {
    let mut server = Server::new_async().await;
    let _filter = server
        .mock("POST", "/item/app/77/filter/")
        .with_status(200)
        .with_body(collection(vec![boat_item(1001, "Bow of boat", "4")]))
        .create_async()
        .await;
    let create = server
        .mock("POST", "/item/app/77/")
        .match_body(Matcher::Json(json!({ "fields": { "name": "Dinghy" } })))
        .with_status(200)
        .with_body(boat_item(1003, "Dinghy", "1").to_string())
        .create_async()
        .await;

    let mut store = memory_store(&server);
    store.cache_app(77, &["name"], Some(&["name"])).await.unwrap();

    let record = store
        .create_item(77, json!({ "name": "Dinghy" }))
        .await
        .unwrap();
    assert_eq!(record.item_id(), 1003);
    create.assert_async().await;

    let cached = store.get_by_natural_key(77, &["Dinghy"]).unwrap();
    assert_eq!(cached.item_id(), 1003);
}

#[tokio::test]
async fn unconfigured_apps_are_rejected() {
    let server = Server::new_async().await;
    let mut store = memory_store(&server);

    match store.create_item(55, json!({})).await {
        Err(Error::AppNotCached(55)) => {}
        other => panic!("expected AppNotCached, got {:?}", other),
    }

    let record = Record::from_value(boat_item(5, "Orphan", "1")).unwrap();
    match store.update_item(&record) {
        Err(Error::AppNotCached(77)) => {}
        other => panic!("expected AppNotCached, got {:?}", other),
    }
}

#[tokio::test]
async fn persisted_configuration_survives_a_reconnect() {
    let mut server = Server::new_async().await;
    let _filter = server
        .mock("POST", "/item/app/77/filter/")
        .with_status(200)
        .with_body(collection(vec![boat_item(1001, "Bow of boat", "4")]))
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    {
        let mut store = CachedItemStore::new(
            Connection::open(&path).unwrap(),
            test_session(&server.url()),
        );
        store.cache_app(77, &["name"], Some(&["name"])).await.unwrap();
    }

    let mut store = CachedItemStore::new(
        Connection::open(&path).unwrap(),
        test_session(&server.url()),
    );
    store.init_cache().unwrap();

    let record = store.get_by_natural_key(77, &["Bow of boat"]).unwrap();
    assert_eq!(record.item_id(), 1001);
    // The projection configuration was restored, so local re-projection
    // works without another cache_app call.
    store.update_item(&record).unwrap();
}

#[tokio::test]
async fn init_cache_on_a_fresh_database_is_empty() {
    let server = Server::new_async().await;
    let mut store = memory_store(&server);
    store.init_cache().unwrap();

    let record = Record::from_value(boat_item(5, "Orphan", "1")).unwrap();
    assert!(matches!(
        store.update_item(&record),
        Err(Error::AppNotCached(77))
    ));
}

#[tokio::test]
async fn collection_paging_walks_every_offset() {
    let mut server = Server::new_async().await;
    let page1 = server
        .mock("POST", "/item/app/99/filter/")
        .match_body(Matcher::PartialJson(json!({ "limit": 2, "offset": 0 })))
        .with_status(200)
        .with_body(
            json!({
                "items": [boat_item(1, "One", "1"), boat_item(2, "Two", "2")],
                "total": 3
            })
            .to_string(),
        )
        .create_async()
        .await;
    let page2 = server
        .mock("POST", "/item/app/99/filter/")
        .match_body(Matcher::PartialJson(json!({ "limit": 2, "offset": 2 })))
        .with_status(200)
        .with_body(json!({ "items": [boat_item(3, "Three", "3")], "total": 3 }).to_string())
        .create_async()
        .await;

    let options = ClientOptions::default()
        .with_base_url(&server.url())
        .with_robust(false)
        .with_page_size(2);
    let session = Session::new("test-token", options).unwrap();
    let mut store = CachedItemStore::new(Connection::open_in_memory().unwrap(), session);

    let count = store.cache_app(99, &[], None).await.unwrap();
    assert_eq!(count, 3);
    page1.assert_async().await;
    page2.assert_async().await;
}

#[tokio::test]
async fn filtered_count_takes_precedence_over_total() {
    let mut server = Server::new_async().await;
    let only_page = server
        .mock("POST", "/item/app/99/filter/")
        .with_status(200)
        .with_body(
            json!({
                "items": [boat_item(1, "One", "1")],
                "total": 500,
                "filtered": 1
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let options = ClientOptions::default()
        .with_base_url(&server.url())
        .with_robust(false)
        .with_page_size(2);
    let session = Session::new("test-token", options).unwrap();
    let mut store = CachedItemStore::new(Connection::open_in_memory().unwrap(), session);

    let count = store.cache_app(99, &[], None).await.unwrap();
    assert_eq!(count, 1);
    only_page.assert_async().await;
}

#[tokio::test]
async fn refreshing_with_colliding_keys_still_raises() {
    let mut server = Server::new_async().await;
    let clean = server
        .mock("POST", "/item/app/77/filter/")
        .with_status(200)
        .with_body(collection(vec![
            boat_item(1001, "Bow of boat", "4"),
            boat_item(1002, "Stern of boat", "2"),
        ]))
        .create_async()
        .await;

    let mut store = memory_store(&server);
    store.cache_app(77, &[], Some(&["name"])).await.unwrap();
    clean.remove_async().await;

    // The next refresh brings back items whose natural keys collide.
    // The existing unique index must not let the upsert merge them.
    let colliding = server
        .mock("POST", "/item/app/77/filter/")
        .with_status(200)
        .with_body(collection(vec![
            boat_item(1001, "Bow of boat", "4"),
            boat_item(1002, "Bow of boat", "2"),
        ]))
        .create_async()
        .await;
    match store.cache_app(77, &[], Some(&["name"])).await {
        Err(Error::DuplicateNaturalKey(_)) => {}
        other => panic!("expected DuplicateNaturalKey, got {:?}", other),
    }
    colliding.assert_async().await;
}

#[tokio::test]
async fn app_schemas_are_fetched_once_and_attached_to_lookups() {
    let mut server = Server::new_async().await;
    let _filter = server
        .mock("POST", "/item/app/77/filter/")
        .with_status(200)
        .with_body(collection(vec![boat_item(1001, "Bow of boat", "4")]))
        .create_async()
        .await;
    let schema_mock = server
        .mock("GET", "/app/77")
        .with_status(200)
        .with_body(boat_schema(2).to_string())
        .expect(1)
        .create_async()
        .await;

    let mut store = memory_store(&server);
    store.cache_app(77, &["name"], Some(&["name"])).await.unwrap();

    // Before any schema fetch, lookups carry no schema.
    assert!(store.get_by_id(77, 1001).unwrap().app_config().is_none());

    let first = store.app_config(77).await.unwrap();
    let second = store.app_config(77).await.unwrap();
    assert_eq!(first.app_id, 77);
    assert_eq!(second.fields.len(), 2);
    // Repeated access hits the remote service exactly once.
    schema_mock.assert_async().await;

    // The memoized schema rides along on cache hits, so an unknown
    // field is provably absent instead of merely unknowable.
    let record = store.get_by_id(77, 1001).unwrap();
    assert!(record.app_config().is_some());
    assert!(matches!(
        record.get("does_not_exist"),
        Err(Error::FieldNotFound(_))
    ));
}

#[tokio::test]
async fn invalidating_a_schema_forces_a_refetch() {
    let mut server = Server::new_async().await;
    let stale = server
        .mock("GET", "/app/77")
        .with_status(200)
        .with_body(boat_schema(1).to_string())
        .expect(1)
        .create_async()
        .await;

    let mut store = memory_store(&server);
    assert_eq!(store.app_config(77).await.unwrap().fields.len(), 1);
    stale.assert_async().await;
    stale.remove_async().await;

    let fresh = server
        .mock("GET", "/app/77")
        .with_status(200)
        .with_body(boat_schema(2).to_string())
        .expect(1)
        .create_async()
        .await;

    // Still memoized: no request goes out until the schema is dropped.
    assert_eq!(store.app_config(77).await.unwrap().fields.len(), 1);

    assert!(store.invalidate_app_config(77).is_some());
    assert_eq!(store.app_config(77).await.unwrap().fields.len(), 2);
    fresh.assert_async().await;
}

#[tokio::test]
async fn client_items_attach_schemas_lazily() {
    let mut server = Server::new_async().await;
    let _item = server
        .mock("GET", "/item/1001")
        .with_status(200)
        .with_body(boat_item(1001, "Bow of boat", "4").to_string())
        .create_async()
        .await;
    let schema_mock = server
        .mock("GET", "/app/77")
        .with_status(200)
        .with_body(boat_schema(2).to_string())
        .expect(1)
        .create_async()
        .await;

    let options = ClientOptions::default()
        .with_base_url(&server.url())
        .with_robust(false);
    let mut podio = Podio::new_with_options("test-token", options).unwrap();

    let plain = podio.session(); // the session is reachable for raw calls
    assert!(plain.options().base_url.starts_with("http"));

    let bare = podio.item(1001).await.unwrap();
    assert_eq!(bare.item_id(), 1001);
    assert!(bare.app_config().is_none());

    let first = podio.item_with_schema(1001).await.unwrap();
    assert!(first.app_config().is_some());
    let second = podio.item_with_schema(1001).await.unwrap();
    assert!(second.app_config().is_some());
    // Two schema-bound items, one schema fetch.
    schema_mock.assert_async().await;
}

#[tokio::test]
async fn delete_item_is_not_supported() {
    let server = Server::new_async().await;
    let store = memory_store(&server);
    assert!(matches!(
        store.delete_item(77, 1001),
        Err(Error::NotImplemented(_))
    ));
}
