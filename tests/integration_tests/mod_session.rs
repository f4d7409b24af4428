use super::support::{FooQuery, User, setup};
use rdb::DbError;
use serde_json::json;

#[tokio::test]
async fn test_single_store_goes_direct() {
    let (store, db) = setup().await;
    let mut foo = FooQuery::new("foo-queries/1", "Foo1", 1);
    let mut session = db.session();
    session.store(&mut foo);
    assert_eq!(session.pending(), 1);
    session.save_changes().await.unwrap();
    assert_eq!(session.pending(), 0);
    drop(session);

    assert!(!foo.tracking.change_vector.is_empty());
    assert_eq!(store.requests_to("PUT", "/docs").len(), 1);
    assert!(store.requests_to("POST", "/bulk_docs").is_empty());
    assert_eq!(store.requests_to("PUT", "/docs")[0].param("id"), Some("foo-queries/1"));
    assert!(store.requests_to("PUT", "/docs")[0].if_match.is_none(), "new models send no If-Match");
}

#[tokio::test]
async fn test_bulk_save_assigns_ids_and_vectors() {
    let (store, db) = setup().await;
    let mut ann = User::new("Ann", "acme", 25);
    let mut foo = FooQuery::new("foo-queries/7", "Foo7", 7);
    let mut session = db.session();
    session.store(&mut ann);
    session.store(&mut foo);
    session.save_changes().await.unwrap();
    drop(session);

    assert!(ann.tracking.id.starts_with("users/"));
    assert!(!ann.tracking.change_vector.is_empty());
    assert_eq!(foo.tracking.id, "foo-queries/7");
    assert_eq!(foo.tracking.change_vector, store.doc("foo-queries/7").unwrap().change_vector);

    let bulk = store.requests_to("POST", "/bulk_docs");
    assert_eq!(bulk.len(), 1);
    let commands = bulk[0].body["Commands"].as_array().unwrap();
    assert_eq!(commands[0]["Type"], json!("PUT"));
    assert_eq!(commands[0]["Id"], json!("users/"));
    assert_eq!(commands[0]["Document"]["@metadata"]["@collection"], json!("users"));
    assert_eq!(commands[1]["Id"], json!("foo-queries/7"));
    assert!(store.requests_to("PUT", "/docs").is_empty());
}

#[tokio::test]
async fn test_bulk_conflict_applies_nothing() {
    let (store, db) = setup().await;
    let foos = db.collection::<FooQuery>();
    let mut a = FooQuery::new("foo-queries/1", "Foo1", 1);
    foos.put(&mut a).await.unwrap();
    let mut stale = foos.get("foo-queries/1").await.unwrap();
    a.rank = 2;
    foos.put(&mut a).await.unwrap();

    let mut fresh = FooQuery::new("foo-queries/2", "Foo2", 2);
    stale.rank = 3;
    let mut session = db.session();
    session.store(&mut fresh);
    session.store(&mut stale);
    let err = session.save_changes().await.unwrap_err();
    assert!(err.is_concurrent_transaction(), "got {err}");
    assert_eq!(session.pending(), 0, "the queue is emptied even when saving fails");
    drop(session);

    assert!(store.doc("foo-queries/2").is_none());
    assert_eq!(foos.get("foo-queries/1").await.unwrap().rank, 2);
}

#[tokio::test]
async fn test_delete_without_change_vector_fails_before_sending() {
    let (store, db) = setup().await;
    store.insert("foo-queries/1", "foo-queries", json!({"DisplayName": "Foo1", "Rank": 1}));
    let mut unloaded = FooQuery::new("foo-queries/1", "Foo1", 1);
    let mut other = FooQuery::new("foo-queries/2", "Foo2", 2);

    let mut session = db.session();
    session.store(&mut other);
    session.delete(&mut unloaded);
    store.clear_requests();
    let err = session.save_changes().await.unwrap_err();
    match err.root() {
        DbError::Model(msg) => assert!(msg.contains("retrieve the model before deleting it"), "{msg}"),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(session.pending(), 0);
    assert!(store.requests().is_empty());
    assert!(store.doc("foo-queries/1").is_some());
}

#[tokio::test]
async fn test_mixed_deletes_in_one_bulk() {
    let (store, db) = setup().await;
    for i in 1..=3 {
        store.insert(&format!("foo-queries/{i}"), "foo-queries", json!({"DisplayName": format!("Foo{i}"), "Rank": i}));
    }
    store.insert("logs/a", "logs", json!({}));
    store.insert("logs/b", "logs", json!({}));
    let foos = db.collection::<FooQuery>();
    let mut loaded = foos.get("foo-queries/1").await.unwrap();

    let mut session = db.session();
    session.delete(&mut loaded);
    session.delete_id("foo-queries/2");
    session.delete_prefix("logs/");
    session.save_changes().await.unwrap();
    drop(session);

    assert!(loaded.tracking.change_vector.is_empty());
    assert_eq!(foos.query().get_all_ids().await.unwrap(), vec!["foo-queries/3"]);
    assert_eq!(store.doc_count(), 1);
    let commands = store.requests_to("POST", "/bulk_docs")[0].body["Commands"].clone();
    assert_eq!(commands[2], json!({"Type": "DELETE", "Id": "logs/", "IdPrefixed": true}));
}

#[tokio::test]
async fn test_lone_prefix_delete_is_sent_in_bulk() {
    let (store, db) = setup().await;
    store.insert("logs/a", "logs", json!({}));
    let mut session = db.session();
    session.delete_prefix("logs/");
    session.save_changes().await.unwrap();
    assert_eq!(store.requests_to("POST", "/bulk_docs").len(), 1);
    assert_eq!(store.doc_count(), 0);
}

#[tokio::test]
async fn test_single_delete_by_id_and_clear() {
    let (store, db) = setup().await;
    store.insert("foo-queries/1", "foo-queries", json!({"DisplayName": "Foo1", "Rank": 1}));
    let mut session = db.session();
    session.delete_id("foo-queries/1");
    session.save_changes().await.unwrap();
    assert!(store.doc("foo-queries/1").is_none());
    assert!(store.requests_to("DELETE", "/docs")[0].if_match.is_none());

    session.delete_id("foo-queries/9");
    session.clear();
    assert_eq!(session.pending(), 0);
    session.save_changes().await.unwrap();
    assert_eq!(store.requests_to("DELETE", "/docs").len(), 1);
}

#[tokio::test]
async fn test_missing_database_is_reported() {
    let (_store, db) = setup().await;
    let other = rdb::Database::open(db.connection().clone(), "nowhere");
    let mut foo = FooQuery::new("foo-queries/1", "Foo1", 1);
    let mut session = other.session();
    session.store(&mut foo);
    let err = session.save_changes().await.unwrap_err();
    assert!(err.is_database_does_not_exist(), "got {err}");
    match err.root() {
        DbError::DatabaseDoesNotExist(name) => assert_eq!(name, "nowhere"),
        other => panic!("unexpected error {other}"),
    }
}
