//! Engine tests: open requests, upgrades, transactions and persistence.

use record_store_client::{
    Engine, EngineConfig, IndexParams, Key, ObjectStoreParams, Record, RequestState, StoreError,
    TransactionMode,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn engine_config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        path: dir.path().join("engine"),
        ..Default::default()
    }
}

/// Open `db` at version 1 with an auto-increment "items" store.
fn with_items(engine: &Engine) {
    let mut request = engine.open_database("db", 1);
    request
        .resolve_with(|upgrade| {
            upgrade.create_object_store("items", ObjectStoreParams::auto_increment())?;
            Ok(())
        })
        .unwrap();
}

// --- Open Requests ---

#[test]
fn test_upgrade_runs_only_on_newer_version() {
    let engine = Engine::in_memory();
    let mut calls = Vec::new();

    for version in [1, 1, 2] {
        let mut request = engine.open_database("db", version);
        let conn = request
            .resolve_with(|upgrade| {
                calls.push((upgrade.old_version(), upgrade.new_version()));
                Ok(())
            })
            .unwrap();
        assert_eq!(conn.version(), version);
        assert_eq!(request.state(), RequestState::Success);
    }

    assert_eq!(calls, vec![(0, 1), (1, 2)]);
}

#[test]
fn test_lower_version_is_rejected() {
    let engine = Engine::in_memory();
    engine.open_database("db", 3).resolve().unwrap();

    let mut request = engine.open_database("db", 2);
    let result = request.resolve();

    assert!(matches!(
        result,
        Err(StoreError::VersionError { requested: 2, current: 3 })
    ));
    assert_eq!(request.state(), RequestState::Error);
}

#[test]
fn test_version_zero_is_rejected() {
    let engine = Engine::in_memory();
    let result = engine.open_database("db", 0).resolve();
    assert!(matches!(result, Err(StoreError::InvalidVersion)));
}

#[test]
fn test_request_resolves_once() {
    let engine = Engine::in_memory();
    let mut request = engine.open_database("db", 1);
    assert_eq!(request.state(), RequestState::Pending);

    let conn = request.resolve().unwrap();
    conn.close();

    assert!(matches!(request.resolve(), Err(StoreError::RequestConsumed(_))));
}

#[test]
fn test_upgrade_blocked_by_open_connection() {
    let engine = Engine::in_memory();
    let held = engine.open_database("db", 1).resolve().unwrap();

    let result = engine.open_database("db", 2).resolve();
    assert!(matches!(result, Err(StoreError::Blocked(_))));

    held.close();
    let conn = engine.open_database("db", 2).resolve().unwrap();
    assert_eq!(conn.version(), 2);
}

#[test]
fn test_failed_upgrade_rolls_back() {
    let engine = Engine::in_memory();

    let result = engine.open_database("db", 1).resolve_with(|upgrade| {
        upgrade.create_object_store("items", ObjectStoreParams::auto_increment())?;
        Err(StoreError::Aborted("changed my mind".into()))
    });
    assert!(matches!(result, Err(StoreError::Aborted(_))));

    let mut calls = 0;
    let conn = engine
        .open_database("db", 1)
        .resolve_with(|upgrade| {
            calls += 1;
            assert_eq!(upgrade.old_version(), 0);
            assert!(!upgrade.contains("items"));
            Ok(())
        })
        .unwrap();
    assert_eq!(calls, 1);
    assert!(conn.object_store_names().is_empty());
}

#[test]
fn test_schema_changes_outside_upgrade_are_rejected() {
    let engine = Engine::in_memory();
    with_items(&engine);

    let conn = engine.open_database("db", 1).resolve().unwrap();
    let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
    let mut store = txn.object_store("items").unwrap();

    let result = store.create_index("byName", IndexParams::on("name"));
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));

    drop(txn);
    assert!(matches!(
        conn.transaction(&["items"], TransactionMode::VersionChange),
        Err(StoreError::InvalidOperation(_))
    ));
}

#[test]
fn test_delete_object_store_in_upgrade() {
    let engine = Engine::in_memory();
    with_items(&engine);

    let conn = engine
        .open_database("db", 2)
        .resolve_with(|upgrade| upgrade.delete_object_store("items"))
        .unwrap();
    assert!(conn.object_store_names().is_empty());
}

// --- Transactions ---

#[test]
fn test_add_put_get_delete() {
    let engine = Engine::in_memory();
    with_items(&engine);
    let conn = engine.open_database("db", 1).resolve().unwrap();

    {
        let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let mut store = txn.object_store("items").unwrap();

        assert_eq!(store.add(record(json!({"n": 1})), None).unwrap(), Key::from(1));
        assert_eq!(store.add(record(json!({"n": 2})), None).unwrap(), Key::from(2));
        assert_eq!(store.add(record(json!({"n": 10})), Some(Key::from(10))).unwrap(), Key::from(10));
        // Generator moved past the explicit key.
        assert_eq!(store.add(record(json!({"n": 11})), None).unwrap(), Key::from(11));

        store.put(record(json!({"n": 20})), Some(Key::from(2))).unwrap();
        store.delete(&Key::from(1)).unwrap();
        txn.commit().unwrap();
    }

    let mut txn = conn.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let store = txn.object_store("items").unwrap();
    assert_eq!(
        store.get_all_keys().unwrap(),
        vec![Key::from(2), Key::from(10), Key::from(11)]
    );
    assert_eq!(store.get(&Key::from(2)).unwrap().unwrap()["n"], json!(20));
    assert_eq!(store.count().unwrap(), 3);
}

#[test]
fn test_dropped_transaction_is_rolled_back() {
    let engine = Engine::in_memory();
    with_items(&engine);
    let conn = engine.open_database("db", 1).resolve().unwrap();

    {
        let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let mut store = txn.object_store("items").unwrap();
        store.add(record(json!({"n": 1})), None).unwrap();
        // No commit.
    }
    {
        let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let mut store = txn.object_store("items").unwrap();
        store.add(record(json!({"n": 2})), None).unwrap();
        txn.abort();
    }

    let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
    let mut store = txn.object_store("items").unwrap();
    assert_eq!(store.count().unwrap(), 0);
    // Key generator was rolled back too.
    assert_eq!(store.add(record(json!({})), None).unwrap(), Key::from(1));
}

#[test]
fn test_read_only_transaction_rejects_writes() {
    let engine = Engine::in_memory();
    with_items(&engine);
    let conn = engine.open_database("db", 1).resolve().unwrap();

    let mut txn = conn.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
    let mut store = txn.object_store("items").unwrap();

    assert!(matches!(
        store.put(record(json!({})), Some(Key::from(1))),
        Err(StoreError::ReadOnly)
    ));
    assert!(matches!(store.delete(&Key::from(1)), Err(StoreError::ReadOnly)));
}

#[test]
fn test_transaction_scope() {
    let engine = Engine::in_memory();
    engine
        .open_database("db", 1)
        .resolve_with(|upgrade| {
            upgrade.create_object_store("a", ObjectStoreParams::auto_increment())?;
            upgrade.create_object_store("b", ObjectStoreParams::auto_increment())?;
            Ok(())
        })
        .unwrap();
    let conn = engine.open_database("db", 1).resolve().unwrap();

    assert!(matches!(
        conn.transaction(&["missing"], TransactionMode::ReadOnly),
        Err(StoreError::ObjectStoreNotFound(_))
    ));
    assert!(matches!(
        conn.transaction(&[], TransactionMode::ReadOnly),
        Err(StoreError::InvalidOperation(_))
    ));

    let mut txn = conn.transaction(&["a"], TransactionMode::ReadOnly).unwrap();
    assert_eq!(txn.scope(), vec!["a".to_string()]);
    assert!(matches!(txn.object_store("b"), Err(StoreError::NotInScope(_))));
}

#[test]
fn test_store_without_generator_needs_key() {
    let engine = Engine::in_memory();
    engine
        .open_database("db", 1)
        .resolve_with(|upgrade| {
            upgrade.create_object_store("plain", ObjectStoreParams::default())?;
            Ok(())
        })
        .unwrap();
    let conn = engine.open_database("db", 1).resolve().unwrap();

    let mut txn = conn.transaction(&["plain"], TransactionMode::ReadWrite).unwrap();
    let mut store = txn.object_store("plain").unwrap();
    assert!(matches!(
        store.add(record(json!({"n": 1})), None),
        Err(StoreError::DataError(_))
    ));
    assert_eq!(store.add(record(json!({"n": 1})), Some(Key::from("k"))).unwrap(), Key::from("k"));
}

#[test]
fn test_exhausted_generator_keeps_stored_record() {
    let engine = Engine::in_memory();
    with_items(&engine);
    let conn = engine.open_database("db", 1).resolve().unwrap();

    let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
    {
        let mut store = txn.object_store("items").unwrap();
        store
            .put(record(json!({"v": "original"})), Some(Key::from(i64::MAX)))
            .unwrap();

        assert!(matches!(
            store.put(record(json!({"v": "generated"})), None),
            Err(StoreError::KeyGeneratorExhausted)
        ));
        assert!(matches!(
            store.add(record(json!({"v": "generated"})), None),
            Err(StoreError::KeyGeneratorExhausted)
        ));

        let kept = store.get(&Key::from(i64::MAX)).unwrap().unwrap();
        assert_eq!(kept["v"], json!("original"));
        assert_eq!(store.count().unwrap(), 1);
    }
    txn.commit().unwrap();
}

#[test]
fn test_unique_index() {
    let engine = Engine::in_memory();
    engine
        .open_database("db", 1)
        .resolve_with(|upgrade| {
            let mut store = upgrade.create_object_store(
                "users",
                ObjectStoreParams {
                    auto_increment: true,
                    key_path: Some("id".into()),
                },
            )?;
            store.create_index(
                "byEmail",
                IndexParams {
                    key_path: "email".into(),
                    unique: true,
                },
            )
        })
        .unwrap();
    let conn = engine.open_database("db", 1).resolve().unwrap();

    let mut txn = conn.transaction(&["users"], TransactionMode::ReadWrite).unwrap();
    let mut store = txn.object_store("users").unwrap();

    let key = store.add(record(json!({"email": "a@x.io"})), None).unwrap();
    assert_eq!(key, Key::from(1));
    assert_eq!(store.get(&key).unwrap().unwrap()["id"], json!(1));

    assert!(matches!(
        store.add(record(json!({"email": "a@x.io"})), None),
        Err(StoreError::ConstraintViolation { .. })
    ));

    let index = store.index("byEmail").unwrap();
    assert_eq!(index.get(&Key::from("a@x.io")).unwrap()["id"], json!(1));
    assert_eq!(index.get_all(&Key::from("a@x.io")).len(), 1);
    assert!(matches!(store.index("nope"), Err(StoreError::IndexNotFound(_))));
}

#[test]
fn test_clear() {
    let engine = Engine::in_memory();
    with_items(&engine);
    let conn = engine.open_database("db", 1).resolve().unwrap();

    let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
    let mut store = txn.object_store("items").unwrap();
    store.add(record(json!({})), None).unwrap();
    store.clear().unwrap();
    assert_eq!(store.count().unwrap(), 0);
    txn.commit().unwrap();

    assert_eq!(conn.stats().record_count, 0);
}

#[test]
fn test_concurrent_writers() {
    let engine = Engine::in_memory();
    with_items(&engine);
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..25 {
                    let conn = engine.open_database("db", 1).resolve().unwrap();
                    let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
                    let mut store = txn.object_store("items").unwrap();
                    store.add(record(json!({"thread": t, "i": i})), None).unwrap();
                    txn.commit().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = engine.database_stats("db").unwrap().unwrap();
    assert_eq!(stats.record_count, 100);
}

#[test]
fn test_concurrent_first_opens_upgrade_once() {
    let engine = Engine::in_memory();
    let upgrades = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let upgrades = Arc::clone(&upgrades);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine
                    .open_database("db", 1)
                    .resolve_with(|upgrade| {
                        assert_eq!(upgrade.old_version(), 0);
                        upgrades.fetch_add(1, Ordering::SeqCst);
                        upgrade.create_object_store("items", ObjectStoreParams::auto_increment())?;
                        Ok(())
                    })
                    .map(|conn| conn.version())
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 1);
    }
    assert_eq!(upgrades.load(Ordering::SeqCst), 1);
}

// --- Persistence ---

#[test]
fn test_reopen_restores_schema_and_data() {
    let dir = TempDir::new().unwrap();

    {
        let engine = Engine::create(engine_config(&dir)).unwrap();
        engine
            .open_database("db", 1)
            .resolve_with(|upgrade| {
                let mut store = upgrade.create_object_store("items", ObjectStoreParams::auto_increment())?;
                store.create_index("itemsIndex", IndexParams::on("id"))
            })
            .unwrap();

        let conn = engine.open_database("db", 1).resolve().unwrap();
        let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let mut store = txn.object_store("items").unwrap();
        store.add(record(json!({"id": "a"})), None).unwrap();
        store.add(record(json!({"id": "b"})), None).unwrap();
        txn.commit().unwrap();
    }

    let engine = Engine::open(engine_config(&dir)).unwrap();
    let conn = engine.open_database("db", 1).resolve().unwrap();
    assert_eq!(conn.version(), 1);

    let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
    let mut store = txn.object_store("items").unwrap();
    assert_eq!(store.index("itemsIndex").unwrap().get_key(&Key::from("b")), Some(Key::from(2)));
    // The key generator is restored as well.
    assert_eq!(store.add(record(json!({})), None).unwrap(), Key::from(3));
}

#[test]
fn test_uncommitted_changes_are_not_persisted() {
    let dir = TempDir::new().unwrap();

    {
        let engine = Engine::create(engine_config(&dir)).unwrap();
        with_items(&engine);
        let conn = engine.open_database("db", 1).resolve().unwrap();
        let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let mut store = txn.object_store("items").unwrap();
        store.add(record(json!({"n": 1})), None).unwrap();
    }

    let engine = Engine::open(engine_config(&dir)).unwrap();
    assert_eq!(engine.database_stats("db").unwrap().unwrap().record_count, 0);
}

#[test]
fn test_checkpoint_and_reopen() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        checkpoint_interval: 3,
        ..engine_config(&dir)
    };

    {
        let engine = Engine::create(config.clone()).unwrap();
        with_items(&engine);
        for n in 0..10 {
            let conn = engine.open_database("db", 1).resolve().unwrap();
            let mut txn = conn.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
            let mut store = txn.object_store("items").unwrap();
            store.add(record(json!({"n": n})), None).unwrap();
            txn.commit().unwrap();
        }
        engine.checkpoint().unwrap();
    }

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.database_stats("db").unwrap().unwrap().record_count, 10);
}

#[test]
fn test_engine_lock() {
    let dir = TempDir::new().unwrap();
    let _engine = Engine::create(engine_config(&dir)).unwrap();

    let result = Engine::open(engine_config(&dir));
    assert!(matches!(result, Err(StoreError::Locked)));
}

#[test]
fn test_open_missing_engine() {
    let dir = TempDir::new().unwrap();
    let result = Engine::open_or_create(EngineConfig {
        create_if_missing: false,
        ..engine_config(&dir)
    });
    assert!(matches!(result, Err(StoreError::NotInitialized)));
}

#[test]
fn test_database_names_and_delete() {
    let dir = TempDir::new().unwrap();

    {
        let engine = Engine::create(engine_config(&dir)).unwrap();
        engine.open_database("alpha", 1).resolve().unwrap();
        engine.open_database("beta db", 1).resolve().unwrap();
        assert_eq!(
            engine.database_names().unwrap(),
            vec!["alpha".to_string(), "beta db".to_string()]
        );
    }

    let engine = Engine::open(engine_config(&dir)).unwrap();
    assert_eq!(
        engine.database_names().unwrap(),
        vec!["alpha".to_string(), "beta db".to_string()]
    );

    let held = engine.open_database("alpha", 1).resolve().unwrap();
    assert!(matches!(engine.delete_database("alpha"), Err(StoreError::Blocked(_))));
    held.close();

    engine.delete_database("alpha").unwrap();
    engine.delete_database("never-existed").unwrap();
    assert_eq!(engine.database_names().unwrap(), vec!["beta db".to_string()]);

    // A deleted database starts over at version 0.
    let mut calls = 0;
    engine
        .open_database("alpha", 1)
        .resolve_with(|upgrade| {
            calls += 1;
            assert_eq!(upgrade.old_version(), 0);
            Ok(())
        })
        .unwrap();
    assert_eq!(calls, 1);
}
