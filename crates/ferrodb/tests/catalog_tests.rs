//! Catalog integration tests.
//!
//! Creation, two-phase drop, rename identity, metadata round-trips,
//! rollback, and the administrative command surface.

use std::sync::Arc;

use ferrodb::catalog::index::IndexDescriptor;
use ferrodb::operation::with_write_unit_of_work;
use ferrodb::{
    build_find_executor, commands, Error, OperationContext, QueryRequest, ServerEnv,
};
use ferrodb_concurrency::{LockMode, ResourceId};
use ferrodb_core::{
    CollectionOptions, Document, KeyPattern, NamespaceString, OpTime, Timestamp,
};
use ferrodb_storage::StorageEngine;

fn op_time(secs: u32) -> OpTime {
    OpTime::new(Timestamp::new(secs, 0), 1)
}

/// Take global IX and the database X lock, run `f` in a write unit of
/// work, release afterwards.
fn with_db_x<T>(
    opctx: &mut OperationContext,
    db: &str,
    f: impl FnOnce(&mut OperationContext) -> ferrodb::Result<T>,
) -> ferrodb::Result<T> {
    opctx.locker().lock_global(LockMode::IntentExclusive)?;
    let db_resource = ResourceId::for_database(db);
    opctx.locker().lock(db_resource, LockMode::Exclusive, None, false)?;
    let result = with_write_unit_of_work(opctx, f);
    opctx.locker().unlock(db_resource);
    opctx.locker().unlock_global();
    result
}

fn create_collection(
    env: &Arc<ServerEnv>,
    opctx: &mut OperationContext,
    ns: &str,
    options: CollectionOptions,
) -> Arc<ferrodb::CollectionDescriptor> {
    let ns = NamespaceString::parse(ns).expect("namespace");
    with_db_x(opctx, ns.db(), |opctx| env.catalog.create_collection(opctx, &ns, options))
        .expect("create collection")
}

// ============================================================================
// Creation
// ============================================================================

#[test]
fn create_builds_id_index_and_registers_uuid() {
    let env = ServerEnv::in_memory();
    let mut opctx = env.new_operation();

    let coll = create_collection(&env, &mut opctx, "app.users", CollectionOptions::default());
    assert_eq!(coll.index_catalog().index_count(), 1);
    assert!(coll.index_catalog().id_index().is_some());

    let resolved = env.catalog.get_collection("app.users").expect("resolves");
    assert_eq!(resolved.uuid(), coll.uuid());
    assert_eq!(env.catalog.lookup_by_uuid(coll.uuid()).map(|c| c.ns()), Some(coll.ns()));
    assert_eq!(env.catalog.cached_uuid("app.users"), Some(coll.uuid()), "lookup refreshed cache");
}

#[test]
fn create_rejects_duplicates_and_bad_names() {
    let env = ServerEnv::in_memory();
    let mut opctx = env.new_operation();
    create_collection(&env, &mut opctx, "app.users", CollectionOptions::default());

    let ns = NamespaceString::parse("app.users").unwrap();
    let err = with_db_x(&mut opctx, "app", |opctx| {
        env.catalog.create_collection(opctx, &ns, CollectionOptions::default())
    })
    .expect_err("duplicate");
    assert!(matches!(err, Error::NamespaceExists(_)));

    let oplog = NamespaceString::parse("local.oplog.rs").unwrap();
    let err = with_db_x(&mut opctx, "local", |opctx| {
        env.catalog.create_collection(opctx, &oplog, CollectionOptions::default())
    })
    .expect_err("uncapped oplog");
    assert!(matches!(err, Error::BadValue(_)));
}

#[test]
fn create_rolls_back_with_the_unit_of_work() {
    let env = ServerEnv::in_memory();
    let mut opctx = env.new_operation();
    let ns = NamespaceString::parse("app.ghost").unwrap();

    let result: ferrodb::Result<()> = {
        let catalog = Arc::clone(&env.catalog);
        opctx.locker().lock_global(LockMode::IntentExclusive).expect("global");
        let db_resource = ResourceId::for_database("app");
        opctx.locker().lock(db_resource, LockMode::Exclusive, None, false).expect("db");
        let result = with_write_unit_of_work(&mut opctx, |opctx| {
            let created =
                catalog.create_collection(opctx, &ns, CollectionOptions::default())?;
            assert_eq!(created.state(), ferrodb::CollectionState::Creating);
            Err(Error::BadValue("abort the transaction".into()))
        });
        opctx.locker().unlock(db_resource);
        opctx.locker().unlock_global();
        result
    };
    assert!(result.is_err());

    assert!(env.catalog.get_collection("app.ghost").is_none());
    assert!(env.catalog.engine().get_record_store("app.ghost").is_none());
}

// ============================================================================
// Two-phase drop (S3)
// ============================================================================

#[test]
fn replicated_drop_is_two_phase() {
    let env = ServerEnv::in_memory();
    env.catalog.set_replication_active(true);
    let mut opctx = env.new_operation();

    let coll = create_collection(&env, &mut opctx, "app.orders", CollectionOptions::default());
    let drop_time = op_time(100);
    let dpns = coll.ns().make_drop_pending(drop_time);

    with_db_x(&mut opctx, "app", |opctx| {
        env.catalog.drop_collection(
            opctx,
            &NamespaceString::parse("app.orders").unwrap(),
            drop_time,
        )
    })
    .expect("drop");

    // Phase one: the name no longer resolves, but storage survives
    // under the drop-pending namespace.
    assert!(env.catalog.get_collection("app.orders").is_none());
    assert!(env.catalog.engine().get_record_store("app.orders").is_none());
    assert!(env.catalog.engine().get_record_store(dpns.as_str()).is_some());
    assert_eq!(env.catalog.reaper().earliest_drop_op_time(), Some(drop_time));

    // A commit point short of the drop optime reaps nothing.
    env.catalog.notify_commit_point(op_time(99));
    assert!(env.catalog.engine().get_record_store(dpns.as_str()).is_some());

    // Phase two: the commit point passes the drop optime.
    env.catalog.notify_commit_point(op_time(100));
    assert!(env.catalog.engine().get_record_store(dpns.as_str()).is_none());
    assert!(env.catalog.lookup_by_uuid(coll.uuid()).is_none());
    assert_eq!(env.catalog.reaper().pending_count(), 0);
}

#[test]
fn unreplicated_drop_is_immediate() {
    let env = ServerEnv::in_memory();
    let mut opctx = env.new_operation();

    create_collection(&env, &mut opctx, "app.tmp", CollectionOptions::default());
    with_db_x(&mut opctx, "app", |opctx| {
        env.catalog.drop_collection(opctx, &NamespaceString::parse("app.tmp").unwrap(), op_time(5))
    })
    .expect("drop");

    assert!(env.catalog.get_collection("app.tmp").is_none());
    assert!(env.catalog.engine().get_record_store("app.tmp").is_none());
    assert_eq!(env.catalog.reaper().pending_count(), 0);
}

#[test]
fn system_collections_are_protected() {
    let env = ServerEnv::in_memory();
    let mut opctx = env.new_operation();

    create_collection(&env, &mut opctx, "app.system.js", CollectionOptions::default());
    let err = with_db_x(&mut opctx, "app", |opctx| {
        env.catalog.drop_collection(
            opctx,
            &NamespaceString::parse("app.system.js").unwrap(),
            OpTime::null(),
        )
    })
    .expect_err("protected");
    assert!(matches!(err, Error::IllegalOperation(_)));

    // system.profile is droppable only while profiling is off.
    create_collection(&env, &mut opctx, "app.system.profile", CollectionOptions::default());
    env.catalog.get_database("app").unwrap().set_profile_level(1);
    let err = with_db_x(&mut opctx, "app", |opctx| {
        env.catalog.drop_collection(
            opctx,
            &NamespaceString::parse("app.system.profile").unwrap(),
            OpTime::null(),
        )
    })
    .expect_err("profiling on");
    assert!(matches!(err, Error::IllegalOperation(_)));

    env.catalog.get_database("app").unwrap().set_profile_level(0);
    with_db_x(&mut opctx, "app", |opctx| {
        env.catalog.drop_collection(
            opctx,
            &NamespaceString::parse("app.system.profile").unwrap(),
            OpTime::null(),
        )
    })
    .expect("droppable with profiling off");
}

// ============================================================================
// Rename (S6)
// ============================================================================

#[test]
fn rename_preserves_uuid_and_kills_executors() {
    let env = ServerEnv::in_memory();
    let mut opctx = env.new_operation();

    let coll = create_collection(&env, &mut opctx, "app.x", CollectionOptions::default());
    let uuid = coll.uuid();
    coll.insert_document(&mut opctx, &Document::new().with_field("_id", 1i64)).expect("seed");

    // An executor opened before the rename.
    let mut exec =
        build_find_executor(&mut opctx, &coll, QueryRequest::default()).expect("executor");
    exec.save_state();

    with_db_x(&mut opctx, "app", |opctx| {
        env.catalog.rename_collection(
            opctx,
            &NamespaceString::parse("app.x").unwrap(),
            &NamespaceString::parse("app.y").unwrap(),
            true,
        )
    })
    .expect("rename");

    assert!(env.catalog.get_collection("app.x").is_none());
    let renamed = env.catalog.get_collection("app.y").expect("target resolves");
    assert_eq!(renamed.uuid(), uuid);

    let err = exec.restore_state().expect_err("cursor invalidated");
    assert!(matches!(err, Error::QueryPlanKilled(_)));
}

#[test]
fn rename_rejects_occupied_target_and_cross_database() {
    let env = ServerEnv::in_memory();
    let mut opctx = env.new_operation();
    create_collection(&env, &mut opctx, "app.a", CollectionOptions::default());
    create_collection(&env, &mut opctx, "app.b", CollectionOptions::default());

    let err = with_db_x(&mut opctx, "app", |opctx| {
        env.catalog.rename_collection(
            opctx,
            &NamespaceString::parse("app.a").unwrap(),
            &NamespaceString::parse("app.b").unwrap(),
            true,
        )
    })
    .expect_err("occupied");
    assert!(matches!(err, Error::NamespaceExists(_)));

    let err = with_db_x(&mut opctx, "app", |opctx| {
        env.catalog.rename_collection(
            opctx,
            &NamespaceString::parse("app.a").unwrap(),
            &NamespaceString::parse("other.a").unwrap(),
            true,
        )
    })
    .expect_err("cross database");
    assert!(matches!(err, Error::IllegalOperation(_)));
}

// ============================================================================
// Options round-trip and reload
// ============================================================================

#[test]
fn options_round_trip_through_storage_metadata() {
    let env = ServerEnv::in_memory();
    let mut opctx = env.new_operation();

    let options = CollectionOptions {
        capped: true,
        capped_size: Some(1 << 16),
        capped_max_docs: Some(100),
        temp: true,
        ..CollectionOptions::default()
    };
    let coll = create_collection(&env, &mut opctx, "app.events", options.clone());
    let uuid = coll.uuid();
    coll.insert_document(&mut opctx, &Document::new().with_field("_id", 1i64)).expect("seed");

    // Reload the database from persisted metadata.
    env.catalog.close_database("app");
    assert!(env.catalog.get_collection("app.events").is_none());

    env.catalog.open_database(&opctx, "app").expect("reopen");
    let reloaded = env.catalog.get_collection("app.events").expect("reloaded");
    assert_eq!(reloaded.options(), options);
    assert_eq!(reloaded.uuid(), uuid, "uuid survives reload");
    assert_eq!(reloaded.index_catalog().index_count(), 1, "id index reloaded");
    assert_eq!(reloaded.num_records(), 1);
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn ddl_commands_report_ok_and_codes() {
    let env = ServerEnv::in_memory();
    let mut opctx = env.new_operation();

    let reply =
        commands::run_create(&env.catalog, &mut opctx, "app.c", &serde_json::json!({}));
    assert_eq!(reply["ok"], 1);

    let reply =
        commands::run_create(&env.catalog, &mut opctx, "app.c", &serde_json::json!({}));
    assert_eq!(reply["ok"], 0);
    assert_eq!(reply["code"], 48);
    assert_eq!(reply["codeName"], "NamespaceExists");

    let reply = commands::run_create_indexes(
        &env.catalog,
        &mut opctx,
        "app.c",
        vec![IndexDescriptor::new("a_1", KeyPattern::ascending("a"))],
    );
    assert_eq!(reply["ok"], 1);

    let reply = commands::run_drop_indexes(&env.catalog, &mut opctx, "app.c", "nope_1");
    assert_eq!(reply["ok"], 0);
    assert_eq!(reply["codeName"], "IndexNotFound");

    let reply =
        commands::run_rename_collection(&env.catalog, &mut opctx, "app.c", "app.d", false);
    assert_eq!(reply["ok"], 1);

    let reply = commands::run_drop(&env.catalog, &mut opctx, "app.d", OpTime::null());
    assert_eq!(reply["ok"], 1);
    assert!(env.catalog.get_collection("app.d").is_none());
}

#[test]
fn lock_info_reports_holders_with_client_identity() {
    let env = ServerEnv::in_memory();
    let mut opctx = env.new_operation_for_client(ferrodb::ClientDescriptor {
        desc: "conn7".into(),
        connection_id: 7,
        client_address: "10.0.0.8:54321".into(),
    });

    opctx.locker().lock_global(LockMode::IntentShared).expect("global");
    let reply = commands::lock_info(&env.concurrency, &env.registry);
    assert_eq!(reply["ok"], 1);

    let heads = reply["lockInfo"].as_array().expect("array");
    assert_eq!(heads.len(), 1);
    let granted = heads[0]["granted"].as_array().expect("granted");
    assert_eq!(granted.len(), 1);
    assert_eq!(granted[0]["mode"], "IS");
    assert_eq!(granted[0]["desc"], "conn7");
    assert_eq!(granted[0]["connectionId"], 7);
    assert_eq!(granted[0]["client"], "10.0.0.8:54321");
    assert_eq!(granted[0]["opId"], opctx.op_id());

    opctx.locker().unlock_global();
}

#[test]
fn sharding_state_reports_collection_versions() {
    let env = ServerEnv::in_memory();
    let mut opctx = env.new_operation();
    let coll = create_collection(&env, &mut opctx, "app.sharded", CollectionOptions::default());

    let reply = commands::sharding_state(&env.catalog);
    assert_eq!(reply["ok"], 1);
    assert_eq!(reply["versions"]["app.sharded"]["uuid"], coll.uuid().to_string());
}

// ============================================================================
// Storage engine metadata exit conditions
// ============================================================================

#[test]
fn startup_refuses_engine_mismatch() {
    let dir = tempfile::tempdir().expect("tempdir");

    let first = ServerEnv::open(
        dir.path(),
        "memory",
        Arc::new(ferrodb_storage::MemoryEngine::new()),
    );
    assert!(first.is_ok());

    // Same engine reopens fine.
    assert!(ServerEnv::open(
        dir.path(),
        "memory",
        Arc::new(ferrodb_storage::MemoryEngine::new())
    )
    .is_ok());

    // A different engine against the same directory is refused.
    let err = ServerEnv::open(
        dir.path(),
        "wiredTiger",
        Arc::new(ferrodb_storage::MemoryEngine::new()),
    )
    .expect_err("mismatch");
    assert!(matches!(err, Error::InternalError(_)));
}
