//! The administrative command surface.
//!
//! Thin wrappers that take the documented locks, validate their inputs,
//! run the catalog operation inside a write unit of work, and render
//! `{ok: 1}` / `{ok: 0, code, codeName, errmsg}` reply documents.

use std::sync::Arc;

use ferrodb_concurrency::{ConcurrencyContext, LockMode, LockRequestStatus, ResourceId};
use ferrodb_core::{CollectionOptions, NamespaceString, OpTime};
use serde_json::{json, Value as JsonValue};

use crate::catalog::index::IndexDescriptor;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::operation::{with_write_unit_of_work, OperationContext, OperationRegistry};

fn reply_ok() -> JsonValue {
    json!({"ok": 1})
}

fn reply_err(err: &Error) -> JsonValue {
    json!({
        "ok": 0,
        "code": err.code().as_u32(),
        "codeName": err.code().name(),
        "errmsg": err.to_string(),
    })
}

fn render(result: Result<()>) -> JsonValue {
    match result {
        Ok(()) => reply_ok(),
        Err(err) => reply_err(&err),
    }
}

/// Take the global IX and database X locks, run `f` in a write unit of
/// work, then release in reverse order.
fn with_db_exclusive(
    opctx: &mut OperationContext,
    db: &str,
    f: impl FnOnce(&mut OperationContext) -> Result<()>,
) -> Result<()> {
    opctx.locker().lock_global(LockMode::IntentExclusive)?;
    let db_resource = ResourceId::for_database(db);
    let locked = opctx.locker().lock(db_resource, LockMode::Exclusive, None, true);
    let result = match locked {
        Ok(()) => {
            let result = with_write_unit_of_work(opctx, f);
            opctx.locker().unlock(db_resource);
            result
        }
        Err(err) => Err(err.into()),
    };
    opctx.locker().unlock_global();
    result
}

/// The `create` command.
#[must_use]
pub fn run_create(
    catalog: &Arc<Catalog>,
    opctx: &mut OperationContext,
    ns: &str,
    options: &JsonValue,
) -> JsonValue {
    let result = (|| -> Result<()> {
        let ns = NamespaceString::parse(ns)?;
        let options = CollectionOptions::parse_json(options)?;
        with_db_exclusive(opctx, ns.db(), |opctx| {
            catalog.create_collection(opctx, &ns, options).map(|_| ())
        })
    })();
    render(result)
}

/// The `drop` command.
#[must_use]
pub fn run_drop(
    catalog: &Arc<Catalog>,
    opctx: &mut OperationContext,
    ns: &str,
    drop_op_time: OpTime,
) -> JsonValue {
    let result = (|| -> Result<()> {
        let ns = NamespaceString::parse(ns)?;
        with_db_exclusive(opctx, ns.db(), |opctx| {
            catalog.drop_collection(opctx, &ns, drop_op_time)
        })
    })();
    render(result)
}

/// The `renameCollection` command.
#[must_use]
pub fn run_rename_collection(
    catalog: &Arc<Catalog>,
    opctx: &mut OperationContext,
    from: &str,
    to: &str,
    stay_temp: bool,
) -> JsonValue {
    let result = (|| -> Result<()> {
        let from = NamespaceString::parse(from)?;
        let to = NamespaceString::parse(to)?;
        with_db_exclusive(opctx, from.db(), |opctx| {
            catalog.rename_collection(opctx, &from, &to, stay_temp)
        })
    })();
    render(result)
}

/// The `createIndexes` command.
#[must_use]
pub fn run_create_indexes(
    catalog: &Arc<Catalog>,
    opctx: &mut OperationContext,
    ns: &str,
    specs: Vec<IndexDescriptor>,
) -> JsonValue {
    let result = (|| -> Result<()> {
        let ns = NamespaceString::parse(ns)?;
        with_db_exclusive(opctx, ns.db(), |opctx| {
            for spec in specs {
                catalog.create_index(opctx, &ns, spec)?;
            }
            Ok(())
        })
    })();
    render(result)
}

/// The `dropIndexes` command.
#[must_use]
pub fn run_drop_indexes(
    catalog: &Arc<Catalog>,
    opctx: &mut OperationContext,
    ns: &str,
    index_name: &str,
) -> JsonValue {
    let result = (|| -> Result<()> {
        let ns = NamespaceString::parse(ns)?;
        with_db_exclusive(opctx, ns.db(), |opctx| catalog.drop_index(opctx, &ns, index_name))
    })();
    render(result)
}

/// The `lockInfo` command: every lock head with its granted and pending
/// requests, annotated with the owning operation's client identity.
#[must_use]
pub fn lock_info(concurrency: &ConcurrencyContext, registry: &OperationRegistry) -> JsonValue {
    let describe = |info: &ferrodb_concurrency::LockRequestInfo| {
        let (op_id, client) = registry
            .lookup(info.locker_id)
            .map_or((0, crate::operation::ClientDescriptor::default()), |found| found);
        json!({
            "lockerId": info.locker_id,
            "mode": info.mode.short_name(),
            "status": info.status.name(),
            "convertMode": matches!(info.status, LockRequestStatus::Converting)
                .then(|| info.convert_mode.short_name()),
            "opId": op_id,
            "desc": client.desc,
            "connectionId": client.connection_id,
            "client": client.client_address,
        })
    };

    let heads: Vec<JsonValue> = concurrency
        .manager
        .snapshot()
        .iter()
        .map(|head| {
            json!({
                "resourceId": head.resource.to_string(),
                "granted": head.granted.iter().map(describe).collect::<Vec<_>>(),
                "pending": head.pending.iter().map(describe).collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({"ok": 1, "lockInfo": heads})
}

/// The `shardingState` command: this node's known collection versions.
#[must_use]
pub fn sharding_state(catalog: &Catalog) -> JsonValue {
    let versions: serde_json::Map<String, JsonValue> = catalog
        .collection_versions()
        .into_iter()
        .map(|(ns, version)| {
            (
                ns,
                json!({
                    "uuid": version.uuid.to_string(),
                    "version": {"t": version.version.secs, "i": version.version.inc},
                }),
            )
        })
        .collect();
    json!({"ok": 1, "enabled": true, "versions": versions})
}
