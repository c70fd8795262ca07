//! Voltra public API façade (in-process).
//!
//! This crate defines the stable trait and error taxonomy front ends depend
//! on. Chain-backed implementations live with the external registry SDKs;
//! the in-memory implementation here backs the CLI and tests.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use voltra_core::{EntityKind, EntityRecord};
use voltra_loader::{PageRequest, PageSource, PageWindow};
use voltra_store::{
    default_queue_cap, spawn_collection, CollectionCommand, CollectionHandle, SnapshotSource,
};

/// API errors suitable for transport over RPC later.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum RegistryError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Declarative registry surface consumed by the console views and the CLI.
/// `list` is the injected paged data source; the lifecycle operations are
/// what the (out-of-scope) forms and modals marshal their input into.
#[async_trait::async_trait]
pub trait RegistryApi: Send + Sync {
    /// One filtered/sliced window of a collection, with display rows and the
    /// full filtered count.
    async fn list(&self, kind: EntityKind, req: PageRequest) -> RegistryResult<PageWindow>;

    /// Raw payload of one entity.
    async fn get_raw(&self, kind: EntityKind, id: &str) -> RegistryResult<serde_json::Value>;

    async fn create_demand(&self, raw: serde_json::Value) -> RegistryResult<EntityRecord>;
    async fn create_supply(&self, raw: serde_json::Value) -> RegistryResult<EntityRecord>;
    async fn create_agreement(&self, raw: serde_json::Value) -> RegistryResult<EntityRecord>;

    async fn approve_certificate(&self, id: &str) -> RegistryResult<EntityRecord>;
    async fn publish_for_sale(&self, id: &str, price_cents: u64) -> RegistryResult<EntityRecord>;
    async fn unpublish_for_sale(&self, id: &str) -> RegistryResult<EntityRecord>;
    async fn buy_certificate(&self, id: &str, buyer: &str) -> RegistryResult<EntityRecord>;
}

struct Collection {
    tx: tokio::sync::mpsc::Sender<CollectionCommand>,
    handle: CollectionHandle,
    source: Arc<SnapshotSource>,
}

/// In-memory implementation holding one versioned collection per entity
/// kind. Mutations go through typed commands only.
pub struct InMemoryApi {
    collections: HashMap<EntityKind, Collection>,
    next_id: AtomicU64,
}

impl InMemoryApi {
    pub fn new() -> Self {
        let cap = default_queue_cap();
        let mut collections = HashMap::new();
        for kind in EntityKind::ALL {
            let (tx, handle) = spawn_collection(kind, cap);
            let source = Arc::new(SnapshotSource::new(handle.clone()));
            collections.insert(kind, Collection { tx, handle, source });
        }
        Self { collections, next_id: AtomicU64::new(1) }
    }

    fn collection(&self, kind: EntityKind) -> &Collection {
        // every kind is inserted in new(); the map is never mutated after
        self.collections.get(&kind).unwrap_or_else(|| unreachable!("collection for {kind}"))
    }

    /// Read handle for one collection, e.g. to build a loader page source.
    pub fn handle(&self, kind: EntityKind) -> CollectionHandle {
        self.collection(kind).handle.clone()
    }

    /// Shared snapshot page source for one collection.
    pub fn source(&self, kind: EntityKind) -> Arc<SnapshotSource> {
        Arc::clone(&self.collection(kind).source)
    }

    /// Load fixture records and wait until they are visible in snapshots.
    pub async fn seed(&self, records: Vec<EntityRecord>) -> RegistryResult<()> {
        let t0 = Instant::now();
        let mut by_kind: HashMap<EntityKind, Vec<String>> = HashMap::new();
        let count = records.len();
        for rec in records {
            by_kind.entry(rec.kind).or_default().push(rec.id.clone());
            let coll = self.collection(rec.kind);
            coll.tx
                .send(CollectionCommand::Upsert(rec))
                .await
                .map_err(|e| RegistryError::Internal(format!("collection ingest stopped: {e}")))?;
        }
        for (kind, ids) in by_kind {
            let coll = self.collection(kind);
            let mut rx = coll.handle.subscribe_epoch();
            loop {
                let snap = coll.handle.current();
                if ids.iter().all(|id| snap.items.iter().any(|r| &r.id == id)) {
                    break;
                }
                rx.changed().await.map_err(|e| RegistryError::Internal(e.to_string()))?;
            }
        }
        info!(count, took_ms = %t0.elapsed().as_millis(), "api: seed ok");
        Ok(())
    }

    fn fresh_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn find(&self, kind: EntityKind, id: &str) -> RegistryResult<EntityRecord> {
        self.collection(kind)
            .handle
            .current()
            .items
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("{kind} {id}")))
    }

    /// Send an upsert and wait for it to be visible in the snapshot.
    async fn publish(&self, rec: EntityRecord) -> RegistryResult<EntityRecord> {
        let coll = self.collection(rec.kind);
        let mut rx = coll.handle.subscribe_epoch();
        coll.tx
            .send(CollectionCommand::Upsert(rec.clone()))
            .await
            .map_err(|e| RegistryError::Internal(format!("collection ingest stopped: {e}")))?;
        loop {
            let snap = coll.handle.current();
            if snap.items.iter().any(|r| r.id == rec.id && r.raw == rec.raw) {
                break;
            }
            rx.changed().await.map_err(|e| RegistryError::Internal(e.to_string()))?;
        }
        Ok(rec)
    }

    fn now_secs() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    async fn create(
        &self,
        kind: EntityKind,
        mut raw: serde_json::Value,
        required: &[&str],
    ) -> RegistryResult<EntityRecord> {
        let obj = raw
            .as_object_mut()
            .ok_or_else(|| RegistryError::Validation(format!("{kind} payload must be an object")))?;
        for field in required {
            if !obj.contains_key(*field) {
                return Err(RegistryError::Validation(format!("{kind} payload missing {field}")));
            }
        }
        if !obj.contains_key("id") {
            obj.insert("id".to_string(), serde_json::Value::String(self.fresh_id()));
        }
        if !obj.contains_key("creationTime") {
            obj.insert("creationTime".to_string(), serde_json::Value::from(Self::now_secs()));
        }
        let rec = EntityRecord::from_raw(kind, raw)
            .map_err(|e| RegistryError::Validation(e.to_string()))?;
        if self.find(kind, &rec.id).is_ok() {
            return Err(RegistryError::Conflict(format!("{kind} {} already exists", rec.id)));
        }
        info!(kind = %kind, id = %rec.id, "api: create");
        self.publish(rec).await
    }
}

impl Default for InMemoryApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RegistryApi for InMemoryApi {
    async fn list(&self, kind: EntityKind, req: PageRequest) -> RegistryResult<PageWindow> {
        let t0 = Instant::now();
        let window = self
            .collection(kind)
            .source
            .fetch_page(req)
            .await
            .map_err(|e| RegistryError::Internal(e.to_string()))?;
        info!(
            kind = %kind,
            served = window.records.len(),
            total = window.total,
            took_ms = %t0.elapsed().as_millis(),
            "api: list ok"
        );
        Ok(window)
    }

    async fn get_raw(&self, kind: EntityKind, id: &str) -> RegistryResult<serde_json::Value> {
        self.find(kind, id).map(|r| r.raw)
    }

    async fn create_demand(&self, mut raw: serde_json::Value) -> RegistryResult<EntityRecord> {
        if let Some(obj) = raw.as_object_mut() {
            obj.entry("status").or_insert_with(|| serde_json::Value::String("Active".into()));
        }
        self.create(EntityKind::Demand, raw, &["demandOwner"]).await
    }

    async fn create_supply(&self, raw: serde_json::Value) -> RegistryResult<EntityRecord> {
        self.create(EntityKind::Supply, raw, &["assetId"]).await
    }

    async fn create_agreement(&self, raw: serde_json::Value) -> RegistryResult<EntityRecord> {
        self.create(EntityKind::Agreement, raw, &["demandId", "supplyId"]).await
    }

    async fn approve_certificate(&self, id: &str) -> RegistryResult<EntityRecord> {
        let mut rec = self.find(EntityKind::Certificate, id)?;
        let status = rec.raw.get("status").and_then(|v| v.as_str()).unwrap_or("");
        if status != "Requested" {
            return Err(RegistryError::Conflict(format!(
                "certificate {id} is {status}, only Requested certificates can be approved"
            )));
        }
        rec.raw["status"] = serde_json::Value::String("Active".into());
        info!(id = %id, "api: certificate approved");
        self.publish(rec).await
    }

    async fn publish_for_sale(&self, id: &str, price_cents: u64) -> RegistryResult<EntityRecord> {
        let mut rec = self.find(EntityKind::Certificate, id)?;
        let status = rec.raw.get("status").and_then(|v| v.as_str()).unwrap_or("");
        if status != "Active" {
            return Err(RegistryError::Conflict(format!(
                "certificate {id} is {status}, only Active certificates can be offered"
            )));
        }
        rec.raw["forSale"] = serde_json::Value::Bool(true);
        rec.raw["priceCents"] = serde_json::Value::from(price_cents);
        info!(id = %id, price_cents, "api: certificate published for sale");
        self.publish(rec).await
    }

    async fn unpublish_for_sale(&self, id: &str) -> RegistryResult<EntityRecord> {
        let mut rec = self.find(EntityKind::Certificate, id)?;
        if rec.raw.get("forSale").and_then(|v| v.as_bool()) != Some(true) {
            return Err(RegistryError::Conflict(format!("certificate {id} is not for sale")));
        }
        rec.raw["forSale"] = serde_json::Value::Bool(false);
        info!(id = %id, "api: certificate offer withdrawn");
        self.publish(rec).await
    }

    async fn buy_certificate(&self, id: &str, buyer: &str) -> RegistryResult<EntityRecord> {
        if buyer.is_empty() {
            return Err(RegistryError::Validation("buyer must not be empty".into()));
        }
        let mut rec = self.find(EntityKind::Certificate, id)?;
        if rec.raw.get("forSale").and_then(|v| v.as_bool()) != Some(true) {
            return Err(RegistryError::Conflict(format!("certificate {id} is not for sale")));
        }
        if rec.raw.get("owner").and_then(|v| v.as_str()) == Some(buyer) {
            return Err(RegistryError::Conflict(format!(
                "certificate {id} is already owned by {buyer}"
            )));
        }
        rec.raw["owner"] = serde_json::Value::String(buyer.to_string());
        rec.raw["forSale"] = serde_json::Value::Bool(false);
        info!(id = %id, buyer = %buyer, "api: certificate bought");
        self.publish(rec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cert(id: &str, status: &str, for_sale: bool) -> EntityRecord {
        EntityRecord {
            id: id.to_string(),
            kind: EntityKind::Certificate,
            raw: json!({
                "id": id,
                "assetId": "0",
                "owner": "0xa1",
                "powerInW": 1_000_000,
                "status": status,
                "forSale": for_sale,
                "priceCents": 0
            }),
        }
    }

    fn page(page_size: usize, offset: usize) -> PageRequest {
        PageRequest { page_size, offset, filters: Arc::new(Vec::new()) }
    }

    #[tokio::test]
    async fn certificate_lifecycle_approve_publish_buy() {
        let api = InMemoryApi::new();
        api.seed(vec![cert("1", "Requested", false)]).await.expect("seed");

        let rec = api.approve_certificate("1").await.expect("approve");
        assert_eq!(rec.raw["status"], "Active");

        // double approval conflicts
        let err = api.approve_certificate("1").await.expect_err("double approve");
        assert!(matches!(err, RegistryError::Conflict(_)));

        let rec = api.publish_for_sale("1", 150).await.expect("publish");
        assert_eq!(rec.raw["forSale"], json!(true));
        assert_eq!(rec.raw["priceCents"], json!(150));

        let rec = api.buy_certificate("1", "0xb2").await.expect("buy");
        assert_eq!(rec.raw["owner"], "0xb2");
        assert_eq!(rec.raw["forSale"], json!(false));

        // the sale already closed
        let err = api.buy_certificate("1", "0xc3").await.expect_err("re-buy");
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[tokio::test]
    async fn publish_requires_active_status() {
        let api = InMemoryApi::new();
        api.seed(vec![cert("1", "Requested", false)]).await.expect("seed");
        let err = api.publish_for_sale("1", 100).await.expect_err("publish requested");
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[tokio::test]
    async fn lifecycle_effects_are_visible_through_list() {
        let api = InMemoryApi::new();
        api.seed(vec![cert("1", "Requested", false), cert("2", "Active", false)])
            .await
            .expect("seed");

        api.approve_certificate("1").await.expect("approve");
        let window = api.list(EntityKind::Certificate, page(10, 0)).await.expect("list");
        assert_eq!(window.total, 2);
        assert!(window
            .records
            .iter()
            .all(|r| r.raw["status"] == json!("Active")));
    }

    #[tokio::test]
    async fn create_demand_defaults_and_validation() {
        let api = InMemoryApi::new();
        let rec = api
            .create_demand(json!({ "demandOwner": "0xb2", "offChainProperties": { "locationCountry": "DE" } }))
            .await
            .expect("create");
        assert_eq!(rec.raw["status"], "Active");
        assert!(rec.raw.get("creationTime").is_some());
        assert!(!rec.id.is_empty());

        let err = api.create_demand(json!({ "offChainProperties": {} })).await.expect_err("invalid");
        assert!(matches!(err, RegistryError::Validation(_)));

        let window = api.list(EntityKind::Demand, page(10, 0)).await.expect("list");
        assert_eq!(window.total, 1);
    }

    #[tokio::test]
    async fn create_agreement_requires_both_sides() {
        let api = InMemoryApi::new();
        let err = api
            .create_agreement(json!({ "demandId": "1" }))
            .await
            .expect_err("missing supply");
        assert!(matches!(err, RegistryError::Validation(_)));

        let rec = api
            .create_agreement(json!({ "demandId": "1", "supplyId": "2" }))
            .await
            .expect("create");
        assert_eq!(rec.kind, EntityKind::Agreement);
    }

    #[tokio::test]
    async fn get_raw_reports_not_found() {
        let api = InMemoryApi::new();
        let err = api.get_raw(EntityKind::Certificate, "99").await.expect_err("missing");
        assert!(matches!(err, RegistryError::NotFound(_)));
    }
}
