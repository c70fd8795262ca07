//! Voltra store: versioned entity collections updated through typed commands.
//!
//! Each registry collection is owned by one ingest task. Writers send
//! [`CollectionCommand`]s; the task coalesces them by entity id, applies them
//! in batches, and swaps in a fresh immutable snapshot. Readers hold a
//! [`CollectionHandle`] and subscribe to epoch changes instead of observing
//! shared mutable state.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use voltra_core::columns::{builtin_columns_for, builtin_projector_for, ColumnKind, ColumnSpec};
use voltra_core::{EntityId, EntityKind, EntityRecord, RowProjector};
use voltra_filter::record_passes_filters;
use voltra_loader::{PageRequest, PageSource, PageWindow};

/// Command queue capacity, overridable through `VOLTRA_QUEUE_CAP`.
pub fn default_queue_cap() -> usize {
    std::env::var("VOLTRA_QUEUE_CAP")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(2048)
}

/// The only way a collection changes.
#[derive(Debug, Clone)]
pub enum CollectionCommand {
    Upsert(EntityRecord),
    Remove(EntityId),
}

impl CollectionCommand {
    fn id(&self) -> &EntityId {
        match self {
            CollectionCommand::Upsert(rec) => &rec.id,
            CollectionCommand::Remove(id) => id,
        }
    }
}

/// Coalescing queue keyed by entity id with FIFO order and fixed capacity.
pub struct CommandCoalescer {
    map: FxHashMap<EntityId, CollectionCommand>,
    order: VecDeque<EntityId>,
    cap: usize,
    dropped: u64,
}

impl CommandCoalescer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1), dropped: 0 }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn push(&mut self, cmd: CollectionCommand) {
        let id = cmd.id().clone();
        if !self.map.contains_key(&id) {
            if self.order.len() >= self.cap {
                if let Some(old) = self.order.pop_front() {
                    self.map.remove(&old);
                    self.dropped += 1;
                }
            }
            self.order.push_back(id.clone());
        }
        self.map.insert(id, cmd);
    }

    /// Drain all currently coalesced commands in FIFO order.
    pub fn drain_ready(&mut self) -> Vec<CollectionCommand> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(id) = self.order.pop_front() {
            if let Some(cmd) = self.map.remove(&id) {
                out.push(cmd);
            }
        }
        out
    }
}

/// Immutable view of one collection at one version.
#[derive(Debug, Clone, Default)]
pub struct CollectionSnapshot {
    pub epoch: u64,
    pub items: Vec<EntityRecord>,
}

/// Builds collection snapshots from command batches.
pub struct CollectionBuilder {
    epoch: u64,
    items: Vec<EntityRecord>,
}

impl CollectionBuilder {
    pub fn new() -> Self {
        Self { epoch: 0, items: Vec::new() }
    }

    /// Apply a batch of commands. Upserts replace by id and keep insertion
    /// order; the epoch advances once per non-empty batch.
    pub fn apply(&mut self, batch: Vec<CollectionCommand>) {
        if batch.is_empty() {
            return;
        }
        for cmd in batch {
            match cmd {
                CollectionCommand::Upsert(rec) => {
                    if let Some(idx) = self.items.iter().position(|x| x.id == rec.id) {
                        self.items[idx] = rec;
                    } else {
                        self.items.push(rec);
                    }
                }
                CollectionCommand::Remove(id) => {
                    self.items.retain(|x| x.id != id);
                }
            }
        }
        self.epoch = self.epoch.saturating_add(1);
    }

    pub fn freeze(&self) -> Arc<CollectionSnapshot> {
        Arc::new(CollectionSnapshot { epoch: self.epoch, items: self.items.clone() })
    }
}

impl Default for CollectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for readers: current snapshot plus epoch subscription.
#[derive(Clone)]
pub struct CollectionHandle {
    kind: EntityKind,
    snap: Arc<ArcSwap<CollectionSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl CollectionHandle {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn current(&self) -> Arc<CollectionSnapshot> {
        self.snap.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }
}

/// Spawn the ingest loop for one collection. Returns the command sender and
/// the read handle; the loop exits when the last sender is dropped.
pub fn spawn_collection(
    kind: EntityKind,
    cap: usize,
) -> (mpsc::Sender<CollectionCommand>, CollectionHandle) {
    let (tx, mut rx) = mpsc::channel::<CollectionCommand>(cap);
    let snap = Arc::new(ArcSwap::from_pointee(CollectionSnapshot::default()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let snap_clone = Arc::clone(&snap);

    tokio::spawn(async move {
        let mut coalescer = CommandCoalescer::with_capacity(cap);
        let mut builder = CollectionBuilder::new();
        let mut dropped_seen = 0u64;
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(8));
        let mut flush = |coalescer: &mut CommandCoalescer, builder: &mut CollectionBuilder| {
            let batch = coalescer.drain_ready();
            if batch.is_empty() {
                return;
            }
            builder.apply(batch);
            let next = builder.freeze();
            let epoch = next.epoch;
            metrics::gauge!("collection_items", next.items.len() as f64, "kind" => kind.key());
            if coalescer.dropped() > dropped_seen {
                let delta = coalescer.dropped() - dropped_seen;
                dropped_seen = coalescer.dropped();
                metrics::counter!("collection_commands_dropped", delta, "kind" => kind.key());
            }
            snap_clone.store(next);
            let _ = epoch_tx.send(epoch);
        };
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(cmd) => coalescer.push(cmd),
                        None => {
                            debug!(kind = %kind, "command channel closed; draining and exiting");
                            flush(&mut coalescer, &mut builder);
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    flush(&mut coalescer, &mut builder);
                }
            }
        }
        info!(kind = %kind, "collection ingest stopped");
    });

    (tx, CollectionHandle { kind, snap, epoch_rx })
}

/// Page source over a collection snapshot: filters with the predicate
/// evaluator, counts the full match, slices the window, projects display
/// rows. This is the data source a table loader is given.
pub struct SnapshotSource {
    handle: CollectionHandle,
    columns: Vec<ColumnSpec>,
    projector: Arc<dyn RowProjector + Send + Sync>,
}

impl SnapshotSource {
    pub fn new(handle: CollectionHandle) -> Self {
        let kind = handle.kind();
        Self::with_projector(handle, builtin_projector_for(kind))
    }

    pub fn with_projector(
        handle: CollectionHandle,
        projector: Arc<dyn RowProjector + Send + Sync>,
    ) -> Self {
        let columns = builtin_columns_for(handle.kind());
        Self { handle, columns, projector }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    fn render_row(&self, rec: &EntityRecord) -> Vec<String> {
        let cells = self.projector.project(&rec.raw);
        self.columns
            .iter()
            .map(|col| match col.kind {
                ColumnKind::Id => rec.id.clone(),
                ColumnKind::Projected(id) => cells
                    .iter()
                    .find(|(cid, _)| *cid == id)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl PageSource for SnapshotSource {
    async fn fetch_page(&self, req: PageRequest) -> anyhow::Result<PageWindow> {
        let snap = self.handle.current();
        let matching: Vec<&EntityRecord> = snap
            .items
            .iter()
            .filter(|r| record_passes_filters(&r.raw, &req.filters))
            .collect();
        let total = matching.len();
        let records: Vec<EntityRecord> = matching
            .into_iter()
            .skip(req.offset)
            .take(req.page_size)
            .cloned()
            .collect();
        let rows = records.iter().map(|r| self.render_row(r)).collect();
        debug!(
            kind = %self.handle.kind(),
            epoch = snap.epoch,
            total,
            offset = req.offset,
            served = records.len(),
            "collection page served"
        );
        Ok(PageWindow { records, rows, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(id: &str, status: &str) -> EntityRecord {
        EntityRecord {
            id: id.to_string(),
            kind: EntityKind::Certificate,
            raw: json!({ "id": id, "status": status }),
        }
    }

    #[test]
    fn coalescer_keeps_latest_per_id_in_fifo_order() {
        let mut c = CommandCoalescer::with_capacity(8);
        c.push(CollectionCommand::Upsert(rec("1", "Requested")));
        c.push(CollectionCommand::Upsert(rec("2", "Requested")));
        c.push(CollectionCommand::Upsert(rec("1", "Active")));
        assert_eq!(c.len(), 2);

        let batch = c.drain_ready();
        assert_eq!(batch.len(), 2);
        match &batch[0] {
            CollectionCommand::Upsert(r) => {
                assert_eq!(r.id, "1");
                assert_eq!(r.raw["status"], "Active");
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(c.is_empty());
    }

    #[test]
    fn coalescer_overflow_drops_oldest() {
        let mut c = CommandCoalescer::with_capacity(2);
        c.push(CollectionCommand::Upsert(rec("1", "a")));
        c.push(CollectionCommand::Upsert(rec("2", "a")));
        c.push(CollectionCommand::Upsert(rec("3", "a")));
        assert_eq!(c.len(), 2);
        assert_eq!(c.dropped(), 1);

        let ids: Vec<String> = c
            .drain_ready()
            .iter()
            .map(|cmd| cmd.id().clone())
            .collect();
        assert_eq!(ids, vec!["2".to_string(), "3".to_string()]);
    }

    #[test]
    fn builder_epoch_advances_per_batch() {
        let mut b = CollectionBuilder::new();
        b.apply(vec![CollectionCommand::Upsert(rec("1", "Requested"))]);
        assert_eq!(b.freeze().epoch, 1);
        b.apply(Vec::new());
        assert_eq!(b.freeze().epoch, 1, "empty batch must not advance the epoch");
        b.apply(vec![CollectionCommand::Remove("1".to_string())]);
        let snap = b.freeze();
        assert_eq!(snap.epoch, 2);
        assert!(snap.items.is_empty());
    }
}
