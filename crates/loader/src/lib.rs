//! Voltra loader: page-by-page retrieval of registry records.
//!
//! A [`PaginatedLoader`] owns the paging state for one table view. It asks an
//! injected [`PageSource`] for one window at a time and publishes the result
//! as an immutable snapshot. Requests may overlap freely; every issued fetch
//! carries a monotonically increasing epoch and only the newest-issued fetch
//! is allowed to publish, so a slow early response can never clobber a later
//! one. `teardown` suppresses late completions the same way.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::debug;

use voltra_core::EntityRecord;
use voltra_filter::AppliedFilter;

pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Default page size, overridable through `VOLTRA_PAGE_SIZE`.
pub fn default_page_size() -> usize {
    std::env::var("VOLTRA_PAGE_SIZE")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
}

/// One window of a dataset, as asked of a [`PageSource`].
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub page_size: usize,
    pub offset: usize,
    pub filters: Arc<Vec<AppliedFilter>>,
}

/// One window of a dataset, as served by a [`PageSource`]: the raw records,
/// their display-projected rows, and the full filtered count.
#[derive(Debug, Clone, Default)]
pub struct PageWindow {
    pub records: Vec<EntityRecord>,
    pub rows: Vec<Vec<String>>,
    pub total: usize,
}

/// Injected data source. Implementations return records already filtered and
/// sliced for the requested window; the loader never re-filters or re-slices.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, req: PageRequest) -> anyhow::Result<PageWindow>;
}

#[async_trait::async_trait]
impl<S: PageSource + ?Sized> PageSource for Arc<S> {
    async fn fetch_page(&self, req: PageRequest) -> anyhow::Result<PageWindow> {
        (**self).fetch_page(req).await
    }
}

/// Published loader state. Owned by exactly one loader; readers get a frozen
/// `Arc` snapshot.
#[derive(Debug, Clone)]
pub struct LoaderState {
    pub page: usize,
    pub page_size: usize,
    pub records: Vec<EntityRecord>,
    pub rows: Vec<Vec<String>>,
    pub total: usize,
    pub applied_filters: Arc<Vec<AppliedFilter>>,
}

impl LoaderState {
    fn empty(page_size: usize) -> Self {
        Self {
            page: 0,
            page_size,
            records: Vec::new(),
            rows: Vec::new(),
            total: 0,
            applied_filters: Arc::new(Vec::new()),
        }
    }
}

pub struct PaginatedLoader<S> {
    source: S,
    page_size: usize,
    torn_down: AtomicBool,
    /// Epoch of the most recently issued fetch.
    issued: AtomicU64,
    /// Epoch of the most recently published result; guarded so the
    /// check-then-store below is a single step.
    published: Mutex<u64>,
    state: ArcSwap<LoaderState>,
    filters: ArcSwap<Vec<AppliedFilter>>,
    version_tx: watch::Sender<u64>,
}

impl<S: PageSource> PaginatedLoader<S> {
    pub fn new(source: S) -> Self {
        Self::with_page_size(source, default_page_size())
    }

    /// `page_size` is constant for the lifetime of the loader.
    pub fn with_page_size(source: S, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let (version_tx, _) = watch::channel(0u64);
        Self {
            source,
            page_size,
            torn_down: AtomicBool::new(false),
            issued: AtomicU64::new(0),
            published: Mutex::new(0),
            state: ArcSwap::from_pointee(LoaderState::empty(page_size)),
            filters: ArcSwap::from_pointee(Vec::new()),
            version_tx,
        }
    }

    /// First load when the consuming view becomes active: page 1, no
    /// filters. Does nothing once the loader has been torn down.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        if self.torn_down.load(Ordering::Acquire) {
            debug!("initialize after teardown; ignoring");
            return Ok(());
        }
        self.load_page(1, Some(Vec::new())).await
    }

    /// Fetch one page. `Some(filters)` replaces the stored filter set before
    /// the fetch is issued; `None` reuses the previous set. A fetch failure
    /// propagates to the caller and leaves the published state untouched.
    pub async fn load_page(
        &self,
        page: usize,
        filters: Option<Vec<AppliedFilter>>,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(page >= 1, "page numbers start at 1 (got {page})");
        if self.torn_down.load(Ordering::Acquire) {
            debug!(page, "load_page after teardown; ignoring");
            return Ok(());
        }

        let epoch = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
        let filters = match filters {
            Some(f) => {
                let f = Arc::new(f);
                self.filters.store(Arc::clone(&f));
                f
            }
            None => self.filters.load_full(),
        };
        let offset = (page - 1) * self.page_size;

        let t0 = Instant::now();
        let window = self
            .source
            .fetch_page(PageRequest {
                page_size: self.page_size,
                offset,
                filters: Arc::clone(&filters),
            })
            .await?;
        metrics::histogram!("loader_fetch_ms", t0.elapsed().as_secs_f64() * 1_000.0);

        if self.torn_down.load(Ordering::Acquire) {
            debug!(page, epoch, "loader torn down; dropping fetched page");
            return Ok(());
        }
        if self.issued.load(Ordering::Acquire) != epoch {
            debug!(page, epoch, "page load superseded; dropping fetched page");
            return Ok(());
        }

        let next = Arc::new(LoaderState {
            page,
            page_size: self.page_size,
            records: window.records,
            rows: window.rows,
            total: window.total,
            applied_filters: filters,
        });

        {
            let mut published = match self.published.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *published >= epoch {
                debug!(page, epoch, "newer page already published; dropping fetched page");
                return Ok(());
            }
            *published = epoch;
            metrics::gauge!("loader_rows", next.records.len() as f64);
            self.state.store(next);
        }
        self.version_tx.send_modify(|v| *v += 1);
        Ok(())
    }

    /// Mark the loader inactive. In-flight fetches are not aborted; their
    /// eventual completions are discarded.
    pub fn teardown(&self) {
        self.torn_down.store(true, Ordering::Release);
        debug!("loader torn down");
    }

    /// Current published state, as a frozen snapshot.
    pub fn state(&self) -> Arc<LoaderState> {
        self.state.load_full()
    }

    /// Subscribe to published-state version ticks.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// The filter set the next fetch will run under. Unlike the set inside
    /// [`LoaderState`], this reflects a submission as soon as it is issued.
    pub fn applied_filters(&self) -> Arc<Vec<AppliedFilter>> {
        self.filters.load_full()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_state_shape() {
        let s = LoaderState::empty(10);
        assert_eq!(s.page, 0);
        assert_eq!(s.page_size, 10);
        assert_eq!(s.total, 0);
        assert!(s.records.is_empty());
        assert!(s.applied_filters.is_empty());
    }
}
