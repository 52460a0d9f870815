// ── Client cache ──
//
// The in-process read model: one reactive cell per tracked slice. Only the
// controller writes to it, and only fetch and broadcast paths replace values.

mod slice;

use depsync_api::DepsSnapshot;
use tokio::sync::watch;

use crate::error::SyncError;
use crate::model::{CondaDependencies, SliceKind, UvDependencies};

pub(crate) use slice::{Origin, SliceCell};
pub use slice::SliceState;

/// Last known value of every tracked slice plus its pending/error state.
pub(crate) struct ClientCache {
    uv: SliceCell<UvDependencies>,
    conda: SliceCell<CondaDependencies>,
}

impl Default for ClientCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCache {
    pub fn new() -> Self {
        Self {
            uv: SliceCell::new(),
            conda: SliceCell::new(),
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn uv(&self) -> SliceState<UvDependencies> {
        self.uv.snapshot()
    }

    pub fn conda(&self) -> SliceState<CondaDependencies> {
        self.conda.snapshot()
    }

    pub fn is_pending(&self) -> bool {
        self.uv.snapshot().pending() || self.conda.snapshot().pending()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_uv(&self) -> watch::Receiver<SliceState<UvDependencies>> {
        self.uv.subscribe()
    }

    pub fn subscribe_conda(&self) -> watch::Receiver<SliceState<CondaDependencies>> {
        self.conda.subscribe()
    }

    // ── Writes (controller only) ─────────────────────────────────────

    pub(crate) fn reset(&self, epoch: u64) {
        self.uv.reset(epoch);
        self.conda.reset(epoch);
    }

    /// Broadcast counts to capture before a snapshot fetch is sent.
    pub(crate) fn broadcast_mark(&self) -> BroadcastMark {
        BroadcastMark {
            uv: self.uv.broadcasts(),
            conda: self.conda.broadcasts(),
        }
    }

    /// Replace every slice from a daemon broadcast. Returns `false` if the
    /// epoch is stale and nothing was written.
    pub(crate) fn apply_broadcast(&self, epoch: u64, snapshot: DepsSnapshot) -> bool {
        let DepsSnapshot { uv, conda } = snapshot;
        let uv_applied = self.uv.replace(epoch, uv, Origin::Broadcast);
        let conda_applied = self.conda.replace(epoch, conda, Origin::Broadcast);
        uv_applied && conda_applied
    }

    /// Replace every slice from a fetch reply. A slice that received a
    /// broadcast after `mark` was taken keeps the broadcast value. Returns
    /// `false` if any slice was left untouched.
    pub(crate) fn apply_fetched(
        &self,
        epoch: u64,
        snapshot: DepsSnapshot,
        mark: BroadcastMark,
    ) -> bool {
        let DepsSnapshot { uv, conda } = snapshot;
        let uv_applied = self.uv.replace(
            epoch,
            uv,
            Origin::Fetch {
                broadcasts: mark.uv,
            },
        );
        let conda_applied = self.conda.replace(
            epoch,
            conda,
            Origin::Fetch {
                broadcasts: mark.conda,
            },
        );
        uv_applied && conda_applied
    }

    /// Register an outstanding operation on `slice`. The returned guard
    /// settles it on every exit path, including cancellation.
    pub(crate) fn begin(&self, slice: SliceKind, epoch: u64) -> InFlight<'_> {
        match slice {
            SliceKind::Uv => self.uv.begin(epoch),
            SliceKind::Conda => self.conda.begin(epoch),
        };
        InFlight {
            cache: self,
            slice,
            epoch,
            armed: true,
        }
    }

    fn finish(&self, slice: SliceKind, epoch: u64, error: Option<SyncError>) {
        match slice {
            SliceKind::Uv => self.uv.finish(epoch, error),
            SliceKind::Conda => self.conda.finish(epoch, error),
        };
    }
}

/// Per-slice broadcast counts at the moment a fetch was sent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BroadcastMark {
    uv: u64,
    conda: u64,
}

/// Outstanding operation on one slice.
///
/// Dropping the guard without [`settle`](Self::settle) counts as a
/// completion without error.
pub(crate) struct InFlight<'a> {
    cache: &'a ClientCache,
    slice: SliceKind,
    epoch: u64,
    armed: bool,
}

impl InFlight<'_> {
    pub(crate) fn settle(mut self, error: Option<SyncError>) {
        self.armed = false;
        self.cache.finish(self.slice, self.epoch, error);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.finish(self.slice, self.epoch, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_settles_on_drop() {
        let cache = ClientCache::new();
        cache.reset(1);

        let guard = cache.begin(SliceKind::Conda, 1);
        assert!(cache.is_pending());
        assert!(cache.conda().pending());
        assert!(!cache.uv().pending());

        drop(guard);
        assert!(!cache.is_pending());
    }

    #[test]
    fn settle_records_error() {
        let cache = ClientCache::new();
        cache.reset(1);

        cache
            .begin(SliceKind::Uv, 1)
            .settle(Some(SyncError::remote("rejected")));

        let uv = cache.uv();
        assert!(!uv.pending());
        assert_eq!(uv.error, Some(SyncError::remote("rejected")));
        assert!(cache.conda().error.is_none());
    }

    #[test]
    fn snapshot_replaces_both_slices() {
        let cache = ClientCache::new();
        cache.reset(3);

        let applied = cache.apply_broadcast(
            3,
            DepsSnapshot {
                uv: Some(UvDependencies {
                    dependencies: vec!["numpy".into()],
                    requires_python: None,
                }),
                conda: None,
            },
        );

        assert!(applied);
        assert!(cache.uv().has_entries());
        assert!(cache.conda().loaded);
        assert!(cache.conda().value.is_none());
        assert!(!cache.apply_broadcast(2, DepsSnapshot::default()));
    }

    #[test]
    fn fetch_reply_keeps_newer_broadcast() {
        let cache = ClientCache::new();
        cache.reset(1);
        let mark = cache.broadcast_mark();

        let newer = UvDependencies {
            dependencies: vec!["a".into(), "b".into()],
            requires_python: None,
        };
        assert!(cache.apply_broadcast(
            1,
            DepsSnapshot {
                uv: Some(newer.clone()),
                conda: None,
            },
        ));

        let stale = DepsSnapshot {
            uv: Some(UvDependencies {
                dependencies: vec!["a".into()],
                requires_python: None,
            }),
            conda: None,
        };
        assert!(!cache.apply_fetched(1, stale.clone(), mark));
        assert_eq!(cache.uv().value.as_deref(), Some(&newer));

        assert!(cache.apply_fetched(1, stale, cache.broadcast_mark()));
        let uv = cache.uv().value.map(|v| v.dependencies.clone());
        assert_eq!(uv, Some(vec!["a".to_owned()]));
    }
}
