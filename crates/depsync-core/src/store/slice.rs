// ── Reactive slice cell ──
//
// One tracked state slice behind a `watch` channel. Every write names the
// session epoch it was started under and is discarded when that session is
// no longer current.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::SyncError;
use crate::model::Manifest;

/// Point-in-time view of one slice.
#[derive(Debug, Clone, Serialize)]
pub struct SliceState<T> {
    /// Last value delivered by a fetch or broadcast. `None` before the first
    /// load, and also after a load that reported no manifest.
    pub value: Option<Arc<T>>,

    /// A fetch or broadcast has populated this slice since activation.
    pub loaded: bool,

    /// Operations currently outstanding against this slice.
    pub in_flight: usize,

    pub error: Option<SyncError>,

    /// Bumped on every fetch or broadcast applied to this slice.
    pub revision: u64,

    pub updated_at: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub(crate) epoch: u64,

    /// Broadcasts applied under `epoch`. Fetch replies compare against it.
    #[serde(skip)]
    pub(crate) broadcasts: u64,
}

/// Where a replacement value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Broadcast,
    /// A snapshot fetch started when the slice had seen `broadcasts`
    /// broadcasts.
    Fetch { broadcasts: u64 },
}

impl<T> SliceState<T> {
    fn fresh(epoch: u64) -> Self {
        Self {
            value: None,
            loaded: false,
            in_flight: 0,
            error: None,
            revision: 0,
            updated_at: None,
            epoch,
            broadcasts: 0,
        }
    }

    /// At least one operation is outstanding.
    pub fn pending(&self) -> bool {
        self.in_flight > 0
    }
}

impl<T: Manifest> SliceState<T> {
    /// The cached manifest declares at least one dependency.
    pub fn has_entries(&self) -> bool {
        self.value.as_deref().is_some_and(Manifest::has_entries)
    }
}

/// Owner of a slice's `watch` channel.
pub(crate) struct SliceCell<T> {
    tx: watch::Sender<SliceState<T>>,
}

impl<T: Manifest> SliceCell<T> {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(SliceState::fresh(0));
        Self { tx }
    }

    pub(crate) fn snapshot(&self) -> SliceState<T> {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SliceState<T>> {
        self.tx.subscribe()
    }

    /// Discard everything and start over as UNINITIALIZED under `epoch`.
    pub(crate) fn reset(&self, epoch: u64) {
        self.tx.send_replace(SliceState::fresh(epoch));
    }

    /// Broadcasts applied so far in the current session.
    pub(crate) fn broadcasts(&self) -> u64 {
        self.tx.borrow().broadcasts
    }

    /// Replace the value wholesale and clear the error. Returns `false` if
    /// `epoch` is stale, or if `origin` is a fetch that a broadcast
    /// overtook while it was in flight.
    pub(crate) fn replace(&self, epoch: u64, value: Option<T>, origin: Origin) -> bool {
        // send_if_modified updates the value even with zero receivers
        self.tx.send_if_modified(|state| {
            if state.epoch != epoch {
                return false;
            }
            match origin {
                Origin::Broadcast => state.broadcasts += 1,
                Origin::Fetch { broadcasts } if broadcasts != state.broadcasts => return false,
                Origin::Fetch { .. } => {}
            }
            state.value = value.map(Arc::new);
            state.loaded = true;
            state.error = None;
            state.revision += 1;
            state.updated_at = Some(Utc::now());
            true
        })
    }

    /// Register an outstanding operation. A new attempt supersedes any
    /// stale failure.
    pub(crate) fn begin(&self, epoch: u64) -> bool {
        self.tx.send_if_modified(|state| {
            if state.epoch != epoch {
                return false;
            }
            state.in_flight += 1;
            state.error = None;
            true
        })
    }

    /// Settle an operation registered with [`begin`](Self::begin).
    pub(crate) fn finish(&self, epoch: u64, error: Option<SyncError>) -> bool {
        self.tx.send_if_modified(|state| {
            if state.epoch != epoch {
                return false;
            }
            state.in_flight = state.in_flight.saturating_sub(1);
            if error.is_some() {
                state.error = error;
            }
            true
        })
    }

    #[cfg(test)]
    pub(crate) fn set_error(&self, epoch: u64, error: SyncError) -> bool {
        self.tx.send_if_modified(|state| {
            if state.epoch != epoch {
                return false;
            }
            state.error = Some(error);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UvDependencies;

    fn uv(deps: &[&str]) -> UvDependencies {
        UvDependencies {
            dependencies: deps.iter().map(ToString::to_string).collect(),
            requires_python: None,
        }
    }

    #[test]
    fn replace_marks_loaded_and_clears_error() {
        let cell = SliceCell::<UvDependencies>::new();
        cell.reset(1);
        cell.set_error(1, SyncError::remote("boom"));

        assert!(cell.replace(1, Some(uv(&["numpy"])), Origin::Broadcast));

        let state = cell.snapshot();
        assert!(state.loaded);
        assert!(state.error.is_none());
        assert!(state.has_entries());
        assert_eq!(state.revision, 1);
        assert!(state.updated_at.is_some());
    }

    #[test]
    fn null_value_still_counts_as_loaded() {
        let cell = SliceCell::<UvDependencies>::new();
        cell.reset(1);
        cell.replace(1, Some(uv(&["numpy"])), Origin::Broadcast);
        cell.replace(1, None, Origin::Broadcast);

        let state = cell.snapshot();
        assert!(state.loaded);
        assert!(state.value.is_none());
        assert!(!state.has_entries());
        assert_eq!(state.revision, 2);
    }

    #[test]
    fn stale_epoch_writes_are_dropped() {
        let cell = SliceCell::<UvDependencies>::new();
        cell.reset(2);

        assert!(!cell.replace(1, Some(uv(&["numpy"])), Origin::Broadcast));
        assert!(!cell.begin(1));
        assert!(!cell.set_error(1, SyncError::remote("late")));

        let state = cell.snapshot();
        assert!(!state.loaded);
        assert_eq!(state.in_flight, 0);
        assert!(state.error.is_none());
    }

    #[test]
    fn overlapping_operations_are_counted() {
        let cell = SliceCell::<UvDependencies>::new();
        cell.reset(1);

        cell.begin(1);
        cell.begin(1);
        cell.finish(1, None);
        assert!(cell.snapshot().pending(), "second operation still outstanding");

        cell.finish(1, Some(SyncError::connectivity("lost")));
        let state = cell.snapshot();
        assert!(!state.pending());
        assert_eq!(state.error, Some(SyncError::connectivity("lost")));
    }

    #[test]
    fn serialized_shape() {
        let cell = SliceCell::<UvDependencies>::new();
        cell.reset(1);
        cell.replace(1, Some(uv(&["numpy"])), Origin::Broadcast);
        cell.set_error(1, SyncError::remote("rejected"));

        insta::assert_json_snapshot!(cell.snapshot(), { ".updated_at" => "[timestamp]" }, @r#"
        {
          "value": {
            "dependencies": [
              "numpy"
            ],
            "requires_python": null
          },
          "loaded": true,
          "in_flight": 0,
          "error": {
            "kind": "remote",
            "detail": "rejected"
          },
          "revision": 1,
          "updated_at": "[timestamp]"
        }
        "#);
    }

    #[test]
    fn fetch_overtaken_by_broadcast_is_skipped() {
        let cell = SliceCell::<UvDependencies>::new();
        cell.reset(1);
        let seen = cell.broadcasts();

        assert!(cell.replace(1, Some(uv(&["a", "b"])), Origin::Broadcast));
        assert!(!cell.replace(1, Some(uv(&["a"])), Origin::Fetch { broadcasts: seen }));

        let state = cell.snapshot();
        assert_eq!(state.value.as_deref(), Some(&uv(&["a", "b"])));
        assert_eq!(state.revision, 1);

        let seen = cell.broadcasts();
        assert!(cell.replace(1, Some(uv(&["c"])), Origin::Fetch { broadcasts: seen }));
        assert_eq!(cell.broadcasts(), seen, "fetches do not count as broadcasts");
    }

    #[test]
    fn begin_clears_previous_error() {
        let cell = SliceCell::<UvDependencies>::new();
        cell.reset(1);
        cell.set_error(1, SyncError::remote("old"));

        cell.begin(1);
        assert!(cell.snapshot().error.is_none());
    }
}
