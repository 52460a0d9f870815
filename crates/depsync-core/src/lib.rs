// depsync-core: Client cache and reconciliation controller between depsync-api and consumers.
//
// The cache is written only by snapshot fetches and daemon broadcasts. Commands
// report success or failure through per-slice pending/error state; their effect
// on the dependencies themselves is observed through the broadcast that follows.

pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Dispatch, Mutation, MutationKind};
pub use config::ControllerConfig;
pub use controller::DepsController;
pub use error::{CoreError, ErrorKind, SyncError};
pub use store::SliceState;
pub use stream::{SliceStream, SliceWatchStream};

pub use model::{CondaDependencies, DepsSnapshot, Manifest, SliceKind, UvDependencies};
