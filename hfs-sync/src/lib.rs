//! Mirror a local directory tree onto an HFS file server.

pub mod config;
pub mod sync;

pub use config::{ConfigError, SyncConfig};
pub use sync::conflict::{ConflictPolicy, ConflictResolver, UnknownPolicy};
pub use sync::engine::{SyncEngine, SyncHalted, SyncOptions};
pub use sync::ensure::DirectoryEnsurer;
pub use sync::error::SyncError;
pub use sync::oracle::RemoteExistenceOracle;
pub use sync::paths::{PathError, map_to_remote};
pub use sync::transfer::{
    OutcomeKind, ProgressEvent, ProgressObserver, SyncTask, TransferOutcome, UploadExecutor,
    UploadStrategy,
};
