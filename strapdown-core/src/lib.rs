//! Strapdown Core Library
//!
//! Content and version engine of the strapdown wiki server:
//! - Document and revision identity types
//! - Version store abstraction with git and in-memory backends
//! - Path resolution against the served directory
//! - Content type classification
//! - Per-document rendering options (JSON sidecars)
//! - Diffs between historical revisions
//! - Edit coordination with per-document locking

pub mod object;
pub mod storage;
pub mod git_store;
pub mod memory_store;
pub mod error;
pub mod options;
pub mod content_type;
pub mod resolver;
pub mod diff;
pub mod locks;
pub mod coordinator;

pub use object::{CommitMeta, DocPath, RevisionEntry, RevisionId, RevisionPrefix, FULL_HEX_LEN, MIN_PREFIX_LEN};
pub use storage::{StoreError, VersionStore};
pub use git_store::GitStore;
pub use memory_store::MemoryStore;
pub use error::{EngineError, Result};
pub use options::{DocumentOptions, OptionStore, RenderOptions};
pub use resolver::{DirEntry, PathResolver, Resolution, SystemAsset};
pub use diff::{DiffEngine, DiffResult};
pub use locks::DocumentLocks;
pub use coordinator::{EditCoordinator, EditOutcome, WorkingState};
