//! Vex storage engine.
//!
//! A version-control core whose every mutating operation is undoable and
//! redoable, built in layers:
//!
//! 1. a content-addressable object store of immutable, hash-named
//!    objects ([`ObjectStore`]),
//! 2. a two-phase transaction layer over the store and a small set of
//!    mutable scratch pointers ([`transaction`]),
//! 3. an action log pairing a physical pointer snapshot with a logical
//!    inverse command per action ([`history`]),
//! 4. the project model (commits, branches, sessions, manifests,
//!    stashes) and the fixed command catalog ([`Project`]).
//!
//! The working copy is sacred: any failure leaves the repository either
//! fully committed to the new state or fully reverted to the old one.

pub mod codec;
pub mod error;
pub mod gc;
pub mod history;
pub mod lock;
pub mod manifest;
pub mod object_id;
pub mod object_store;
pub mod project;
pub mod scratch;
pub mod transaction;
pub mod tree;
pub mod types;
pub mod worktree;

pub use error::{Result, VexError};
pub use gc::{GcConfig, GcReport};
pub use manifest::{PathStatus, StatusReport};
pub use object_id::ObjectId;
pub use object_store::ObjectStore;
pub use project::{CommandReport, DebugStatus, LogEntry, Project};
pub use scratch::ScratchStore;
pub use transaction::Recovery;
pub use types::{
    ActionRecord, Branch, Commit, CommitKind, Manifest, PropValue, Session, Settings,
};
