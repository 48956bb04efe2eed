//! Error types for vex_core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for vex_core operations.
#[derive(Error, Debug)]
pub enum VexError {
    /// Object with the given id was not found in the store.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A store read produced bytes whose hash does not match the name,
    /// or an object's encoding could not be understood.
    #[error("corrupt object at {}: {}", path.display(), reason)]
    CorruptObject {
        /// Path of the offending file
        path: PathBuf,
        /// Description of the corruption
        reason: String,
    },

    /// The action log does not chain correctly.
    #[error("corrupt action log: {0}")]
    CorruptLog(String),

    /// Invalid hex string for object id parsing.
    #[error("invalid object id: {0}")]
    InvalidId(String),

    /// A truncated id prefix matched more than one object.
    #[error("ambiguous id prefix: {0}")]
    AmbiguousPrefix(String),

    /// A command precondition was violated. Always triggers rollback.
    #[error("{0}")]
    Domain(String),

    /// The exclusive repository lock could not be acquired in time.
    #[error("repository is in use by another process")]
    ConcurrentWriter,

    /// A pointer file held something other than one hash or small literal.
    #[error("invalid pointer {name}: {reason}")]
    InvalidPointer {
        /// Pointer name relative to the scratch directory
        name: String,
        /// Description of what's invalid
        reason: String,
    },

    /// An interrupted transaction was found and recovery itself failed.
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    /// Serialization to the canonical form failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VexError {
    /// Domain error with a formatted message.
    pub fn domain(msg: impl Into<String>) -> Self {
        Self::Domain(msg.into())
    }

    /// Returns a user-facing recovery suggestion for the error, if one exists.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::CorruptObject { .. } => {
                Some("Run 'vex debug:status' to inspect the store, then 'vex debug:gc' to drop unreachable objects.")
            }
            Self::NotFound(_) => {
                Some("The repository may be damaged. 'vex debug:status' shows which pointers still resolve.")
            }
            Self::CorruptLog(_) => {
                Some("The action log is truncated or damaged. 'vex debug:rollback' discards any half-applied transaction.")
            }
            Self::ConcurrentWriter => {
                Some("Another vex process holds the repository lock. Wait for it to finish.")
            }
            Self::RecoveryFailed(_) => {
                Some("Inspect .vex/plan and .vex/pending manually; 'vex debug:rollback' retries recovery.")
            }
            _ => None,
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Domain(_) => 1,
            Self::ConcurrentWriter => 4,
            _ => 3,
        }
    }
}

/// Convenience Result type for vex_core operations.
pub type Result<T> = std::result::Result<T, VexError>;
