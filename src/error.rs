// In: src/error.rs

//! This module defines the single, unified error type for the entire bloark library.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.
//!
//! Every error also knows its *scope*: how far up the stack it is allowed to travel
//! before somebody must recover from it. Block-scoped errors are swallowed (and
//! logged) by the unit that produced them, unit-scoped errors fail one work unit of
//! the pool, and fatal errors abort the whole run.

use std::path::PathBuf;
use thiserror::Error;

/// How far an error propagates before it is recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Skip the offending block, log it, keep going within the same unit.
    Block,
    /// Mark the current work unit as failed, keep the pool running.
    Unit,
    /// Abort the run and surface to the caller.
    Fatal,
}

/// Failures of the codec layer, split by what the caller should do about them.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The file extension or magic is not a format we can decode. Callers skip/report.
    #[error("Unsupported format: {}", path.display())]
    Unsupported { path: PathBuf },

    /// The format is known but the stream is damaged. Callers abort the unit.
    #[error("Corrupt stream in {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum BloarkError {
    // =========================================================================
    // === High-Level, Semantic Errors (Specific to our library's logic)
    // =========================================================================
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Corrupt warehouse {}: {reason}", path.display())]
    CorruptWarehouse { path: PathBuf, reason: String },

    /// A malformed structural unit (one revision) inside an otherwise valid stream.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The XML tokenizer itself gave up; the stream cannot be resynchronised.
    #[error("XML stream error: {0}")]
    Xml(String),

    #[error("Profile '{profile}' failed: {reason}")]
    Profile { profile: String, reason: String },

    #[error("Warehouse already exists and is not empty: {}", .0.display())]
    WarehouseExists(PathBuf),

    #[error("Work unit terminated abnormally: {0}")]
    WorkerFailure(String),

    #[error("Worker pool failure: {0}")]
    Pool(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the underlying I/O subsystem (e.g., file not found).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library, typically during block or footer serialization.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl BloarkError {
    /// Shorthand used by the warehouse reader when validation fails.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BloarkError::CorruptWarehouse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Classifies the error according to the propagation policy.
    pub fn scope(&self) -> ErrorScope {
        match self {
            BloarkError::Parse(_) | BloarkError::Profile { .. } => ErrorScope::Block,
            BloarkError::Pool(_) | BloarkError::InvalidConfig(_) => ErrorScope::Fatal,
            _ => ErrorScope::Unit,
        }
    }

    /// True for errors that only cost us a single block.
    pub fn is_block_scoped(&self) -> bool {
        self.scope() == ErrorScope::Block
    }
}

impl From<quick_xml::Error> for BloarkError {
    fn from(err: quick_xml::Error) -> Self {
        BloarkError::Xml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_follow_propagation_policy() {
        assert_eq!(BloarkError::Parse("x".into()).scope(), ErrorScope::Block);
        assert_eq!(
            BloarkError::Profile {
                profile: "p".into(),
                reason: "r".into()
            }
            .scope(),
            ErrorScope::Block
        );
        assert_eq!(BloarkError::corrupt("a.blrk", "no trailer").scope(), ErrorScope::Unit);
        assert_eq!(
            BloarkError::Codec(CodecError::Unsupported { path: "a.7z".into() }).scope(),
            ErrorScope::Unit
        );
        assert_eq!(BloarkError::Pool("no workers".into()).scope(), ErrorScope::Fatal);
        assert!(BloarkError::Parse("x".into()).is_block_scoped());
    }

    #[test]
    fn test_io_errors_convert_automatically() {
        fn fails() -> Result<(), BloarkError> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(matches!(err, BloarkError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }
}
