// In: src/modifier/profile.rs

//! The contract every block transform implements.

use serde_json::Value;

use crate::block::{Content, Metadata};
use crate::error::BloarkError;

/// The result of applying one profile to one block.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    /// Keep the (possibly rewritten) block and pass it to the next profile.
    Keep { content: Content, metadata: Metadata },
    /// Drop this block. Its group keeps going; the metadata is only for logging.
    DropBlock { metadata: Metadata },
    /// Drop every block of the containing group, including ones already seen.
    DropGroup,
}

impl Transformed {
    pub fn keep(content: Content, metadata: Metadata) -> Self {
        Transformed::Keep { content, metadata }
    }

    /// Reads a `(content, metadata)` pair the loose way: empty content drops the
    /// block, empty content with empty metadata drops the whole group.
    pub fn from_parts(content: Content, metadata: Metadata) -> Self {
        let empty_content = match &content {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        match (empty_content, metadata.is_empty()) {
            (true, true) => Transformed::DropGroup,
            (true, false) => Transformed::DropBlock { metadata },
            _ => Transformed::Keep { content, metadata },
        }
    }
}

/// A pure block transform applied by the Modifier.
///
/// Implementations must not rely on state carried between calls: blocks of
/// different warehouses are processed on different workers. Anything that must
/// travel with a block goes into its metadata.
pub trait Profile: Send + Sync {
    /// Used in logs and error reports.
    fn name(&self) -> &str;

    fn transform(&self, content: Content, metadata: Metadata) -> Result<Transformed, BloarkError>;
}

/// Passes every block through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityProfile;

impl Profile for IdentityProfile {
    fn name(&self) -> &str {
        "identity"
    }

    fn transform(&self, content: Content, metadata: Metadata) -> Result<Transformed, BloarkError> {
        Ok(Transformed::keep(content, metadata))
    }
}

/// Adapts a closure into a named profile.
pub struct FnProfile<F> {
    name: String,
    f: F,
}

impl<F> FnProfile<F>
where
    F: Fn(Content, Metadata) -> Result<Transformed, BloarkError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Profile for FnProfile<F>
where
    F: Fn(Content, Metadata) -> Result<Transformed, BloarkError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, content: Content, metadata: Metadata) -> Result<Transformed, BloarkError> {
        (self.f)(content, metadata)
    }
}
