//! Node identifiers.

use std::fmt;
use uuid::Uuid;

/// Integer identifier of a UI or layout node, assigned by the native engine.
pub type Sign = i32;

/// Root sign before a root node has been created.
pub const UNSET_SIGN: Sign = -1;

/// Tag of the node that becomes the tree root.
pub const ROOT_TAG: &str = "page";

/// Identifies one rendering session; carried in logs and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Creates a new random instance ID.
    pub fn new() -> InstanceId {
        InstanceId(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        InstanceId::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
