//! Typed identifiers shared across planner and execution components.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Globally unique attribute identifier.
///
/// Two attribute references denote the same column iff their ids are equal;
/// names are never authoritative. Ids are issued from a process-wide monotonic
/// counter at the moment an attribute is constructed and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttrId(
    /// Raw numeric id value.
    pub u64,
);

static NEXT_ATTR_ID: AtomicU64 = AtomicU64::new(0);

impl AttrId {
    /// Issue the next id from the process-wide counter.
    pub fn next() -> Self {
        AttrId(NEXT_ATTR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AttrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
