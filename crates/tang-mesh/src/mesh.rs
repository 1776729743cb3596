//! Worker identity.

use std::fmt;

/// Unique identifier for a worker within a group. Also its rank: reductions
/// combine contributions in ascending `NodeId` order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}
