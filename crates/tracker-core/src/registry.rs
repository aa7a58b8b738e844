//! Tracks discovered function entry points and assigns each a stable id.

use crate::node::NodeId;
use crate::sequence::Sequence;

/// Identifies a function by the order in which its entry point was first
/// observed. Index 0 is the first entry point seen in the trace.
pub type FunctionId = u16;

/// Maps call-target addresses to function ids and keeps the ordered list of
/// entry-point nodes, owned by the [`crate::builder::CfgBuilder`] rather than
/// kept as process-global state.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    entries: Sequence<NodeId>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            entries: Sequence::new(),
        }
    }

    /// Register `entry` as a function entry point if it is not already one,
    /// returning its function id either way.
    pub fn register(&mut self, entry: NodeId) -> FunctionId {
        if let Some(id) = self.find(entry) {
            return id;
        }
        self.entries.push(entry);
        (self.entries.len() - 1) as FunctionId
    }

    pub fn find(&self, entry: NodeId) -> Option<FunctionId> {
        self.entries
            .iter()
            .position(|id| id == entry)
            .map(|i| i as FunctionId)
    }

    pub fn entry_point(&self, id: FunctionId) -> Option<NodeId> {
        self.entries.as_slice().get(id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_points(&self) -> &[NodeId] {
        self.entries.as_slice()
    }
}
