//! CFG node: an instruction plus its out-edges, in-degree, owning function,
//! and pre-rendered label.

use crate::classify::InstrType;
use crate::instruction::Instruction;

/// An index handle into the [`crate::table::AddressTable`]'s node arena.
///
/// Successor edges are stored as `NodeId`s rather than owning references, so
/// the arena is the sole owner of every node and cyclic control flow (loops,
/// recursion) needs no reference-counting to reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Initial successor-vector capacity by instruction type, per the node
/// fan-out policy: bounded for `basic`/`branch`, grown geometrically for
/// `call`/`jump`/`ret`.
fn initial_capacity(ty: InstrType) -> usize {
    match ty {
        InstrType::Basic => 1,
        InstrType::Branch => 2,
        InstrType::Call | InstrType::Jump | InstrType::Ret => 2,
    }
}

/// A node wraps one instruction and its variable-fan-out successor list.
#[derive(Debug, Clone)]
pub struct CfgNode {
    instr: Instruction,
    label: String,
    in_degree: u16,
    out_degree: u16,
    function_id: u16,
    successors: Vec<NodeId>,
}

impl CfgNode {
    pub(crate) fn new(instr: Instruction, label: String, function_id: u16) -> Self {
        let cap = initial_capacity(instr.ty());
        Self {
            instr,
            label,
            in_degree: 0,
            out_degree: 0,
            function_id,
            successors: Vec::with_capacity(cap),
        }
    }

    pub fn instr(&self) -> &Instruction {
        &self.instr
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn in_degree(&self) -> u16 {
        self.in_degree
    }

    pub fn out_degree(&self) -> u16 {
        self.out_degree
    }

    pub fn function_id(&self) -> u16 {
        self.function_id
    }

    pub fn successors(&self) -> &[NodeId] {
        &self.successors
    }

    pub(crate) fn set_function_id(&mut self, id: u16) {
        self.function_id = id;
    }

    pub(crate) fn bump_in_degree(&mut self) {
        self.in_degree += 1;
    }

    /// Returns `true` if `target` is already among this node's successors
    /// (by address, compared against the caller-provided address since the
    /// caller only ever has the candidate's address at hand).
    pub(crate) fn has_successor_address(&self, target_addr: u64, resolve: impl Fn(NodeId) -> u64) -> bool {
        self.successors.iter().any(|&s| resolve(s) == target_addr)
    }

    /// Unconditionally append `target` to the successor list, growing the
    /// backing vector geometrically (double capacity at powers of two)
    /// ahead of the push for `call`/`jump`/`ret` nodes, matching the fan-out
    /// policy in the node's state machine.
    pub(crate) fn push_successor(&mut self, target: NodeId) {
        if matches!(self.instr.ty(), InstrType::Call | InstrType::Jump | InstrType::Ret) {
            let len = self.successors.len();
            if len > 0 && (len & (len - 1)) == 0 {
                self.successors.reserve(len);
            }
        }
        self.successors.push(target);
        self.out_degree += 1;
    }

    /// Slot 0 if present (fall-through for a `branch`, sole successor for a
    /// `basic`).
    pub fn fall_through(&self) -> Option<NodeId> {
        self.successors.first().copied()
    }

    /// Place `target` at a specific slot, shifting later entries right.
    /// Used only to re-order a `branch` node's two successors so that slot 0
    /// ends up holding the fall-through target regardless of which target
    /// was observed first.
    pub(crate) fn insert_successor(&mut self, idx: usize, target: NodeId) {
        self.successors.insert(idx, target);
        self.out_degree += 1;
    }
}
