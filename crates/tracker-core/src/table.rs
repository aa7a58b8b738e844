//! Address-indexed instruction table.
//!
//! Doubles as the CFG's node arena (see the module-level design note in
//! [`crate::node`]): buckets hold [`NodeId`] index handles, not owning
//! references, so the table is the single owner of every node and no
//! reference-cycle reclamation is needed for loops or recursion in the graph.

use crate::error::BuilderError;
use crate::hash::bucket_index;
use crate::node::{CfgNode, NodeId};

/// Default bucket count, matching the original `DEFAULT_HASHTABLE_SIZE`
/// (2^16).
pub const DEFAULT_TABLE_SIZE: usize = 1 << 16;

/// Fixed-size array of buckets, open-addressed by bucket with per-bucket
/// chaining, memoizing nodes so each program address appears once.
#[derive(Debug)]
pub struct AddressTable {
    arena: Vec<CfgNode>,
    buckets: Vec<Vec<NodeId>>,
    collisions: usize,
}

impl AddressTable {
    /// Allocate `size` empty buckets. Fails with
    /// [`BuilderError::InvalidArgument`] on `size == 0`.
    pub fn new(size: usize) -> Result<Self, BuilderError> {
        if size == 0 {
            return Err(BuilderError::InvalidArgument("table size must be non-zero"));
        }
        Ok(Self {
            arena: Vec::new(),
            buckets: vec![Vec::new(); size],
            collisions: 0,
        })
    }

    /// Look up a node by instruction address and opcode bytes. `opcodes`
    /// must be the bytes observed at `address` — the bucket is keyed on
    /// both, matching the original hashtable's `hashtable_lookup`, which
    /// hashes the full `instr_t` rather than the bare address.
    pub fn lookup(&self, address: u64, opcodes: &[u8]) -> Option<NodeId> {
        let bucket = &self.buckets[self.bucket_for(opcodes, address)];
        bucket
            .iter()
            .copied()
            .find(|&id| self.arena[id.index()].instr().address() == address)
    }

    /// Insert a freshly-built node. If a node at the same address already
    /// occupies the bucket, the existing entry wins and `node` is dropped —
    /// the caller never has to reclaim it explicitly, unlike the hashtable
    /// this engine is modeled on, which leaks the redundant node.
    ///
    /// Fails with [`BuilderError::AllocationFailure`] if the bucket's backing
    /// vector can't grow to hold the new entry — the one place in the engine
    /// where a fallible allocation is meaningful, since everywhere else Rust's
    /// global allocator aborts the process rather than returning an error.
    pub fn insert(&mut self, node: CfgNode) -> Result<NodeId, BuilderError> {
        let address = node.instr().address();
        if let Some(existing) = self.lookup(address, node.instr().opcodes()) {
            return Ok(existing);
        }

        let idx = self.bucket_for(node.instr().opcodes(), address);
        let bucket = &mut self.buckets[idx];
        if !bucket.is_empty() {
            self.collisions += 1;
        }
        bucket
            .try_reserve(1)
            .map_err(|_| BuilderError::AllocationFailure(address))?;

        let id = NodeId(self.arena.len() as u32);
        self.arena.push(node);
        self.buckets[idx].push(id);
        Ok(id)
    }

    /// Undo the most recent [`insert`](Self::insert) of `id`, as if it had
    /// never happened. Only valid when `id` is still the last arena slot and
    /// nothing else has referenced it yet — used to back out a node whose
    /// edge wiring then failed, so a rejected observation never leaves an
    /// unreachable node behind.
    pub(crate) fn rollback_last(&mut self, id: NodeId, opcodes: &[u8], address: u64) {
        debug_assert_eq!(id.index(), self.arena.len() - 1);
        self.arena.pop();

        let idx = self.bucket_for(opcodes, address);
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket.iter().position(|&x| x == id) {
            bucket.remove(pos);
            if !bucket.is_empty() {
                self.collisions -= 1;
            }
        }
    }

    pub fn get(&self, id: NodeId) -> &CfgNode {
        &self.arena[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut CfgNode {
        &mut self.arena[id.index()]
    }

    /// Number of distinct addresses stored.
    pub fn entries(&self) -> usize {
        self.arena.len()
    }

    /// Number of insertions that landed in an already-non-empty bucket.
    pub fn collisions(&self) -> usize {
        self.collisions
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Resolve a `NodeId` to its instruction's address — used by callers
    /// needing address-level comparisons against a node they only hold an id
    /// for (e.g. duplicate-successor checks).
    pub fn address_of(&self, id: NodeId) -> u64 {
        self.arena[id.index()].instr().address()
    }

    fn bucket_for(&self, opcodes: &[u8], address: u64) -> usize {
        bucket_index(opcodes, address, self.buckets.len())
    }
}
