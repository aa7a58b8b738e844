//! The incremental CFG builder: the engine's central algorithm.
//!
//! Consumes one observed instruction at a time and maintains the current
//! node, the call stack, and the function-entry registry, wiring edges under
//! the per-opcode policy described at each wiring site below.

use log::warn;

use crate::classify::InstrType;
use crate::error::BuilderError;
use crate::instruction::Instruction;
use crate::node::{CfgNode, NodeId};
use crate::registry::{FunctionId, FunctionRegistry};
use crate::sequence::Sequence;
use crate::table::AddressTable;

/// LIFO of unmatched `call` nodes, most recent on top.
pub type CallStack = Sequence<NodeId>;

/// Stateful ingester of `(instruction, label)` pairs.
#[derive(Debug)]
pub struct CfgBuilder {
    table: AddressTable,
    cur: Option<NodeId>,
    call_stack: CallStack,
    functions: FunctionRegistry,
}

impl CfgBuilder {
    pub fn new(table_size: usize) -> Result<Self, BuilderError> {
        Ok(Self {
            table: AddressTable::new(table_size)?,
            cur: None,
            call_stack: Sequence::new(),
            functions: FunctionRegistry::new(),
        })
    }

    pub fn table(&self) -> &AddressTable {
        &self.table
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn call_stack_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn current(&self) -> Option<NodeId> {
        self.cur
    }

    /// Ingest one traced instruction. See the module-level per-observation
    /// protocol: bootstrap on the first call, otherwise allocate (if the
    /// address is new) or reuse (if already seen) a node and wire the edge
    /// from the current node.
    ///
    /// On [`BuilderError::InconsistentTrace`] the observation is dropped and
    /// `self` is left exactly as it was before the call; on any other error
    /// the builder should be considered tainted.
    pub fn observe(&mut self, ip: u64, opcodes: &[u8], size: u8, label: String) -> Result<(), BuilderError> {
        let ins = Instruction::new(ip, size, opcodes)?;
        let existing = self.table.lookup(ip, opcodes);

        let cur_id = match self.cur {
            None => {
                let id = self.table.insert(CfgNode::new(ins, label, 0))?;
                self.functions.register(id);
                self.cur = Some(id);
                return Ok(());
            }
            Some(id) => id,
        };

        let cur_ty = self.table.get(cur_id).instr().ty();

        let visited = match existing {
            None => {
                let is_new_function = cur_ty == InstrType::Call;
                let id = self.table.insert(CfgNode::new(ins, label, 0))?;
                if is_new_function {
                    self.call_stack.push(cur_id);
                }
                let actual_parent = match self.wire_edge(cur_id, id) {
                    Ok(parent) => parent,
                    Err(e) => {
                        warn!("dropping observation at 0x{ip:x}: {e}");
                        // The node was already committed to the table's arena;
                        // undo that so a rejected wiring never leaves an
                        // unreachable node behind.
                        self.table.rollback_last(id, opcodes, ip);
                        return Err(e);
                    }
                };
                let function_id = if is_new_function {
                    self.functions.register(id)
                } else {
                    self.table.get(actual_parent).function_id()
                };
                self.table.get_mut(id).set_function_id(function_id);
                id
            }
            Some(id) => {
                if cur_ty == InstrType::Call {
                    self.call_stack.push(cur_id);
                }
                self.wire_edge(cur_id, id).map_err(|e| {
                    warn!("dropping observation at 0x{ip:x}: {e}");
                    e
                })?;
                id
            }
        };

        self.cur = Some(visited);
        Ok(())
    }

    pub fn finish(self) -> Cfg {
        Cfg {
            table: self.table,
            functions: self.functions,
        }
    }

    /// True if `child`'s address is already among `parent`'s successors.
    fn already_successor(&self, parent: NodeId, child_addr: u64) -> bool {
        let table = &self.table;
        table
            .get(parent)
            .has_successor_address(child_addr, |id| table.address_of(id))
    }

    /// Wire `parent → child` under the edge-wiring rules, returning the id
    /// of the node that actually received the edge — ordinarily `parent`,
    /// but a `ret` may redirect the edge onto the matching `call` on the
    /// stack instead. The caller uses the returned id to resolve `child`'s
    /// inherited `function_id`.
    fn wire_edge(&mut self, parent: NodeId, child: NodeId) -> Result<NodeId, BuilderError> {
        let parent_ty = self.table.get(parent).instr().ty();
        if parent_ty == InstrType::Ret {
            return self.wire_ret_edge(parent, child);
        }

        let child_addr = self.table.address_of(child);
        if self.already_successor(parent, child_addr) {
            return Ok(parent);
        }

        if self.table.get(parent).successors().is_empty() {
            self.table.get_mut(parent).push_successor(child);
            self.table.get_mut(child).bump_in_degree();
            return Ok(parent);
        }

        match parent_ty {
            InstrType::Basic => Err(BuilderError::InconsistentTrace(format!(
                "basic node at 0x{:x} would gain a second successor",
                self.table.address_of(parent)
            ))),
            InstrType::Branch => self.wire_branch_edge(parent, child, child_addr),
            InstrType::Call | InstrType::Jump => {
                self.table.get_mut(parent).push_successor(child);
                self.table.get_mut(child).bump_in_degree();
                Ok(parent)
            }
            InstrType::Ret => unreachable!("ret parents are handled above"),
        }
    }

    /// A `branch` node's slot 0 must end up holding the fall-through target
    /// and slot 1 the taken target, regardless of which one the trace
    /// happens to visit first (a taken branch is commonly observed before
    /// its fall-through, e.g. on a first pass through a loop guard).
    fn wire_branch_edge(&mut self, parent: NodeId, child: NodeId, child_addr: u64) -> Result<NodeId, BuilderError> {
        if self.table.get(parent).successors().len() >= 2 {
            return Err(BuilderError::InconsistentTrace(format!(
                "branch node at 0x{:x} would gain a third successor",
                self.table.address_of(parent)
            )));
        }

        let instr = self.table.get(parent).instr();
        let fall_through_addr = instr.address().wrapping_add(instr.size() as u64);
        let existing = self.table.get(parent).successors()[0];
        let existing_is_fall_through = self.table.address_of(existing) == fall_through_addr;
        let child_is_fall_through = child_addr == fall_through_addr;

        if child_is_fall_through && !existing_is_fall_through {
            self.table.get_mut(parent).insert_successor(0, child);
        } else {
            self.table.get_mut(parent).push_successor(child);
        }
        self.table.get_mut(child).bump_in_degree();
        Ok(parent)
    }

    /// A `ret`'s edge is preferentially redirected onto the `call` it
    /// matches on the stack, collapsing the call/ret round-trip into a
    /// direct `call → return-site` edge. If the stack is empty or its top
    /// doesn't match, the edge stays on the `ret` node itself.
    fn wire_ret_edge(&mut self, ret_node: NodeId, child: NodeId) -> Result<NodeId, BuilderError> {
        let child_addr = self.table.address_of(child);

        if let Some(top) = self.call_stack.top() {
            let call = self.table.get(top).instr();
            let return_site = call.address().wrapping_add(call.size() as u64);
            if child_addr == return_site {
                self.call_stack.pop();
                if !self.already_successor(top, child_addr) {
                    self.table.get_mut(top).push_successor(child);
                    self.table.get_mut(child).bump_in_degree();
                }
                return Ok(top);
            }
        }

        if !self.already_successor(ret_node, child_addr) {
            self.table.get_mut(ret_node).push_successor(child);
            self.table.get_mut(child).bump_in_degree();
        }
        Ok(ret_node)
    }
}

/// The completed graph handed back by [`CfgBuilder::finish`]: an owning
/// table of every node visited, plus the ordered function-entry registry.
#[derive(Debug)]
pub struct Cfg {
    table: AddressTable,
    functions: FunctionRegistry,
}

impl Cfg {
    pub fn table(&self) -> &AddressTable {
        &self.table
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn function_id_of(&self, id: NodeId) -> FunctionId {
        self.table.get(id).function_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe_all(b: &mut CfgBuilder, trace: &[(u64, &[u8])]) {
        for &(addr, opcodes) in trace {
            b.observe(addr, opcodes, opcodes.len() as u8, format!("0x{addr:x}"))
                .unwrap();
        }
    }

    #[test]
    fn single_basic_block() {
        let mut b = CfgBuilder::new(64).unwrap();
        observe_all(
            &mut b,
            &[
                (0x400, &[0x90]),       // nop (basic)
                (0x401, &[0x48, 0x89]), // basic, size 2
                (0x403, &[0x90]),       // basic
            ],
        );
        let cfg = b.finish();
        assert_eq!(cfg.table().entries(), 3);
        let a = cfg.table().lookup(0x400, &[0x90]).unwrap();
        let c = cfg.table().lookup(0x401, &[0x48, 0x89]).unwrap();
        assert_eq!(cfg.table().get(a).successors(), &[c]);
        assert_eq!(cfg.functions().len(), 1);
    }

    #[test]
    fn taken_then_fallthrough_on_reentry_orders_branch_slots() {
        let mut b = CfgBuilder::new(64).unwrap();
        // First pass: branch taken to 0x510.
        b.observe(0x500, &[0x75, 0x0E], 2, "0x500".into()).unwrap(); // jne, taken
        b.observe(0x510, &[0x90], 1, "0x510".into()).unwrap();
        b.observe(0x511, &[0xC3], 1, "0x511".into()).unwrap(); // ret, unmatched
        // Re-entry: branch falls through to 0x502.
        b.observe(0x500, &[0x75, 0x0E], 2, "0x500".into()).unwrap();
        b.observe(0x502, &[0x90], 1, "0x502".into()).unwrap();

        let cfg = b.finish();
        let branch = cfg.table().lookup(0x500, &[0x75, 0x0E]).unwrap();
        let node = cfg.table().get(branch);
        assert_eq!(node.successors().len(), 2);
        assert_eq!(cfg.table().address_of(node.successors()[0]), 0x502);
        assert_eq!(cfg.table().address_of(node.successors()[1]), 0x510);
    }

    #[test]
    fn call_return_round_trip_redirects_to_return_site() {
        let mut b = CfgBuilder::new(64).unwrap();
        b.observe(0x600, &[0xE8, 0, 0, 0, 0], 5, "call".into()).unwrap();
        b.observe(0x700, &[0x48, 0x89], 2, "mov".into()).unwrap();
        b.observe(0x702, &[0xC3], 1, "ret".into()).unwrap();
        b.observe(0x605, &[0x48, 0x89], 2, "mov".into()).unwrap();

        let cfg = b.finish();
        let call_node = cfg.table().lookup(0x600, &[0xE8, 0, 0, 0, 0]).unwrap();
        let ret_node = cfg.table().lookup(0x702, &[0xC3]).unwrap();
        let callee = cfg.table().lookup(0x700, &[0x48, 0x89]).unwrap();
        let return_site = cfg.table().lookup(0x605, &[0x48, 0x89]).unwrap();

        assert_eq!(cfg.table().get(call_node).successors(), &[callee, return_site]);
        assert!(cfg.table().get(ret_node).successors().is_empty());
        assert_eq!(cfg.functions().len(), 2);
    }

    #[test]
    fn unmatched_return_keeps_its_own_edge() {
        let mut b = CfgBuilder::new(64).unwrap();
        b.observe(0x800, &[0xC3], 1, "ret".into()).unwrap();
        b.observe(0x801, &[0x90], 1, "nop".into()).unwrap();

        let cfg = b.finish();
        let ret_node = cfg.table().lookup(0x800, &[0xC3]).unwrap();
        let next = cfg.table().lookup(0x801, &[0x90]).unwrap();
        assert_eq!(cfg.table().get(ret_node).successors(), &[next]);
    }

    #[test]
    fn indirect_jump_grows_fanout_geometrically() {
        let mut b = CfgBuilder::new(64).unwrap();
        b.observe(0xA00, &[0xFF, 0xE0], 2, "jmp rax".into()).unwrap();
        for target in [0xB00u64, 0xB40, 0xB80, 0xBC0, 0xC00] {
            b.observe(target, &[0x90], 1, format!("0x{target:x}")).unwrap();
            // Re-observe the jump so the next target is wired from it again.
            if target != 0xC00 {
                b.observe(0xA00, &[0xFF, 0xE0], 2, "jmp rax".into()).unwrap();
            }
        }
        let cfg = b.finish();
        let jmp = cfg.table().lookup(0xA00, &[0xFF, 0xE0]).unwrap();
        assert_eq!(cfg.table().get(jmp).out_degree(), 5);
    }

    #[test]
    fn self_loop_has_single_back_edge() {
        let mut b = CfgBuilder::new(64).unwrap();
        b.observe(0xD00, &[0xEB, 0xFE], 2, "jmp self".into()).unwrap();
        b.observe(0xD00, &[0xEB, 0xFE], 2, "jmp self".into()).unwrap();
        let cfg = b.finish();
        let node = cfg.table().lookup(0xD00, &[0xEB, 0xFE]).unwrap();
        assert_eq!(cfg.table().get(node).successors(), &[node]);
        assert_eq!(cfg.table().get(node).in_degree(), 1);
    }

    #[test]
    fn basic_node_gaining_second_successor_is_inconsistent() {
        let mut b = CfgBuilder::new(64).unwrap();
        b.observe(0x10, &[0x90], 1, "a".into()).unwrap();
        b.observe(0x11, &[0x90], 1, "b".into()).unwrap();
        // Re-observing 0x10 then diverting to a different address is
        // inconsistent for a `basic` node (at most one successor).
        b.observe(0x10, &[0x90], 1, "a".into()).unwrap();
        let err = b.observe(0x20, &[0x90], 1, "c".into()).unwrap_err();
        assert!(matches!(err, BuilderError::InconsistentTrace(_)));
    }

    #[test]
    fn rejected_wiring_leaves_no_orphan_node_in_the_table() {
        let mut b = CfgBuilder::new(64).unwrap();
        b.observe(0x10, &[0x90], 1, "a".into()).unwrap();
        b.observe(0x11, &[0x90], 1, "b".into()).unwrap();
        b.observe(0x10, &[0x90], 1, "a".into()).unwrap();
        assert!(b.observe(0x20, &[0x90], 1, "c".into()).is_err());

        let cfg = b.finish();
        // Only 0x10 and 0x11 ever got wired in; the rejected 0x20 must not
        // have been committed to the table behind the scenes.
        assert_eq!(cfg.table().entries(), 2);
        assert!(cfg.table().lookup(0x20, &[0x90]).is_none());
    }

    #[test]
    fn dropped_observation_leaves_builder_usable() {
        let mut b = CfgBuilder::new(64).unwrap();
        b.observe(0x10, &[0x90], 1, "a".into()).unwrap();
        b.observe(0x11, &[0x90], 1, "b".into()).unwrap();
        b.observe(0x10, &[0x90], 1, "a".into()).unwrap();
        assert!(b.observe(0x20, &[0x90], 1, "c".into()).is_err());
        // The builder keeps working afterwards.
        assert!(b.observe(0x11, &[0x90], 1, "b".into()).is_ok());
    }

    #[test]
    fn no_two_nodes_share_an_address_across_a_trace() {
        let mut b = CfgBuilder::new(64).unwrap();
        observe_all(
            &mut b,
            &[(0x10, &[0x90]), (0x20, &[0x90]), (0x10, &[0x90]), (0x20, &[0x90])],
        );
        let cfg = b.finish();
        assert_eq!(cfg.table().entries(), 2);
    }
}
