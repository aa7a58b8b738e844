//! Function/basic-block renderer: walks the node graph from a function
//! entry, coalescing straight-line runs into basic blocks.
//!
//! The walk is naturally recursive over the node graph, but a trace of
//! millions of instructions can defeat the native call stack, so this uses
//! an explicit work queue instead.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::builder::Cfg;
use crate::classify::InstrType;
use crate::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// One coalesced basic block: the newline-concatenation of its constituent
/// node labels, plus the node its walk started from.
#[derive(Debug, Clone)]
pub struct RenderedBlock {
    pub id: BlockId,
    pub label: String,
    pub entry: NodeId,
}

/// The per-function block graph produced by [`render_function`].
#[derive(Debug, Default, Clone)]
pub struct BlockGraph {
    pub blocks: Vec<RenderedBlock>,
    edges: Vec<(BlockId, BlockId)>,
}

impl BlockGraph {
    pub fn edges(&self) -> &[(BlockId, BlockId)] {
        &self.edges
    }
}

/// A successor continues the current block iff it isn't the block's own
/// start (a self-loop back-edge) and isn't a control-flow join (in-degree
/// greater than one) — both cases instead start a new block.
fn continues_block(cfg: &Cfg, candidate: NodeId, block_start: NodeId) -> bool {
    candidate != block_start && cfg.table().get(candidate).in_degree() <= 1
}

/// Render one function's block graph, starting from its entry node.
pub fn render_function(cfg: &Cfg, entry: NodeId) -> BlockGraph {
    let mut blocks = Vec::new();
    let mut block_of: HashMap<NodeId, BlockId> = HashMap::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    let mut queued: HashSet<NodeId> = HashSet::new();
    let mut pending_edges: Vec<(NodeId, NodeId)> = Vec::new();

    queue.push_back(entry);
    queued.insert(entry);

    while let Some(start) = queue.pop_front() {
        if block_of.contains_key(&start) {
            continue;
        }
        let block_id = BlockId(blocks.len() as u32);
        block_of.insert(start, block_id);

        let mut labels = Vec::new();
        let mut node_id = start;
        let mut next_starts: Vec<NodeId> = Vec::new();

        loop {
            let node = cfg.table().get(node_id);
            labels.push(node.label().to_string());

            match node.instr().ty() {
                InstrType::Basic => match node.fall_through() {
                    Some(succ) if continues_block(cfg, succ, start) => {
                        node_id = succ;
                        continue;
                    }
                    Some(succ) => {
                        next_starts.push(succ);
                    }
                    None => {}
                },
                InstrType::Branch | InstrType::Jump => {
                    next_starts.extend(node.successors().iter().copied());
                }
                // A `ret`'s only modeled out-edge is the call-redirection
                // path onto its matching call's return site, which is wired
                // directly onto the *call* node, never onto the `ret` node
                // itself (see `CfgBuilder::wire_ret_edge`). An unmatched
                // `ret`'s own successor, if any, is not part of this
                // function's control flow and is not walked here.
                InstrType::Ret => {}
                InstrType::Call => {
                    let instr = node.instr();
                    let return_site = instr.address().wrapping_add(instr.size() as u64);
                    let return_succ = node
                        .successors()
                        .iter()
                        .copied()
                        .find(|&s| cfg.table().address_of(s) == return_site);
                    match return_succ {
                        Some(succ) if continues_block(cfg, succ, start) => {
                            node_id = succ;
                            continue;
                        }
                        Some(succ) => {
                            next_starts.push(succ);
                        }
                        None => {}
                    }
                }
            }
            break;
        }

        blocks.push(RenderedBlock {
            id: block_id,
            label: labels.join("\n"),
            entry: start,
        });

        for next in next_starts {
            pending_edges.push((start, next));
            if queued.insert(next) {
                queue.push_back(next);
            }
        }
    }

    let mut edges = Vec::new();
    let mut seen_edges = HashSet::new();
    for (from, to) in pending_edges {
        let (Some(&from_id), Some(&to_id)) = (block_of.get(&from), block_of.get(&to)) else {
            continue;
        };
        if seen_edges.insert((from_id, to_id)) {
            edges.push((from_id, to_id));
        }
    }

    BlockGraph { blocks, edges }
}

/// Render every function registered in `cfg`, in entry-point order.
pub fn render_all(cfg: &Cfg) -> Vec<BlockGraph> {
    cfg.functions()
        .entry_points()
        .iter()
        .map(|&entry| render_function(cfg, entry))
        .collect()
}
