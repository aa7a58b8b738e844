//! CFG construction engine for the trace-driven disassembler.
//!
//! Consumes a stream of observed `(address, opcodes, size, label)` tuples
//! from an external single-step tracer and incrementally builds a control-
//! flow graph partitioned into functions, with `call`/`ret` pairing resolved
//! via an explicit call stack. Everything upstream of [`CfgBuilder::observe`]
//! (locating `.text`, spawning and single-stepping the traced process,
//! decoding opcodes to mnemonics) lives in the front-end crate; this crate
//! only consumes the resulting tuples.

pub mod builder;
pub mod classify;
pub mod error;
pub mod hash;
pub mod instruction;
pub mod node;
pub mod registry;
pub mod render;
pub mod sequence;
pub mod table;

pub use builder::{CallStack, Cfg, CfgBuilder};
pub use classify::{classify, InstrType};
pub use error::BuilderError;
pub use instruction::{Instruction, MAX_OPCODE_SIZE};
pub use node::{CfgNode, NodeId};
pub use registry::{FunctionId, FunctionRegistry};
pub use render::{render_all, render_function, BlockGraph, BlockId, RenderedBlock};
pub use sequence::Sequence;
pub use table::{AddressTable, DEFAULT_TABLE_SIZE};
