//! Front-end collaborators `spec.md` scopes out of the core engine: locating
//! a target's `.text` section, tracing it under `ptrace`, decoding the bytes
//! it executes, and rendering the resulting graph to Graphviz text.
//!
//! Exposed as a library, with `main.rs` as its thin consumer, so the ELF
//! locator can be exercised by integration tests under `tests/`.

pub mod decode;
pub mod dot;
pub mod elf;
pub mod tracer;
