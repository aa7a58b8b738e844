//! Wraps Capstone to turn raw opcode bytes observed at an address into a
//! `(size, label)` pair for [`tracker_core::CfgBuilder::observe`].
//!
//! Ported from `tv_core::disasm::create_capstone`'s per-architecture builder
//! chain, narrowed to the x86-32/x86-64 modes this system's classifier
//! covers, and built in both syntaxes up front the way
//! `original_source/src/tracker.c`'s `-i`/`--intel` flag picks between them
//! at startup rather than per instruction.

use anyhow::{Context, Result};
use capstone::prelude::*;

use crate::elf::Bitness;

pub struct Decoder {
    cs: Capstone,
}

impl Decoder {
    pub fn new(bitness: Bitness, intel_syntax: bool) -> Result<Self> {
        let mode = match bitness {
            Bitness::X86_64 => arch::x86::ArchMode::Mode64,
            Bitness::X86_32 => arch::x86::ArchMode::Mode32,
        };
        let syntax = if intel_syntax {
            arch::x86::ArchSyntax::Intel
        } else {
            arch::x86::ArchSyntax::Att
        };

        let cs = Capstone::new()
            .x86()
            .mode(mode)
            .syntax(syntax)
            .detail(false)
            .build()
            .context("failed to initialize Capstone")?;

        Ok(Self { cs })
    }

    /// Decode the single instruction starting at `address` out of `window`
    /// (the raw bytes read from the tracee at its instruction pointer).
    /// Returns the instruction's size and a rendered "mnemonic operands"
    /// label, or `None` if Capstone can't make sense of the bytes (e.g. a
    /// truncated read at the end of mapped memory).
    pub fn decode_one(&self, address: u64, window: &[u8]) -> Option<(u8, String)> {
        let insns = self.cs.disasm_count(window, address, 1).ok()?;
        let insn = insns.iter().next()?;
        let label = match insn.op_str() {
            Some(ops) if !ops.is_empty() => format!("{} {}", insn.mnemonic().unwrap_or("???"), ops),
            _ => insn.mnemonic().unwrap_or("???").to_string(),
        };
        Some((insn.bytes().len() as u8, label))
    }
}
