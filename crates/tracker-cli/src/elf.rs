//! Locates the `.text` section of a traced executable.
//!
//! Replaces `original_source/src/tracker.c`'s `get_text_info`, which walked
//! the ELF section header table by hand with raw `fseek`/`fread` arithmetic.
//! `goblin` parses the whole header for us and also tells us whether the
//! binary is 32- or 64-bit, which the decoder needs to pick a Capstone mode.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use goblin::elf::Elf;

/// Target architecture word size, read off the ELF class byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    X86_32,
    X86_64,
}

/// Virtual address range of the executable's `.text` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSection {
    pub addr: u64,
    pub size: u64,
    pub bitness: Bitness,
}

/// Parse `path` as an ELF file and locate its `.text` section.
pub fn locate_text(path: &Path) -> Result<TextSection> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let elf = Elf::parse(&bytes).with_context(|| format!("{} is not a valid ELF file", path.display()))?;

    let bitness = if elf.is_64 { Bitness::X86_64 } else { Bitness::X86_32 };
    match elf.header.e_machine {
        goblin::elf::header::EM_X86_64 | goblin::elf::header::EM_386 => {}
        other => bail!("unsupported ELF machine type {other}, tracker only traces x86/x86-64"),
    }

    let section = elf
        .section_headers
        .iter()
        .find(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(".text"))
        .context("no .text section in ELF file")?;

    Ok(TextSection {
        addr: section.sh_addr,
        size: section.sh_size,
        bitness,
    })
}
