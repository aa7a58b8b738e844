//! Exercises the ELF `.text` locator against a hand-built minimal ELF header
//! fixture — no live ptrace child is spawned here, matching the rest of the
//! pack's practice of not unit-testing live tracing end-to-end (e.g.
//! `tv_core::disasm`'s tests feed Capstone byte arrays directly).

use std::io::Write;

use tracker_cli::elf::{locate_text, Bitness};

/// A hand-built minimal ELF64 file with a single `.text` section, enough for
/// `locate_text` to find it without needing a real executable.
fn minimal_elf64_with_text() -> Vec<u8> {
    const EHDR_SIZE: u64 = 64;
    const SHDR_SIZE: u64 = 64;
    let text_bytes = [0x90u8, 0x90, 0xC3]; // nop; nop; ret
    let shstrtab = b"\0.text\0.shstrtab\0";

    let text_off = EHDR_SIZE;
    let shstrtab_off = text_off + text_bytes.len() as u64;
    let shdr_off = shstrtab_off + shstrtab.len() as u64;

    let mut buf = vec![0u8; (shdr_off + SHDR_SIZE * 3) as usize];

    // e_ident
    buf[0..4].copy_from_slice(b"\x7FELF");
    buf[4] = 2; // ELFCLASS64
    buf[5] = 1; // little-endian
    buf[6] = 1; // EV_CURRENT
    // e_type (ET_EXEC), e_machine (EM_X86_64), e_version
    buf[16..18].copy_from_slice(&2u16.to_le_bytes());
    buf[18..20].copy_from_slice(&0x3Eu16.to_le_bytes());
    buf[20..24].copy_from_slice(&1u32.to_le_bytes());
    // e_shoff
    buf[40..48].copy_from_slice(&shdr_off.to_le_bytes());
    // e_ehsize, e_shentsize, e_shnum, e_shstrndx
    buf[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    buf[58..60].copy_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
    buf[60..62].copy_from_slice(&3u16.to_le_bytes());
    buf[62..64].copy_from_slice(&2u16.to_le_bytes());

    buf[text_off as usize..text_off as usize + text_bytes.len()].copy_from_slice(&text_bytes);
    buf[shstrtab_off as usize..shstrtab_off as usize + shstrtab.len()].copy_from_slice(shstrtab);

    // section 0: SHT_NULL, all zero (already).
    // section 1: .text
    let sh1 = shdr_off as usize + SHDR_SIZE as usize;
    buf[sh1..sh1 + 4].copy_from_slice(&1u32.to_le_bytes()); // sh_name -> ".text"
    buf[sh1 + 4..sh1 + 8].copy_from_slice(&1u32.to_le_bytes()); // SHT_PROGBITS
    buf[sh1 + 16..sh1 + 24].copy_from_slice(&0x401000u64.to_le_bytes()); // sh_addr
    buf[sh1 + 24..sh1 + 32].copy_from_slice(&text_off.to_le_bytes()); // sh_offset
    buf[sh1 + 32..sh1 + 40].copy_from_slice(&(text_bytes.len() as u64).to_le_bytes()); // sh_size

    // section 2: .shstrtab
    let sh2 = shdr_off as usize + 2 * SHDR_SIZE as usize;
    buf[sh2..sh2 + 4].copy_from_slice(&7u32.to_le_bytes()); // sh_name -> ".shstrtab"
    buf[sh2 + 4..sh2 + 8].copy_from_slice(&3u32.to_le_bytes()); // SHT_STRTAB
    buf[sh2 + 24..sh2 + 32].copy_from_slice(&shstrtab_off.to_le_bytes());
    buf[sh2 + 32..sh2 + 40].copy_from_slice(&(shstrtab.len() as u64).to_le_bytes());

    buf
}

#[test]
fn locates_text_section_in_minimal_elf() {
    let bytes = minimal_elf64_with_text();
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(&bytes).unwrap();

    let section = locate_text(f.path()).unwrap();
    assert_eq!(section.addr, 0x401000);
    assert_eq!(section.size, 3);
    assert_eq!(section.bitness, Bitness::X86_64);
}

#[test]
fn rejects_non_elf_file() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(b"not an elf file").unwrap();
    assert!(locate_text(f.path()).is_err());
}
