//! Immutable record of one decoded instruction.

use crate::classify::{classify, InstrType};
use crate::error::BuilderError;

/// x86 hard limit: the longest valid instruction encoding is 15 bytes.
pub const MAX_OPCODE_SIZE: u8 = 15;

/// One decoded instruction, exclusively owned by the [`crate::node::CfgNode`]
/// that wraps it. Two instructions are considered the same iff their
/// addresses are equal — the address-indexed table keys on address alone.
#[derive(Debug, Clone)]
pub struct Instruction {
    address: u64,
    size: u8,
    opcodes: Vec<u8>,
    ty: InstrType,
}

impl Instruction {
    /// Build and classify a new instruction.
    ///
    /// Fails with [`BuilderError::InvalidArgument`] if `size` is zero, the
    /// opcode buffer is empty, or their lengths disagree.
    pub fn new(address: u64, size: u8, opcodes: &[u8]) -> Result<Self, BuilderError> {
        if size == 0 {
            return Err(BuilderError::InvalidArgument("instruction size must be non-zero"));
        }
        if opcodes.is_empty() {
            return Err(BuilderError::InvalidArgument("opcode buffer must be non-empty"));
        }
        if opcodes.len() != size as usize {
            return Err(BuilderError::InvalidArgument(
                "opcode buffer length must match declared size",
            ));
        }

        let ty = classify(opcodes);

        Ok(Self {
            address,
            size,
            opcodes: opcodes.to_vec(),
            ty,
        })
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn opcodes(&self) -> &[u8] {
        &self.opcodes
    }

    pub fn ty(&self) -> InstrType {
        self.ty
    }

    /// The address immediately following this instruction — the fall-through
    /// address for a `branch`, or the return site for a `call`.
    pub fn next_address(&self) -> u64 {
        self.address.wrapping_add(self.size as u64)
    }

    /// Two instructions are "the same" iff their addresses match.
    pub fn same_address(&self, other: &Instruction) -> bool {
        self.address == other.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_size() {
        let err = Instruction::new(0x1000, 0, &[]).unwrap_err();
        assert_eq!(err, BuilderError::InvalidArgument("instruction size must be non-zero"));
    }

    #[test]
    fn rejects_empty_opcodes() {
        let err = Instruction::new(0x1000, 1, &[]).unwrap_err();
        assert!(matches!(err, BuilderError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_mismatched_length() {
        let err = Instruction::new(0x1000, 2, &[0x90]).unwrap_err();
        assert!(matches!(err, BuilderError::InvalidArgument(_)));
    }

    #[test]
    fn classifies_on_construction() {
        let ins = Instruction::new(0x1000, 1, &[0xC3]).unwrap();
        assert_eq!(ins.ty(), InstrType::Ret);
    }

    #[test]
    fn next_address_is_address_plus_size() {
        let ins = Instruction::new(0x1000, 5, &[0xE8, 0, 0, 0, 0]).unwrap();
        assert_eq!(ins.next_address(), 0x1005);
    }

    #[test]
    fn same_address_ignores_opcodes() {
        let a = Instruction::new(0x1000, 1, &[0x90]).unwrap();
        let b = Instruction::new(0x1000, 1, &[0xC3]).unwrap();
        assert!(a.same_address(&b));
    }
}
