//! Loaded program representation.
//!
//! A [`Program`] is an immutable, reference-counted list of [`Instr`]. Both
//! machines of a duet hold a clone of the same program; cloning never copies
//! instructions.

use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::operand::Operand;
use std::ops::Deref;
use std::sync::Arc;

/// A single decoded instruction.
///
/// Unary opcodes (`snd`, `rcv`) ignore `b`, which defaults to literal `0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instr {
    pub opcode: Opcode,
    pub a: Operand,
    pub b: Operand,
}

impl Instr {
    /// Creates a two-operand instruction.
    pub fn new(opcode: Opcode, a: impl Into<Operand>, b: impl Into<Operand>) -> Self {
        Self {
            opcode,
            a: a.into(),
            b: b.into(),
        }
    }

    /// Creates an instruction whose second operand slot is unused.
    pub fn unary(opcode: Opcode, a: impl Into<Operand>) -> Self {
        Self {
            opcode,
            a: a.into(),
            b: Operand::default(),
        }
    }
}

/// Shared, read-only instruction list.
#[derive(Clone, Debug, Default)]
pub struct Program {
    instructions: Arc<[Instr]>,
}

impl Program {
    /// Wraps an already decoded instruction list.
    pub fn new(instructions: Vec<Instr>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }

    /// Returns true if both values refer to the same underlying instruction list.
    pub fn ptr_eq(&self, other: &Program) -> bool {
        Arc::ptr_eq(&self.instructions, &other.instructions)
    }
}

impl Deref for Program {
    type Target = [Instr];

    fn deref(&self) -> &[Instr] {
        &self.instructions
    }
}

impl From<Vec<Instr>> for Program {
    fn from(instructions: Vec<Instr>) -> Self {
        Program::new(instructions)
    }
}

impl FromIterator<Instr> for Program {
    fn from_iter<I: IntoIterator<Item = Instr>>(iter: I) -> Self {
        Program::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::operand::Register;

    fn reg(name: char) -> Register {
        Register::new(name).unwrap()
    }

    #[test]
    fn unary_leaves_second_slot_default() {
        let instr = Instr::unary(Opcode::Snd, reg('p'));
        assert_eq!(instr.a, Operand::Reg(reg('p')));
        assert_eq!(instr.b, Operand::Lit(0));
    }

    #[test]
    fn clones_share_instructions() {
        let program = Program::new(vec![
            Instr::new(Opcode::Set, reg('a'), 1),
            Instr::new(Opcode::Add, reg('a'), reg('b')),
        ]);
        let copy = program.clone();
        assert!(program.ptr_eq(&copy));
        assert_eq!(copy.len(), 2);
        assert_eq!(copy[1].opcode, Opcode::Add);
    }

    #[test]
    fn separately_built_programs_are_distinct() {
        let a: Program = vec![Instr::unary(Opcode::Snd, 1)].into();
        let b: Program = std::iter::once(Instr::unary(Opcode::Snd, 1)).collect();
        assert!(!a.ptr_eq(&b));
        assert_eq!(&*a, &*b);
    }

    #[test]
    fn empty_program() {
        let program = Program::default();
        assert!(program.is_empty());
        assert!(program.first().is_none());
    }
}
