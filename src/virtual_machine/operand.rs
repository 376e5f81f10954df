use crate::virtual_machine::errors::VMError;

/// Number of registers in a machine's register file (`a` through `z`).
pub const REGISTER_COUNT: usize = 26;

/// One of the 26 single-letter registers.
///
/// Always holds a valid index, so register file access never needs a bounds check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(u8);

impl Register {
    /// Returns the register named by `name`, or `None` if it is not in `a..=z`.
    pub const fn new(name: char) -> Option<Self> {
        if name.is_ascii_lowercase() {
            Some(Self(name as u8 - b'a'))
        } else {
            None
        }
    }

    /// Index into the register file.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The register's letter.
    pub const fn name(self) -> char {
        (b'a' + self.0) as char
    }
}

impl TryFrom<char> for Register {
    type Error = VMError;

    fn try_from(name: char) -> Result<Self, Self::Error> {
        Register::new(name).ok_or(VMError::InvalidRegister { name })
    }
}

/// Instruction operand: an immediate value or a register to read from / write to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    /// Signed immediate.
    Lit(i64),
    /// Register reference.
    Reg(Register),
}

/// Unused operand slot of unary instructions.
impl Default for Operand {
    fn default() -> Self {
        Operand::Lit(0)
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Operand::Lit(value)
    }
}

impl From<Register> for Operand {
    fn from(reg: Register) -> Self {
        Operand::Reg(reg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_accepts_lowercase_letters() {
        for (i, name) in ('a'..='z').enumerate() {
            let reg = Register::try_from(name).unwrap();
            assert_eq!(reg.index(), i);
            assert_eq!(reg.name(), name);
        }
    }

    #[test]
    fn register_rejects_everything_else() {
        for name in ['A', 'Z', '0', '{', '`', ' ', 'é'] {
            assert!(matches!(
                Register::try_from(name),
                Err(VMError::InvalidRegister { name: n }) if n == name
            ));
        }
    }

    #[test]
    fn register_count_matches_alphabet() {
        assert_eq!(('a'..='z').count(), REGISTER_COUNT);
    }

    #[test]
    fn operand_default_is_literal_zero() {
        assert_eq!(Operand::default(), Operand::Lit(0));
    }

    #[test]
    fn operand_conversions() {
        assert_eq!(Operand::from(-3), Operand::Lit(-3));
        let q = Register::new('q').unwrap();
        assert_eq!(Operand::from(q), Operand::Reg(q));
    }
}
