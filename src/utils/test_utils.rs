//! Test utilities for building programs.

#[cfg(test)]
pub mod utils {
    use crate::virtual_machine::isa::Opcode;
    use crate::virtual_machine::operand::{Operand, Register};
    use crate::virtual_machine::program::{Instr, Program};

    pub fn reg(name: char) -> Register {
        Register::try_from(name).expect("bad register")
    }

    /// Single letter -> register, anything else -> literal.
    pub fn operand(token: &str) -> Operand {
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => Operand::Reg(reg(c)),
            _ => Operand::Lit(token.parse().expect("bad literal")),
        }
    }

    /// Builds an instruction from `"<opcode> <a> [<b>]"`.
    pub fn instr(line: &str) -> Instr {
        let mut tokens = line.split_whitespace();
        let opcode = Opcode::from_mnemonic(tokens.next().expect("empty line")).expect("bad opcode");
        let a = operand(tokens.next().expect("missing operand"));
        match tokens.next() {
            Some(b) => Instr::new(opcode, a, operand(b)),
            None => Instr::unary(opcode, a),
        }
    }

    pub fn program(lines: &[&str]) -> Program {
        lines.iter().map(|line| instr(line)).collect()
    }
}
