//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical instruction table and invokes a callback macro with it, so the
//! opcode enum, mnemonic lookup and the ISA fingerprint test are generated from
//! one list.
//!
//! This module generates:
//! - The [`Opcode`] enum with byte tags
//! - `TryFrom<u8>` and `FromStr` for decoding opcodes at load time
//!
//! # Operand kinds
//!
//! - `Dst`: must name a register, the instruction writes to it
//! - `Src`: literal or register, read through `value_of`
//! - `Any`: either; the handler decides (`rcv` reads it standalone, writes it in duet mode)

use crate::virtual_machine::errors::VMError;
use std::str::FromStr;

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Arithmetic
            // =========================
            /// set a, b ; a = b
            Set = 0x00, "set" => [a: Dst, b: Src],
            /// add a, b ; a += b (wrapping)
            Add = 0x01, "add" => [a: Dst, b: Src],
            /// sub a, b ; a -= b (wrapping)
            Sub = 0x02, "sub" => [a: Dst, b: Src],
            /// mul a, b ; a *= b (wrapping)
            Mul = 0x03, "mul" => [a: Dst, b: Src],
            /// mod a, b ; a %= b (truncating, sign follows the dividend; trap on zero)
            Mod = 0x04, "mod" => [a: Dst, b: Src],
            /// sqrt a, b ; a = ceil(sqrt(b)) (trap on negative b)
            Sqrt = 0x05, "sqrt" => [a: Dst, b: Src],
            // =========================
            // Communication
            // =========================
            /// snd a ; send a to the peer, or remember it as the last sent value
            Snd = 0x10, "snd" => [a: Src],
            /// rcv a ; duet: a = dequeue (blocking) ; standalone: recover last sent if a != 0
            Rcv = 0x11, "rcv" => [a: Any],
            // =========================
            // Control Flow
            // =========================
            /// jgz a, b ; if a > 0 then ip += b
            Jgz = 0x20, "jgz" => [a: Src, b: Src],
            /// jlz a, b ; if a < 0 then ip += b
            Jlz = 0x21, "jlz" => [a: Src, b: Src],
            /// jnz a, b ; if a != 0 then ip += b
            Jnz = 0x22, "jnz" => [a: Src, b: Src],
            /// jge a, b ; if a <= 0 then ip += b (same test as jle, kept as-is)
            Jge = 0x23, "jge" => [a: Src, b: Src],
            /// jle a, b ; if a <= 0 then ip += b
            Jle = 0x24, "jle" => [a: Src, b: Src],
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        /// Closed set of operations understood by the VM.
        #[repr(u8)]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Opcode::$name), )*
                    _ => Err(VMError::InvalidInstruction { opcode: value }),
                }
            }
        }

        impl Opcode {
            /// Every opcode, in table order.
            pub const ALL: &'static [Opcode] = &[$( Opcode::$name ),*];

            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Looks up an opcode by its mnemonic.
            pub fn from_mnemonic(name: &str) -> Result<Self, VMError> {
                match name {
                    $( $mnemonic => Ok(Opcode::$name), )*
                    _ => Err(VMError::InvalidInstructionName {
                        name: name.to_string(),
                    }),
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);

impl FromStr for Opcode {
    type Err = VMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Opcode::from_mnemonic(s)
    }
}
