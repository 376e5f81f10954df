//! Register virtual machine for duet programs.
//!
//! A program is a list of two-operand instructions over 26 integer registers
//! `a`..`z`. Machines run either alone or in pairs ("duet"), where each
//! machine's `snd` feeds the other's inbox and `rcv` blocks until a value
//! arrives.
//!
//! # Modules
//!
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`operand`]: Registers and literal/register operands
//! - [`program`]: Decoded instructions and shared programs
//! - [`queue`]: Blocking FIFO used as a machine inbox
//! - [`vm`]: Core virtual machine and its thread-safe handle
//! - [`duet`]: Two-machine driver with deadlock detection
//! - [`errors`]: Execution error types

pub mod duet;
pub mod errors;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod operand;
pub mod program;
pub mod queue;
pub mod vm;
