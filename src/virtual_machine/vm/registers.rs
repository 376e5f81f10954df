use crate::virtual_machine::operand::{REGISTER_COUNT, Register};

/// Register file holding one machine's integer registers.
///
/// Owned by the machine's own thread; never shared with the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct Registers {
    regs: [i64; REGISTER_COUNT],
}

impl Registers {
    /// Creates a zeroed register file.
    pub(super) fn new() -> Self {
        Self {
            regs: [0; REGISTER_COUNT],
        }
    }

    pub(super) fn get(&self, reg: Register) -> i64 {
        self.regs[reg.index()]
    }

    pub(super) fn set(&mut self, reg: Register, value: i64) {
        self.regs[reg.index()] = value;
    }

    pub(super) fn as_array(&self) -> &[i64; REGISTER_COUNT] {
        &self.regs
    }
}
