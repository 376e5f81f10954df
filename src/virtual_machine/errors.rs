use duet_derive::Error;

/// Errors that can occur while loading instructions, executing them, or
/// driving two machines in duet mode.
///
/// Running off either end of the program is not an error: it is the HALTED
/// state. A deadlock is not an error either; see [`DuetOutcome`](super::duet::DuetOutcome).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VMError {
    /// Opcode byte with no entry in the instruction table.
    #[error("invalid instruction: {opcode:#04x}")]
    InvalidInstruction { opcode: u8 },
    /// Unrecognized instruction mnemonic.
    #[error("invalid instruction name: {name}")]
    InvalidInstructionName { name: String },
    /// Register identifier outside `a..=z`.
    #[error("invalid register {name:?}, expected one of 'a'..='z'")]
    InvalidRegister { name: char },
    /// A literal was supplied where the instruction writes to a register.
    #[error("ip {ip}: {instruction} expected a register destination but got literal {value}")]
    InvalidOperand {
        ip: usize,
        instruction: &'static str,
        value: i64,
    },
    /// Modulo by zero.
    #[error("ip {ip}: division by zero")]
    DivisionByZero { ip: usize },
    /// Square root of a negative value.
    #[error("ip {ip}: square root of negative value {value}")]
    NegativeSqrt { ip: usize, value: i64 },
    /// Duet-mode receive on an inbox that was closed while empty.
    #[error("ip {ip}: receive on a closed channel")]
    ChannelClosed { ip: usize },
    /// The OS refused to start a machine thread.
    #[error("failed to spawn machine thread: {reason}")]
    Spawn { reason: String },
    /// A machine thread panicked.
    #[error("machine {machine} panicked")]
    MachinePanicked { machine: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_interpolate_named_fields() {
        let err = VMError::InvalidOperand {
            ip: 4,
            instruction: "set",
            value: 7,
        };
        assert_eq!(
            err.to_string(),
            "ip 4: set expected a register destination but got literal 7"
        );
        assert_eq!(
            VMError::NegativeSqrt { ip: 1, value: -9 }.to_string(),
            "ip 1: square root of negative value -9"
        );
    }

    #[test]
    fn messages_honour_format_flags() {
        assert_eq!(
            VMError::InvalidInstruction { opcode: 0x7f }.to_string(),
            "invalid instruction: 0x7f"
        );
        assert_eq!(
            VMError::InvalidRegister { name: '!' }.to_string(),
            "invalid register '!', expected one of 'a'..='z'"
        );
    }

    #[test]
    fn is_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(VMError::DivisionByZero { ip: 0 });
        assert_eq!(err.to_string(), "ip 0: division by zero");
    }
}
