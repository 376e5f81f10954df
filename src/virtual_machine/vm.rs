//! Core virtual machine implementation.
//!
//! The VM executes a decoded [`Program`] over 26 integer registers. It runs in
//! one of two modes, chosen per step by the `peer` argument:
//!
//! - **standalone** (`peer = None`): `snd` remembers the last sent value and
//!   `rcv` with a non-zero operand surfaces it as the step's recovered value.
//! - **duet** (`peer = Some(..)`): `snd` enqueues into the peer's inbox and
//!   `rcv` blocks on this machine's own inbox.
//!
//! All arithmetic uses wrapping semantics to prevent overflow panics.

mod registers;


use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::operand::{Operand, REGISTER_COUNT, Register};
use crate::virtual_machine::program::{Instr, Program};
use crate::virtual_machine::queue::BlockingQueue;
use registers::Registers;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Register seeded with the machine identity (0 or 1 in a duet).
pub const IDENTITY_REGISTER: Register = match Register::new('p') {
    Some(reg) => reg,
    None => panic!("identity register must be a letter"),
};

macro_rules! exec_vm {
    // Entry point
    (
        vm = $vm:ident,
        peer = $peer:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident $args:tt ),* $(,)? }
    ) => {{
        match $instr.opcode {
            $(
                Opcode::$variant => exec_vm!(@call $vm, $peer, $instr, $handler, $args),
            )*
        }
    }};

    // Handler that talks to the peer (semicolon separator)
    (@call $vm:ident, $peer:ident, $instr:ident, $handler:ident,
        (peer; $( $field:ident : $kind:ident ),* $(,)? )
    ) => {{
        $( let $field = exec_vm!(@read $vm, $instr, $field, $kind)?; )*
        $vm.$handler($peer, $( $field ),*)
    }};

    // Local handler
    (@call $vm:ident, $peer:ident, $instr:ident, $handler:ident,
        ( $( $field:ident : $kind:ident ),* $(,)? )
    ) => {{
        $( let $field = exec_vm!(@read $vm, $instr, $field, $kind)?; )*
        $vm.$handler($( $field ),*)
    }};

    // Register the instruction writes to
    (@read $vm:ident, $instr:ident, $field:ident, Dst) => {{
        $vm.destination($instr.opcode, $instr.$field)
    }};

    // Resolved value of a literal or register
    (@read $vm:ident, $instr:ident, $field:ident, Src) => {{
        Ok::<i64, VMError>($vm.value_of($instr.$field))
    }};

    // Raw operand, interpreted by the handler
    (@read $vm:ident, $instr:ident, $field:ident, Any) => {{
        Ok::<Operand, VMError>($instr.$field)
    }};
}

/// What an executed instruction asks the stepping loop to do next.
enum Effect {
    /// Fall through to the next instruction.
    Next,
    /// Move the pointer by the given delta.
    Jump(i64),
    /// Fall through and surface the standalone recovered value.
    Recover(Option<i64>),
}

/// Result of a single [`VM::step`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// The pointer is now outside the program.
    pub halted: bool,
    /// Standalone mode only: value surfaced by `rcv` with a non-zero operand.
    /// The machine keeps running; stopping is up to the caller.
    pub recovered: Option<i64>,
}

/// Machine state visible from other threads.
///
/// Only the owning machine writes `ip` and `sends`; peers and the deadlock
/// poller read them and enqueue into `inbox`.
struct Shared {
    program: Program,
    inbox: BlockingQueue<i64>,
    ip: AtomicUsize,
    sends: AtomicU64,
}

impl Shared {
    fn is_blocked(&self) -> bool {
        let ip = self.ip.load(Ordering::Acquire);
        matches!(self.program.get(ip), Some(instr) if instr.opcode == Opcode::Rcv)
            && self.inbox.is_empty()
    }

    fn is_halted(&self) -> bool {
        self.ip.load(Ordering::Acquire) >= self.program.len()
    }
}

/// Cloneable, thread-safe view of a [`VM`].
///
/// Passed as the `peer` argument of [`VM::step`] so `snd` can reach the other
/// machine's inbox, and polled by the duet driver for deadlock detection.
#[derive(Clone)]
pub struct MachineHandle {
    shared: Arc<Shared>,
}

impl MachineHandle {
    /// Enqueues `value` into the machine's inbox. Never blocks.
    pub fn send(&self, value: i64) {
        self.shared.inbox.enqueue(value);
    }

    /// True iff the machine sits on a `rcv` and its inbox is empty.
    ///
    /// A snapshot: the machine may be unblocked the moment this returns.
    pub fn is_blocked(&self) -> bool {
        self.shared.is_blocked()
    }

    /// True once the machine's pointer left the program.
    pub fn is_halted(&self) -> bool {
        self.shared.is_halted()
    }

    /// True iff the machine's thread is parked in `rcv` with nothing queued.
    ///
    /// Unlike [`is_blocked`](Self::is_blocked) this never reports a machine
    /// that has already taken its value but not yet moved its pointer.
    pub fn is_parked(&self) -> bool {
        self.shared.inbox.is_starved()
    }

    /// Number of `snd` instructions the machine executed so far.
    pub fn send_count(&self) -> u64 {
        self.shared.sends.load(Ordering::Acquire)
    }

    /// Last published instruction pointer.
    pub fn ip(&self) -> usize {
        self.shared.ip.load(Ordering::Acquire)
    }

    /// Values waiting in the machine's inbox.
    pub fn pending(&self) -> usize {
        self.shared.inbox.len()
    }

    /// Closes the machine's inbox, failing a `rcv` that would otherwise wait forever.
    pub fn close(&self) {
        self.shared.inbox.close();
    }
}

/// Register virtual machine.
///
/// Executes instructions one at a time from the instruction pointer until the
/// pointer leaves the program.
pub struct VM {
    /// Index of the next instruction.
    ip: usize,
    /// Register file (26 registers).
    registers: Registers,
    /// Executed `snd` count.
    sends: u64,
    /// Standalone mode: value of the most recent `snd`.
    last_sent: Option<i64>,
    /// Program, inbox and published counters.
    shared: Arc<Shared>,
}

impl VM {
    /// Creates a VM over `program` with the identity register set to 0.
    pub fn new(program: Program) -> Self {
        Self::with_seed(program, 0)
    }

    /// Creates a VM over `program` with the identity register set to `seed`.
    pub fn with_seed(program: Program, seed: i64) -> Self {
        let mut registers = Registers::new();
        registers.set(IDENTITY_REGISTER, seed);
        Self {
            ip: 0,
            registers,
            sends: 0,
            last_sent: None,
            shared: Arc::new(Shared {
                program,
                inbox: BlockingQueue::new(),
                ip: AtomicUsize::new(0),
                sends: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a handle other threads can use to reach this machine.
    pub fn handle(&self) -> MachineHandle {
        MachineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Executes the instruction at the pointer and advances it.
    ///
    /// `peer` selects the mode: `None` runs standalone, `Some` sends to and
    /// receives from the given machine. In duet mode a `rcv` on an empty
    /// inbox blocks the calling thread. A step on a halted machine executes
    /// nothing. On error the pointer stays on the failing instruction.
    pub fn step(&mut self, peer: Option<&MachineHandle>) -> Result<StepOutcome, VMError> {
        let Some(&instr) = self.shared.program.get(self.ip) else {
            return Ok(StepOutcome {
                halted: true,
                recovered: None,
            });
        };

        let (delta, recovered) = match self.exec(instr, peer)? {
            Effect::Next => (1, None),
            Effect::Jump(delta) => (delta, None),
            Effect::Recover(value) => (1, value),
        };
        self.advance(delta);

        Ok(StepOutcome {
            halted: self.is_halted(),
            recovered,
        })
    }

    /// Steps until the machine halts, stopping at the first error.
    pub fn run(&mut self, peer: Option<&MachineHandle>) -> Result<(), VMError> {
        while !self.step(peer)?.halted {}
        Ok(())
    }

    /// Runs standalone until the first recovered value.
    ///
    /// Returns `None` if the machine halts without recovering anything.
    pub fn recover(&mut self) -> Result<Option<i64>, VMError> {
        loop {
            let outcome = self.step(None)?;
            if outcome.recovered.is_some() {
                return Ok(outcome.recovered);
            }
            if outcome.halted {
                return Ok(None);
            }
        }
    }

    /// True iff the current instruction is `rcv` and this machine's inbox is empty.
    pub fn is_blocked(&self) -> bool {
        self.shared.is_blocked()
    }

    /// True once the pointer is outside the program.
    pub fn is_halted(&self) -> bool {
        self.ip >= self.shared.program.len()
    }

    /// Cumulative number of executed `snd` instructions.
    pub fn send_count(&self) -> u64 {
        self.sends
    }

    /// Instruction pointer. A jump before the first instruction parks it at `usize::MAX`.
    pub fn ip(&self) -> usize {
        self.ip
    }

    /// Instruction at the pointer, or `None` when halted.
    pub fn current(&self) -> Option<&Instr> {
        self.shared.program.get(self.ip)
    }

    /// The program this machine executes.
    pub fn program(&self) -> &Program {
        &self.shared.program
    }

    /// Standalone mode: value of the most recent `snd`.
    pub fn last_sent(&self) -> Option<i64> {
        self.last_sent
    }

    /// Reads a register.
    pub fn register(&self, reg: Register) -> i64 {
        self.registers.get(reg)
    }

    /// Writes a register.
    pub fn set_register(&mut self, reg: Register, value: i64) {
        self.registers.set(reg, value);
    }

    /// All registers, `a` first.
    pub fn registers(&self) -> &[i64; REGISTER_COUNT] {
        self.registers.as_array()
    }

    fn advance(&mut self, delta: i64) {
        self.ip = isize::try_from(delta)
            .ok()
            .and_then(|delta| self.ip.checked_add_signed(delta))
            .unwrap_or(usize::MAX);
        self.shared.ip.store(self.ip, Ordering::Release);
    }

    fn value_of(&self, operand: Operand) -> i64 {
        match operand {
            Operand::Lit(value) => value,
            Operand::Reg(reg) => self.registers.get(reg),
        }
    }

    /// Resolves a destination operand, rejecting literals.
    fn destination(&self, opcode: Opcode, operand: Operand) -> Result<Register, VMError> {
        match operand {
            Operand::Reg(reg) => Ok(reg),
            Operand::Lit(value) => Err(VMError::InvalidOperand {
                ip: self.ip,
                instruction: opcode.mnemonic(),
                value,
            }),
        }
    }

    /// Executes a single instruction.
    fn exec(&mut self, instr: Instr, peer: Option<&MachineHandle>) -> Result<Effect, VMError> {
        exec_vm! {
            vm = self,
            peer = peer,
            instr = instr,
            {
                // Arithmetic
                Set => op_set(a: Dst, b: Src),
                Add => op_add(a: Dst, b: Src),
                Sub => op_sub(a: Dst, b: Src),
                Mul => op_mul(a: Dst, b: Src),
                Mod => op_mod(a: Dst, b: Src),
                Sqrt => op_sqrt(a: Dst, b: Src),
                // Communication
                Snd => op_snd(peer; a: Src),
                Rcv => op_rcv(peer; a: Any),
                // Control Flow
                Jgz => op_jgz(a: Src, b: Src),
                Jlz => op_jlz(a: Src, b: Src),
                Jnz => op_jnz(a: Src, b: Src),
                Jge => op_jge(a: Src, b: Src),
                Jle => op_jle(a: Src, b: Src),
            }
        }
    }

    fn op_set(&mut self, dst: Register, value: i64) -> Result<Effect, VMError> {
        self.registers.set(dst, value);
        Ok(Effect::Next)
    }

    fn op_add(&mut self, dst: Register, value: i64) -> Result<Effect, VMError> {
        let current = self.registers.get(dst);
        self.registers.set(dst, current.wrapping_add(value));
        Ok(Effect::Next)
    }

    fn op_sub(&mut self, dst: Register, value: i64) -> Result<Effect, VMError> {
        let current = self.registers.get(dst);
        self.registers.set(dst, current.wrapping_sub(value));
        Ok(Effect::Next)
    }

    fn op_mul(&mut self, dst: Register, value: i64) -> Result<Effect, VMError> {
        let current = self.registers.get(dst);
        self.registers.set(dst, current.wrapping_mul(value));
        Ok(Effect::Next)
    }

    fn op_mod(&mut self, dst: Register, value: i64) -> Result<Effect, VMError> {
        if value == 0 {
            return Err(VMError::DivisionByZero { ip: self.ip });
        }
        let current = self.registers.get(dst);
        self.registers.set(dst, current.wrapping_rem(value));
        Ok(Effect::Next)
    }

    fn op_sqrt(&mut self, dst: Register, value: i64) -> Result<Effect, VMError> {
        if value < 0 {
            return Err(VMError::NegativeSqrt { ip: self.ip, value });
        }
        let root = value.isqrt();
        let ceil = if root * root < value { root + 1 } else { root };
        self.registers.set(dst, ceil);
        Ok(Effect::Next)
    }

    fn op_snd(&mut self, peer: Option<&MachineHandle>, value: i64) -> Result<Effect, VMError> {
        match peer {
            Some(peer) => peer.send(value),
            None => self.last_sent = Some(value),
        }
        // Published after the enqueue: a counter seen unchanged means no value
        // reached the peer in between.
        self.sends += 1;
        self.shared.sends.store(self.sends, Ordering::Release);
        Ok(Effect::Next)
    }

    fn op_rcv(&mut self, peer: Option<&MachineHandle>, operand: Operand) -> Result<Effect, VMError> {
        if peer.is_none() {
            if self.value_of(operand) != 0 {
                return Ok(Effect::Recover(self.last_sent));
            }
            return Ok(Effect::Next);
        }

        let dst = self.destination(Opcode::Rcv, operand)?;
        let value = self
            .shared
            .inbox
            .dequeue()
            .ok_or(VMError::ChannelClosed { ip: self.ip })?;
        self.registers.set(dst, value);
        Ok(Effect::Next)
    }

    fn op_jgz(&self, cond: i64, offset: i64) -> Result<Effect, VMError> {
        Ok(Self::branch(cond > 0, offset))
    }

    fn op_jlz(&self, cond: i64, offset: i64) -> Result<Effect, VMError> {
        Ok(Self::branch(cond < 0, offset))
    }

    fn op_jnz(&self, cond: i64, offset: i64) -> Result<Effect, VMError> {
        Ok(Self::branch(cond != 0, offset))
    }

    // Shares jle's `<= 0` test; see `jge_matches_jle` in the tests.
    fn op_jge(&self, cond: i64, offset: i64) -> Result<Effect, VMError> {
        Ok(Self::branch(cond <= 0, offset))
    }

    fn op_jle(&self, cond: i64, offset: i64) -> Result<Effect, VMError> {
        Ok(Self::branch(cond <= 0, offset))
    }

    fn branch(taken: bool, offset: i64) -> Effect {
        if taken {
            Effect::Jump(offset)
        } else {
            Effect::Next
        }
    }
}
