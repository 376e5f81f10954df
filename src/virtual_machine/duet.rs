//! Two-machine driver.
//!
//! [`Duet`] runs two copies of one program on their own threads, cross-wired so
//! each machine's `snd` feeds the other's inbox. Machine 0 and machine 1 differ
//! only by the value seeded into the identity register.
//!
//! The machines never detect deadlock themselves. The driver polls both
//! [`MachineHandle`]s and declares the run stuck once every live machine is
//! parked in `rcv` on an empty inbox for `confirmations` consecutive polls with
//! no send in between. A poll only counts when both send counters read the same
//! before and after the activity check. The driver then closes both inboxes so
//! the parked threads fail with [`VMError::ChannelClosed`] and can be joined.

use crate::config::DuetConfig;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::program::Program;
use crate::virtual_machine::vm::{MachineHandle, VM};
use crate::{debug, error, info, warn};
use std::fmt::Display;
use std::thread::{self, JoinHandle};

/// Number of machines in a duet.
pub const MACHINES: usize = 2;

/// How a duet run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuetOutcome {
    /// Both machines ran off the end of the program.
    Completed,
    /// Both machines are parked on `rcv` with empty inboxes.
    Deadlocked,
    /// One machine halted while the other waits for a value that will never come.
    Stalled,
}

impl DuetOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DuetOutcome::Completed => "completed",
            DuetOutcome::Deadlocked => "deadlocked",
            DuetOutcome::Stalled => "stalled",
        }
    }
}

impl Display for DuetOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of a duet run.
pub struct DuetReport {
    pub outcome: DuetOutcome,
    /// Machines in identity order.
    pub machines: [VM; MACHINES],
}

impl DuetReport {
    /// Number of `snd` instructions machine `id` executed, `None` for an unknown id.
    pub fn send_count(&self, id: usize) -> Option<u64> {
        self.machine(id).map(VM::send_count)
    }

    pub fn machine(&self, id: usize) -> Option<&VM> {
        self.machines.get(id)
    }
}

/// What a machine was doing at one poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Activity {
    Running,
    Blocked,
    Finished,
}

/// Both machines' state at one poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Snapshot {
    activity: [Activity; MACHINES],
    sends: [u64; MACHINES],
    /// Send counters did not move while the activity was read.
    settled: bool,
}

impl Snapshot {
    fn take(workers: &[Worker; MACHINES]) -> Self {
        let sends = Self::sends(workers);
        let activity = [workers[0].activity(), workers[1].activity()];
        Self {
            activity,
            sends,
            settled: Self::sends(workers) == sends,
        }
    }

    fn sends(workers: &[Worker; MACHINES]) -> [u64; MACHINES] {
        [
            workers[0].handle.send_count(),
            workers[1].handle.send_count(),
        ]
    }

    /// No machine can make progress on its own.
    fn is_stuck(&self) -> bool {
        self.settled
            && !self.activity.contains(&Activity::Running)
            && self.activity.contains(&Activity::Blocked)
    }

    fn outcome(&self) -> DuetOutcome {
        if self.activity.iter().all(|a| *a == Activity::Blocked) {
            DuetOutcome::Deadlocked
        } else {
            DuetOutcome::Stalled
        }
    }
}

type RunResult = (VM, Result<(), VMError>);

/// One machine thread plus the handle used to observe it.
struct Worker {
    id: usize,
    handle: MachineHandle,
    thread: Option<JoinHandle<RunResult>>,
    machine: Option<VM>,
}

impl Worker {
    fn spawn(id: usize, vm: VM, peer: MachineHandle) -> Result<Self, VMError> {
        let handle = vm.handle();
        let thread = thread::Builder::new()
            .name(format!("vm-{id}"))
            .spawn(move || {
                let mut vm = vm;
                let result = vm.run(Some(&peer));
                match &result {
                    Ok(()) => debug!("halted after {} sends", vm.send_count()),
                    Err(e) => debug!("stopped: {e}"),
                }
                (vm, result)
            })
            .map_err(|e| VMError::Spawn {
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle,
            thread: Some(thread),
            machine: None,
        })
    }

    /// Joins the thread if it finished, or unconditionally when `wait` is set,
    /// returning the machine's run result. A no-op once joined.
    fn reap(&mut self, wait: bool) -> Result<(), VMError> {
        let Some(thread) = self.thread.take_if(|t| wait || t.is_finished()) else {
            return Ok(());
        };
        match thread.join() {
            Ok((vm, result)) => {
                self.machine = Some(vm);
                result
            }
            Err(_) => Err(VMError::MachinePanicked { machine: self.id }),
        }
    }

    fn is_finished(&self) -> bool {
        self.thread.is_none()
    }

    fn activity(&self) -> Activity {
        if self.is_finished() {
            Activity::Finished
        } else if self.handle.is_parked() {
            Activity::Blocked
        } else {
            Activity::Running
        }
    }

    fn into_machine(self) -> Result<VM, VMError> {
        self.machine
            .ok_or(VMError::MachinePanicked { machine: self.id })
    }
}

/// Runs one program as two communicating machines.
pub struct Duet {
    program: Program,
    config: DuetConfig,
}

impl Duet {
    /// Creates a driver with the default configuration. The logger threshold
    /// is left as is.
    pub fn new(program: Program) -> Self {
        Self {
            program,
            config: DuetConfig::default(),
        }
    }

    /// Creates a driver with `config` and installs its log level as the
    /// process-wide logger threshold.
    pub fn with_config(program: Program, config: DuetConfig) -> Self {
        config.apply_log_level();
        Self { program, config }
    }

    pub fn config(&self) -> &DuetConfig {
        &self.config
    }

    /// Runs both machines until they halt or no further progress is possible.
    ///
    /// A deadlock or stall is a normal outcome, reported in the
    /// [`DuetReport`]. An error raised by either machine stops the other one
    /// and is returned.
    pub fn run(&self) -> Result<DuetReport, VMError> {
        let machines = [
            VM::with_seed(self.program.clone(), 0),
            VM::with_seed(self.program.clone(), 1),
        ];
        let handles = [machines[0].handle(), machines[1].handle()];
        let [first, second] = machines;

        let first = Worker::spawn(0, first, handles[1].clone())?;
        let second = match Worker::spawn(1, second, handles[0].clone()) {
            Ok(worker) => worker,
            Err(e) => {
                error!("{e}");
                Self::shutdown(&mut [first]);
                return Err(e);
            }
        };
        let mut workers = [first, second];
        debug!(
            "spawned {MACHINES} machines over {} instructions",
            self.program.len()
        );

        let outcome = match self.supervise(&mut workers) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("duet aborted: {e}");
                Self::shutdown(&mut workers);
                return Err(e);
            }
        };

        if outcome != DuetOutcome::Completed {
            warn!(
                "{outcome}: no further progress possible (ip {} / {}, sends {} / {})",
                handles[0].ip(),
                handles[1].ip(),
                handles[0].send_count(),
                handles[1].send_count()
            );
            for handle in &handles {
                handle.close();
            }
            let mut failure = None;
            for (id, worker) in workers.iter_mut().enumerate() {
                match worker.reap(true) {
                    Ok(()) | Err(VMError::ChannelClosed { .. }) => {}
                    Err(e) => {
                        error!("machine {id} failed during shutdown: {e}");
                        failure = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = failure {
                Self::shutdown(&mut workers);
                return Err(e);
            }
        }

        let [first, second] = workers;
        let report = DuetReport {
            outcome,
            machines: [first.into_machine()?, second.into_machine()?],
        };
        info!(
            "duet {}: machine 0 sent {}, machine 1 sent {}",
            report.outcome,
            report.machines[0].send_count(),
            report.machines[1].send_count()
        );
        Ok(report)
    }

    /// Polls both machines until they finish, fail, or are confirmed stuck.
    fn supervise(&self, workers: &mut [Worker; MACHINES]) -> Result<DuetOutcome, VMError> {
        let confirmations = self.config.confirmations.max(1);
        let mut previous: Option<Snapshot> = None;
        let mut streak = 0;

        loop {
            for worker in workers.iter_mut() {
                worker.reap(false)?;
            }
            if workers.iter().all(Worker::is_finished) {
                return Ok(DuetOutcome::Completed);
            }

            let snapshot = Snapshot::take(workers);
            if snapshot.is_stuck() {
                streak = if previous == Some(snapshot) { streak + 1 } else { 1 };
                if streak >= confirmations {
                    return Ok(snapshot.outcome());
                }
            } else {
                streak = 0;
            }
            previous = Some(snapshot);

            thread::sleep(self.config.poll_interval);
        }
    }

    /// Closes every inbox and joins every thread, discarding results.
    fn shutdown(workers: &mut [Worker]) {
        for worker in workers.iter() {
            worker.handle.close();
        }
        for worker in workers.iter_mut() {
            if let Err(e) = worker.reap(true) {
                debug!("machine {} stopped: {e}", worker.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::log::{self, Level};
    use crate::utils::test_utils::utils::{program, reg};
    use std::sync::{Mutex, MutexGuard};
    use std::time::Duration;

    // Serializes tests that install a logger threshold through `with_config`.
    static LOG_LEVEL: Mutex<()> = Mutex::new(());

    fn lock_log_level() -> MutexGuard<'static, ()> {
        LOG_LEVEL.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn duet(lines: &[&str]) -> Result<DuetReport, VMError> {
        Duet::new(program(lines)).run()
    }

    const PING_PONG: [&str; 11] = [
        "set i 2000",
        "jgz p 6",
        "snd i",
        "rcv a",
        "sub i 1",
        "jgz i -3",
        "jgz 1 5",
        "rcv a",
        "snd a",
        "sub i 1",
        "jgz i -3",
    ];

    #[test]
    fn mutual_exchange_completes() {
        let report = duet(&["snd p", "snd p", "rcv a", "rcv b"]).unwrap();
        assert_eq!(report.outcome, DuetOutcome::Completed);
        assert_eq!(report.send_count(0), Some(2));
        assert_eq!(report.send_count(1), Some(2));
        assert_eq!(report.machine(0).unwrap().register(reg('a')), 1);
        assert_eq!(report.machine(1).unwrap().register(reg('b')), 0);
        assert!(report.machines.iter().all(VM::is_halted));
    }

    #[test]
    fn extra_receive_deadlocks() {
        let report = duet(&["snd p", "rcv a", "rcv b"]).unwrap();
        assert_eq!(report.outcome, DuetOutcome::Deadlocked);
        assert_eq!(report.send_count(0), Some(1));
        assert_eq!(report.send_count(1), Some(1));
        for (id, vm) in report.machines.iter().enumerate() {
            assert_eq!(vm.ip(), 2);
            assert_eq!(vm.register(reg('a')), 1 - id as i64);
            assert!(vm.is_blocked());
        }
    }

    #[test]
    fn immediate_receive_deadlocks() {
        let report = duet(&["rcv a"]).unwrap();
        assert_eq!(report.outcome, DuetOutcome::Deadlocked);
        assert_eq!(report.send_count(0), Some(0));
        assert_eq!(report.send_count(1), Some(0));
    }

    #[test]
    fn recovers_three_values_then_deadlocks() {
        let report = duet(&[
            "snd 1", "snd 2", "snd p", "rcv a", "rcv b", "rcv c", "rcv d",
        ])
        .unwrap();
        assert_eq!(report.outcome, DuetOutcome::Deadlocked);
        assert_eq!(report.send_count(1), Some(3));
        let first = report.machine(0).unwrap();
        assert_eq!(
            [first.register(reg('a')), first.register(reg('b')), first.register(reg('c'))],
            [1, 2, 1]
        );
        assert_eq!(report.machine(1).unwrap().register(reg('c')), 0);
    }

    #[test]
    fn halted_peer_stalls_receiver() {
        // machine 1 jumps past the end, machine 0 waits forever
        let report = duet(&["jgz p 2", "rcv a"]).unwrap();
        assert_eq!(report.outcome, DuetOutcome::Stalled);
        assert!(report.machine(1).unwrap().is_halted());
        assert!(!report.machine(0).unwrap().is_halted());
        assert_eq!(report.machine(0).unwrap().ip(), 1);
    }

    #[test]
    fn error_stops_blocked_peer() {
        // machine 1 divides by zero while machine 0 waits on it
        let result = duet(&["jgz p 2", "rcv a", "mod a 0"]);
        assert!(matches!(result, Err(VMError::DivisionByZero { ip: 2 })));
    }

    #[test]
    fn bulk_transfer_completes() {
        let report = duet(&[
            "set i 1000",
            "snd i",
            "sub i 1",
            "jgz i -2",
            "set i 1000",
            "rcv a",
            "add s a",
            "sub i 1",
            "jgz i -3",
        ])
        .unwrap();
        assert_eq!(report.outcome, DuetOutcome::Completed);
        for vm in &report.machines {
            assert_eq!(vm.send_count(), 1000);
            assert_eq!(vm.register(reg('s')), 1000 * 1001 / 2);
            assert_eq!(vm.register(reg('a')), 1);
        }
    }

    #[test]
    fn ping_pong_is_not_mistaken_for_deadlock() {
        let report = duet(&[
            "set i 300",
            "jgz p 6",
            "snd i",
            "rcv a",
            "sub i 1",
            "jgz i -3",
            "jgz 1 5",
            "rcv a",
            "snd a",
            "sub i 1",
            "jgz i -3",
        ])
        .unwrap();
        assert_eq!(report.outcome, DuetOutcome::Completed);
        assert_eq!(report.send_count(0), Some(300));
        assert_eq!(report.send_count(1), Some(300));
        assert_eq!(report.machine(0).unwrap().register(reg('a')), 1);
    }

    #[test]
    fn programs_without_communication_complete() {
        let report = duet(&["set a p", "mul a 10", "add a 3"]).unwrap();
        assert_eq!(report.outcome, DuetOutcome::Completed);
        assert_eq!(report.machine(0).unwrap().register(reg('a')), 3);
        assert_eq!(report.machine(1).unwrap().register(reg('a')), 13);
    }

    #[test]
    fn machines_share_one_program() {
        let report = duet(&["snd p", "rcv a"]).unwrap();
        assert!(report.machine(0).unwrap().program().ptr_eq(report.machine(1).unwrap().program()));
    }

    #[test]
    fn zero_confirmations_still_requires_one_poll() {
        let _guard = lock_log_level();
        let config = DuetConfig::default()
            .with_poll_interval(Duration::from_millis(1))
            .with_confirmations(0);
        let report = Duet::with_config(program(&["rcv a"]), config).run().unwrap();
        assert_eq!(report.outcome, DuetOutcome::Deadlocked);
    }

    #[test]
    fn driver_can_run_twice() {
        let driver = Duet::new(program(&["snd p", "rcv a", "rcv b"]));
        let first = driver.run().unwrap();
        let second = driver.run().unwrap();
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(first.send_count(0), second.send_count(0));
    }

    #[test]
    fn single_confirmation_fast_polling_does_not_kill_live_machines() {
        let _guard = lock_log_level();
        let config = DuetConfig::default()
            .with_poll_interval(Duration::from_micros(1))
            .with_confirmations(1);
        let driver = Duet::with_config(program(&PING_PONG), config);
        for _ in 0..10 {
            let report = driver.run().unwrap();
            assert_eq!(report.outcome, DuetOutcome::Completed);
            assert_eq!(report.send_count(0), Some(2000));
            assert_eq!(report.send_count(1), Some(2000));
        }
    }

    #[test]
    fn single_confirmation_still_detects_deadlock() {
        let _guard = lock_log_level();
        let config = DuetConfig::default()
            .with_poll_interval(Duration::from_micros(1))
            .with_confirmations(1);
        let report = Duet::with_config(program(&["snd p", "rcv a", "rcv b"]), config)
            .run()
            .unwrap();
        assert_eq!(report.outcome, DuetOutcome::Deadlocked);
        assert_eq!(report.send_count(0), Some(1));
        assert_eq!(report.send_count(1), Some(1));
    }

    #[test]
    fn configured_log_level_is_installed() {
        let _guard = lock_log_level();
        let config = DuetConfig {
            log_level: Level::Error,
            ..DuetConfig::default()
        };
        let report = Duet::with_config(program(&["snd p", "rcv a"]), config)
            .run()
            .unwrap();
        assert_eq!(log::level(), Level::Error);
        assert_eq!(report.outcome, DuetOutcome::Completed);
        log::set_level(Level::Info);
    }

    #[test]
    fn unknown_machine_id() {
        let report = duet(&["snd p", "rcv a"]).unwrap();
        assert!(report.machine(MACHINES).is_none());
        assert_eq!(report.send_count(MACHINES), None);
    }

    #[test]
    fn snapshot_classification() {
        use Activity::*;
        let snap = |activity| Snapshot {
            activity,
            sends: [0, 0],
            settled: true,
        };
        assert!(snap([Blocked, Blocked]).is_stuck());
        assert!(snap([Finished, Blocked]).is_stuck());
        assert!(!snap([Running, Blocked]).is_stuck());
        assert!(!snap([Finished, Finished]).is_stuck());
        assert_eq!(snap([Blocked, Blocked]).outcome(), DuetOutcome::Deadlocked);
        assert_eq!(snap([Blocked, Finished]).outcome(), DuetOutcome::Stalled);

        let moving = Snapshot {
            settled: false,
            ..snap([Blocked, Blocked])
        };
        assert!(!moving.is_stuck());
    }
}
