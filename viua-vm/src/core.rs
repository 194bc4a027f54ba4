//! Round-robin scheduling of processes.
//!
//! The core drives every live process one cycle at a time. Cross-process
//! effects raised during a cycle (spawns, sends, exits) are collected in
//! [`Services`] and applied between cycles, which keeps each process the
//! sole owner of its own state while it runs.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    interpreter,
    module::Module,
    pid::Pid,
    process::{Process, Wait},
    trace::TraceStream,
    value::Value,
};

/// Failure modes of driving a core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// The requested entry function is not in the module's function table.
    #[error("no such function: {0}")]
    NoSuchFunction(String),
    /// Every live process is suspended and nothing can wake any of them.
    #[error("all processes are waiting; nothing can make progress")]
    Deadlock,
}

/// Cross-process services exposed to the executor.
#[derive(Default)]
pub struct Services {
    next_pid: u64,
    spawned: Vec<Process>,
    posts: Vec<(Pid, Value)>,
    alive: HashSet<Pid>,
    exited: HashMap<Pid, Result<Value, Value>>,
}

impl Services {
    /// Create a process running `module` from instruction index `entry`,
    /// scheduling it to start on the next round.
    pub fn spawn(
        &mut self,
        module: Arc<Module>,
        entry: usize,
        parameters: Vec<Value>,
        trace: TraceStream,
    ) -> Pid {
        self.next_pid += 1;
        let pid = Pid::from_sequence(self.next_pid);
        self.alive.insert(pid);
        self.spawned
            .push(Process::new(pid, module, entry, parameters, trace));
        pid
    }

    /// Queue a message for delivery after the current cycle.
    pub fn post(&mut self, target: Pid, value: Value) {
        self.posts.push((target, value));
    }

    /// Is the process known and not yet terminated?
    pub fn is_alive(&self, pid: Pid) -> bool {
        self.alive.contains(&pid)
    }

    /// Consume the exit result of a terminated process.
    pub fn take_exit(&mut self, pid: Pid) -> Option<Result<Value, Value>> {
        self.exited.remove(&pid)
    }

    fn mark_exited(&mut self, pid: Pid, result: Result<Value, Value>) {
        self.alive.remove(&pid);
        self.exited.insert(pid, result);
    }
}

/// A single-threaded core: a set of processes scheduled round-robin.
pub struct Core {
    processes: Vec<Process>,
    services: Services,
    trace: TraceStream,
}

impl Core {
    /// A core with tracing disabled.
    pub fn new() -> Self {
        Self::with_trace(TraceStream::disabled())
    }

    /// A core whose processes write EBREAK dumps to `trace`.
    pub fn with_trace(trace: TraceStream) -> Self {
        Self {
            processes: Vec::new(),
            services: Services::default(),
            trace,
        }
    }

    /// Spawn a process entering the named function of `module`.
    pub fn spawn(
        &mut self,
        module: Arc<Module>,
        function: &str,
    ) -> Result<Pid, CoreError> {
        let entry = module
            .functions
            .find(function)
            .map(|e| (e.entry / viua_asm::INSTRUCTION_SIZE as u64) as usize)
            .ok_or_else(|| CoreError::NoSuchFunction(function.to_owned()))?;
        let pid = self.services.spawn(
            module,
            entry,
            Vec::new(),
            self.trace.clone(),
        );
        self.absorb_effects();
        Ok(pid)
    }

    fn absorb_effects(&mut self) -> bool {
        let mut progressed = false;

        for process in self.services.spawned.drain(..) {
            self.processes.push(process);
            progressed = true;
        }

        for (target, value) in self.services.posts.drain(..) {
            let receiver = self
                .processes
                .iter_mut()
                .find(|p| p.pid == target && !p.is_done());
            if let Some(receiver) = receiver {
                receiver.mailbox.push_back(value);
                if matches!(receiver.wait, Some(Wait::Mailbox(_))) {
                    receiver.wait = None;
                }
                progressed = true;
            }
        }

        // Record fresh exits and wake their joiners.
        let mut exits = Vec::new();
        for process in &self.processes {
            if let Some(result) = &process.result {
                if self.services.is_alive(process.pid) {
                    exits.push((process.pid, result.clone()));
                }
            }
        }
        for (pid, result) in exits {
            self.services.mark_exited(pid, result);
            for process in &mut self.processes {
                if process.wait == Some(Wait::Join(pid)) {
                    process.wait = None;
                }
            }
            progressed = true;
        }
        self.processes.retain(|p| !p.is_done());

        progressed
    }

    fn nearest_deadline(&self) -> Option<Instant> {
        self.processes
            .iter()
            .filter_map(|p| match p.wait {
                Some(Wait::Mailbox(Some(deadline))) => Some(deadline),
                _ => None,
            })
            .min()
    }

    /// Drive every process until all have terminated.
    pub fn run(&mut self) -> Result<(), CoreError> {
        loop {
            let mut progressed = false;

            for i in 0..self.processes.len() {
                let process = &mut self.processes[i];
                if process.is_done() {
                    continue;
                }
                // Suspended processes re-check their blocked instruction;
                // anything with a cleared wait runs a full cycle.
                let executed =
                    interpreter::run_cycle(process, &mut self.services);
                progressed |= executed > 0;
            }

            progressed |= self.absorb_effects();

            if self.processes.is_empty() {
                return Ok(());
            }

            if !progressed {
                match self.nearest_deadline() {
                    Some(deadline) => {
                        // A timed receive will expire; idle until then.
                        let now = Instant::now();
                        if deadline > now {
                            std::thread::sleep(
                                (deadline - now).min(Duration::from_millis(10)),
                            );
                        }
                    }
                    None => return Err(CoreError::Deadlock),
                }
            }
        }
    }

    /// Run a single scheduling cycle of one process. Exposed so tests and
    /// tooling can observe preemption behaviour cycle by cycle.
    pub fn cycle(&mut self, pid: Pid) -> usize {
        let index = match self.processes.iter().position(|p| p.pid == pid) {
            Some(index) => index,
            None => return 0,
        };
        let executed =
            interpreter::run_cycle(&mut self.processes[index], &mut self.services);
        self.absorb_effects();
        executed
    }

    /// Exit result of a terminated process: the bottom-frame return value,
    /// or the exception that killed it. `None` while it is still running
    /// or if the result was consumed by a `join`.
    pub fn result_of(&self, pid: Pid) -> Option<&Result<Value, Value>> {
        self.services.exited.get(&pid)
    }

    /// Direct access to a live process, for tests and tooling.
    pub fn process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.pid == pid)
    }

    /// The services handle, for driving single processes by hand.
    pub fn services_mut(&mut self) -> &mut Services {
        &mut self.services
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}
