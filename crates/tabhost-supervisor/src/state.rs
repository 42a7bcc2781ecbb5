//! Supervisor bookkeeping, free of I/O.
//!
//! Tracks the lifecycle of every tab process, the `died_map` recording
//! which process replaced which, and which socket is bound to which
//! process.

use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Spawning,
    Alive,
    Dead,
}

/// What `attach_or_spawn` has to do for a requested process id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Use this live process.
    Live(u32),
    /// Spawn a process; `replacing` is the dead id it stands in for.
    Spawn { replacing: Option<u32> },
    /// A respawn for this death episode already failed.
    Failed { dead: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    process_id: u32,
    confirmed: bool,
}

#[derive(Debug, Default)]
pub struct SupervisorState {
    processes: HashMap<u32, ProcessState>,
    died_map: HashMap<u32, u32>,
    bindings: BTreeMap<u64, Binding>,
    failed_episodes: HashSet<u32>,
}

impl SupervisorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_state(&self, process_id: u32) -> Option<ProcessState> {
        self.processes.get(&process_id).copied()
    }

    pub fn died_map(&self) -> &HashMap<u32, u32> {
        &self.died_map
    }

    pub fn resolve(&self, requested: Option<u32>) -> Resolution {
        let Some(start) = requested else {
            return Resolution::Spawn { replacing: None };
        };

        let mut current = start;
        let mut seen = HashSet::from([start]);
        loop {
            match self.processes.get(&current) {
                Some(ProcessState::Alive | ProcessState::Spawning) => {
                    return Resolution::Live(current)
                }
                Some(ProcessState::Dead) | None => {}
            }
            match self.died_map.get(&current) {
                Some(&next) if seen.insert(next) => current = next,
                _ => break,
            }
        }

        if self.failed_episodes.contains(&current) {
            Resolution::Failed { dead: current }
        } else {
            Resolution::Spawn {
                replacing: Some(current),
            }
        }
    }

    /// Follow `died_map` from `start` to its last hop.
    fn chain_end(&self, start: u32) -> u32 {
        let mut current = start;
        let mut seen = HashSet::from([start]);
        while let Some(&next) = self.died_map.get(&current) {
            if !seen.insert(next) {
                break;
            }
            current = next;
        }
        current
    }

    /// A new process under a reused pid starts a fresh death episode.
    pub fn record_spawn(&mut self, process_id: u32) {
        self.processes.insert(process_id, ProcessState::Spawning);
        self.failed_episodes.remove(&process_id);
    }

    pub fn record_respawn(&mut self, old: u32, new: u32) {
        if old != new {
            self.died_map.insert(old, new);
        }
    }

    /// Returns true the first time an episode fails.
    pub fn record_failure(&mut self, dead: Option<u32>) -> bool {
        match dead {
            Some(pid) => self.failed_episodes.insert(pid),
            None => true,
        }
    }

    pub fn mark_alive(&mut self, process_id: u32) -> bool {
        match self.processes.get_mut(&process_id) {
            Some(state) if *state == ProcessState::Spawning => {
                *state = ProcessState::Alive;
                true
            }
            _ => false,
        }
    }

    /// Returns true when the process transitioned to Dead.
    pub fn mark_dead(&mut self, process_id: u32) -> bool {
        match self.processes.get_mut(&process_id) {
            Some(ProcessState::Dead) | None => false,
            Some(state) => {
                *state = ProcessState::Dead;
                true
            }
        }
    }

    /// Drop all knowledge of a released process.
    pub fn forget(&mut self, process_id: u32) {
        self.processes.remove(&process_id);
        self.failed_episodes.remove(&process_id);
    }

    /// Returns the process the socket was bound to before.
    pub fn bind(&mut self, socket_id: u64, process_id: u32) -> Option<u32> {
        self.bindings
            .insert(
                socket_id,
                Binding {
                    process_id,
                    confirmed: false,
                },
            )
            .map(|b| b.process_id)
    }

    /// Mark the binding live, then prune.
    pub fn confirm_bound(&mut self, socket_id: u64, process_id: u32) -> bool {
        let confirmed = match self.bindings.get_mut(&socket_id) {
            Some(binding) if binding.process_id == process_id => {
                binding.confirmed = true;
                true
            }
            _ => false,
        };
        if confirmed {
            self.prune();
        }
        confirmed
    }

    pub fn unbind(&mut self, socket_id: u64) -> Option<u32> {
        let removed = self.bindings.remove(&socket_id).map(|b| b.process_id);
        if removed.is_some() {
            self.prune();
        }
        removed
    }

    pub fn binding(&self, socket_id: u64) -> Option<u32> {
        self.bindings.get(&socket_id).map(|b| b.process_id)
    }

    pub fn sockets_on(&self, process_id: u32) -> Vec<u64> {
        self.bindings
            .iter()
            .filter(|(_, b)| b.process_id == process_id)
            .map(|(socket, _)| *socket)
            .collect()
    }

    pub fn is_referenced(&self, process_id: u32) -> bool {
        self.bindings.values().any(|b| b.process_id == process_id)
    }

    fn has_confirmed(&self, process_id: u32) -> bool {
        self.bindings
            .values()
            .any(|b| b.process_id == process_id && b.confirmed)
    }

    /// Remove `died_map` entries whose replacement is Alive and confirmed
    /// by at least one bound tab while nothing references the old id, then
    /// forget dead processes nobody needs. Returns the pruned old ids.
    pub fn prune(&mut self) -> Vec<u32> {
        let prunable: Vec<u32> = self
            .died_map
            .keys()
            .copied()
            .filter(|&old| {
                let target = self.chain_end(old);
                !self.is_referenced(old)
                    && self.processes.get(&target) == Some(&ProcessState::Alive)
                    && self.has_confirmed(target)
            })
            .collect();
        for old in &prunable {
            self.died_map.remove(old);
        }

        let in_chain: HashSet<u32> = self
            .died_map
            .iter()
            .flat_map(|(old, new)| [*old, *new])
            .collect();
        let referenced: HashSet<u32> = self.bindings.values().map(|b| b.process_id).collect();
        self.processes.retain(|pid, state| {
            *state != ProcessState::Dead || referenced.contains(pid) || in_chain.contains(pid)
        });
        // A failed episode stays while a tab is still bound to the dead pid.
        self.failed_episodes
            .retain(|pid| referenced.contains(pid) || in_chain.contains(pid));

        prunable
    }
}
