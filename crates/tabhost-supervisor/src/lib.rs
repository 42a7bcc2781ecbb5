//! Tab process supervision.
//!
//! Per process: `Spawning -> Alive -> Dead`. A dead process is replaced on
//! demand and the replacement recorded in the `died_map`, so every tab that
//! shared the dead process lands on the same new one.

pub mod spawner;
pub mod state;
pub mod supervisor;

pub use spawner::{default_plug_executable, CommandSpawner, SpawnedProcess, Spawner};
pub use state::{ProcessState, Resolution, SupervisorState};
pub use supervisor::{ProcessSupervisor, SupervisorEvent, DEFAULT_REAP_GRACE};
