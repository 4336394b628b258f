pub mod annotations;
pub mod cpu_state;
pub mod flags;
pub mod memory;
pub mod options;
pub mod runtime_status;
pub mod snapshot;
pub mod state_manager;
pub mod state_mocker;

pub use cpu_state::CpuState;
pub use options::Options;
pub use state_manager::Session;
pub use state_mocker::SimulatedDebugger;
