pub mod relay;
pub mod task;

pub use relay::{ConsoleLine, ConsoleLog, ConsoleSnapshot, OutputRelay};
pub use task::{ExitInfo, ExitObserver, ProcessHandle, ProcessSupervisor, Termination};
