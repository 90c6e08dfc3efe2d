pub mod control;
pub mod executor;
pub mod input_gate;
pub mod retry;
pub mod routing;

pub use control::RunControl;
pub use executor::{ExecutorDeps, RunExecutor};
pub use input_gate::HumanInputGate;
pub use retry::{RetryPolicy, RetryVerdict};
pub use routing::{route, Directive, PlannedAction};
