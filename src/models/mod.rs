pub mod checkpoint;
pub mod decision;
pub mod event;
pub mod input;
pub mod loaders;
pub mod run;
pub mod spec;

pub use checkpoint::Checkpoint;
pub use decision::{ActionDecision, ActionKind, DecisionAction};
pub use event::{LogLevel, RunEvent};
pub use input::{HumanInput, InputKind, PendingInput};
pub use loaders::{load_all_run_specs, load_run_spec};
pub use run::{ActionRecord, NodeName, RunContext, RunState, RunStatus};
pub use spec::RunSpec;
