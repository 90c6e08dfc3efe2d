pub mod checkpoint_store;
pub mod js_executor;
pub mod session_table;

pub use checkpoint_store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use js_executor::JsExecutor;
pub use session_table::{SessionInfo, SessionTable};
