pub mod decision_service;
pub mod notifier;
pub mod prompts;

pub use decision_service::{parse_decision, LlmDecisionService};
pub use notifier::{BroadcastSink, FanoutSink, LogSink, NotificationSink, RunNotification};
