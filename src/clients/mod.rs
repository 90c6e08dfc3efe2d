pub mod automation;
pub mod chromium_automation;
pub mod decision;
pub mod remote_automation;

pub use automation::{AutomationClient, ExecuteOutcome, PageEvidence};
pub use chromium_automation::ChromiumAutomation;
pub use decision::{DecisionClient, DecisionRequest};
pub use remote_automation::RemoteAutomation;
