//! 人工输入闸门
//!
//! 记录哪些运行正在等待人工输入。每次挂起都会分配新的票号，
//! 超时检查凭票号关闭，避免误关后续的另一次等待。

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::models::PendingInput;

#[derive(Debug, Clone)]
struct GateEntry {
    pending: PendingInput,
    ticket: u64,
}

#[derive(Debug, Default)]
pub struct HumanInputGate {
    waiting: DashMap<String, GateEntry>,
    next_ticket: AtomicU64,
}

impl HumanInputGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一次等待，返回票号
    pub fn open(&self, run_id: &str, pending: PendingInput) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        self.waiting
            .insert(run_id.to_string(), GateEntry { pending, ticket });
        ticket
    }

    pub fn pending(&self, run_id: &str) -> Option<PendingInput> {
        self.waiting.get(run_id).map(|entry| entry.pending.clone())
    }

    pub fn ticket(&self, run_id: &str) -> Option<u64> {
        self.waiting.get(run_id).map(|entry| entry.ticket)
    }

    /// 关闭等待（收到输入或运行被取消）
    pub fn close(&self, run_id: &str) -> Option<PendingInput> {
        self.waiting.remove(run_id).map(|(_, entry)| entry.pending)
    }

    /// 仅当仍是同一次等待时关闭
    pub fn close_if(&self, run_id: &str, ticket: u64) -> bool {
        self.waiting
            .remove_if(run_id, |_, entry| entry.ticket == ticket)
            .is_some()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InputKind;
    use chrono::Utc;

    fn pending(kind: InputKind) -> PendingInput {
        PendingInput {
            kind,
            field_id: kind.default_field_id().to_string(),
            reason: "test".into(),
            media: None,
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn stale_ticket_does_not_close_new_wait() {
        let gate = HumanInputGate::new();
        let first = gate.open("r1", pending(InputKind::OneTimeCode));
        assert!(gate.close("r1").is_some());

        let second = gate.open("r1", pending(InputKind::ChallengeSolution));
        assert_ne!(first, second);
        assert!(!gate.close_if("r1", first));
        assert_eq!(gate.pending("r1").unwrap().kind, InputKind::ChallengeSolution);
        assert!(gate.close_if("r1", second));
        assert_eq!(gate.waiting_count(), 0);
    }
}
