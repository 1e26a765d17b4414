//! Outbound user notifications.
//!
//! Delivery is fire-and-forget: [`dispatch`] spawns the send and only logs a
//! failure, so a notification can never undo a committed ledger change.

use crate::users::UserId;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const TICKET_PURCHASED: &str = "ticket_purchased";
pub const TICKET_WON: &str = "ticket_won";
pub const DEPOSIT_COMPLETED: &str = "deposit_completed";
pub const WITHDRAWAL_COMPLETED: &str = "withdrawal_completed";
pub const COMMISSION_EARNED: &str = "commission_earned";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivers templated messages to users (mail, push, chat...)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: UserId, template: &str, data: Value) -> Result<(), NotifyError>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, user_id: UserId, template: &str, data: Value) -> Result<(), NotifyError> {
        log::info!("Notify user {user_id} [{template}]: {data}");
        Ok(())
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(UserId, String, Value)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications delivered so far, oldest first
    pub fn sent(&self) -> Vec<(UserId, String, Value)> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, template: &str) -> usize {
        self.sent().iter().filter(|(_, t, _)| t == template).count()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, user_id: UserId, template: &str, data: Value) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError::Delivery("notification log poisoned".to_string()))?
            .push((user_id, template.to_string(), data));
        Ok(())
    }
}

/// Send in the background; failures are logged and dropped.
pub fn dispatch(notifier: &Arc<dyn Notifier>, user_id: UserId, template: &'static str, data: Value) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        log::warn!("No runtime to deliver {template} notification for user {user_id}");
        return;
    };

    let notifier = Arc::clone(notifier);
    handle.spawn(async move {
        if let Err(e) = notifier.send(user_id, template, data).await {
            log::warn!("Dropped {template} notification for user {user_id}: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _: UserId, _: &str, _: Value) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("smtp down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_delivers_in_background() {
        let memory = Arc::new(MemoryNotifier::new());
        let notifier: Arc<dyn Notifier> = memory.clone();

        dispatch(&notifier, 7, TICKET_WON, json!({ "amount": "5000.00" }));

        for _ in 0..50 {
            if memory.count(TICKET_WON) == 1 {
                break;
            }
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let sent = memory.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 7);
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let notifier: Arc<dyn Notifier> = Arc::new(FailingNotifier);
        dispatch(&notifier, 1, DEPOSIT_COMPLETED, Value::Null);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    #[test]
    fn test_dispatch_without_runtime_is_a_no_op() {
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
        dispatch(&notifier, 1, TICKET_PURCHASED, Value::Null);
    }
}
