//! In-memory transport that captures outbound mail. Backs local development
//! and the delivery tests.

use crate::transport::{EmailTransport, OutboundEmail, SendOutcome};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use winback_core::error::EngineResult;
use winback_core::types::{SuppressionEntry, SuppressionKind};

#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<OutboundEmail>>,
    failing: Mutex<HashSet<String>>,
    suppressed: Mutex<Vec<SuppressionEntry>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sends to `address` come back rejected.
    pub fn fail_address(&self, address: &str) {
        self.failing
            .lock()
            .expect("transport mutex poisoned")
            .insert(address.to_lowercase());
    }

    /// Pre-seed a suppression entry.
    pub fn suppress(&self, address: &str, kind: SuppressionKind) {
        self.suppressed
            .lock()
            .expect("transport mutex poisoned")
            .push(SuppressionEntry {
                address: address.to_string(),
                kind,
                created_at: chrono::Utc::now().to_rfc3339(),
                code: None,
                error: None,
                tags: None,
            });
    }

    /// Everything accepted so far, in send order.
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().expect("transport mutex poisoned").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("transport mutex poisoned").len()
    }
}

#[async_trait]
impl EmailTransport for MemoryTransport {
    async fn send(&self, message: &OutboundEmail) -> SendOutcome {
        if self
            .failing
            .lock()
            .expect("transport mutex poisoned")
            .contains(&message.to.to_lowercase())
        {
            return SendOutcome::Rejected {
                message: "simulated transport failure".to_string(),
            };
        }
        let mut sent = self.sent.lock().expect("transport mutex poisoned");
        sent.push(message.clone());
        SendOutcome::Accepted {
            id: format!("mem-{}", sent.len()),
            message: "Queued".to_string(),
        }
    }

    async fn suppressions(&self) -> EngineResult<Vec<SuppressionEntry>> {
        Ok(self.suppressed.lock().expect("transport mutex poisoned").clone())
    }

    async fn add_suppression(&self, address: &str, tag: Option<&str>) -> EngineResult<bool> {
        self.suppressed
            .lock()
            .expect("transport mutex poisoned")
            .push(SuppressionEntry {
                address: address.to_string(),
                kind: SuppressionKind::Unsubscribe,
                created_at: chrono::Utc::now().to_rfc3339(),
                code: None,
                error: None,
                tags: tag.map(|t| vec![t.to_string()]),
            });
        Ok(true)
    }

    async fn remove_suppression(&self, address: &str) -> EngineResult<bool> {
        let mut entries = self.suppressed.lock().expect("transport mutex poisoned");
        let before = entries.len();
        entries.retain(|e| !e.address.eq_ignore_ascii_case(address));
        Ok(entries.len() < before)
    }
}
