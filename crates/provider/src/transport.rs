//! Delivery transport abstraction.
//!
//! Callers depend only on [`EmailTransport`]; the concrete provider
//! (Mailgun-style form API or SendGrid-style JSON API) is selected by
//! configuration at startup. Send failures are structured results, never
//! errors — per-recipient isolation is built on that guarantee.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use winback_core::error::EngineResult;
use winback_core::types::SuppressionEntry;

/// One rendered message handed to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    pub tags: Vec<String>,
    pub headers: HashMap<String, String>,
}

/// Structured send result. Transports never raise for a rejected message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendOutcome {
    /// Provider accepted the message for delivery.
    Accepted { id: String, message: String },
    /// Provider rejected the message, or the request itself failed.
    Rejected { message: String },
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Accepted { .. })
    }
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Transmit one message. All failures come back as
    /// [`SendOutcome::Rejected`].
    async fn send(&self, message: &OutboundEmail) -> SendOutcome;

    /// Full suppression listing across unsubscribes, bounces, and
    /// complaints (paginated upstream, 1000 per page).
    async fn suppressions(&self) -> EngineResult<Vec<SuppressionEntry>>;

    /// Add an address to the provider unsubscribe list.
    async fn add_suppression(&self, address: &str, tag: Option<&str>) -> EngineResult<bool>;

    /// Remove an address from the provider unsubscribe list.
    async fn remove_suppression(&self, address: &str) -> EngineResult<bool>;

    /// Lowercased set of every suppressed address, for the once-per-run
    /// recipient subtraction.
    async fn suppressed_addresses(&self) -> EngineResult<HashSet<String>> {
        let entries = self.suppressions().await?;
        Ok(entries.iter().map(|e| e.address.to_lowercase()).collect())
    }
}
