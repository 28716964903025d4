//! Delivery-provider clients: transport trait, Mailgun and SendGrid
//! implementations, suppression-list operations, and the activity probe.

pub mod activity;
pub mod mailgun;
pub mod memory;
pub mod sendgrid;
pub mod transport;

pub use activity::ActivityClient;
pub use mailgun::MailgunTransport;
pub use memory::MemoryTransport;
pub use sendgrid::SendGridTransport;
pub use transport::{EmailTransport, OutboundEmail, SendOutcome};

use std::sync::Arc;
use winback_core::config::ProviderConfig;
use winback_core::error::{EngineError, EngineResult};

/// Build the configured transport. Missing credentials are a configuration
/// error; nothing is sent before this succeeds.
pub fn build_transport(config: &ProviderConfig) -> EngineResult<Arc<dyn EmailTransport>> {
    match config.kind.as_str() {
        "mailgun" => {
            if config.api_key.is_empty() {
                return Err(EngineError::Config("provider api_key is not set".into()));
            }
            Ok(Arc::new(MailgunTransport::new(
                &config.api_key,
                &config.domain,
                &config.from_name,
            )))
        }
        "sendgrid" => {
            if config.api_key.is_empty() {
                return Err(EngineError::Config("provider api_key is not set".into()));
            }
            Ok(Arc::new(SendGridTransport::new(
                &config.api_key,
                &config.domain,
                &config.from_name,
            )))
        }
        "memory" => Ok(Arc::new(MemoryTransport::new())),
        other => Err(EngineError::Config(format!("unknown provider kind: {other}"))),
    }
}
