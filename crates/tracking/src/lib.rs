//! Engagement tracking: webhook signature verification and event ingestion.

pub mod ingest;
pub mod signature;

pub use ingest::{EventIngestor, IngestReport, WebhookPayload};
pub use signature::verify_webhook_signature;
