//! Inbound engagement-event ingestion.
//!
//! Validates the webhook envelope, classifies the provider event, resolves
//! the campaign/variant association from tag naming conventions, persists
//! one event row, and records re-engagement outcomes for click events on
//! sequence-linked campaigns.

use crate::signature::verify_webhook_signature;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;
use winback_core::error::{EngineError, EngineResult};
use winback_core::store::CampaignStore;
use winback_core::types::{EngagementEvent, EventMetadata, EventType, ReengagementOutcome};

/// Raw webhook body: a signature block plus the event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub signature: Option<SignatureBlock>,
    #[serde(rename = "event-data")]
    pub event_data: Option<EventData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignatureBlock {
    pub timestamp: String,
    pub token: String,
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub event: String,
    pub recipient: String,
    /// Epoch seconds.
    pub timestamp: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "client-info")]
    pub client_info: Option<ClientInfo>,
    pub url: Option<String>,
    pub ip: Option<String>,
    #[serde(rename = "user-agent")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    pub bot: Option<bool>,
}

/// What ingestion did with one callback.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub event_type: Option<EventType>,
    pub campaign_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub stored: bool,
    pub outcome_recorded: bool,
}

pub struct EventIngestor {
    store: Arc<dyn CampaignStore>,
    signing_key: Option<String>,
}

impl EventIngestor {
    pub fn new(store: Arc<dyn CampaignStore>, signing_key: Option<String>) -> Self {
        Self { store, signing_key }
    }

    /// Process one webhook callback. `InvalidSignature` and
    /// `MissingEnvelope` map to authorization/client errors at the API
    /// boundary; everything downstream of validation is best-effort.
    pub async fn process(&self, payload: WebhookPayload) -> EngineResult<IngestReport> {
        // Signing is optional-but-recommended: verify only when both the
        // configured key and the signature block are present.
        if let (Some(key), Some(sig)) = (&self.signing_key, &payload.signature) {
            if !verify_webhook_signature(key, &sig.timestamp, &sig.token, &sig.signature) {
                metrics::counter!("tracking.rejected_signatures").increment(1);
                return Err(EngineError::InvalidSignature);
            }
        }

        let event_data = payload.event_data.ok_or(EngineError::MissingEnvelope)?;

        let campaign_id = tag_value(&event_data.tags, "campaign-").and_then(|v| v.parse().ok());
        let variant_label = tag_value(&event_data.tags, "variant-");

        let Some(event_type) = EventType::from_provider(&event_data.event) else {
            warn!(event = %event_data.event, "unrecognized provider event, skipping");
            return Ok(IngestReport {
                campaign_id,
                ..IngestReport::default()
            });
        };

        let variant_id = match (campaign_id, &variant_label) {
            (Some(campaign_id), Some(label)) => {
                self.store.variant_id(campaign_id, label).await?
            }
            _ => None,
        };

        let timestamp = DateTime::<Utc>::from_timestamp(event_data.timestamp as i64, 0)
            .unwrap_or_else(Utc::now);
        let is_bot = event_data
            .client_info
            .as_ref()
            .and_then(|c| c.bot)
            .unwrap_or(false);

        let event = EngagementEvent {
            id: Uuid::new_v4(),
            campaign_id,
            variant_id,
            event_type,
            recipient: event_data.recipient.clone(),
            timestamp,
            metadata: EventMetadata {
                url: event_data.url.clone(),
                ip: event_data.ip.clone(),
                user_agent: event_data.user_agent.clone(),
                tags: event_data.tags.clone(),
            },
            is_bot,
        };

        // A store failure loses this row but must not fail the callback.
        let stored = match self.store.insert_event(event).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to store engagement event");
                false
            }
        };
        metrics::counter!("tracking.events", "type" => event_type.as_str()).increment(1);

        let outcome_recorded = if event_type == EventType::Clicked {
            match self
                .record_click_outcome(campaign_id, variant_id, &event_data.recipient, timestamp)
                .await
            {
                Ok(recorded) => recorded,
                Err(e) => {
                    error!(error = %e, "failed to record re-engagement outcome");
                    false
                }
            }
        } else {
            false
        };

        Ok(IngestReport {
            event_type: Some(event_type),
            campaign_id,
            variant_id,
            stored,
            outcome_recorded,
        })
    }

    /// First qualifying click per (email, sequence) creates an outcome row.
    /// Check-then-insert: duplicate detection is best-effort, not enforced
    /// by the storage layer.
    async fn record_click_outcome(
        &self,
        campaign_id: Option<Uuid>,
        variant_id: Option<Uuid>,
        recipient: &str,
        clicked_at: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let Some(campaign_id) = campaign_id else {
            return Ok(false);
        };
        let Some(campaign) = self.store.get_campaign(campaign_id).await? else {
            return Ok(false);
        };
        let Some(sequence_id) = campaign.sequence_id else {
            return Ok(false);
        };

        if self.store.outcome_exists(recipient, sequence_id).await? {
            return Ok(false);
        }

        self.store
            .insert_outcome(ReengagementOutcome {
                id: Uuid::new_v4(),
                campaign_id,
                sequence_id,
                variant_id,
                user_id: recipient.to_string(),
                email: recipient.to_string(),
                clicked_at,
                active_7d: None,
                active_30d: None,
                returned_at: None,
                relapsed: None,
            })
            .await?;
        metrics::counter!("tracking.outcomes_created").increment(1);
        Ok(true)
    }
}

fn tag_value(tags: &[String], prefix: &str) -> Option<String> {
    tags.iter()
        .find(|t| t.starts_with(prefix))
        .map(|t| t[prefix.len()..].to_string())
}
