//! Batched campaign dispatch.
//!
//! Recipients are partitioned into fixed-size batches; sends inside one
//! batch fan out concurrently while batches run strictly in order with an
//! inter-batch pause. One recipient's transport failure never aborts the
//! batch — outcomes are collected per recipient and rolled into cumulative
//! progress, published once per batch.

use crate::batch::chunk;
use crate::tokens::create_unsubscribe_token;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;
use uuid::Uuid;
use winback_core::templates::render_email;
use winback_core::types::Recipient;
use winback_provider::{EmailTransport, OutboundEmail};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// Everything one send needs, immutable for the duration of the run.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub campaign_id: Uuid,
    pub subject: String,
    pub body_html: String,
    pub template_html: String,
    pub preheader: Option<String>,
    pub batch_size: Option<usize>,
    pub delay_ms: Option<u64>,
    /// Explicit tags take priority over derived ones.
    pub tags: Option<Vec<String>>,
    pub sequence_id: Option<Uuid>,
    pub sequence_step: Option<u32>,
    pub variant_label: Option<String>,
}

impl CampaignConfig {
    pub fn new(
        campaign_id: Uuid,
        subject: impl Into<String>,
        body_html: impl Into<String>,
        template_html: impl Into<String>,
    ) -> Self {
        Self {
            campaign_id,
            subject: subject.into(),
            body_html: body_html.into(),
            template_html: template_html.into(),
            preheader: None,
            batch_size: None,
            delay_ms: None,
            tags: None,
            sequence_id: None,
            sequence_step: None,
            variant_label: None,
        }
    }
}

/// Cumulative counters for one run, mutated only by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendProgress {
    pub total_sent: usize,
    pub total_failed: usize,
    pub total_recipients: usize,
}

/// Receives cumulative progress once per settled batch.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, progress: SendProgress);
}

/// Sink for callers that do not observe progress.
pub struct NoOpProgress;

#[async_trait]
impl ProgressSink for NoOpProgress {
    async fn publish(&self, _progress: SendProgress) {}
}

/// In-memory sink that captures every published snapshot, for tests.
#[derive(Default)]
pub struct CaptureProgress {
    snapshots: std::sync::Mutex<Vec<SendProgress>>,
}

impl CaptureProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<SendProgress> {
        self.snapshots.lock().expect("progress mutex poisoned").clone()
    }
}

#[async_trait]
impl ProgressSink for CaptureProgress {
    async fn publish(&self, progress: SendProgress) {
        self.snapshots
            .lock()
            .expect("progress mutex poisoned")
            .push(progress);
    }
}

/// Effective tag set for a send. Caller-supplied tags win; otherwise the
/// base tag is derived from the campaign id. Sequence, step, and variant
/// tags are appended at most once each, and only when not already present.
pub fn resolve_tags(config: &CampaignConfig) -> Vec<String> {
    let mut tags = match &config.tags {
        Some(tags) => tags.clone(),
        None => vec![format!("campaign-{}", config.campaign_id)],
    };
    if let Some(sequence_id) = config.sequence_id {
        if !tags.iter().any(|t| t.starts_with("sequence-")) {
            tags.push(format!("sequence-{sequence_id}"));
        }
    }
    if let Some(step) = config.sequence_step {
        if !tags.iter().any(|t| t.starts_with("step-")) {
            tags.push(format!("step-{step}"));
        }
    }
    if let Some(label) = &config.variant_label {
        if !tags.iter().any(|t| t.starts_with("variant-")) {
            tags.push(format!("variant-{label}"));
        }
    }
    tags
}

/// Render one recipient's message: unique unsubscribe token, query-string
/// unsubscribe URL, and the one-click unsubscribe header pair.
fn build_message(
    recipient: &Recipient,
    config: &CampaignConfig,
    tags: &[String],
    token_secret: &str,
    site_url: &str,
) -> OutboundEmail {
    let token = create_unsubscribe_token(
        &recipient.email,
        &config.campaign_id.to_string(),
        token_secret,
    );
    let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
    let unsubscribe_url = format!("{site_url}/unsubscribe?token={encoded}");

    let html = render_email(
        &config.template_html,
        &config.body_html,
        &unsubscribe_url,
        Some(&config.subject),
        config.preheader.as_deref(),
    );

    let mut headers = HashMap::new();
    headers.insert("List-Unsubscribe".to_string(), format!("<{unsubscribe_url}>"));
    headers.insert(
        "List-Unsubscribe-Post".to_string(),
        "List-Unsubscribe=One-Click".to_string(),
    );

    OutboundEmail {
        to: recipient.email.clone(),
        subject: config.subject.clone(),
        html,
        text: None,
        tags: tags.to_vec(),
        headers,
    }
}

/// Send a campaign to all recipients in batches. Returns the final
/// progress; individual send failures are counted, never raised.
pub async fn dispatch(
    transport: Arc<dyn EmailTransport>,
    recipients: &[Recipient],
    config: &CampaignConfig,
    token_secret: &str,
    site_url: &str,
    progress_sink: &dyn ProgressSink,
) -> SendProgress {
    let batch_size = config.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    let delay = Duration::from_millis(config.delay_ms.unwrap_or(DEFAULT_DELAY_MS));
    let tags = resolve_tags(config);

    let mut progress = SendProgress {
        total_sent: 0,
        total_failed: 0,
        total_recipients: recipients.len(),
    };

    let batches = chunk(recipients, batch_size);
    let batch_count = batches.len();

    for (index, batch) in batches.into_iter().enumerate() {
        let mut in_flight = JoinSet::new();
        for recipient in &batch {
            let message = build_message(recipient, config, &tags, token_secret, site_url);
            let transport = transport.clone();
            in_flight.spawn(async move { transport.send(&message).await });
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(outcome) if outcome.is_success() => progress.total_sent += 1,
                _ => progress.total_failed += 1,
            }
        }

        metrics::counter!("delivery.batches").increment(1);
        debug!(
            campaign_id = %config.campaign_id,
            batch = index + 1,
            batches = batch_count,
            sent = progress.total_sent,
            failed = progress.total_failed,
            "batch settled"
        );
        progress_sink.publish(progress.clone()).await;

        if index + 1 < batch_count {
            tokio::time::sleep(delay).await;
        }
    }

    metrics::counter!("delivery.emails_sent").increment(progress.total_sent as u64);
    metrics::counter!("delivery.emails_failed").increment(progress.total_failed as u64);
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::verify_unsubscribe_token;
    use winback_provider::MemoryTransport;

    const SECRET: &str = "unsub-secret";
    const SITE: &str = "https://app.test";

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient {
                email: format!("user{i}@test.com"),
                user_id: format!("u{i}"),
            })
            .collect()
    }

    fn config() -> CampaignConfig {
        let mut config = CampaignConfig::new(
            Uuid::new_v4(),
            "Hello",
            "<p>Body</p>",
            "<html>{{body}}<a href=\"{{unsubscribe_url}}\">out</a></html>",
        );
        config.delay_ms = Some(0);
        config
    }

    #[test]
    fn test_explicit_tags_take_priority() {
        let mut config = config();
        config.tags = Some(vec!["campaign".into(), "campaign-abc".into()]);
        config.sequence_id = Some(Uuid::new_v4());
        let tags = resolve_tags(&config);
        assert_eq!(tags[0], "campaign");
        assert_eq!(tags[1], "campaign-abc");
        // Sequence tag still appended since none was present.
        assert!(tags[2].starts_with("sequence-"));
    }

    #[test]
    fn test_derived_tags_from_config_fields() {
        let mut config = config();
        let sequence_id = Uuid::new_v4();
        config.sequence_id = Some(sequence_id);
        config.sequence_step = Some(2);
        config.variant_label = Some("B".into());
        let tags = resolve_tags(&config);
        assert_eq!(tags[0], format!("campaign-{}", config.campaign_id));
        assert_eq!(tags[1], format!("sequence-{sequence_id}"));
        assert_eq!(tags[2], "step-2");
        assert_eq!(tags[3], "variant-B");
    }

    #[test]
    fn test_tag_families_added_at_most_once() {
        let mut config = config();
        config.tags = Some(vec!["sequence-existing".into(), "step-9".into()]);
        config.sequence_id = Some(Uuid::new_v4());
        config.sequence_step = Some(1);
        let tags = resolve_tags(&config);
        assert_eq!(tags, vec!["sequence-existing".to_string(), "step-9".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_counts_and_batches() {
        let transport = Arc::new(MemoryTransport::new());
        let input = recipients(120);
        let mut config = config();
        config.batch_size = Some(50);

        let capture = CaptureProgress::new();
        let progress = dispatch(transport.clone(), &input, &config, SECRET, SITE, &capture).await;

        assert_eq!(progress.total_sent, 120);
        assert_eq!(progress.total_failed, 0);
        assert_eq!(progress.total_recipients, 120);
        assert_eq!(transport.sent_count(), 120);

        // One snapshot per batch: 50, 50, 20.
        let snapshots = capture.snapshots();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].total_sent, 50);
        assert_eq!(snapshots[1].total_sent, 100);
        assert_eq!(snapshots[2].total_sent, 120);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_address("user3@test.com");
        let input = recipients(10);
        let config = config();

        let progress = dispatch(transport.clone(), &input, &config, SECRET, SITE, &NoOpProgress).await;

        assert_eq!(progress.total_sent, 9);
        assert_eq!(progress.total_failed, 1);
        assert_eq!(progress.total_sent + progress.total_failed, progress.total_recipients);
        assert_eq!(transport.sent_count(), 9);
    }

    #[tokio::test]
    async fn test_messages_carry_unsubscribe_token_and_headers() {
        let transport = Arc::new(MemoryTransport::new());
        let input = recipients(1);
        let config = config();

        dispatch(transport.clone(), &input, &config, SECRET, SITE, &NoOpProgress).await;

        let sent = transport.sent();
        let message = &sent[0];

        let header = message.headers.get("List-Unsubscribe").unwrap();
        assert!(header.starts_with(&format!("<{SITE}/unsubscribe?token=")));
        assert_eq!(
            message.headers.get("List-Unsubscribe-Post").unwrap(),
            "List-Unsubscribe=One-Click"
        );

        // The embedded token verifies and names this recipient + campaign.
        let token = header
            .trim_start_matches(&format!("<{SITE}/unsubscribe?token="))
            .trim_end_matches('>');
        let payload = verify_unsubscribe_token(token, SECRET).unwrap();
        assert_eq!(payload.email, "user0@test.com");
        assert_eq!(payload.campaign_id, config.campaign_id.to_string());

        // Rendered HTML contains the body and the unsubscribe link.
        assert!(message.html.contains("<p>Body</p>"));
        assert!(message.html.contains("/unsubscribe?token="));
    }

    #[tokio::test]
    async fn test_dispatch_empty_recipients() {
        let transport = Arc::new(MemoryTransport::new());
        let capture = CaptureProgress::new();
        let progress =
            dispatch(transport, &[], &config(), SECRET, SITE, &capture).await;
        assert_eq!(progress, SendProgress::default());
        assert!(capture.snapshots().is_empty());
    }
}
