//! Campaign orchestration: resolve recipients, pick the variant plan, drive
//! the dispatcher, and persist lifecycle state.
//!
//! Lifecycle per campaign: `Draft -> Sending -> {Completed | Failed}`. The
//! entry guard is a conditional store transition, so two near-simultaneous
//! triggers cannot both start the same campaign.

use crate::batch::split_recipients;
use crate::dispatcher::{self, CampaignConfig, NoOpProgress, ProgressSink, SendProgress};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use winback_core::config::DeliveryConfig;
use winback_core::error::{EngineError, EngineResult};
use winback_core::store::CampaignStore;
use winback_core::templates::TemplateStore;
use winback_core::types::{CampaignRecord, CampaignStatus, Recipient, VariantRecord};
use winback_core::users::{fetch_all_recipients, UserDirectory};
use winback_provider::EmailTransport;

/// Final accounting for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub total_recipients: usize,
    pub total_sent: usize,
    pub total_failed: usize,
}

/// Sink that persists per-batch progress through the store. Persistence
/// failures are logged and the send continues.
struct StoreProgress {
    store: Arc<dyn CampaignStore>,
    campaign_id: Uuid,
}

#[async_trait]
impl ProgressSink for StoreProgress {
    async fn publish(&self, progress: SendProgress) {
        if let Err(e) = self
            .store
            .update_progress(self.campaign_id, progress.total_sent, progress.total_failed)
            .await
        {
            warn!(campaign_id = %self.campaign_id, error = %e, "failed to persist send progress");
        }
    }
}

pub struct CampaignRunner {
    store: Arc<dyn CampaignStore>,
    directory: Arc<dyn UserDirectory>,
    transport: Arc<dyn EmailTransport>,
    templates: Arc<TemplateStore>,
    delivery: DeliveryConfig,
    unsubscribe_secret: String,
}

impl CampaignRunner {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        directory: Arc<dyn UserDirectory>,
        transport: Arc<dyn EmailTransport>,
        templates: Arc<TemplateStore>,
        delivery: DeliveryConfig,
        unsubscribe_secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            directory,
            transport,
            templates,
            delivery,
            unsubscribe_secret: unsubscribe_secret.into(),
        }
    }

    fn check_config(&self) -> EngineResult<()> {
        if self.unsubscribe_secret.is_empty() {
            return Err(EngineError::Config("unsubscribe secret is not set".into()));
        }
        Ok(())
    }

    /// Directory minus the provider's current suppression set. Computed once
    /// per run; a mid-run unsubscribe may still receive this run's message.
    pub async fn resolve_recipients(&self) -> EngineResult<Vec<Recipient>> {
        let all_users = fetch_all_recipients(self.directory.as_ref()).await?;
        let suppressed = self.transport.suppressed_addresses().await?;
        Ok(all_users
            .into_iter()
            .filter(|u| !suppressed.contains(&u.email.to_lowercase()))
            .collect())
    }

    /// Send a draft campaign end to end: resolve recipients, split variants
    /// when an A/B pair exists, dispatch, and finalize status and counters.
    pub async fn send_campaign(&self, campaign_id: Uuid) -> EngineResult<RunSummary> {
        self.check_config()?;

        let campaign = self
            .store
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("campaign {campaign_id}")))?;

        if campaign.status != CampaignStatus::Draft {
            return Err(EngineError::CampaignState(campaign_id, "draft".into()));
        }

        let recipients = self.resolve_recipients().await?;
        let template_html = self
            .templates
            .get_or_fallback(&campaign.template_name)?
            .to_string();

        // The conditional transition is the real entry guard; losing it means
        // a concurrent trigger already started this campaign.
        if !self
            .store
            .transition_status(campaign_id, CampaignStatus::Draft, CampaignStatus::Sending)
            .await?
        {
            return Err(EngineError::CampaignState(campaign_id, "draft".into()));
        }

        if let Err(e) = self
            .store
            .set_total_recipients(campaign_id, recipients.len())
            .await
        {
            warn!(campaign_id = %campaign_id, error = %e, "failed to persist recipient count");
        }

        info!(
            campaign_id = %campaign_id,
            recipients = recipients.len(),
            "campaign send started"
        );

        let variants = self.store.variants(campaign_id).await?;
        let progress = match ab_pair(&variants) {
            Some((variant_a, variant_b)) => {
                self.dispatch_split(&campaign, &recipients, &template_html, variant_a, variant_b)
                    .await
            }
            None => {
                let mut config = self.base_config(&campaign, &template_html);
                config.tags = Some(vec![
                    "campaign".to_string(),
                    format!("campaign-{campaign_id}"),
                ]);
                let sink = StoreProgress {
                    store: self.store.clone(),
                    campaign_id,
                };
                dispatcher::dispatch(
                    self.transport.clone(),
                    &recipients,
                    &config,
                    &self.unsubscribe_secret,
                    &self.delivery.site_url,
                    &sink,
                )
                .await
            }
        };

        self.finalize(campaign_id, &progress).await
    }

    /// Dispatch-and-finalize for a campaign whose recipients were already
    /// resolved by the caller (the sequence scheduler path). Tags are derived
    /// from the campaign's sequence linkage.
    pub async fn run_step(
        &self,
        campaign: &CampaignRecord,
        recipients: &[Recipient],
        template_html: &str,
    ) -> EngineResult<RunSummary> {
        self.check_config()?;

        if !self
            .store
            .transition_status(campaign.id, CampaignStatus::Draft, CampaignStatus::Sending)
            .await?
        {
            return Err(EngineError::CampaignState(campaign.id, "draft".into()));
        }

        if let Err(e) = self
            .store
            .set_total_recipients(campaign.id, recipients.len())
            .await
        {
            warn!(campaign_id = %campaign.id, error = %e, "failed to persist recipient count");
        }

        let mut config = self.base_config(campaign, template_html);
        config.sequence_id = campaign.sequence_id;
        config.sequence_step = campaign.sequence_step;

        let sink = StoreProgress {
            store: self.store.clone(),
            campaign_id: campaign.id,
        };
        let progress = dispatcher::dispatch(
            self.transport.clone(),
            recipients,
            &config,
            &self.unsubscribe_secret,
            &self.delivery.site_url,
            &sink,
        )
        .await;

        self.finalize(campaign.id, &progress).await
    }

    fn base_config(&self, campaign: &CampaignRecord, template_html: &str) -> CampaignConfig {
        let mut config = CampaignConfig::new(
            campaign.id,
            &campaign.subject,
            &campaign.body_html,
            template_html,
        );
        config.preheader = campaign.preheader.clone();
        config.batch_size = Some(self.delivery.batch_size);
        config.delay_ms = Some(self.delivery.delay_ms);
        config
    }

    async fn dispatch_split(
        &self,
        campaign: &CampaignRecord,
        recipients: &[Recipient],
        template_html: &str,
        variant_a: &VariantRecord,
        variant_b: &VariantRecord,
    ) -> SendProgress {
        let (group_a, group_b) = split_recipients(recipients, variant_a.split_percentage);
        info!(
            campaign_id = %campaign.id,
            group_a = group_a.len(),
            group_b = group_b.len(),
            "A/B split send"
        );

        let mut total = SendProgress {
            total_sent: 0,
            total_failed: 0,
            total_recipients: recipients.len(),
        };

        for (variant, group) in [(variant_a, group_a), (variant_b, group_b)] {
            let variant_template = variant
                .template_name
                .as_deref()
                .and_then(|name| self.templates.get(name))
                .unwrap_or(template_html);

            let mut config = CampaignConfig::new(
                campaign.id,
                &variant.subject,
                &variant.body_html,
                variant_template,
            );
            config.batch_size = Some(self.delivery.batch_size);
            config.delay_ms = Some(self.delivery.delay_ms);
            config.tags = Some(vec![
                "campaign".to_string(),
                format!("campaign-{}", campaign.id),
                format!("variant-{}", variant.variant_label),
            ]);

            let progress = dispatcher::dispatch(
                self.transport.clone(),
                &group,
                &config,
                &self.unsubscribe_secret,
                &self.delivery.site_url,
                &NoOpProgress,
            )
            .await;

            if let Err(e) = self
                .store
                .update_variant_stats(
                    variant.id,
                    group.len(),
                    progress.total_sent,
                    progress.total_failed,
                )
                .await
            {
                warn!(variant_id = %variant.id, error = %e, "failed to persist variant stats");
            }

            total.total_sent += progress.total_sent;
            total.total_failed += progress.total_failed;
        }

        total
    }

    async fn finalize(&self, campaign_id: Uuid, progress: &SendProgress) -> EngineResult<RunSummary> {
        let status = if progress.total_failed == progress.total_recipients
            && progress.total_recipients > 0
        {
            CampaignStatus::Failed
        } else {
            CampaignStatus::Completed
        };

        // A completion-write failure is logged as the only diagnostic.
        if let Err(e) = self
            .store
            .finalize_campaign(
                campaign_id,
                status,
                progress.total_sent,
                progress.total_failed,
                Utc::now(),
            )
            .await
        {
            warn!(campaign_id = %campaign_id, error = %e, "failed to persist final campaign status");
        }

        info!(
            campaign_id = %campaign_id,
            status = status.as_str(),
            sent = progress.total_sent,
            failed = progress.total_failed,
            "campaign send finished"
        );

        Ok(RunSummary {
            campaign_id,
            status,
            total_recipients: progress.total_recipients,
            total_sent: progress.total_sent,
            total_failed: progress.total_failed,
        })
    }
}

/// The split path applies only when exactly one A/B pair exists.
fn ab_pair(variants: &[VariantRecord]) -> Option<(&VariantRecord, &VariantRecord)> {
    if variants.len() != 2 {
        return None;
    }
    let variant_a = variants.iter().find(|v| v.variant_label == "A")?;
    let variant_b = variants.iter().find(|v| v.variant_label == "B")?;
    Some((variant_a, variant_b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use winback_core::store::MemoryStore;
    use winback_core::types::SuppressionKind;
    use winback_core::users::MemoryDirectory;
    use winback_provider::MemoryTransport;

    fn delivery_config() -> DeliveryConfig {
        DeliveryConfig {
            batch_size: 50,
            delay_ms: 0,
            site_url: "https://app.test".to_string(),
        }
    }

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient {
                email: format!("user{i}@test.com"),
                user_id: format!("u{i}"),
            })
            .collect()
    }

    struct Harness {
        store: Arc<MemoryStore>,
        transport: Arc<MemoryTransport>,
        runner: CampaignRunner,
    }

    fn harness(users: Vec<Recipient>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MemoryTransport::new());
        let templates = Arc::new(TemplateStore::new("announcement"));
        let runner = CampaignRunner::new(
            store.clone(),
            Arc::new(MemoryDirectory::new(users)),
            transport.clone(),
            templates,
            delivery_config(),
            "unsub-secret",
        );
        Harness {
            store,
            transport,
            runner,
        }
    }

    #[tokio::test]
    async fn test_send_campaign_completes() {
        let h = harness(recipients(10));
        let campaign = CampaignRecord::draft("Hi", "<p>Body</p>", "announcement");
        let id = campaign.id;
        h.store.insert_campaign(campaign).await.unwrap();

        let summary = h.runner.send_campaign(id).await.unwrap();
        assert_eq!(summary.status, CampaignStatus::Completed);
        assert_eq!(summary.total_sent, 10);
        assert_eq!(summary.total_failed, 0);

        let stored = h.store.get_campaign(id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert_eq!(stored.total_recipients, 10);
        assert_eq!(stored.total_sent, 10);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_suppressed_recipients_excluded() {
        let h = harness(recipients(5));
        // Suppression match is case-insensitive.
        h.transport.suppress("User3@Test.com", SuppressionKind::Unsubscribe);

        let campaign = CampaignRecord::draft("Hi", "<p>Body</p>", "announcement");
        let id = campaign.id;
        h.store.insert_campaign(campaign).await.unwrap();

        let summary = h.runner.send_campaign(id).await.unwrap();
        assert_eq!(summary.total_recipients, 4);
        assert!(h
            .transport
            .sent()
            .iter()
            .all(|m| m.to != "user3@test.com"));
    }

    #[tokio::test]
    async fn test_non_draft_campaign_is_rejected() {
        let h = harness(recipients(3));
        let mut campaign = CampaignRecord::draft("Hi", "<p>Body</p>", "announcement");
        campaign.status = CampaignStatus::Completed;
        let id = campaign.id;
        h.store.insert_campaign(campaign).await.unwrap();

        let err = h.runner.send_campaign(id).await.unwrap_err();
        assert!(matches!(err, EngineError::CampaignState(_, _)));
        assert_eq!(h.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_all_failures_marks_campaign_failed() {
        let h = harness(recipients(2));
        h.transport.fail_address("user0@test.com");
        h.transport.fail_address("user1@test.com");

        let campaign = CampaignRecord::draft("Hi", "<p>Body</p>", "announcement");
        let id = campaign.id;
        h.store.insert_campaign(campaign).await.unwrap();

        let summary = h.runner.send_campaign(id).await.unwrap();
        assert_eq!(summary.status, CampaignStatus::Failed);
        assert_eq!(summary.total_failed, 2);
    }

    #[tokio::test]
    async fn test_zero_recipients_completes() {
        let h = harness(Vec::new());
        let campaign = CampaignRecord::draft("Hi", "<p>Body</p>", "announcement");
        let id = campaign.id;
        h.store.insert_campaign(campaign).await.unwrap();

        let summary = h.runner.send_campaign(id).await.unwrap();
        assert_eq!(summary.status, CampaignStatus::Completed);
        assert_eq!(summary.total_recipients, 0);
    }

    #[tokio::test]
    async fn test_ab_split_dispatches_both_variants() {
        let h = harness(recipients(100));
        let campaign = CampaignRecord::draft("Base", "<p>Base</p>", "announcement");
        let id = campaign.id;
        h.store.insert_campaign(campaign).await.unwrap();

        for (label, split) in [("A", 70.0), ("B", 30.0)] {
            h.store
                .insert_variant(VariantRecord {
                    id: Uuid::new_v4(),
                    campaign_id: id,
                    variant_label: label.to_string(),
                    subject: format!("Subject {label}"),
                    body_html: format!("<p>Variant {label}</p>"),
                    template_name: None,
                    split_percentage: split,
                    total_recipients: 0,
                    total_sent: 0,
                    total_failed: 0,
                })
                .await
                .unwrap();
        }

        let summary = h.runner.send_campaign(id).await.unwrap();
        assert_eq!(summary.total_sent, 100);
        assert_eq!(summary.status, CampaignStatus::Completed);

        let variants = h.store.variants(id).await.unwrap();
        assert_eq!(variants[0].total_recipients, 70);
        assert_eq!(variants[1].total_recipients, 30);
        assert_eq!(variants[0].total_sent + variants[1].total_sent, 100);

        // Every message carries the matching variant tag.
        let sent = h.transport.sent();
        let tagged_a = sent
            .iter()
            .filter(|m| m.tags.contains(&"variant-A".to_string()))
            .count();
        let tagged_b = sent
            .iter()
            .filter(|m| m.tags.contains(&"variant-B".to_string()))
            .count();
        assert_eq!(tagged_a, 70);
        assert_eq!(tagged_b, 30);

        // A/B groups carry variant subjects, not the base subject.
        assert!(sent.iter().all(|m| m.subject != "Base"));
    }

    #[tokio::test]
    async fn test_missing_secret_is_config_error() {
        let store = Arc::new(MemoryStore::new());
        let runner = CampaignRunner::new(
            store.clone(),
            Arc::new(MemoryDirectory::new(recipients(1))),
            Arc::new(MemoryTransport::new()),
            Arc::new(TemplateStore::new("announcement")),
            delivery_config(),
            "",
        );
        let campaign = CampaignRecord::draft("Hi", "<p>Body</p>", "announcement");
        let id = campaign.id;
        store.insert_campaign(campaign).await.unwrap();

        let err = runner.send_campaign(id).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        // The guard failed before any state transition.
        let stored = store.get_campaign(id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Draft);
    }
}
