//! Scheduled sequence processing.
//!
//! Each invocation finds sequence-linked draft campaigns whose scheduled
//! time has passed, applies smart suppression (recipients who already
//! clicked an earlier step converted and get no further nudges), delegates
//! to the campaign runner, and advances sequence lifecycle state. One
//! campaign's failure never aborts the rest of the due batch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use winback_core::error::{EngineError, EngineResult};
use winback_core::store::CampaignStore;
use winback_core::templates::TemplateStore;
use winback_core::types::{CampaignRecord, CampaignStatus, Recipient};
use winback_core::users::ActivityProbe;
use winback_delivery::runner::CampaignRunner;

/// Per-campaign line in the trigger response.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub campaign_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerReport {
    pub processed: usize,
    pub results: Vec<StepOutcome>,
}

pub struct SequenceScheduler {
    store: Arc<dyn CampaignStore>,
    templates: Arc<TemplateStore>,
    runner: Arc<CampaignRunner>,
    activity: Arc<dyn ActivityProbe>,
}

impl SequenceScheduler {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        templates: Arc<TemplateStore>,
        runner: Arc<CampaignRunner>,
        activity: Arc<dyn ActivityProbe>,
    ) -> Self {
        Self {
            store,
            templates,
            runner,
            activity,
        }
    }

    /// One scheduler pass: send every due step, then reconcile pending
    /// re-engagement outcomes. Safe to call repeatedly; a pass with nothing
    /// due reports `processed: 0`.
    pub async fn tick(&self, now: DateTime<Utc>) -> EngineResult<SchedulerReport> {
        let report = self.run_due(now).await?;
        self.reconcile_outcomes(now).await;
        Ok(report)
    }

    /// Send every sequence-linked draft campaign whose scheduled time has
    /// passed.
    pub async fn run_due(&self, now: DateTime<Utc>) -> EngineResult<SchedulerReport> {
        let due = self.store.due_sequence_campaigns(now).await?;
        if due.is_empty() {
            return Ok(SchedulerReport::default());
        }

        // Directory and suppression set are fetched once and shared across
        // every due campaign in this invocation.
        let base_recipients = self.runner.resolve_recipients().await?;
        info!(
            due = due.len(),
            base_recipients = base_recipients.len(),
            "processing due sequence campaigns"
        );

        let mut results = Vec::with_capacity(due.len());
        for campaign in &due {
            let outcome = match self.process_campaign(campaign, &base_recipients).await {
                Ok(outcome) => outcome,
                Err(EngineError::CampaignState(id, _)) => {
                    // A concurrent trigger won the entry guard; leave its
                    // run untouched.
                    warn!(campaign_id = %id, "campaign already started elsewhere, skipping");
                    StepOutcome {
                        campaign_id: campaign.id,
                        status: "skipped".to_string(),
                        sent: None,
                        failed: None,
                    }
                }
                Err(e) => {
                    error!(campaign_id = %campaign.id, error = %e, "failed to process campaign");
                    if let Err(e) = self.store.mark_failed(campaign.id).await {
                        error!(campaign_id = %campaign.id, error = %e, "failed to mark campaign failed");
                    }
                    StepOutcome {
                        campaign_id: campaign.id,
                        status: CampaignStatus::Failed.as_str().to_string(),
                        sent: None,
                        failed: None,
                    }
                }
            };
            results.push(outcome);
        }

        metrics::counter!("sequence.campaigns_processed").increment(results.len() as u64);
        Ok(SchedulerReport {
            processed: results.len(),
            results,
        })
    }

    async fn process_campaign(
        &self,
        campaign: &CampaignRecord,
        base_recipients: &[Recipient],
    ) -> EngineResult<StepOutcome> {
        let recipients = self.smart_suppress(campaign, base_recipients).await?;
        let template_html = self
            .templates
            .get_or_fallback(&campaign.template_name)?
            .to_string();

        let summary = self
            .runner
            .run_step(campaign, &recipients, &template_html)
            .await?;

        // The final step closes out the sequence.
        if let (Some(sequence_id), Some(step)) = (campaign.sequence_id, campaign.sequence_step) {
            let last_step = self.store.max_sequence_step(sequence_id).await?;
            if last_step == Some(step) {
                if let Err(e) = self.store.complete_sequence(sequence_id).await {
                    warn!(sequence_id = %sequence_id, error = %e, "failed to complete sequence");
                }
            }
        }

        Ok(StepOutcome {
            campaign_id: campaign.id,
            status: summary.status.as_str().to_string(),
            sent: Some(summary.total_sent),
            failed: Some(summary.total_failed),
        })
    }

    /// For steps beyond the first, exclude every recipient who clicked any
    /// earlier step of the same sequence.
    async fn smart_suppress(
        &self,
        campaign: &CampaignRecord,
        base_recipients: &[Recipient],
    ) -> EngineResult<Vec<Recipient>> {
        let (Some(sequence_id), Some(step)) = (campaign.sequence_id, campaign.sequence_step) else {
            return Ok(base_recipients.to_vec());
        };
        if step <= 1 {
            return Ok(base_recipients.to_vec());
        }

        let earlier = self
            .store
            .sequence_campaigns_before_step(sequence_id, step)
            .await?;
        if earlier.is_empty() {
            return Ok(base_recipients.to_vec());
        }

        let clicked = self.store.clicked_recipients(&earlier).await?;
        if clicked.is_empty() {
            return Ok(base_recipients.to_vec());
        }

        let remaining: Vec<Recipient> = base_recipients
            .iter()
            .filter(|r| !clicked.contains(&r.email.to_lowercase()))
            .cloned()
            .collect();
        info!(
            campaign_id = %campaign.id,
            step,
            excluded = base_recipients.len() - remaining.len(),
            "smart suppression applied"
        );
        Ok(remaining)
    }

    /// Record 7-day and 30-day return activity for outcomes whose windows
    /// have elapsed. Best-effort: probe and store failures are logged and
    /// skipped.
    pub async fn reconcile_outcomes(&self, now: DateTime<Utc>) {
        let pending = match self.store.pending_outcomes().await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "failed to load pending outcomes");
                return;
            }
        };

        for outcome in pending {
            let days_since_click =
                (now - outcome.clicked_at).num_seconds() as f64 / 86_400.0;

            if days_since_click >= 7.0 && outcome.active_7d.is_none() {
                let activity = self.activity.check_activity(&outcome.user_id).await;
                if let Err(e) = self
                    .store
                    .record_7d_activity(outcome.id, activity.active, activity.last_active_at)
                    .await
                {
                    warn!(outcome_id = %outcome.id, error = %e, "failed to record 7-day activity");
                }
            }

            if days_since_click >= 30.0 && outcome.active_30d.is_none() {
                let activity = self.activity.check_activity(&outcome.user_id).await;
                // Relapsed: came back inside the first week, gone again by
                // day 30. Uses the 7-day flag as of this pass's read.
                let relapsed = outcome.active_7d == Some(true) && !activity.active;
                if let Err(e) = self
                    .store
                    .record_30d_activity(outcome.id, activity.active, relapsed)
                    .await
                {
                    warn!(outcome_id = %outcome.id, error = %e, "failed to record 30-day activity");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::{HashMap, HashSet};
    use winback_core::config::DeliveryConfig;
    use winback_core::store::MemoryStore;
    use winback_core::types::{
        EngagementEvent, EventType, Recipient, ReengagementOutcome, SequenceRecord, SequenceStatus,
        UserActivity,
    };
    use winback_core::users::MemoryDirectory;
    use winback_provider::MemoryTransport;

    struct StubActivity {
        active: HashSet<String>,
    }

    #[async_trait]
    impl ActivityProbe for StubActivity {
        async fn check_activity(&self, user_id: &str) -> UserActivity {
            let active = self.active.contains(user_id);
            UserActivity {
                active,
                last_active_at: active.then(Utc::now),
            }
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        transport: Arc<MemoryTransport>,
        scheduler: SequenceScheduler,
    }

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient {
                email: format!("user{i}@test.com"),
                user_id: format!("u{i}"),
            })
            .collect()
    }

    fn harness_with_templates(
        users: Vec<Recipient>,
        active_users: HashSet<String>,
        templates: Arc<TemplateStore>,
    ) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MemoryTransport::new());
        let runner = Arc::new(CampaignRunner::new(
            store.clone(),
            Arc::new(MemoryDirectory::new(users)),
            transport.clone(),
            templates.clone(),
            DeliveryConfig {
                batch_size: 50,
                delay_ms: 0,
                site_url: "https://app.test".to_string(),
            },
            "unsub-secret",
        ));
        let scheduler = SequenceScheduler::new(
            store.clone(),
            templates,
            runner,
            Arc::new(StubActivity { active: active_users }),
        );
        Harness {
            store,
            transport,
            scheduler,
        }
    }

    fn harness(users: Vec<Recipient>) -> Harness {
        harness_with_templates(
            users,
            HashSet::new(),
            Arc::new(TemplateStore::new("announcement")),
        )
    }

    async fn insert_sequence(store: &MemoryStore) -> Uuid {
        let sequence = SequenceRecord {
            id: Uuid::new_v4(),
            name: "Winback".to_string(),
            status: SequenceStatus::Active,
            spacing_days: 7,
            created_at: Utc::now(),
        };
        let id = sequence.id;
        store.insert_sequence(sequence).await.unwrap();
        id
    }

    async fn insert_step(
        store: &MemoryStore,
        sequence_id: Uuid,
        step: u32,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Uuid {
        let mut campaign = CampaignRecord::draft(
            format!("Step {step}"),
            format!("<p>Body {step}</p>"),
            "announcement",
        );
        campaign.sequence_id = Some(sequence_id);
        campaign.sequence_step = Some(step);
        campaign.scheduled_at = scheduled_at;
        let id = campaign.id;
        store.insert_campaign(campaign).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_nothing_due_is_a_noop() {
        let h = harness(recipients(3));
        let report = h.scheduler.tick(Utc::now()).await.unwrap();
        assert_eq!(report.processed, 0);
        assert!(report.results.is_empty());
        assert_eq!(h.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_due_step_sends_and_completes_sequence() {
        let h = harness(recipients(5));
        let now = Utc::now();
        let sequence_id = insert_sequence(&h.store).await;
        let campaign_id =
            insert_step(&h.store, sequence_id, 1, Some(now - Duration::hours(1))).await;

        let report = h.scheduler.tick(now).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.results[0].campaign_id, campaign_id);
        assert_eq!(report.results[0].status, "completed");
        assert_eq!(report.results[0].sent, Some(5));
        assert_eq!(h.transport.sent_count(), 5);

        // Step 1 is also the highest step, so the sequence closes.
        let sequence = h.store.get_sequence(sequence_id).await.unwrap().unwrap();
        assert_eq!(sequence.status, SequenceStatus::Completed);

        // Derived tags carry the sequence linkage.
        let sent = h.transport.sent();
        assert!(sent[0].tags.contains(&format!("campaign-{campaign_id}")));
        assert!(sent[0].tags.contains(&format!("sequence-{sequence_id}")));
        assert!(sent[0].tags.contains(&"step-1".to_string()));
    }

    #[tokio::test]
    async fn test_sequence_stays_active_before_final_step() {
        let h = harness(recipients(2));
        let now = Utc::now();
        let sequence_id = insert_sequence(&h.store).await;
        insert_step(&h.store, sequence_id, 1, Some(now - Duration::hours(1))).await;
        insert_step(&h.store, sequence_id, 2, Some(now + Duration::days(7))).await;

        let report = h.scheduler.tick(now).await.unwrap();
        assert_eq!(report.processed, 1);

        let sequence = h.store.get_sequence(sequence_id).await.unwrap().unwrap();
        assert_eq!(sequence.status, SequenceStatus::Active);
    }

    #[tokio::test]
    async fn test_smart_suppression_excludes_earlier_clickers() {
        let h = harness(recipients(6));
        let now = Utc::now();
        let sequence_id = insert_sequence(&h.store).await;

        // Step 1 already ran; two recipients clicked it.
        let step1_id = insert_step(&h.store, sequence_id, 1, None).await;
        h.store
            .transition_status(step1_id, CampaignStatus::Draft, CampaignStatus::Sending)
            .await
            .unwrap();
        for email in ["user1@test.com", "User4@Test.com"] {
            h.store
                .insert_event(EngagementEvent {
                    id: Uuid::new_v4(),
                    campaign_id: Some(step1_id),
                    variant_id: None,
                    event_type: EventType::Clicked,
                    recipient: email.to_string(),
                    timestamp: now,
                    metadata: Default::default(),
                    is_bot: false,
                })
                .await
                .unwrap();
        }

        let step2_id = insert_step(&h.store, sequence_id, 2, Some(now - Duration::hours(1))).await;

        let report = h.scheduler.tick(now).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.results[0].campaign_id, step2_id);
        assert_eq!(report.results[0].sent, Some(4));

        let sent_to: Vec<String> = h.transport.sent().iter().map(|m| m.to.clone()).collect();
        assert!(!sent_to.contains(&"user1@test.com".to_string()));
        assert!(!sent_to.contains(&"user4@test.com".to_string()));

        let campaign = h.store.get_campaign(step2_id).await.unwrap().unwrap();
        assert_eq!(campaign.total_recipients, 4);
    }

    #[tokio::test]
    async fn test_missing_template_fails_that_campaign_only() {
        // A template map whose fallback is absent: "exists" resolves,
        // anything else is a hard failure.
        let mut map = HashMap::new();
        map.insert("exists".to_string(), "<html>{{body}}</html>".to_string());
        let templates = Arc::new(TemplateStore::from_map("absent-fallback", map));
        let h = harness_with_templates(recipients(3), HashSet::new(), templates);

        let now = Utc::now();
        let sequence_id = insert_sequence(&h.store).await;
        let broken_id =
            insert_step(&h.store, sequence_id, 1, Some(now - Duration::hours(2))).await;
        {
            let mut broken = h.store.get_campaign(broken_id).await.unwrap().unwrap();
            broken.template_name = "missing".to_string();
            h.store.insert_campaign(broken).await.unwrap();
        }
        let good_id = insert_step(&h.store, sequence_id, 2, Some(now - Duration::hours(1))).await;
        {
            let mut good = h.store.get_campaign(good_id).await.unwrap().unwrap();
            good.template_name = "exists".to_string();
            h.store.insert_campaign(good).await.unwrap();
        }

        let report = h.scheduler.tick(now).await.unwrap();
        assert_eq!(report.processed, 2);

        let by_id: HashMap<Uuid, &StepOutcome> =
            report.results.iter().map(|r| (r.campaign_id, r)).collect();
        assert_eq!(by_id[&broken_id].status, "failed");
        assert_eq!(by_id[&good_id].status, "completed");

        let broken = h.store.get_campaign(broken_id).await.unwrap().unwrap();
        assert_eq!(broken.status, CampaignStatus::Failed);
        let good = h.store.get_campaign(good_id).await.unwrap().unwrap();
        assert_eq!(good.status, CampaignStatus::Completed);
    }

    #[tokio::test]
    async fn test_reconcile_records_seven_day_activity() {
        let mut active = HashSet::new();
        active.insert("u-returned".to_string());
        let h = harness_with_templates(
            Vec::new(),
            active,
            Arc::new(TemplateStore::new("announcement")),
        );

        let now = Utc::now();
        let outcome_id = Uuid::new_v4();
        h.store
            .insert_outcome(ReengagementOutcome {
                id: outcome_id,
                campaign_id: Uuid::new_v4(),
                sequence_id: Uuid::new_v4(),
                variant_id: None,
                user_id: "u-returned".to_string(),
                email: "returned@test.com".to_string(),
                clicked_at: now - Duration::days(8),
                active_7d: None,
                active_30d: None,
                returned_at: None,
                relapsed: None,
            })
            .await
            .unwrap();

        h.scheduler.reconcile_outcomes(now).await;

        let pending = h.store.pending_outcomes().await.unwrap();
        let outcome = pending.iter().find(|o| o.id == outcome_id).unwrap();
        assert_eq!(outcome.active_7d, Some(true));
        assert!(outcome.returned_at.is_some());
        // 30-day window has not elapsed yet.
        assert_eq!(outcome.active_30d, None);
    }

    #[tokio::test]
    async fn test_reconcile_marks_relapse_at_thirty_days() {
        // Probe reports inactive for everyone.
        let h = harness(Vec::new());

        let now = Utc::now();
        let outcome_id = Uuid::new_v4();
        let sequence_id = Uuid::new_v4();
        h.store
            .insert_outcome(ReengagementOutcome {
                id: outcome_id,
                campaign_id: Uuid::new_v4(),
                sequence_id,
                variant_id: None,
                user_id: "u-gone".to_string(),
                email: "gone@test.com".to_string(),
                clicked_at: now - Duration::days(31),
                active_7d: Some(true),
                active_30d: None,
                returned_at: Some(now - Duration::days(25)),
                relapsed: None,
            })
            .await
            .unwrap();

        h.scheduler.reconcile_outcomes(now).await;

        let outcomes = h.store.outcomes_for_sequence(sequence_id).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].active_30d, Some(false));
        // Active at 7 days but gone by 30: a relapse.
        assert_eq!(outcomes[0].relapsed, Some(true));

        // Fully reconciled outcomes leave the pending set.
        let pending = h.store.pending_outcomes().await.unwrap();
        assert!(pending.iter().all(|o| o.id != outcome_id));
    }

    #[tokio::test]
    async fn test_fresh_click_not_reconciled_early() {
        let h = harness(Vec::new());
        let now = Utc::now();
        let outcome_id = Uuid::new_v4();
        h.store
            .insert_outcome(ReengagementOutcome {
                id: outcome_id,
                campaign_id: Uuid::new_v4(),
                sequence_id: Uuid::new_v4(),
                variant_id: None,
                user_id: "u-new".to_string(),
                email: "new@test.com".to_string(),
                clicked_at: now - Duration::days(2),
                active_7d: None,
                active_30d: None,
                returned_at: None,
                relapsed: None,
            })
            .await
            .unwrap();

        h.scheduler.reconcile_outcomes(now).await;

        let pending = h.store.pending_outcomes().await.unwrap();
        let outcome = pending.iter().find(|o| o.id == outcome_id).unwrap();
        assert_eq!(outcome.active_7d, None);
        assert_eq!(outcome.active_30d, None);
    }
}
