//! Persistence abstraction for campaigns, variants, sequences, events, and
//! re-engagement outcomes.
//!
//! Components receive an explicitly constructed `Arc<dyn CampaignStore>`;
//! lifecycle is owned by the process entry point. `MemoryStore` is the
//! DashMap-backed implementation used for development and testing.
//! Production: replace with PostgreSQL (sqlx) or similar ACID store.

use crate::error::{EngineError, EngineResult};
use crate::types::{
    CampaignRecord, CampaignStatus, EngagementEvent, EventRollup, EventType, ReengagementOutcome,
    SequenceRecord, SequenceStatus, VariantRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

#[async_trait]
pub trait CampaignStore: Send + Sync {
    // ─── Campaigns ──────────────────────────────────────────────────────

    async fn insert_campaign(&self, campaign: CampaignRecord) -> EngineResult<()>;

    async fn get_campaign(&self, id: Uuid) -> EngineResult<Option<CampaignRecord>>;

    /// Conditional status transition: move `id` from `from` to `to` as a
    /// single atomic write. Returns `false` when the campaign is absent or
    /// no longer in `from` (a concurrent trigger won the race).
    async fn transition_status(
        &self,
        id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> EngineResult<bool>;

    /// Snapshot the effective recipient count at the start of a run.
    async fn set_total_recipients(&self, id: Uuid, total: usize) -> EngineResult<()>;

    /// Per-batch cumulative counters.
    async fn update_progress(&self, id: Uuid, sent: usize, failed: usize) -> EngineResult<()>;

    /// Terminal write: final status, counters, and completion timestamp.
    async fn finalize_campaign(
        &self,
        id: Uuid,
        status: CampaignStatus,
        sent: usize,
        failed: usize,
        completed_at: DateTime<Utc>,
    ) -> EngineResult<()>;

    /// Unconditionally mark a campaign failed (resolution errors).
    async fn mark_failed(&self, id: Uuid) -> EngineResult<()>;

    // ─── Variants ───────────────────────────────────────────────────────

    async fn insert_variant(&self, variant: VariantRecord) -> EngineResult<()>;

    /// Variants of a campaign, ordered by label.
    async fn variants(&self, campaign_id: Uuid) -> EngineResult<Vec<VariantRecord>>;

    async fn variant_id(&self, campaign_id: Uuid, label: &str) -> EngineResult<Option<Uuid>>;

    async fn update_variant_stats(
        &self,
        variant_id: Uuid,
        recipients: usize,
        sent: usize,
        failed: usize,
    ) -> EngineResult<()>;

    // ─── Sequences ──────────────────────────────────────────────────────

    async fn insert_sequence(&self, sequence: SequenceRecord) -> EngineResult<()>;

    async fn get_sequence(&self, id: Uuid) -> EngineResult<Option<SequenceRecord>>;

    async fn complete_sequence(&self, id: Uuid) -> EngineResult<()>;

    /// Sequence-linked draft campaigns whose scheduled time has passed,
    /// ordered by schedule time.
    async fn due_sequence_campaigns(&self, now: DateTime<Utc>) -> EngineResult<Vec<CampaignRecord>>;

    /// Campaign ids of steps earlier than `step` in the same sequence.
    async fn sequence_campaigns_before_step(
        &self,
        sequence_id: Uuid,
        step: u32,
    ) -> EngineResult<Vec<Uuid>>;

    /// Highest step number recorded for a sequence.
    async fn max_sequence_step(&self, sequence_id: Uuid) -> EngineResult<Option<u32>>;

    // ─── Engagement events ──────────────────────────────────────────────

    async fn insert_event(&self, event: EngagementEvent) -> EngineResult<()>;

    /// Lowercased addresses of recipients with a Clicked event on any of
    /// the given campaigns.
    async fn clicked_recipients(&self, campaign_ids: &[Uuid]) -> EngineResult<HashSet<String>>;

    async fn event_rollup(&self, campaign_id: Uuid) -> EngineResult<EventRollup>;

    // ─── Re-engagement outcomes ─────────────────────────────────────────

    async fn outcome_exists(&self, email: &str, sequence_id: Uuid) -> EngineResult<bool>;

    async fn insert_outcome(&self, outcome: ReengagementOutcome) -> EngineResult<()>;

    /// Outcomes with a recorded click and an unset 7-day or 30-day flag.
    async fn pending_outcomes(&self) -> EngineResult<Vec<ReengagementOutcome>>;

    /// Every outcome recorded for a sequence, for cohort analysis.
    async fn outcomes_for_sequence(&self, sequence_id: Uuid) -> EngineResult<Vec<ReengagementOutcome>>;

    async fn record_7d_activity(
        &self,
        id: Uuid,
        active: bool,
        returned_at: Option<DateTime<Utc>>,
    ) -> EngineResult<()>;

    async fn record_30d_activity(&self, id: Uuid, active: bool, relapsed: bool) -> EngineResult<()>;
}

/// Thread-safe in-memory store backed by `DashMap`.
pub struct MemoryStore {
    campaigns: DashMap<Uuid, CampaignRecord>,
    variants: DashMap<Uuid, VariantRecord>,
    sequences: DashMap<Uuid, SequenceRecord>,
    events: DashMap<Uuid, EngagementEvent>,
    outcomes: DashMap<Uuid, ReengagementOutcome>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("campaign store initialized (in-memory, development mode)");
        Self {
            campaigns: DashMap::new(),
            variants: DashMap::new(),
            sequences: DashMap::new(),
            events: DashMap::new(),
            outcomes: DashMap::new(),
        }
    }

    fn campaign_mut<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut CampaignRecord) -> R,
    ) -> EngineResult<R> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("campaign {id}")))?;
        Ok(f(entry.value_mut()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn insert_campaign(&self, campaign: CampaignRecord) -> EngineResult<()> {
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> EngineResult<Option<CampaignRecord>> {
        Ok(self.campaigns.get(&id).map(|r| r.clone()))
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> EngineResult<bool> {
        // The entry lock makes check-and-set atomic.
        let Some(mut entry) = self.campaigns.get_mut(&id) else {
            return Ok(false);
        };
        if entry.status != from {
            return Ok(false);
        }
        entry.status = to;
        Ok(true)
    }

    async fn set_total_recipients(&self, id: Uuid, total: usize) -> EngineResult<()> {
        self.campaign_mut(id, |c| c.total_recipients = total)
    }

    async fn update_progress(&self, id: Uuid, sent: usize, failed: usize) -> EngineResult<()> {
        self.campaign_mut(id, |c| {
            c.total_sent = sent;
            c.total_failed = failed;
        })
    }

    async fn finalize_campaign(
        &self,
        id: Uuid,
        status: CampaignStatus,
        sent: usize,
        failed: usize,
        completed_at: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.campaign_mut(id, |c| {
            c.status = status;
            c.total_sent = sent;
            c.total_failed = failed;
            c.completed_at = Some(completed_at);
        })
    }

    async fn mark_failed(&self, id: Uuid) -> EngineResult<()> {
        self.campaign_mut(id, |c| c.status = CampaignStatus::Failed)
    }

    async fn insert_variant(&self, variant: VariantRecord) -> EngineResult<()> {
        self.variants.insert(variant.id, variant);
        Ok(())
    }

    async fn variants(&self, campaign_id: Uuid) -> EngineResult<Vec<VariantRecord>> {
        let mut out: Vec<VariantRecord> = self
            .variants
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .map(|r| r.clone())
            .collect();
        out.sort_by(|a, b| a.variant_label.cmp(&b.variant_label));
        Ok(out)
    }

    async fn variant_id(&self, campaign_id: Uuid, label: &str) -> EngineResult<Option<Uuid>> {
        Ok(self
            .variants
            .iter()
            .find(|r| r.campaign_id == campaign_id && r.variant_label == label)
            .map(|r| r.id))
    }

    async fn update_variant_stats(
        &self,
        variant_id: Uuid,
        recipients: usize,
        sent: usize,
        failed: usize,
    ) -> EngineResult<()> {
        let mut entry = self
            .variants
            .get_mut(&variant_id)
            .ok_or_else(|| EngineError::NotFound(format!("variant {variant_id}")))?;
        entry.total_recipients = recipients;
        entry.total_sent = sent;
        entry.total_failed = failed;
        Ok(())
    }

    async fn insert_sequence(&self, sequence: SequenceRecord) -> EngineResult<()> {
        self.sequences.insert(sequence.id, sequence);
        Ok(())
    }

    async fn get_sequence(&self, id: Uuid) -> EngineResult<Option<SequenceRecord>> {
        Ok(self.sequences.get(&id).map(|r| r.clone()))
    }

    async fn complete_sequence(&self, id: Uuid) -> EngineResult<()> {
        let mut entry = self
            .sequences
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("sequence {id}")))?;
        entry.status = SequenceStatus::Completed;
        Ok(())
    }

    async fn due_sequence_campaigns(&self, now: DateTime<Utc>) -> EngineResult<Vec<CampaignRecord>> {
        let mut due: Vec<CampaignRecord> = self
            .campaigns
            .iter()
            .filter(|r| {
                r.sequence_id.is_some()
                    && r.status == CampaignStatus::Draft
                    && r.scheduled_at.is_some_and(|at| at <= now)
            })
            .map(|r| r.clone())
            .collect();
        due.sort_by_key(|c| c.scheduled_at);
        Ok(due)
    }

    async fn sequence_campaigns_before_step(
        &self,
        sequence_id: Uuid,
        step: u32,
    ) -> EngineResult<Vec<Uuid>> {
        Ok(self
            .campaigns
            .iter()
            .filter(|r| {
                r.sequence_id == Some(sequence_id) && r.sequence_step.is_some_and(|s| s < step)
            })
            .map(|r| r.id)
            .collect())
    }

    async fn max_sequence_step(&self, sequence_id: Uuid) -> EngineResult<Option<u32>> {
        Ok(self
            .campaigns
            .iter()
            .filter(|r| r.sequence_id == Some(sequence_id))
            .filter_map(|r| r.sequence_step)
            .max())
    }

    async fn insert_event(&self, event: EngagementEvent) -> EngineResult<()> {
        self.events.insert(event.id, event);
        Ok(())
    }

    async fn clicked_recipients(&self, campaign_ids: &[Uuid]) -> EngineResult<HashSet<String>> {
        Ok(self
            .events
            .iter()
            .filter(|e| {
                e.event_type == EventType::Clicked
                    && e.campaign_id.is_some_and(|id| campaign_ids.contains(&id))
            })
            .map(|e| e.recipient.to_lowercase())
            .collect())
    }

    async fn event_rollup(&self, campaign_id: Uuid) -> EngineResult<EventRollup> {
        let mut rollup = EventRollup::default();
        for event in self.events.iter() {
            if event.campaign_id != Some(campaign_id) {
                continue;
            }
            let key = event.event_type.as_str().to_string();
            *rollup.counts.entry(key.clone()).or_insert(0) += 1;
            if let Some(variant_id) = event.variant_id {
                *rollup
                    .variant_counts
                    .entry(variant_id)
                    .or_default()
                    .entry(key)
                    .or_insert(0) += 1;
            }
        }
        Ok(rollup)
    }

    async fn outcome_exists(&self, email: &str, sequence_id: Uuid) -> EngineResult<bool> {
        Ok(self
            .outcomes
            .iter()
            .any(|o| o.sequence_id == sequence_id && o.email.eq_ignore_ascii_case(email)))
    }

    async fn insert_outcome(&self, outcome: ReengagementOutcome) -> EngineResult<()> {
        self.outcomes.insert(outcome.id, outcome);
        Ok(())
    }

    async fn pending_outcomes(&self) -> EngineResult<Vec<ReengagementOutcome>> {
        Ok(self
            .outcomes
            .iter()
            .filter(|o| o.active_7d.is_none() || o.active_30d.is_none())
            .map(|o| o.clone())
            .collect())
    }

    async fn outcomes_for_sequence(
        &self,
        sequence_id: Uuid,
    ) -> EngineResult<Vec<ReengagementOutcome>> {
        let mut out: Vec<ReengagementOutcome> = self
            .outcomes
            .iter()
            .filter(|o| o.sequence_id == sequence_id)
            .map(|o| o.clone())
            .collect();
        out.sort_by_key(|o| o.clicked_at);
        Ok(out)
    }

    async fn record_7d_activity(
        &self,
        id: Uuid,
        active: bool,
        returned_at: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let mut entry = self
            .outcomes
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("outcome {id}")))?;
        entry.active_7d = Some(active);
        entry.returned_at = returned_at;
        Ok(())
    }

    async fn record_30d_activity(&self, id: Uuid, active: bool, relapsed: bool) -> EngineResult<()> {
        let mut entry = self
            .outcomes
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("outcome {id}")))?;
        entry.active_30d = Some(active);
        entry.relapsed = Some(relapsed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft_campaign() -> CampaignRecord {
        CampaignRecord::draft("Subject", "<p>Body</p>", "announcement")
    }

    #[tokio::test]
    async fn test_conditional_transition_guards_state() {
        let store = MemoryStore::new();
        let campaign = draft_campaign();
        let id = campaign.id;
        store.insert_campaign(campaign).await.unwrap();

        // Draft -> Sending succeeds exactly once.
        assert!(store
            .transition_status(id, CampaignStatus::Draft, CampaignStatus::Sending)
            .await
            .unwrap());
        assert!(!store
            .transition_status(id, CampaignStatus::Draft, CampaignStatus::Sending)
            .await
            .unwrap());

        let stored = store.get_campaign(id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Sending);
    }

    #[tokio::test]
    async fn test_transition_on_missing_campaign_is_false() {
        let store = MemoryStore::new();
        assert!(!store
            .transition_status(Uuid::new_v4(), CampaignStatus::Draft, CampaignStatus::Sending)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_due_sequence_campaigns_ordering_and_filter() {
        let store = MemoryStore::new();
        let sequence_id = Uuid::new_v4();
        let now = Utc::now();

        let mut late = draft_campaign();
        late.sequence_id = Some(sequence_id);
        late.sequence_step = Some(2);
        late.scheduled_at = Some(now - chrono::Duration::hours(1));

        let mut early = draft_campaign();
        early.sequence_id = Some(sequence_id);
        early.sequence_step = Some(1);
        early.scheduled_at = Some(now - chrono::Duration::hours(2));

        let mut future = draft_campaign();
        future.sequence_id = Some(sequence_id);
        future.sequence_step = Some(3);
        future.scheduled_at = Some(now + chrono::Duration::hours(1));

        // Not sequence-linked: never due.
        let mut standalone = draft_campaign();
        standalone.scheduled_at = Some(now - chrono::Duration::hours(1));

        let early_id = early.id;
        for c in [late, early, future, standalone] {
            store.insert_campaign(c).await.unwrap();
        }

        let due = store.due_sequence_campaigns(now).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, early_id);
    }

    #[tokio::test]
    async fn test_clicked_recipients_lowercases() {
        let store = MemoryStore::new();
        let campaign_id = Uuid::new_v4();
        store
            .insert_event(EngagementEvent {
                id: Uuid::new_v4(),
                campaign_id: Some(campaign_id),
                variant_id: None,
                event_type: EventType::Clicked,
                recipient: "User@Example.com".to_string(),
                timestamp: Utc::now(),
                metadata: Default::default(),
                is_bot: false,
            })
            .await
            .unwrap();
        store
            .insert_event(EngagementEvent {
                id: Uuid::new_v4(),
                campaign_id: Some(campaign_id),
                variant_id: None,
                event_type: EventType::Opened,
                recipient: "other@example.com".to_string(),
                timestamp: Utc::now(),
                metadata: Default::default(),
                is_bot: false,
            })
            .await
            .unwrap();

        let clicked = store.clicked_recipients(&[campaign_id]).await.unwrap();
        assert_eq!(clicked.len(), 1);
        assert!(clicked.contains("user@example.com"));
    }

    #[tokio::test]
    async fn test_outcome_existence_is_case_insensitive() {
        let store = MemoryStore::new();
        let sequence_id = Uuid::new_v4();
        store
            .insert_outcome(ReengagementOutcome {
                id: Uuid::new_v4(),
                campaign_id: Uuid::new_v4(),
                sequence_id,
                variant_id: None,
                user_id: "u1".to_string(),
                email: "clicker@example.com".to_string(),
                clicked_at: Utc::now(),
                active_7d: None,
                active_30d: None,
                returned_at: None,
                relapsed: None,
            })
            .await
            .unwrap();

        assert!(store.outcome_exists("Clicker@Example.com", sequence_id).await.unwrap());
        assert!(!store.outcome_exists("clicker@example.com", Uuid::new_v4()).await.unwrap());
    }
}
