//! Sequence authoring: create a re-engagement sequence and its step
//! campaigns, spaced a fixed number of days apart.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use winback_core::error::EngineResult;
use winback_core::store::CampaignStore;
use winback_core::types::{body_preview, CampaignRecord, CampaignStatus, SequenceRecord, SequenceStatus};

/// Authoring input for one step of a sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct StepDraft {
    pub subject: String,
    pub body_html: String,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub preheader: Option<String>,
}

/// Create an active sequence plus one draft campaign per step, scheduled at
/// `start + (step - 1) * spacing_days`.
pub async fn create_sequence(
    store: &Arc<dyn CampaignStore>,
    name: impl Into<String>,
    spacing_days: u32,
    start: DateTime<Utc>,
    steps: Vec<StepDraft>,
    default_template: &str,
) -> EngineResult<SequenceRecord> {
    let sequence = SequenceRecord {
        id: Uuid::new_v4(),
        name: name.into(),
        status: SequenceStatus::Active,
        spacing_days,
        created_at: Utc::now(),
    };
    store.insert_sequence(sequence.clone()).await?;

    let step_count = steps.len();
    for (index, draft) in steps.into_iter().enumerate() {
        let step = index as u32 + 1;
        let campaign = CampaignRecord {
            id: Uuid::new_v4(),
            subject: draft.subject,
            body_preview: body_preview(&draft.body_html),
            body_html: draft.body_html,
            template_name: draft
                .template_name
                .unwrap_or_else(|| default_template.to_string()),
            preheader: draft.preheader,
            status: CampaignStatus::Draft,
            sequence_id: Some(sequence.id),
            sequence_step: Some(step),
            scheduled_at: Some(start + Duration::days(i64::from(spacing_days) * i64::from(step - 1))),
            total_recipients: 0,
            total_sent: 0,
            total_failed: 0,
            completed_at: None,
            created_at: Utc::now(),
        };
        store.insert_campaign(campaign).await?;
    }

    info!(
        sequence_id = %sequence.id,
        steps = step_count,
        spacing_days,
        "re-engagement sequence created"
    );
    Ok(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use winback_core::store::MemoryStore;

    fn drafts(n: usize) -> Vec<StepDraft> {
        (1..=n)
            .map(|i| StepDraft {
                subject: format!("Step {i}"),
                body_html: format!("<p>Body {i}</p>"),
                template_name: None,
                preheader: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_steps_scheduled_with_spacing() {
        let store: Arc<dyn CampaignStore> = Arc::new(MemoryStore::new());
        let start = Utc::now();

        let sequence = create_sequence(&store, "Winback", 7, start, drafts(3), "announcement")
            .await
            .unwrap();

        assert_eq!(store.max_sequence_step(sequence.id).await.unwrap(), Some(3));

        // Step 3 is scheduled 14 days after the start; nothing is due yet
        // besides step 1.
        let due_now = store.due_sequence_campaigns(start).await.unwrap();
        assert_eq!(due_now.len(), 1);
        assert_eq!(due_now[0].sequence_step, Some(1));

        let due_later = store
            .due_sequence_campaigns(start + Duration::days(14))
            .await
            .unwrap();
        assert_eq!(due_later.len(), 3);
    }
}
