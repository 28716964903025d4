//! Shared domain types for campaigns, variants, sequences, engagement events,
//! and re-engagement outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Recipients ─────────────────────────────────────────────────────────

/// One deliverable address, derived per run from the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub user_id: String,
}

// ─── Campaigns ──────────────────────────────────────────────────────────

/// Campaign lifecycle: `Draft -> Sending -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Sending,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }
}

/// A persisted campaign row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub id: Uuid,
    pub subject: String,
    pub body_html: String,
    /// Tag-stripped first 200 characters of the body, for list views.
    pub body_preview: String,
    pub template_name: String,
    pub preheader: Option<String>,
    pub status: CampaignStatus,
    pub sequence_id: Option<Uuid>,
    pub sequence_step: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub total_recipients: usize,
    pub total_sent: usize,
    pub total_failed: usize,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CampaignRecord {
    /// New draft campaign with zeroed counters.
    pub fn draft(subject: impl Into<String>, body_html: impl Into<String>, template_name: impl Into<String>) -> Self {
        let body_html = body_html.into();
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            body_preview: body_preview(&body_html),
            body_html,
            template_name: template_name.into(),
            preheader: None,
            status: CampaignStatus::Draft,
            sequence_id: None,
            sequence_step: None,
            scheduled_at: None,
            total_recipients: 0,
            total_sent: 0,
            total_failed: 0,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Strip markup and truncate to 200 characters for list previews.
pub fn body_preview(body_html: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for ch in body_html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.chars().take(200).collect()
}

// ─── A/B variants ───────────────────────────────────────────────────────

/// One arm of a split-test campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    /// "A" or "B".
    pub variant_label: String,
    pub subject: String,
    pub body_html: String,
    /// Optional template override; falls back to the campaign template.
    pub template_name: Option<String>,
    /// Percentage of recipients routed to this variant (only variant A's
    /// value is consulted when splitting).
    pub split_percentage: f64,
    pub total_recipients: usize,
    pub total_sent: usize,
    pub total_failed: usize,
}

// ─── Sequences ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Active,
    Completed,
}

/// An ordered set of campaigns sent with time spacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub id: Uuid,
    pub name: String,
    pub status: SequenceStatus,
    pub spacing_days: u32,
    pub created_at: DateTime<Utc>,
}

// ─── Suppressions ───────────────────────────────────────────────────────

/// Why an address must not receive mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionKind {
    Unsubscribe,
    Bounce,
    Complaint,
}

impl SuppressionKind {
    pub const ALL: [SuppressionKind; 3] = [
        SuppressionKind::Unsubscribe,
        SuppressionKind::Bounce,
        SuppressionKind::Complaint,
    ];

    /// Provider collection name ("unsubscribes", "bounces", "complaints").
    pub fn collection(&self) -> &'static str {
        match self {
            SuppressionKind::Unsubscribe => "unsubscribes",
            SuppressionKind::Bounce => "bounces",
            SuppressionKind::Complaint => "complaints",
        }
    }
}

/// One suppression record as reported by the delivery provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub address: String,
    pub kind: SuppressionKind,
    pub created_at: String,
    pub code: Option<String>,
    pub error: Option<String>,
    pub tags: Option<Vec<String>>,
}

// ─── Engagement events ──────────────────────────────────────────────────

/// Normalized engagement event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Delivered,
    Opened,
    Clicked,
    Unsubscribed,
    Complained,
    Bounced,
}

impl EventType {
    /// Map a provider event name to a classification. The provider reports
    /// hard failures as `failed`, which we fold into `bounced`.
    pub fn from_provider(name: &str) -> Option<Self> {
        match name {
            "delivered" => Some(EventType::Delivered),
            "opened" => Some(EventType::Opened),
            "clicked" => Some(EventType::Clicked),
            "unsubscribed" => Some(EventType::Unsubscribed),
            "complained" => Some(EventType::Complained),
            "bounced" | "failed" => Some(EventType::Bounced),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Delivered => "delivered",
            EventType::Opened => "opened",
            EventType::Clicked => "clicked",
            EventType::Unsubscribed => "unsubscribed",
            EventType::Complained => "complained",
            EventType::Bounced => "bounced",
        }
    }
}

/// Raw callback context carried alongside an event row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    pub url: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub tags: Vec<String>,
}

/// One engagement event row, append-only, one per provider callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub event_type: EventType,
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: EventMetadata,
    pub is_bot: bool,
}

/// Per-campaign engagement rollup: counts by event type, overall and per
/// variant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventRollup {
    pub counts: std::collections::HashMap<String, usize>,
    pub variant_counts: std::collections::HashMap<Uuid, std::collections::HashMap<String, usize>>,
}

// ─── Re-engagement outcomes ─────────────────────────────────────────────

/// Tracks whether a recipient who clicked a winback email returned to
/// active use within 7/30 days. At most one per (email, sequence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReengagementOutcome {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub sequence_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub user_id: String,
    pub email: String,
    pub clicked_at: DateTime<Utc>,
    pub active_7d: Option<bool>,
    pub active_30d: Option<bool>,
    pub returned_at: Option<DateTime<Utc>>,
    pub relapsed: Option<bool>,
}

/// Product activity probe result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserActivity {
    pub active: bool,
    pub last_active_at: Option<DateTime<Utc>>,
}
