//! Campaign delivery engine: batching, A/B splits, unsubscribe tokens,
//! batched dispatch with pacing, and campaign run orchestration.

pub mod batch;
pub mod dispatcher;
pub mod runner;
pub mod tokens;

pub use dispatcher::{CampaignConfig, ProgressSink, SendProgress};
pub use runner::{CampaignRunner, RunSummary};
pub use tokens::{create_unsubscribe_token, verify_unsubscribe_token, TokenPayload};
