//! HTTP client for the product activity API, used when reconciling
//! re-engagement outcomes.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use winback_core::types::UserActivity;
use winback_core::users::ActivityProbe;

pub struct ActivityClient {
    client: reqwest::Client,
    api_url: Option<String>,
}

#[derive(Deserialize)]
struct ActivityResponse {
    #[serde(default)]
    active: bool,
    #[serde(rename = "lastActiveAt")]
    last_active_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ActivityClient {
    /// Probe reports inactive for every user when `api_url` is unset.
    pub fn new(api_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }
}

#[async_trait]
impl ActivityProbe for ActivityClient {
    async fn check_activity(&self, user_id: &str) -> UserActivity {
        let Some(api_url) = &self.api_url else {
            return UserActivity::default();
        };

        let result = self
            .client
            .get(format!("{api_url}/v3/user/{user_id}/activity"))
            .header("Content-Type", "application/json")
            .send()
            .await;

        let response = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(user_id, status = %r.status(), "activity probe rejected");
                return UserActivity::default();
            }
            Err(e) => {
                debug!(user_id, error = %e, "activity probe failed");
                return UserActivity::default();
            }
        };

        match response.json::<ActivityResponse>().await {
            Ok(data) => UserActivity {
                active: data.active,
                last_active_at: data.last_active_at,
            },
            Err(_) => UserActivity::default(),
        }
    }
}
