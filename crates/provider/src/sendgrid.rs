//! SendGrid transport: JSON mail API plus the global-unsubscribe, bounce,
//! and spam-report suppression collections.

use crate::transport::{EmailTransport, OutboundEmail, SendOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};
use winback_core::error::{EngineError, EngineResult};
use winback_core::types::{SuppressionEntry, SuppressionKind};

const API_BASE: &str = "https://api.sendgrid.com/v3";
const PAGE_LIMIT: usize = 1000;

pub struct SendGridTransport {
    client: reqwest::Client,
    api_key: String,
    domain: String,
    from_name: String,
}

#[derive(Deserialize)]
struct SuppressedRecipient {
    email: String,
    /// Epoch seconds.
    created: i64,
    reason: Option<String>,
    status: Option<String>,
}

impl SendGridTransport {
    pub fn new(api_key: impl Into<String>, domain: impl Into<String>, from_name: impl Into<String>) -> Self {
        let domain = domain.into();
        info!(domain = %domain, "SendGrid transport initialized");
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            domain,
            from_name: from_name.into(),
        }
    }

    fn collection_path(kind: SuppressionKind) -> &'static str {
        match kind {
            SuppressionKind::Unsubscribe => "suppression/unsubscribes",
            SuppressionKind::Bounce => "suppression/bounces",
            SuppressionKind::Complaint => "suppression/spam_reports",
        }
    }
}

#[async_trait]
impl EmailTransport for SendGridTransport {
    async fn send(&self, message: &OutboundEmail) -> SendOutcome {
        // text/plain must precede text/html in the content array.
        let mut content = Vec::new();
        if let Some(text) = &message.text {
            content.push(json!({"type": "text/plain", "value": text}));
        }
        content.push(json!({"type": "text/html", "value": message.html}));

        let payload = json!({
            "personalizations": [{
                "to": [{"email": message.to}],
            }],
            "from": {
                "email": format!("campaigns@{}", self.domain),
                "name": self.from_name,
            },
            "subject": message.subject,
            "content": content,
            "headers": message.headers,
            "categories": message.tags,
            "tracking_settings": {
                "click_tracking": {"enable": true},
                "open_tracking": {"enable": true}
            }
        });

        let result = self
            .client
            .post(format!("{API_BASE}/mail/send"))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, to = %message.to, "SendGrid request error");
                return SendOutcome::Rejected { message: e.to_string() };
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, to = %message.to, error = %body, "SendGrid send failed");
            return SendOutcome::Rejected { message: body };
        }

        let id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        debug!(to = %message.to, id = %id, "SendGrid accepted message");
        SendOutcome::Accepted { id, message: "Queued".to_string() }
    }

    async fn suppressions(&self) -> EngineResult<Vec<SuppressionEntry>> {
        let mut all = Vec::new();
        for kind in SuppressionKind::ALL {
            let path = Self::collection_path(kind);
            let mut offset = 0usize;
            loop {
                let response = self
                    .client
                    .get(format!("{API_BASE}/{path}?limit={PAGE_LIMIT}&offset={offset}"))
                    .bearer_auth(&self.api_key)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    break;
                }
                let items: Vec<SuppressedRecipient> = response.json().await?;
                let count = items.len();
                for item in items {
                    all.push(SuppressionEntry {
                        address: item.email,
                        kind,
                        created_at: chrono::DateTime::from_timestamp(item.created, 0)
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_default(),
                        code: item.status,
                        error: item.reason,
                        tags: None,
                    });
                }
                if count < PAGE_LIMIT {
                    break;
                }
                offset += PAGE_LIMIT;
            }
        }
        Ok(all)
    }

    async fn add_suppression(&self, address: &str, _tag: Option<&str>) -> EngineResult<bool> {
        let response = self
            .client
            .post(format!("{API_BASE}/asm/suppressions/global"))
            .bearer_auth(&self.api_key)
            .json(&json!({"recipient_emails": [address]}))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn remove_suppression(&self, address: &str) -> EngineResult<bool> {
        let mut url = url::Url::parse(&format!("{API_BASE}/asm/suppressions/global"))
            .map_err(|e| EngineError::Suppression(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| EngineError::Suppression("invalid suppression url".into()))?
            .push(address);
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}
