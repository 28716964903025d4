//! Mailgun transport: form-encoded message API plus the per-domain
//! suppression collections (unsubscribes, bounces, complaints).

use crate::transport::{EmailTransport, OutboundEmail, SendOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info};
use winback_core::error::{EngineError, EngineResult};
use winback_core::types::{SuppressionEntry, SuppressionKind};

const API_BASE: &str = "https://api.mailgun.net/v3";

pub struct MailgunTransport {
    client: reqwest::Client,
    api_key: String,
    domain: String,
    from_name: String,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
    message: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Deserialize)]
struct SuppressionPage {
    #[serde(default)]
    items: Vec<SuppressionItem>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Deserialize)]
struct SuppressionItem {
    address: String,
    created_at: String,
    code: Option<String>,
    error: Option<String>,
    tags: Option<Vec<String>>,
}

impl MailgunTransport {
    pub fn new(api_key: impl Into<String>, domain: impl Into<String>, from_name: impl Into<String>) -> Self {
        let domain = domain.into();
        info!(domain = %domain, "Mailgun transport initialized");
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            domain,
            from_name: from_name.into(),
        }
    }

    fn domain_url(&self) -> String {
        format!("{API_BASE}/{}", self.domain)
    }
}

#[async_trait]
impl EmailTransport for MailgunTransport {
    async fn send(&self, message: &OutboundEmail) -> SendOutcome {
        let from = format!("{} <campaigns@{}>", self.from_name, self.domain);

        let mut form: Vec<(String, String)> = vec![
            ("from".into(), from),
            ("to".into(), message.to.clone()),
            ("subject".into(), message.subject.clone()),
            ("html".into(), message.html.clone()),
        ];
        if let Some(text) = &message.text {
            form.push(("text".into(), text.clone()));
        }

        // Standard headers
        form.push(("h:Reply-To".into(), format!("support@{}", self.domain)));
        form.push(("h:X-Mailer".into(), "Winback".into()));

        // Custom headers (e.g., List-Unsubscribe)
        for (key, value) in &message.headers {
            form.push((format!("h:{key}"), value.clone()));
        }

        for tag in &message.tags {
            form.push(("o:tag".into(), tag.clone()));
        }

        // Tracking
        form.push(("o:tracking".into(), "yes".into()));
        form.push(("o:tracking-clicks".into(), "yes".into()));
        form.push(("o:tracking-opens".into(), "yes".into()));

        let result = self
            .client
            .post(format!("{}/messages", self.domain_url()))
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, to = %message.to, "Mailgun request error");
                return SendOutcome::Rejected { message: e.to_string() };
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message_text = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            error!(status = %status, to = %message.to, error = %message_text, "Mailgun send failed");
            return SendOutcome::Rejected { message: message_text };
        }

        match response.json::<SendResponse>().await {
            Ok(data) => {
                debug!(to = %message.to, id = %data.id, "Mailgun accepted message");
                SendOutcome::Accepted { id: data.id, message: data.message }
            }
            Err(e) => SendOutcome::Rejected { message: e.to_string() },
        }
    }

    async fn suppressions(&self) -> EngineResult<Vec<SuppressionEntry>> {
        let mut all = Vec::new();
        for kind in SuppressionKind::ALL {
            let mut url = Some(format!(
                "{}/{}?limit=1000",
                self.domain_url(),
                kind.collection()
            ));
            while let Some(page_url) = url.take() {
                let response = self
                    .client
                    .get(&page_url)
                    .basic_auth("api", Some(&self.api_key))
                    .send()
                    .await?;
                if !response.status().is_success() {
                    break;
                }
                let page: SuppressionPage = response.json().await?;
                let count = page.items.len();
                for item in page.items {
                    all.push(SuppressionEntry {
                        address: item.address,
                        kind,
                        created_at: item.created_at,
                        code: item.code,
                        error: item.error,
                        tags: item.tags,
                    });
                }
                // Mailgun's paging cursor loops forever on an empty page.
                if count > 0 {
                    url = page.paging.and_then(|p| p.next);
                }
            }
        }
        Ok(all)
    }

    async fn add_suppression(&self, address: &str, tag: Option<&str>) -> EngineResult<bool> {
        let mut form: Vec<(String, String)> = vec![("address".into(), address.into())];
        if let Some(tag) = tag {
            form.push(("tag".into(), tag.into()));
        }
        let response = self
            .client
            .post(format!("{}/unsubscribes", self.domain_url()))
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn remove_suppression(&self, address: &str) -> EngineResult<bool> {
        let mut url = url::Url::parse(&format!("{}/unsubscribes", self.domain_url()))
            .map_err(|e| EngineError::Suppression(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| EngineError::Suppression("invalid suppression url".into()))?
            .push(address);
        let response = self
            .client
            .delete(url)
            .basic_auth("api", Some(&self.api_key))
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}
