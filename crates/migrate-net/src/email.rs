//! Email Notifier (C13, supplemented from the original worker's
//! `email_notify.py`): a thin Resend API client gated by an optional key.
//!
//! Per §9's redesign note, this is an explicit optional collaborator —
//! absent when `RESEND_API_KEY` isn't configured, not silently swallowed at
//! every call site.

use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(15);
const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Serialize)]
struct ResendRequest {
    from: String,
    to: Vec<String>,
    subject: String,
    html: String,
}

pub struct EmailNotifier {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl EmailNotifier {
    /// Returns `None` when no API key is configured — callers hold an
    /// `Option<EmailNotifier>` and skip notification entirely rather than
    /// attempting and swallowing an error on every send.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Option<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return None;
        }
        Some(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.into(),
        })
    }

    pub async fn send_ready_email(
        &self,
        to_email: &str,
        claim_token: &str,
        ig_handle: &str,
        post_count: u32,
    ) -> bool {
        let claim_url = format!("{}/gift-claim/{}/{}", self.base_url, ig_handle, claim_token);
        let subject = format!(
            "Your {post_count} post{} ready to claim",
            if post_count != 1 { "s are" } else { " is" }
        );
        let html = render_html(&claim_url, ig_handle, post_count, &self.base_url);

        let body = ResendRequest {
            from: "Own Your Posts <notify@ownyourposts.com>".to_string(),
            to: vec![to_email.to_string()],
            subject,
            html,
        };

        match self
            .http
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(SEND_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!(to_email, ig_handle, "sent ready-to-claim email");
                true
            }
            Ok(resp) => {
                warn!(to_email, status = %resp.status(), "email send rejected");
                false
            }
            Err(err) => {
                warn!(to_email, error = %err, "email send failed");
                false
            }
        }
    }
}

fn render_html(claim_url: &str, ig_handle: &str, post_count: u32, base_url: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body><h2>Your content is ready</h2>\
         <p>We've finished uploading {post_count} post(s) from @{ig_handle} to Blossom.</p>\
         <a href=\"{claim_url}\">Claim My Posts</a>\
         <p>Sent by <a href=\"{base_url}\">Own Your Posts</a>.</p></body></html>"
    )
}
