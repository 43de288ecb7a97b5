//! Transactional email over the Resend HTTP API. Delivery is best-effort:
//! failures are logged and never bubble into the request path.

use serde_json::json;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Mailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

impl Mailer {
    pub fn new(api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            from,
        }
    }

    /// Returns None when no API key is configured, which disables email.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("RESEND_API_KEY").ok()?;
        let from = std::env::var("FUNDTRACKER_MAIL_FROM")
            .unwrap_or_else(|_| "FundTracker <noreply@fundtracker.app>".into());
        Some(Self::new(api_key, from))
    }

    pub async fn send_donation_received(&self, to: &str, project_name: &str, amount: i64) {
        let subject = donation_subject(amount, project_name);
        let html = format!(
            "<p>Good news! Your project <strong>{}</strong> received a donation of ₹{}.</p>\
             <p>Log in to FundTracker to see the details.</p>",
            project_name, amount
        );
        self.send(to, &subject, &html).await;
    }

    pub async fn send_verification_changed(&self, to: &str, ngo_name: &str, verified: bool) {
        let (subject, html) = if verified {
            (
                format!("{} is now verified", ngo_name),
                format!(
                    "<p>Congratulations! <strong>{}</strong> has been verified. \
                     Your verified badge is now visible to donors.</p>",
                    ngo_name
                ),
            )
        } else {
            (
                format!("Verification revoked for {}", ngo_name),
                format!(
                    "<p>The verification status of <strong>{}</strong> has been revoked. \
                     Please contact support if you believe this is a mistake.</p>",
                    ngo_name
                ),
            )
        };
        self.send(to, &subject, &html).await;
    }

    async fn send(&self, to: &str, subject: &str, html: &str) {
        let body = json!({
            "from": self.from,
            "to": [to],
            "subject": subject,
            "html": html,
        });

        let result = self
            .client
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!("Sent '{}' to {}", subject, to);
            }
            Ok(resp) => {
                warn!("Email '{}' to {} rejected: {}", subject, to, resp.status());
            }
            Err(e) => {
                warn!("Email '{}' to {} failed: {}", subject, to, e);
            }
        }
    }
}

fn donation_subject(amount: i64, project_name: &str) -> String {
    format!("₹{} donated to {}", amount, project_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn donation_subject_format() {
        assert_eq!(
            donation_subject(500, "Clean Water"),
            "₹500 donated to Clean Water"
        );
    }
}
