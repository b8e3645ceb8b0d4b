use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MailConfig, MailProvider};
use crate::contact::{report_time, ContactMessage};

pub const RESEND_API_URL: &str = "https://api.resend.com/emails";
pub const EMAILJS_API_URL: &str = "https://api.emailjs.com/api/v1.0/email/send";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Email env not configured")]
    NotConfigured,

    /// The provider answered with an error; the message is its own.
    #[error("{0}")]
    Provider(String),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to render email: {0}")]
    Render(#[from] askama::Error),
}

/// One outbound mail integration. Each sends one formatted message to a fixed
/// recipient with reply-to set to the submitter.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_contact(&self, message: &ContactMessage) -> Result<(), MailError>;
}

/// Build the integration selected by `mail.provider`, or None when its
/// settings are incomplete.
pub fn mailer_from_config(config: &MailConfig, client: Client) -> Option<Arc<dyn Mailer>> {
    let set = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

    match config.provider {
        MailProvider::Resend => {
            let mailer = ResendMailer {
                client,
                endpoint: RESEND_API_URL.to_string(),
                api_key: set(&config.resend_api_key)?,
                from: set(&config.contact_from)?,
                to: set(&config.contact_to)?,
            };
            Some(Arc::new(mailer))
        }
        MailProvider::EmailJs => {
            let mailer = EmailJsMailer {
                client,
                endpoint: EMAILJS_API_URL.to_string(),
                service_id: set(&config.emailjs.service_id)?,
                template_id: set(&config.emailjs.template_id)?,
                public_key: set(&config.emailjs.public_key)?,
            };
            Some(Arc::new(mailer))
        }
    }
}

// -- Resend --

pub struct ResendMailer {
    pub client: Client,
    pub endpoint: String,
    pub api_key: String,
    pub from: String,
    pub to: String,
}

#[derive(Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    reply_to: &'a str,
    subject: String,
    html: String,
}

#[derive(Deserialize)]
struct ProviderError {
    message: Option<String>,
}

/// The `message` of a Resend error body, or the bare status when there is none.
fn resend_error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ProviderError>(body)
        .ok()
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status))
}

/// EmailJS answers errors in plain text.
fn emailjs_error_message(status: StatusCode, body: &str) -> String {
    match body.trim() {
        "" => format!("HTTP {}", status),
        text => text.to_string(),
    }
}

impl ResendMailer {
    fn payload<'a>(&'a self, message: &'a ContactMessage) -> Result<ResendEmail<'a>, MailError> {
        Ok(ResendEmail {
            from: &self.from,
            to: [&self.to],
            reply_to: &message.email,
            subject: message.email_subject(),
            html: message.render_html()?,
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send_contact(&self, message: &ContactMessage) -> Result<(), MailError> {
        let payload = self.payload(message)?;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = resend_error_message(status, &body);
            tracing::error!("Resend rejected contact email: {}", message);
            return Err(MailError::Provider(message));
        }

        tracing::info!("Contact email relayed via Resend");
        Ok(())
    }
}

// -- EmailJS --

pub struct EmailJsMailer {
    pub client: Client,
    pub endpoint: String,
    pub service_id: String,
    pub template_id: String,
    pub public_key: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TemplateParams<'a> {
    pub from_name: &'a str,
    pub from_email: &'a str,
    pub phone: &'a str,
    pub location: &'a str,
    pub category: &'a str,
    pub subject: &'a str,
    pub message: &'a str,
    pub image_url: &'a str,
    pub report_time: String,
}

impl<'a> TemplateParams<'a> {
    pub fn from_message(message: &'a ContactMessage, report_time: String) -> Self {
        Self {
            from_name: &message.name,
            from_email: &message.email,
            phone: message.phone.as_deref().unwrap_or("Not provided"),
            location: message.location.as_deref().unwrap_or("Not specified"),
            category: message.category.as_deref().unwrap_or("Other"),
            subject: &message.subject,
            message: &message.message,
            image_url: message.image_url.as_deref().unwrap_or("No image provided"),
            report_time,
        }
    }
}

#[derive(Serialize)]
struct EmailJsRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    template_params: TemplateParams<'a>,
}

#[async_trait]
impl Mailer for EmailJsMailer {
    async fn send_contact(&self, message: &ContactMessage) -> Result<(), MailError> {
        let request = EmailJsRequest {
            service_id: &self.service_id,
            template_id: &self.template_id,
            user_id: &self.public_key,
            template_params: TemplateParams::from_message(
                message,
                report_time(chrono::Utc::now()),
            ),
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = emailjs_error_message(status, &body);
            tracing::error!("EmailJS rejected contact email: {}", message);
            return Err(MailError::Provider(message));
        }

        tracing::info!("Contact email relayed via EmailJS");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmailJsConfig;

    fn message() -> ContactMessage {
        ContactMessage {
            name: "Asha".into(),
            email: "asha@example.com".into(),
            phone: None,
            location: Some("Jayanagar".into()),
            category: None,
            subject: "Broken streetlight".into(),
            message: "It has been dark for a week".into(),
            image_url: None,
        }
    }

    #[test]
    fn resend_requires_recipient_and_sender() {
        let mut config = MailConfig {
            resend_api_key: Some("re_123".into()),
            contact_to: Some("owner@civicpulse.in".into()),
            ..MailConfig::default()
        };
        assert!(mailer_from_config(&config, Client::new()).is_none());

        config.contact_from = Some("CivicPulse <no-reply@civicpulse.in>".into());
        assert!(mailer_from_config(&config, Client::new()).is_some());
    }

    #[test]
    fn emailjs_requires_all_keys() {
        let mut config = MailConfig {
            provider: MailProvider::EmailJs,
            emailjs: EmailJsConfig {
                service_id: Some("svc".into()),
                template_id: Some("tpl".into()),
                public_key: Some(String::new()),
            },
            ..MailConfig::default()
        };
        assert!(mailer_from_config(&config, Client::new()).is_none());

        config.emailjs.public_key = Some("pk".into());
        assert!(mailer_from_config(&config, Client::new()).is_some());
    }

    #[test]
    fn resend_payload_shape() {
        let mailer = ResendMailer {
            client: Client::new(),
            endpoint: RESEND_API_URL.into(),
            api_key: "re_123".into(),
            from: "CivicPulse <no-reply@civicpulse.in>".into(),
            to: "owner@civicpulse.in".into(),
        };
        let message = message();
        let json = serde_json::to_value(mailer.payload(&message).unwrap()).unwrap();
        assert_eq!(json["to"], serde_json::json!(["owner@civicpulse.in"]));
        assert_eq!(json["reply_to"], "asha@example.com");
        assert_eq!(json["subject"], "[CivicPulse] Broken streetlight");
        assert!(json["html"].as_str().unwrap().contains("Jayanagar"));
    }

    #[test]
    fn template_params_fill_placeholders() {
        let message = message();
        let params = TemplateParams::from_message(&message, "now".into());
        assert_eq!(params.phone, "Not provided");
        assert_eq!(params.location, "Jayanagar");
        assert_eq!(params.image_url, "No image provided");
        assert_eq!(params.category, "Other");
    }

    #[test]
    fn resend_error_uses_provider_message() {
        let body = r#"{"statusCode":422,"message":"The `reply_to` field is invalid.","name":"validation_error"}"#;
        assert_eq!(
            resend_error_message(StatusCode::UNPROCESSABLE_ENTITY, body),
            "The `reply_to` field is invalid."
        );
        assert_eq!(
            resend_error_message(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>"),
            "HTTP 502 Bad Gateway"
        );
        assert_eq!(
            resend_error_message(StatusCode::UNAUTHORIZED, r#"{"name":"missing_api_key"}"#),
            "HTTP 401 Unauthorized"
        );
    }

    #[test]
    fn emailjs_error_is_plain_text() {
        assert_eq!(
            emailjs_error_message(StatusCode::BAD_REQUEST, " The Public Key is invalid \n"),
            "The Public Key is invalid"
        );
        assert_eq!(
            emailjs_error_message(StatusCode::FORBIDDEN, ""),
            "HTTP 403 Forbidden"
        );
    }
}
