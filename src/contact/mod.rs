//! Contact form relay: validates a submission and hands it to the configured
//! mail integration.

pub mod mailer;

use askama::Template;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;

pub use mailer::{mailer_from_config, EmailJsMailer, MailError, Mailer, ResendMailer};

/// Body of `POST /api/contact`. Every field is optional at the wire level so
/// that missing fields produce the endpoint's own error body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub image_url: Option<String>,
}

/// A submission with every required field present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub subject: String,
    pub message: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Missing required fields")]
pub struct MissingFields;

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl ContactRequest {
    pub fn into_message(self) -> Result<ContactMessage, MissingFields> {
        let (Some(name), Some(email), Some(subject), Some(message)) = (
            present(self.name),
            present(self.email),
            present(self.subject),
            present(self.message),
        ) else {
            return Err(MissingFields);
        };

        Ok(ContactMessage {
            name,
            email,
            phone: present(self.phone),
            location: present(self.location),
            category: present(self.category),
            subject,
            message,
            image_url: present(self.image_url),
        })
    }
}

#[derive(Template)]
#[template(path = "email/contact.html")]
struct ContactEmailTemplate<'a> {
    name: &'a str,
    email: &'a str,
    phone: &'a str,
    location: &'a str,
    category: &'a str,
    subject: &'a str,
    message_lines: Vec<&'a str>,
    image_url: Option<&'a str>,
}

impl ContactMessage {
    pub fn email_subject(&self) -> String {
        format!("[CivicPulse] {}", self.subject)
    }

    /// HTML body for the relay. User input is escaped; absent optional
    /// fields render as `-`.
    pub fn render_html(&self) -> Result<String, askama::Error> {
        ContactEmailTemplate {
            name: &self.name,
            email: &self.email,
            phone: self.phone.as_deref().unwrap_or("-"),
            location: self.location.as_deref().unwrap_or("-"),
            category: self.category.as_deref().unwrap_or("-"),
            subject: &self.subject,
            message_lines: self.message.split('\n').collect(),
            image_url: self.image_url.as_deref(),
        }
        .render()
    }
}

/// Report time in Indian Standard Time, e.g. `15 October 2026, 09:30 AM`.
pub fn report_time(now: DateTime<Utc>) -> String {
    const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;
    const FORMAT: &str = "%-d %B %Y, %I:%M %p";
    match FixedOffset::east_opt(IST_OFFSET_SECS) {
        Some(ist) => now.with_timezone(&ist).format(FORMAT).to_string(),
        None => now.format(FORMAT).to_string(),
    }
}
