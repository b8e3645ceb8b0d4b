// Domain types - pure, no side effects
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// New types for compile-time safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(pub String);

impl IssueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issue lifecycle. Only admins move an issue between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Pending,
    InProgress,
    Resolved,
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 3] = [Self::Pending, Self::InProgress, Self::Resolved];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
        }
    }

    /// Legal edges: pending → in_progress, pending → resolved,
    /// in_progress → resolved, resolved → pending.
    pub fn can_transition_to(&self, target: IssueStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Resolved)
                | (Self::InProgress, Self::Resolved)
                | (Self::Resolved, Self::Pending)
        )
    }

    pub fn transition(self, target: IssueStatus) -> Result<IssueStatus, TransitionError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(TransitionError {
                from: self,
                to: target,
            })
        }
    }

    /// Moderation actions offered for an issue in this state.
    pub fn actions(&self) -> &'static [ModerationAction] {
        match self {
            Self::Pending => &[ModerationAction::StartWork, ModerationAction::MarkResolved],
            Self::InProgress => &[ModerationAction::MarkResolved],
            Self::Resolved => &[ModerationAction::Reopen],
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            other => Err(ParseEnumError::new("status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Cannot move issue from {from} to {to}")]
pub struct TransitionError {
    pub from: IssueStatus,
    pub to: IssueStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    StartWork,
    MarkResolved,
    Reopen,
}

impl ModerationAction {
    pub fn target(&self) -> IssueStatus {
        match self {
            Self::StartWork => IssueStatus::InProgress,
            Self::MarkResolved => IssueStatus::Resolved,
            Self::Reopen => IssueStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    RoadDamage,
    Streetlight,
    Garbage,
    WaterLeak,
    Sewage,
    Sidewalk,
    TrafficSignal,
    Noise,
    Graffiti,
    Other,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Self::RoadDamage,
        Self::Streetlight,
        Self::Garbage,
        Self::WaterLeak,
        Self::Sewage,
        Self::Sidewalk,
        Self::TrafficSignal,
        Self::Noise,
        Self::Graffiti,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoadDamage => "road_damage",
            Self::Streetlight => "streetlight",
            Self::Garbage => "garbage",
            Self::WaterLeak => "water_leak",
            Self::Sewage => "sewage",
            Self::Sidewalk => "sidewalk",
            Self::TrafficSignal => "traffic_signal",
            Self::Noise => "noise",
            Self::Graffiti => "graffiti",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("category", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Snapshot of a reported issue, with the reporter's display name embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub status: IssueStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub image_url: Option<String>,
    pub upvotes_count: u32,
    pub comments_count: u32,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
    pub reporter_name: Option<String>,
}

impl Issue {
    pub fn apply(&mut self, patch: &IssuePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(upvotes) = patch.upvotes_count {
            self.upvotes_count = upvotes;
        }
        if let Some(comments) = patch.comments_count {
            self.comments_count = comments;
        }
    }

    /// True when every field the patch sets already holds the patched value.
    pub fn reflects(&self, patch: &IssuePatch) -> bool {
        patch.status.map_or(true, |s| s == self.status)
            && patch.upvotes_count.map_or(true, |n| n == self.upvotes_count)
            && patch.comments_count.map_or(true, |n| n == self.comments_count)
    }
}

/// Partial update of the mutable issue fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IssueStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments_count: Option<u32>,
}

impl IssuePatch {
    pub fn status(status: IssueStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn upvotes(count: u32) -> Self {
        Self {
            upvotes_count: Some(count),
            ..Self::default()
        }
    }

    pub fn comments(count: u32) -> Self {
        Self {
            comments_count: Some(count),
            ..Self::default()
        }
    }

    /// Later fields win.
    pub fn merge(self, later: IssuePatch) -> IssuePatch {
        IssuePatch {
            status: later.status.or(self.status),
            upvotes_count: later.upvotes_count.or(self.upvotes_count),
            comments_count: later.comments_count.or(self.comments_count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub issue_id: IssueId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author_name: Option<String>,
}

/// Per-field validation messages, keyed by form field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(field, msg)| format!("{}: {}", field, msg))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Raw report form as submitted by a citizen.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueReport {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A validated report, ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub image_url: Option<String>,
}

impl IssueReport {
    pub fn validate(&self) -> Result<NewIssue, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let title = self.title.trim();
        if title.is_empty() {
            errors.add("title", "Title is required");
        }
        let description = self.description.trim();
        if description.is_empty() {
            errors.add("description", "Description is required");
        }
        let category = match self.category.trim() {
            "" => {
                errors.add("category", "Category is required");
                Category::Other
            }
            raw => raw.parse().unwrap_or_else(|e: ParseEnumError| {
                errors.add("category", e.to_string());
                Category::Other
            }),
        };

        let (latitude, longitude) = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => {
                if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                    errors.add("latitude", "Latitude must be between -90 and 90");
                }
                if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                    errors.add("longitude", "Longitude must be between -180 and 180");
                }
                (lat, lon)
            }
            _ => {
                errors.add("location", "Please set your location or enter an address.");
                (0.0, 0.0)
            }
        };

        let image_url = self
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        errors.into_result(NewIssue {
            title: title.to_string(),
            description: description.to_string(),
            category,
            latitude,
            longitude,
            address: self.address.as_deref().unwrap_or("").trim().to_string(),
            image_url,
        })
    }
}

/// Trim a comment and reject it when nothing is left.
pub fn validate_comment(content: &str) -> Result<String, ValidationErrors> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        Err(ValidationErrors::single("content", "Comment cannot be empty"))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Status tallies over a set of issues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IssueStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub resolved: usize,
}

impl IssueStats {
    pub fn tally<'a>(issues: impl IntoIterator<Item = &'a Issue>) -> Self {
        issues.into_iter().fold(Self::default(), |mut acc, issue| {
            acc.total += 1;
            match issue.status {
                IssueStatus::Pending => acc.pending += 1,
                IssueStatus::InProgress => acc.in_progress += 1,
                IssueStatus::Resolved => acc.resolved += 1,
            }
            acc
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn issue(id: &str, status: IssueStatus) -> Issue {
        Issue {
            id: IssueId::new(id),
            title: format!("Issue {}", id),
            description: "Pothole near the bus stop".to_string(),
            category: Category::RoadDamage,
            status,
            latitude: 12.97,
            longitude: 77.59,
            address: "MG Road, Bengaluru".to_string(),
            image_url: None,
            upvotes_count: 0,
            comments_count: 0,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            user_id: UserId::new("reporter"),
            reporter_name: Some("Asha".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use IssueStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Resolved));
        assert!(InProgress.can_transition_to(Resolved));
        assert!(Resolved.can_transition_to(Pending));
    }

    #[test]
    fn test_every_other_transition_rejected() {
        use IssueStatus::*;
        let legal = [
            (Pending, InProgress),
            (Pending, Resolved),
            (InProgress, Resolved),
            (Resolved, Pending),
        ];
        for from in IssueStatus::ALL {
            for to in IssueStatus::ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(from.transition(to).is_ok(), expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_actions_match_legal_edges() {
        for status in IssueStatus::ALL {
            for action in status.actions() {
                assert!(status.can_transition_to(action.target()));
            }
        }
        assert_eq!(IssueStatus::Resolved.actions(), &[ModerationAction::Reopen]);
    }

    #[test]
    fn test_status_and_category_parse() {
        assert_eq!("in_progress".parse::<IssueStatus>(), Ok(IssueStatus::InProgress));
        assert!("done".parse::<IssueStatus>().is_err());
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
        assert!("potholes".parse::<Category>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&IssueStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let json = serde_json::to_string(&Category::TrafficSignal).unwrap();
        assert_eq!(json, "\"traffic_signal\"");
    }

    #[test]
    fn test_patch_apply_and_reflects() {
        let mut issue = fixtures::issue("a", IssueStatus::Pending);
        let patch = IssuePatch::status(IssueStatus::Resolved).merge(IssuePatch::upvotes(3));
        assert!(!issue.reflects(&patch));
        issue.apply(&patch);
        assert!(issue.reflects(&patch));
        assert_eq!(issue.status, IssueStatus::Resolved);
        assert_eq!(issue.upvotes_count, 3);
        assert_eq!(issue.comments_count, 0);
    }

    #[test]
    fn test_report_validation_collects_every_field() {
        let report = IssueReport {
            category: "potholes".to_string(),
            latitude: Some(12.0),
            ..IssueReport::default()
        };
        let errors = report.validate().unwrap_err();
        assert!(errors.get("title").is_some());
        assert!(errors.get("description").is_some());
        assert_eq!(errors.get("category"), Some("Unknown category: potholes"));
        assert!(errors.get("location").is_some());
    }

    #[test]
    fn test_report_validation_rejects_out_of_range_coordinates() {
        let report = IssueReport {
            title: "Broken light".to_string(),
            description: "Dark street".to_string(),
            category: "streetlight".to_string(),
            latitude: Some(91.0),
            longitude: Some(-181.0),
            ..IssueReport::default()
        };
        let errors = report.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_valid_report_is_trimmed() {
        let report = IssueReport {
            title: "  Broken light ".to_string(),
            description: "Dark street".to_string(),
            category: "streetlight".to_string(),
            latitude: Some(12.9),
            longitude: Some(77.5),
            address: Some(" 5th Cross ".to_string()),
            image_url: Some("".to_string()),
        };
        let new_issue = report.validate().unwrap();
        assert_eq!(new_issue.title, "Broken light");
        assert_eq!(new_issue.address, "5th Cross");
        assert_eq!(new_issue.category, Category::Streetlight);
        assert!(new_issue.image_url.is_none());
    }

    #[test]
    fn test_comment_validation() {
        assert_eq!(validate_comment("  fixed yet? ").unwrap(), "fixed yet?");
        assert!(validate_comment("   ").is_err());
    }

    #[test]
    fn test_stats_tally() {
        let issues = vec![
            fixtures::issue("a", IssueStatus::Pending),
            fixtures::issue("b", IssueStatus::Pending),
            fixtures::issue("c", IssueStatus::Resolved),
        ];
        let stats = IssueStats::tally(&issues);
        assert_eq!(
            stats,
            IssueStats {
                total: 3,
                pending: 2,
                in_progress: 0,
                resolved: 1
            }
        );
    }
}
