//! Core domain model for the lead consolidation engine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const CRATE_NAME: &str = "leadloop-core";

/// Sentinel stored in [`CanonicalLead::email`] when the source has no address.
pub const NO_EMAIL: &str = "No Email";

/// Campaign sequence a raw record was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceLoop {
    Intro,
    FollowUp,
    Nurture,
}

impl SourceLoop {
    /// Consolidation order.
    pub const ALL: [SourceLoop; 3] = [SourceLoop::Intro, SourceLoop::FollowUp, SourceLoop::Nurture];

    /// Short tag used for positional fallback ids (`intro-0`, `followup-3`, ...).
    pub fn tag(self) -> &'static str {
        match self {
            SourceLoop::Intro => "intro",
            SourceLoop::FollowUp => "followup",
            SourceLoop::Nurture => "nurture",
        }
    }

    /// Human name, also the template catalog category for the loop.
    pub fn display_name(self) -> &'static str {
        match self {
            SourceLoop::Intro => "Intro",
            SourceLoop::FollowUp => "Follow Up",
            SourceLoop::Nurture => "Nurture",
        }
    }

    /// Offset added to a local `Email N` to get the global stage number.
    pub fn email_offset(self) -> u32 {
        match self {
            SourceLoop::Intro => 0,
            SourceLoop::FollowUp => 3,
            SourceLoop::Nurture => 6,
        }
    }
}

impl fmt::Display for SourceLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Outreach channel a stage or reply belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Email,
    WhatsApp,
    Voice,
    Message,
}

impl Channel {
    /// Infer the channel from a global stage name.
    pub fn for_stage(stage: &str) -> Self {
        let lower = stage.to_ascii_lowercase();
        if lower.starts_with("email") {
            Channel::Email
        } else if lower.starts_with("whatsapp") {
            Channel::WhatsApp
        } else if lower.starts_with("voice") {
            Channel::Voice
        } else {
            Channel::Message
        }
    }
}

/// One upstream table row. Key names are not fixed; read it through the
/// field resolver rather than by exact key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, JsonValue>);

impl RawRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps a JSON object. Anything else is not a record.
    pub fn from_value(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

impl From<Map<String, JsonValue>> for RawRecord {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, JsonValue)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Per-index values of the repeated field families, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtendedFields {
    /// `W.P_Replied_{i}`
    pub whatsapp_replied: BTreeMap<u32, String>,
    /// `W.P_FollowUp_{i}`
    pub whatsapp_follow_up: BTreeMap<u32, String>,
    /// `Email_Replied_{i}`
    pub email_replied: BTreeMap<u32, String>,
}

/// Loop-agnostic lead produced by one loop mapper from one raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLead {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub source_loop: SourceLoop,
    /// Global stage names in discovery order.
    pub stages_passed: Vec<String>,
    /// Raw content per passed stage.
    pub stage_data: BTreeMap<String, String>,
    pub replied: String,
    pub email_replied: String,
    pub whatsapp_replied: String,
    /// Fetch time when the source carries no creation time.
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_contacted: Option<DateTime<Utc>>,
    pub current_week: Option<String>,
    pub extended: ExtendedFields,
}

impl CanonicalLead {
    pub fn new(id: impl Into<String>, source_loop: SourceLoop, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            phone: String::new(),
            email: NO_EMAIL.to_string(),
            source_loop,
            stages_passed: Vec::new(),
            stage_data: BTreeMap::new(),
            replied: String::new(),
            email_replied: String::new(),
            whatsapp_replied: String::new(),
            created_at,
            updated_at: None,
            last_contacted: None,
            current_week: None,
            extended: ExtendedFields::default(),
        }
    }

    pub fn has_stage(&self, stage: &str) -> bool {
        self.stages_passed.iter().any(|s| s == stage)
    }

    /// Records a passed stage. A stage already present is ignored so the
    /// `stage_data` keys stay a subset of `stages_passed`.
    pub fn push_stage(&mut self, stage: impl Into<String>, content: impl Into<String>) {
        let stage = stage.into();
        if self.has_stage(&stage) {
            return;
        }
        self.stage_data.insert(stage.clone(), content.into());
        self.stages_passed.push(stage);
    }

    pub fn stage_content(&self, stage: &str) -> Option<&str> {
        self.stage_data.get(stage).map(String::as_str)
    }

    /// Name for display, falling back to the id.
    pub fn display_name(&self) -> &str {
        let name = self.name.trim();
        if name.is_empty() {
            self.id.as_str()
        } else {
            name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Email,
    WhatsApp,
}

/// One entry of the template catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEntry {
    #[serde(rename = "type")]
    pub kind: TemplateKind,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, alias = "body")]
    pub content: Option<String>,
}

impl TemplateEntry {
    pub fn body(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Completion of a lead through its loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// 0..=100
    pub percentage: f64,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn new_lead_carries_sentinels() {
        let lead = CanonicalLead::new("intro-0", SourceLoop::Intro, fetched_at());
        assert_eq!(lead.email, NO_EMAIL);
        assert!(lead.stages_passed.is_empty());
        assert_eq!(lead.display_name(), "intro-0");
    }

    #[test]
    fn push_stage_keeps_stage_data_keys_within_stages_passed() {
        let mut lead = CanonicalLead::new("L1", SourceLoop::Intro, fetched_at());
        lead.push_stage("Email 1", "Hi");
        lead.push_stage("Email 1", "Hi again");
        assert_eq!(lead.stages_passed, vec!["Email 1".to_string()]);
        assert_eq!(lead.stage_content("Email 1"), Some("Hi"));
        assert!(lead.stage_data.keys().all(|k| lead.has_stage(k)));
    }

    #[test]
    fn template_entry_accepts_body_alias() {
        let entry: TemplateEntry = serde_json::from_str(
            r#"{"type":"whatsapp","name":"WhatsApp 1","body":"Hey {{name}}"}"#,
        )
        .unwrap();
        assert_eq!(entry.kind, TemplateKind::WhatsApp);
        assert_eq!(entry.body(), "Hey {{name}}");
        assert!(entry.category.is_none());
    }

    #[test]
    fn raw_record_only_wraps_objects() {
        assert!(RawRecord::from_value(serde_json::json!({"Name": "Ann"})).is_some());
        assert!(RawRecord::from_value(serde_json::json!([1, 2])).is_none());
    }

    #[test]
    fn channel_is_inferred_from_stage_prefix() {
        assert_eq!(Channel::for_stage("Email 7"), Channel::Email);
        assert_eq!(Channel::for_stage("WhatsApp FollowUp"), Channel::WhatsApp);
        assert_eq!(Channel::for_stage("Voice 2"), Channel::Voice);
        assert_eq!(Channel::for_stage("FollowUp 48 Hr"), Channel::Message);
    }
}
