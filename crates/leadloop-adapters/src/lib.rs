//! Loop mappers: per-table rules turning raw row-store records into
//! canonical leads, plus the consolidation pass over all three loops.

pub mod fields;
pub mod timestamp;

use chrono::{DateTime, Utc};
use leadloop_core::{CanonicalLead, ExtendedFields, RawRecord, SourceLoop, NO_EMAIL};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::fields::{extract_range, numbered_key, resolve_string, resolve_truthy, DEFAULT_MAX_NUMBERED_INDEX};
use crate::timestamp::{decompose, parse_timestamp};

pub const CRATE_NAME: &str = "leadloop-adapters";

const ID_KEYS: &[&str] = &["Lead ID", "lead_id", "LeadID", "id", "Id", "ID"];
const NAME_KEYS: &[&str] = &["Name", "Lead Name", "Full Name", "name"];
const PHONE_KEYS: &[&str] = &["Phone", "Phone Number", "WhatsApp Number", "Mobile", "phone"];
const EMAIL_KEYS: &[&str] = &["Email", "Email Address", "email", "E-mail"];
const REPLIED_KEYS: &[&str] = &["Replied", "replied", "Reply Status"];
const EMAIL_REPLIED_KEYS: &[&str] = &["Email Replied", "Email_Replied", "email_replied"];
const WHATSAPP_REPLIED_KEYS: &[&str] = &["W.P_Replied", "WhatsApp Replied", "whatsapp_replied"];
const CREATED_AT_KEYS: &[&str] = &["Created At", "created_at", "CreatedAt", "Created"];
const UPDATED_AT_KEYS: &[&str] = &["Updated At", "updated_at", "UpdatedAt", "Updated"];
const LAST_CONTACTED_KEYS: &[&str] = &["Last Contacted", "last_contacted", "Last Contact"];

const EMAIL_KEY_PATTERNS: &[&str] = &["Email_{i}", "Email {i}"];
const WHATSAPP_KEY_PATTERNS: &[&str] = &["W.P_{i}", "WhatsApp_{i}", "WhatsApp {i}"];
const VOICE_KEY_PATTERNS: &[&str] = &["Voice_{i}", "Voice {i}", "Call_{i}"];
const WHATSAPP_FOLLOW_UP_KEYS: &[&str] = &["W.P_FollowUp", "WhatsApp FollowUp", "WhatsApp_FollowUp"];
const FOLLOW_UP_48_HR_KEYS: &[&str] = &["FollowUp_48_Hr", "FollowUp 48 Hr", "Follow Up 48 Hr"];
const WEEK_KEY_PATTERNS: &[&str] = &["Week {i}", "Week_{i}"];

pub const WHATSAPP_FOLLOW_UP_STAGE: &str = "WhatsApp FollowUp";
pub const FOLLOW_UP_48_HR_STAGE: &str = "FollowUp 48 Hr";

/// Per-pass inputs the mappers need besides the record itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingContext {
    /// Stands in for `created_at` when the source omits it.
    pub fetched_at: DateTime<Utc>,
    /// Upper bound for the numbered field families.
    pub max_numbered_index: u32,
}

impl MappingContext {
    pub fn new(fetched_at: DateTime<Utc>) -> Self {
        Self {
            fetched_at,
            max_numbered_index: DEFAULT_MAX_NUMBERED_INDEX,
        }
    }

    pub fn with_max_numbered_index(mut self, max: u32) -> Self {
        self.max_numbered_index = max;
        self
    }
}

/// One local stage column family and the global stage name it records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub stage: String,
    pub keys: Vec<String>,
}

impl StageSpec {
    fn fixed(stage: &str, keys: &[&str]) -> Self {
        Self {
            stage: stage.to_string(),
            keys: keys.iter().map(ToString::to_string).collect(),
        }
    }

    /// `Prefix N` stages for local indices `1..=count`, renumbered by `offset`.
    fn numbered(prefix: &str, count: u32, offset: u32, patterns: &[&str]) -> Vec<Self> {
        (1..=count)
            .map(|local| Self {
                stage: format!("{prefix} {}", local + offset),
                keys: patterns.iter().map(|p| numbered_key(p, local)).collect(),
            })
            .collect()
    }

    fn key_refs(&self) -> Vec<&str> {
        self.keys.iter().map(String::as_str).collect()
    }
}

pub trait LoopMapper: Send + Sync {
    fn source_loop(&self) -> SourceLoop;

    /// Local stages in the order they are recorded.
    fn stage_specs(&self) -> &[StageSpec];

    fn map_record(&self, record: &RawRecord, index: usize, ctx: &MappingContext) -> CanonicalLead {
        map_common(self.source_loop(), self.stage_specs(), record, index, ctx)
    }
}

#[derive(Debug, Clone)]
pub struct IntroLoopMapper {
    stages: Vec<StageSpec>,
}

#[derive(Debug, Clone)]
pub struct FollowUpLoopMapper {
    stages: Vec<StageSpec>,
}

#[derive(Debug, Clone)]
pub struct NurtureLoopMapper {
    stages: Vec<StageSpec>,
}

pub fn intro_mapper() -> IntroLoopMapper {
    let mut stages = StageSpec::numbered("Email", 3, SourceLoop::Intro.email_offset(), EMAIL_KEY_PATTERNS);
    stages.extend(StageSpec::numbered("WhatsApp", 2, 0, WHATSAPP_KEY_PATTERNS));
    stages.extend(StageSpec::numbered("Voice", 2, 0, VOICE_KEY_PATTERNS));
    stages.push(StageSpec::fixed(FOLLOW_UP_48_HR_STAGE, FOLLOW_UP_48_HR_KEYS));
    IntroLoopMapper { stages }
}

pub fn follow_up_mapper() -> FollowUpLoopMapper {
    let mut stages = StageSpec::numbered("Email", 3, SourceLoop::FollowUp.email_offset(), EMAIL_KEY_PATTERNS);
    stages.push(StageSpec::fixed(WHATSAPP_FOLLOW_UP_STAGE, WHATSAPP_FOLLOW_UP_KEYS));
    FollowUpLoopMapper { stages }
}

pub fn nurture_mapper() -> NurtureLoopMapper {
    let mut stages = StageSpec::numbered("Email", 9, SourceLoop::Nurture.email_offset(), EMAIL_KEY_PATTERNS);
    stages.extend(StageSpec::numbered("WhatsApp", 6, 0, WHATSAPP_KEY_PATTERNS));
    stages.push(StageSpec::fixed(WHATSAPP_FOLLOW_UP_STAGE, WHATSAPP_FOLLOW_UP_KEYS));
    NurtureLoopMapper { stages }
}

impl LoopMapper for IntroLoopMapper {
    fn source_loop(&self) -> SourceLoop {
        SourceLoop::Intro
    }

    fn stage_specs(&self) -> &[StageSpec] {
        &self.stages
    }
}

impl LoopMapper for FollowUpLoopMapper {
    fn source_loop(&self) -> SourceLoop {
        SourceLoop::FollowUp
    }

    fn stage_specs(&self) -> &[StageSpec] {
        &self.stages
    }
}

impl LoopMapper for NurtureLoopMapper {
    fn source_loop(&self) -> SourceLoop {
        SourceLoop::Nurture
    }

    fn stage_specs(&self) -> &[StageSpec] {
        &self.stages
    }

    fn map_record(&self, record: &RawRecord, index: usize, ctx: &MappingContext) -> CanonicalLead {
        let mut lead = map_common(SourceLoop::Nurture, &self.stages, record, index, ctx);
        lead.current_week = current_week(record);
        lead
    }
}

pub fn mapper_for_loop(source_loop: SourceLoop) -> Box<dyn LoopMapper> {
    match source_loop {
        SourceLoop::Intro => Box::new(intro_mapper()),
        SourceLoop::FollowUp => Box::new(follow_up_mapper()),
        SourceLoop::Nurture => Box::new(nurture_mapper()),
    }
}

pub fn map_intro(record: &RawRecord, index: usize, ctx: &MappingContext) -> CanonicalLead {
    intro_mapper().map_record(record, index, ctx)
}

pub fn map_follow_up(record: &RawRecord, index: usize, ctx: &MappingContext) -> CanonicalLead {
    follow_up_mapper().map_record(record, index, ctx)
}

pub fn map_nurture(record: &RawRecord, index: usize, ctx: &MappingContext) -> CanonicalLead {
    nurture_mapper().map_record(record, index, ctx)
}

fn trimmed_or_empty(value: Option<String>) -> String {
    value.map(|s| s.trim().to_string()).unwrap_or_default()
}

fn resolve_timestamp(record: &RawRecord, keys: &[&str]) -> Option<DateTime<Utc>> {
    resolve_string(record, keys).and_then(|s| parse_timestamp(&s))
}

fn map_common(
    source_loop: SourceLoop,
    stages: &[StageSpec],
    record: &RawRecord,
    index: usize,
    ctx: &MappingContext,
) -> CanonicalLead {
    let id = resolve_truthy(record, ID_KEYS)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("{}-{}", source_loop.tag(), index));
    let created_at = resolve_timestamp(record, CREATED_AT_KEYS).unwrap_or(ctx.fetched_at);

    let mut lead = CanonicalLead::new(id, source_loop, created_at);
    lead.name = trimmed_or_empty(resolve_string(record, NAME_KEYS));
    lead.phone = trimmed_or_empty(resolve_string(record, PHONE_KEYS));
    lead.email = resolve_string(record, EMAIL_KEYS)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| NO_EMAIL.to_string());
    lead.replied = resolve_string(record, REPLIED_KEYS).unwrap_or_default();
    lead.email_replied = resolve_string(record, EMAIL_REPLIED_KEYS).unwrap_or_default();
    lead.whatsapp_replied = resolve_string(record, WHATSAPP_REPLIED_KEYS).unwrap_or_default();
    lead.updated_at = resolve_timestamp(record, UPDATED_AT_KEYS);

    for spec in stages {
        if let Some(value) = resolve_truthy(record, &spec.key_refs()) {
            lead.push_stage(spec.stage.clone(), value);
        }
    }

    lead.extended = extract_extended(record, ctx.max_numbered_index);
    lead.last_contacted = resolve_timestamp(record, LAST_CONTACTED_KEYS)
        .or_else(|| latest_stage_timestamp(&lead));
    lead
}

fn extract_extended(record: &RawRecord, max_index: u32) -> ExtendedFields {
    ExtendedFields {
        whatsapp_replied: extract_range(record, "W.P_Replied_{i}", 1, max_index),
        whatsapp_follow_up: extract_range(record, "W.P_FollowUp_{i}", 1, max_index),
        email_replied: extract_range(record, "Email_Replied_{i}", 1, max_index),
    }
}

fn latest_stage_timestamp(lead: &CanonicalLead) -> Option<DateTime<Utc>> {
    lead.stage_data
        .values()
        .filter_map(|raw| decompose(raw).timestamp)
        .max()
}

/// Weeks are tested in order and a later truthy week overrides an earlier one.
fn current_week(record: &RawRecord) -> Option<String> {
    let mut week = None;
    for n in 1..=3 {
        let keys = WEEK_KEY_PATTERNS
            .iter()
            .map(|p| numbered_key(p, n))
            .collect::<Vec<_>>();
        let refs = keys.iter().map(String::as_str).collect::<Vec<_>>();
        if resolve_truthy(record, &refs).is_some() {
            week = Some(format!("Week {n}"));
        }
    }
    week
}

/// The three raw tables as fetched, one JSON value per loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTables {
    #[serde(default)]
    pub intro: JsonValue,
    #[serde(default)]
    pub follow_up: JsonValue,
    #[serde(default)]
    pub nurture: JsonValue,
}

impl RawTables {
    pub fn table(&self, source_loop: SourceLoop) -> &JsonValue {
        match source_loop {
            SourceLoop::Intro => &self.intro,
            SourceLoop::FollowUp => &self.follow_up,
            SourceLoop::Nurture => &self.nurture,
        }
    }

    pub fn set_table(&mut self, source_loop: SourceLoop, table: JsonValue) {
        match source_loop {
            SourceLoop::Intro => self.intro = table,
            SourceLoop::FollowUp => self.follow_up = table,
            SourceLoop::Nurture => self.nurture = table,
        }
    }
}

/// Rows of one table. A table that is not an array yields no rows; a row that
/// is not an object is mapped as an empty record so it keeps its position.
pub fn table_records(source_loop: SourceLoop, table: &JsonValue) -> Vec<RawRecord> {
    let Some(rows) = table.as_array() else {
        if !table.is_null() {
            warn!(source_loop = %source_loop, "table is not an array; treating as empty");
        }
        return Vec::new();
    };
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            RawRecord::from_value(row.clone()).unwrap_or_else(|| {
                debug!(source_loop = %source_loop, index, "row is not an object; mapping as empty record");
                RawRecord::new()
            })
        })
        .collect()
}

pub fn map_table(mapper: &dyn LoopMapper, table: &JsonValue, ctx: &MappingContext) -> Vec<CanonicalLead> {
    table_records(mapper.source_loop(), table)
        .iter()
        .enumerate()
        .map(|(index, record)| mapper.map_record(record, index, ctx))
        .collect()
}

/// Intro leads, then Follow Up, then Nurture, each in source order.
pub fn consolidate(tables: &RawTables, ctx: &MappingContext) -> Vec<CanonicalLead> {
    SourceLoop::ALL
        .iter()
        .flat_map(|source_loop| {
            let mapper = mapper_for_loop(*source_loop);
            map_table(mapper.as_ref(), tables.table(*source_loop), ctx)
        })
        .collect()
}

pub fn table_file_name(source_loop: SourceLoop) -> &'static str {
    match source_loop {
        SourceLoop::Intro => "intro.json",
        SourceLoop::FollowUp => "follow_up.json",
        SourceLoop::Nurture => "nurture.json",
    }
}
