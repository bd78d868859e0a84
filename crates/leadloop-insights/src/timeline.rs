//! Per-lead activity timeline and the cross-lead reply feed.

use chrono::{DateTime, Utc};
use leadloop_adapters::timestamp::decompose;
use leadloop_core::{CanonicalLead, Channel, SourceLoop};
use serde::{Deserialize, Serialize};

use crate::replies::{is_numbered_reply, is_scalar_reply};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub stage: String,
    pub channel: Channel,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One event per passed stage, in `stages_passed` order.
pub fn timeline(lead: &CanonicalLead) -> Vec<TimelineEvent> {
    lead.stages_passed
        .iter()
        .map(|stage| {
            let channel = Channel::for_stage(stage);
            let parts = decompose(lead.stage_content(stage).unwrap_or_default());
            TimelineEvent {
                stage: stage.clone(),
                channel,
                content: parts.display_content(channel),
                timestamp: parts.timestamp,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEntry {
    pub lead_id: String,
    pub lead_name: String,
    pub source_loop: SourceLoop,
    pub channel: Channel,
    /// Raw field the reply was read from.
    pub field: String,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

fn reply_entry(lead: &CanonicalLead, channel: Channel, field: String, raw: &str) -> ReplyEntry {
    let parts = decompose(raw);
    ReplyEntry {
        lead_id: lead.id.clone(),
        lead_name: lead.display_name().to_string(),
        source_loop: lead.source_loop,
        channel,
        field,
        content: parts.display_content(channel),
        timestamp: parts.timestamp,
    }
}

/// Replies of one lead: WhatsApp first, then email. The generic `replied`
/// status only produces an entry when neither channel has one.
pub fn lead_replies(lead: &CanonicalLead) -> Vec<ReplyEntry> {
    let mut entries = Vec::new();

    if is_scalar_reply(&lead.whatsapp_replied) {
        entries.push(reply_entry(lead, Channel::WhatsApp, "W.P_Replied".to_string(), &lead.whatsapp_replied));
    }
    for (i, value) in &lead.extended.whatsapp_replied {
        if is_numbered_reply(value) {
            entries.push(reply_entry(lead, Channel::WhatsApp, format!("W.P_Replied_{i}"), value));
        }
    }
    if is_scalar_reply(&lead.email_replied) {
        entries.push(reply_entry(lead, Channel::Email, "Email Replied".to_string(), &lead.email_replied));
    }
    for (i, value) in &lead.extended.email_replied {
        if is_numbered_reply(value) {
            entries.push(reply_entry(lead, Channel::Email, format!("Email_Replied_{i}"), value));
        }
    }

    if entries.is_empty() && is_scalar_reply(&lead.replied) {
        entries.push(reply_entry(lead, Channel::Message, "Replied".to_string(), &lead.replied));
    }
    entries
}

/// All replies across `leads`, most recent first. Undated replies go last
/// and keep their consolidation order.
pub fn reply_feed(leads: &[CanonicalLead]) -> Vec<ReplyEntry> {
    let mut entries = leads.iter().flat_map(lead_replies).collect::<Vec<_>>();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
}
