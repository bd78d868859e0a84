//! Read-only queries over consolidated leads: replies, progress, templates
//! and timelines.

pub mod progress;
pub mod replies;
pub mod templates;
pub mod timeline;

use leadloop_core::{CanonicalLead, ProgressSummary, SourceLoop};
use serde::{Deserialize, Serialize};

pub use progress::progress_of;
pub use replies::{has_email_replied, has_replied, has_whatsapp_replied};
pub use templates::{resolve_template, ResolvedTemplate, TemplateResolver};
pub use timeline::{reply_feed, timeline, ReplyEntry, TimelineEvent};

pub const CRATE_NAME: &str = "leadloop-insights";

/// A lead together with its derived status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadInsight {
    pub lead: CanonicalLead,
    pub progress: ProgressSummary,
    pub replied: bool,
}

pub fn lead_insights(leads: &[CanonicalLead]) -> Vec<LeadInsight> {
    leads
        .iter()
        .map(|lead| LeadInsight {
            progress: progress_of(lead),
            replied: has_replied(lead),
            lead: lead.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSummary {
    pub source_loop: SourceLoop,
    pub leads: usize,
    pub replied: usize,
    pub average_progress: f64,
}

/// One summary per loop, in consolidation order, including empty loops.
pub fn summarize_loops(insights: &[LeadInsight]) -> Vec<LoopSummary> {
    SourceLoop::ALL
        .iter()
        .map(|source_loop| {
            let members = insights
                .iter()
                .filter(|i| i.lead.source_loop == *source_loop)
                .collect::<Vec<_>>();
            let total: f64 = members.iter().map(|i| i.progress.percentage).sum();
            LoopSummary {
                source_loop: *source_loop,
                leads: members.len(),
                replied: members.iter().filter(|i| i.replied).count(),
                average_progress: if members.is_empty() {
                    0.0
                } else {
                    total / members.len() as f64
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use leadloop_adapters::{map_intro, MappingContext};
    use leadloop_core::RawRecord;
    use serde_json::json;

    fn ctx() -> MappingContext {
        MappingContext::new(Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).single().unwrap())
    }

    #[test]
    fn ann_scenario_end_to_end() {
        let rec = RawRecord::from_value(json!({
            "Lead ID": "L1",
            "Name": "Ann",
            "Email_1": "Hi Ann",
            "W.P_1": "ping",
            "Replied": "No",
        }))
        .unwrap();
        let lead = map_intro(&rec, 0, &ctx());
        assert!(!has_replied(&lead));
        let progress = progress_of(&lead);
        assert!((progress.percentage - 14.3).abs() < 0.05);
        assert_eq!(progress.label, "Stage 1");
    }

    #[test]
    fn loop_summaries_cover_every_loop() {
        let rec = RawRecord::new().with("Email_1", "Hi").with("Replied", "Yes");
        let insights = lead_insights(&[map_intro(&rec, 0, &ctx()), map_intro(&RawRecord::new(), 1, &ctx())]);
        let summaries = summarize_loops(&insights);
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].leads, 2);
        assert_eq!(summaries[0].replied, 1);
        assert!((summaries[0].average_progress - 100.0 / 14.0).abs() < 1e-9);
        assert_eq!(summaries[2].leads, 0);
        assert_eq!(summaries[2].average_progress, 0.0);
    }
}
