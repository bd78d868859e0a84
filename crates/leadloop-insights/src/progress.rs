//! Completion of a lead through its loop.

use std::sync::OnceLock;

use leadloop_core::{CanonicalLead, ProgressSummary, SourceLoop};
use regex::Regex;

/// Intro/Follow Up milestones. A group is complete when any of its stages
/// has been passed.
pub const MILESTONE_GROUPS: [(&str, &[&str]); 7] = [
    ("Stage 1", &["Email 1", "WhatsApp 1"]),
    ("Stage 2", &["Email 2", "WhatsApp 2"]),
    ("Stage 3", &["Voice 1"]),
    ("Stage 4", &["Email 3", "Voice 2"]),
    ("Stage 5", &["FollowUp 48 Hr"]),
    ("Stage 6", &["Email 4", "Email 5"]),
    ("Stage 7", &["Email 6", "WhatsApp FollowUp"]),
];

/// Steps counted towards the current Nurture week.
pub const NURTURE_WEEK_STEPS: [&str; 6] = [
    "Email 7",
    "Email 8",
    "Email 9",
    "WhatsApp 1",
    "WhatsApp 2",
    "WhatsApp FollowUp",
];

pub const NURTURE_TOTAL_WEEKS: u32 = 3;

const NEW_LABEL: &str = "New";
const NURTURE_LABEL: &str = "Nurture";

fn week_re() -> &'static Regex {
    static WEEK_RE: OnceLock<Regex> = OnceLock::new();
    WEEK_RE.get_or_init(|| Regex::new(r"(?i)Week (\d+)").expect("valid week regex"))
}

/// The loop the lead was mapped from picks the algorithm; the stage list is
/// never used to guess it.
pub fn progress_of(lead: &CanonicalLead) -> ProgressSummary {
    match lead.source_loop {
        SourceLoop::Intro | SourceLoop::FollowUp => milestone_progress(lead),
        SourceLoop::Nurture => linear_progress(lead),
    }
}

pub fn milestone_progress(lead: &CanonicalLead) -> ProgressSummary {
    let completed = MILESTONE_GROUPS
        .iter()
        .filter(|(_, criteria)| criteria.iter().any(|stage| lead.has_stage(stage)))
        .map(|(name, _)| *name)
        .collect::<Vec<_>>();
    let percentage = completed.len() as f64 / MILESTONE_GROUPS.len() as f64 * 100.0;
    ProgressSummary {
        percentage,
        label: completed.last().copied().unwrap_or(NEW_LABEL).to_string(),
    }
}

pub fn linear_progress(lead: &CanonicalLead) -> ProgressSummary {
    let parsed_week = lead
        .current_week
        .as_deref()
        .and_then(|w| week_re().captures(w))
        // A digit run too long for u32 is still a week number.
        .map(|caps| caps[1].parse::<u32>().unwrap_or(u32::MAX));
    let week = parsed_week.unwrap_or(1).clamp(1, NURTURE_TOTAL_WEEKS);

    let steps = NURTURE_WEEK_STEPS
        .iter()
        .filter(|stage| lead.has_stage(stage))
        .count();
    let fraction = steps as f64 / NURTURE_WEEK_STEPS.len() as f64;
    let percentage =
        ((f64::from(week - 1) + fraction) / f64::from(NURTURE_TOTAL_WEEKS) * 100.0).clamp(0.0, 100.0);

    let label = match (parsed_week, lead.current_week.as_deref()) {
        (Some(_), _) => format!("Stage {week}"),
        (None, Some(raw)) if !raw.trim().is_empty() => raw.to_string(),
        _ => NURTURE_LABEL.to_string(),
    };
    ProgressSummary { percentage, label }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn lead(source_loop: SourceLoop, stages: &[&str]) -> CanonicalLead {
        let mut lead = CanonicalLead::new(
            "L1",
            source_loop,
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap(),
        );
        for stage in stages {
            lead.push_stage(*stage, "x");
        }
        lead
    }

    #[test]
    fn intro_without_milestones_is_new() {
        let got = progress_of(&lead(SourceLoop::Intro, &[]));
        assert_eq!(got.percentage, 0.0);
        assert_eq!(got.label, "New");
    }

    #[test]
    fn one_group_is_one_seventh() {
        let got = progress_of(&lead(SourceLoop::Intro, &["Email 1", "WhatsApp 1"]));
        assert!((got.percentage - 100.0 / 7.0).abs() < 1e-9);
        assert_eq!(got.label, "Stage 1");
    }

    #[test]
    fn label_is_highest_completed_group_even_with_gaps() {
        let got = progress_of(&lead(SourceLoop::Intro, &["WhatsApp 1", "FollowUp 48 Hr"]));
        assert!((got.percentage - 200.0 / 7.0).abs() < 1e-9);
        assert_eq!(got.label, "Stage 5");
    }

    #[test]
    fn follow_up_loop_uses_milestones() {
        let got = progress_of(&lead(SourceLoop::FollowUp, &["Email 4", "WhatsApp FollowUp"]));
        assert!((got.percentage - 200.0 / 7.0).abs() < 1e-9);
        assert_eq!(got.label, "Stage 7");
    }

    #[test]
    fn nurture_week_three_with_all_steps_is_complete() {
        let mut l = lead(SourceLoop::Nurture, &NURTURE_WEEK_STEPS);
        l.current_week = Some("Week 3".to_string());
        let got = progress_of(&l);
        assert!((got.percentage - 100.0).abs() < 1e-9);
        assert_eq!(got.label, "Stage 3");
    }

    #[test]
    fn nurture_defaults_to_week_one() {
        let got = progress_of(&lead(SourceLoop::Nurture, &["Email 7", "Email 8", "WhatsApp 1"]));
        assert!((got.percentage - 50.0 / 3.0).abs() < 1e-9);
        assert_eq!(got.label, "Nurture");
    }

    #[test]
    fn nurture_week_is_case_insensitive_and_clamped() {
        let mut l = lead(SourceLoop::Nurture, &[]);
        l.current_week = Some("week 7".to_string());
        let got = progress_of(&l);
        assert!((got.percentage - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(got.label, "Stage 3");
    }

    #[test]
    fn overlong_week_number_clamps_to_last_week() {
        let mut l = lead(SourceLoop::Nurture, &[]);
        l.current_week = Some("Week 99999999999".to_string());
        let got = progress_of(&l);
        assert!((got.percentage - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(got.label, "Stage 3");
    }

    #[test]
    fn unparseable_week_keeps_raw_label() {
        let mut l = lead(SourceLoop::Nurture, &["Email 9"]);
        l.current_week = Some("Onboarding".to_string());
        let got = progress_of(&l);
        assert_eq!(got.label, "Onboarding");
        assert!((got.percentage - 100.0 / 18.0).abs() < 1e-9);
    }

    #[test]
    fn nurture_lead_with_intro_stage_names_is_not_reclassified() {
        let got = progress_of(&lead(SourceLoop::Nurture, &["Email 1", "Voice 1"]));
        assert_eq!(got.percentage, 0.0);
        assert_eq!(got.label, "Nurture");
    }
}
