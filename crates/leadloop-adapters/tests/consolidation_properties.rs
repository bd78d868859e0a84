use chrono::{TimeZone, Utc};
use leadloop_adapters::fields::resolve_string;
use leadloop_adapters::{consolidate, map_follow_up, map_nurture, table_file_name, MappingContext, RawTables};
use leadloop_core::{RawRecord, SourceLoop};
use serde_json::json;

fn ctx() -> MappingContext {
    MappingContext::new(Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).single().unwrap())
}

fn sample_tables() -> RawTables {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/sample");
    let mut tables = RawTables::default();
    for source_loop in SourceLoop::ALL {
        let text = std::fs::read_to_string(dir.join(table_file_name(source_loop))).expect("read table");
        tables.set_table(source_loop, serde_json::from_str(&text).expect("parse table"));
    }
    tables
}

#[test]
fn consolidate_is_idempotent() {
    let tables = sample_tables();
    let first = consolidate(&tables, &ctx());
    let second = consolidate(&tables, &ctx());
    assert_eq!(first, second);
}

#[test]
fn consolidate_orders_intro_then_follow_up_then_nurture() {
    let leads = consolidate(&sample_tables(), &ctx());
    let loops = leads.iter().map(|l| l.source_loop).collect::<Vec<_>>();
    let mut sorted = loops.clone();
    sorted.sort();
    assert_eq!(loops, sorted);
    assert_eq!(loops.first(), Some(&SourceLoop::Intro));
    assert_eq!(loops.last(), Some(&SourceLoop::Nurture));
}

#[test]
fn follow_up_local_email_one_is_global_email_four() {
    let rec = RawRecord::new().with("Email_1", "hello");
    let lead = map_follow_up(&rec, 0, &ctx());
    assert_eq!(lead.stages_passed, vec!["Email 4".to_string()]);
    assert!(lead.stage_content("Email 1").is_none());
}

#[test]
fn nurture_local_email_one_is_global_email_seven() {
    let rec = RawRecord::new().with("Email 1", "hello");
    let lead = map_nurture(&rec, 0, &ctx());
    assert_eq!(lead.stages_passed, vec!["Email 7".to_string()]);
}

#[test]
fn global_email_numbers_stay_within_loop_ranges() {
    for lead in consolidate(&sample_tables(), &ctx()) {
        for stage in &lead.stages_passed {
            let Some(n) = stage.strip_prefix("Email ").and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            let range = match lead.source_loop {
                SourceLoop::Intro => 1..=3,
                SourceLoop::FollowUp => 4..=6,
                SourceLoop::Nurture => 7..=15,
            };
            assert!(range.contains(&n), "{} in {:?}", stage, lead.source_loop);
        }
    }
}

#[test]
fn resolver_matches_punctuation_variants() {
    let rec = RawRecord::from_value(json!({ "W_P_1": "x" })).unwrap();
    assert_eq!(resolve_string(&rec, &["W.P_1"]).as_deref(), Some("x"));
}

#[test]
fn empty_tables_yield_no_leads() {
    assert!(consolidate(&RawTables::default(), &ctx()).is_empty());
}
