//! Consolidation runs: table sources, template catalog, report output.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadloop_adapters::{consolidate, table_file_name, MappingContext, RawTables};
use leadloop_adapters::fields::DEFAULT_MAX_NUMBERED_INDEX;
use leadloop_core::{SourceLoop, TemplateEntry};
use leadloop_insights::templates::DEFAULT_AGENT_NAME;
use leadloop_insights::{lead_insights, reply_feed, summarize_loops, LeadInsight, LoopSummary, ReplyEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "leadloop-sync";

const BRIEF_RECENT_REPLIES: usize = 10;

#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    pub tables_dir: PathBuf,
    pub templates_path: PathBuf,
    pub reports_dir: PathBuf,
    pub agent_name: String,
    pub max_numbered_index: u32,
}

impl ConsolidationConfig {
    pub fn from_env() -> Self {
        let tables_dir = std::env::var("LEADLOOP_TABLES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./fixtures/sample"));
        Self {
            templates_path: std::env::var("LEADLOOP_TEMPLATES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| tables_dir.join("templates.yaml")),
            reports_dir: std::env::var("LEADLOOP_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./reports")),
            agent_name: std::env::var("LEADLOOP_AGENT_NAME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
            max_numbered_index: std::env::var("LEADLOOP_MAX_NUMBERED_INDEX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_NUMBERED_INDEX),
            tables_dir,
        }
    }

    /// Defaults for everything but the two directories.
    pub fn new(tables_dir: impl Into<PathBuf>, reports_dir: impl Into<PathBuf>) -> Self {
        let tables_dir = tables_dir.into();
        Self {
            templates_path: tables_dir.join("templates.yaml"),
            reports_dir: reports_dir.into(),
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            max_numbered_index: DEFAULT_MAX_NUMBERED_INDEX,
            tables_dir,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("table {path} is not valid JSON: {source}")]
    InvalidTable {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("template catalog {path} is not valid YAML: {source}")]
    InvalidCatalog {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Where the three raw loop tables come from.
#[async_trait]
pub trait TableSource: Send + Sync {
    fn describe(&self) -> String;
    /// `JsonValue::Null` when the source has nothing for this loop.
    async fn fetch_table(&self, source_loop: SourceLoop) -> Result<JsonValue, SourceError>;
}

/// A directory holding `intro.json`, `follow_up.json` and `nurture.json`.
#[derive(Debug, Clone)]
pub struct SnapshotDirSource {
    dir: PathBuf,
}

impl SnapshotDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TableSource for SnapshotDirSource {
    fn describe(&self) -> String {
        format!("snapshot dir {}", self.dir.display())
    }

    async fn fetch_table(&self, source_loop: SourceLoop) -> Result<JsonValue, SourceError> {
        let path = self.dir.join(table_file_name(source_loop));
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "table snapshot missing; treating as empty");
                return Ok(JsonValue::Null);
            }
            Err(source) => return Err(SourceError::Read { path, source }),
        };
        serde_json::from_str(&text).map_err(|source| SourceError::InvalidTable { path, source })
    }
}

/// Tables already held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticTableSource {
    tables: RawTables,
}

impl StaticTableSource {
    pub fn new(tables: RawTables) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl TableSource for StaticTableSource {
    fn describe(&self) -> String {
        "in-memory tables".to_string()
    }

    async fn fetch_table(&self, source_loop: SourceLoop) -> Result<JsonValue, SourceError> {
        Ok(self.tables.table(source_loop).clone())
    }
}

pub async fn fetch_tables(source: &dyn TableSource) -> Result<RawTables, SourceError> {
    let mut tables = RawTables::default();
    for source_loop in SourceLoop::ALL {
        tables.set_table(source_loop, source.fetch_table(source_loop).await?);
    }
    Ok(tables)
}

/// A missing catalog is an empty catalog; every stage then resolves to the
/// fallback copy.
pub async fn load_template_catalog(path: &Path) -> Result<Vec<TemplateEntry>, SourceError> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "template catalog missing");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(SourceError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(&text).map_err(|source| SourceError::InvalidCatalog {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source: String,
    pub leads: usize,
    pub replies: usize,
    pub templates: usize,
    pub loops: Vec<LoopSummary>,
    pub reports_dir: String,
    pub manifest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub files: Vec<ReportManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub struct ConsolidationPipeline {
    config: ConsolidationConfig,
    source: Box<dyn TableSource>,
}

impl ConsolidationPipeline {
    pub fn new(config: ConsolidationConfig) -> Self {
        let source = Box::new(SnapshotDirSource::new(config.tables_dir.clone()));
        Self { config, source }
    }

    pub fn with_source(mut self, source: Box<dyn TableSource>) -> Self {
        self.source = source;
        self
    }

    pub async fn run_once(&self) -> Result<ConsolidationRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("consolidation_run", %run_id);
        self.run_with_id(run_id).instrument(span).await
    }

    async fn run_with_id(&self, run_id: Uuid) -> Result<ConsolidationRunSummary> {
        let started_at = Utc::now();
        let source = self.source.describe();
        info!(%source, "loading loop tables");
        let tables = fetch_tables(self.source.as_ref())
            .await
            .with_context(|| format!("fetching tables from {source}"))?;
        let catalog = load_template_catalog(&self.config.templates_path)
            .await
            .context("loading template catalog")?;

        let ctx = MappingContext::new(started_at).with_max_numbered_index(self.config.max_numbered_index);
        let leads = consolidate(&tables, &ctx);
        let insights = lead_insights(&leads);
        let loops = summarize_loops(&insights);
        let feed = reply_feed(&leads);
        info!(leads = leads.len(), replies = feed.len(), "consolidated leads");

        let finished_at = Utc::now();
        let reports_dir = self.config.reports_dir.join(run_id.to_string());
        let brief = render_daily_brief(run_id, started_at, finished_at, &source, &loops, &feed, catalog.len());
        let manifest_path = write_reports(&reports_dir, run_id, &insights, &feed, &brief).await?;

        Ok(ConsolidationRunSummary {
            run_id,
            started_at,
            finished_at,
            source,
            leads: leads.len(),
            replies: feed.len(),
            templates: catalog.len(),
            loops,
            reports_dir: reports_dir.display().to_string(),
            manifest: manifest_path.display().to_string(),
        })
    }
}

pub async fn run_consolidation_once_from_env() -> Result<ConsolidationRunSummary> {
    ConsolidationPipeline::new(ConsolidationConfig::from_env()).run_once().await
}

pub fn render_daily_brief(
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    source: &str,
    loops: &[LoopSummary],
    feed: &[ReplyEntry],
    templates: usize,
) -> String {
    let leads: usize = loops.iter().map(|l| l.leads).sum();
    let mut lines = vec![
        "# Lead Loop Daily Brief".to_string(),
        String::new(),
        format!("- Run ID: `{run_id}`"),
        format!("- Started: {started_at}"),
        format!("- Finished: {finished_at}"),
        format!("- Source: {source}"),
        format!("- Leads: {leads}"),
        format!("- Catalog templates: {templates}"),
        String::new(),
        "## Loops".to_string(),
    ];
    for summary in loops {
        lines.push(format!(
            "- {}: {} leads, {} replied, {:.1}% average progress",
            summary.source_loop.display_name(),
            summary.leads,
            summary.replied,
            summary.average_progress
        ));
    }
    lines.push(String::new());
    lines.push("## Recent Replies".to_string());
    if feed.is_empty() {
        lines.push("- none".to_string());
    }
    for entry in feed.iter().take(BRIEF_RECENT_REPLIES) {
        let when = entry
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "undated".to_string());
        let first_line = entry.content.lines().next().unwrap_or_default();
        lines.push(format!(
            "- {when} {} ({}, {:?}): {first_line}",
            entry.lead_name,
            entry.source_loop.display_name(),
            entry.channel
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

async fn write_reports(
    reports_dir: &Path,
    run_id: Uuid,
    insights: &[LeadInsight],
    feed: &[ReplyEntry],
    brief: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let leads_path = reports_dir.join("leads.json");
    let bytes = serde_json::to_vec_pretty(insights).context("serializing leads")?;
    fs::write(&leads_path, bytes).await.context("writing leads.json")?;

    let feed_path = reports_dir.join("reply_feed.json");
    let bytes = serde_json::to_vec_pretty(feed).context("serializing reply feed")?;
    fs::write(&feed_path, bytes).await.context("writing reply_feed.json")?;

    let brief_path = reports_dir.join("daily_brief.md");
    fs::write(&brief_path, brief).await.context("writing daily_brief.md")?;

    let manifest = ReportManifest {
        schema_version: 1,
        run_id,
        files: vec![
            manifest_entry("leads", reports_dir, &leads_path).await?,
            manifest_entry("reply_feed", reports_dir, &feed_path).await?,
            manifest_entry("daily_brief", reports_dir, &brief_path).await?,
        ],
    };
    let manifest_path = reports_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

async fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ReportManifestFile> {
    let bytes = fs::read(path).await.with_context(|| format!("reading {}", path.display()))?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let rel = path.strip_prefix(reports_dir).unwrap_or(path).display().to_string();
    Ok(ReportManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

/// Summary of the most recent `runs` report directories under `reports_root`.
pub fn report_daily_markdown(runs: usize, reports_root: Option<PathBuf>) -> Result<String> {
    let reports_root = reports_root.unwrap_or_else(|| PathBuf::from("./reports"));
    let mut dirs = std::fs::read_dir(&reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();
    let dirs = dirs.into_iter().take(runs.max(1)).collect::<Vec<_>>();

    let mut lines = vec!["# Lead Loop Report".to_string(), String::new()];
    for dir in dirs {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let leads_path = dir.path().join("leads.json");
        let feed_path = dir.path().join("reply_feed.json");
        let manifest_path = dir.path().join("manifest.json");

        let leads: Vec<LeadInsight> = serde_json::from_str(
            &std::fs::read_to_string(&leads_path).with_context(|| format!("reading {}", leads_path.display()))?,
        )
        .with_context(|| format!("parsing {}", leads_path.display()))?;
        let replies = std::fs::read_to_string(&feed_path)
            .ok()
            .and_then(|text| serde_json::from_str::<Vec<JsonValue>>(&text).ok())
            .map(|entries| entries.len())
            .unwrap_or(0);

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- leads: {}", leads.len()));
        for summary in summarize_loops(&leads) {
            lines.push(format!(
                "  - {}: {} ({} replied)",
                summary.source_loop.display_name(),
                summary.leads,
                summary.replied
            ));
        }
        lines.push(format!("- replies: {replies}"));
        if manifest_path.exists() {
            lines.push(format!("- manifest: `{}`", manifest_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/sample")
            .canonicalize()
            .expect("sample fixtures")
    }

    #[tokio::test]
    async fn run_once_writes_reports_and_manifest() {
        let reports = tempfile::tempdir().unwrap();
        let pipeline = ConsolidationPipeline::new(ConsolidationConfig::new(sample_dir(), reports.path()));
        let summary = pipeline.run_once().await.unwrap();

        assert_eq!(summary.leads, 8);
        assert_eq!(summary.replies, 3);
        assert_eq!(summary.templates, 7);
        let counts = summary
            .loops
            .iter()
            .map(|l| (l.source_loop, l.leads, l.replied))
            .collect::<Vec<_>>();
        assert_eq!(
            counts,
            vec![
                (SourceLoop::Intro, 3, 2),
                (SourceLoop::FollowUp, 2, 1),
                (SourceLoop::Nurture, 3, 0),
            ]
        );

        let run_dir = reports.path().join(summary.run_id.to_string());
        for name in ["leads.json", "reply_feed.json", "daily_brief.md", "manifest.json"] {
            assert!(run_dir.join(name).exists(), "{name} missing");
        }
        let manifest: ReportManifest =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest.run_id, summary.run_id);
        assert_eq!(manifest.files.len(), 3);
        for file in &manifest.files {
            assert_eq!(file.sha256.len(), 64);
            let bytes = std::fs::read(run_dir.join(&file.path)).unwrap();
            assert_eq!(file.bytes, bytes.len() as u64);
        }

        let feed: Vec<ReplyEntry> =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join("reply_feed.json")).unwrap()).unwrap();
        let ids = feed.iter().map(|e| e.lead_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["F9", "intro-2", "L2"]);
    }

    #[tokio::test]
    async fn daily_markdown_lists_recent_runs() {
        let reports = tempfile::tempdir().unwrap();
        let pipeline = ConsolidationPipeline::new(ConsolidationConfig::new(sample_dir(), reports.path()));
        let summary = pipeline.run_once().await.unwrap();

        let md = report_daily_markdown(5, Some(reports.path().to_path_buf())).unwrap();
        assert!(md.contains(&format!("## Run `{}`", summary.run_id)));
        assert!(md.contains("- leads: 8"));
        assert!(md.contains("  - Follow Up: 2 (1 replied)"));
        assert!(md.contains("- replies: 3"));
    }

    #[tokio::test]
    async fn missing_snapshot_is_an_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("intro.json"), r#"[{"Lead ID": "L1", "Email_1": "Hi"}]"#).unwrap();
        let tables = fetch_tables(&SnapshotDirSource::new(dir.path())).await.unwrap();
        assert!(tables.table(SourceLoop::Intro).is_array());
        assert!(tables.table(SourceLoop::Nurture).is_null());
    }

    #[tokio::test]
    async fn missing_snapshot_directory_consolidates_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = SnapshotDirSource::new(dir.path().join("absent"));
        let tables = fetch_tables(&source).await.unwrap();
        let ctx = MappingContext::new(Utc::now());
        assert!(consolidate(&tables, &ctx).is_empty());
    }

    #[tokio::test]
    async fn invalid_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("follow_up.json"), "{not json").unwrap();
        let err = fetch_tables(&SnapshotDirSource::new(dir.path())).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidTable { .. }));
    }

    #[tokio::test]
    async fn catalog_accepts_body_alias_and_missing_file() {
        let catalog = load_template_catalog(&sample_dir().join("templates.yaml")).await.unwrap();
        assert_eq!(catalog.len(), 7);
        assert!(catalog[2].body().starts_with("Hi [Name],"));

        let dir = tempfile::tempdir().unwrap();
        let missing = load_template_catalog(&dir.path().join("templates.yaml")).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn static_source_runs_without_touching_tables_dir() {
        let reports = tempfile::tempdir().unwrap();
        let mut tables = RawTables::default();
        tables.set_table(SourceLoop::Nurture, json!([{ "Name": "Gil", "Email 1": "hello", "Week 2": "yes" }]));
        let config = ConsolidationConfig::new(reports.path().join("no-tables"), reports.path().join("out"));
        let summary = ConsolidationPipeline::new(config)
            .with_source(Box::new(StaticTableSource::new(tables)))
            .run_once()
            .await
            .unwrap();
        assert_eq!(summary.leads, 1);
        assert_eq!(summary.templates, 0);
        assert_eq!(summary.source, "in-memory tables");

        let leads: Vec<LeadInsight> = serde_json::from_str(
            &std::fs::read_to_string(Path::new(&summary.reports_dir).join("leads.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(leads[0].lead.id, "nurture-0");
        assert_eq!(leads[0].lead.stages_passed, vec!["Email 7"]);
        assert_eq!(leads[0].progress.label, "Stage 2");
    }
}
