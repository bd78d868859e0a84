use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use leadloop_adapters::{consolidate, MappingContext};
use leadloop_core::SourceLoop;
use leadloop_insights::{lead_insights, TemplateResolver};
use leadloop_sync::{
    fetch_tables, load_template_catalog, report_daily_markdown, ConsolidationConfig, ConsolidationPipeline,
    SnapshotDirSource,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "leadloop-cli")]
#[command(about = "Lead Loop consolidation command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Consolidate the loop tables and write a report run.
    Consolidate,
    /// Print progress and reply status for every lead.
    Leads {
        /// intro, followup or nurture
        #[arg(long = "loop")]
        source_loop: Option<String>,
    },
    /// Summarize the most recent report runs.
    Report {
        #[arg(long, default_value_t = 1)]
        runs: usize,
    },
    /// Render the catalog template for a global stage.
    Template {
        #[arg(long)]
        stage: String,
        #[arg(long, default_value = "")]
        lead: String,
    },
}

fn parse_loop(tag: &str) -> Result<SourceLoop> {
    match SourceLoop::ALL.into_iter().find(|l| l.tag().eq_ignore_ascii_case(tag)) {
        Some(source_loop) => Ok(source_loop),
        None => bail!("unknown loop {tag:?}; expected intro, followup or nurture"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = ConsolidationConfig::from_env();

    match cli.command.unwrap_or(Commands::Consolidate) {
        Commands::Consolidate => {
            let summary = ConsolidationPipeline::new(config).run_once().await?;
            println!(
                "consolidation complete: run_id={} leads={} replies={} reports={}",
                summary.run_id, summary.leads, summary.replies, summary.reports_dir
            );
        }
        Commands::Leads { source_loop } => {
            let only = source_loop.as_deref().map(parse_loop).transpose()?;
            let tables = fetch_tables(&SnapshotDirSource::new(config.tables_dir.clone())).await?;
            let ctx = MappingContext::new(Utc::now()).with_max_numbered_index(config.max_numbered_index);
            let leads = consolidate(&tables, &ctx);
            info!(leads = leads.len(), dir = %config.tables_dir.display(), "consolidated snapshot tables");
            for insight in lead_insights(&leads)
                .into_iter()
                .filter(|i| only.map_or(true, |l| i.lead.source_loop == l))
            {
                println!(
                    "{}\t{}\t{}\t{:.1}%\t{}\t{}",
                    insight.lead.id,
                    insight.lead.display_name(),
                    insight.lead.source_loop,
                    insight.progress.percentage,
                    insight.progress.label,
                    if insight.replied { "replied" } else { "-" }
                );
            }
        }
        Commands::Report { runs } => {
            let md = report_daily_markdown(runs, Some(config.reports_dir))?;
            println!("{md}");
        }
        Commands::Template { stage, lead } => {
            let catalog = load_template_catalog(&config.templates_path).await?;
            let resolved = TemplateResolver::new(config.agent_name).resolve(&stage, &lead, &catalog);
            println!("Loop: {}", resolved.loop_name);
            println!("Subject: {}", resolved.subject);
            println!();
            println!("{}", resolved.content);
        }
    }

    Ok(())
}
