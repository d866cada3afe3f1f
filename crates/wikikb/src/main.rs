use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, CommandFactory, Parser};
use tracing_subscriber::EnvFilter;
use wikikb_core::client::{MediaWikiClient, MediaWikiClientConfig};
use wikikb_core::collect::TermCollection;
use wikikb_core::config::{DEFAULT_CONFIG_FILENAME, KbConfig, load_config};
use wikikb_core::export::XlsxStore;
use wikikb_core::fetch::ThreadPause;
use wikikb_core::ledger::FileLedger;
use wikikb_core::run::{
    FullRunReport, MergeStatus, PatchTopicReport, RunSettings, Runner, write_term_list_report,
};

type KbRunner = Runner<MediaWikiClient, ThreadPause, FileLedger, XlsxStore>;

#[derive(Debug, Parser)]
#[command(
    name = "wikikb",
    version,
    about = "Build an offline term base from the pages linked by an encyclopedia topic"
)]
struct Cli {
    #[arg(value_name = "TOPIC", help = "Topic page whose linked terms are collected")]
    topic: Option<String>,
    #[arg(short = 'p', long, help = "Retry the failed terms recorded for every topic")]
    patch: bool,
    #[arg(short = 'c', long, help = "Only report how many related terms the topic has")]
    count: bool,
    #[arg(short = 'l', long, help = "Print the filtered term list without fetching content")]
    list: bool,
    #[arg(long, requires = "list", help = "Save the term list without asking")]
    save_list: bool,
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILENAME)]
    config: PathBuf,
    #[arg(long, value_name = "PATH", help = "Directory for exports and failure ledgers")]
    output_dir: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
    #[arg(short, long, conflicts_with = "verbose", help = "Only log errors")]
    quiet: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let config = load_config(&cli.config)?;
    if cli.patch {
        if let Some(topic) = &cli.topic {
            tracing::info!(topic, "patch mode ignores the topic argument");
        }
        return run_patch_mode(&cli, &config);
    }

    let Some(topic) = cli.topic.as_deref() else {
        Cli::command().print_help()?;
        println!();
        bail!("a topic is required unless --patch is given");
    };
    if cli.count || cli.list {
        run_analyze_mode(&cli, &config, topic)
    } else {
        run_full_mode(&cli, &config, topic)
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose == 0
        && let Ok(filter) = EnvFilter::try_from_default_env()
    {
        filter
    } else {
        match verbose {
            0 => EnvFilter::new("wikikb=info,wikikb_core=info,warn"),
            1 => EnvFilter::new("wikikb=debug,wikikb_core=debug,info"),
            2 => EnvFilter::new("wikikb=trace,wikikb_core=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn build_runner(cli: &Cli, config: &KbConfig) -> Result<KbRunner> {
    let mut settings = RunSettings::from_config(config);
    if let Some(output_dir) = &cli.output_dir {
        settings.output_dir = output_dir.clone();
    }
    settings.show_progress = !cli.quiet;

    let client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;
    let ledger = FileLedger::new(settings.output_dir.clone());
    Ok(Runner::new(client, ThreadPause, ledger, XlsxStore, settings))
}

fn run_full_mode(cli: &Cli, config: &KbConfig, topic: &str) -> Result<()> {
    let mut runner = build_runner(cli, config)?;
    let report = runner.run_full(topic)?;
    print_full_report(&report);
    Ok(())
}

fn run_patch_mode(cli: &Cli, config: &KbConfig) -> Result<()> {
    let mut runner = build_runner(cli, config)?;
    let reports = runner.run_patch()?;
    if reports.is_empty() {
        println!("no failed terms to patch");
        return Ok(());
    }
    for report in &reports {
        print_patch_report(report);
        println!();
    }
    let remaining = reports
        .iter()
        .map(|report| report.remaining.len())
        .sum::<usize>();
    println!("topics: {}", reports.len());
    println!("remaining_failed_terms: {remaining}");
    Ok(())
}

fn run_analyze_mode(cli: &Cli, config: &KbConfig, topic: &str) -> Result<()> {
    let mut runner = build_runner(cli, config)?;
    let collection = runner.run_analyze(topic);
    if collection.is_empty() {
        println!("topic: {topic}");
        println!("no related terms found");
        return Ok(());
    }

    println!("topic: {topic}");
    println!("related_links: {}", collection.total_links);
    println!("filtered_terms: {}", collection.terms.len());
    if !cli.list {
        return Ok(());
    }

    println!();
    for (index, term) in collection.terms.iter().enumerate() {
        println!("{:3}. {term}", index + 1);
    }
    if cli.save_list || confirm("save the term list to a file?")? {
        save_term_list(&runner.settings.output_dir, topic, &collection)?;
    }
    Ok(())
}

fn save_term_list(dir: &Path, topic: &str, collection: &TermCollection) -> Result<()> {
    let path = write_term_list_report(dir, topic, collection)?;
    println!("term_list: {}", normalize_path(&path));
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} (y/n): ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read answer")?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn print_full_report(report: &FullRunReport) {
    println!("topic: {}", report.topic);
    if report.collected == 0 {
        println!("no related terms collected");
        return;
    }
    println!("related_links: {}", report.total_links);
    println!("terms: {}", report.collected);
    println!("succeeded: {}", report.succeeded);
    println!("failed: {}", report.failed.len());
    match &report.export_path {
        Some(path) => println!("export: {}", normalize_path(path)),
        None => println!("export: none (no content fetched)"),
    }
    match &report.ledger_path {
        Some(path) => {
            println!("failed_terms: {}", normalize_path(path));
            println!("hint: run with --patch to retry failed terms");
        }
        None => println!("failed_terms: none"),
    }
}

fn print_patch_report(report: &PatchTopicReport) {
    println!("topic: {}", report.topic);
    println!("attempted: {}", report.attempted);
    println!("succeeded: {}", report.succeeded);
    println!("remaining: {}", report.remaining.len());
    if let Some(path) = &report.patch_path {
        println!("patch: {}", normalize_path(path));
    }
    match &report.merge {
        MergeStatus::NothingToMerge => {}
        MergeStatus::NoPriorExport => println!("merge: skipped (no prior export)"),
        MergeStatus::Merged { prior, merged } => {
            println!("merge: {} + patch", normalize_path(prior));
            println!("merged: {}", normalize_path(merged));
        }
        MergeStatus::Failed { error } => println!("merge: failed ({error})"),
    }
    println!(
        "ledger: {}",
        if report.ledger_cleared { "cleared" } else { "updated" }
    );
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
