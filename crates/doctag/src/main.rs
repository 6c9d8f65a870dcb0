use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use doctag_core::checkpoint::Checkpoint;
use doctag_core::classify::{REDIRECT_CORPUS, is_redirect, redirect_corpus_failures};
use doctag_core::config::{DEFAULT_CONFIG_PATH, TaggerConfig, load_config};
use doctag_core::crawl::{CrawlReport, inspect_checkpoint, reset_checkpoint, run_crawl_pass};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(
    name = "doctag",
    version,
    about = "Add the documentation subpage marker to /doc pages, one batch per run"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Process the next batch and advance the checkpoint")]
    Run(RunArgs),
    Checkpoint(CheckpointArgs),
    #[command(name = "self-test", about = "Check redirect detection against known samples")]
    SelfTest,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct CheckpointArgs {
    #[command(subcommand)]
    command: CheckpointSubcommand,
}

#[derive(Debug, Subcommand)]
enum CheckpointSubcommand {
    Show,
    #[command(about = "Clear the checkpoint so the next run starts at the beginning")]
    Reset,
}

struct Runtime {
    project_root: PathBuf,
    config: TaggerConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Run(args)) => {
            let runtime = load_runtime(cli.project_root.as_deref(), cli.config.as_deref())?;
            run_pass(&runtime, args)
        }
        Some(Commands::Checkpoint(CheckpointArgs { command })) => {
            let runtime = load_runtime(cli.project_root.as_deref(), cli.config.as_deref())?;
            match command {
                CheckpointSubcommand::Show => run_checkpoint_show(&runtime),
                CheckpointSubcommand::Reset => run_checkpoint_reset(&runtime),
            }
        }
        Some(Commands::SelfTest) => run_self_test(),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_runtime(project_root: Option<&Path>, config: Option<&Path>) -> Result<Runtime> {
    dotenvy::dotenv().ok();

    let project_root = match project_root {
        Some(path) => path.to_path_buf(),
        None => env::current_dir().context("failed to read current directory")?,
    };
    let project_env = project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let config_path = match config {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => project_root.join(path),
        None => project_root.join(DEFAULT_CONFIG_PATH),
    };
    let config = load_config(&config_path)?;
    Ok(Runtime {
        project_root,
        config,
    })
}

fn run_pass(runtime: &Runtime, args: RunArgs) -> Result<()> {
    let report = run_crawl_pass(&runtime.config, &runtime.project_root)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &CrawlReport) {
    println!("doctag run");
    println!("resumed_from: {}", display_title(&report.resumed_from));
    println!("listed: {}", report.listed);
    for page in &report.pages {
        let outcome = page.outcome.map(|outcome| outcome.as_str()).unwrap_or("error");
        println!("page.{}: {}", outcome, page.doc_title);
    }
    println!("tagged: {}", report.tagged);
    println!("already_tagged: {}", report.already_tagged);
    println!("skipped_redirects: {}", report.skipped_redirects);
    println!("next_checkpoint: {}", display_title(&report.next_checkpoint));
    println!("walk_complete: {}", format_flag(report.walk_complete));
    println!("request_count: {}", report.request_count);
}

fn run_checkpoint_show(runtime: &Runtime) -> Result<()> {
    let status = inspect_checkpoint(&runtime.config, &runtime.project_root)?;

    println!("checkpoint show");
    println!("store: {}", status.store);
    println!("title: {}", display_title(&status.checkpoint));
    println!("editor: {}", display_field(&status.checkpoint.editor));
    println!("timestamp: {}", display_field(&status.checkpoint.timestamp));
    Ok(())
}

fn run_checkpoint_reset(runtime: &Runtime) -> Result<()> {
    let store = reset_checkpoint(&runtime.config, &runtime.project_root)?;

    println!("checkpoint reset");
    println!("store: {store}");
    Ok(())
}

fn run_self_test() -> Result<()> {
    println!("redirect self-test");
    let failures = redirect_corpus_failures();
    for (text, _) in REDIRECT_CORPUS {
        let status = if failures.contains(text) { "FAIL" } else { "ok" };
        println!("{status}: {text} (redirect: {})", format_flag(is_redirect(text)));
    }
    println!("cases: {}", REDIRECT_CORPUS.len());
    println!("failures: {}", failures.len());
    if !failures.is_empty() {
        bail!("redirect self-test failed on {} case(s)", failures.len());
    }
    Ok(())
}

fn display_title(checkpoint: &Checkpoint) -> &str {
    if checkpoint.is_empty() {
        "<start of namespace>"
    } else {
        &checkpoint.title
    }
}

fn display_field(value: &str) -> &str {
    if value.is_empty() { "<none>" } else { value }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
