use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use mtimport_core::chunks::locate_chunks;
use mtimport_core::config::{ImportOptions, ImporterConfig, load_config};
use mtimport_core::fetch::{HttpFetcher, OfflineFetcher};
use mtimport_core::pipeline::{ChunkOutcome, ChunkReport, ImportReport, check_chunks, run_import};
use mtimport_core::rewrite::BrokenKind;
use mtimport_core::runtime::{
    RunPaths, RunRequest, normalize_for_display, resolve_run_paths, resolve_site_target,
};
use mtimport_core::store::MemoryStore;
use mtimport_core::wordpress::{WordPressClient, WordPressClientConfig};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "mtimport.toml";
const LOG_ENV: &str = "MTIMPORT_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "mtimport",
    version,
    about = "Import Movable Type backups into WordPress"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Config file (default: ./mtimport.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "More log output (-v debug, -vv trace)")]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Import every chunk of a backup into the target site")]
    Import(ImportArgs),
    #[command(about = "List the chunks that belong to a backup")]
    Chunks(BackupArgs),
    #[command(about = "Sanitize and parse-check every chunk without importing")]
    Clean(BackupArgs),
}

#[derive(Debug, Args)]
struct BackupArgs {
    #[arg(long, value_name = "FILE", help = "First chunk of the backup, e.g. Backup-site-1.xml")]
    backup: Option<PathBuf>,
    #[arg(long, value_name = "DIR", help = "Directory holding the backup chunks")]
    import_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[command(flatten)]
    backup: BackupArgs,
    #[arg(long, value_name = "ID", help = "Blog id of the site to import into")]
    blog: Option<String>,
    #[arg(long, value_name = "HOST", help = "Configured host to import into")]
    import_hostname: Option<String>,
    #[arg(long, help = "Run against an in-memory store without network access")]
    dry_run: bool,
    #[arg(long, value_name = "PATH", help = "Write the run report as JSON")]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    load_env(&config_path);
    let config = load_config(&config_path)?;

    match cli.command {
        Some(Commands::Import(args)) => run_import_command(&config, cli.diagnostics, args),
        Some(Commands::Chunks(args)) => run_chunks(&config, cli.diagnostics, args),
        Some(Commands::Clean(args)) => run_clean(&config, cli.diagnostics, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `.env` in the working directory first, then beside the config file (overriding).
fn load_env(config_path: &Path) {
    dotenvy::dotenv().ok();
    let config_env = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(|parent| parent.join(".env"));
    if let Some(path) = config_env
        && path.exists()
    {
        let _ = dotenvy::from_path_override(&path);
    }
}

fn run_import_command(config: &ImporterConfig, diagnostics: bool, args: ImportArgs) -> Result<()> {
    let request = RunRequest {
        blog: args.blog,
        backup: args.backup.backup,
        import_dir: args.backup.import_dir,
        import_hostname: args.import_hostname,
    };
    let paths = resolve_paths(config, &request)?;
    let target = resolve_site_target(config, &request)?;
    let options = config.import_options()?;
    if diagnostics {
        println!("[diagnostics]\n{}", target.diagnostics());
        print_paths(&paths);
        print_options(&options);
    }

    let report = if args.dry_run {
        let mut store = MemoryStore::new(&target.url);
        let mut fetcher = OfflineFetcher;
        run_import(&mut store, &mut fetcher, &paths, &target, options, true)?
    } else {
        let client_config = WordPressClientConfig::from_config(config, &target);
        let mut fetcher = HttpFetcher::new(&client_config.user_agent, client_config.timeout_ms)?;
        let mut store = WordPressClient::new(client_config)?;
        let report = run_import(&mut store, &mut fetcher, &paths, &target, options, false)?;
        println!("request_count: {}", store.request_count());
        report
    };

    print_report(&report);
    if report.errors > 0 {
        warn!(errors = report.errors, "some records failed to import; see the log above");
    }
    if let Some(path) = args.report {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        println!("report: {}", normalize_for_display(&path));
    }
    Ok(())
}

fn run_chunks(config: &ImporterConfig, diagnostics: bool, args: BackupArgs) -> Result<()> {
    let paths = resolve_paths(config, &backup_request(args))?;
    if diagnostics {
        print_paths(&paths);
    }
    let chunks = locate_chunks(&paths.import_dir, &paths.backup_name)?;
    println!("import_dir: {}", normalize_for_display(&paths.import_dir));
    println!("chunks.count: {}", chunks.len());
    if chunks.is_empty() {
        println!("chunks: <none>");
    }
    for chunk in &chunks {
        println!("chunks.file: {} (#{})", chunk.file_name, chunk.index);
    }
    Ok(())
}

fn run_clean(config: &ImporterConfig, diagnostics: bool, args: BackupArgs) -> Result<()> {
    let paths = resolve_paths(config, &backup_request(args))?;
    if diagnostics {
        print_paths(&paths);
    }
    let reports = check_chunks(&paths)?;
    println!("import_dir: {}", normalize_for_display(&paths.import_dir));
    println!("chunks.count: {}", reports.len());
    for report in &reports {
        print_chunk(report);
    }
    Ok(())
}

fn backup_request(args: BackupArgs) -> RunRequest {
    RunRequest {
        backup: args.backup,
        import_dir: args.import_dir,
        ..RunRequest::default()
    }
}

fn resolve_paths(config: &ImporterConfig, request: &RunRequest) -> Result<RunPaths> {
    let cwd = env::current_dir().context("failed to resolve current directory")?;
    resolve_run_paths(request, config, &cwd)
}

fn print_paths(paths: &RunPaths) {
    println!("import_dir={}", normalize_for_display(&paths.import_dir));
    println!("backup={}", paths.backup_name);
    println!("staging_dir={}", normalize_for_display(&paths.staging_dir));
}

fn print_options(options: &ImportOptions) {
    println!("slug_separator={}", options.slug_separator);
    println!("autosizing={}", format_flag(options.autosizing));
    println!("content_width={}", options.content_width);
    println!("content_width_upscale={}", options.content_width_upscale);
    println!("placement_policy={}", options.placement_policy.as_str());
    println!("import_trackbacks={}", format_flag(options.import_trackbacks));
    println!("utc_offset={}", options.utc_offset);
}

fn print_chunk(report: &ChunkReport) {
    match &report.outcome {
        ChunkOutcome::Imported { records, ignored } => {
            println!("chunk.{}: {} ({records} records)", report.index, report.file_name);
            for (tag, count) in ignored {
                println!("chunk.{}.ignored.{tag}: {count}", report.index);
            }
        }
        ChunkOutcome::Skipped { diagnostics } => {
            println!("chunk.{}: {} (skipped)", report.index, report.file_name);
            for diagnostic in diagnostics {
                println!("chunk.{}.error: {diagnostic}", report.index);
            }
        }
    }
}

fn print_report(report: &ImportReport) {
    println!("backup: {}", report.backup);
    println!("dry_run: {}", format_flag(report.dry_run));
    println!(
        "old_site_url: {}",
        if report.old_site_url.is_empty() {
            "<unknown>"
        } else {
            &report.old_site_url
        }
    );
    println!("home_url: {}", report.home_url);
    println!("chunks.processed: {}", report.chunks_imported());
    println!("chunks.skipped: {}", report.chunks_skipped());
    for chunk in &report.chunks {
        print_chunk(chunk);
    }
    for (kind, counts) in &report.counts {
        println!(
            "{kind}: created={} existing={} skipped={} failed={}",
            counts.created, counts.existing, counts.skipped, counts.failed
        );
    }
    println!("mapping.users: {}", report.mapping.users);
    println!("mapping.posts: {}", report.mapping.posts);
    println!("mapping.assets: {}", report.mapping.assets);
    println!("mapping.tags: {}", report.mapping.tags);
    println!("mapping.categories: {}", report.mapping.categories);
    println!("errors: {}", report.errors);
    println!("broken.count: {}", report.broken.len());
    for broken in &report.broken {
        let kind = match broken.kind {
            BrokenKind::Image => "image",
            BrokenKind::Link => "link",
        };
        println!("broken.{kind}: {}", broken.url);
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
