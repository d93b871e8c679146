use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use profile_harvester::app::{
    App, DownloadOptions, DownloadResult, ImportOptions, ImportResult, ProgressSink,
    ResizeOptions, ResizeResult,
};
use profile_harvester::config::{ConfigLoader, ResolvedConfig};
use profile_harvester::counter::CountSummary;
use profile_harvester::domain::{Processing, QueueOrder};
use profile_harvester::encounters::CommandEncounterSource;
use profile_harvester::error::HarvestError;
use profile_harvester::fetcher::{CurlFetcher, FetcherKind, HttpFetcher, PhotoFetcher};
use profile_harvester::imaging::{DEFAULT_JPEG_QUALITY, IMPORT_JPEG_QUALITY};
use profile_harvester::output::{ConsoleOutput, JsonOutput, OutputMode};
use profile_harvester::scraper::{ScrapeOptions, ScrapeSummary};
use profile_harvester::shutdown::Shutdown;
use profile_harvester::store::Store;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Scrape profiles and download their photos into flat id-keyed directories")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./harvest.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    profiles_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    photos_dir: Option<Utf8PathBuf>,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Poll encounter pages, store new profiles and dislike every user")]
    Scrape(ScrapeArgs),
    #[command(about = "Download photos of stored profiles that are not on disk yet")]
    Download(DownloadArgs),
    #[command(about = "Shrink stored photos to thumbnails in place")]
    Resize(ResizeArgs),
    #[command(about = "Store user records read from stdin, one JSON object after another")]
    Import(ImportArgs),
    #[command(about = "Count distinct photos referenced by stored profiles")]
    Count,
}

#[derive(Args)]
struct ScrapeArgs {
    /// Stop after this many page requests
    #[arg(long)]
    max_pages: Option<u64>,

    #[arg(long)]
    max_consecutive_failures: Option<u32>,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long, value_enum, default_value_t = QueueOrder::RoundRobin)]
    order: QueueOrder,

    /// Take at most this many photos from each profile
    #[arg(long)]
    per_profile_limit: Option<usize>,

    /// Store a thumbnail instead of the original bytes
    #[arg(long)]
    thumbnail: bool,

    #[arg(long)]
    thumbnail_max: Option<u32>,

    /// JPEG quality of thumbnails (1-100)
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    quality: u8,

    /// Photo requests per second; 0 disables pacing
    #[arg(long)]
    rate: Option<f64>,
}

#[derive(Args)]
struct ResizeArgs {
    #[arg(long)]
    max: Option<u32>,

    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    quality: u8,
}

#[derive(Args)]
struct ImportArgs {
    /// Also fetch thumbnails of the imported profiles' photos
    #[arg(long)]
    download: bool,

    /// Photos fetched per imported profile
    #[arg(long, default_value_t = 2)]
    per_profile_limit: usize,

    #[arg(long, default_value_t = IMPORT_JPEG_QUALITY)]
    quality: u8,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::ConfigValue(_) => 2,
        HarvestError::TooManyFailures(_)
        | HarvestError::Command(_)
        | HarvestError::Http(_)
        | HarvestError::HttpStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Console
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(dir) = cli.profiles_dir {
        config.profiles_dir = dir;
    }
    if let Some(dir) = cli.photos_dir {
        config.photos_dir = dir;
    }
    tracing::debug!(profiles = %config.profiles_dir, photos = %config.photos_dir, "resolved config");

    let store = Store::new(config.profiles_dir.clone(), config.photos_dir.clone());
    let source = CommandEncounterSource::new(
        config.encounters_command.clone(),
        config.dislike_command.clone(),
    );
    let fetcher = build_fetcher(&config)?;
    let app = App::new(store, source, fetcher);
    let shutdown = Shutdown::install_signal_handler()?;
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Console => &ConsoleOutput,
        OutputMode::Json => &JsonOutput,
    };

    match cli.command {
        Commands::Scrape(args) => {
            let options = ScrapeOptions {
                max_pages: args.max_pages,
                max_consecutive_failures: args
                    .max_consecutive_failures
                    .or(config.max_consecutive_failures),
                backoff_initial: config.backoff_initial,
                backoff_max: config.backoff_max,
                pages_per_minute: config.pages_per_minute,
            };
            let result = app.scrape(&options, &shutdown, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_scrape(&result).into_diagnostic()?,
                OutputMode::Console => print_scrape_summary(&result),
            }
        }
        Commands::Download(args) => {
            let processing = if args.thumbnail {
                Processing::Thumbnail {
                    max: args.thumbnail_max.unwrap_or(config.thumbnail_max),
                    quality: args.quality,
                }
            } else {
                Processing::Raw
            };
            let options = DownloadOptions {
                order: args.order,
                per_profile_limit: args.per_profile_limit,
                processing,
                requests_per_second: rate_or_config(args.rate, &config),
                burst: config.burst,
            };
            let result = app.download(&options, &shutdown, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_download(&result).into_diagnostic()?,
                OutputMode::Console => print_download_summary(&result),
            }
        }
        Commands::Resize(args) => {
            let options = ResizeOptions {
                max: args.max.unwrap_or(config.thumbnail_max).max(1),
                quality: args.quality,
            };
            let result = app.resize(&options, &shutdown, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_resize(&result).into_diagnostic()?,
                OutputMode::Console => print_resize_summary(&result),
            }
        }
        Commands::Import(args) => {
            let download = args.download.then(|| DownloadOptions {
                order: QueueOrder::RoundRobin,
                per_profile_limit: Some(args.per_profile_limit),
                processing: Processing::Thumbnail {
                    max: config.thumbnail_max,
                    quality: args.quality,
                },
                requests_per_second: config.requests_per_second,
                burst: config.burst,
            });
            let options = ImportOptions { download };
            let result = app.import(std::io::stdin().lock(), &options, &shutdown, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_import(&result).into_diagnostic()?,
                OutputMode::Console => print_import_summary(&result),
            }
        }
        Commands::Count => {
            let result = app.count(sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_count(&result).into_diagnostic()?,
                OutputMode::Console => print_count_summary(&result),
            }
        }
    }
    Ok(())
}

fn rate_or_config(rate: Option<f64>, config: &ResolvedConfig) -> Option<f64> {
    match rate {
        Some(rate) if rate > 0.0 => Some(rate),
        Some(_) => None,
        None => config.requests_per_second,
    }
}

fn build_fetcher(config: &ResolvedConfig) -> Result<Box<dyn PhotoFetcher>, HarvestError> {
    let fetcher: Box<dyn PhotoFetcher> = match config.fetcher {
        FetcherKind::Curl => Box::new(CurlFetcher::new(
            config.curl_command.clone(),
            config.http_timeout,
        )),
        FetcherKind::Http => Box::new(HttpFetcher::new(config.http_timeout)?),
    };
    Ok(fetcher)
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

fn print_scrape_summary(result: &ScrapeSummary) {
    println!("{CYAN}scrape summary{RESET}");
    println!(
        "{GREEN}pages: {}  users seen: {}  new profiles: {}{RESET}",
        result.pages, result.users_seen, result.new_profiles
    );
    if result.skipped_users > 0 {
        println!("{YELLOW}users without a usable id: {}{RESET}", result.skipped_users);
    }
    if result.failures > 0 {
        println!("{YELLOW}failed requests: {}{RESET}", result.failures);
    }
    if result.cancelled {
        println!("{YELLOW}stopped by interrupt{RESET}");
    }
}

fn print_download_summary(result: &DownloadResult) {
    let run = &result.run;
    println!("{CYAN}download summary{RESET}");
    println!(
        "{GREEN}profiles: {}  photos queued: {}  fetched: {}  already present: {}{RESET}",
        result.profiles, run.queued, run.processed, run.skipped
    );
    if run.deferred > 0 {
        println!("{YELLOW}deferred by per-profile limit: {}{RESET}", run.deferred);
    }
    if run.failed > 0 || !result.unreadable_profiles.is_empty() {
        println!(
            "{YELLOW}failed photos: {}  unreadable profiles: {}{RESET}",
            run.failed,
            result.unreadable_profiles.len()
        );
    }
    if run.cancelled {
        println!("{YELLOW}stopped by interrupt{RESET}");
    }
}

fn print_resize_summary(result: &ResizeResult) {
    let run = &result.run;
    println!("{CYAN}resize summary{RESET}");
    println!(
        "{GREEN}photos: {}  resized: {}  unchanged: {}{RESET}",
        run.queued, run.processed, run.skipped
    );
    if run.failed > 0 {
        println!("{YELLOW}failed: {}{RESET}", run.failed);
    }
}

fn print_import_summary(result: &ImportResult) {
    println!("{CYAN}import summary{RESET}");
    println!(
        "{GREEN}records: {}  new profiles: {}  already stored: {}{RESET}",
        result.records, result.new_profiles, result.existing_profiles
    );
    if !result.skipped.is_empty() {
        println!("{YELLOW}skipped records: {}{RESET}", result.skipped.len());
    }
    if let Some(run) = &result.photos {
        println!(
            "{GREEN}photos queued: {}  fetched: {}  already present: {}{RESET}",
            run.queued, run.processed, run.skipped
        );
        if run.failed > 0 {
            println!("{YELLOW}failed photos: {}{RESET}", run.failed);
        }
    }
    if result.cancelled {
        println!("{YELLOW}stopped by interrupt{RESET}");
    }
}

fn print_count_summary(result: &CountSummary) {
    println!("found {} photos", result.distinct_photos);
    if result.unreadable_profiles > 0 {
        println!(
            "{YELLOW}skipped {} unreadable profiles{RESET}",
            result.unreadable_profiles
        );
    }
}
