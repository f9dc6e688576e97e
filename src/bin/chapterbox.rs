use std::process::ExitCode;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chapterbox::app::{App, DownloadReport, ProgressSink};
use chapterbox::catalog::MangadexCatalog;
use chapterbox::config::{
    ConfigLoader, ResolvedConfig, default_last_run_path, load_last_run, save_last_run,
};
use chapterbox::domain::MangaWithChapters;
use chapterbox::error::ChapterboxError;
use chapterbox::fetcher::{AbortSignal, BoundedFetcher};
use chapterbox::http::ReqwestHttpClient;
use chapterbox::output::{JsonOutput, OutputMode, TextOutput};
use chapterbox::pipeline::ChapterPipeline;
use chapterbox::sources::SourceResolver;
use chapterbox::store::Store;

#[derive(Parser)]
#[command(name = "chapterbox")]
#[command(about = "Download followed manga chapters as CBZ archives")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download unread chapters from followed manga since the last run")]
    Feed,
    #[command(about = "Download every chapter of one manga")]
    Full(FullArgs),
    #[command(about = "List manga recorded in the local library")]
    List,
}

#[derive(Args)]
struct FullArgs {
    #[arg(long)]
    url: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ChapterboxError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ChapterboxError) -> u8 {
    match error {
        ChapterboxError::MissingConfig(_)
        | ChapterboxError::ConfigRead(_)
        | ChapterboxError::ConfigParse(_)
        | ChapterboxError::InvalidConfig(_)
        | ChapterboxError::InvalidMangaUrl(_) => 2,
        ChapterboxError::Http(_)
        | ChapterboxError::HttpStatus { .. }
        | ChapterboxError::Catalog(_)
        | ChapterboxError::CatalogStatus { .. }
        | ChapterboxError::MissingManga(_) => 3,
        ChapterboxError::PartialFailure { .. } => 4,
        ChapterboxError::Cancelled => 130,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chapterbox=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;
    let http = ReqwestHttpClient::new()?;
    let mut catalog = MangadexCatalog::new(http.inner().clone(), &resolved.language);
    let app = build_app(&resolved, http)?;

    match cli.command.unwrap_or(Commands::Feed) {
        Commands::Feed => {
            let last_run_path = default_last_run_path()?;
            let started = Utc::now();
            let since = load_last_run(&last_run_path, started)?;
            catalog.login(&resolved.credentials)?;
            let feed = catalog.followed_feed(since)?;
            info!(since = %since, manga = feed.len(), "feed resolved");
            download(&app, &feed, &catalog, output_mode)?;
            save_last_run(&last_run_path, started)?;
            Ok(())
        }
        Commands::Full(args) => {
            catalog.login(&resolved.credentials)?;
            let manga = catalog.manga_chapters(&args.url)?;
            download(&app, &[manga], &catalog, output_mode)
        }
        Commands::List => {
            let result = app.list()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_list(&result).into_diagnostic(),
                OutputMode::Text => TextOutput::print_list(&result).into_diagnostic(),
            }
        }
    }
}

fn build_app(
    resolved: &ResolvedConfig,
    http: ReqwestHttpClient,
) -> Result<App<ReqwestHttpClient, Store>, ChapterboxError> {
    let store = Store::new(resolved.download_path.clone())?;
    let pipeline = ChapterPipeline::new(
        SourceResolver::with_default_sources(),
        http,
        BoundedFetcher::new(resolved.page_concurrency),
    );
    Ok(App::new(store.clone(), store, pipeline, &resolved.language))
}

fn download(
    app: &App<ReqwestHttpClient, Store>,
    manga: &[MangaWithChapters],
    catalog: &MangadexCatalog,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TextOutput,
    };
    let report = app.download_manga(manga, catalog, &AbortSignal::new(), sink)?;
    print_report(&report, output_mode)?;
    report.into_result()?;
    Ok(())
}

fn print_report(report: &DownloadReport, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => JsonOutput::print_report(report).into_diagnostic(),
        OutputMode::Text => TextOutput::print_report(report).into_diagnostic(),
    }
}
