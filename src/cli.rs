//! Command-line front end: flag parsing, progress display and output files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use markview::config::Settings;
use markview::document::{collect_documents, document_id_for, Document};
use markview::events::{self, BatchEvent, EventReceiver};
use markview::translate::{
    build_provider, BatchReport, JobOutcome, MemoryStore, ProviderKind, SqliteStore,
    TranslationCache, TranslationService,
};

/// Translate markdown documents with a persistent, content-addressed cache
#[derive(Parser, Debug)]
#[command(name = "markview")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/markview/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Translation provider: openai, deepseek or anthropic
    #[arg(long, global = true)]
    provider: Option<ProviderKind>,

    /// Model name (provider default when omitted)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Target language
    #[arg(long, global = true)]
    lang: Option<String>,

    /// Maximum documents translated at once
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Cache database path
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate markdown files or folders
    Translate {
        /// Files or folders to translate
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Write translations here instead of stdout
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
    /// Inspect or reset the translation cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Entry count and stored size
    Stats,
    /// Delete every entry
    Clear,
    /// Delete the entry for one document
    Remove { path: PathBuf },
}

pub async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    markview::init_tracing(cli.verbose, cli.log_json);

    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Translate { paths, out_dir } => {
            let cache = open_cache_or_memory(&settings);
            run_translate(&settings, cache, &paths, out_dir.as_deref()).await
        }
        Commands::Cache { action } => run_cache(&*open_cache(&settings)?, action),
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    let t = &mut settings.translation;

    if let Some(provider) = cli.provider {
        if provider != t.provider {
            // The key loaded so far belongs to the other provider.
            t.api_key = std::env::var(provider.env_key()).ok();
        }
        t.provider = provider;
    }
    if let Some(model) = &cli.model {
        t.model = Some(model.clone());
    }
    if let Some(lang) = &cli.lang {
        t.target_language = lang.clone();
    }
    if let Some(n) = cli.concurrency {
        t.concurrency = n;
    }
    if let Some(path) = &cli.cache {
        settings.cache.path = Some(path.clone());
    }

    settings.validate()?;
    Ok(settings)
}

fn open_cache(settings: &Settings) -> anyhow::Result<Arc<TranslationCache>> {
    let path = settings.cache_path();
    let store = SqliteStore::open(&path)
        .with_context(|| format!("cannot open cache at {}", path.display()))?;
    Ok(Arc::new(TranslationCache::with_hot_layer(
        Arc::new(store),
        settings.cache.hot_entries,
    )))
}

/// Translation still works without the database; results just do not persist.
fn open_cache_or_memory(settings: &Settings) -> Arc<TranslationCache> {
    open_cache(settings).unwrap_or_else(|e| {
        warn!(error = %format!("{e:#}"), "translation cache unavailable, using memory only");
        eprintln!("warning: {e:#}; translations will not be cached");
        Arc::new(TranslationCache::with_hot_layer(
            Arc::new(MemoryStore::new()),
            settings.cache.hot_entries,
        ))
    })
}

fn run_cache(cache: &TranslationCache, action: CacheAction) -> anyhow::Result<ExitCode> {
    match action {
        CacheAction::Stats => {
            let stats = cache.stats()?;
            println!("entries:    {}", stats.entries);
            println!("total size: {}", format_bytes(stats.total_size_bytes));
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            println!("removed {removed} entries");
        }
        CacheAction::Remove { path } => {
            let full = std::fs::canonicalize(&path).unwrap_or(path);
            let document_id = document_id_for(&full);
            if cache.remove(&document_id)? {
                println!("removed {document_id}");
            } else {
                println!("no entry for {document_id}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_translate(
    settings: &Settings,
    cache: Arc<TranslationCache>,
    paths: &[PathBuf],
    out_dir: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    let (documents, unreadable) = collect_documents(paths);
    for (path, e) in &unreadable {
        warn!(path = %path.display(), error = %e, "cannot read document");
        eprintln!("skipped {}: {e}", path.display());
    }
    if documents.is_empty() {
        bail!("no markdown documents found");
    }

    let provider = build_provider(&settings.provider_config())?;
    info!(
        provider = provider.name(),
        model = provider.model(),
        target_language = %settings.translation.target_language,
        "provider ready"
    );
    let service = TranslationService::new(provider, cache, settings.concurrency()?);

    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }

    if documents.len() == 1 && unreadable.is_empty() {
        let document = &documents[0];
        let result = service.translate(document).await?;
        match out_dir {
            Some(dir) => {
                let target = output_path(dir, common_root(&documents).as_deref(), document);
                write_translation(&target, &result.translated_text)?;
                eprintln!("wrote {}", target.display());
            }
            None => println!("{}", result.translated_text),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let (sender, receiver) = events::channel();
    let progress = progress_bar(documents.len());
    let display = tokio::spawn(show_progress(receiver, progress.clone()));

    let report = service.translate_batch(documents.clone(), &sender, &cancel).await;
    drop(sender);
    display.await.ok();
    let report = report?;

    if let Some(dir) = out_dir {
        let root = common_root(&documents);
        for (document, job) in documents.iter().zip(&report.jobs) {
            if let Some(text) = job.outcome.text() {
                write_translation(&output_path(dir, root.as_deref(), document), text)?;
            }
        }
    }

    print_summary(&report, out_dir);

    if report.failed() > 0 || !unreadable.is_empty() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb
}

async fn show_progress(mut receiver: EventReceiver, pb: ProgressBar) {
    while let Some(event) = receiver.recv().await {
        match event {
            BatchEvent::JobTranslating { document_id } => {
                pb.set_message(short_name(&document_id));
            }
            BatchEvent::JobFailed { document_id, error } => {
                pb.println(format!("failed {}: {error}", short_name(&document_id)));
            }
            BatchEvent::Progress { completed, .. } => pb.set_position(completed as u64),
            BatchEvent::Finished { .. } => pb.finish_and_clear(),
            BatchEvent::Started { .. } | BatchEvent::JobDone { .. } => {}
        }
    }
}

fn print_summary(report: &BatchReport, out_dir: Option<&Path>) {
    let translated = report.succeeded() - report.cache_hits();
    eprintln!(
        "{}/{} done: {} translated, {} cached, {} failed",
        report.completed,
        report.total,
        translated,
        report.cache_hits(),
        report.failed()
    );
    for job in &report.jobs {
        if let JobOutcome::Failed { reason } = &job.outcome {
            eprintln!("  failed {}: {reason}", job.document_id);
        }
    }
    if let Some(dir) = out_dir {
        eprintln!("translations written to {}", dir.display());
    }
}

/// Deepest folder containing every document. Outputs mirror the layout below it.
fn common_root(documents: &[Document]) -> Option<PathBuf> {
    let mut paths = documents.iter().map(|d| Path::new(&d.id));
    let mut root = paths.next()?.parent()?.to_path_buf();
    for path in paths {
        while !path.starts_with(&root) {
            root = root.parent()?.to_path_buf();
        }
    }
    Some(root)
}

fn output_path(out_dir: &Path, root: Option<&Path>, document: &Document) -> PathBuf {
    let id = Path::new(&document.id);
    let relative = root
        .and_then(|r| id.strip_prefix(r).ok())
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(short_name(&document.id)));
    out_dir.join(relative)
}

fn write_translation(target: &Path, text: &str) -> anyhow::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    std::fs::write(target, text).with_context(|| format!("cannot write {}", target.display()))
}

fn short_name(document_id: &str) -> String {
    Path::new(document_id)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| document_id.to_string())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
