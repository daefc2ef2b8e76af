//! paratrans - streaming paragraph translation through a local ollama
//!
//! Entry point for the command line: one-off document translation, the
//! JSON-lines service mode, and settings management.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{debug, info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use paratrans::cancel::CancellationToken;
use paratrans::cli::{Args, Commands, SettingsAction};
use paratrans::config::{GlobalSettingsUpdate, SettingsStore, SiteSettingsUpdate};
use paratrans::events::{ChannelSink, EventSink, FnSink, SinkError, TracingSink, TranslationEvent};
use paratrans::extract::Document;
use paratrans::job::{JobRunner, TranslationJob, UnitId};
use paratrans::languages::{self, SUPPORTED_LANGUAGES};
use paratrans::stdio::StdioServer;
use paratrans::translate::{self, OllamaClient, TranslationSettings};

const DATA_DIR: &str = ".paratrans";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    let settings_path = resolve_settings_path(args.config.as_deref())?;
    let mut store = SettingsStore::open(&settings_path)?;

    match args.command {
        Commands::Translate {
            input,
            output,
            target_lang,
            source_lang,
            domain,
            events,
        } => {
            let text = read_input(&input)?;
            let document = Document::parse(&text);
            let effective = store.effective(domain.as_deref());

            let mut job = TranslationJob::new(
                document.units(),
                target_lang.unwrap_or_else(|| effective.global.target_lang.clone()),
            );
            job.source_language = source_lang;
            if languages::find(&job.target_language).is_none() {
                warn!("Target language '{}' is not in the supported list", job.target_language);
            }
            info!(
                "Translating {} of {} paragraphs from {} to {}",
                job.units.len(),
                document.blocks().len(),
                input,
                job.target_language
            );

            let token = CancellationToken::new();
            let client = OllamaClient::new(
                TranslationSettings::from(&effective.global),
                store.client().clone(),
                token.clone(),
            )?;

            {
                let token = token.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupted, cancelling translation");
                        token.cancel();
                    }
                });
            }

            if events {
                let sink = FnSink(|event: TranslationEvent| -> std::result::Result<(), SinkError> {
                    write_json_line(&mut std::io::stdout().lock(), &event)
                        .map_err(|e| SinkError::Delivery(e.to_string()))
                });
                let runner = JobRunner::new(Arc::new(client), Arc::new(sink), token);
                let result = runner.run(&job).await;
                if let Err(e) = write_json_line(&mut std::io::stdout().lock(), &result) {
                    debug!("Could not write job result: {}", e);
                }
                return Ok(());
            }

            let (sink, rx) = ChannelSink::channel();
            let renderer = tokio::spawn(render_progress(rx, job.units.len() as u64));

            let runner = JobRunner::new(Arc::new(client), Arc::new(sink), token);
            let result = runner.run(&job).await;
            drop(runner);

            let translations = renderer.await?;
            let rendered = document.render(&translations);
            match output {
                Some(path) => {
                    std::fs::write(&path, format!("{}\n", rendered))
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Wrote translation to {}", path.display());
                }
                None => writeln!(std::io::stdout().lock(), "{}", rendered)?,
            }

            if result.cancelled {
                anyhow::bail!("Translation cancelled");
            }
        }
        Commands::Serve => {
            info!("Serving JSON-lines requests on stdin");
            let server = StdioServer::new(store);
            server
                .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await?;
        }
        Commands::Check => {
            let status =
                translate::check_connection(&store.global().ollama_url, store.client().probe_timeout())
                    .await;
            if status.connected {
                println!(
                    "Connected to {} ({} models)",
                    store.global().ollama_url,
                    status.models.len()
                );
            } else {
                anyhow::bail!(
                    "Cannot connect to Ollama at {}. Please make sure Ollama is running.",
                    store.global().ollama_url
                );
            }
        }
        Commands::Models => {
            let status =
                translate::check_connection(&store.global().ollama_url, store.client().probe_timeout())
                    .await;
            if !status.connected {
                anyhow::bail!("Cannot connect to Ollama at {}", store.global().ollama_url);
            }
            let current = &store.global().model;
            for model in &status.models {
                let marker = if model == current { "*" } else { " " };
                println!("{} {}", marker, model);
            }
        }
        Commands::Languages => {
            println!("{:<8} {:<20}", "Code", "Language");
            println!("{}", "-".repeat(28));
            for language in SUPPORTED_LANGUAGES {
                println!("{:<8} {:<20}", language.code, language.name);
            }
        }
        Commands::Settings { action } => match action {
            SettingsAction::Show { domain } => {
                let effective = store.effective(domain.as_deref());
                println!("{}", toml::to_string_pretty(&effective)?);
                println!("# {}", store.path().display());
            }
            SettingsAction::Set {
                target_lang,
                model,
                temperature,
                custom_prompt,
                ollama_url,
            } => {
                let global = store.update_global(GlobalSettingsUpdate {
                    target_lang,
                    model,
                    temperature,
                    custom_prompt: custom_prompt.map(|p| Some(p).filter(|p| !p.is_empty())),
                    ollama_url,
                })?;
                println!("{}", toml::to_string_pretty(&global)?);
            }
            SettingsAction::Site {
                domain,
                auto_translate,
                model,
                target_lang,
            } => {
                let site = store.update_site(
                    &domain,
                    SiteSettingsUpdate {
                        auto_translate,
                        model,
                        target_lang,
                    },
                )?;
                println!("{}", toml::to_string_pretty(&site)?);
            }
            SettingsAction::RemoveSite { domain } => {
                if store.remove_site(&domain)? {
                    println!("Removed settings for {}", domain);
                } else {
                    println!("No settings for {}", domain);
                }
            }
        },
    }

    Ok(())
}

/// Drive a progress bar from job events and collect finished translations.
async fn render_progress(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<TranslationEvent>,
    total: u64,
) -> HashMap<UnitId, String> {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut translations = HashMap::new();
    while let Some(event) = rx.recv().await {
        let _ = TracingSink.emit(event.clone());
        match event {
            TranslationEvent::Progress { current, .. } => {
                bar.set_position(current.saturating_sub(1) as u64);
            }
            TranslationEvent::PartialResult {
                paragraph_id,
                text,
                done: true,
            } => {
                translations.insert(paragraph_id, text);
                bar.inc(1);
            }
            TranslationEvent::Status {
                paragraph_id,
                error: Some(error),
                ..
            } => {
                bar.set_message(format!("{}: {}", paragraph_id, error));
            }
            _ => {}
        }
    }

    bar.finish_and_clear();
    translations
}

/// Write `value` as one JSON line. Fails instead of panicking when the
/// reader has gone away.
fn write_json_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> std::io::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    out.flush()
}

fn read_input(input: &str) -> Result<String> {
    let mut text = String::new();
    if input == "-" {
        std::io::stdin().read_to_string(&mut text)?;
    } else {
        text = std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))?;
    }
    Ok(text)
}

/// `--config` wins, then `paratrans.toml` in the current directory, then the
/// data directory.
fn resolve_settings_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let local = Path::new("paratrans.toml");
    if local.exists() {
        info!("Found paratrans.toml in current directory");
        return Ok(local.to_path_buf());
    }

    Ok(std::env::current_dir()?.join(DATA_DIR).join("settings.toml"))
}

/// Setup logging to stderr and a daily log file. Stdout is reserved for
/// output.
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(DATA_DIR).join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "paratrans.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("paratrans.log").display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paratrans::job::JobResult;
    use std::io::{self, ErrorKind};

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "Broken pipe"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_json_line_format() {
        let mut out = Vec::new();
        write_json_line(&mut out, &JobResult::COMPLETED).unwrap();
        assert_eq!(out, b"{\"success\":true,\"cancelled\":false}\n");
    }

    #[test]
    fn test_closed_output_is_reported_not_fatal() {
        let event = TranslationEvent::Progress { current: 1, total: 3 };
        let err = write_json_line(&mut ClosedPipe, &event).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);

        let sink = FnSink(|event: TranslationEvent| -> std::result::Result<(), SinkError> {
            write_json_line(&mut ClosedPipe, &event).map_err(|e| SinkError::Delivery(e.to_string()))
        });
        assert!(matches!(sink.emit(event), Err(SinkError::Delivery(_))));
    }
}
