use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use shared::{
    domain::{SectionData, SectionId},
    error::ApiError,
};
use storage::{DraftStore, Storage};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wizard_core::{
    CompletionHandler, FormStore, HttpCompletionHandler, HttpDraftSync, MissingCompletionHandler,
    NextOutcome, SubmitError, WizardController,
};

mod config;
mod sections;

use config::{load_settings, normalize_database_url, Settings};

#[derive(Parser, Debug)]
#[command(name = "intake", about = "Multi-step clinical intake wizard")]
struct Cli {
    /// Config file; defaults to ./intake.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[arg(long, global = true)]
    draft_key: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the wizard with scripted answers, one section per Next.
    Run {
        /// JSON object of section id to field values.
        #[arg(long)]
        answers: PathBuf,
        #[arg(long)]
        submit: bool,
        /// Ignore any saved draft.
        #[arg(long)]
        fresh: bool,
    },
    /// Print progress and the review of the saved draft.
    Status,
    /// Delete the saved draft.
    Discard,
    /// List stored drafts.
    Drafts,
    /// Delete drafts last saved more than the given number of days ago.
    Purge {
        #[arg(long, default_value_t = 30)]
        older_than_days: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(url) = &cli.database_url {
        settings.database_url = normalize_database_url(url);
    }
    if let Some(key) = &cli.draft_key {
        settings.draft_key = key.clone();
    }

    let storage = Storage::new(&settings.database_url).await?;
    info!(database_url = %settings.database_url, draft_key = %settings.draft_key, "intake storage ready");

    match cli.command {
        Command::Run {
            answers,
            submit,
            fresh,
        } => run(&settings, storage, answers, submit, fresh).await?,
        Command::Status => status(&settings, storage).await?,
        Command::Discard => {
            let store = form_store(&settings, storage)?;
            store.clear_draft().await?;
            println!("discarded draft '{}'", settings.draft_key);
        }
        Command::Drafts => {
            for draft in storage.list_keys().await? {
                println!("{}\t{}", draft.key, draft.saved_at.to_rfc3339());
            }
        }
        Command::Purge { older_than_days } => {
            let cutoff = purge_cutoff(Utc::now(), older_than_days)?;
            let removed = storage.purge_saved_before(cutoff).await?;
            println!("purged {removed} draft(s) saved before {}", cutoff.to_rfc3339());
        }
    }

    Ok(())
}

fn purge_cutoff(now: DateTime<Utc>, older_than_days: i64) -> Result<DateTime<Utc>> {
    if older_than_days < 0 {
        bail!("--older-than-days must not be negative, got {older_than_days}");
    }
    let age = TimeDelta::try_days(older_than_days)
        .with_context(|| format!("--older-than-days {older_than_days} is out of range"))?;
    now.checked_sub_signed(age)
        .with_context(|| format!("{older_than_days} days before now is out of range"))
}

/// Only rate limiting and server faults clear up on their own.
fn retry_hint(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<ApiError>() {
        Some(api) if api.is_retryable() => "retry later with --submit",
        Some(_) => "fix the answers before retrying",
        None => "check the submit endpoint and retry",
    }
}

fn form_store(settings: &Settings, storage: Storage) -> Result<Arc<FormStore>> {
    let mut store = FormStore::new(Arc::new(storage), settings.draft_key.clone());
    if let Some(endpoint) = &settings.remote_save_url {
        store = store.with_remote(Arc::new(HttpDraftSync::new(endpoint, settings.draft_key.clone())?));
    }
    Ok(Arc::new(store))
}

fn completion_handler(settings: &Settings) -> Result<Arc<dyn CompletionHandler>> {
    Ok(match &settings.submit_url {
        Some(endpoint) => Arc::new(HttpCompletionHandler::new(endpoint)?),
        None => Arc::new(MissingCompletionHandler),
    })
}

async fn run(
    settings: &Settings,
    storage: Storage,
    answers: PathBuf,
    submit: bool,
    fresh: bool,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(&answers)
        .await
        .with_context(|| format!("failed to read answers file '{}'", answers.display()))?;
    let mut answers: BTreeMap<SectionId, SectionData> =
        serde_json::from_str(&raw).context("answers must map section ids to field objects")?;

    let controller = WizardController::mount(
        sections::intake_registry()?,
        form_store(settings, storage)?,
        completion_handler(settings)?,
        settings.wizard_options(fresh),
    )
    .await;

    loop {
        let Some(section) = controller.current_section() else {
            break;
        };
        if let Some(values) = answers.remove(&section.id) {
            controller.section_handle(section.id.clone()).update(values);
        }

        let before = controller.current_index();
        match controller.next().await {
            NextOutcome::Blocked { result, .. } => {
                println!("[{}] {} needs attention:", section.id, section.title);
                for error in &result.errors {
                    println!("  - {}: {}", error.field, error.message);
                }
                break;
            }
            NextOutcome::Advanced { index, .. } => {
                let progress = controller.progress();
                println!(
                    "[{}] {} done ({}% complete)",
                    section.id, section.title, progress.percent_complete
                );
                if index == before {
                    break;
                }
            }
        }
    }

    // Answers for sections that never became visible are kept in the draft.
    for (id, values) in answers {
        warn!(section = %id, "answers given for a section that is not shown");
        controller.store().update_section(id, values);
    }

    controller.stop_autosave();
    if controller.store().status().has_unsaved_changes {
        controller.store().save_draft().await?;
    }

    if submit {
        match controller.submit().await {
            Ok(receipt) => println!(
                "submitted{}",
                receipt
                    .reference
                    .map(|reference| format!(" as {reference}"))
                    .unwrap_or_default()
            ),
            Err(SubmitError::Blocked { section, failures, .. }) => {
                println!("submission blocked at {section}");
                for failure in failures {
                    for error in failure.result.errors {
                        println!("  - {}.{}: {}", failure.section, error.field, error.message);
                    }
                }
            }
            Err(SubmitError::Completion { source }) => {
                let hint = retry_hint(&source);
                return Err(source).context(format!("submission failed; the draft was kept, {hint}"));
            }
            Err(err) => return Err(err).context("submission failed; the draft was kept"),
        }
    }

    Ok(())
}

async fn status(settings: &Settings, storage: Storage) -> Result<()> {
    storage.health_check().await?;
    let controller = WizardController::mount(
        sections::intake_registry()?,
        form_store(settings, storage)?,
        Arc::new(MissingCompletionHandler),
        wizard_core::WizardOptions {
            autosave: wizard_core::AutoSaveConfig::disabled(),
            ..settings.wizard_options(false)
        },
    )
    .await;

    let report = serde_json::json!({
        "state": controller.runtime_state(),
        "progress": controller.progress(),
        "navigator": controller.navigator(),
        "review": controller.review(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
