use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use url::Url;
use wizard_core::{AutoSaveConfig, HiddenSectionPolicy, WizardOptions, DEFAULT_DRAFT_KEY};

pub const DEFAULT_CONFIG_FILE: &str = "intake.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub draft_key: String,
    pub autosave_debounce_ms: u64,
    pub autosave_max_delay_ms: Option<u64>,
    pub submit_url: Option<String>,
    pub remote_save_url: Option<String>,
    pub hidden_sections: HiddenSectionPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/intake.db".into(),
            draft_key: DEFAULT_DRAFT_KEY.into(),
            autosave_debounce_ms: 2_000,
            autosave_max_delay_ms: None,
            submit_url: None,
            remote_save_url: None,
            hidden_sections: HiddenSectionPolicy::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    database_url: Option<String>,
    draft_key: Option<String>,
    autosave_debounce_ms: Option<u64>,
    autosave_max_delay_ms: Option<u64>,
    submit_url: Option<String>,
    remote_save_url: Option<String>,
    hidden_sections: Option<HiddenSectionPolicy>,
}

impl Settings {
    pub fn autosave(&self) -> AutoSaveConfig {
        AutoSaveConfig {
            enabled: self.autosave_debounce_ms > 0,
            debounce: Duration::from_millis(self.autosave_debounce_ms),
            max_delay: self.autosave_max_delay_ms.map(Duration::from_millis),
        }
    }

    pub fn wizard_options(&self, fresh_start: bool) -> WizardOptions {
        WizardOptions {
            autosave: self.autosave(),
            hidden_sections: self.hidden_sections,
            fresh_start,
        }
    }
}

/// Defaults, then `intake.toml` (or `path`), then `INTAKE_*` and `APP__*`
/// environment variables.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    load_settings_from(path, |key| std::env::var(key).ok())
}

fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        let file: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;
        apply_file(&mut settings, file);
    }

    let lookup = |name: &str| {
        env(&format!("APP__{name}")).or_else(|| env(&format!("INTAKE_{name}")))
    };

    if let Some(v) = lookup("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("DRAFT_KEY") {
        settings.draft_key = v;
    }
    if let Some(v) = lookup("AUTOSAVE_DEBOUNCE_MS") {
        settings.autosave_debounce_ms = v
            .parse()
            .with_context(|| format!("AUTOSAVE_DEBOUNCE_MS must be milliseconds, got '{v}'"))?;
    }
    if let Some(v) = lookup("AUTOSAVE_MAX_DELAY_MS") {
        settings.autosave_max_delay_ms = Some(
            v.parse()
                .with_context(|| format!("AUTOSAVE_MAX_DELAY_MS must be milliseconds, got '{v}'"))?,
        );
    }
    if let Some(v) = lookup("SUBMIT_URL") {
        settings.submit_url = Some(v);
    }
    if let Some(v) = lookup("REMOTE_SAVE_URL") {
        settings.remote_save_url = Some(v);
    }
    if let Some(v) = lookup("HIDDEN_SECTIONS") {
        settings.hidden_sections = parse_hidden_policy(&v)?;
    }

    settings.database_url = normalize_database_url(&settings.database_url);
    for endpoint in [&settings.submit_url, &settings.remote_save_url]
        .into_iter()
        .flatten()
    {
        validate_endpoint(endpoint)?;
    }
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file: FileSettings) {
    if let Some(v) = file.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file.draft_key {
        settings.draft_key = v;
    }
    if let Some(v) = file.autosave_debounce_ms {
        settings.autosave_debounce_ms = v;
    }
    if file.autosave_max_delay_ms.is_some() {
        settings.autosave_max_delay_ms = file.autosave_max_delay_ms;
    }
    if file.submit_url.is_some() {
        settings.submit_url = file.submit_url;
    }
    if file.remote_save_url.is_some() {
        settings.remote_save_url = file.remote_save_url;
    }
    if let Some(v) = file.hidden_sections {
        settings.hidden_sections = v;
    }
}

fn parse_hidden_policy(raw: &str) -> Result<HiddenSectionPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "exclude" => Ok(HiddenSectionPolicy::Exclude),
        "block_retained" => Ok(HiddenSectionPolicy::BlockRetained),
        other => bail!("unknown hidden section policy '{other}' (expected exclude or block_retained)"),
    }
}

fn validate_endpoint(raw: &str) -> Result<()> {
    let url = Url::parse(raw).with_context(|| format!("invalid endpoint url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("endpoint '{raw}' must use http or https");
    }
    Ok(())
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
