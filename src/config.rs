use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ChapterboxError;
use crate::fetcher::MAX_CONCURRENT_PAGES;
use crate::store::write_json_atomic;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const LAST_RUN_FILE_NAME: &str = "last_run.json";
pub const DEFAULT_LANGUAGE: &str = "en";
const LAST_RUN_FALLBACK_DAYS: i64 = 7;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
    pub download_path: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub page_concurrency: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub credentials: Credentials,
    pub download_path: Utf8PathBuf,
    pub language: String,
    pub page_concurrency: usize,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ChapterboxError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => default_config_path()?,
        };

        if path.is_none() && !config_path.exists() {
            return Err(ChapterboxError::MissingConfig(config_path));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ChapterboxError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ChapterboxError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ChapterboxError> {
        if config.download_path.trim().is_empty() {
            return Err(ChapterboxError::InvalidConfig(
                "download_path must not be empty".to_string(),
            ));
        }
        let page_concurrency = config.page_concurrency.unwrap_or(MAX_CONCURRENT_PAGES);
        if page_concurrency == 0 {
            return Err(ChapterboxError::InvalidConfig(
                "page_concurrency must be at least 1".to_string(),
            ));
        }
        let language = config
            .language
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        Ok(ResolvedConfig {
            credentials: Credentials {
                username: config.username,
                password: config.password,
                client_id: config.client_id,
                client_secret: config.client_secret,
            },
            download_path: Utf8PathBuf::from(config.download_path),
            language,
            page_concurrency,
        })
    }
}

fn project_dirs() -> Result<ProjectDirs, ChapterboxError> {
    ProjectDirs::from("", "", "chapterbox").ok_or_else(|| {
        ChapterboxError::Filesystem("unable to resolve user directories".to_string())
    })
}

pub fn default_config_path() -> Result<PathBuf, ChapterboxError> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE_NAME))
}

pub fn default_last_run_path() -> Result<PathBuf, ChapterboxError> {
    Ok(project_dirs()?.data_dir().join(LAST_RUN_FILE_NAME))
}

#[derive(Debug, Deserialize, Serialize)]
struct LastRun {
    last_ran_at: DateTime<Utc>,
}

pub fn load_last_run(path: &Path, now: DateTime<Utc>) -> Result<DateTime<Utc>, ChapterboxError> {
    if !path.exists() {
        return Ok(now - Duration::days(LAST_RUN_FALLBACK_DAYS));
    }
    let content = fs::read_to_string(path)
        .map_err(|err| ChapterboxError::Filesystem(format!("{}: {err}", path.display())))?;
    let last_run: LastRun = serde_json::from_str(&content)
        .map_err(|err| ChapterboxError::ConfigParse(format!("{}: {err}", path.display())))?;
    Ok(last_run.last_ran_at)
}

pub fn save_last_run(path: &Path, at: DateTime<Utc>) -> Result<(), ChapterboxError> {
    write_json_atomic(path, &LastRun { last_ran_at: at })
}
