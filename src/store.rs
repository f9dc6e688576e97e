use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::archive::ARCHIVE_EXTENSION;
use crate::domain::Manga;
use crate::error::ChapterboxError;

pub const COVER_FILE_NAME: &str = "cover.jpg";

static ILLEGAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f]"#).expect("illegal chars pattern"));

pub trait MangaLibrary: Send + Sync {
    fn record_manga(
        &self,
        manga: &Manga,
        title: &str,
        language: &str,
        directory: &Utf8Path,
    ) -> Result<(), ChapterboxError>;
}

#[derive(Debug, Clone)]
pub struct Store {
    download_root: Utf8PathBuf,
    metadata_root: Utf8PathBuf,
}

impl Store {
    pub fn new(download_root: Utf8PathBuf) -> Result<Self, ChapterboxError> {
        let metadata_root = ProjectDirs::from("", "", "chapterbox")
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_dir().join("library")).ok())
            .ok_or_else(|| {
                ChapterboxError::Filesystem("unable to resolve data directory".to_string())
            })?;
        Ok(Self {
            download_root,
            metadata_root,
        })
    }

    pub fn new_with_paths(download_root: Utf8PathBuf, metadata_root: Utf8PathBuf) -> Self {
        Self {
            download_root,
            metadata_root,
        }
    }

    pub fn download_root(&self) -> &Utf8Path {
        &self.download_root
    }

    pub fn metadata_root(&self) -> &Utf8Path {
        &self.metadata_root
    }

    pub fn ensure_download_root(&self) -> Result<(), ChapterboxError> {
        fs::create_dir_all(self.download_root.as_std_path())
            .map_err(|err| ChapterboxError::Filesystem(err.to_string()))
    }

    pub fn manga_dir(&self, title: &str) -> Utf8PathBuf {
        self.download_root.join(sanitize_component(title))
    }

    pub fn ensure_manga_dir(&self, title: &str) -> Result<Utf8PathBuf, ChapterboxError> {
        let dir = self.manga_dir(title);
        fs::create_dir_all(dir.as_std_path()).map_err(|err| {
            ChapterboxError::Filesystem(format!("create manga directory {dir}: {err}"))
        })?;
        Ok(dir)
    }

    pub fn metadata_path(&self, manga_id: &str) -> Utf8PathBuf {
        self.metadata_root
            .join("manga")
            .join(format!("{}.json", sanitize_component(manga_id)))
    }

    pub fn write_record(&self, record: &MangaRecord) -> Result<(), ChapterboxError> {
        write_json_atomic(self.metadata_path(&record.id).as_std_path(), record)
    }

    pub fn read_record(&self, manga_id: &str) -> Result<Option<MangaRecord>, ChapterboxError> {
        let path = self.metadata_path(manga_id);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| ChapterboxError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|err| ChapterboxError::Filesystem(format!("{path}: {err}")))
    }

    pub fn list_records(&self) -> Result<Vec<MangaRecord>, ChapterboxError> {
        let root = self.metadata_root.join("manga");
        if !root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(root.as_std_path())
            .map_err(|err| ChapterboxError::Filesystem(err.to_string()))?
        {
            let path = entry
                .map_err(|err| ChapterboxError::Filesystem(err.to_string()))?
                .path();
            if !path.is_file() || path.extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            let content = fs::read_to_string(&path)
                .map_err(|err| ChapterboxError::Filesystem(err.to_string()))?;
            match serde_json::from_str::<MangaRecord>(&content) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable record")
                }
            }
        }
        records.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(records)
    }
}

impl MangaLibrary for Store {
    fn record_manga(
        &self,
        manga: &Manga,
        title: &str,
        language: &str,
        directory: &Utf8Path,
    ) -> Result<(), ChapterboxError> {
        let existing = self.read_record(&manga.id)?;
        let record = MangaRecord {
            id: manga.id.clone(),
            title: title.to_string(),
            directory: directory.to_string(),
            description: manga.description(language).map(str::to_string),
            status: manga.attributes.status.clone(),
            year: manga.attributes.year,
            recorded_at: existing
                .map(|record| record.recorded_at)
                .unwrap_or_else(iso_timestamp),
            updated_at: iso_timestamp(),
        };
        self.write_record(&record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MangaRecord {
    pub id: String,
    pub title: String,
    pub directory: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub year: Option<i32>,
    pub recorded_at: String,
    pub updated_at: String,
}

pub fn sanitize_component(value: &str) -> String {
    let replaced = ILLEGAL_CHARS.replace_all(value.trim(), "_");
    let trimmed = replaced.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() || trimmed == ".." {
        return "_".to_string();
    }
    trimmed.to_string()
}

pub fn archive_path(manga_dir: &Path, chapter_number: &str) -> PathBuf {
    manga_dir.join(format!(
        "{}.{ARCHIVE_EXTENSION}",
        sanitize_component(chapter_number)
    ))
}

pub fn staging_dir(manga_dir: &Path, chapter_number: &str) -> PathBuf {
    manga_dir.join(sanitize_component(chapter_number))
}

pub fn cover_path(manga_dir: &Path) -> PathBuf {
    manga_dir.join(COVER_FILE_NAME)
}

pub fn prepare_staging_dir(path: &Path) -> Result<(), ChapterboxError> {
    if path.exists() {
        warn!(path = %path.display(), "removing stale staging directory");
        fs::remove_dir_all(path).map_err(|err| {
            ChapterboxError::Filesystem(format!("remove stale {}: {err}", path.display()))
        })?;
    }
    fs::create_dir_all(path).map_err(|err| {
        ChapterboxError::Filesystem(format!("create chapter directory {}: {err}", path.display()))
    })
}

pub(crate) fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), ChapterboxError> {
    let parent = path.parent().ok_or_else(|| {
        ChapterboxError::Filesystem(format!("{} has no parent", path.display()))
    })?;
    fs::create_dir_all(parent).map_err(|err| ChapterboxError::Filesystem(err.to_string()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| ChapterboxError::Filesystem(err.to_string()))?;
    serde_json::to_writer_pretty(&mut tmp, value)
        .map_err(|err| ChapterboxError::Filesystem(err.to_string()))?;
    tmp.persist(path)
        .map_err(|err| ChapterboxError::Filesystem(format!("{}: {err}", path.display())))?;
    Ok(())
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
