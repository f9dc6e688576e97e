use std::fs;
use std::path::Path;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::domain::{FeedChapter, MangaWithChapters};
use crate::error::ChapterboxError;
use crate::fetcher::AbortSignal;
use crate::http::{HttpClient, HttpRequest};
use crate::pipeline::{Acquisition, ChapterPipeline};
use crate::store::{MangaLibrary, MangaRecord, Store, cover_path};

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub manga: Vec<MangaReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MangaReport {
    pub manga_id: String,
    pub title: String,
    pub directory: Option<String>,
    pub chapters: Vec<ChapterReport>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterReport {
    pub chapter_id: String,
    pub number: String,
    pub outcome: ChapterOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChapterOutcome {
    AlreadyRead,
    Skipped { archive: String },
    Downloaded { archive: String, pages: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub manga: Vec<MangaRecord>,
}

impl MangaReport {
    fn new(manga_id: &str, title: &str) -> Self {
        Self {
            manga_id: manga_id.to_string(),
            title: title.to_string(),
            directory: None,
            chapters: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn downloaded_ids(&self) -> Vec<String> {
        self.chapters
            .iter()
            .filter(|chapter| matches!(chapter.outcome, ChapterOutcome::Downloaded { .. }))
            .map(|chapter| chapter.chapter_id.clone())
            .collect()
    }
}

impl DownloadReport {
    /// Every recorded error in run order, chapter failures included.
    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        for manga in &self.manga {
            for chapter in &manga.chapters {
                if let ChapterOutcome::Failed { reason } = &chapter.outcome {
                    failures.push(format!("failed to download chapter: {reason}"));
                }
            }
            failures.extend(manga.errors.iter().cloned());
        }
        failures
    }

    pub fn downloaded_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, ChapterOutcome::Downloaded { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, ChapterOutcome::Skipped { .. }))
    }

    fn count(&self, predicate: impl Fn(&ChapterOutcome) -> bool) -> usize {
        self.manga
            .iter()
            .flat_map(|manga| &manga.chapters)
            .filter(|chapter| predicate(&chapter.outcome))
            .count()
    }

    pub fn summary(&self) -> String {
        self.failures().join("\n")
    }

    pub fn is_success(&self) -> bool {
        self.failures().is_empty()
    }

    pub fn into_result(self) -> Result<DownloadReport, ChapterboxError> {
        let failures = self.failures();
        if failures.is_empty() {
            return Ok(self);
        }
        Err(ChapterboxError::PartialFailure {
            count: failures.len(),
            summary: failures.join("\n"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<H: HttpClient, L: MangaLibrary> {
    store: Store,
    library: L,
    pipeline: ChapterPipeline<H>,
    language: String,
}

impl<H: HttpClient, L: MangaLibrary> App<H, L> {
    pub fn new(store: Store, library: L, pipeline: ChapterPipeline<H>, language: &str) -> Self {
        Self {
            store,
            library,
            pipeline,
            language: language.to_string(),
        }
    }

    /// Processes the batch manga by manga. Per-chapter and per-manga failures are
    /// collected in the report; only cancellation ends the batch early.
    pub fn download_manga(
        &self,
        manga_list: &[MangaWithChapters],
        catalog: &dyn Catalog,
        cancel: &AbortSignal,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadReport, ChapterboxError> {
        self.store.ensure_download_root()?;
        let mut report = DownloadReport { manga: Vec::new() };

        for entry in manga_list {
            if cancel.is_set() {
                warn!(completed = report.manga.len(), "batch cancelled");
                return Err(ChapterboxError::Cancelled);
            }
            let title = entry.manga.title(&self.language);
            sink.event(ProgressEvent {
                message: format!("manga {title}"),
            });
            info!(manga = %title, chapters = entry.chapters.len(), "downloading manga");
            report.manga.push(self.download_one(entry, &title, catalog, sink));
        }

        Ok(report)
    }

    pub fn list(&self) -> Result<ListResult, ChapterboxError> {
        Ok(ListResult {
            manga: self.store.list_records()?,
        })
    }

    fn download_one(
        &self,
        entry: &MangaWithChapters,
        title: &str,
        catalog: &dyn Catalog,
        sink: &dyn ProgressSink,
    ) -> MangaReport {
        let mut report = MangaReport::new(&entry.manga.id, title);

        let manga_dir = match self.store.ensure_manga_dir(title) {
            Ok(dir) => dir,
            Err(err) => {
                report
                    .errors
                    .push(format!("failed to create manga directory: {err}"));
                return report;
            }
        };
        report.directory = Some(manga_dir.to_string());

        let recorded = self
            .library
            .record_manga(&entry.manga, title, &self.language, &manga_dir);
        if let Err(err) = recorded {
            report.errors.push(format!("failed to record manga: {err}"));
            return report;
        }

        let cover = cover_path(manga_dir.as_std_path());
        if !cover.exists() {
            if let Err(err) = self.download_cover(catalog, &entry.manga.id, &cover) {
                warn!(manga = %title, error = %err, "cover download failed");
                report
                    .errors
                    .push(format!("failed to download manga cover: {err}"));
            }
        }

        for feed_chapter in &entry.chapters {
            let chapter_report = self.download_chapter(&manga_dir, feed_chapter, sink);
            report.chapters.push(chapter_report);
        }

        let downloaded = report.downloaded_ids();
        if !downloaded.is_empty() {
            if let Err(err) = catalog.mark_read(&entry.manga.id, &downloaded) {
                report
                    .errors
                    .push(format!("failed to mark manga as read: {err}"));
            }
        }
        report
    }

    fn download_chapter(
        &self,
        manga_dir: &Utf8PathBuf,
        feed_chapter: &FeedChapter,
        sink: &dyn ProgressSink,
    ) -> ChapterReport {
        let chapter = &feed_chapter.chapter;
        let number = chapter.number().to_string();
        let outcome = if feed_chapter.is_read {
            ChapterOutcome::AlreadyRead
        } else {
            match self.pipeline.acquire(manga_dir.as_std_path(), chapter) {
                Ok(Acquisition::Skipped { archive }) => {
                    info!(chapter = %number, "skipped chapter");
                    ChapterOutcome::Skipped {
                        archive: archive.display().to_string(),
                    }
                }
                Ok(Acquisition::Downloaded { archive, pages }) => {
                    info!(chapter = %number, pages, "downloaded chapter");
                    ChapterOutcome::Downloaded {
                        archive: archive.display().to_string(),
                        pages,
                    }
                }
                Err(err) => {
                    warn!(chapter = %number, error = %err, "chapter failed");
                    ChapterOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            }
        };
        sink.event(ProgressEvent {
            message: format!("chapter {number}: {}", outcome.label()),
        });
        ChapterReport {
            chapter_id: chapter.id.clone(),
            number,
            outcome,
        }
    }

    fn download_cover(
        &self,
        catalog: &dyn Catalog,
        manga_id: &str,
        destination: &Path,
    ) -> Result<(), ChapterboxError> {
        let url = catalog.cover_url(manga_id)?;
        let partial = destination.with_extension("jpg.part");
        let result = self
            .pipeline
            .http()
            .download(&HttpRequest::get(url), &partial, &AbortSignal::new())
            .and_then(|_| {
                fs::rename(&partial, destination)
                    .map_err(|err| ChapterboxError::Filesystem(err.to_string()))
            });
        if result.is_err() && partial.exists() {
            let _ = fs::remove_file(&partial);
        }
        result
    }
}

impl ChapterOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ChapterOutcome::AlreadyRead => "already read",
            ChapterOutcome::Skipped { .. } => "skipped",
            ChapterOutcome::Downloaded { .. } => "downloaded",
            ChapterOutcome::Failed { .. } => "failed",
        }
    }
}
