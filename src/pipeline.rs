use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::archive;
use crate::domain::Chapter;
use crate::error::ChapterboxError;
use crate::fetcher::BoundedFetcher;
use crate::http::HttpClient;
use crate::sources::SourceResolver;
use crate::store::{archive_path, prepare_staging_dir, staging_dir};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Skipped { archive: PathBuf },
    Downloaded { archive: PathBuf, pages: usize },
}

/// Runs one chapter from dedup check through packaging. Stages are strictly
/// linear; any failure ends the chapter and leaves written bytes in place.
pub struct ChapterPipeline<H: HttpClient> {
    resolver: SourceResolver,
    http: H,
    fetcher: BoundedFetcher,
}

impl<H: HttpClient> ChapterPipeline<H> {
    pub fn new(resolver: SourceResolver, http: H, fetcher: BoundedFetcher) -> Self {
        Self {
            resolver,
            http,
            fetcher,
        }
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    pub fn acquire(
        &self,
        manga_dir: &Path,
        chapter: &Chapter,
    ) -> Result<Acquisition, ChapterboxError> {
        let number = chapter.number();
        let archive = archive_path(manga_dir, number);
        if archive.exists() {
            debug!(chapter = number, "archive exists, skipping");
            return Ok(Acquisition::Skipped { archive });
        }

        let source = self
            .resolver
            .resolve(chapter)
            .ok_or_else(|| ChapterboxError::UnknownSource {
                chapter: number.to_string(),
                host: chapter.origin_host(),
            })?;
        debug!(chapter = number, source = source.name(), "source resolved");

        let staging = staging_dir(manga_dir, number);
        prepare_staging_dir(&staging)?;

        let pages = source.download_chapter(&self.http, &self.fetcher, chapter, &staging)?;
        let packaged = archive::package_directory(&staging)?;
        info!(chapter = number, pages, archive = %packaged.display(), "chapter archived");
        Ok(Acquisition::Downloaded {
            archive: packaged,
            pages,
        })
    }
}
