use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, warn};

use crate::domain::{Page, page_file_name};
use crate::error::ChapterboxError;
use crate::http::{HttpClient, HttpRequest};
use crate::transform;

pub const MAX_CONCURRENT_PAGES: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), ChapterboxError> {
        if self.is_set() {
            return Err(ChapterboxError::Aborted);
        }
        Ok(())
    }
}

pub trait PageDownload: Sync {
    fn download_page(&self, page: &Page, abort: &AbortSignal) -> Result<PathBuf, ChapterboxError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BoundedFetcher {
    limit: usize,
}

impl Default for BoundedFetcher {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_PAGES)
    }
}

impl BoundedFetcher {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Downloads every page with at most `limit` in flight. The first failure stops
    /// new pages from starting and aborts running transfers; returns after all
    /// workers have exited.
    pub fn fetch<D>(&self, pages: &[Page], downloader: &D) -> Result<Vec<PathBuf>, ChapterboxError>
    where
        D: PageDownload + ?Sized,
    {
        if pages.is_empty() {
            return Ok(Vec::new());
        }

        let abort = AbortSignal::new();
        let next = AtomicUsize::new(0);
        let first_error = Mutex::new(None::<ChapterboxError>);
        let written = Mutex::new(Vec::with_capacity(pages.len()));
        let workers = self.limit.min(pages.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while !abort.is_set() {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(page) = pages.get(index) else {
                            break;
                        };
                        match downloader.download_page(page, &abort) {
                            Ok(path) => lock(&written).push(path),
                            Err(err) => {
                                let mut slot = lock(&first_error);
                                if slot.is_none() && !matches!(err, ChapterboxError::Aborted) {
                                    *slot = Some(err);
                                }
                                drop(slot);
                                abort.request();
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(err) = first_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
            return Err(err);
        }
        if abort.is_set() {
            return Err(ChapterboxError::Aborted);
        }
        let mut written = written.into_inner().unwrap_or_else(|p| p.into_inner());
        written.sort();
        Ok(written)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct HttpPageWriter<'a> {
    http: &'a dyn HttpClient,
    staging_dir: &'a Path,
    page_count: usize,
}

impl<'a> HttpPageWriter<'a> {
    pub fn new(http: &'a dyn HttpClient, staging_dir: &'a Path, page_count: usize) -> Self {
        Self {
            http,
            staging_dir,
            page_count,
        }
    }

    fn fetch_to(
        &self,
        page: &Page,
        url: &str,
        destination: &Path,
        abort: &AbortSignal,
    ) -> Result<(), ChapterboxError> {
        let request = HttpRequest::get(url).headers(page.headers.iter().cloned());
        match &page.encryption_key {
            Some(key) => {
                let bytes = self.http.get_bytes(&request, abort)?;
                let decoded = transform::decode(&bytes, key)?;
                fs::write(destination, decoded).map_err(|err| {
                    ChapterboxError::Filesystem(format!("write {}: {err}", destination.display()))
                })
            }
            None => self.http.download(&request, destination, abort).map(|_| ()),
        }
    }
}

impl PageDownload for HttpPageWriter<'_> {
    fn download_page(&self, page: &Page, abort: &AbortSignal) -> Result<PathBuf, ChapterboxError> {
        let name = page_file_name(page.index, self.page_count, &page.extension());
        let destination = self.staging_dir.join(name);

        let primary = match self.fetch_to(page, &page.url, &destination, abort) {
            Ok(()) => {
                debug!(page = page.index, "page downloaded");
                return Ok(destination);
            }
            Err(ChapterboxError::Aborted) => return Err(ChapterboxError::Aborted),
            Err(err) => err,
        };

        if destination.exists() {
            fs::remove_file(&destination).map_err(|err| {
                ChapterboxError::Filesystem(format!("remove {}: {err}", destination.display()))
            })?;
        }

        let Some(fallback) = page.fallback_url.as_deref() else {
            return Err(ChapterboxError::PageFetch {
                page: page.index,
                message: primary.to_string(),
            });
        };
        warn!(page = page.index, error = %primary, "full quality image failed, using fallback");
        match self.fetch_to(page, fallback, &destination, abort) {
            Ok(()) => Ok(destination),
            Err(ChapterboxError::Aborted) => Err(ChapterboxError::Aborted),
            Err(err) => Err(ChapterboxError::PageFetch {
                page: page.index,
                message: format!("{primary}; fallback: {err}"),
            }),
        }
    }
}
