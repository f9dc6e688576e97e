use std::path::Path;

use tracing::debug;

use crate::domain::{Chapter, Page};
use crate::error::ChapterboxError;
use crate::fetcher::{BoundedFetcher, HttpPageWriter};
use crate::http::HttpClient;

pub mod mangadex;
pub mod mangaplus;

pub use mangadex::MangadexSource;
pub use mangaplus::MangaPlusSource;

pub trait Source: Send + Sync {
    fn name(&self) -> &'static str;

    fn claims(&self, chapter: &Chapter) -> bool;

    fn page_list(
        &self,
        http: &dyn HttpClient,
        chapter: &Chapter,
    ) -> Result<Vec<Page>, ChapterboxError>;

    fn download_chapter(
        &self,
        http: &dyn HttpClient,
        fetcher: &BoundedFetcher,
        chapter: &Chapter,
        staging_dir: &Path,
    ) -> Result<usize, ChapterboxError> {
        let pages = self.page_list(http, chapter)?;
        if pages.is_empty() {
            return Err(ChapterboxError::PageList {
                source_name: self.name().to_string(),
                message: format!("chapter {} has no pages", chapter.id),
            });
        }
        debug!(source = self.name(), pages = pages.len(), "page list resolved");
        let writer = HttpPageWriter::new(http, staging_dir, pages.len());
        fetcher.fetch(&pages, &writer)?;
        Ok(pages.len())
    }
}

pub struct SourceResolver {
    sources: Vec<Box<dyn Source>>,
}

impl SourceResolver {
    pub fn new(sources: Vec<Box<dyn Source>>) -> Self {
        Self { sources }
    }

    pub fn with_default_sources() -> Self {
        Self::new(vec![
            Box::new(MangaPlusSource::default()),
            Box::new(MangadexSource::default()),
        ])
    }

    pub fn resolve(&self, chapter: &Chapter) -> Option<&dyn Source> {
        self.sources
            .iter()
            .find(|source| source.claims(chapter))
            .map(|source| source.as_ref())
    }

    pub fn claimants(&self, chapter: &Chapter) -> Vec<&'static str> {
        self.sources
            .iter()
            .filter(|source| source.claims(chapter))
            .map(|source| source.name())
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|source| source.name()).collect()
    }
}

impl Default for SourceResolver {
    fn default() -> Self {
        Self::with_default_sources()
    }
}

pub(crate) fn page_list_error(source: &dyn Source, message: impl ToString) -> ChapterboxError {
    ChapterboxError::PageList {
        source_name: source.name().to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_source_claims_each_chapter() {
        let resolver = SourceResolver::with_default_sources();
        let corpus = [
            Chapter::new("a", Some("1"), None),
            Chapter::new("b", Some("2"), Some("")),
            Chapter::new("c", Some("3"), Some("https://mangaplus.shueisha.co.jp/viewer/1000486")),
            Chapter::new("d", None, Some("https://mangaplus.shueisha.co.jp/viewer/1000486/")),
            Chapter::new("e", Some("5"), Some("https://mangaplus.shueisha.co.jp/titles/100020")),
            Chapter::new("f", Some("6"), Some("https://www.webtoons.com/en/viewer/123")),
            Chapter::new("g", Some("7"), Some("https://comikey.com/read/abc")),
        ];

        let claims = corpus
            .iter()
            .map(|chapter| resolver.claimants(chapter))
            .collect::<Vec<_>>();

        assert_eq!(claims[0], vec!["mangadex"]);
        assert_eq!(claims[1], vec!["mangadex"]);
        assert_eq!(claims[2], vec!["mangaplus"]);
        assert_eq!(claims[3], vec!["mangaplus"]);
        for unclaimed in &claims[4..] {
            assert!(unclaimed.is_empty());
        }
        for (chapter, claim) in corpus.iter().zip(&claims) {
            assert!(claim.len() <= 1, "{} claimed by {claim:?}", chapter.id);
        }
    }

    #[test]
    fn resolve_returns_the_claiming_source() {
        let resolver = SourceResolver::default();
        let direct = Chapter::new("a", Some("1"), None);
        let external = Chapter::new("b", Some("1"), Some("https://comikey.com/read/abc"));

        assert_eq!(resolver.resolve(&direct).map(|s| s.name()), Some("mangadex"));
        assert!(resolver.resolve(&external).is_none());
        assert_eq!(resolver.names(), vec!["mangaplus", "mangadex"]);
    }
}
