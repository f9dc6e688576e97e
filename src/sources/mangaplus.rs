use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::domain::{Chapter, Page};
use crate::error::ChapterboxError;
use crate::http::{HttpClient, HttpRequest};
use crate::sources::{Source, page_list_error};

pub const MANGAPLUS_API: &str = "https://jumpg-webapi.tokyo-cdn.com/api";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";

static VIEWER_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^/?#]*mangaplus[^/?#]*/viewer/(\d+)/?(?:[?#].*)?$")
        .expect("viewer url pattern")
});

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewerResponse {
    success: Option<ViewerSuccess>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewerSuccess {
    manga_viewer: MangaViewer,
}

#[derive(Debug, Deserialize)]
struct MangaViewer {
    #[serde(default)]
    pages: Vec<ViewerPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewerPage {
    manga_page: Option<MangaPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MangaPage {
    image_url: String,
    encryption_key: Option<String>,
}

pub fn viewer_chapter_id(url: &str) -> Option<&str> {
    VIEWER_URL
        .captures(url.trim())
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str())
}

#[derive(Debug, Clone)]
pub struct MangaPlusSource {
    api_base: String,
}

impl Default for MangaPlusSource {
    fn default() -> Self {
        Self::new(MANGAPLUS_API)
    }
}

impl MangaPlusSource {
    pub fn new(api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn referer(&self, chapter_id: &str) -> String {
        format!("{}/viewer/{chapter_id}", self.api_base)
    }

    fn parse_pages(
        &self,
        raw: serde_json::Value,
        referer: &str,
    ) -> Result<Vec<Page>, ChapterboxError> {
        let response: ViewerResponse =
            serde_json::from_value(raw).map_err(|err| page_list_error(self, err))?;
        let viewer = response
            .success
            .ok_or_else(|| page_list_error(self, "viewer returned no success payload"))?
            .manga_viewer;

        let pages = viewer
            .pages
            .into_iter()
            .filter_map(|page| page.manga_page)
            .filter(|page| !page.image_url.is_empty())
            .enumerate()
            .map(|(index, page)| {
                let built = Page::new(index, page.image_url).with_header("Referer", referer);
                match page.encryption_key.filter(|key| !key.is_empty()) {
                    Some(key) => built.with_encryption_key(key),
                    None => built,
                }
            })
            .collect();
        Ok(pages)
    }
}

impl Source for MangaPlusSource {
    fn name(&self) -> &'static str {
        "mangaplus"
    }

    fn claims(&self, chapter: &Chapter) -> bool {
        chapter
            .external_url()
            .and_then(viewer_chapter_id)
            .is_some()
    }

    fn page_list(
        &self,
        http: &dyn HttpClient,
        chapter: &Chapter,
    ) -> Result<Vec<Page>, ChapterboxError> {
        let url = chapter.external_url().unwrap_or_default();
        let chapter_id = viewer_chapter_id(url).ok_or_else(|| ChapterboxError::InvalidChapterUrl {
            source_name: self.name().to_string(),
            url: url.to_string(),
        })?;
        let referer = self.referer(chapter_id);
        debug!(chapter_id, "requesting mangaplus viewer");

        let request = HttpRequest::get(format!("{}/manga_viewer", self.api_base))
            .query("chapter_id", chapter_id)
            .query("split", "yes")
            .query("img_quality", "super_high")
            .query("format", "json")
            .header("Referer", referer.as_str())
            .header("User-Agent", BROWSER_USER_AGENT);
        let raw = http.get_json(&request)?;
        self.parse_pages(raw, &referer)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_viewer_chapter_id() {
        assert_eq!(
            viewer_chapter_id("https://mangaplus.shueisha.co.jp/viewer/1000486"),
            Some("1000486")
        );
        assert_eq!(
            viewer_chapter_id("https://mangaplus.shueisha.co.jp/viewer/1000486?lang=en"),
            Some("1000486")
        );
        assert_eq!(viewer_chapter_id("https://mangaplus.shueisha.co.jp/titles/100020"), None);
        assert_eq!(viewer_chapter_id("https://example.org/viewer/1000486"), None);
    }

    #[test]
    fn parses_pages_with_keys_and_skips_banners() {
        let source = MangaPlusSource::default();
        let raw = json!({
            "success": {
                "mangaViewer": {
                    "pages": [
                        {"mangaPage": {"imageUrl": "https://img.example/1.jpg", "width": 10, "height": 10, "encryptionKey": "0a0b"}},
                        {"bannerList": {"banners": []}},
                        {"mangaPage": {"imageUrl": "https://img.example/2.jpg", "width": 10, "height": 10}}
                    ]
                }
            }
        });

        let pages = source.parse_pages(raw, "https://ref.example/viewer/1").unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].encryption_key.as_deref(), Some("0a0b"));
        assert_eq!(pages[1].index, 1);
        assert_eq!(pages[1].encryption_key, None);
        assert_eq!(
            pages[1].headers,
            vec![("Referer".to_string(), "https://ref.example/viewer/1".to_string())]
        );
    }

    #[test]
    fn error_payload_is_a_page_list_error() {
        let source = MangaPlusSource::default();
        let err = source
            .parse_pages(json!({"error": {"popups": []}}), "r")
            .unwrap_err();
        assert!(matches!(err, ChapterboxError::PageList { .. }));
    }
}
