use serde::Deserialize;

use crate::domain::{Chapter, Page};
use crate::error::ChapterboxError;
use crate::http::{HttpClient, HttpRequest};
use crate::sources::{Source, page_list_error};

pub const MANGADEX_API: &str = "https://api.mangadex.org";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtHomeResponse {
    pub base_url: String,
    pub chapter: AtHomeChapter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtHomeChapter {
    pub hash: String,
    #[serde(default)]
    pub data: Vec<String>,
    #[serde(default)]
    pub data_saver: Vec<String>,
}

impl AtHomeResponse {
    pub fn pages(&self) -> Vec<Page> {
        let base = self.base_url.trim_end_matches('/');
        let hash = &self.chapter.hash;
        self.chapter
            .data
            .iter()
            .enumerate()
            .map(|(index, file)| {
                let page = Page::new(index, format!("{base}/data/{hash}/{file}"));
                match self.chapter.data_saver.get(index) {
                    Some(saver) => page.with_fallback(format!("{base}/data-saver/{hash}/{saver}")),
                    None => page,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct MangadexSource {
    api_base: String,
}

impl Default for MangadexSource {
    fn default() -> Self {
        Self::new(MANGADEX_API)
    }
}

impl MangadexSource {
    pub fn new(api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn at_home_url(&self, chapter_id: &str) -> String {
        format!("{}/at-home/server/{chapter_id}", self.api_base)
    }
}

impl Source for MangadexSource {
    fn name(&self) -> &'static str {
        "mangadex"
    }

    fn claims(&self, chapter: &Chapter) -> bool {
        chapter.external_url().is_none()
    }

    fn page_list(
        &self,
        http: &dyn HttpClient,
        chapter: &Chapter,
    ) -> Result<Vec<Page>, ChapterboxError> {
        let raw = http.get_json(&HttpRequest::get(self.at_home_url(&chapter.id)))?;
        let response: AtHomeResponse =
            serde_json::from_value(raw).map_err(|err| page_list_error(self, err))?;
        Ok(response.pages())
    }
}
