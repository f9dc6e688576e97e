use std::collections::HashMap;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::Credentials;
use crate::domain::{Chapter, FeedChapter, Manga, MangaWithChapters};
use crate::error::ChapterboxError;
use crate::http::check_status;

pub const API_BASE: &str = "https://api.mangadex.org";
pub const AUTH_URL: &str =
    "https://auth.mangadex.org/realms/mangadex/protocol/openid-connect/token";
pub const UPLOADS_BASE: &str = "https://uploads.mangadex.org";
const PAGE_LIMIT: usize = 100;

static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("uuid pattern")
});

pub trait Catalog: Send + Sync {
    fn cover_url(&self, manga_id: &str) -> Result<String, ChapterboxError>;
    fn mark_read(&self, manga_id: &str, chapter_ids: &[String]) -> Result<(), ChapterboxError>;
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ChapterList {
    #[serde(default)]
    data: Vec<Chapter>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct MangaResponse {
    data: Manga,
}

#[derive(Debug, Deserialize)]
struct ReadMarkers {
    #[serde(default)]
    data: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadPayload<'a> {
    chapter_ids_read: &'a [String],
    chapter_ids_unread: [String; 0],
}

#[derive(Clone)]
pub struct MangadexCatalog {
    client: Client,
    api_base: String,
    auth_url: String,
    uploads_base: String,
    language: String,
    token: Option<String>,
}

impl MangadexCatalog {
    pub fn new(client: Client, language: &str) -> Self {
        Self {
            client,
            api_base: API_BASE.to_string(),
            auth_url: AUTH_URL.to_string(),
            uploads_base: UPLOADS_BASE.to_string(),
            language: language.to_string(),
            token: None,
        }
    }

    pub fn with_endpoints(mut self, api_base: &str, auth_url: &str, uploads_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.auth_url = auth_url.to_string();
        self.uploads_base = uploads_base.trim_end_matches('/').to_string();
        self
    }

    pub fn login(&mut self, credentials: &Credentials) -> Result<(), ChapterboxError> {
        let response = self
            .client
            .post(&self.auth_url)
            .form(&[
                ("grant_type", "password"),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
            ])
            .send()
            .map_err(|err| ChapterboxError::Catalog(format!("login request failed: {err}")))?;
        let login: LoginResponse = Self::handle_status(response)?
            .json()
            .map_err(|err| ChapterboxError::Catalog(format!("login response: {err}")))?;
        self.token = Some(login.access_token);
        info!(user = %credentials.username, "logged in");
        Ok(())
    }

    pub fn followed_feed(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<MangaWithChapters>, ChapterboxError> {
        let url = format!("{}/user/follows/manga/feed", self.api_base);
        let since = catalog_time_format(since);
        let chapters = self.collect_chapters(|offset| {
            self.authorized(self.client.get(&url)).query(&[
                ("limit", PAGE_LIMIT.to_string()),
                ("offset", offset.to_string()),
                ("order[readableAt]", "desc".to_string()),
                ("translatedLanguage[]", self.language.clone()),
                ("includes[]", "manga".to_string()),
                ("createdAtSince", since.clone()),
            ])
        })?;

        let mut manga_list = group_by_manga(chapters);
        for entry in &mut manga_list {
            let read = self.read_markers(&entry.manga.id)?;
            for chapter in &mut entry.chapters {
                chapter.is_read = read.contains(&chapter.chapter.id);
            }
            entry.chapters.retain(|chapter| !chapter.is_read);
        }
        manga_list.retain(|entry| !entry.chapters.is_empty());
        info!(manga = manga_list.len(), "followed feed loaded");
        Ok(manga_list)
    }

    pub fn manga_chapters(&self, manga_url: &str) -> Result<MangaWithChapters, ChapterboxError> {
        let manga_id = extract_manga_id(manga_url)?;
        let url = format!("{}/chapter", self.api_base);
        let chapters = self.collect_chapters(|offset| {
            self.authorized(self.client.get(&url)).query(&[
                ("limit", PAGE_LIMIT.to_string()),
                ("offset", offset.to_string()),
                ("manga", manga_id.clone()),
                ("translatedLanguage[]", self.language.clone()),
                ("includes[]", "manga".to_string()),
            ])
        })?;
        if chapters.is_empty() {
            return Err(ChapterboxError::Catalog(format!(
                "no chapters available for manga {manga_id}"
            )));
        }
        group_by_manga(chapters)
            .into_iter()
            .find(|entry| entry.manga.id == manga_id)
            .ok_or(ChapterboxError::MissingManga(manga_id))
    }

    pub fn read_markers(&self, manga_id: &str) -> Result<Vec<String>, ChapterboxError> {
        let url = format!("{}/manga/read", self.api_base);
        let response = self.send_with_retries(|| {
            self.authorized(self.client.get(&url))
                .query(&[("ids[]", manga_id)])
        })?;
        let markers: ReadMarkers = Self::handle_status(response)?
            .json()
            .map_err(|err| ChapterboxError::Catalog(err.to_string()))?;
        Ok(markers.data)
    }

    fn collect_chapters<F>(&self, mut make_req: F) -> Result<Vec<Chapter>, ChapterboxError>
    where
        F: FnMut(usize) -> RequestBuilder,
    {
        let mut chapters = Vec::new();
        loop {
            let offset = chapters.len();
            let response = self.send_with_retries(|| make_req(offset))?;
            let list: ChapterList = Self::handle_status(response)?
                .json()
                .map_err(|err| ChapterboxError::Catalog(err.to_string()))?;
            debug!(offset, received = list.data.len(), total = list.total, "chapter page");
            let received = list.data.len();
            chapters.extend(list.data);
            if received == 0 || chapters.len() >= list.total {
                return Ok(chapters);
            }
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn handle_status(response: Response) -> Result<Response, ChapterboxError> {
        check_status(response, catalog_status_error)
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, ChapterboxError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(ChapterboxError::Catalog(err.to_string()));
                }
            }
        }
    }
}

impl Catalog for MangadexCatalog {
    fn cover_url(&self, manga_id: &str) -> Result<String, ChapterboxError> {
        let url = format!("{}/manga/{manga_id}", self.api_base);
        let response = self.send_with_retries(|| {
            self.authorized(self.client.get(&url))
                .query(&[("includes[]", "cover_art")])
        })?;
        let manga: MangaResponse = Self::handle_status(response)?
            .json()
            .map_err(|err| ChapterboxError::Catalog(format!("can't get manga cover: {err}")))?;
        let file_name = manga.data.cover_file_name().ok_or_else(|| {
            ChapterboxError::Catalog(format!("manga {manga_id} has no cover art"))
        })?;
        Ok(format!("{}/covers/{manga_id}/{file_name}", self.uploads_base))
    }

    fn mark_read(&self, manga_id: &str, chapter_ids: &[String]) -> Result<(), ChapterboxError> {
        let url = format!("{}/manga/{manga_id}/read", self.api_base);
        let payload = ReadPayload {
            chapter_ids_read: chapter_ids,
            chapter_ids_unread: [],
        };
        let response = self
            .authorized(self.client.post(&url))
            .json(&payload)
            .send()
            .map_err(|err| ChapterboxError::Catalog(err.to_string()))?;
        Self::handle_status(response)?;
        Ok(())
    }
}

pub fn group_by_manga(chapters: Vec<Chapter>) -> Vec<MangaWithChapters> {
    let mut index = HashMap::<String, usize>::new();
    let mut grouped: Vec<MangaWithChapters> = Vec::new();
    for chapter in chapters {
        let Some(manga) = chapter.manga() else {
            debug!(chapter = %chapter.id, "chapter without manga relationship");
            continue;
        };
        match index.get(&manga.id) {
            Some(&position) => grouped[position].chapters.push(FeedChapter::unread(chapter)),
            None => {
                index.insert(manga.id.clone(), grouped.len());
                grouped.push(MangaWithChapters {
                    manga,
                    chapters: vec![FeedChapter::unread(chapter)],
                });
            }
        }
    }
    grouped
}

pub fn extract_manga_id(manga_url: &str) -> Result<String, ChapterboxError> {
    let url = Url::parse(manga_url)
        .map_err(|err| ChapterboxError::InvalidMangaUrl(format!("{manga_url}: {err}")))?;
    let candidate = url
        .path_segments()
        .and_then(|mut segments| segments.nth(1))
        .ok_or_else(|| ChapterboxError::InvalidMangaUrl(format!("{manga_url}: no manga id")))?;
    if !UUID.is_match(candidate) {
        return Err(ChapterboxError::InvalidMangaUrl(format!(
            "{manga_url}: {candidate} is not a uuid"
        )));
    }
    Ok(candidate.to_lowercase())
}

pub fn catalog_time_format(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn catalog_status_error(status: u16, message: String) -> ChapterboxError {
    ChapterboxError::CatalogStatus { status, message }
}
