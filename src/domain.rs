use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const MISSING_CHAPTER_NUMBER: &str = "-";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LocalisedRepr")]
pub struct LocalisedStrings(BTreeMap<String, String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum LocalisedRepr {
    Map(BTreeMap<String, String>),
    List(Vec<BTreeMap<String, String>>),
}

impl From<LocalisedRepr> for LocalisedStrings {
    fn from(value: LocalisedRepr) -> Self {
        match value {
            LocalisedRepr::Map(map) => Self(map),
            LocalisedRepr::List(list) => Self(list.into_iter().flatten().collect()),
        }
    }
}

impl LocalisedStrings {
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            values
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn get(&self, language: &str) -> Option<&str> {
        self.0
            .get(language)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn first(&self) -> Option<&str> {
        self.0
            .values()
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MangaAttributes {
    pub title: LocalisedStrings,
    pub alt_titles: LocalisedStrings,
    pub description: LocalisedStrings,
    pub original_language: Option<String>,
    pub status: Option<String>,
    pub year: Option<i32>,
    pub content_rating: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoverArtAttributes {
    pub description: Option<String>,
    pub volume: Option<String>,
    pub file_name: String,
    pub locale: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Relationship {
    Manga {
        id: String,
        attributes: Option<MangaAttributes>,
    },
    CoverArt {
        id: String,
        attributes: Option<CoverArtAttributes>,
    },
    Opaque {
        id: String,
        kind: String,
        attributes: Option<Value>,
    },
}

#[derive(Deserialize)]
struct RawRelationship {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Option<Value>,
}

impl TryFrom<RawRelationship> for Relationship {
    type Error = String;

    fn try_from(raw: RawRelationship) -> Result<Self, Self::Error> {
        fn decode<T: for<'de> Deserialize<'de>>(
            kind: &str,
            attributes: Option<Value>,
        ) -> Result<Option<T>, String> {
            attributes
                .filter(|value| !value.is_null())
                .map(serde_json::from_value)
                .transpose()
                .map_err(|err| format!("relationship of type {kind}: {err}"))
        }

        match raw.kind.as_str() {
            "manga" => Ok(Relationship::Manga {
                attributes: decode(&raw.kind, raw.attributes)?,
                id: raw.id,
            }),
            "cover_art" => Ok(Relationship::CoverArt {
                attributes: decode(&raw.kind, raw.attributes)?,
                id: raw.id,
            }),
            _ => Ok(Relationship::Opaque {
                id: raw.id,
                kind: raw.kind,
                attributes: raw.attributes,
            }),
        }
    }
}

impl<'de> Deserialize<'de> for Relationship {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawRelationship::deserialize(deserializer)?;
        Relationship::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl Relationship {
    pub fn id(&self) -> &str {
        match self {
            Relationship::Manga { id, .. }
            | Relationship::CoverArt { id, .. }
            | Relationship::Opaque { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manga {
    pub id: String,
    #[serde(default)]
    pub attributes: MangaAttributes,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Manga {
    pub fn title(&self, language: &str) -> String {
        let attributes = &self.attributes;
        attributes
            .title
            .get(language)
            .or_else(|| attributes.title.first())
            .or_else(|| attributes.alt_titles.get(language))
            .or_else(|| attributes.alt_titles.first())
            .unwrap_or(self.id.as_str())
            .to_string()
    }

    pub fn description(&self, language: &str) -> Option<&str> {
        self.attributes
            .description
            .get(language)
            .or_else(|| self.attributes.description.first())
    }

    pub fn cover_file_name(&self) -> Option<&str> {
        self.relationships.iter().find_map(|rel| match rel {
            Relationship::CoverArt {
                attributes: Some(attributes),
                ..
            } if !attributes.file_name.is_empty() => Some(attributes.file_name.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterAttributes {
    pub title: Option<String>,
    pub volume: Option<String>,
    pub chapter: Option<String>,
    pub translated_language: Option<String>,
    pub external_url: Option<String>,
    pub pages: Option<u32>,
    pub publish_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Chapter {
    pub id: String,
    #[serde(default)]
    pub attributes: ChapterAttributes,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Chapter {
    pub fn new(id: &str, number: Option<&str>, external_url: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            attributes: ChapterAttributes {
                chapter: number.map(str::to_string),
                external_url: external_url.map(str::to_string),
                ..ChapterAttributes::default()
            },
            relationships: Vec::new(),
        }
    }

    pub fn number(&self) -> &str {
        self.attributes
            .chapter
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(MISSING_CHAPTER_NUMBER)
    }

    pub fn external_url(&self) -> Option<&str> {
        self.attributes
            .external_url
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }

    pub fn origin_host(&self) -> String {
        match self.external_url() {
            Some(raw) => Url::parse(raw)
                .ok()
                .and_then(|url| url.host_str().map(str::to_string))
                .unwrap_or_else(|| raw.to_string()),
            None => "mangadex.org".to_string(),
        }
    }

    pub fn manga(&self) -> Option<Manga> {
        self.relationships.iter().find_map(|rel| match rel {
            Relationship::Manga { id, attributes } => Some(Manga {
                id: id.clone(),
                attributes: attributes.clone().unwrap_or_default(),
                relationships: Vec::new(),
            }),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FeedChapter {
    pub chapter: Chapter,
    pub is_read: bool,
}

impl FeedChapter {
    pub fn unread(chapter: Chapter) -> Self {
        Self {
            chapter,
            is_read: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MangaWithChapters {
    pub manga: Manga,
    pub chapters: Vec<FeedChapter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub url: String,
    pub fallback_url: Option<String>,
    pub encryption_key: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Page {
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
            fallback_url: None,
            encryption_key: None,
            headers: Vec::new(),
        }
    }

    pub fn with_fallback(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = Some(url.into());
        self
    }

    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn extension(&self) -> String {
        image_extension(&self.url)
    }
}

pub fn image_extension(raw: &str) -> String {
    let path = match Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let name = path.rsplit('/').next().unwrap_or_default();
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|ch| ch.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => "jpg".to_string(),
    }
}

pub fn page_file_name(index: usize, page_count: usize, extension: &str) -> String {
    let width = page_count.max(1).to_string().len().max(3);
    format!("{index:0width$}.{extension}")
}
