use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Value, json};

use chapterbox::app::{App, ChapterOutcome, ProgressEvent, ProgressSink};
use chapterbox::archive::entry_names;
use chapterbox::catalog::Catalog;
use chapterbox::domain::{
    Chapter, FeedChapter, LocalisedStrings, Manga, MangaAttributes, MangaWithChapters,
};
use chapterbox::error::ChapterboxError;
use chapterbox::fetcher::{AbortSignal, BoundedFetcher};
use chapterbox::http::{HttpClient, HttpRequest};
use chapterbox::output::JsonOutput;
use chapterbox::pipeline::ChapterPipeline;
use chapterbox::sources::SourceResolver;
use chapterbox::store::{MangaLibrary, Store};

#[derive(Clone, Default)]
struct MockHttp {
    json: HashMap<String, Value>,
    bytes: HashMap<String, Vec<u8>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl HttpClient for MockHttp {
    fn get_json(&self, request: &HttpRequest) -> Result<Value, ChapterboxError> {
        self.calls.lock().unwrap().push(request.url.clone());
        self.json
            .get(&request.url)
            .cloned()
            .ok_or(ChapterboxError::HttpStatus {
                status: 404,
                message: request.url.clone(),
            })
    }

    fn get_bytes(
        &self,
        request: &HttpRequest,
        _abort: &AbortSignal,
    ) -> Result<Vec<u8>, ChapterboxError> {
        self.calls.lock().unwrap().push(request.url.clone());
        self.bytes
            .get(&request.url)
            .cloned()
            .ok_or(ChapterboxError::HttpStatus {
                status: 404,
                message: request.url.clone(),
            })
    }
}

#[derive(Default)]
struct MockCatalog {
    fail_mark_read: bool,
    fail_cover: bool,
    marked: Mutex<Vec<(String, Vec<String>)>>,
}

impl Catalog for MockCatalog {
    fn cover_url(&self, manga_id: &str) -> Result<String, ChapterboxError> {
        if self.fail_cover {
            return Err(ChapterboxError::CatalogStatus {
                status: 404,
                message: "no cover".to_string(),
            });
        }
        Ok(format!("https://uploads.test/covers/{manga_id}/cover.jpg"))
    }

    fn mark_read(&self, manga_id: &str, chapter_ids: &[String]) -> Result<(), ChapterboxError> {
        self.marked
            .lock()
            .unwrap()
            .push((manga_id.to_string(), chapter_ids.to_vec()));
        if self.fail_mark_read {
            return Err(ChapterboxError::CatalogStatus {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

struct FailingLibrary;

impl MangaLibrary for FailingLibrary {
    fn record_manga(
        &self,
        _manga: &Manga,
        _title: &str,
        _language: &str,
        _directory: &Utf8Path,
    ) -> Result<(), ChapterboxError> {
        Err(ChapterboxError::Filesystem("read-only".to_string()))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}

struct CancelOnEvent {
    trigger: &'static str,
    cancel: AbortSignal,
}

impl ProgressSink for CancelOnEvent {
    fn event(&self, event: ProgressEvent) {
        if event.message == self.trigger {
            self.cancel.request();
        }
    }
}

fn temp_store(temp: &tempfile::TempDir) -> Store {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    Store::new_with_paths(root.join("downloads"), root.join("meta"))
}

fn manga(id: &str, title: &str) -> Manga {
    Manga {
        id: id.to_string(),
        attributes: MangaAttributes {
            title: LocalisedStrings::new([("en", title)]),
            ..MangaAttributes::default()
        },
        relationships: Vec::new(),
    }
}

fn entry(manga: Manga, chapters: Vec<Chapter>) -> MangaWithChapters {
    MangaWithChapters {
        manga,
        chapters: chapters.into_iter().map(FeedChapter::unread).collect(),
    }
}

fn serve_chapter(http: &mut MockHttp, chapter_id: &str, files: &[&str]) {
    http.json.insert(
        format!("https://api.mangadex.org/at-home/server/{chapter_id}"),
        json!({
            "baseUrl": "https://cdn.test",
            "chapter": {"hash": chapter_id, "data": files, "dataSaver": []}
        }),
    );
    for file in files {
        http.bytes.insert(
            format!("https://cdn.test/data/{chapter_id}/{file}"),
            file.as_bytes().to_vec(),
        );
    }
}

fn serve_cover(http: &mut MockHttp, manga_id: &str) {
    http.bytes.insert(
        format!("https://uploads.test/covers/{manga_id}/cover.jpg"),
        b"cover".to_vec(),
    );
}

fn app<L: MangaLibrary>(store: &Store, library: L, http: MockHttp) -> App<MockHttp, L> {
    let pipeline = ChapterPipeline::new(
        SourceResolver::with_default_sources(),
        http,
        BoundedFetcher::default(),
    );
    App::new(store.clone(), library, pipeline, "en")
}

#[test]
fn skips_archived_chapter_and_marks_only_downloaded_one_read() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let mut http = MockHttp::default();
    serve_chapter(&mut http, "chapter-2", &["p1.jpg", "p2.jpg"]);
    serve_cover(&mut http, "M");

    let manga_dir = store.manga_dir("Manga M");
    fs::create_dir_all(manga_dir.as_std_path()).unwrap();
    fs::write(manga_dir.join("1.cbz").as_std_path(), b"archived").unwrap();

    let batch = vec![entry(
        manga("M", "Manga M"),
        vec![
            Chapter::new("chapter-1", Some("1"), None),
            Chapter::new("chapter-2", Some("2"), None),
        ],
    )];
    let catalog = MockCatalog::default();
    let sink = RecordingSink::default();
    let app = app(&store, store.clone(), http.clone());

    let report = app
        .download_manga(&batch, &catalog, &AbortSignal::new(), &sink)
        .unwrap();

    assert_eq!(
        *catalog.marked.lock().unwrap(),
        vec![("M".to_string(), vec!["chapter-2".to_string()])]
    );
    let chapters = &report.manga[0].chapters;
    assert_matches!(chapters[0].outcome, ChapterOutcome::Skipped { .. });
    assert_matches!(chapters[1].outcome, ChapterOutcome::Downloaded { pages: 2, .. });
    assert!(report.is_success());
    assert_eq!(report.downloaded_count(), 1);

    assert_eq!(fs::read(manga_dir.join("1.cbz").as_std_path()).unwrap(), b"archived");
    assert_eq!(
        entry_names(manga_dir.join("2.cbz").as_std_path()).unwrap(),
        vec!["000.jpg", "001.jpg"]
    );
    assert_eq!(fs::read(manga_dir.join("cover.jpg").as_std_path()).unwrap(), b"cover");
    assert!(!http.calls.lock().unwrap().iter().any(|url| url.contains("chapter-1")));
    assert_eq!(store.read_record("M").unwrap().unwrap().title, "Manga M");
    assert!(sink.events.lock().unwrap().contains(&"chapter 2: downloaded".to_string()));
}

#[test]
fn failures_are_collected_without_stopping_the_batch() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let mut http = MockHttp::default();
    serve_chapter(&mut http, "b-1", &["p.jpg"]);
    serve_cover(&mut http, "A");
    serve_cover(&mut http, "B");

    let batch = vec![
        entry(
            manga("A", "Alpha"),
            vec![Chapter::new("a-1", Some("1"), Some("https://comikey.com/read/1"))],
        ),
        entry(manga("B", "Beta"), vec![Chapter::new("b-1", Some("1"), None)]),
    ];
    let catalog = MockCatalog {
        fail_mark_read: true,
        ..MockCatalog::default()
    };
    let app = app(&store, store.clone(), http);

    let report = app
        .download_manga(&batch, &catalog, &AbortSignal::new(), &JsonOutput)
        .unwrap();

    assert_eq!(
        report.failures(),
        vec![
            "failed to download chapter: cannot download chapter 1: unknown source comikey.com"
                .to_string(),
            "failed to mark manga as read: catalog returned status 503: unavailable".to_string(),
        ]
    );
    assert_eq!(catalog.marked.lock().unwrap().len(), 1);
    assert!(store.manga_dir("Beta").join("1.cbz").as_std_path().exists());

    let summary = report.summary();
    let err = report.into_result().unwrap_err();
    assert_matches!(err, ChapterboxError::PartialFailure { count: 2, .. });
    assert!(err.to_string().ends_with(&summary));
}

#[test]
fn cancellation_stops_at_manga_boundary() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let mut http = MockHttp::default();
    serve_chapter(&mut http, "c", &["p.jpg"]);
    let batch = vec![entry(manga("A", "Alpha"), vec![Chapter::new("c", Some("1"), None)])];
    let catalog = MockCatalog::default();
    let cancel = AbortSignal::new();
    cancel.request();
    let app = app(&store, store.clone(), http.clone());

    let err = app
        .download_manga(&batch, &catalog, &cancel, &JsonOutput)
        .unwrap_err();

    assert_matches!(err, ChapterboxError::Cancelled);
    assert!(http.calls.lock().unwrap().is_empty());
    assert!(catalog.marked.lock().unwrap().is_empty());
}

#[test]
fn cancellation_mid_batch_finishes_current_manga_only() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let mut http = MockHttp::default();
    serve_chapter(&mut http, "a-1", &["p.jpg"]);
    serve_chapter(&mut http, "a-2", &["p.jpg"]);
    serve_chapter(&mut http, "b-1", &["p.jpg"]);
    serve_cover(&mut http, "A");
    serve_cover(&mut http, "B");
    let batch = vec![
        entry(
            manga("A", "Alpha"),
            vec![
                Chapter::new("a-1", Some("1"), None),
                Chapter::new("a-2", Some("2"), None),
            ],
        ),
        entry(manga("B", "Beta"), vec![Chapter::new("b-1", Some("1"), None)]),
    ];
    let catalog = MockCatalog::default();
    let cancel = AbortSignal::new();
    let sink = CancelOnEvent {
        trigger: "chapter 1: downloaded",
        cancel: cancel.clone(),
    };
    let app = app(&store, store.clone(), http.clone());

    let err = app
        .download_manga(&batch, &catalog, &cancel, &sink)
        .unwrap_err();

    assert_matches!(err, ChapterboxError::Cancelled);
    let alpha = store.manga_dir("Alpha");
    assert!(alpha.join("1.cbz").as_std_path().exists());
    assert!(alpha.join("2.cbz").as_std_path().exists());
    assert!(!store.manga_dir("Beta").as_std_path().exists());
    assert_eq!(
        *catalog.marked.lock().unwrap(),
        vec![("A".to_string(), vec!["a-1".to_string(), "a-2".to_string()])]
    );
    let calls = http.calls.lock().unwrap();
    assert!(calls.iter().all(|url| !url.contains("b-1") && !url.contains("/B/")));
}

#[test]
fn cover_failure_is_recorded_but_chapters_still_download() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let mut http = MockHttp::default();
    serve_chapter(&mut http, "c", &["p.jpg"]);
    let batch = vec![entry(manga("A", "Alpha"), vec![Chapter::new("c", Some("3"), None)])];
    let catalog = MockCatalog {
        fail_cover: true,
        ..MockCatalog::default()
    };
    let app = app(&store, store.clone(), http);

    let report = app
        .download_manga(&batch, &catalog, &AbortSignal::new(), &JsonOutput)
        .unwrap();

    assert_eq!(report.downloaded_count(), 1);
    assert_eq!(report.failures().len(), 1);
    assert!(report.failures()[0].starts_with("failed to download manga cover"));
    assert!(!store.manga_dir("Alpha").join("cover.jpg.part").as_std_path().exists());
}

#[test]
fn record_failure_skips_manga_and_nothing_is_marked() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let http = MockHttp::default();
    let batch = vec![entry(manga("A", "Alpha"), vec![Chapter::new("c", Some("1"), None)])];
    let catalog = MockCatalog::default();
    let app = app(&store, FailingLibrary, http.clone());

    let report = app
        .download_manga(&batch, &catalog, &AbortSignal::new(), &JsonOutput)
        .unwrap();

    assert!(report.manga[0].chapters.is_empty());
    assert_eq!(report.failures().len(), 1);
    assert!(http.calls.lock().unwrap().is_empty());
    assert!(catalog.marked.lock().unwrap().is_empty());
}

#[test]
fn already_read_chapters_are_not_fetched() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let mut http = MockHttp::default();
    serve_cover(&mut http, "A");
    let batch = vec![MangaWithChapters {
        manga: manga("A", "Alpha"),
        chapters: vec![FeedChapter {
            chapter: Chapter::new("c", Some("1"), None),
            is_read: true,
        }],
    }];
    let catalog = MockCatalog::default();
    let app = app(&store, store.clone(), http.clone());

    let report = app
        .download_manga(&batch, &catalog, &AbortSignal::new(), &JsonOutput)
        .unwrap();

    assert_eq!(report.manga[0].chapters[0].outcome, ChapterOutcome::AlreadyRead);
    assert!(catalog.marked.lock().unwrap().is_empty());
    assert!(!http.calls.lock().unwrap().iter().any(|url| url.contains("at-home")));
}
