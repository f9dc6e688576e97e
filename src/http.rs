use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::error::ChapterboxError;
use crate::fetcher::AbortSignal;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.headers.extend(headers);
        self
    }
}

pub trait HttpClient: Send + Sync {
    fn get_json(&self, request: &HttpRequest) -> Result<Value, ChapterboxError>;

    fn get_bytes(
        &self,
        request: &HttpRequest,
        abort: &AbortSignal,
    ) -> Result<Vec<u8>, ChapterboxError>;

    fn download(
        &self,
        request: &HttpRequest,
        destination: &Path,
        abort: &AbortSignal,
    ) -> Result<u64, ChapterboxError> {
        let bytes = self.get_bytes(request, abort)?;
        fs::write(destination, &bytes).map_err(|err| {
            ChapterboxError::Filesystem(format!("write {}: {err}", destination.display()))
        })?;
        Ok(bytes.len() as u64)
    }
}

#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, ChapterboxError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("chapterbox/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ChapterboxError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| ChapterboxError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn build(&self, request: &HttpRequest) -> RequestBuilder {
        let mut builder = self.client.get(&request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    fn send(&self, request: &HttpRequest) -> Result<Response, ChapterboxError> {
        let response = self
            .build(request)
            .send()
            .map_err(|err| ChapterboxError::Http(err.to_string()))?;
        handle_status(response)
    }
}

impl HttpClient for ReqwestHttpClient {
    fn get_json(&self, request: &HttpRequest) -> Result<Value, ChapterboxError> {
        self.send(request)?
            .json()
            .map_err(|err| ChapterboxError::Http(err.to_string()))
    }

    fn get_bytes(
        &self,
        request: &HttpRequest,
        abort: &AbortSignal,
    ) -> Result<Vec<u8>, ChapterboxError> {
        abort.check()?;
        let mut response = self.send(request)?;
        let mut bytes = Vec::new();
        copy_until_aborted(&mut response, &mut bytes, abort)?;
        Ok(bytes)
    }

    fn download(
        &self,
        request: &HttpRequest,
        destination: &Path,
        abort: &AbortSignal,
    ) -> Result<u64, ChapterboxError> {
        abort.check()?;
        let mut response = self.send(request)?;
        let mut file = File::create(destination).map_err(|err| {
            ChapterboxError::Filesystem(format!("create {}: {err}", destination.display()))
        })?;
        let written = copy_until_aborted(&mut response, &mut file, abort)?;
        file.flush()
            .map_err(|err| ChapterboxError::Filesystem(err.to_string()))?;
        Ok(written)
    }
}

pub fn handle_status(response: Response) -> Result<Response, ChapterboxError> {
    check_status(response, |status, message| ChapterboxError::HttpStatus { status, message })
}

/// Passes successful responses through; otherwise reads the body and hands
/// status and message to `into_error`.
pub fn check_status<F>(response: Response, into_error: F) -> Result<Response, ChapterboxError>
where
    F: FnOnce(u16, String) -> ChapterboxError,
{
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    Err(into_error(status, status_message(response.text().ok())))
}

fn status_message(body: Option<String>) -> String {
    body.map(|body| body.trim().to_string())
        .filter(|body| !body.is_empty())
        .unwrap_or_else(|| "request failed".to_string())
}

pub fn copy_until_aborted<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    abort: &AbortSignal,
) -> Result<u64, ChapterboxError> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        abort.check()?;
        let read = reader
            .read(&mut buffer)
            .map_err(|err| ChapterboxError::Http(err.to_string()))?;
        if read == 0 {
            return Ok(total);
        }
        writer
            .write_all(&buffer[..read])
            .map_err(|err| ChapterboxError::Filesystem(err.to_string()))?;
        total += read as u64;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn copy_stops_once_aborted() {
        let abort = AbortSignal::new();
        abort.request();
        let mut reader = Cursor::new(vec![1u8; 16]);
        let mut out = Vec::new();
        let err = copy_until_aborted(&mut reader, &mut out, &abort).unwrap_err();
        assert_matches!(err, ChapterboxError::Aborted);
        assert!(out.is_empty());
    }

    #[test]
    fn copy_reads_everything() {
        let abort = AbortSignal::new();
        let payload = vec![7u8; CHUNK_SIZE * 2 + 3];
        let mut out = Vec::new();
        let written =
            copy_until_aborted(&mut Cursor::new(payload.clone()), &mut out, &abort).unwrap();
        assert_eq!(written, payload.len() as u64);
        assert_eq!(out, payload);
    }

    #[test]
    fn status_message_falls_back_when_body_is_missing() {
        assert_eq!(status_message(None), "request failed");
        assert_eq!(status_message(Some("  \n".to_string())), "request failed");
        assert_eq!(status_message(Some(" rate limited\n".to_string())), "rate limited");
    }

    #[test]
    fn request_builder_collects_parts() {
        let request = HttpRequest::get("https://example.org/api")
            .query("chapter_id", "1000")
            .header("Referer", "https://example.org/");
        assert_eq!(request.query, vec![("chapter_id".to_string(), "1000".to_string())]);
        assert_eq!(request.headers.len(), 1);
    }
}
