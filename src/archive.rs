use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::ChapterboxError;

pub const ARCHIVE_EXTENSION: &str = "cbz";

pub fn archive_path_for(staging_dir: &Path) -> PathBuf {
    let mut name = OsString::from(staging_dir.as_os_str());
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

pub fn package_directory(staging_dir: &Path) -> Result<PathBuf, ChapterboxError> {
    let entries = sorted_entries(staging_dir)?;
    let archive_path = archive_path_for(staging_dir);
    write_archive(&archive_path, &entries)?;
    verify_archive(&archive_path, entries.len())?;
    debug!(archive = %archive_path.display(), entries = entries.len(), "archive written");

    fs::remove_dir_all(staging_dir).map_err(|err| {
        ChapterboxError::Packaging(format!("remove {}: {err}", staging_dir.display()))
    })?;
    Ok(archive_path)
}

pub fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, ChapterboxError> {
    let read = fs::read_dir(dir)
        .map_err(|err| ChapterboxError::Packaging(format!("read {}: {err}", dir.display())))?;
    let mut files = Vec::new();
    for entry in read {
        let entry = entry.map_err(|err| ChapterboxError::Packaging(err.to_string()))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn write_archive(archive_path: &Path, entries: &[PathBuf]) -> Result<(), ChapterboxError> {
    let file = fs::File::create(archive_path).map_err(|err| {
        ChapterboxError::Packaging(format!("create {}: {err}", archive_path.display()))
    })?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    for path in entries {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ChapterboxError::Packaging(format!("non-utf8 file name: {}", path.display()))
            })?;
        zip.start_file(name, options)
            .map_err(|err| ChapterboxError::Packaging(format!("{name}: {err}")))?;
        let mut source = fs::File::open(path)
            .map_err(|err| ChapterboxError::Packaging(format!("open {name}: {err}")))?;
        io::copy(&mut source, &mut zip)
            .map_err(|err| ChapterboxError::Packaging(format!("copy {name}: {err}")))?;
    }

    zip.finish()
        .map_err(|err| ChapterboxError::Packaging(err.to_string()))?;
    Ok(())
}

fn verify_archive(archive_path: &Path, expected_entries: usize) -> Result<(), ChapterboxError> {
    validate_archive(archive_path).map_err(|err| {
        ChapterboxError::Packaging(format!("verify {}: {err}", archive_path.display()))
    })?;
    let written = entry_names(archive_path)
        .map_err(|err| ChapterboxError::Packaging(err.to_string()))?
        .len();
    if written != expected_entries {
        return Err(ChapterboxError::Packaging(format!(
            "{} holds {written} entries, expected {expected_entries}",
            archive_path.display()
        )));
    }
    Ok(())
}

pub fn entry_names(archive_path: &Path) -> Result<Vec<String>, ChapterboxError> {
    let mut archive = open_archive(archive_path)?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|err| ChapterboxError::Filesystem(err.to_string()))?;
        names.push(entry.name().to_string());
    }
    Ok(names)
}

pub fn validate_archive(archive_path: &Path) -> Result<(), ChapterboxError> {
    let mut archive = open_archive(archive_path)?;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| ChapterboxError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| ChapterboxError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

fn open_archive(archive_path: &Path) -> Result<ZipArchive<fs::File>, ChapterboxError> {
    let file = fs::File::open(archive_path).map_err(|err| {
        ChapterboxError::Filesystem(format!("open archive {}: {err}", archive_path.display()))
    })?;
    ZipArchive::new(file).map_err(|err| ChapterboxError::Filesystem(err.to_string()))
}
