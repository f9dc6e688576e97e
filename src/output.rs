use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ChapterOutcome, DownloadReport, ListResult, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &DownloadReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_report(report: &DownloadReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        write_report(&mut stdout, report)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        if result.manga.is_empty() {
            writeln!(stdout, "no manga recorded yet")?;
        }
        for record in &result.manga {
            writeln!(stdout, "{}  {}", record.title, record.directory)?;
        }
        Ok(())
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        eprintln!("{}", event.message);
    }
}

pub fn write_report<W: Write>(out: &mut W, report: &DownloadReport) -> io::Result<()> {
    writeln!(
        out,
        "downloaded {} chapter(s), skipped {}, errors {}",
        report.downloaded_count(),
        report.skipped_count(),
        report.failures().len()
    )?;
    for manga in &report.manga {
        writeln!(out, "{}", manga.title)?;
        for chapter in &manga.chapters {
            match &chapter.outcome {
                ChapterOutcome::Downloaded { pages, .. } => {
                    writeln!(out, "  {} downloaded ({pages} pages)", chapter.number)?
                }
                ChapterOutcome::Failed { reason } => {
                    writeln!(out, "  {} failed: {reason}", chapter.number)?
                }
                other => writeln!(out, "  {} {}", chapter.number, other.label())?,
            }
        }
        for error in &manga.errors {
            writeln!(out, "  error: {error}")?;
        }
    }
    Ok(())
}
