use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    DownloadResult, EventLevel, ImportResult, ProgressEvent, ProgressSink, ResizeResult,
};
use crate::counter::CountSummary;
use crate::scraper::ScrapeSummary;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Console,
    Json,
}

/// Progress lines on stdout, failure lines on stderr.
pub struct ConsoleOutput;

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.level {
            EventLevel::Info => println!("{}", event.message),
            EventLevel::Failure => eprintln!("{}", event.message),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_scrape(result: &ScrapeSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_resize(result: &ResizeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_import(result: &ImportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_count(result: &CountSummary) -> io::Result<()> {
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

/// Keeps stdout clean for the final document; failures still reach stderr.
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        if event.level == EventLevel::Failure {
            eprintln!("{}", event.message);
        }
    }
}
