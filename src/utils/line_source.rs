//! Where operator lines come from.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadLine {
    /// A line without its terminating newline.
    Line(String),
    Eof,
    /// The operator pressed Ctrl-C while the line was being typed.
    Interrupted,
    /// The operator asked for completions of a partial line.
    Complete(String),
}

/// A line typed with a trailing tab asks for completions instead of being
/// submitted.
pub const COMPLETION_KEY: char = '\t';

/// Classify a raw line with its newline already stripped.
pub fn classify(line: &str) -> ReadLine {
    match line.strip_suffix(COMPLETION_KEY) {
        Some(partial) => ReadLine::Complete(partial.to_string()),
        None => ReadLine::Line(line.to_string()),
    }
}

#[async_trait]
pub trait LineSource: Send {
    async fn read_line(&mut self, prompt: &str) -> io::Result<ReadLine>;

    /// Show the candidates found for a `ReadLine::Complete` request.
    fn offer_completions(&mut self, _partial: &str, _candidates: &[String]) {}

    /// Lines entered in this and earlier sessions, oldest first.
    fn history(&self) -> &[String] {
        &[]
    }
}

/// Append-only line history file.
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }

    /// Previously stored lines, oldest first. A missing file is empty history.
    pub fn load(&self) -> io::Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}

/// Lines read from the process stdin. Ctrl-C aborts the pending read.
pub struct StdinLineSource {
    reader: BufReader<Stdin>,
    history: Option<History>,
    /// Loaded history plus the lines typed since.
    recalled: Vec<String>,
}

impl StdinLineSource {
    pub fn new(history: Option<History>) -> Self {
        let recalled = match history.as_ref().map(History::load).transpose() {
            Ok(lines) => lines.unwrap_or_default(),
            Err(err) => {
                tracing::warn!("Failed to load history: {err}");
                Vec::new()
            }
        };
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            history,
            recalled,
        }
    }

    fn remember(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if let Some(history) = &self.history {
            if let Err(err) = history.append(line) {
                tracing::warn!("Failed to append to {}: {err}", history.path().display());
            }
        }
        self.recalled.push(line.to_string());
    }
}

#[async_trait]
impl LineSource for StdinLineSource {
    async fn read_line(&mut self, prompt: &str) -> io::Result<ReadLine> {
        {
            let mut stdout = io::stdout().lock();
            write!(stdout, "{prompt}")?;
            stdout.flush()?;
        }

        let mut buf = String::new();
        let read = tokio::select! {
            res = self.reader.read_line(&mut buf) => res?,
            _ = tokio::signal::ctrl_c() => {
                // `read_line` is not cancel safe: whatever it already moved into
                // `buf` is discarded with the interrupted line.
                println!();
                return Ok(ReadLine::Interrupted);
            }
        };
        if read == 0 {
            return Ok(ReadLine::Eof);
        }

        let read = classify(buf.trim_end_matches(['\n', '\r']));
        if let ReadLine::Line(line) = &read {
            self.remember(line);
        }
        Ok(read)
    }

    fn offer_completions(&mut self, partial: &str, candidates: &[String]) {
        let mut stdout = io::stdout().lock();
        let _ = match candidates {
            [] => writeln!(stdout, "No completions for '{partial}'"),
            _ => writeln!(stdout, "{}", candidates.join("\n")),
        };
    }

    fn history(&self) -> &[String] {
        &self.recalled
    }
}
