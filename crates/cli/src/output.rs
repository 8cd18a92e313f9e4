//! Event line rendering

use anyhow::Result;
use chrono::{DateTime, Local, SecondsFormat};
use fsmon_core::EventKind;
use owo_colors::OwoColorize;
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};

/// How `fsmon monitor` prints events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Plain,
    Color,
    Json,
}

impl Format {
    pub fn select(json: bool) -> Self {
        use std::io::IsTerminal;

        if json {
            Format::Json
        } else if std::io::stdout().is_terminal() {
            Format::Color
        } else {
            Format::Plain
        }
    }
}

/// One delivered event as printed
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    #[serde(serialize_with = "rfc3339")]
    pub time: DateTime<Local>,
    pub kind: EventKind,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other: Option<PathBuf>,
}

fn rfc3339<S: Serializer>(time: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, false))
}

impl EventRecord {
    pub fn new(time: DateTime<Local>, path: &Path, other: Option<&Path>, kind: EventKind) -> Self {
        Self {
            time,
            kind,
            path: path.to_path_buf(),
            other: other.map(Path::to_path_buf),
        }
    }

    /// `<time> <path>: <kind> [-> other]`, or a JSON object
    pub fn render(&self, format: Format) -> Result<String> {
        if format == Format::Json {
            return Ok(serde_json::to_string(self)?);
        }

        let time = self.time.format("%H:%M:%S%.3f").to_string();
        let other = self
            .other
            .as_ref()
            .map(|other| format!(" -> {}", other.display()))
            .unwrap_or_default();

        if format == Format::Plain {
            return Ok(format!("{} {}: {}{}", time, self.path.display(), self.kind, other));
        }

        Ok(format!(
            "{} {}: {}{}",
            time.dimmed(),
            self.path.display(),
            paint(self.kind),
            other.cyan()
        ))
    }
}

fn paint(kind: EventKind) -> String {
    let name = kind.as_str();
    match kind {
        EventKind::Created | EventKind::MovedIn => name.green().to_string(),
        EventKind::Deleted | EventKind::MovedOut => name.red().to_string(),
        EventKind::Renamed | EventKind::Moved => name.cyan().to_string(),
        EventKind::Changed | EventKind::AttributeChanged => name.yellow().to_string(),
        EventKind::ChangesDoneHint => name.dimmed().to_string(),
        EventKind::PreUnmount | EventKind::Unmount => name.magenta().bold().to_string(),
    }
}
