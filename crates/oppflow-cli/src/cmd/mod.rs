pub mod action;
pub mod config;
pub mod doc;
pub mod init;
pub mod opportunity;
pub mod report;
pub mod risk;
pub mod serve;
pub mod stage;
pub mod sweep;
pub mod template;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use oppflow_core::Engine;
use std::path::Path;

/// Open the engine for `root`, pointing at `oppflow init` when nothing is there.
pub fn open_engine(root: &Path) -> anyhow::Result<Engine> {
    Engine::open(root).with_context(|| format!("failed to open project at {}", root.display()))
}

/// Clap parser for timestamps: RFC 3339, or a bare `YYYY-MM-DD` meaning midnight UTC.
pub fn parse_when(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("'{s}' is not a date (YYYY-MM-DD) or RFC 3339 timestamp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_when_accepts_dates_and_timestamps() {
        assert_eq!(
            parse_when("2026-04-01").unwrap(),
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_when("2026-04-01T11:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2026, 4, 1, 9, 30, 0).unwrap()
        );
        assert!(parse_when("April 1st").is_err());
    }
}
