//! Progress extraction from streamed stdout.
//!
//! The default extractor looks for the last `NN%` token in a chunk, which is
//! what most package managers and build tools print.

use super::types::ProgressInfo;
use regex::Regex;
use std::sync::LazyLock;

static PERCENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})%").expect("percent regex is valid"));

/// Turns a chunk of stdout into a progress report.
pub trait ProgressExtractor: Send + Sync {
    fn extract(&self, chunk: &str) -> Option<ProgressInfo>;
}

/// Scans for `NN%` and reports the last match in the chunk.
#[derive(Debug, Default, Clone, Copy)]
pub struct PercentExtractor;

impl ProgressExtractor for PercentExtractor {
    fn extract(&self, chunk: &str) -> Option<ProgressInfo> {
        let cap = PERCENT_REGEX.captures_iter(chunk).last()?;
        let percentage = cap.get(1)?.as_str().parse::<u16>().ok()?;
        Some(ProgressInfo {
            percentage: percentage.min(100) as u8,
            message: chunk.trim().to_string(),
        })
    }
}

/// Never reports progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressExtractor for NoProgress {
    fn extract(&self, _chunk: &str) -> Option<ProgressInfo> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_percentage() {
        let info = PercentExtractor.extract("Downloading... 42%\n").unwrap();
        assert_eq!(info.percentage, 42);
        assert_eq!(info.message, "Downloading... 42%");
    }

    #[test]
    fn test_uses_last_percentage_in_chunk() {
        let info = PercentExtractor.extract("10%\n20%\n75%").unwrap();
        assert_eq!(info.percentage, 75);
    }

    #[test]
    fn test_clamps_to_hundred() {
        let info = PercentExtractor.extract("overdrive 250%").unwrap();
        assert_eq!(info.percentage, 100);
    }

    #[test]
    fn test_no_percentage() {
        assert!(PercentExtractor.extract("compiling foo v0.1.0").is_none());
        assert!(NoProgress.extract("50%").is_none());
    }
}
