//! SubRip output for source transcripts and translated captions

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::timeline::Segment;

/// One numbered SubRip cue, times in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SRTEntry {
    pub index: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl SRTEntry {
    pub fn new(index: u32, start: f64, end: f64, text: &str) -> Self {
        Self {
            index,
            start: start.max(0.0),
            end: end.max(0.0),
            text: text.trim().to_string(),
        }
    }
}

impl fmt::Display for SRTEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.index)?;
        writeln!(f, "{} --> {}", srt_timestamp(self.start), srt_timestamp(self.end))?;
        writeln!(f, "{}", self.text)
    }
}

/// Problems that make a cue list unusable by players
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitleIssue {
    EmptyWindow { index: u32 },
    EmptyText { index: u32 },
    Overlap { first: u32, second: u32 },
}

impl fmt::Display for SubtitleIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubtitleIssue::EmptyWindow { index } => write!(f, "cue {} does not end after it starts", index),
            SubtitleIssue::EmptyText { index } => write!(f, "cue {} has no text", index),
            SubtitleIssue::Overlap { first, second } => write!(f, "cues {} and {} overlap", first, second),
        }
    }
}

/// Ordered list of cues rendered as an .srt document
#[derive(Debug, Clone, Default)]
pub struct SRTGenerator {
    entries: Vec<SRTEntry>,
}

impl SRTGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cues for the source-language text of a timeline
    pub fn from_segments(segments: &[Segment]) -> Self {
        let mut generator = Self::new();
        for seg in segments {
            generator.push(seg.start, seg.end, &seg.source_text);
        }
        generator
    }

    /// Append a cue numbered after the last one
    pub fn push(&mut self, start: f64, end: f64, text: &str) {
        let index = self.entries.len() as u32 + 1;
        self.entries.push(SRTEntry::new(index, start, end, text));
    }

    pub fn generate(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}\n", e))
            .collect()
    }

    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        tokio::fs::write(path.as_ref(), self.generate()).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SRTEntry] {
        &self.entries
    }

    /// Cue problems, in document order
    pub fn validate(&self) -> Vec<SubtitleIssue> {
        let mut issues = Vec::new();

        for entry in &self.entries {
            if entry.end <= entry.start {
                issues.push(SubtitleIssue::EmptyWindow { index: entry.index });
            }
            if entry.text.is_empty() {
                issues.push(SubtitleIssue::EmptyText { index: entry.index });
            }
        }
        for pair in self.entries.windows(2) {
            if pair[0].end > pair[1].start {
                issues.push(SubtitleIssue::Overlap {
                    first: pair[0].index,
                    second: pair[1].index,
                });
            }
        }

        issues
    }
}

/// Caption text helpers shared by the SubRip and ASS writers
pub struct SRTFormatter;

impl SRTFormatter {
    /// Collapse whitespace and line breaks to single spaces
    pub fn clean_text(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Break text into lines of at most `max_line_length` characters.
    ///
    /// A single word longer than the limit keeps a line to itself.
    pub fn wrap_text(text: &str, max_line_length: usize) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut current = String::new();

        for word in text.split_whitespace() {
            let fits = current.chars().count() + 1 + word.chars().count() <= max_line_length;
            if current.is_empty() {
                current.push_str(word);
            } else if fits {
                current.push(' ');
                current.push_str(word);
            } else {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }

        lines.join("\n")
    }
}

/// HH:MM:SS,mmm, rounded to the nearest millisecond
pub fn srt_timestamp(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_millis / 3_600_000,
        (total_millis / 60_000) % 60,
        (total_millis / 1000) % 60,
        total_millis % 1000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cue_rendering() {
        let entry = SRTEntry::new(3, 10.0, 15.25, "  नमस्ते ");
        assert_eq!(entry.to_string(), "3\n00:00:10,000 --> 00:00:15,250\nनमस्ते\n");
    }

    #[test]
    fn test_timestamps_round_to_millis() {
        assert_eq!(srt_timestamp(3661.0), "01:01:01,000");
        assert_eq!(srt_timestamp(1.4996), "00:00:01,500");
        assert_eq!(srt_timestamp(-2.0), "00:00:00,000");
    }

    #[test]
    fn test_source_subtitles_follow_segments() {
        let segments = vec![
            Segment::new(0, 1.0, 2.0, "First").unwrap(),
            Segment::new(1, 5.0, 6.0, "Second").unwrap(),
        ];
        let generator = SRTGenerator::from_segments(&segments);

        assert_eq!(generator.len(), 2);
        assert_eq!(
            generator.generate(),
            "1\n00:00:01,000 --> 00:00:02,000\nFirst\n\n2\n00:00:05,000 --> 00:00:06,000\nSecond\n\n"
        );
        assert!(generator.validate().is_empty());
    }

    #[test]
    fn test_wrapping_counts_characters() {
        let wrapped = SRTFormatter::wrap_text("नमस्ते दुनिया यह एक परीक्षण है", 12);
        assert!(wrapped.lines().count() > 1);
        assert!(wrapped.lines().all(|l| l.chars().count() <= 12));
        assert_eq!(SRTFormatter::wrap_text("supercalifragilistic a", 5), "supercalifragilistic\na");
        assert_eq!(SRTFormatter::clean_text("  a\tb\n\rc  "), "a b c");
    }

    #[test]
    fn test_validation_reports_each_problem() {
        let mut generator = SRTGenerator::new();
        generator.push(10.0, 5.0, "backwards");
        generator.push(4.0, 8.0, " ");

        assert_eq!(
            generator.validate(),
            vec![
                SubtitleIssue::EmptyWindow { index: 1 },
                SubtitleIssue::EmptyText { index: 2 },
                SubtitleIssue::Overlap { first: 1, second: 2 },
            ]
        );
    }
}
