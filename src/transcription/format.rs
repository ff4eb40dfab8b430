//! # Output Formatting
//!
//! Renders a [`TranscriptionResult`] as plain text, SubRip (SRT) or WebVTT.
//!
//! ## Timestamps:
//! Times are rounded to whole milliseconds once, then split into fields, so
//! 59.9996 s renders as `01:00.000` and never as `00:59.1000`.
//! SRT cues show the hours field only from one hour on; VTT cues always
//! carry it.

use crate::transcription::engine::TranscriptionResult;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Output format selected in the upload form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Txt,
    Srt,
    Vtt,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Txt, OutputFormat::Srt, OutputFormat::Vtt];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Txt => "txt",
            OutputFormat::Srt => "srt",
            OutputFormat::Vtt => "vtt",
        }
    }

    /// Interpret a submitted form value. Unknown or missing values mean `Txt`.
    pub fn from_form(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or(OutputFormat::Txt)
    }

    /// Label shown next to the option in the upload form.
    pub fn description(&self) -> &'static str {
        match self {
            OutputFormat::Txt => "Plain text (.txt)",
            OutputFormat::Srt => "SubRip subtitles (.srt)",
            OutputFormat::Vtt => "WebVTT subtitles (.vtt)",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "txt" => Ok(OutputFormat::Txt),
            "srt" => Ok(OutputFormat::Srt),
            "vtt" => Ok(OutputFormat::Vtt),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render `result` in the requested format.
pub fn format_output(result: &TranscriptionResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Txt => result.text.trim().to_string(),
        OutputFormat::Srt => to_srt(result),
        OutputFormat::Vtt => to_vtt(result),
    }
}

/// Format `seconds` as `[HH:]MM:SS.mmm`.
///
/// The hours field is written when `always_include_hours` is set or the
/// time reaches one hour. Negative and non-finite inputs render as zero.
pub fn format_timestamp(seconds: f64, always_include_hours: bool) -> String {
    let total_ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;

    if always_include_hours || hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, secs, millis)
    }
}

fn to_srt(result: &TranscriptionResult) -> String {
    let mut out = String::new();
    for (index, segment) in result.segments.iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_timestamp(segment.start, false),
            format_timestamp(segment.end, false),
            segment.text.trim()
        );
    }
    out
}

fn to_vtt(result: &TranscriptionResult) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for segment in &result.segments {
        let _ = write!(
            out,
            "{} --> {}\n{}\n\n",
            format_timestamp(segment.start, true),
            format_timestamp(segment.end, true),
            segment.text.trim()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::engine::Segment;

    fn sample() -> TranscriptionResult {
        TranscriptionResult {
            text: " Hello world. Second line. ".to_string(),
            segments: vec![
                Segment::new(0.0, 2.5, " Hello world."),
                Segment::new(2.5, 3723.456, " Second line."),
            ],
            language: Some("en".to_string()),
        }
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0, false), "00:00.000");
        assert_eq!(format_timestamp(3661.5, false), "01:01:01.500");
        assert_eq!(format_timestamp(5.25, true), "00:00:05.250");
        assert_eq!(format_timestamp(3723.456, true), "01:02:03.456");
    }

    #[test]
    fn test_format_timestamp_rounds_into_next_second() {
        assert_eq!(format_timestamp(59.9996, false), "01:00.000");
        assert_eq!(format_timestamp(3599.9999, false), "01:00:00.000");
    }

    #[test]
    fn test_format_timestamp_clamps_bad_input() {
        assert_eq!(format_timestamp(-4.0, false), "00:00.000");
        assert_eq!(format_timestamp(f64::NAN, true), "00:00:00.000");
    }

    #[test]
    fn test_txt_is_trimmed_text() {
        assert_eq!(format_output(&sample(), OutputFormat::Txt), "Hello world. Second line.");
    }

    #[test]
    fn test_srt_output() {
        let expected = "1\n00:00.000 --> 00:02.500\nHello world.\n\n\
                        2\n00:02.500 --> 01:02:03.456\nSecond line.\n\n";
        assert_eq!(format_output(&sample(), OutputFormat::Srt), expected);
    }

    #[test]
    fn test_srt_blocks_numbered_in_order() {
        let result = TranscriptionResult {
            text: "a b".to_string(),
            segments: vec![Segment::new(0.0, 1.0, "a"), Segment::new(1.0, 2.5, "b")],
            language: None,
        };
        let srt = format_output(&result, OutputFormat::Srt);
        let blocks: Vec<&str> = srt.split("\n\n").filter(|b| !b.is_empty()).collect();

        assert_eq!(blocks, vec!["1\n00:00.000 --> 00:01.000\na", "2\n00:01.000 --> 00:02.500\nb"]);
    }

    #[test]
    fn test_vtt_output() {
        let expected = "WEBVTT\n\n\
                        00:00:00.000 --> 00:00:02.500\nHello world.\n\n\
                        00:00:02.500 --> 01:02:03.456\nSecond line.\n\n";
        assert_eq!(format_output(&sample(), OutputFormat::Vtt), expected);
    }

    #[test]
    fn test_no_segments() {
        let empty = TranscriptionResult {
            text: String::new(),
            segments: Vec::new(),
            language: None,
        };
        assert_eq!(format_output(&empty, OutputFormat::Srt), "");
        assert_eq!(format_output(&empty, OutputFormat::Vtt), "WEBVTT\n\n");
        assert_eq!(format_output(&empty, OutputFormat::Txt), "");
    }

    #[test]
    fn test_format_coercion() {
        assert_eq!(OutputFormat::from_form(Some("vtt")), OutputFormat::Vtt);
        assert_eq!(OutputFormat::from_form(Some("docx")), OutputFormat::Txt);
        assert_eq!(OutputFormat::from_form(None), OutputFormat::Txt);
    }
}
