//! Caption scheduling and subtitle script rendering

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

use crate::timeline::Segment;
use crate::transcription::{SRTFormatter, SRTGenerator};

/// Visual style of burned-in captions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionStyle {
    pub font: String,
    pub font_size: u32,
    /// Text colour as `#RRGGBB`
    pub primary_colour: String,
    /// Outline colour as `#RRGGBB`
    pub outline_colour: String,
    pub outline_width: u32,
    /// Distance from the bottom edge in pixels
    pub margin_v: u32,
    pub margin_h: u32,
    /// Maximum characters per caption line
    pub wrap_width: usize,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font: "Arial".to_string(),
            font_size: 24,
            primary_colour: "#FFFFFF".to_string(),
            outline_colour: "#000000".to_string(),
            outline_width: 2,
            margin_v: 20,
            margin_h: 10,
            wrap_width: 42,
        }
    }
}

impl CaptionStyle {
    pub fn validate(&self) -> Result<(), String> {
        if self.font.trim().is_empty() {
            return Err("caption font must not be empty".to_string());
        }
        if self.font_size == 0 {
            return Err("caption font size must be greater than 0".to_string());
        }
        if self.wrap_width == 0 {
            return Err("caption wrap width must be greater than 0".to_string());
        }
        for colour in [&self.primary_colour, &self.outline_colour] {
            parse_rgb(colour).ok_or_else(|| format!("invalid caption colour '{}'", colour))?;
        }
        Ok(())
    }
}

/// `#RRGGBB` to ASS `&H00BBGGRR`
fn ass_colour(rgb: &str) -> String {
    let (r, g, b) = parse_rgb(rgb).unwrap_or((255, 255, 255));
    format!("&H00{:02X}{:02X}{:02X}", b, g, r)
}

fn parse_rgb(rgb: &str) -> Option<(u8, u8, u8)> {
    let hex = rgb.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// A timed caption shown over the video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionOverlay {
    pub segment_index: usize,
    pub text: String,
    pub start: f64,
    pub duration: f64,
}

impl CaptionOverlay {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub struct CaptionScheduler;

impl CaptionScheduler {
    /// One overlay per segment with non-blank translated text.
    ///
    /// Windows come from the transcribed segment boundaries, never from the
    /// length of the synthesized audio.
    pub fn schedule<S: AsRef<str>>(segments: &[Segment], translations: &[S]) -> Vec<CaptionOverlay> {
        segments
            .iter()
            .zip(translations)
            .filter_map(|(segment, text)| {
                let text = SRTFormatter::clean_text(text.as_ref());
                if text.is_empty() {
                    return None;
                }
                let (start, end) = segment.caption_window();
                Some(CaptionOverlay {
                    segment_index: segment.index,
                    text,
                    start,
                    duration: end - start,
                })
            })
            .collect()
    }
}

/// Overlays rendered as an Advanced SubStation Alpha script
pub struct AssScript<'a> {
    style: &'a CaptionStyle,
    overlays: &'a [CaptionOverlay],
}

impl<'a> AssScript<'a> {
    pub fn new(style: &'a CaptionStyle, overlays: &'a [CaptionOverlay]) -> Self {
        Self { style, overlays }
    }

    pub fn render(&self) -> String {
        let style = self.style;
        let mut out = String::new();

        out.push_str("[Script Info]\n");
        out.push_str("ScriptType: v4.00+\n");
        out.push_str("WrapStyle: 0\n");
        out.push_str("ScaledBorderAndShadow: yes\n");
        out.push_str("YCbCr Matrix: TV.601\n\n");

        out.push_str("[V4+ Styles]\n");
        out.push_str("Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n");
        // Alignment 2 is bottom-centre, BorderStyle 1 is outline
        let _ = writeln!(
            out,
            "Style: Default,{font},{size},{primary},&H000000FF,{outline},&H64000000,0,0,0,0,100,100,0,0,1,{width},0,2,{mh},{mh},{mv},1",
            font = style.font.replace(',', " "),
            size = style.font_size,
            primary = ass_colour(&style.primary_colour),
            outline = ass_colour(&style.outline_colour),
            width = style.outline_width,
            mh = style.margin_h,
            mv = style.margin_v,
        );
        out.push('\n');

        out.push_str("[Events]\n");
        out.push_str("Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");
        for overlay in self.overlays {
            let text = SRTFormatter::wrap_text(&overlay.text, style.wrap_width)
                .replace('{', "(")
                .replace('}', ")")
                .replace('\n', "\\N");
            let _ = writeln!(
                out,
                "Dialogue: 0,{},{},Default,,0,0,0,,{}",
                format_ass_time(overlay.start),
                format_ass_time(overlay.end()),
                text
            );
        }

        out
    }

    pub async fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::write(path, self.render()).await?;
        Ok(())
    }
}

/// Export overlays as SubRip subtitles
pub fn to_srt(overlays: &[CaptionOverlay]) -> SRTGenerator {
    let mut generator = SRTGenerator::new();
    for overlay in overlays {
        generator.push(overlay.start, overlay.end(), &overlay.text);
    }
    generator
}

/// h:mm:ss.cc
fn format_ass_time(seconds: f64) -> String {
    let total_cs = (seconds.max(0.0) * 100.0).round() as u64;
    let cs = total_cs % 100;
    let total_secs = total_cs / 100;
    let s = total_secs % 60;
    let total_mins = total_secs / 60;
    let m = total_mins % 60;
    let h = total_mins / 60;
    format!("{}:{:02}:{:02}.{:02}", h, m, s, cs)
}
