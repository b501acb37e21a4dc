//! Subtitle emission (SRT and WebVTT)
//!
//! Movie-style formatting with industry defaults: 42 characters per line,
//! at most two lines per cue, one to six seconds on screen, and at most
//! twenty characters per second of reading speed. Long segments split into
//! multiple cues with proportional timing and a 100 ms gap.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

pub const MAX_LINE_LENGTH: usize = 42;
pub const MAX_LINES_PER_CUE: usize = 2;
pub const MIN_DISPLAY_TIME: f64 = 1.0;
pub const MAX_DISPLAY_TIME: f64 = 6.0;
pub const READING_SPEED_WPM: f64 = 200.0;
pub const MAX_CHARS_PER_SECOND: f64 = 20.0;
const CUE_GAP: f64 = 0.1;

/// Subtitle flavor; the only differences are the timestamp separator and
/// the `WEBVTT` preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Srt,
    WebVtt,
}

/// One transcript span ready for subtitle shaping
#[derive(Debug, Clone)]
pub struct SubtitleSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Resolved speaker name, prefixed onto the first line of each cue
    pub speaker: Option<String>,
}

/// One emitted cue
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// `HH:MM:SS,mmm` (SRT) or `HH:MM:SS.mmm` (WebVTT)
pub fn format_timestamp(seconds: f64, format: SubtitleFormat) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    let sep = match format {
        SubtitleFormat::Srt => ',',
        SubtitleFormat::WebVtt => '.',
    };
    format!("{hours:02}:{minutes:02}:{secs:02}{sep}{millis:03}")
}

/// Display time from reading speed, clamped to [1, 6] seconds
pub fn optimal_display_time(text: &str) -> f64 {
    let words = text.split_whitespace().count() as f64;
    let chars = text.graphemes(true).count() as f64;
    let reading_time = words / READING_SPEED_WPM * 60.0 + 0.5;
    let cps_time = chars / MAX_CHARS_PER_SECOND;
    reading_time.max(cps_time).clamp(MIN_DISPLAY_TIME, MAX_DISPLAY_TIME)
}

fn speaker_prefix(speaker: Option<&str>) -> String {
    match speaker.map(str::trim) {
        Some(name) if !name.is_empty() && !name.eq_ignore_ascii_case("unknown") => {
            format!("{name}: ")
        },
        _ => String::new(),
    }
}

/// Greedy word wrap at the line limit, grapheme-aware. Words longer than
/// the limit get their own line rather than being broken.
fn wrap_text(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.graphemes(true).count();
        let needed = if current.is_empty() { word_len } else { current_len + 1 + word_len };
        if !current.is_empty() && needed > MAX_LINE_LENGTH {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

static SENTENCE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:[.!?])\s+").expect("static regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last = 0;
    for m in SENTENCE_SPLIT.find_iter(text) {
        sentences.push(text[last..m.start() + 1].trim().to_string());
        last = m.end();
    }
    if last < text.len() {
        let tail = text[last..].trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
    }
    sentences
}

fn make_block(lines: &[String], prefix: &str) -> String {
    let mut block: Vec<String> = lines.iter().take(MAX_LINES_PER_CUE).cloned().collect();
    if !prefix.is_empty() {
        if let Some(first) = block.first_mut() {
            *first = format!("{prefix}{first}");
        }
    }
    block.join("\n")
}

/// Shape one segment's text into cue-sized blocks, sentence by sentence
fn format_blocks(text: &str, speaker: Option<&str>) -> Vec<String> {
    let text = WHITESPACE.replace_all(text.trim(), " ").to_string();
    let prefix = speaker_prefix(speaker);

    let full = format!("{prefix}{text}");
    if full.graphemes(true).count() <= MAX_LINE_LENGTH {
        return vec![full];
    }

    let mut blocks = Vec::new();
    let mut current = String::new();
    for sentence in split_sentences(&text) {
        if current.is_empty() {
            current = sentence;
            continue;
        }
        let candidate = format!("{current} {sentence}");
        if wrap_text(&candidate).len() <= MAX_LINES_PER_CUE {
            current = candidate;
        } else {
            blocks.push(make_block(&wrap_text(&current), &prefix));
            current = sentence;
        }
    }
    if !current.is_empty() {
        let lines = wrap_text(&current);
        for chunk in lines.chunks(MAX_LINES_PER_CUE) {
            blocks.push(make_block(chunk, &prefix));
        }
    }

    if blocks.is_empty() {
        vec![full]
    } else {
        blocks
    }
}

/// Split one segment into timed cues. Timing distributes proportionally
/// over the blocks, respects the display-time bounds, and never overruns
/// the segment.
pub fn split_segment(segment: &SubtitleSegment) -> Vec<Cue> {
    let duration = segment.end - segment.start;
    let blocks = format_blocks(&segment.text, segment.speaker.as_deref());

    if blocks.len() == 1 {
        let shown = optimal_display_time(&segment.text).min(duration.max(0.0));
        return vec![Cue {
            start: segment.start,
            end: segment.start + shown,
            text: blocks.into_iter().next().expect("one block"),
        }];
    }

    let total_chars: usize = blocks.iter().map(|b| b.graphemes(true).count()).sum();
    let mut cues = Vec::with_capacity(blocks.len());
    let mut current = segment.start;
    let block_count = blocks.len();

    for (i, block) in blocks.into_iter().enumerate() {
        let ratio = block.graphemes(true).count() as f64 / total_chars.max(1) as f64;
        let allocated = duration * ratio;
        let shown = allocated
            .max(MIN_DISPLAY_TIME)
            .min(optimal_display_time(&block));

        let mut end = current + shown;
        if end > segment.end {
            end = segment.end;
        }
        if i + 1 < block_count && end + CUE_GAP > segment.end {
            end = segment.end - CUE_GAP;
        }
        if end <= current {
            break;
        }
        cues.push(Cue {
            start: current,
            end,
            text: block,
        });
        current = end + CUE_GAP;
        if current >= segment.end {
            break;
        }
    }
    cues
}

/// Render a full SRT document
pub fn generate_srt(segments: &[SubtitleSegment]) -> String {
    let mut out = Vec::new();
    let mut index = 1;
    for segment in segments {
        for cue in split_segment(segment) {
            out.push(format!(
                "{index}\n{} --> {}\n{}\n",
                format_timestamp(cue.start, SubtitleFormat::Srt),
                format_timestamp(cue.end, SubtitleFormat::Srt),
                cue.text
            ));
            index += 1;
        }
    }
    out.join("\n")
}

/// Render a full WebVTT document
pub fn generate_webvtt(segments: &[SubtitleSegment]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for segment in segments {
        for cue in split_segment(segment) {
            out.push_str(&format!(
                "{} --> {}\n{}\n\n",
                format_timestamp(cue.start, SubtitleFormat::WebVtt),
                format_timestamp(cue.end, SubtitleFormat::WebVtt),
                cue.text
            ));
        }
    }
    out
}

/// Parse an SRT document back into cues (round-trip checks and imports)
pub fn parse_srt(content: &str) -> Vec<Cue> {
    static TIMING: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(\d{2}):(\d{2}):(\d{2}),(\d{3}) --> (\d{2}):(\d{2}):(\d{2}),(\d{3})")
            .expect("static regex")
    });

    let mut cues = Vec::new();
    for entry in content.split("\n\n") {
        let mut lines = entry.lines();
        let Some(_index) = lines.next() else { continue };
        let Some(timing) = lines.next() else { continue };
        let Some(caps) = TIMING.captures(timing) else { continue };

        let ts = |h: usize| -> f64 {
            let get = |i: usize| caps[i].parse::<f64>().unwrap_or(0.0);
            get(h) * 3600.0 + get(h + 1) * 60.0 + get(h + 2) + get(h + 3) / 1000.0
        };
        let text: Vec<&str> = lines.collect();
        cues.push(Cue {
            start: ts(1),
            end: ts(5),
            text: text.join("\n").trim_end().to_string(),
        });
    }
    cues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str, speaker: Option<&str>) -> SubtitleSegment {
        SubtitleSegment {
            start,
            end,
            text: text.to_string(),
            speaker: speaker.map(str::to_string),
        }
    }

    #[test]
    fn timestamps_use_the_format_separator() {
        assert_eq!(format_timestamp(62.0, SubtitleFormat::Srt), "00:01:02,000");
        assert_eq!(format_timestamp(62.0, SubtitleFormat::WebVtt), "00:01:02.000");
        assert_eq!(format_timestamp(3661.25, SubtitleFormat::Srt), "01:01:01,250");
    }

    #[test]
    fn first_cue_matches_the_reference_shape() {
        let srt = generate_srt(&[seg(
            62.0,
            64.5,
            "Hello world, this is a test of the subtitle formatter.",
            Some("Bob"),
        )]);
        let mut lines = srt.lines();
        assert_eq!(lines.next(), Some("1"));
        assert_eq!(lines.next(), Some("00:01:02,000 --> 00:01:04,500"));
        assert!(lines.next().unwrap().starts_with("Bob: Hello world,"));
    }

    #[test]
    fn lines_respect_the_wrap_limit() {
        let text = "one two three four five six seven eight nine ten eleven twelve \
                    thirteen fourteen fifteen sixteen seventeen eighteen";
        for line in wrap_text(text) {
            assert!(line.graphemes(true).count() <= MAX_LINE_LENGTH, "line too long: {line}");
        }
    }

    #[test]
    fn short_text_is_a_single_cue() {
        let cues = split_segment(&seg(0.0, 2.0, "Hi there.", Some("Ann")));
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "Ann: Hi there.");
        assert!(cues[0].end <= 2.0);
        assert!(cues[0].end - cues[0].start >= MIN_DISPLAY_TIME);
    }

    #[test]
    fn unknown_speaker_gets_no_prefix() {
        let cues = split_segment(&seg(0.0, 2.0, "Hi.", Some("UNKNOWN")));
        assert_eq!(cues[0].text, "Hi.");
        let cues = split_segment(&seg(0.0, 2.0, "Hi.", None));
        assert_eq!(cues[0].text, "Hi.");
    }

    #[test]
    fn long_segments_split_without_overlap() {
        let text = "This is the first sentence of a fairly long segment. Here comes a \
                    second sentence that also carries some words. And a third one to \
                    push the text well beyond two display lines worth of characters.";
        let cues = split_segment(&seg(10.0, 25.0, text, Some("Eve")));
        assert!(cues.len() > 1);
        for pair in cues.windows(2) {
            assert!(pair[0].end <= pair[1].start, "cues overlap");
        }
        for cue in &cues {
            assert!(cue.end <= 25.0);
            for line in cue.text.lines() {
                assert!(line.graphemes(true).count() <= MAX_LINE_LENGTH + "Eve: ".len());
            }
            assert!(cue.text.lines().count() <= MAX_LINES_PER_CUE);
        }
        // prefix repeats on every cue for speaker continuity
        assert!(cues.iter().all(|c| c.text.starts_with("Eve: ")));
    }

    #[test]
    fn webvtt_has_preamble_and_dot_separators() {
        let vtt = generate_webvtt(&[seg(1.0, 3.0, "Hello.", None)]);
        assert!(vtt.starts_with("WEBVTT\n\n"));
        assert!(vtt.contains("00:00:01.000 --> "));
        assert!(!vtt.contains(','));
    }

    #[test]
    fn srt_round_trip_preserves_triples() {
        let segments = vec![
            seg(0.0, 2.5, "First line here.", Some("Ann")),
            seg(3.0, 5.25, "Second line there.", Some("Bob")),
            seg(6.0, 7.125, "Third.", None),
        ];
        let srt = generate_srt(&segments);
        let parsed = parse_srt(&srt);
        assert_eq!(parsed.len(), 3);
        for (cue, original) in parsed.iter().zip(&segments) {
            assert!((cue.start - original.start).abs() < 0.001);
            assert!(cue.end <= original.end + 0.001);
            let expected_prefix = speaker_prefix(original.speaker.as_deref());
            assert_eq!(cue.text, format!("{expected_prefix}{}", original.text));
        }
    }
}
