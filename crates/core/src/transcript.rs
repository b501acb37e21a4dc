//! Transcript segments produced by the transcription stage

use serde::{Deserialize, Serialize};

/// Tolerance for segment end times that overrun the media duration; absorbs
/// encoder rounding at the tail of the file.
pub const DURATION_EPSILON: f64 = 0.5;

/// One diarized, timestamped span of transcript text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: i64,
    pub media_file_id: i64,
    pub speaker_id: Option<i64>,
    /// Seconds from the start of the media; `start_time <= end_time`
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub confidence: Option<f32>,
}

impl TranscriptSegment {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Timing validity against the owning file's duration (when known)
    pub fn timing_is_valid(&self, media_duration: Option<f64>) -> bool {
        if self.start_time < 0.0 || self.end_time < self.start_time {
            return false;
        }
        match media_duration {
            Some(d) => self.end_time <= d + DURATION_EPSILON,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64) -> TranscriptSegment {
        TranscriptSegment {
            id: 1,
            media_file_id: 1,
            speaker_id: None,
            start_time: start,
            end_time: end,
            text: "hi".into(),
            confidence: Some(0.9),
        }
    }

    #[test]
    fn timing_validation() {
        assert!(seg(0.0, 1.0).timing_is_valid(Some(10.0)));
        assert!(seg(9.8, 10.3).timing_is_valid(Some(10.0)), "within epsilon");
        assert!(!seg(9.8, 10.6).timing_is_valid(Some(10.0)));
        assert!(!seg(2.0, 1.0).timing_is_valid(None));
        assert!(!seg(-0.1, 1.0).timing_is_valid(None));
    }
}
