//! Error taxonomy for user presentation
//!
//! Raw failure strings from workers are classified by substring matching
//! into a small set of categories, each carrying a user-facing message and
//! a fixed suggestion list. Categorization never fails: anything
//! unmatched becomes `Unknown`.

use serde::{Deserialize, Serialize};

/// Hard cap on raw messages before matching; anything longer is truncated
const MAX_MESSAGE_LEN: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    FileQuality,
    NoSpeech,
    FormatIssue,
    NetworkError,
    PermissionError,
    ProcessingError,
    Unknown,
}

const FILE_QUALITY_PATTERNS: &[&str] = &[
    "no audio content",
    "corrupted",
    "unsupported format",
    "invalid format",
    "cannot decode",
    "file damaged",
    "unreadable",
    "malformed",
];

const NO_SPEECH_PATTERNS: &[&str] = &[
    "no speech",
    "only music",
    "background noise",
    "silence detected",
    "instrumental",
    "non-verbal",
    "inaudible",
];

const FORMAT_PATTERNS: &[&str] = &[
    "codec not supported",
    "container format",
    "encoding error",
    "bitrate",
    "sample rate",
    "channels not supported",
];

const NETWORK_PATTERNS: &[&str] = &[
    "connection",
    "timeout",
    "network",
    "download failed",
    "url not accessible",
    "forbidden",
];

const PERMISSION_PATTERNS: &[&str] = &[
    "permission denied",
    "access denied",
    "unauthorized",
    "drm",
    "protected content",
];

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileQuality => "file_quality",
            Self::NoSpeech => "no_speech",
            Self::FormatIssue => "format_issue",
            Self::NetworkError => "network_error",
            Self::PermissionError => "permission_error",
            Self::ProcessingError => "processing_error",
            Self::Unknown => "unknown",
        }
    }

    /// Only transient categories are worth an automatic retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::ProcessingError | Self::Unknown
        )
    }

    fn suggestions(&self) -> &'static [&'static str] {
        match self {
            Self::FileQuality => &[
                "Check if the file plays correctly on your device",
                "Try converting to MP3, WAV, or MP4 format",
                "Ensure the file isn't password protected or DRM-locked",
                "Consider re-recording if the original source is problematic",
                "Verify the file wasn't corrupted during download or transfer",
            ],
            Self::NoSpeech => &[
                "Ensure the file contains clear, audible speech",
                "Check if speech is too quiet or unclear",
                "Reduce background noise if possible",
                "Verify this isn't a music-only or instrumental file",
                "Try uploading a different section with clearer audio",
            ],
            Self::FormatIssue => &[
                "Convert to a supported format (MP3, WAV, MP4, M4A)",
                "Try re-encoding with standard settings",
                "Check if the file uses an uncommon codec",
                "Ensure the file extension matches the actual format",
                "Use a different audio/video converter tool",
            ],
            Self::NetworkError => &[
                "Check your internet connection",
                "Verify the URL is accessible and not expired",
                "Try the upload again in a few minutes",
                "Download the file locally first, then upload",
                "Contact the content provider if URL access issues persist",
            ],
            Self::PermissionError => &[
                "Ensure you have permission to access this content",
                "Check if the content is behind a paywall or login",
                "Verify the content isn't DRM-protected",
                "Try downloading the file manually first",
                "Contact the content owner for access permissions",
            ],
            Self::ProcessingError => &[
                "Use the \"Retry\" button to try processing again",
                "Check the file format and quality",
                "Try uploading a different file to test",
                "Contact support if the problem persists",
                "Check system status for any ongoing issues",
            ],
            Self::Unknown => &[
                "Try uploading the file again",
                "Contact support if the problem persists",
            ],
        }
    }

    fn message_prefix(&self) -> &'static str {
        match self {
            Self::FileQuality => "File Quality Issue",
            Self::NoSpeech => "No Speech Detected",
            Self::FormatIssue => "Format Issue",
            Self::NetworkError => "Network Issue",
            Self::PermissionError => "Access Issue",
            Self::ProcessingError => "Processing Failed",
            Self::Unknown => "Unknown Error",
        }
    }
}

/// A categorized failure ready for user presentation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizedError {
    pub category: ErrorCategory,
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub original_error: Option<String>,
    pub is_retryable: bool,
}

impl CategorizedError {
    /// Classify a raw error message by pattern matching
    pub fn categorize(error_message: Option<&str>) -> Self {
        let Some(raw) = error_message.filter(|m| !m.is_empty()) else {
            return Self::build(
                ErrorCategory::Unknown,
                "An unknown error occurred during processing.",
                None,
            );
        };

        let raw = if raw.len() > MAX_MESSAGE_LEN {
            let mut end = MAX_MESSAGE_LEN;
            while !raw.is_char_boundary(end) {
                end -= 1;
            }
            &raw[..end]
        } else {
            raw
        };
        let lower = raw.to_lowercase();

        let matches = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

        let category = if matches(FILE_QUALITY_PATTERNS) {
            ErrorCategory::FileQuality
        } else if matches(NO_SPEECH_PATTERNS) {
            ErrorCategory::NoSpeech
        } else if matches(FORMAT_PATTERNS) {
            ErrorCategory::FormatIssue
        } else if matches(NETWORK_PATTERNS) {
            ErrorCategory::NetworkError
        } else if matches(PERMISSION_PATTERNS) {
            ErrorCategory::PermissionError
        } else {
            ErrorCategory::ProcessingError
        };

        Self::build(
            category,
            &format!("{}: {}", category.message_prefix(), raw),
            Some(raw),
        )
    }

    fn build(category: ErrorCategory, user_message: &str, original: Option<&str>) -> Self {
        Self {
            category,
            user_message: user_message.to_string(),
            suggestions: category.suggestions().iter().map(|s| s.to_string()).collect(),
            original_error: original.map(str::to_string),
            is_retryable: category.is_retriable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_pattern() {
        let cases = [
            ("the file is corrupted beyond repair", ErrorCategory::FileQuality),
            ("silence detected in input", ErrorCategory::NoSpeech),
            ("codec not supported by decoder", ErrorCategory::FormatIssue),
            ("connection reset by peer", ErrorCategory::NetworkError),
            ("access denied for resource", ErrorCategory::PermissionError),
            ("something exploded", ErrorCategory::ProcessingError),
        ];
        for (msg, expected) in cases {
            assert_eq!(CategorizedError::categorize(Some(msg)).category, expected);
        }
    }

    #[test]
    fn empty_message_is_unknown() {
        let e = CategorizedError::categorize(None);
        assert_eq!(e.category, ErrorCategory::Unknown);
        assert!(e.is_retryable);
        let e = CategorizedError::categorize(Some(""));
        assert_eq!(e.category, ErrorCategory::Unknown);
    }

    #[test]
    fn retriable_set() {
        assert!(ErrorCategory::NetworkError.is_retriable());
        assert!(ErrorCategory::ProcessingError.is_retriable());
        assert!(ErrorCategory::Unknown.is_retriable());
        assert!(!ErrorCategory::FileQuality.is_retriable());
        assert!(!ErrorCategory::NoSpeech.is_retriable());
        assert!(!ErrorCategory::PermissionError.is_retriable());
    }

    #[test]
    fn long_messages_truncated() {
        let long = "x".repeat(20_000);
        let e = CategorizedError::categorize(Some(&long));
        assert!(e.user_message.len() < 11_000);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let e = CategorizedError::categorize(Some("Download FAILED after 3 attempts"));
        assert_eq!(e.category, ErrorCategory::NetworkError);
        assert_eq!(e.suggestions.len(), 5);
    }
}
