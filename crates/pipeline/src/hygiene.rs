//! Transcript hygiene
//!
//! Transcription models occasionally emit pathological tokens, very long
//! runs with no whitespace. When the garbage filter is enabled, any word
//! longer than the configured threshold is replaced with a placeholder
//! before segments are persisted.

use transcribe_persistence::GarbageCleanupConfig;

const PLACEHOLDER: &str = "[unintelligible]";

/// Replace garbage words per the runtime-configured policy
pub fn clean_text(text: &str, config: &GarbageCleanupConfig) -> String {
    if !config.enabled {
        return text.to_string();
    }
    let limit = config.max_word_length.max(1) as usize;
    text.split_whitespace()
        .map(|word| {
            if word.chars().count() > limit {
                PLACEHOLDER
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(enabled: bool, limit: i32) -> GarbageCleanupConfig {
        GarbageCleanupConfig {
            enabled,
            max_word_length: limit,
        }
    }

    #[test]
    fn long_words_are_replaced() {
        let text = format!("hello {} world", "x".repeat(60));
        assert_eq!(
            clean_text(&text, &cfg(true, 50)),
            "hello [unintelligible] world"
        );
    }

    #[test]
    fn disabled_filter_passes_through() {
        let text = format!("hello {}", "x".repeat(60));
        assert_eq!(clean_text(&text, &cfg(false, 50)), text);
    }

    #[test]
    fn words_at_the_limit_survive() {
        let word = "y".repeat(50);
        let text = format!("{word} ok");
        assert_eq!(clean_text(&text, &cfg(true, 50)), text);
    }
}
