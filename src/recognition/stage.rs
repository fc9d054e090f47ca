//! Retry policy of a single recognition run as a small state machine.
//!
//! Every transition is a pure function of the previous outcome; the
//! orchestrator performs the side effects and feeds results back in.

use tracing::{debug, warn};

use super::remote::RemoteReply;
use super::text::{char_len, clean_text};
use super::{Recognition, RecognitionMode, RecognitionResult, TextSource};
use crate::error::{PipelineError, PipelineResult};
use crate::transliterate::transliterate;

/// Local text shorter than this triggers the sparse-text retry.
pub const MIN_TEXT_CHARS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    RemoteAttempt,
    LocalAttempt,
    LocalRetry,
    /// Local text recognized; translation is still pending.
    Translate { text: String, source: TextSource },
    Done(Recognition),
    Failed(PipelineError),
}

impl Stage {
    pub fn initial(mode: RecognitionMode) -> Self {
        match mode {
            RecognitionMode::LocalOnly => Stage::LocalAttempt,
            RecognitionMode::RemoteFirst | RecognitionMode::RemoteOnly => Stage::RemoteAttempt,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done(_) | Stage::Failed(_))
    }
}

pub fn after_remote(outcome: PipelineResult<RemoteReply>, mode: RecognitionMode) -> Stage {
    let err = match outcome {
        Ok(reply) => match recognition_from_remote(reply) {
            Some(recognition) => {
                debug!("remote recognition succeeded");
                return Stage::Done(recognition);
            }
            None => PipelineError::EmptyRemote,
        },
        Err(err) => err,
    };

    if mode == RecognitionMode::RemoteOnly {
        warn!("remote recognition failed in remote-only mode: {}", err);
        return match err {
            PipelineError::EmptyRemote => Stage::Failed(PipelineError::NoText),
            other => Stage::Failed(other),
        };
    }
    if err.is_remote() {
        warn!("remote recognition failed, falling back to local OCR: {}", err);
    } else {
        debug!("remote recognition skipped ({}), using local OCR", err);
    }
    Stage::LocalAttempt
}

pub fn after_local(outcome: PipelineResult<String>, min_chars: usize) -> Stage {
    match outcome {
        Ok(raw) => {
            let text = clean_text(&raw);
            if char_len(&text) < min_chars {
                debug!(
                    "local OCR returned {} char(s), retrying with sparse text mode",
                    char_len(&text)
                );
                return Stage::LocalRetry;
            }
            Stage::Translate {
                text,
                source: TextSource::Local,
            }
        }
        Err(err) => Stage::Failed(err),
    }
}

pub fn after_retry(outcome: PipelineResult<String>) -> Stage {
    match outcome {
        Ok(raw) => {
            let text = clean_text(&raw);
            if text.is_empty() {
                return Stage::Failed(PipelineError::NoText);
            }
            Stage::Translate {
                text,
                source: TextSource::LocalRetry,
            }
        }
        Err(err) => Stage::Failed(err),
    }
}

/// Assembles the final result once translation settled either way.
pub fn after_translate(
    text: String,
    source: TextSource,
    translated: PipelineResult<String>,
) -> Stage {
    let phonetic = phonetic_for(&text, None);
    let (translated, translation_error) = match translated {
        Ok(value) => (non_empty(value), None),
        Err(err) => (None, Some(err)),
    };
    Stage::Done(Recognition {
        result: RecognitionResult {
            text,
            translated,
            phonetic,
        },
        source,
        translation_error,
    })
}

fn recognition_from_remote(reply: RemoteReply) -> Option<Recognition> {
    let text = clean_text(reply.ocr_text.as_deref().unwrap_or_default());
    if text.is_empty() {
        return None;
    }
    let phonetic = phonetic_for(&text, reply.romaji);
    Some(Recognition {
        result: RecognitionResult {
            translated: reply.translated.and_then(non_empty),
            phonetic,
            text,
        },
        source: TextSource::Remote,
        translation_error: None,
    })
}

fn phonetic_for(text: &str, provided: Option<String>) -> Option<String> {
    provided
        .and_then(non_empty)
        .or_else(|| non_empty(transliterate(text)))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
