use anyhow::{Result, anyhow};
use std::future::Future;
use std::pin::Pin;

use crate::error::{PipelineError, PipelineResult};
use crate::session::Session;
use tracing::warn;
use crate::settings::{TranslationProvider, TranslationSettings};

mod http;
mod openai;
mod retry;

pub use http::HttpTranslator;
pub use openai::OpenAiTranslator;

pub const DEFAULT_MAX_CHARS: usize = 500;

pub type TranslationFuture<'a> = Pin<Box<dyn Future<Output = PipelineResult<String>> + Send + 'a>>;

/// Plain-text translation. Every failure surfaces as
/// [`PipelineError::Translation`](crate::error::PipelineError::Translation).
pub trait TranslationEngine: Send + Sync {
    fn translate<'a>(&'a self, text: &'a str, session: Option<&'a Session>)
    -> TranslationFuture<'a>;
}

impl<T: TranslationEngine + ?Sized> TranslationEngine for Box<T> {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        session: Option<&'a Session>,
    ) -> TranslationFuture<'a> {
        (**self).translate(text, session)
    }
}

/// Used when no translator could be built; every call reports
/// `translation failed` so recognized text is still shown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTranslation;

impl TranslationEngine for NoTranslation {
    fn translate<'a>(
        &'a self,
        _text: &'a str,
        _session: Option<&'a Session>,
    ) -> TranslationFuture<'a> {
        Box::pin(async { Err(PipelineError::Translation) })
    }
}

#[derive(Debug, Clone)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

/// Cuts `text` to at most `max_chars` characters.
pub fn truncate_text(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Like [`build_translator`], but an unusable configuration disables
/// translation instead of failing.
pub fn translator_or_disabled(settings: &TranslationSettings) -> Box<dyn TranslationEngine> {
    build_translator(settings).unwrap_or_else(|err| {
        warn!("translation disabled: {:#}", err);
        Box::new(NoTranslation)
    })
}

pub fn build_translator(settings: &TranslationSettings) -> Result<Box<dyn TranslationEngine>> {
    let languages = LanguagePair {
        source: settings.source_lang.clone(),
        target: settings.target_lang.clone(),
    };
    match settings.provider {
        TranslationProvider::Http => {
            let url = settings
                .url
                .clone()
                .ok_or_else(|| anyhow!("translation.url is required for the http provider"))?;
            Ok(Box::new(HttpTranslator::new(
                url,
                languages,
                settings.max_chars,
            )))
        }
        TranslationProvider::OpenAI => {
            let key = std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| anyhow!("OPENAI_API_KEY is required for the openai provider"))?;
            let mut translator = OpenAiTranslator::new(key, languages, settings.max_chars);
            if let Some(model) = settings.model.as_deref() {
                translator = translator.with_model(model);
            }
            Ok(Box::new(translator))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_text("こんにちは", 3), "こんに");
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abc", 0), "");
    }

    #[tokio::test]
    async fn http_provider_without_url_disables_translation() {
        let mut settings = crate::settings::Settings::default().translation;
        settings.provider = TranslationProvider::Http;
        settings.url = None;
        assert!(build_translator(&settings).is_err());

        let translator = translator_or_disabled(&settings);
        assert_eq!(
            translator.translate("猫", None).await,
            Err(PipelineError::Translation)
        );
    }
}
