use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::{LanguagePair, TranslationEngine, TranslationFuture, truncate_text};
use crate::error::PipelineError;
use crate::session::Session;

/// Calls a translation function over HTTP: `{text, source, target}` in,
/// `{translated}` out.
#[derive(Debug, Clone)]
pub struct HttpTranslator {
    client: reqwest::Client,
    url: String,
    languages: LanguagePair,
    max_chars: usize,
}

#[derive(Debug, Deserialize)]
struct TranslateReply {
    translated: Option<String>,
}

impl HttpTranslator {
    pub fn new(url: impl Into<String>, languages: LanguagePair, max_chars: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            languages,
            max_chars,
        }
    }

    async fn call(&self, text: &str, session: Option<&Session>) -> anyhow::Result<String> {
        let mut request = self.client.post(&self.url).json(&json!({
            "text": truncate_text(text, self.max_chars),
            "source": self.languages.source,
            "target": self.languages.target,
        }));
        if let Some(session) = session {
            request = request.bearer_auth(&session.access_token);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("translation API error ({}): {}", status, body.trim());
        }
        let reply: TranslateReply = serde_json::from_str(&body)?;
        reply
            .translated
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow::anyhow!("translation API returned no text"))
    }
}

impl TranslationEngine for HttpTranslator {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        session: Option<&'a Session>,
    ) -> TranslationFuture<'a> {
        Box::pin(async move {
            self.call(text, session).await.map_err(|err| {
                warn!("translation failed: {:#}", err);
                PipelineError::Translation
            })
        })
    }
}
