use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::retry::{BASE_DELAY, MAX_ATTEMPTS, back_off, is_retryable, retry_after};
use super::{LanguagePair, TranslationEngine, TranslationFuture, truncate_text};
use crate::error::PipelineError;
use crate::session::Session;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";
const TOOL_NAME: &str = "deliver_translation";
const PROMPT_TEMPLATE: &str = include_str!("prompts/translate_prompt.tera");

/// Translation through an OpenAI-compatible chat completions endpoint, forced
/// into a single tool call so the reply is always structured.
#[derive(Debug, Clone)]
pub struct OpenAiTranslator {
    client: reqwest::Client,
    key: String,
    model: String,
    languages: LanguagePair,
    max_chars: usize,
}

impl OpenAiTranslator {
    pub fn new(key: impl Into<String>, languages: LanguagePair, max_chars: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            languages,
            max_chars,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    async fn call(&self, text: &str) -> Result<String> {
        let url = format!("{}/chat/completions", base_url().trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": render_system_prompt(&self.languages)?},
                {"role": "user", "content": truncate_text(text, self.max_chars)}
            ],
            "tools": [
                {
                    "type": "function",
                    "function": {
                        "name": TOOL_NAME,
                        "description": "Return the translated text.",
                        "parameters": {
                            "type": "object",
                            "properties": {
                                "translation": { "type": "string" }
                            },
                            "required": ["translation"]
                        }
                    }
                }
            ],
            "tool_choice": {"type": "function", "function": {"name": TOOL_NAME}}
        });

        let mut attempt = 0usize;
        let mut delay = BASE_DELAY;
        loop {
            attempt += 1;
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.key)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            let hint = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                return extract_translation(&text);
            }
            if is_retryable(status, &text) && attempt < MAX_ATTEMPTS {
                delay = back_off(attempt, delay, hint).await;
                continue;
            }
            return Err(anyhow!(
                "OpenAI API error ({}): {}",
                status,
                extract_openai_error(&text).unwrap_or(text)
            ));
        }
    }
}

impl TranslationEngine for OpenAiTranslator {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        _session: Option<&'a Session>,
    ) -> TranslationFuture<'a> {
        Box::pin(async move {
            self.call(text).await.map_err(|err| {
                warn!("translation failed: {:#}", err);
                PipelineError::Translation
            })
        })
    }
}

fn base_url() -> String {
    std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

fn render_system_prompt(languages: &LanguagePair) -> Result<String> {
    let mut context = tera::Context::new();
    context.insert("source_lang", &languages.source);
    context.insert("target_lang", &languages.target);
    context.insert("tool_name", TOOL_NAME);
    tera::Tera::one_off(PROMPT_TEMPLATE, &context, false)
        .with_context(|| "failed to render translation prompt")
}

fn extract_translation(text: &str) -> Result<String> {
    let payload: ChatResponse =
        serde_json::from_str(text).with_context(|| "failed to parse OpenAI response JSON")?;
    let call = payload
        .choices
        .first()
        .and_then(|choice| choice.message.tool_calls.first())
        .ok_or_else(|| anyhow!("no tool call returned from OpenAI"))?;
    if call.function.name != TOOL_NAME {
        return Err(anyhow!(
            "unexpected tool name '{}' from OpenAI",
            call.function.name
        ));
    }
    let args: ToolArgs = serde_json::from_str(&call.function.arguments)
        .with_context(|| "failed to parse OpenAI tool arguments")?;
    let translation = args.translation.trim();
    if translation.is_empty() {
        return Err(anyhow!("OpenAI returned an empty translation"));
    }
    Ok(translation.to_string())
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        code: Option<String>,
    }

    let error = serde_json::from_str::<ErrorBody>(body).ok()?.error?;
    match (error.message, error.code) {
        (Some(message), Some(code)) => Some(format!("{} | code: {}", message, code)),
        (Some(message), None) => Some(message),
        (None, Some(code)) => Some(format!("code: {}", code)),
        (None, None) => None,
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ToolArgs {
    translation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> LanguagePair {
        LanguagePair {
            source: "ja".to_string(),
            target: "en".to_string(),
        }
    }

    #[test]
    fn prompt_names_languages_and_tool() {
        let prompt = render_system_prompt(&pair()).unwrap();
        assert!(prompt.contains("Source language: ja."));
        assert!(prompt.contains("Target language: en."));
        assert!(prompt.contains("`deliver_translation`"));
    }

    #[test]
    fn extracts_tool_arguments() {
        let payload = json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "function": {
                            "name": "deliver_translation",
                            "arguments": "{\"translation\":\" Hello! \"}"
                        }
                    }]
                }
            }]
        })
        .to_string();
        assert_eq!(extract_translation(&payload).unwrap(), "Hello!");
    }

    #[test]
    fn rejects_missing_tool_call() {
        let payload = r#"{"choices":[{"message":{"content":"Hello"}}]}"#;
        assert!(extract_translation(payload).is_err());
    }

    #[test]
    fn error_body_is_summarized() {
        let body = r#"{"error":{"message":"Incorrect API key","code":"invalid_api_key"}}"#;
        insta::assert_snapshot!(
            extract_openai_error(body).unwrap(),
            @"Incorrect API key | code: invalid_api_key"
        );
    }
}
