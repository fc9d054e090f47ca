use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;

use crate::error::{PipelineError, PipelineResult};
use crate::session::Session;

/// Reply of the remote recognition function. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteReply {
    #[serde(default)]
    pub ocr_text: Option<String>,
    #[serde(default)]
    pub translated: Option<String>,
    #[serde(default)]
    pub romaji: Option<String>,
}

pub type RemoteFuture<'a> = Pin<Box<dyn Future<Output = PipelineResult<RemoteReply>> + Send + 'a>>;

/// Server-side recognition + translation of a single crop.
pub trait RemoteRecognizer: Send + Sync {
    fn recognize<'a>(&'a self, image_data_url: &'a str, session: &'a Session) -> RemoteFuture<'a>;
}

impl<T: RemoteRecognizer + ?Sized> RemoteRecognizer for Box<T> {
    fn recognize<'a>(&'a self, image_data_url: &'a str, session: &'a Session) -> RemoteFuture<'a> {
        (**self).recognize(image_data_url, session)
    }
}

#[derive(Debug, Clone)]
pub struct HttpRemoteRecognizer {
    client: reqwest::Client,
    url: String,
}

impl HttpRemoteRecognizer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl RemoteRecognizer for HttpRemoteRecognizer {
    fn recognize<'a>(&'a self, image_data_url: &'a str, session: &'a Session) -> RemoteFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .bearer_auth(&session.access_token)
                .json(&json!({ "image": image_data_url }))
                .send()
                .await
                .map_err(|err| PipelineError::transport(err.to_string()))?;

            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(PipelineError::transport_status(
                    "remote function returned an error",
                    status.as_u16(),
                    body,
                ));
            }
            parse_reply(status.as_u16(), body)
        })
    }
}

fn parse_reply(status: u16, body: String) -> PipelineResult<RemoteReply> {
    if body.trim().is_empty() {
        return Err(PipelineError::transport_status(
            "remote function returned an empty payload",
            status,
            body,
        ));
    }
    match serde_json::from_str::<RemoteReply>(&body) {
        Ok(reply) => Ok(reply),
        Err(err) => Err(PipelineError::transport_status(
            format!("failed to parse remote reply: {}", err),
            status,
            body,
        )),
    }
}

/// Stand-in for deployments without a remote function.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemote;

impl RemoteRecognizer for NoRemote {
    fn recognize<'a>(&'a self, _image_data_url: &'a str, _session: &'a Session) -> RemoteFuture<'a> {
        Box::pin(async { Err(PipelineError::transport("remote recognition is not configured")) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_fields_are_optional() {
        let reply = parse_reply(200, r#"{"ocrText":"こんにちは","romaji":null}"#.into()).unwrap();
        assert_eq!(reply.ocr_text.as_deref(), Some("こんにちは"));
        assert!(reply.translated.is_none());
        assert!(reply.romaji.is_none());
    }

    #[test]
    fn empty_or_garbled_payloads_are_transport_errors() {
        let err = parse_reply(200, "".into()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Transport {
                status: Some(200),
                ..
            }
        ));
        let err = parse_reply(200, "<html>".into()).unwrap_err();
        match err {
            PipelineError::Transport { body, .. } => assert_eq!(body.as_deref(), Some("<html>")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
