use thiserror::Error;

/// Failure of a single selection run, from cropping through persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Caller broke a precondition (image not decoded, empty raster, bad region).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Remote recognition call failed in transport or returned non-2xx.
    #[error("{}", format_transport(.message, .status, .body))]
    Transport {
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },

    /// Remote recognition answered but recognized nothing.
    #[error("remote recognition returned no text")]
    EmptyRemote,

    /// Local recognition engine failed; the engine message is kept unchanged.
    #[error("OCR failed: {0}")]
    Engine(String),

    #[error("no text recognized")]
    NoText,

    #[error("translation failed")]
    Translation,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl PipelineError {
    pub fn transport(message: impl Into<String>) -> Self {
        PipelineError::Transport {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    pub fn transport_status(message: impl Into<String>, status: u16, body: String) -> Self {
        let body = body.trim().to_string();
        PipelineError::Transport {
            message: message.into(),
            status: Some(status),
            body: if body.is_empty() { None } else { Some(body) },
        }
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        PipelineError::Persistence(err.to_string())
    }

    /// Remote failures that the orchestrator may recover from locally.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            PipelineError::Transport { .. } | PipelineError::EmptyRemote
        )
    }
}

fn format_transport(message: &str, status: &Option<u16>, body: &Option<String>) -> String {
    let mut out = format!("remote recognition failed: {}", message);
    if let Some(status) = status {
        out.push_str(&format!(" (status {})", status));
    }
    if let Some(body) = body {
        out.push_str(&format!(": {}", body));
    }
    out
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
