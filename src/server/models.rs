use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(crate) struct RecognizeRequest {
    pub(crate) image: String,
}

/// Same shape the remote client reads back as `RemoteReply`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecognizeResponse {
    pub(crate) ocr_text: String,
    pub(crate) translated: Option<String>,
    pub(crate) romaji: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}
