mod remote;
mod stage;
mod tesseract;
mod text;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crop::{CropOptions, PageImage, RasterCrop, crop_region};
use crate::error::{PipelineError, PipelineResult};
use crate::geometry::NormalizedRegion;
use crate::session::Session;
use crate::translate::TranslationEngine;

pub use remote::{HttpRemoteRecognizer, NoRemote, RemoteFuture, RemoteRecognizer, RemoteReply};
pub use stage::{MIN_TEXT_CHARS, Stage, after_local, after_remote, after_retry, after_translate};
pub use tesseract::{
    EngineFactory, EngineFuture, EngineLease, LocalEngine, SegmentationMode, TesseractConfig,
    TesseractEngine, TesseractFactory, list_tesseract_languages,
};
pub use text::clean_text;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub text: String,
    pub translated: Option<String>,
    pub phonetic: Option<String>,
}

/// Which path produced the recognized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    Remote,
    Local,
    LocalRetry,
}

/// Outcome of a successful run. A failed translation does not fail the run;
/// it is reported next to the recognized text.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub result: RecognitionResult,
    pub source: TextSource,
    pub translation_error: Option<PipelineError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecognitionMode {
    #[default]
    RemoteFirst,
    RemoteOnly,
    LocalOnly,
}

impl RecognitionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "remote-first" | "remote" | "auto" => Some(RecognitionMode::RemoteFirst),
            "remote-only" => Some(RecognitionMode::RemoteOnly),
            "local-only" | "local" => Some(RecognitionMode::LocalOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionMode::RemoteFirst => "remote-first",
            RecognitionMode::RemoteOnly => "remote-only",
            RecognitionMode::LocalOnly => "local-only",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    pub mode: RecognitionMode,
    pub crop: CropOptions,
    pub min_text_chars: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            mode: RecognitionMode::default(),
            crop: CropOptions::default(),
            min_text_chars: MIN_TEXT_CHARS,
        }
    }
}

/// Runs remote recognition, local fallback and the sparse-text retry for one
/// selection at a time. Each call owns its own local engine.
pub struct Orchestrator<R, F, T> {
    remote: R,
    engines: F,
    translator: T,
    options: OrchestratorOptions,
}

impl<R, F, T> Orchestrator<R, F, T>
where
    R: RemoteRecognizer,
    F: EngineFactory,
    T: TranslationEngine,
{
    pub fn new(remote: R, engines: F, translator: T, options: OrchestratorOptions) -> Self {
        Self {
            remote,
            engines,
            translator,
            options,
        }
    }

    /// Crops `region` out of `page` and recognizes it.
    pub async fn recognize(
        &self,
        page: &PageImage,
        region: &NormalizedRegion,
        session: Option<&Session>,
    ) -> PipelineResult<Recognition> {
        if region.is_empty() {
            return Err(PipelineError::Precondition(
                "selection region is empty".to_string(),
            ));
        }
        let crop = crop_region(page, region, self.options.crop)?;
        self.recognize_crop(&crop, session).await
    }

    /// Recognizes an already prepared crop.
    pub async fn recognize_crop(
        &self,
        crop: &RasterCrop,
        session: Option<&Session>,
    ) -> PipelineResult<Recognition> {
        let mut lease: Option<EngineLease<F::Engine>> = None;
        let mut stage = Stage::initial(self.options.mode);

        while !stage.is_terminal() {
            debug!("recognition stage: {}", stage_name(&stage));
            stage = match stage {
                Stage::RemoteAttempt => {
                    let outcome = self.remote_attempt(crop, session).await?;
                    after_remote(outcome, self.options.mode)
                }
                Stage::LocalAttempt => {
                    let outcome = match self.engine(&mut lease) {
                        Ok(engine) => engine.recognize(crop, SegmentationMode::UniformBlock).await,
                        Err(err) => Err(err),
                    };
                    after_local(outcome, self.options.min_text_chars)
                }
                Stage::LocalRetry => {
                    let outcome = match lease.as_mut() {
                        Some(engine) => engine.recognize(crop, SegmentationMode::SparseText).await,
                        None => Err(PipelineError::Engine("engine not acquired".to_string())),
                    };
                    after_retry(outcome)
                }
                Stage::Translate { text, source } => {
                    if let Some(engine) = lease.take() {
                        engine.release();
                    }
                    let translated = self.translator.translate(&text, session).await;
                    after_translate(text, source, translated)
                }
                terminal => terminal,
            };
        }
        if let Some(engine) = lease.take() {
            engine.release();
        }

        match stage {
            Stage::Done(recognition) => {
                info!(
                    "recognized {} char(s) via {:?}",
                    recognition.result.text.chars().count(),
                    recognition.source
                );
                Ok(recognition)
            }
            Stage::Failed(err) => Err(err),
            other => Err(PipelineError::Precondition(format!(
                "recognition stopped in stage {}",
                stage_name(&other)
            ))),
        }
    }

    fn engine<'l>(
        &self,
        lease: &'l mut Option<EngineLease<F::Engine>>,
    ) -> PipelineResult<&'l mut EngineLease<F::Engine>> {
        if lease.is_none() {
            *lease = Some(EngineLease::acquire(&self.engines)?);
        }
        lease
            .as_mut()
            .ok_or_else(|| PipelineError::Engine("engine not acquired".to_string()))
    }

    /// Outer error: the crop could not be encoded (fail fast). Inner result:
    /// the remote call itself, which the state machine may recover from.
    async fn remote_attempt(
        &self,
        crop: &RasterCrop,
        session: Option<&Session>,
    ) -> PipelineResult<PipelineResult<RemoteReply>> {
        let payload = crop.to_data_url()?;
        let Some(session) = session else {
            return Ok(Err(PipelineError::NotAuthenticated));
        };
        Ok(self.remote.recognize(&payload, session).await)
    }
}

fn stage_name(stage: &Stage) -> &'static str {
    match stage {
        Stage::RemoteAttempt => "remote",
        Stage::LocalAttempt => "local",
        Stage::LocalRetry => "local-retry",
        Stage::Translate { .. } => "translate",
        Stage::Done(_) => "done",
        Stage::Failed(_) => "failed",
    }
}
