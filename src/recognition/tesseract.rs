use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Command;

use tracing::{debug, warn};

use crate::crop::RasterCrop;
use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_LANGUAGE: &str = "jpn";

/// Page segmentation strategy handed to the local engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationMode {
    /// A single uniform block of text.
    UniformBlock,
    /// As much text as possible, in no particular order.
    SparseText,
}

impl SegmentationMode {
    pub fn psm(&self) -> u32 {
        match self {
            SegmentationMode::UniformBlock => 6,
            SegmentationMode::SparseText => 11,
        }
    }
}

pub type EngineFuture<'a> = Pin<Box<dyn Future<Output = PipelineResult<String>> + Send + 'a>>;

/// A stateful local recognizer. Must be terminated once it is no longer
/// needed; see [`EngineLease`].
pub trait LocalEngine: Send {
    fn recognize<'a>(&'a mut self, crop: &'a RasterCrop, mode: SegmentationMode)
    -> EngineFuture<'a>;

    fn terminate(&mut self);
}

pub trait EngineFactory: Send + Sync {
    type Engine: LocalEngine;

    fn create(&self) -> PipelineResult<Self::Engine>;
}

/// Scoped ownership of a [`LocalEngine`]: the engine is terminated exactly
/// once, either through [`EngineLease::release`] or when the lease drops.
pub struct EngineLease<E: LocalEngine> {
    engine: Option<E>,
}

impl<E: LocalEngine> EngineLease<E> {
    pub fn acquire<F>(factory: &F) -> PipelineResult<Self>
    where
        F: EngineFactory<Engine = E>,
    {
        let engine = factory.create()?;
        debug!("local OCR engine acquired");
        Ok(Self {
            engine: Some(engine),
        })
    }

    pub async fn recognize(
        &mut self,
        crop: &RasterCrop,
        mode: SegmentationMode,
    ) -> PipelineResult<String> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| PipelineError::Engine("engine already released".to_string()))?;
        engine.recognize(crop, mode).await
    }

    pub fn release(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.terminate();
            debug!("local OCR engine terminated");
        }
    }
}

impl<E: LocalEngine> Drop for EngineLease<E> {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[derive(Debug, Clone)]
pub struct TesseractConfig {
    pub binary: String,
    pub language: String,
    pub preserve_interword_spaces: bool,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            preserve_interword_spaces: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TesseractFactory {
    config: TesseractConfig,
}

impl TesseractFactory {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for TesseractFactory {
    type Engine = TesseractEngine;

    fn create(&self) -> PipelineResult<TesseractEngine> {
        let language = normalize_ocr_languages(&self.config.binary, &self.config.language)?;
        let workdir = tempfile::Builder::new()
            .prefix("manga-ocr-")
            .tempdir()
            .map_err(|err| PipelineError::Engine(format!("failed to create workdir: {}", err)))?;
        Ok(TesseractEngine {
            config: TesseractConfig {
                language,
                ..self.config.clone()
            },
            workdir: Some(workdir),
            runs: 0,
        })
    }
}

/// Tesseract CLI worker. Owns a scratch directory for crop images that is
/// removed on termination.
pub struct TesseractEngine {
    config: TesseractConfig,
    workdir: Option<tempfile::TempDir>,
    runs: usize,
}

impl LocalEngine for TesseractEngine {
    fn recognize<'a>(
        &'a mut self,
        crop: &'a RasterCrop,
        mode: SegmentationMode,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            self.runs += 1;
            let workdir = self
                .workdir
                .as_ref()
                .ok_or_else(|| PipelineError::Engine("engine terminated".to_string()))?;
            let path = workdir.path().join(format!("crop-{}.png", self.runs));
            let png = crop.to_png()?;
            std::fs::write(&path, png)
                .map_err(|err| PipelineError::Engine(format!("failed to write crop: {}", err)))?;

            let config = self.config.clone();
            tokio::task::spawn_blocking(move || run_tesseract_text(&path, &config, mode))
                .await
                .map_err(|err| PipelineError::Engine(format!("OCR task failed: {}", err)))?
        })
    }

    fn terminate(&mut self) {
        if let Some(dir) = self.workdir.take()
            && let Err(err) = dir.close()
        {
            warn!("failed to remove OCR workdir: {}", err);
        }
    }
}

fn run_tesseract_text(
    path: &Path,
    config: &TesseractConfig,
    mode: SegmentationMode,
) -> PipelineResult<String> {
    let mut command = Command::new(&config.binary);
    command
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(&config.language)
        .arg("--oem")
        .arg("1")
        .arg("--psm")
        .arg(mode.psm().to_string());
    if config.preserve_interword_spaces {
        command.arg("-c").arg("preserve_interword_spaces=1");
    }
    let output = command.output().map_err(|err| {
        PipelineError::Engine(format!("failed to run {} (is it installed?): {}", config.binary, err))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::Engine(format!(
            "tesseract failed: {}",
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn list_tesseract_languages(binary: &str) -> PipelineResult<Vec<String>> {
    let output = Command::new(binary)
        .arg("--list-langs")
        .output()
        .map_err(|err| {
            PipelineError::Engine(format!("failed to run {} --list-langs: {}", binary, err))
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::Engine(format!(
            "tesseract --list-langs failed: {}",
            stderr.trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_language_list(&stdout))
}

fn parse_language_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_ocr_languages(binary: &str, requested: &str) -> PipelineResult<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Precondition(
            "ocr language is empty".to_string(),
        ));
    }

    // an unlistable install is left to fail at recognition time
    let Ok(available) = list_tesseract_languages(binary) else {
        return Ok(trimmed.to_string());
    };
    select_languages(trimmed, &available)
}

fn select_languages(requested: &str, available: &[String]) -> PipelineResult<String> {
    let mut chosen = Vec::new();
    let mut missing = Vec::new();
    for raw in requested.split(['+', ',', ' ']) {
        let lang = raw.trim();
        if lang.is_empty() {
            continue;
        }
        if available.iter().any(|value| value == lang) {
            chosen.push(lang.to_string());
        } else {
            missing.push(lang.to_string());
        }
    }

    if chosen.is_empty() {
        return Err(PipelineError::Engine(format!(
            "language data not installed: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        )));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }
    Ok(chosen.join("+"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine {
        terminated: Arc<AtomicUsize>,
    }

    impl LocalEngine for CountingEngine {
        fn recognize<'a>(
            &'a mut self,
            _crop: &'a RasterCrop,
            _mode: SegmentationMode,
        ) -> EngineFuture<'a> {
            Box::pin(async { Err(PipelineError::Engine("boom".to_string())) })
        }

        fn terminate(&mut self) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingFactory {
        terminated: Arc<AtomicUsize>,
    }

    impl EngineFactory for CountingFactory {
        type Engine = CountingEngine;

        fn create(&self) -> PipelineResult<CountingEngine> {
            Ok(CountingEngine {
                terminated: self.terminated.clone(),
            })
        }
    }

    #[test]
    fn lease_terminates_once() {
        let terminated = Arc::new(AtomicUsize::new(0));
        let factory = CountingFactory {
            terminated: terminated.clone(),
        };
        let lease = EngineLease::acquire(&factory).unwrap();
        lease.release();
        assert_eq!(terminated.load(Ordering::SeqCst), 1);

        {
            let _lease = EngineLease::acquire(&factory).unwrap();
        }
        assert_eq!(terminated.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn psm_values() {
        assert_eq!(SegmentationMode::UniformBlock.psm(), 6);
        assert_eq!(SegmentationMode::SparseText.psm(), 11);
    }

    #[test]
    fn language_list_skips_header() {
        let listed = parse_language_list("List of available languages (3):\neng\njpn\n\nosd\n");
        assert_eq!(listed, vec!["eng", "jpn", "osd"]);
    }

    #[test]
    fn language_selection_keeps_installed() {
        let available = vec!["eng".to_string(), "jpn".to_string()];
        assert_eq!(select_languages("jpn+jpn_vert", &available).unwrap(), "jpn");
        let err = select_languages("kor", &available).unwrap_err();
        assert!(err.to_string().starts_with("OCR failed: language data not installed: kor"));
    }

    #[test]
    fn terminated_tesseract_engine_refuses_work() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = TesseractEngine {
            config: TesseractConfig::default(),
            workdir: Some(dir),
            runs: 0,
        };
        engine.terminate();
        assert!(engine.workdir.is_none());
        engine.terminate();
    }
}
