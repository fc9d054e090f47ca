use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub mod crop;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod overlay;
mod paths;
pub mod recognition;
pub mod server;
pub mod session;
pub mod settings;
pub mod store;
#[cfg(test)]
mod test_util;
pub mod translate;
pub mod transliterate;

pub use crop::{PageImage, RasterCrop, crop_region};
pub use error::{PipelineError, PipelineResult};
pub use geometry::{NormalizedRegion, compute_region};
pub use overlay::OverlayState;
pub use recognition::{Orchestrator, Recognition, RecognitionMode, RecognitionResult};
pub use store::{FileGateway, PageRef, PersistenceGateway};

use geometry::{ContainerBox, PixelBox, Point};
use overlay::ActiveEntry;
use recognition::{HttpRemoteRecognizer, NoRemote, RemoteRecognizer, TesseractFactory};
use store::{HistoryEntry, VaultEntry};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub settings_path: Option<String>,
}

/// Where the selection comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionInput {
    Normalized(NormalizedRegion),
    /// A pointer drag in viewport pixels. Without an explicit image box the
    /// page is assumed to be rendered at natural size at the container origin.
    Drag {
        start: Point,
        end: Point,
        image_box: Option<PixelBox>,
        scroll: Point,
    },
}

#[derive(Debug, Clone)]
pub struct RecognizeRequest {
    pub image: PathBuf,
    pub region: RegionInput,
    pub chapter: Option<String>,
    pub page: u32,
    pub mode: Option<RecognitionMode>,
    pub save: bool,
    pub vault: bool,
}

/// Recognition finished but saving it did not. `output` still carries the
/// recognized text and whatever was saved.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SaveFailed {
    pub output: String,
    pub error: PipelineError,
}

#[derive(Debug, Clone)]
pub enum Command {
    Recognize(RecognizeRequest),
    History { page: PageRef },
    Toggle { page: PageRef, id: String },
    Forget { page: PageRef, id: String },
    VaultList,
    VaultDelete { id: String },
    Serve,
}

pub async fn run(config: Config, command: Command) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;

    if let Command::Serve = command {
        server::run_server(settings).await?;
        return Ok(String::new());
    }

    let session = settings.session();
    let gateway = FileGateway::new(settings.store_path.clone(), session.clone());
    let mut overlay =
        OverlayState::new(gateway).with_min_selection_px(settings.ocr.min_selection_px);

    match command {
        Command::Recognize(request) => {
            recognize(&settings, session.as_ref(), &mut overlay, request).await
        }
        Command::History { page } => {
            overlay.open_page(page).await?;
            Ok(format_history(overlay.entries()))
        }
        Command::Toggle { page, id } => {
            overlay.open_page(page).await?;
            let visible = overlay.toggle_visibility(&id).await?;
            Ok(format!("{}\t{}", id, visibility_label(visible)))
        }
        Command::Forget { page, id } => {
            overlay.open_page(page).await?;
            overlay.delete_entry(&id).await?;
            Ok(format!("deleted {}", id))
        }
        Command::VaultList => {
            let entries = overlay.gateway().list_vault().await?;
            Ok(format_vault(&entries))
        }
        Command::VaultDelete { id } => {
            overlay.gateway().delete_vault_entry(&id).await?;
            Ok(format!("deleted {}", id))
        }
        Command::Serve => Ok(String::new()),
    }
}

async fn recognize(
    settings: &settings::Settings,
    session: Option<&session::Session>,
    overlay: &mut OverlayState<FileGateway>,
    request: RecognizeRequest,
) -> Result<String> {
    let page_image = PageImage::open(&request.image)?;
    let chapter = match request.chapter {
        Some(chapter) => chapter,
        None => chapter_from_path(&request.image)?,
    };
    let page = PageRef::new(chapter, request.page);
    if let Err(err) = overlay.open_page(page).await {
        if request.save {
            return Err(err.into());
        }
        warn!("page history unavailable: {}", err);
    }

    let selection = match request.region {
        RegionInput::Normalized(region) => overlay.select_region(region),
        RegionInput::Drag {
            start,
            end,
            image_box,
            scroll,
        } => {
            let (width, height) = page_image.natural_size();
            let image_box =
                image_box.unwrap_or_else(|| PixelBox::new(0.0, 0.0, width as f64, height as f64));
            let container = ContainerBox {
                scroll_left: scroll.x,
                scroll_top: scroll.y,
                ..ContainerBox::default()
            };
            overlay.begin_selection(start);
            overlay.finish_selection(end, &container, &image_box)
        }
    }
    .ok_or_else(|| anyhow!("selection is too small or outside the page image"))?;

    let mode = request.mode.unwrap_or(settings.remote.mode);
    debug!(
        "recognizing {:?} of {} in {} mode",
        selection.region,
        request.image.display(),
        mode.as_str()
    );
    let remote: Box<dyn RemoteRecognizer> = match settings.remote.url.as_deref() {
        Some(url) => Box::new(HttpRemoteRecognizer::new(url)),
        None => Box::new(NoRemote),
    };
    let translator = translate::translator_or_disabled(&settings.translation);
    let orchestrator = Orchestrator::new(
        remote,
        TesseractFactory::new(settings.tesseract_config()),
        translator,
        settings.orchestrator_options(mode),
    );

    let outcome = orchestrator
        .recognize(&page_image, &selection.region, session)
        .await;
    overlay.resolve(selection, outcome).await?;
    save_and_report(overlay, request.vault, request.save).await
}

/// Runs the requested saves and formats the result. Every save is attempted
/// and the recognition is always part of the output, even when one fails.
async fn save_and_report<G: PersistenceGateway>(
    overlay: &mut OverlayState<G>,
    vault: bool,
    save: bool,
) -> Result<String> {
    let active = overlay
        .active()
        .cloned()
        .ok_or_else(|| anyhow!("recognition result was discarded"))?;

    let vault_outcome = if vault {
        Some(overlay.save_active_to_vault().await)
    } else {
        None
    };
    let history_outcome = if save {
        Some(overlay.save_active().await)
    } else {
        None
    };
    let output = format_recognition(&active, history_outcome.as_ref(), vault_outcome.as_ref());

    let failure = vault_outcome
        .and_then(Result::err)
        .or_else(|| history_outcome.and_then(Result::err));
    match failure {
        Some(error) => Err(SaveFailed { output, error }.into()),
        None => Ok(output),
    }
}

fn chapter_from_path(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
        .with_context(|| format!("cannot derive a chapter id from {}", path.display()))
}

fn format_recognition(
    active: &ActiveEntry,
    history: Option<&PipelineResult<String>>,
    vault: Option<&PipelineResult<String>>,
) -> String {
    let mut lines = vec![format!("text: {}", active.result.text)];
    match (&active.result.translated, &active.translation_error) {
        (Some(translated), _) => lines.push(format!("translated: {}", translated)),
        (None, Some(err)) => lines.push(format!("translated: ({})", err)),
        (None, None) => lines.push("translated: -".to_string()),
    }
    lines.push(format!(
        "romaji: {}",
        active.result.phonetic.as_deref().unwrap_or("-")
    ));
    if let Some(outcome) = history {
        lines.push(format!("history: {}", saved_label(outcome)));
    }
    if let Some(outcome) = vault {
        lines.push(format!("vault: {}", saved_label(outcome)));
    }
    lines.join("\n")
}

fn saved_label(outcome: &PipelineResult<String>) -> String {
    match outcome {
        Ok(id) => id.clone(),
        Err(err) => format!("({})", err),
    }
}

fn format_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "no history entries".to_string();
    }
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}\t{}\t{:.3},{:.3},{:.3},{:.3}\t{}\t{}",
                entry.id,
                visibility_label(entry.visible),
                entry.region.x(),
                entry.region.y(),
                entry.region.w(),
                entry.region.h(),
                entry.result.text,
                entry.result.translated.as_deref().unwrap_or("-")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_vault(entries: &[VaultEntry]) -> String {
    if entries.is_empty() {
        return "vault is empty".to_string();
    }
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}\t{}\t{}\t{}",
                entry.id,
                entry.original,
                entry.translated.as_deref().unwrap_or("-"),
                entry.phonetic.as_deref().unwrap_or("-")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn visibility_label(visible: bool) -> &'static str {
    if visible { "visible" } else { "hidden" }
}
