//! Per-reader overlay state: the single unsaved result, the persisted entries
//! of the page on screen, and the selection in progress.

use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::geometry::{
    AbsoluteBox, ContainerBox, MIN_SELECTION_PX, NormalizedRegion, PixelBox, Point,
    compute_region_with_min,
};
use crate::recognition::{Recognition, RecognitionResult};
use crate::store::{HistoryEntry, PageRef, PersistenceGateway};

/// The unsaved result of the latest selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEntry {
    pub page: PageRef,
    pub region: NormalizedRegion,
    pub result: RecognitionResult,
    pub translation_error: Option<PipelineError>,
}

/// Identifies the selection a pending recognition belongs to. Results whose
/// ticket no longer matches are dropped on arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTicket {
    page: PageRef,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub ticket: SelectionTicket,
    pub region: NormalizedRegion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The selection was superseded; nothing changed.
    Stale,
    Active,
    /// Auto-save wrote the result as a history row.
    Saved(String),
}

/// A persisted entry placed for the current layout.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOverlay<'a> {
    pub id: &'a str,
    pub placement: AbsoluteBox,
    pub result: &'a RecognitionResult,
}

pub struct OverlayState<G> {
    gateway: G,
    page: Option<PageRef>,
    active: Option<ActiveEntry>,
    entries: Vec<HistoryEntry>,
    drag_start: Option<Point>,
    seq: u64,
    min_selection_px: f64,
    auto_save: bool,
}

impl<G: PersistenceGateway> OverlayState<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            page: None,
            active: None,
            entries: Vec::new(),
            drag_start: None,
            seq: 0,
            min_selection_px: MIN_SELECTION_PX,
            auto_save: false,
        }
    }

    pub fn with_min_selection_px(mut self, min_px: f64) -> Self {
        self.min_selection_px = min_px;
        self
    }

    pub fn with_auto_save(mut self, auto_save: bool) -> Self {
        self.auto_save = auto_save;
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn active(&self) -> Option<&ActiveEntry> {
        self.active.as_ref()
    }

    /// Persisted entries of the current page, in gateway order.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Switches to `page`. The active result is dropped even when loading the
    /// page's entries fails.
    pub async fn open_page(&mut self, page: PageRef) -> PipelineResult<()> {
        self.active = None;
        self.drag_start = None;
        self.entries.clear();
        self.seq += 1;
        self.page = Some(page);
        self.reload().await
    }

    pub async fn reload(&mut self) -> PipelineResult<()> {
        let page = self.current_page()?.clone();
        self.entries = self.gateway.list_history_for_page(&page).await?;
        debug!("loaded {} overlay entr(ies) for {}", self.entries.len(), page);
        Ok(())
    }

    pub fn begin_selection(&mut self, point: Point) {
        self.active = None;
        self.seq += 1;
        self.drag_start = Some(point);
    }

    /// Ends the drag. `None` when no drag was started, no page is open or
    /// the drag is too small to count as a selection.
    pub fn finish_selection(
        &mut self,
        end: Point,
        container: &ContainerBox,
        image: &PixelBox,
    ) -> Option<Selection> {
        let start = self.drag_start.take()?;
        let page = self.page.clone()?;
        let region = compute_region_with_min(start, end, container, image, self.min_selection_px)?;
        Some(Selection {
            ticket: SelectionTicket {
                page,
                seq: self.seq,
            },
            region,
        })
    }

    /// Starts a selection from an already normalized region, bypassing the
    /// drag. `None` when no page is open or the region is empty.
    pub fn select_region(&mut self, region: NormalizedRegion) -> Option<Selection> {
        self.begin_selection(Point::default());
        self.drag_start = None;
        if region.is_empty() {
            return None;
        }
        let page = self.page.clone()?;
        Some(Selection {
            ticket: SelectionTicket {
                page,
                seq: self.seq,
            },
            region,
        })
    }

    /// Applies a finished recognition. A failed run leaves no active entry;
    /// a failed auto-save keeps the active entry and reports the error.
    pub async fn resolve(
        &mut self,
        selection: Selection,
        outcome: PipelineResult<Recognition>,
    ) -> PipelineResult<Resolution> {
        if !self.is_current(&selection.ticket) {
            debug!("dropping result of superseded selection");
            return Ok(Resolution::Stale);
        }
        let recognition = outcome?;
        self.active = Some(ActiveEntry {
            page: selection.ticket.page,
            region: selection.region,
            result: recognition.result,
            translation_error: recognition.translation_error,
        });
        if self.auto_save {
            let id = self.save_active().await?;
            return Ok(Resolution::Saved(id));
        }
        Ok(Resolution::Active)
    }

    pub fn dismiss(&mut self) {
        self.active = None;
        self.seq += 1;
    }

    /// Writes the active result as a history row of its page.
    pub async fn save_active(&mut self) -> PipelineResult<String> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| PipelineError::Precondition("no active result to save".to_string()))?;
        let id = self
            .gateway
            .create_history_entry(active.region, &active.page, &active.result)
            .await?;
        let saved_page = active.page.clone();
        self.active = None;
        if self.page.as_ref() == Some(&saved_page)
            && let Err(err) = self.reload().await
        {
            warn!("history entry {} saved but reload failed: {}", id, err);
        }
        Ok(id)
    }

    /// Copies the active result into the vault. The active entry stays.
    pub async fn save_active_to_vault(&self) -> PipelineResult<String> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| PipelineError::Precondition("no active result to save".to_string()))?;
        self.gateway.create_vault_entry(&active.result).await
    }

    /// Flips an entry's visibility. The cached flag changes only after the
    /// gateway accepted it.
    pub async fn toggle_visibility(&mut self, id: &str) -> PipelineResult<bool> {
        let visible = !self.entry(id)?.visible;
        self.gateway.set_history_visibility(id, visible).await?;
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) {
            entry.visible = visible;
        }
        Ok(visible)
    }

    pub async fn delete_entry(&mut self, id: &str) -> PipelineResult<()> {
        self.gateway.delete_history_entry(id).await?;
        self.entries.retain(|entry| entry.id != id);
        Ok(())
    }

    /// Visible entries positioned against the image box as rendered now.
    pub fn overlays(&self, container: &ContainerBox, image: &PixelBox) -> Vec<PlacedOverlay<'_>> {
        self.entries
            .iter()
            .filter(|entry| entry.visible)
            .map(|entry| PlacedOverlay {
                id: &entry.id,
                placement: entry.region.to_absolute(container, image),
                result: &entry.result,
            })
            .collect()
    }

    pub fn active_placement(
        &self,
        container: &ContainerBox,
        image: &PixelBox,
    ) -> Option<AbsoluteBox> {
        self.active
            .as_ref()
            .map(|active| active.region.to_absolute(container, image))
    }

    fn is_current(&self, ticket: &SelectionTicket) -> bool {
        ticket.seq == self.seq && self.page.as_ref() == Some(&ticket.page)
    }

    fn current_page(&self) -> PipelineResult<&PageRef> {
        self.page
            .as_ref()
            .ok_or_else(|| PipelineError::Precondition("no page is open".to_string()))
    }

    fn entry(&self, id: &str) -> PipelineResult<&HistoryEntry> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .ok_or_else(|| PipelineError::Persistence(format!("history entry {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::TextSource;
    use crate::session::Session;
    use crate::store::FileGateway;

    fn gateway(dir: &std::path::Path) -> FileGateway {
        FileGateway::new(dir.join("store.json"), Session::new("reader", "token"))
    }

    fn recognition(text: &str) -> Recognition {
        Recognition {
            result: RecognitionResult {
                text: text.to_string(),
                translated: Some("Hello".to_string()),
                phonetic: Some("konnichiha".to_string()),
            },
            source: TextSource::Remote,
            translation_error: None,
        }
    }

    fn image_box() -> PixelBox {
        PixelBox::new(0.0, 0.0, 400.0, 400.0)
    }

    fn select(state: &mut OverlayState<FileGateway>) -> Selection {
        state.begin_selection(Point::new(100.0, 100.0));
        state
            .finish_selection(Point::new(200.0, 300.0), &ContainerBox::default(), &image_box())
            .unwrap()
    }

    #[tokio::test]
    async fn resolve_sets_single_active_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = OverlayState::new(gateway(dir.path()));
        state.open_page(PageRef::new("ch", 1)).await.unwrap();

        let selection = select(&mut state);
        assert_eq!(selection.region, NormalizedRegion::new(0.25, 0.25, 0.25, 0.5));
        let resolution = state.resolve(selection, Ok(recognition("こんにちは"))).await;
        assert_eq!(resolution.unwrap(), Resolution::Active);
        assert_eq!(state.active().unwrap().result.text, "こんにちは");
        let placed = state
            .active_placement(&ContainerBox::default(), &PixelBox::new(0.0, 0.0, 800.0, 800.0))
            .unwrap();
        assert_eq!(placed.left, 200.0);
        assert_eq!(placed.height, 400.0);

        state.begin_selection(Point::new(0.0, 0.0));
        assert!(state.active().is_none());
    }

    #[tokio::test]
    async fn superseded_results_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = OverlayState::new(gateway(dir.path()));
        state.open_page(PageRef::new("ch", 1)).await.unwrap();

        let first = select(&mut state);
        let second = select(&mut state);
        assert_eq!(
            state.resolve(first, Ok(recognition("古い"))).await.unwrap(),
            Resolution::Stale
        );
        assert!(state.active().is_none());
        state.resolve(second, Ok(recognition("新しい"))).await.unwrap();
        assert_eq!(state.active().unwrap().result.text, "新しい");

        let third = select(&mut state);
        state.dismiss();
        assert_eq!(
            state.resolve(third, Ok(recognition("x"))).await.unwrap(),
            Resolution::Stale
        );
        assert!(state.active().is_none());
    }

    #[tokio::test]
    async fn page_change_clears_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = OverlayState::new(gateway(dir.path()));
        state.open_page(PageRef::new("ch", 1)).await.unwrap();
        let selection = select(&mut state);
        state.resolve(selection, Ok(recognition("あ"))).await.unwrap();

        state.open_page(PageRef::new("ch", 2)).await.unwrap();
        assert!(state.active().is_none());
    }

    #[tokio::test]
    async fn tiny_drag_is_not_a_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = OverlayState::new(gateway(dir.path()));
        state.open_page(PageRef::new("ch", 1)).await.unwrap();
        state.begin_selection(Point::new(100.0, 100.0));
        let selection =
            state.finish_selection(Point::new(105.0, 300.0), &ContainerBox::default(), &image_box());
        assert!(selection.is_none());
    }

    #[tokio::test]
    async fn save_clears_active_and_lists_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = OverlayState::new(gateway(dir.path()));
        state.open_page(PageRef::new("ch", 1)).await.unwrap();
        let selection = select(&mut state);
        state.resolve(selection, Ok(recognition("あ"))).await.unwrap();

        let id = state.save_active().await.unwrap();
        assert!(state.active().is_none());
        assert_eq!(state.entries().len(), 1);
        assert_eq!(state.entries()[0].id, id);
        assert!(state.entries()[0].visible);
    }

    #[tokio::test]
    async fn vault_save_keeps_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = OverlayState::new(gateway(dir.path()));
        state.open_page(PageRef::new("ch", 1)).await.unwrap();
        let selection = select(&mut state);
        state.resolve(selection, Ok(recognition("猫"))).await.unwrap();

        state.save_active_to_vault().await.unwrap();
        assert!(state.active().is_some());
        let vault = state.gateway().list_vault().await.unwrap();
        assert_eq!(vault[0].original, "猫");
    }

    #[tokio::test]
    async fn failed_save_keeps_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileGateway::new(dir.path().join("store.json"), None);
        let mut state = OverlayState::new(store).with_auto_save(true);
        let opened = state.open_page(PageRef::new("ch", 1)).await;
        assert_eq!(opened.unwrap_err(), PipelineError::NotAuthenticated);

        let selection = select(&mut state);
        let err = state
            .resolve(selection, Ok(recognition("あ")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "not authenticated");
        assert_eq!(state.active().unwrap().result.text, "あ");
        assert_eq!(
            state.save_active_to_vault().await.unwrap_err(),
            PipelineError::NotAuthenticated
        );
        assert!(state.active().is_some());
    }

    #[tokio::test]
    async fn auto_save_writes_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = OverlayState::new(gateway(dir.path())).with_auto_save(true);
        state.open_page(PageRef::new("ch", 1)).await.unwrap();
        let selection = select(&mut state);
        let resolution = state.resolve(selection, Ok(recognition("あ"))).await.unwrap();
        assert!(matches!(resolution, Resolution::Saved(_)));
        assert_eq!(state.entries().len(), 1);
    }

    #[tokio::test]
    async fn hidden_entries_are_not_placed() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = OverlayState::new(gateway(dir.path()));
        state.open_page(PageRef::new("ch", 1)).await.unwrap();
        for text in ["一", "二"] {
            let selection = select(&mut state);
            state.resolve(selection, Ok(recognition(text))).await.unwrap();
            state.save_active().await.unwrap();
        }
        let hidden = state.entries()[0].id.clone();
        assert!(!state.toggle_visibility(&hidden).await.unwrap());

        let placed = state.overlays(&ContainerBox::default(), &PixelBox::new(0.0, 0.0, 800.0, 800.0));
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].result.text, "一");
        assert_eq!(
            placed[0].placement,
            AbsoluteBox {
                left: 200.0,
                top: 200.0,
                width: 200.0,
                height: 400.0
            }
        );
    }

    #[tokio::test]
    async fn failed_recognition_leaves_nothing_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = OverlayState::new(gateway(dir.path()));
        state.open_page(PageRef::new("ch", 1)).await.unwrap();
        let selection = select(&mut state);
        let err = state
            .resolve(selection, Err(PipelineError::NoText))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no text recognized");
        assert!(state.active().is_none());
        assert!(state.entries().is_empty());
    }

    #[tokio::test]
    async fn toggling_unknown_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = OverlayState::new(gateway(dir.path()));
        state.open_page(PageRef::new("ch", 1)).await.unwrap();
        assert!(matches!(
            state.toggle_visibility("missing").await,
            Err(PipelineError::Persistence(_))
        ));
    }
}
