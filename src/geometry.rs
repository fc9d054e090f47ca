//! Coordinate transforms between pointer positions, rendered element boxes
//! and page-relative regions.
//!
//! Pointer positions and element boxes arrive in viewport pixels (what a
//! bounding-client-rect reports). The scrollable container maps them into its
//! own content space; a selection is then expressed as fractions of the
//! rendered page image so it can be replayed against any later layout.

use serde::{Deserialize, Serialize};

/// Selections narrower or shorter than this are treated as stray clicks.
pub const MIN_SELECTION_PX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An element box in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelBox {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// The scrollable container the page image is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContainerBox {
    pub left: f64,
    pub top: f64,
    pub scroll_left: f64,
    pub scroll_top: f64,
}

impl ContainerBox {
    pub fn to_local(&self, point: Point) -> Point {
        Point {
            x: point.x - self.left + self.scroll_left,
            y: point.y - self.top + self.scroll_top,
        }
    }

    pub fn to_local_box(&self, rect: &PixelBox) -> PixelBox {
        let origin = self.to_local(Point::new(rect.left, rect.top));
        PixelBox {
            left: origin.x,
            top: origin.y,
            width: rect.width,
            height: rect.height,
        }
    }
}

/// A rectangle expressed as fractions of the page image.
///
/// Always satisfies `0 <= x, y`, `x + w <= 1` and `y + h <= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRegion {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl NormalizedRegion {
    /// Builds a region, clamping the origin into `[0, 1]` and the extent so
    /// the region never leaves the image.
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        let x = clamp_unit(x);
        let y = clamp_unit(y);
        let w = clamp_unit(w).min(1.0 - x);
        let h = clamp_unit(h).min(1.0 - y);
        Self { x, y, w, h }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn w(&self) -> f64 {
        self.w
    }

    pub fn h(&self) -> f64 {
        self.h
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0.0 || self.h <= 0.0
    }

    /// Position of this region for the current layout, relative to the
    /// container's content. Recomputed on every render.
    pub fn to_absolute(&self, container: &ContainerBox, image: &PixelBox) -> AbsoluteBox {
        let image = container.to_local_box(image);
        AbsoluteBox {
            left: image.left + self.x * image.width,
            top: image.top + self.y * image.height,
            width: self.w * image.width,
            height: self.h * image.height,
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Pixel placement relative to the container; only used for rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsoluteBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Axis-aligned rectangle spanned by two drag points, in either direction.
pub fn drag_rect(start: Point, end: Point) -> PixelBox {
    PixelBox {
        left: start.x.min(end.x),
        top: start.y.min(end.y),
        width: (end.x - start.x).abs(),
        height: (end.y - start.y).abs(),
    }
}

/// Converts a pointer drag into a region of the displayed image.
///
/// Returns `None` for drags under [`MIN_SELECTION_PX`] in either dimension,
/// for an image box with no area, and for drags entirely outside the image.
pub fn compute_region(
    drag_start: Point,
    drag_end: Point,
    container: &ContainerBox,
    image: &PixelBox,
) -> Option<NormalizedRegion> {
    compute_region_with_min(drag_start, drag_end, container, image, MIN_SELECTION_PX)
}

/// [`compute_region`] with a configurable minimum selection size.
pub fn compute_region_with_min(
    drag_start: Point,
    drag_end: Point,
    container: &ContainerBox,
    image: &PixelBox,
    min_px: f64,
) -> Option<NormalizedRegion> {
    let rect = drag_rect(container.to_local(drag_start), container.to_local(drag_end));
    if rect.width < min_px || rect.height < min_px {
        return None;
    }
    if image.is_empty() {
        return None;
    }

    let image = container.to_local_box(image);
    let region = NormalizedRegion::new(
        (rect.left - image.left) / image.width,
        (rect.top - image.top) / image.height,
        rect.width / image.width,
        rect.height / image.height,
    );
    if region.is_empty() {
        return None;
    }
    Some(region)
}
