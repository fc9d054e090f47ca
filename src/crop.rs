use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};
use crate::geometry::NormalizedRegion;

pub const DEFAULT_UPSCALE: u32 = 2;
/// Crops taller than `width * VERTICAL_TEXT_RATIO` are read as vertical text.
pub const VERTICAL_TEXT_RATIO: f64 = 1.2;

const PNG_MIME: &str = "image/png";

/// A fully decoded page bitmap.
#[derive(Debug, Clone)]
pub struct PageImage {
    image: DynamicImage,
}

impl PageImage {
    pub fn new(image: DynamicImage) -> PipelineResult<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::Precondition(
                "page image is not loaded (zero natural size)".to_string(),
            ));
        }
        Ok(Self { image })
    }

    pub fn from_bytes(bytes: &[u8]) -> PipelineResult<Self> {
        let image = image::load_from_memory(bytes).map_err(|err| {
            PipelineError::Precondition(format!("failed to decode page image: {}", err))
        })?;
        Self::new(image)
    }

    pub fn open(path: &Path) -> PipelineResult<Self> {
        let image = image::open(path).map_err(|err| {
            PipelineError::Precondition(format!(
                "failed to load page image {}: {}",
                path.display(),
                err
            ))
        })?;
        Self::new(image)
    }

    pub fn natural_size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CropOptions {
    pub upscale: u32,
    pub vertical_ratio: f64,
}

impl Default for CropOptions {
    fn default() -> Self {
        Self {
            upscale: DEFAULT_UPSCALE,
            vertical_ratio: VERTICAL_TEXT_RATIO,
        }
    }
}

/// Pixel rectangle in the source image's natural coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn from_region(region: &NormalizedRegion, natural_width: u32, natural_height: u32) -> Self {
        let (x, width) = axis_span(region.x(), region.w(), natural_width);
        let (y, height) = axis_span(region.y(), region.h(), natural_height);
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_vertical(&self, ratio: f64) -> bool {
        self.height as f64 > self.width as f64 * ratio
    }
}

fn axis_span(offset: f64, extent: f64, natural: u32) -> (u32, u32) {
    let natural_f = natural as f64;
    let start = ((offset * natural_f).round() as u32).min(natural.saturating_sub(1));
    let len = ((extent * natural_f).round() as u32).max(1);
    (start, len.min(natural - start))
}

/// Crop ready for recognition: upscaled, and turned horizontal when the
/// source looked like vertical text.
#[derive(Debug, Clone)]
pub struct RasterCrop {
    pub image: RgbaImage,
    pub source: CropRect,
    pub rotated: bool,
}

impl RasterCrop {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn to_png(&self) -> PipelineResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.image
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|err| PipelineError::Precondition(format!("failed to encode crop: {}", err)))?;
        Ok(out.into_inner())
    }

    pub fn to_data_url(&self) -> PipelineResult<String> {
        let encoded = BASE64.encode(self.to_png()?);
        Ok(format!("data:{};base64,{}", PNG_MIME, encoded))
    }

    /// Decodes a crop that was prepared elsewhere, either as a
    /// `data:image/...;base64,` URL or as bare base64. The raster is taken as
    /// already oriented and scaled.
    pub fn from_data_url(value: &str) -> PipelineResult<Self> {
        let value = value.trim();
        let payload = match value.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest.split_once(',').ok_or_else(|| {
                    PipelineError::Precondition("data URL has no payload".to_string())
                })?;
                if !header.ends_with(";base64") {
                    return Err(PipelineError::Precondition(
                        "data URL is not base64 encoded".to_string(),
                    ));
                }
                data
            }
            None => value,
        };
        let bytes = BASE64.decode(payload.trim()).map_err(|err| {
            PipelineError::Precondition(format!("invalid base64 image payload: {}", err))
        })?;
        let page = PageImage::from_bytes(&bytes)?;
        let (width, height) = page.natural_size();
        Ok(RasterCrop {
            image: page.image.to_rgba8(),
            source: CropRect {
                x: 0,
                y: 0,
                width,
                height,
            },
            rotated: false,
        })
    }
}

/// Cuts `region` out of the natural-size source, rotates vertical crops 90°
/// clockwise, and scales by `options.upscale` with a Lanczos filter.
pub fn crop_region(
    source: &PageImage,
    region: &NormalizedRegion,
    options: CropOptions,
) -> PipelineResult<RasterCrop> {
    let (natural_width, natural_height) = source.natural_size();
    let rect = CropRect::from_region(region, natural_width, natural_height);
    let rotated = rect.is_vertical(options.vertical_ratio);

    let cropped = source
        .image
        .crop_imm(rect.x, rect.y, rect.width, rect.height)
        .to_rgba8();
    let oriented = if rotated {
        imageops::rotate90(&cropped)
    } else {
        cropped
    };

    let scale = options.upscale.max(1);
    let image = if scale > 1 {
        let (width, height) = oriented.dimensions();
        imageops::resize(
            &oriented,
            width.saturating_mul(scale),
            height.saturating_mul(scale),
            FilterType::Lanczos3,
        )
    } else {
        oriented
    };

    tracing::debug!(
        "cropped {}x{} at ({}, {}) -> {}x{}{}",
        rect.width,
        rect.height,
        rect.x,
        rect.y,
        image.width(),
        image.height(),
        if rotated { " (rotated)" } else { "" }
    );

    Ok(RasterCrop {
        image,
        source: rect,
        rotated,
    })
}
