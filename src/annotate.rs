use std::io::Cursor;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detector::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 3;
const FONT_SIZE: f32 = 16.0;

/// Fonts tried when no font path is configured.
pub const DEFAULT_FONT_PATHS: [&str; 4] = [
    "arial.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
];

/// Annotation error enum.
#[derive(thiserror::Error, Debug)]
pub enum AnnotateError {
    /// The font file could not be read.
    #[error("failed to read font {path}: {source}")]
    FontIo {
        /// Font path.
        path: PathBuf,
        /// Underlying io error.
        source: std::io::Error,
    },

    /// The font file is not a usable TrueType/OpenType font.
    #[error("invalid font {0}")]
    InvalidFont(PathBuf),

    /// Image encoding error.
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Draws detection boxes and labels onto images.
pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Annotator {
    /// An annotator that draws boxes and, when a font is given, labels.
    pub fn new(font: Option<FontVec>) -> Self {
        Self {
            font,
            scale: PxScale::from(FONT_SIZE),
        }
    }

    /// Load the font at `path`.
    pub fn from_font_file(path: &Path) -> Result<Self, AnnotateError> {
        let bytes = std::fs::read(path).map_err(|source| AnnotateError::FontIo {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| AnnotateError::InvalidFont(path.to_path_buf()))?;
        Ok(Self::new(Some(font)))
    }

    /// Use the configured font, else the first readable default font, else
    /// draw boxes without labels.
    pub fn discover(configured: Option<&Path>) -> Self {
        let candidates = configured
            .map(|p| vec![p.to_path_buf()])
            .unwrap_or_else(|| DEFAULT_FONT_PATHS.iter().map(PathBuf::from).collect());
        for path in candidates.iter().filter(|p| p.is_file()) {
            match Self::from_font_file(path) {
                Ok(annotator) => {
                    tracing::info!(font = %path.display(), "label font loaded");
                    return annotator;
                }
                Err(e) => tracing::warn!("{e}"),
            }
        }
        tracing::warn!("no usable font found, annotations will have boxes only");
        Self::new(None)
    }

    /// Whether labels are drawn next to the boxes.
    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw every detection onto a copy of `image`.
    pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut annotated = image.clone();
        for detection in detections {
            self.draw_detection(&mut annotated, detection);
        }
        annotated
    }

    fn draw_detection(&self, canvas: &mut RgbImage, detection: &Detection) {
        let [x1, y1, x2, y2] = detection.bbox;
        for inset in 0..BOX_THICKNESS {
            // corners are inclusive
            let width = x2 - x1 + 1 - 2 * inset;
            let height = y2 - y1 + 1 - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
        }

        let Some(font) = &self.font else {
            return;
        };
        let label = detection.label();
        let (text_width, text_height) = text_size(self.scale, font, &label);
        let background = Rect::at(x1, y1 - text_height as i32 - 5)
            .of_size(text_width.max(1) + 5, text_height.max(1) + 5);
        draw_filled_rect_mut(canvas, background, BOX_COLOR);
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            x1 + 2,
            y1 - text_height as i32 - 3,
            self.scale,
            font,
            &label,
        );
    }
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, AnnotateError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(bbox: [i32; 4]) -> Detection {
        Detection {
            class_name: "Hotdog".to_string(),
            confidence: 66.6,
            bbox,
        }
    }

    #[test]
    fn test_annotate_draws_box_on_copy() {
        let image = RgbImage::from_pixel(64, 48, Rgb([255, 255, 255]));
        let annotated = Annotator::new(None).annotate(&image, &[detection([10, 10, 40, 30])]);

        assert_eq!(image.get_pixel(10, 10), &Rgb([255, 255, 255]));
        assert_eq!(annotated.get_pixel(10, 10), &BOX_COLOR);
        assert_eq!(annotated.get_pixel(12, 20), &BOX_COLOR);
        assert_eq!(annotated.get_pixel(25, 20), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_box_includes_far_corner() {
        let image = RgbImage::from_pixel(64, 48, Rgb([255, 255, 255]));
        let annotated = Annotator::new(None).annotate(&image, &[detection([10, 10, 40, 30])]);

        assert_eq!(annotated.get_pixel(40, 30), &BOX_COLOR);
        assert_eq!(annotated.get_pixel(40, 20), &BOX_COLOR);
        assert_eq!(annotated.get_pixel(25, 30), &BOX_COLOR);
        assert_eq!(annotated.get_pixel(41, 31), &Rgb([255, 255, 255]));
        assert_eq!(annotated.get_pixel(37, 20), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_degenerate_box_is_skipped() {
        let image = RgbImage::from_pixel(16, 16, Rgb([0, 0, 255]));
        let annotated = Annotator::new(None).annotate(&image, &[detection([6, 5, 5, 12])]);
        assert_eq!(annotated, image);
    }

    #[test]
    fn test_encode_png_roundtrips_dimensions() -> Result<(), Box<dyn std::error::Error>> {
        let image = RgbImage::from_pixel(7, 3, Rgb([1, 2, 3]));
        let bytes = encode_png(&image)?;
        assert_eq!(image::guess_format(&bytes)?, ImageFormat::Png);
        assert_eq!(image::load_from_memory(&bytes)?.to_rgb8().dimensions(), (7, 3));
        Ok(())
    }

    #[test]
    fn test_missing_font_file_is_an_error() {
        let result = Annotator::from_font_file(Path::new("/nonexistent/font.ttf"));
        assert!(matches!(result, Err(AnnotateError::FontIo { .. })));
    }
}
