//! Cosmetic overlays: crosshairs and text labels.
//!
//! Drawing is clipped to the frame. Annotation never fails a capture; the
//! checked drawing primitives report misuse, and [`annotate`] logs and
//! ignores it.

use crate::mux::CameraSelector;
use image::{Rgb, RgbImage};
use thiserror::Error;
use tracing::debug;

/// Crosshair colour.
pub const CROSSHAIR_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);

/// Camera label colour.
pub const LABEL_COLOUR: Rgb<u8> = Rgb([255, 255, 255]);

/// Top-left corner of the camera label.
pub const LABEL_ORIGIN: (u32, u32) = (20, 20);

/// Glyph cell size of the built-in font, excluding spacing.
const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

/// Errors from the drawing primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    /// The anchor point lies outside the frame.
    #[error("point ({x}, {y}) is outside the {width}x{height} frame")]
    OutOfFrame {
        /// Anchor x.
        x: u32,
        /// Anchor y.
        y: u32,
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
    },
}

fn check_anchor(image: &RgbImage, x: u32, y: u32) -> Result<(), OverlayError> {
    let (width, height) = image.dimensions();
    if x >= width || y >= height {
        return Err(OverlayError::OutOfFrame {
            x,
            y,
            width,
            height,
        });
    }
    Ok(())
}

fn put(image: &mut RgbImage, x: u32, y: u32, colour: Rgb<u8>) {
    if let Some(pixel) = image.get_pixel_mut_checked(x, y) {
        *pixel = colour;
    }
}

/// Draw a one-pixel crosshair centered on `(x, y)` with arms of length `arm`.
pub fn draw_crosshair(image: &mut RgbImage, x: u32, y: u32, arm: u32) -> Result<(), OverlayError> {
    check_anchor(image, x, y)?;

    for dx in x.saturating_sub(arm)..=x.saturating_add(arm) {
        put(image, dx, y, CROSSHAIR_COLOUR);
    }
    for dy in y.saturating_sub(arm)..=y.saturating_add(arm) {
        put(image, x, dy, CROSSHAIR_COLOUR);
    }
    Ok(())
}

/// Crosshair in the middle of the frame, arms proportional to the frame.
pub fn add_center_crosshair(image: &mut RgbImage) -> Result<(), OverlayError> {
    let (width, height) = image.dimensions();
    draw_crosshair(image, width / 2, height / 2, width.min(height) / 20)
}

/// One smaller crosshair at the center of each quadrant.
pub fn add_quadrant_crosshairs(image: &mut RgbImage) -> Result<(), OverlayError> {
    let (width, height) = image.dimensions();
    let arm = width.min(height) / 30;
    for (x, y) in quadrant_centers(width, height) {
        draw_crosshair(image, x, y, arm)?;
    }
    Ok(())
}

/// Centers of the four quadrants: top-left, top-right, bottom-left, bottom-right.
#[must_use]
pub const fn quadrant_centers(width: u32, height: u32) -> [(u32, u32); 4] {
    let (left, right) = (width / 4, width / 4 * 3);
    let (top, bottom) = (height / 4, height / 4 * 3);
    [(left, top), (right, top), (left, bottom), (right, bottom)]
}

/// Horizontal advance of `text` at `scale`.
#[must_use]
pub fn text_width(text: &str, scale: u32) -> u32 {
    let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
    chars.saturating_mul((GLYPH_WIDTH + 1) * scale)
}

/// Draw `text` with its top-left corner at `(x, y)` using the built-in
/// 5x7 font. Lowercase letters render as uppercase; unknown characters as `?`.
pub fn draw_text(
    image: &mut RgbImage,
    x: u32,
    y: u32,
    text: &str,
    colour: Rgb<u8>,
    scale: u32,
) -> Result<(), OverlayError> {
    check_anchor(image, x, y)?;
    let scale = scale.max(1);
    let advance = (GLYPH_WIDTH + 1) * scale;

    let mut pen_x = x;
    for ch in text.chars() {
        if pen_x >= image.width() {
            break;
        }
        for (row, bits) in (0..GLYPH_HEIGHT).zip(glyph(ch)) {
            for col in 0..GLYPH_WIDTH {
                if bits & (0b1_0000 >> col) == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        put(image, pen_x + col * scale + sx, y + row * scale + sy, colour);
                    }
                }
            }
        }
        pen_x = pen_x.saturating_add(advance);
    }
    Ok(())
}

/// Overlay for a frame coming from `camera`.
///
/// Single cameras get a center crosshair and a `CAMERA n` label (1-based),
/// the composite gets one crosshair per quadrant, unknown sources only the
/// center crosshair. Drawing problems are logged and otherwise ignored.
pub fn annotate(image: &mut RgbImage, camera: Option<CameraSelector>) {
    let result = match camera {
        Some(CameraSelector::Composite) => add_quadrant_crosshairs(image),
        Some(CameraSelector::Camera(index)) => add_center_crosshair(image).and_then(|()| {
            let label = format!("CAMERA {}", u32::from(index) + 1);
            draw_text(image, LABEL_ORIGIN.0, LABEL_ORIGIN.1, &label, LABEL_COLOUR, 2)
        }),
        None => add_center_crosshair(image),
    };
    if let Err(err) = result {
        debug!(%err, "overlay skipped");
    }
}

/// Row bitmaps (5 bits, MSB on the left) of the built-in font.
#[allow(clippy::too_many_lines)]
const fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        ' ' => [0; 7],
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        ',' => [0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b00100, 0b01000],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '=' => [0b00000, 0b00000, 0b11111, 0b00000, 0b11111, 0b00000, 0b00000],
        '/' => [0b00000, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b00000],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        '\'' => [0b01100, 0b00100, 0b01000, 0b00000, 0b00000, 0b00000, 0b00000],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000, 0b00100],
        _ => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100],
    }
}
