//! Pure image post-processing: cropping, grid composition, placeholders and
//! JPEG encoding. Nothing here touches hardware.

use crate::error::ImagingError;
use crate::overlay;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, GenericImage, Rgb, RgbImage};
use std::borrow::Cow;
use tracing::{error, warn};

/// Size of the placeholder substituted for a failed capture.
pub const PLACEHOLDER_SIZE: (u32, u32) = (640, 480);

/// Size of the placeholder returned when grid composition fails.
pub const GRID_FALLBACK_SIZE: (u32, u32) = (1280, 960);

/// Text colour of placeholder messages.
pub const ERROR_TEXT_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);

/// Number of tiles in a grid composite.
pub const GRID_TILES: usize = 4;

const TEXT_MARGIN: u32 = 20;
const TEXT_SCALE: u32 = 2;
const LINE_HEIGHT: u32 = 18;

/// Cut a centered `width` x `height` window out of `image`.
///
/// When the target is not strictly smaller than the source in both axes the
/// source is returned unchanged.
#[must_use]
pub fn center_crop(image: RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_width, src_height) = image.dimensions();
    if width == 0 || height == 0 || width >= src_width || height >= src_height {
        return image;
    }

    let left = (src_width - width) / 2;
    let top = (src_height - height) / 2;
    imageops::crop_imm(&image, left, top, width, height).to_image()
}

/// Compose exactly four images into a 2x2 grid.
///
/// Inputs are converted to RGB and resized to the first image's dimensions,
/// then placed top-left, top-right, bottom-left, bottom-right. A drawing
/// failure yields a fallback placeholder describing it.
pub fn create_grid_composite(images: &[DynamicImage]) -> Result<RgbImage, ImagingError> {
    let tiles: Vec<Cow<'_, RgbImage>> = images
        .iter()
        .map(|image| {
            image
                .as_rgb8()
                .map_or_else(|| Cow::Owned(image.to_rgb8()), Cow::Borrowed)
        })
        .collect();
    compose_grid(&tiles)
}

/// [`create_grid_composite`] over images already in RGB.
pub fn compose_grid(tiles: &[Cow<'_, RgbImage>]) -> Result<RgbImage, ImagingError> {
    if tiles.len() != GRID_TILES {
        return Err(ImagingError::InvalidInput(format!(
            "grid needs exactly {GRID_TILES} images, got {}",
            tiles.len()
        )));
    }
    let (width, height) = tiles.first().map_or((0, 0), |tile| tile.dimensions());
    if width == 0 || height == 0 {
        return Err(ImagingError::InvalidInput("first image is empty".to_owned()));
    }

    match paste_tiles(tiles, width, height) {
        Ok(grid) => Ok(grid),
        Err(err) => {
            error!(%err, "grid composition failed");
            Ok(placeholder(GRID_FALLBACK_SIZE, &format!("GRID ERROR: {err}")))
        }
    }
}

fn paste_tiles(
    tiles: &[Cow<'_, RgbImage>],
    width: u32,
    height: u32,
) -> Result<RgbImage, ImagingError> {
    let grid_width = width
        .checked_mul(2)
        .ok_or_else(|| ImagingError::InvalidInput("grid width overflows".to_owned()))?;
    let grid_height = height
        .checked_mul(2)
        .ok_or_else(|| ImagingError::InvalidInput("grid height overflows".to_owned()))?;
    let mut grid = RgbImage::new(grid_width, grid_height);

    let offsets = [(0, 0), (width, 0), (0, height), (width, height)];
    for (index, (tile, (x, y))) in tiles.iter().zip(offsets).enumerate() {
        let resized;
        let tile: &RgbImage = if tile.dimensions() == (width, height) {
            &**tile
        } else {
            warn!(
                index,
                from = format_args!("{}x{}", tile.width(), tile.height()),
                to = format_args!("{width}x{height}"),
                "resizing grid tile"
            );
            resized = imageops::resize(&**tile, width, height, FilterType::Triangle);
            &resized
        };
        grid.copy_from(tile, x, y)?;
    }
    Ok(grid)
}

/// Black 640x480 frame carrying `CAPTURE ERROR: <message>` in red.
#[must_use]
pub fn error_image(message: &str) -> RgbImage {
    placeholder(PLACEHOLDER_SIZE, &format!("CAPTURE ERROR: {message}"))
}

fn placeholder((width, height): (u32, u32), text: &str) -> RgbImage {
    let mut image = RgbImage::new(width, height);

    let advance = overlay::text_width("M", TEXT_SCALE).max(1);
    let per_line = usize::try_from((width.saturating_sub(2 * TEXT_MARGIN) / advance).max(1))
        .unwrap_or(usize::MAX);
    let chars: Vec<char> = text.chars().collect();

    let mut y = height / 2;
    for line in chars.chunks(per_line) {
        if y >= height {
            break;
        }
        let line: String = line.iter().collect();
        let drawn =
            overlay::draw_text(&mut image, TEXT_MARGIN, y, &line, ERROR_TEXT_COLOUR, TEXT_SCALE);
        if let Err(err) = drawn {
            warn!(%err, "placeholder text skipped");
            break;
        }
        y += LINE_HEIGHT;
    }
    image
}

/// Encode `image` as a baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImagingError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    const COLOURS: [[u8; 3]; 4] = [[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 0]];

    fn solid(width: u32, height: u32, colour: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(colour))
    }

    fn tiles(width: u32, height: u32) -> Vec<DynamicImage> {
        COLOURS
            .iter()
            .map(|&c| DynamicImage::ImageRgb8(solid(width, height, c)))
            .collect()
    }

    #[test]
    fn test_grid_places_quadrants() {
        let grid = create_grid_composite(&tiles(40, 30)).expect("grid failed");

        assert_eq!(grid.dimensions(), (80, 60));
        assert_eq!(grid.get_pixel(0, 0).0, COLOURS[0]);
        assert_eq!(grid.get_pixel(40, 0).0, COLOURS[1]);
        assert_eq!(grid.get_pixel(0, 30).0, COLOURS[2]);
        assert_eq!(grid.get_pixel(40, 30).0, COLOURS[3]);
        assert_eq!(grid.get_pixel(39, 29).0, COLOURS[0]);
        assert_eq!(grid.get_pixel(79, 59).0, COLOURS[3]);
    }

    #[test]
    fn test_grid_requires_four_images() {
        let mut images = tiles(8, 8);
        images.pop();
        assert!(matches!(
            create_grid_composite(&images),
            Err(ImagingError::InvalidInput(_))
        ));

        images.extend(tiles(8, 8));
        assert!(matches!(
            create_grid_composite(&images),
            Err(ImagingError::InvalidInput(_))
        ));
        assert!(create_grid_composite(&[]).is_err());
    }

    #[test]
    fn test_grid_resizes_to_first_image() {
        let mut images = tiles(20, 10);
        images[3] = DynamicImage::ImageRgb8(solid(60, 40, COLOURS[3]));

        let grid = create_grid_composite(&images).expect("grid failed");
        assert_eq!(grid.dimensions(), (40, 20));
        assert_eq!(grid.get_pixel(30, 15).0, COLOURS[3]);
    }

    #[test]
    fn test_grid_normalizes_colour_model() {
        let mut images = tiles(10, 10);
        let rgba = RgbaImage::from_pixel(10, 10, image::Rgba([0, 255, 0, 7]));
        images[1] = DynamicImage::ImageRgba8(rgba);

        let grid = create_grid_composite(&images).expect("grid failed");
        assert_eq!(grid.get_pixel(15, 5).0, COLOURS[1]);
    }

    #[test]
    fn test_crop_larger_target_is_noop() {
        let source = solid(100, 80, [1, 2, 3]);
        assert_eq!(center_crop(source.clone(), 100, 50), source);
        assert_eq!(center_crop(source.clone(), 50, 200), source);
        assert_eq!(center_crop(source.clone(), 0, 10), source);
    }

    #[test]
    fn test_crop_is_centered() {
        let mut source = solid(10, 8, [0, 0, 0]);
        source.put_pixel(3, 2, Rgb([9, 9, 9]));
        source.put_pixel(6, 5, Rgb([7, 7, 7]));

        let cropped = center_crop(source, 4, 4);
        assert_eq!(cropped.dimensions(), (4, 4));
        assert_eq!(cropped.get_pixel(0, 0).0, [9, 9, 9]);
        assert_eq!(cropped.get_pixel(3, 3).0, [7, 7, 7]);
    }

    #[test]
    fn test_error_image_has_red_text() {
        let image = error_image("sensor timeout");

        assert_eq!(image.dimensions(), PLACEHOLDER_SIZE);
        assert!(image.pixels().any(|p| *p == ERROR_TEXT_COLOUR));
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_long_error_message_wraps() {
        let message = "x".repeat(500);
        let image = error_image(&message);
        assert_eq!(image.dimensions(), PLACEHOLDER_SIZE);
    }

    #[test]
    fn test_encode_jpeg() {
        let jpeg = encode_jpeg(&solid(16, 16, [200, 10, 10]), 90).expect("encode failed");
        assert_eq!(jpeg.get(..2), Some(&[0xFF, 0xD8][..]));

        let decoded = image::load_from_memory(&jpeg).expect("decode failed");
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }
}
