use std::io::Cursor;

use camino::Utf8Path;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader};

use crate::error::HarvestError;

pub const DEFAULT_THUMBNAIL_MAX: u32 = 512;
pub const DEFAULT_JPEG_QUALITY: u8 = 75;
/// Bulk imports trade quality for disk space.
pub const IMPORT_JPEG_QUALITY: u8 = 50;

fn reader(data: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, HarvestError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|err| HarvestError::Image(format!("failed to read image: {err}")))
}

/// Width and height, read from the header without decoding pixels.
pub fn dimensions(data: &[u8]) -> Result<(u32, u32), HarvestError> {
    reader(data)?
        .into_dimensions()
        .map_err(|err| HarvestError::Image(format!("failed to read dimensions: {err}")))
}

/// Whether the image stored at `path` already fits in `max`×`max`. Only the
/// header is read.
pub fn file_fits_within(path: &Utf8Path, max: u32) -> Result<bool, HarvestError> {
    let (width, height) = ImageReader::open(path.as_std_path())
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|err| HarvestError::Image(format!("{path}: {err}")))?
        .into_dimensions()
        .map_err(|err| HarvestError::Image(format!("{path}: {err}")))?;
    Ok(width <= max && height <= max)
}

/// Decodes `data` and re-encodes it as JPEG at `quality` (1-100) scaled to fit
/// in `max`×`max`, keeping the aspect ratio. Images already within bounds are
/// not upscaled.
pub fn thumbnail(data: &[u8], max: u32, quality: u8) -> Result<Vec<u8>, HarvestError> {
    let max = max.max(1);
    let img = reader(data)?
        .decode()
        .map_err(|err| HarvestError::Image(format!("failed to decode image: {err}")))?;

    let img = if img.width() > max || img.height() > max {
        img.thumbnail(max, max)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
        .map_err(|err| HarvestError::Image(format!("failed to encode thumbnail: {err}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 128]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn large_image_is_scaled_to_fit() {
        let out = thumbnail(&png(1024, 512), 512, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(dimensions(&out).unwrap(), (512, 256));
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn small_image_is_not_upscaled() {
        let out = thumbnail(&png(40, 30), 512, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(dimensions(&out).unwrap(), (40, 30));
    }

    #[test]
    fn file_bounds_come_from_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let wide = root.join("wide.jpg");
        let small = root.join("small.jpg");
        let broken = root.join("broken.jpg");
        std::fs::write(wide.as_std_path(), png(600, 10)).unwrap();
        std::fs::write(small.as_std_path(), png(40, 30)).unwrap();
        std::fs::write(broken.as_std_path(), b"\xff\xd8\xff").unwrap();

        assert!(!file_fits_within(&wide, 512).unwrap());
        assert!(file_fits_within(&small, 512).unwrap());
        assert_matches!(file_fits_within(&broken, 512), Err(HarvestError::Image(_)));
        assert_matches!(
            file_fits_within(&root.join("missing.jpg"), 512),
            Err(HarvestError::Image(_))
        );
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert_matches!(
            thumbnail(b"not an image", 512, DEFAULT_JPEG_QUALITY),
            Err(HarvestError::Image(_))
        );
    }

    #[test]
    fn lower_quality_is_smaller() {
        let img = RgbImage::from_fn(256, 256, |x, y| {
            Rgb([(x * 7 + y * 13) as u8, (x * y) as u8, (x ^ y) as u8])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        let data = buf.into_inner();

        let low = thumbnail(&data, 512, IMPORT_JPEG_QUALITY).unwrap();
        let high = thumbnail(&data, 512, 95).unwrap();
        assert!(low.len() < high.len());
    }
}
