//! Image collaborator: stimulus decoding, screen fitting and transport
//! recompression.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::hal::Drawable;

/// Bilinear
const RESAMPLE_FILTER: FilterType = FilterType::Triangle;

const STIMULUS_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Largest size with the aspect ratio of `width x height` that fits inside
/// `max_width x max_height`. The limiting side is set to its bound and the
/// other side is truncated, never rounded up. Never returns a zero dimension.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width.max(1), height.max(1));
    }
    let (width, height) = (u64::from(width), u64::from(height));
    let (max_width, max_height) = (u64::from(max_width), u64::from(max_height));
    let (w, h) = if max_width * height <= max_height * width {
        (max_width, max_width * height / width)
    } else {
        (max_height * width / height, max_height)
    };
    // Both fit in u32: each is at most one of the u32 bounds
    (w.max(1) as u32, h.max(1) as u32)
}

/// Target size for transport, or `None` when the image already fits.
pub fn transport_dimensions(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    if width.max(height) <= max_dimension {
        return None;
    }
    Some(fit_within(width, height, max_dimension, max_dimension))
}

fn extension_for(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("jpg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::WebP => Some("webp"),
        _ => None,
    }
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let written = match format {
        // JPEG has no alpha channel
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buf, format),
        ImageFormat::WebP => DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut buf, format),
        _ => image.write_to(&mut buf, format),
    };
    written.context(format!("Failed to encode {:?}", format))?;
    Ok(buf.into_inner())
}

/// Downscale encoded image bytes so the longer side is at most
/// `max_dimension`, keeping the source encoding when it is JPEG, PNG or
/// WebP and falling back to PNG otherwise.
///
/// Returns the new bytes and the file extension matching them.
pub fn resize_for_transport(bytes: &[u8], max_dimension: u32) -> Result<(Vec<u8>, &'static str)> {
    let image = image::load_from_memory(bytes).context("Failed to decode image")?;
    let source_format = image::guess_format(bytes).ok();

    let (format, extension) = match source_format.and_then(|f| extension_for(f).map(|e| (f, e))) {
        Some(known) => known,
        None => {
            log::warn!(
                "Unrecognized image format {:?}, re-encoding as PNG",
                source_format
            );
            (ImageFormat::Png, "png")
        }
    };

    match transport_dimensions(image.width(), image.height(), max_dimension) {
        Some((w, h)) => {
            let resized = image.resize_exact(w, h, RESAMPLE_FILTER);
            Ok((encode(&resized, format)?, extension))
        }
        None if source_format == Some(format) => Ok((bytes.to_vec(), extension)),
        None => Ok((encode(&image, format)?, extension)),
    }
}

/// Decode encoded bytes and scale them to fit `target_width x target_height`.
pub fn decode_and_scale(bytes: &[u8], target_width: u32, target_height: u32) -> Result<Drawable> {
    let image = image::load_from_memory(bytes).context("Failed to decode image")?;
    Ok(scale_to_drawable(image, target_width, target_height))
}

/// Load an image file and scale it to fit `target_width x target_height`.
pub fn load_and_scale(path: &Path, target_width: u32, target_height: u32) -> Result<Drawable> {
    let image = image::open(path).context(format!("Failed to load image {:?}", path))?;
    Ok(scale_to_drawable(image, target_width, target_height))
}

fn scale_to_drawable(image: DynamicImage, target_width: u32, target_height: u32) -> Drawable {
    let (w, h) = fit_within(image.width(), image.height(), target_width, target_height);
    let scaled = if (w, h) == (image.width(), image.height()) {
        image
    } else {
        image.resize_exact(w, h, RESAMPLE_FILTER)
    };
    Drawable::new(scaled.to_rgba8())
}

/// Stimulus image files in `dir`, sorted by path.
pub fn scan_image_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    let root = dir
        .to_str()
        .ok_or_else(|| anyhow!("Image directory {:?} is not valid UTF-8", dir))?;
    let root = glob::Pattern::escape(root);

    let mut files = Vec::new();
    for ext in STIMULUS_EXTENSIONS {
        let pattern = format!("{}/*.{}", root, ext);
        let paths = glob::glob(&pattern).context(format!("Invalid glob pattern '{}'", pattern))?;
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => log::warn!("glob error: {}", e),
            }
        }
    }
    files.sort();
    Ok(files)
}

/// A decoded stimulus and the file it came from
#[derive(Debug, Clone)]
pub struct LoadedStimulus {
    pub path: PathBuf,
    pub drawable: Drawable,
}

/// Decode every stimulus in `dir`, scaled for the screen. Files that fail
/// to decode are logged and skipped.
pub fn load_stimulus_set(dir: &Path, screen_width: u32, screen_height: u32) -> Result<Vec<LoadedStimulus>> {
    let paths = scan_image_directory(dir)?;
    let mut stimuli = Vec::with_capacity(paths.len());

    for path in paths {
        match load_and_scale(&path, screen_width, screen_height) {
            Ok(drawable) => stimuli.push(LoadedStimulus { path, drawable }),
            Err(e) => log::warn!("Skipping stimulus: {:#}", e),
        }
    }

    log::info!("Loaded {} stimulus images from {:?}", stimuli.len(), dir);
    Ok(stimuli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 10, 10])));
        encode(&img, format).unwrap()
    }

    #[test]
    fn test_large_image_downscaled_preserving_aspect() {
        let bytes = encoded(1024, 512, ImageFormat::Png);
        let (out, ext) = resize_for_transport(&bytes, 256).unwrap();
        assert_eq!(ext, "png");

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (256, 128));
    }

    #[test]
    fn test_small_image_left_unresized() {
        let bytes = encoded(100, 50, ImageFormat::Png);
        let (out, _) = resize_for_transport(&bytes, 256).unwrap();

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }

    #[test]
    fn test_jpeg_keeps_jpeg_extension() {
        let bytes = encoded(600, 300, ImageFormat::Jpeg);
        let (out, ext) = resize_for_transport(&bytes, 300).unwrap();
        assert_eq!(ext, "jpg");
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_unknown_format_falls_back_to_png() {
        let bytes = encoded(400, 400, ImageFormat::Bmp);
        let (out, ext) = resize_for_transport(&bytes, 200).unwrap();
        assert_eq!(ext, "png");
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_fit_within_scales_up_and_down() {
        assert_eq!(fit_within(400, 200, 1920, 1080), (1920, 960));
        assert_eq!(fit_within(4000, 4000, 1920, 1080), (1080, 1080));
    }

    #[test]
    fn test_fit_within_truncates_short_side() {
        // 335 * 256 / 1000 = 85.76
        assert_eq!(fit_within(1000, 335, 256, 256), (256, 85));
        assert_eq!(fit_within(335, 1000, 256, 256), (85, 256));
        assert_eq!(transport_dimensions(1000, 335, 256), Some((256, 85)));
    }

    #[test]
    fn test_scan_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), encoded(4, 4, ImageFormat::Png)).unwrap();
        std::fs::write(dir.path().join("a.jpg"), encoded(4, 4, ImageFormat::Jpeg)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = scan_image_directory(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);
    }
}
