//! Cover art normalization and the on-disk cover cache.
//!
//! Every cover is made square, resized to [`COVER_SIZE`] and re-encoded as
//! PNG before it is cached or embedded, so the cached digest is the same
//! regardless of where the image came from.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};

use crate::error::{Error, Result, ResultExt};
use crate::health::hash_bytes;
use crate::model::CoverMode;
use crate::organizer::sanitize_filename;

/// Edge length of normalized covers in pixels.
pub const COVER_SIZE: u32 = 640;

/// Decode `bytes`, make the image square according to `mode`, and return PNG bytes.
pub fn normalize(bytes: &[u8], mode: CoverMode) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::validation(format!("cover image could not be decoded: {e}")))?;

    let square = match mode {
        CoverMode::Crop => {
            let (w, h) = img.dimensions();
            let side = w.min(h);
            img.crop_imm((w - side) / 2, (h - side) / 2, side, side)
                .resize_exact(COVER_SIZE, COVER_SIZE, FilterType::Lanczos3)
        }
        CoverMode::Stretch => img.resize_exact(COVER_SIZE, COVER_SIZE, FilterType::Lanczos3),
        CoverMode::Extend => extend(&img),
    };

    let mut out = Cursor::new(Vec::new());
    square
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| Error::validation(format!("cover image could not be encoded: {e}")))?;
    Ok(out.into_inner())
}

/// Fit inside the square and pad with the most vibrant colour.
fn extend(img: &DynamicImage) -> DynamicImage {
    let fill = vibrant_colour(img);
    let fitted = img.resize(COVER_SIZE, COVER_SIZE, FilterType::Lanczos3).into_rgba8();

    let mut canvas = RgbaImage::from_pixel(COVER_SIZE, COVER_SIZE, fill);
    let x = i64::from((COVER_SIZE - fitted.width()) / 2);
    let y = i64::from((COVER_SIZE - fitted.height()) / 2);
    imageops::overlay(&mut canvas, &fitted, x, y);
    DynamicImage::ImageRgba8(canvas)
}

/// Pixel with the highest saturation * brightness, sampled from a thumbnail of large images.
fn vibrant_colour(img: &DynamicImage) -> Rgba<u8> {
    let sample = if img.width() > 64 || img.height() > 64 {
        img.thumbnail(64, 64).into_rgba8()
    } else {
        img.to_rgba8()
    };
    sample
        .pixels()
        .max_by_key(|p| {
            let max = u32::from(p[0].max(p[1]).max(p[2]));
            let min = u32::from(p[0].min(p[1]).min(p[2]));
            // saturation * value, both scaled to 0..=255
            if max == 0 { 0 } else { (max - min) * 255 / max * max }
        })
        .map(|p| Rgba([p[0], p[1], p[2], 255]))
        .unwrap_or(Rgba([0, 0, 0, 255]))
}

/// Directory of normalized covers, one PNG per item.
pub struct CoverCache {
    cache_dir: PathBuf,
}

impl CoverCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache file of an item: its id with `:` replaced by `_`, sanitized, as PNG.
    ///
    /// Always a direct child of the cache directory.
    pub fn path_for(&self, item_id: &str) -> PathBuf {
        let name = sanitize_filename(&item_id.replace(':', "_"));
        self.cache_dir.join(format!("{name}.png"))
    }

    /// Normalize `bytes` and store them for `item_id`.
    ///
    /// Returns the cache path and the SHA-256 of the stored PNG.
    pub fn store(&self, item_id: &str, bytes: &[u8], mode: CoverMode) -> Result<(PathBuf, String)> {
        let png = normalize(bytes, mode)?;
        fs::create_dir_all(&self.cache_dir)
            .with_context(format!("creating cover cache {}", self.cache_dir.display()))?;

        let path = self.path_for(item_id);
        fs::write(&path, &png).with_context(format!("writing {}", path.display()))?;
        Ok((path, hash_bytes(&png)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mocks::sample_png;
    use tempfile::tempdir;

    fn decode(png: &[u8]) -> DynamicImage {
        image::load_from_memory(png).unwrap()
    }

    #[test]
    fn test_every_mode_yields_square_png() {
        let source = sample_png(8, 4);
        for mode in [CoverMode::Crop, CoverMode::Extend, CoverMode::Stretch] {
            let png = normalize(&source, mode).unwrap();
            assert_eq!(image::guess_format(&png).unwrap(), ImageFormat::Png);
            assert_eq!(decode(&png).dimensions(), (COVER_SIZE, COVER_SIZE), "{mode:?}");
        }
    }

    #[test]
    fn test_extend_pads_with_vibrant_colour() {
        // Grey image with one saturated red pixel
        let mut img = image::RgbImage::from_pixel(20, 10, image::Rgb([120, 120, 120]));
        img.put_pixel(3, 3, image::Rgb([250, 10, 10]));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();

        let vibrant = vibrant_colour(&DynamicImage::ImageRgb8(img));
        assert_eq!(vibrant, Rgba([250, 10, 10, 255]));

        let out = decode(&normalize(bytes.get_ref(), CoverMode::Extend).unwrap()).into_rgba8();
        // Top band is padding
        assert_eq!(*out.get_pixel(0, 0), Rgba([250, 10, 10, 255]));
    }

    #[test]
    fn test_invalid_image() {
        let result = normalize(b"not an image", CoverMode::Crop);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_cache_store() {
        let dir = tempdir().unwrap();
        let cache = CoverCache::new(dir.path().join("covers"));
        assert_eq!(
            cache.path_for("svc:track:abc"),
            dir.path().join("covers/svc_track_abc.png")
        );

        let (path, digest) = cache
            .store("svc:track:abc", &sample_png(4, 4), CoverMode::Crop)
            .unwrap();
        assert!(path.exists());
        assert_eq!(crate::health::hash_file(&path).unwrap(), digest);
    }

    #[test]
    fn test_cache_path_stays_inside_cache_dir() {
        let cache = CoverCache::new("/cache/covers");
        for id in ["svc:track:../../etc/passwd", "svc:track:a/b", "svc:track:..\\x", "svc:track:"] {
            let path = cache.path_for(id);
            assert_eq!(path.parent(), Some(Path::new("/cache/covers")), "{id}");
        }
        assert_eq!(
            cache.path_for("svc:track:../up"),
            PathBuf::from("/cache/covers/svc_track_..up.png")
        );
    }
}
