//! Shrinks images under the upload budget before they are sent to the model.
//!
//! Files already under budget are copied byte for byte. Larger ones are
//! decoded, re-oriented, flattened to RGB, capped to [`MAX_DIMENSION`] on the
//! longer side and re-encoded as JPEG with a falling quality until they fit
//! or [`MAX_ATTEMPTS`] encodings have been tried.

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader, Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::models::ImageRef;
use crate::session::unique_path;

pub const MAX_DIMENSION: u32 = 2048;
pub const MAX_ATTEMPTS: usize = 5;
pub const QUALITY_STEP: u8 = 15;
pub const QUALITY_FLOOR: u8 = 20;

#[derive(Debug, Clone)]
pub struct CompressOutcome {
    pub image: ImageRef,
    pub reencoded: bool,
    /// Quality of the last encoding, `None` for a pass-through copy.
    pub quality: Option<u8>,
    pub attempts: usize,
    pub within_budget: bool,
}

#[derive(Debug)]
struct Encoded {
    bytes: Vec<u8>,
    quality: u8,
    attempts: usize,
}

/// Qualities tried in order, starting from `start`.
pub fn quality_schedule(start: u8) -> Vec<u8> {
    let mut quality = start;
    let mut schedule = Vec::with_capacity(MAX_ATTEMPTS);
    for _ in 0..MAX_ATTEMPTS {
        schedule.push(quality);
        quality = quality.saturating_sub(QUALITY_STEP).max(QUALITY_FLOOR);
    }
    schedule
}

/// New size when the longer side exceeds `cap`, keeping the aspect ratio.
pub fn target_dimensions(width: u32, height: u32, cap: u32) -> Option<(u32, u32)> {
    if width.max(height) <= cap {
        return None;
    }
    let scale = |short: u32, long: u32| -> u32 {
        ((short as f64 * cap as f64 / long as f64).round() as u32).max(1)
    };
    if width >= height {
        Some((cap, scale(height, width)))
    } else {
        Some((scale(width, height), cap))
    }
}

pub fn flatten_onto_white(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }
    let rgba = img.into_rgba8();
    let (w, h) = rgba.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn decode_oriented(path: &Path) -> anyhow::Result<DynamicImage> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()
        .with_context(|| format!("unsupported image data in {}", path.display()))?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(rgb)?;
    Ok(buf)
}

fn encode_within_budget(rgb: &RgbImage, max_bytes: u64, start_quality: u8) -> anyhow::Result<Encoded> {
    let mut last = None;
    for (idx, quality) in quality_schedule(start_quality).into_iter().enumerate() {
        let bytes = encode_jpeg(rgb, quality)?;
        let fits = bytes.len() as u64 <= max_bytes;
        debug!(quality, size = bytes.len(), "jpeg attempt {}", idx + 1);
        last = Some(Encoded {
            bytes,
            quality,
            attempts: idx + 1,
        });
        if fits {
            break;
        }
    }
    last.context("no encoding attempt was made")
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Stages `source` into `staging_dir`, re-encoding it only when it is larger
/// than `max_bytes`.
pub fn compress(
    source: &Path,
    staging_dir: &Path,
    max_bytes: u64,
    quality: u8,
) -> anyhow::Result<CompressOutcome> {
    let name = source_name(source);
    let initial = fs::metadata(source)
        .with_context(|| format!("cannot stat {}", source.display()))?
        .len();

    if initial <= max_bytes {
        let dest = unique_path(staging_dir, &name);
        fs::copy(source, &dest)
            .with_context(|| format!("cannot copy {} to {}", source.display(), dest.display()))?;
        debug!("{name} copied unchanged ({initial} bytes)");
        return Ok(CompressOutcome {
            image: ImageRef {
                dimensions: image::image_dimensions(&dest).ok(),
                path: dest,
                source_name: name,
                size_bytes: initial,
            },
            reencoded: false,
            quality: None,
            attempts: 0,
            within_budget: true,
        });
    }

    let img = decode_oriented(source)?;
    let mut rgb = flatten_onto_white(img);
    let (w, h) = rgb.dimensions();
    if let Some((nw, nh)) = target_dimensions(w, h, MAX_DIMENSION) {
        rgb = image::imageops::resize(&rgb, nw, nh, FilterType::Lanczos3);
        debug!("{name} resized {w}x{h} -> {nw}x{nh}");
    }

    let encoded = encode_within_budget(&rgb, max_bytes, quality)?;
    let size = encoded.bytes.len() as u64;
    let within_budget = size <= max_bytes;
    if !within_budget {
        warn!(
            "{name} still {size} bytes after {} attempts (budget {max_bytes})",
            encoded.attempts
        );
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".into());
    let dest = unique_path(staging_dir, &format!("{stem}.jpg"));
    fs::write(&dest, &encoded.bytes)
        .with_context(|| format!("cannot write {}", dest.display()))?;

    let reduction = 100.0 * (initial.saturating_sub(size)) as f64 / initial as f64;
    debug!(
        "{name}: {initial} -> {size} bytes ({reduction:.1}% smaller) at quality {}",
        encoded.quality
    );

    Ok(CompressOutcome {
        image: ImageRef {
            path: dest,
            source_name: name,
            size_bytes: size,
            dimensions: Some(rgb.dimensions()),
        },
        reencoded: true,
        quality: Some(encoded.quality),
        attempts: encoded.attempts,
        within_budget,
    })
}

/// Compresses every source, logging and skipping the ones that fail.
///
/// Each image is encoded on the blocking pool, so dropping the returned future
/// stops the loop before the next image starts.
pub async fn compress_all(
    sources: &[PathBuf],
    staging_dir: &Path,
    max_bytes: u64,
    quality: u8,
) -> Vec<ImageRef> {
    info!("preparing {} images", sources.len());
    let mut staged = Vec::with_capacity(sources.len());
    for (idx, source) in sources.iter().enumerate() {
        info!(
            "image {}/{}: {}",
            idx + 1,
            sources.len(),
            source_name(source)
        );
        let (path, dir) = (source.clone(), staging_dir.to_path_buf());
        let task =
            tokio::task::spawn_blocking(move || compress(&path, &dir, max_bytes, quality));
        match task.await {
            Ok(Ok(outcome)) => staged.push(outcome.image),
            Ok(Err(e)) => error!("failed to prepare {}: {e:#}", source.display()),
            Err(e) => error!("compression of {} did not finish: {e}", source.display()),
        }
    }
    info!("{} images prepared", staged.len());
    staged
}

fn decodable_here(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg" | "png" | "webp")
    )
}

fn check_readable(image: &ImageRef) -> anyhow::Result<()> {
    let len = fs::metadata(&image.path)?.len();
    anyhow::ensure!(len > 0, "empty file");
    if decodable_here(&image.path) {
        ImageReader::open(&image.path)?
            .with_guessed_format()?
            .into_dimensions()?;
    }
    Ok(())
}

/// Drops staged files that cannot be read back. Files over budget are kept.
pub fn validate_staged(images: Vec<ImageRef>, max_bytes: u64) -> Vec<ImageRef> {
    let total = images.len();
    let valid: Vec<ImageRef> = images
        .into_iter()
        .filter(|image| {
            if let Err(e) = check_readable(image) {
                error!("dropping invalid image {}: {e}", image.source_name);
                return false;
            }
            if image.size_bytes > max_bytes {
                warn!(
                    "{} is over budget ({} bytes), sending anyway",
                    image.source_name, image.size_bytes
                );
            }
            true
        })
        .collect();
    info!("{}/{} images validated", valid.len(), total);
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn noisy(w: u32, h: u32) -> RgbImage {
        let mut state: u32 = 0x1234_5678;
        RgbImage::from_fn(w, h, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            Rgb([r, g, b])
        })
    }

    #[test]
    fn schedule_steps_down_to_floor() {
        assert_eq!(quality_schedule(85), vec![85, 70, 55, 40, 25]);
        assert_eq!(quality_schedule(40), vec![40, 25, 20, 20, 20]);
    }

    #[test]
    fn dimensions_keep_aspect_ratio() {
        assert_eq!(target_dimensions(1000, 800, 2048), None);
        assert_eq!(target_dimensions(4096, 3000, 2048), Some((2048, 1500)));
        assert_eq!(target_dimensions(3000, 4097, 2048), Some((1500, 2048)));
        assert_eq!(target_dimensions(4000, 3001, 2048), Some((2048, 1537)));
        assert_eq!(target_dimensions(100_000, 1, 2048), Some((2048, 1)));
    }

    #[test]
    fn transparency_becomes_white() {
        let mut rgba = RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([10, 20, 30, 255]));
        let rgb = flatten_onto_white(DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(rgb.get_pixel(1, 0).0, [10, 20, 30]);
    }

    #[test]
    fn small_files_are_copied_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir(&staging).unwrap();
        let src = dir.path().join("shelf.png");
        noisy(16, 16).save(&src).unwrap();

        let outcome = compress(&src, &staging, 10 * 1024 * 1024, 85).unwrap();
        assert!(!outcome.reencoded);
        assert!(outcome.within_budget);
        assert_eq!(outcome.image.source_name, "shelf.png");
        assert_eq!(outcome.image.dimensions, Some((16, 16)));
        assert_eq!(fs::read(&src).unwrap(), fs::read(&outcome.image.path).unwrap());
    }

    #[test]
    fn large_files_are_reencoded_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir(&staging).unwrap();
        let src = dir.path().join("big.png");
        noisy(400, 300).save(&src).unwrap();
        let original = fs::metadata(&src).unwrap().len();
        let budget = original / 2;

        let outcome = compress(&src, &staging, budget, 85).unwrap();
        assert!(outcome.reencoded);
        assert!(outcome.within_budget);
        assert!(outcome.image.size_bytes <= budget);
        assert_eq!(outcome.image.path.extension().unwrap(), "jpg");
        assert_eq!(outcome.image.dimensions, Some((400, 300)));
        assert!(outcome.attempts >= 1 && outcome.attempts <= MAX_ATTEMPTS);
    }

    #[test]
    fn impossible_budget_still_emits_last_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir(&staging).unwrap();
        let src = dir.path().join("huge.png");
        noisy(300, 300).save(&src).unwrap();

        let outcome = compress(&src, &staging, 64, 85).unwrap();
        assert!(outcome.reencoded);
        assert!(!outcome.within_budget);
        assert_eq!(outcome.attempts, MAX_ATTEMPTS);
        assert_eq!(outcome.quality, Some(25));
        assert!(outcome.image.path.exists());
    }

    #[test]
    fn oversized_images_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir(&staging).unwrap();
        let src = dir.path().join("wide.png");
        noisy(2100, 50).save(&src).unwrap();

        let outcome = compress(&src, &staging, 1, 85).unwrap();
        assert_eq!(outcome.image.dimensions, Some((2048, 49)));
    }

    #[tokio::test]
    async fn failures_are_skipped_and_unreadable_files_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir(&staging).unwrap();
        let good = dir.path().join("good.png");
        noisy(8, 8).save(&good).unwrap();
        let corrupt = dir.path().join("corrupt.jpg");
        fs::write(&corrupt, vec![7u8; 4096]).unwrap();
        let missing = dir.path().join("missing.jpg");

        // corrupt.jpg fits the budget so it is staged as-is, then rejected.
        let staged = compress_all(&[good, corrupt, missing], &staging, 1024 * 1024, 85).await;
        assert_eq!(staged.len(), 2);
        let valid = validate_staged(staged, 1024 * 1024);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].source_name, "good.png");
    }

    #[tokio::test]
    async fn batch_compression_can_be_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir(&staging).unwrap();
        let sources: Vec<PathBuf> = (0..2)
            .map(|i| {
                let path = dir.path().join(format!("big_{i}.png"));
                noisy(512, 512).save(&path).unwrap();
                path
            })
            .collect();

        let pending = tokio::time::timeout(
            std::time::Duration::ZERO,
            compress_all(&sources, &staging, 10 * 1024, 85),
        )
        .await;
        assert!(pending.is_err(), "compression ran to completion on the first poll");
    }
}
