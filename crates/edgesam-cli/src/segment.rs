use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use edgesam_runtime::{Image, Point, PromptSet, Rect, SamSession, Size};
use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use tracing::{info, warn};

/// Background brightness kept in the overlay.
const BACKGROUND_DIM: f32 = 0.2;

pub struct SegmentRequest {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub mask_output: Option<PathBuf>,
    pub prompt: PromptSet,
}

pub fn run(session: &SamSession, request: SegmentRequest) -> Result<()> {
    let source = image::open(&request.input)
        .with_context(|| format!("failed to read image {}", request.input.display()))?
        .to_rgb8();
    let source_size = Size::new(source.width(), source.height());
    let input_size = session.input_size();

    let resized = imageops::resize(
        &source,
        input_size.width,
        input_size.height,
        FilterType::Triangle,
    );
    let image = Image::from_rgb(input_size, resized.into_raw())?;

    let start = Instant::now();
    session.load_image(&image)?;
    info!(
        source = %source_size,
        input = %input_size,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "image embedded"
    );

    let prompt = if request.prompt.is_empty() {
        warn!("no prompt given, segmenting the whole image");
        PromptSet::new().with_box(Rect::new(
            0.0,
            0.0,
            input_size.width as f32,
            input_size.height as f32,
        ))
    } else {
        scale_prompt(&request.prompt, source_size, input_size)
    };

    let start = Instant::now();
    let result = session.get_mask(&prompt)?;
    info!(
        iou = result.iou,
        foreground = result.mask.foreground_count(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "mask decoded"
    );

    let mask = GrayImage::from_raw(input_size.width, input_size.height, result.mask.into_raw())
        .context("mask buffer does not match its size")?;
    let mask = imageops::resize(&mask, source.width(), source.height(), FilterType::Nearest);

    if let Some(path) = &request.mask_output {
        mask.save(path)
            .with_context(|| format!("failed to write mask {}", path.display()))?;
        info!(path = %path.display(), "mask written");
    }

    let output = request
        .output
        .unwrap_or_else(|| default_output(&request.input));
    overlay(&source, &mask)
        .save(&output)
        .with_context(|| format!("failed to write overlay {}", output.display()))?;
    info!(path = %output.display(), "overlay written");

    Ok(())
}

/// Maps prompt coordinates from source image pixels to model input pixels.
pub fn scale_prompt(prompt: &PromptSet, from: Size, to: Size) -> PromptSet {
    let sx = to.width as f32 / from.width as f32;
    let sy = to.height as f32 / from.height as f32;
    let point = |p: &Point| Point::new(p.x * sx, p.y * sy);

    PromptSet {
        points: prompt.points.iter().map(point).collect(),
        negative_points: prompt.negative_points.iter().map(point).collect(),
        roi: prompt
            .roi
            .map(|r| Rect::new(r.x * sx, r.y * sy, r.width * sx, r.height * sy)),
    }
}

/// Keeps foreground pixels and dims everything else.
pub fn overlay(source: &RgbImage, mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(source.width(), source.height(), |x, y| {
        let Rgb(pixel) = *source.get_pixel(x, y);
        if mask.get_pixel(x, y).0[0] > 0 {
            Rgb(pixel)
        } else {
            Rgb(pixel.map(|c| (c as f32 * BACKGROUND_DIM) as u8))
        }
    })
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    input.with_file_name(format!("{stem}_segmented.png"))
}
