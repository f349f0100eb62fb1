use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use edgesam_runtime::{Point, Rect};

#[derive(Parser, Debug)]
#[command(name = "edgesam", version, about = "Prompt-driven image segmentation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Segment an image from point and box prompts
    Segment {
        #[command(flatten)]
        models: ModelArgs,

        /// Image to segment
        #[arg(long, short)]
        input: PathBuf,

        /// Overlay output path (default: <input stem>_segmented.png)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Also write the binary mask here
        #[arg(long)]
        mask_output: Option<PathBuf>,

        /// Foreground point as X,Y in source image pixels (repeatable)
        #[arg(long = "point", value_parser = parse_point)]
        points: Vec<Point>,

        /// Background point as X,Y in source image pixels (repeatable)
        #[arg(long = "negative", value_parser = parse_point)]
        negative_points: Vec<Point>,

        /// Region of interest as X,Y,W,H in source image pixels
        #[arg(long = "box", value_parser = parse_rect)]
        roi: Option<Rect>,
    },
    /// Print the tensor contract of both models
    Info {
        #[command(flatten)]
        models: ModelArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Image encoder model
    #[arg(long, default_value = "models/edge_sam_3x_encoder.onnx")]
    pub encoder: PathBuf,

    /// Prompt decoder model
    #[arg(long, default_value = "models/edge_sam_3x_decoder.onnx")]
    pub decoder: PathBuf,

    /// Device for inference (cpu or cuda:N)
    #[arg(long, default_value = "cpu")]
    pub device: String,

    /// CUDA arena limit in MiB
    #[arg(long)]
    pub gpu_mem_limit: Option<usize>,

    /// Intra-op threads (default: available parallelism)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Log level (RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log: String,
}

fn parse_floats<const N: usize>(raw: &str) -> Result<[f32; N], String> {
    let values = raw
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| format!("invalid number {part:?}: {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let count = values.len();
    values
        .try_into()
        .map_err(|_| format!("expected {N} comma-separated values, got {count}"))
}

pub fn parse_point(raw: &str) -> Result<Point, String> {
    let [x, y] = parse_floats::<2>(raw)?;
    Ok(Point::new(x, y))
}

pub fn parse_rect(raw: &str) -> Result<Rect, String> {
    let [x, y, width, height] = parse_floats::<4>(raw)?;
    if width < 0.0 || height < 0.0 {
        return Err(format!("box extent must not be negative: {raw}"));
    }
    Ok(Rect::new(x, y, width, height))
}
