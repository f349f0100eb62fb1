mod cli;
mod segment;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, ModelArgs};
use edgesam_backend_ort::OrtBackend;
use edgesam_core::{Device, ModelSpec};
use edgesam_runtime::{PromptSet, SamSession, SessionConfig, Stage};
use tracing_subscriber::EnvFilter;

use segment::SegmentRequest;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Segment {
            models,
            input,
            output,
            mask_output,
            points,
            negative_points,
            roi,
        } => {
            init_tracing(&models.log);
            let session = open_session(&models)?;
            let request = SegmentRequest {
                input,
                output,
                mask_output,
                prompt: PromptSet {
                    points,
                    negative_points,
                    roi,
                },
            };
            segment::run(&session, request)
        }
        Command::Info { models } => {
            init_tracing(&models.log);
            let session = open_session(&models)?;
            print_contract(&session);
            Ok(())
        }
    }
}

fn init_tracing(log: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn session_config(models: &ModelArgs) -> Result<SessionConfig> {
    let device = models
        .device
        .parse::<Device>()?
        .with_memory_limit(models.gpu_mem_limit.map(|mib| mib << 20));
    let threads = match models.threads {
        Some(threads) => threads,
        None => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    };

    let config = SessionConfig::new(&models.encoder, &models.decoder, threads)
        .with_device(Stage::Encoder, device.clone())
        .with_device(Stage::Decoder, device);
    Ok(config)
}

fn open_session(models: &ModelArgs) -> Result<SamSession> {
    let config = session_config(models)?;
    SamSession::load(&OrtBackend::new(), &config).context("failed to load the segmentation models")
}

fn print_contract(session: &SamSession) {
    let contract = session.contract();
    println!("input size: {}", session.input_size());
    print_spec("encoder", &contract.encoder.spec);
    print_spec("decoder", &contract.decoder.spec);
    println!("quality score output: {}", contract.decoder.scores);
}

fn print_spec(stage: &str, spec: &ModelSpec) {
    println!("{stage}:");
    for input in &spec.inputs {
        println!("  in  {input}");
    }
    for output in &spec.outputs {
        println!("  out {output}");
    }
}
