//! Offline analysis of a WAV recording.
//!
//! Usage: voicepulse-analyze <file.wav> [--config cfg.json] [--no-vad] [--output result.json]

use std::path::PathBuf;

use tracing::{info, warn};
use voicepulse_core::{
    codec::decode_wav, validate_audio_data, AudioProcessor, PipelineConfig, ProcessingResult,
};

#[derive(Debug)]
struct Args {
    input: PathBuf,
    config: Option<PathBuf>,
    no_vad: bool,
    output: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voicepulse=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("analysis failed: {e}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Args, String> {
    let mut input: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;
    let mut no_vad = false;
    let mut output: Option<PathBuf> = None;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --config".into());
                };
                config = Some(PathBuf::from(v));
            }
            "--output" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --output".into());
                };
                output = Some(PathBuf::from(v));
            }
            "--no-vad" => no_vad = true,
            "--help" | "-h" => {
                println!(
                    "Usage: voicepulse-analyze <file.wav> [--config <cfg.json>] [--no-vad] [--output <file.json>]"
                );
                std::process::exit(0);
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown argument: {other}"));
            }
            other => {
                if input.is_some() {
                    return Err(format!("unexpected extra input: {other}"));
                }
                input = Some(PathBuf::from(other));
            }
        }
    }

    let input = input.ok_or_else(|| "missing input WAV file".to_string())?;
    Ok(Args {
        input,
        config,
        no_vad,
        output,
    })
}

fn run() -> Result<(), String> {
    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path).map_err(|e| e.to_string())?,
        None => PipelineConfig::default(),
    };
    if args.no_vad {
        config.processor.enable_vad = false;
    }

    let bytes = std::fs::read(&args.input)
        .map_err(|e| format!("cannot read {}: {e}", args.input.display()))?;
    let chunk = decode_wav(&bytes).map_err(|e| e.to_string())?;
    info!(
        file = %args.input.display(),
        seconds = chunk.duration_secs(),
        sample_rate = chunk.sample_rate,
        "recording loaded"
    );
    if !validate_audio_data(&chunk) {
        warn!("recording is empty or near-silent; features will be degenerate");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;
    let mut processor = AudioProcessor::new(config.processor).map_err(|e| e.to_string())?;
    let result: ProcessingResult = runtime
        .block_on(processor.process(&chunk))
        .map_err(|e| e.to_string())?;

    let json = serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .map_err(|e| format!("cannot write {}: {e}", path.display()))?;
            info!(output = %path.display(), "result written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
