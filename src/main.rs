use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

use emotion_cli::audio::{list_input_devices, AudioSource, MicrophoneSource, WavFileSource};
use emotion_cli::config::{parse_labels, Config};
use emotion_cli::{
    spawn_pipeline, OnnxModel, Pipeline, PipelineMessage, PipelineStage, PredictionResult,
    RunOverrides,
};

/// Headless CLI that records a short clip and predicts the speaker's emotion
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the emotion model file (.onnx)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Path to the config file (defaults to ~/.emotionapp/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recording length in seconds
    #[arg(long)]
    duration: Option<f32>,

    /// Capture sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Number of MFCCs the model expects
    #[arg(long)]
    n_coeffs: Option<usize>,

    /// Input device ID (use "default" or run with --list-devices)
    #[arg(short, long)]
    device: Option<String>,

    /// Classify a WAV file instead of recording from the microphone
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Save the analysed clip as a WAV file
    #[arg(long)]
    save_recording: Option<PathBuf>,

    /// Class names in model output order, e.g. "Angry,Calm,Happy,Sad"
    #[arg(long)]
    labels: Option<String>,

    /// Number of threads for model inference
    #[arg(long)]
    threads: Option<usize>,

    /// Print the prediction as JSON
    #[arg(long)]
    json: bool,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(ref path) = self.model {
            config.model_path = Some(path.clone());
        }
        if let Some(duration) = self.duration {
            config.duration_secs = duration;
        }
        if let Some(sample_rate) = self.sample_rate {
            config.sample_rate = sample_rate;
        }
        if let Some(n_coeffs) = self.n_coeffs {
            config.n_coeffs = n_coeffs;
        }
        if let Some(ref device) = self.device {
            config.input_device_id = (device != "default").then(|| device.clone());
        }
        if let Some(ref labels) = self.labels {
            config.labels = parse_labels(labels);
        }
        if let Some(threads) = self.threads {
            config.n_threads = threads;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Handle --list-devices
    if args.list_devices {
        return list_devices_and_exit();
    }

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load(&config_path)?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    debug!("Config: {:?}", config);

    let model_path = config.get_model_path()?;

    info!("Emotion CLI starting...");
    info!("Model: {:?}", model_path);
    info!("Labels: {}", config.labels.join(", "));

    // Check if model exists
    if !model_path.exists() {
        error!("Model file not found: {:?}", model_path);
        eprintln!("\nModel file not found: {:?}", model_path);
        eprintln!("\nExport a trained emotion model to ONNX with input shape (1, {}, 1)", config.n_coeffs);
        eprintln!("and one output score per label ({}).", config.labels.join(", "));
        eprintln!("\nPlace the model file at: {:?}", model_path);
        eprintln!("Or specify a custom path with: --model /path/to/emotion.onnx");
        bail!("model file not found: {}", model_path.display());
    }

    // Load emotion model
    info!("Loading emotion model...");
    let model = OnnxModel::load(&model_path, config.n_coeffs, config.n_threads)?;
    info!("Model loaded successfully");

    let source: Box<dyn AudioSource> = match &args.input {
        Some(path) => Box::new(WavFileSource::new(path.clone())),
        None => Box::new(MicrophoneSource::new(config.input_device_id.clone())),
    };

    let pipeline = Pipeline::new(
        source,
        Arc::new(model),
        config.label_table(),
        config.pipeline_config(args.save_recording.clone()),
    )?;

    let (handle, mut rx) = spawn_pipeline(Arc::new(pipeline), RunOverrides::default())
        .context("Failed to spawn pipeline thread")?;

    // Ctrl+C cancels the run; the worker still reports how it ended
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;

    let mut outcome = None;
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(PipelineMessage::Stage(PipelineStage::Recording)) if args.input.is_none() => {
                    eprintln!(
                        "\nRecording for {:.1}s... Press Ctrl+C to stop.\n",
                        config.duration_secs
                    );
                }
                Some(PipelineMessage::Stage(stage)) => debug!("Stage: {:?}", stage),
                Some(PipelineMessage::Finished(result)) => {
                    outcome = Some(result);
                    break;
                }
                None => break,
            },
            _ = &mut ctrl_c, if !cancel_requested => {
                info!("Received Ctrl+C, stopping...");
                handle.cancel();
                cancel_requested = true;
            }
        }
    }

    handle.join();

    let result = match outcome {
        Some(result) => result?,
        None => bail!("Pipeline exited without a result"),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_prediction(&result, &config.labels);
    }

    info!("Session complete");
    Ok(())
}

fn print_prediction(result: &PredictionResult, labels: &[String]) {
    println!("\nPredicted Emotion: {}", result.label);
    println!("\n--- Class Scores ---");
    for (index, score) in result.distribution.as_slice().iter().enumerate() {
        let name = labels.get(index).map(String::as_str).unwrap_or("?");
        let marker = if index == result.class_index { " <" } else { "" };
        println!("  {:<10} {:>6.1}%{}", name, score * 100.0, marker);
    }
}

fn list_devices_and_exit() -> Result<()> {
    println!("Available input devices:\n");

    match list_input_devices() {
        Ok(devices) => {
            if devices.is_empty() {
                println!("  No input devices found.");
            } else {
                for device in devices {
                    let default_marker = if device.is_default { " (default)" } else { "" };
                    println!("  - {}{}", device.name, default_marker);
                }
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("  Error: {}", e);
        }
    }

    Ok(())
}
