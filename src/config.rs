use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::CaptureRequest;
use crate::features::MfccConfig;
use crate::labels::LabelTable;
use crate::pipeline::PipelineConfig;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,

    // Capture window
    pub duration_secs: f32,
    pub sample_rate: u32,
    pub input_device_id: Option<String>,

    // Features
    pub n_coeffs: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,

    // Model
    pub model_path: Option<PathBuf>,
    pub n_threads: usize,
    /// Class names in model output order
    pub labels: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mfcc = MfccConfig::default();
        Self {
            schema_version: 1,
            duration_secs: 5.0,
            sample_rate: 44100,
            input_device_id: None,
            n_coeffs: mfcc.n_coeffs,
            n_fft: mfcc.n_fft,
            hop_length: mfcc.hop_length,
            n_mels: mfcc.n_mels,
            model_path: None,
            n_threads: 4,
            labels: LabelTable::default().names().to_vec(),
        }
    }
}

impl Config {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .context("Failed to read config file")?;
            serde_json::from_str(&content)
                .context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, content)
            .context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Failed to get home directory")?;
        Ok(home.join(".emotionapp"))
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.json"))
    }

    /// Get the default models directory
    pub fn default_models_dir() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("models"))
    }

    /// Get the model file path
    pub fn get_model_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.model_path {
            Ok(path.clone())
        } else {
            Ok(Self::default_models_dir()?.join("emotion.onnx"))
        }
    }

    /// Check values a run cannot start with
    pub fn validate(&self) -> Result<()> {
        if !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            bail!("duration_secs must be positive, got {}", self.duration_secs);
        }
        if self.sample_rate == 0 {
            bail!("sample_rate must be positive");
        }
        CaptureRequest::new(self.duration_secs, self.sample_rate)
            .validate()
            .context("Invalid capture window")?;
        if self.n_coeffs == 0 {
            bail!("n_coeffs must be at least 1");
        }
        if self.labels.is_empty() {
            bail!("labels must not be empty");
        }
        if let Some(empty) = self.labels.iter().position(|l| l.trim().is_empty()) {
            bail!("label {} is blank", empty);
        }
        self.mfcc_config()
            .validate(self.sample_rate)
            .context("Invalid feature settings")?;
        Ok(())
    }

    pub fn mfcc_config(&self) -> MfccConfig {
        MfccConfig {
            n_coeffs: self.n_coeffs,
            n_fft: self.n_fft,
            hop_length: self.hop_length,
            n_mels: self.n_mels,
            ..MfccConfig::default()
        }
    }

    pub fn label_table(&self) -> LabelTable {
        LabelTable::new(self.labels.clone())
    }

    pub fn pipeline_config(&self, recording_path: Option<PathBuf>) -> PipelineConfig {
        PipelineConfig {
            duration_secs: self.duration_secs,
            sample_rate: self.sample_rate,
            mfcc: self.mfcc_config(),
            recording_path,
        }
    }
}

/// Parse a comma-separated label list such as `Angry,Calm,Happy,Sad`
pub fn parse_labels(list: &str) -> Vec<String> {
    list.split(',')
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
