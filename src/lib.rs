//! Speech emotion recognition: record a short clip, summarize it as averaged
//! MFCCs, classify it with a pretrained model and name the emotion.

pub mod audio;
pub mod cancel;
pub mod classifier;
pub mod config;
pub mod features;
pub mod labels;
pub mod pipeline;

pub use audio::{AudioSource, CaptureRequest, DeviceError, MicrophoneSource, WavFileSource, Waveform};
pub use cancel::CancelToken;
pub use classifier::{EmotionClassifier, EmotionModel, InferenceError, ModelLoadError, OnnxModel, ProbabilityDistribution};
pub use config::Config;
pub use features::{extract, FeatureExtractionError, FeatureVector, MfccConfig};
pub use labels::{resolve, EmotionLabel, LabelTable, UnknownClassError};
pub use pipeline::{
    spawn_pipeline, Pipeline, PipelineConfig, PipelineError, PipelineHandle, PipelineMessage,
    PipelineStage, PipelineState, PredictionResult, RunOverrides,
};
