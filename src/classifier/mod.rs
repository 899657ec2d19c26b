//! Emotion classifier: reshapes MFCC features into the model's input tensor,
//! runs a forward pass and returns the class probability distribution.

mod onnx;

pub use onnx::OnnxModel;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::features::FeatureVector;

/// Errors raised while loading the model artifact
#[derive(Debug, Clone, Error)]
pub enum ModelLoadError {
    #[error("Model not found at path: {0}")]
    NotFound(PathBuf),

    #[error("Failed to load model: {0}")]
    Runtime(String),

    #[error("Model is incompatible with the expected tensor shapes: {0}")]
    IncompatibleShape(String),

    #[error("Feature not enabled: ONNX models require the 'onnx' feature")]
    FeatureNotEnabled,
}

/// Errors raised by a forward pass
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("Input shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("Model produced {actual} scores, expected {expected}")]
    OutputMismatch { expected: usize, actual: usize },

    #[error("Model produced a non-finite score at class {0}")]
    NonFiniteOutput(usize),

    #[error("Inference error: {0}")]
    Runtime(String),
}

/// Dense f32 tensor fed to the model
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    shape: [usize; 3],
    data: Vec<f32>,
}

impl InputTensor {
    /// Lay features out as `(batch = 1, steps = n_coeffs, channels = 1)`
    pub fn from_features(features: &FeatureVector) -> Self {
        Self {
            shape: [1, features.len(), 1],
            data: features.as_slice().to_vec(),
        }
    }

    /// Zero tensor of the given shape
    pub fn zeros(shape: [usize; 3]) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.iter().product()],
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// A pretrained emotion model.
///
/// Implementations are loaded once and shared read-only; `predict` must be
/// safe to call from several threads at once.
pub trait EmotionModel: Send + Sync {
    /// Declared input shape, `(1, n_coeffs, 1)`
    fn input_shape(&self) -> [usize; 3];

    /// Number of scores produced per forward pass
    fn num_classes(&self) -> usize;

    /// Run one forward pass
    fn predict(&self, input: &InputTensor) -> Result<Vec<f32>, InferenceError>;
}

/// Per-class scores from one forward pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityDistribution(Vec<f32>);

impl ProbabilityDistribution {
    pub fn new(scores: Vec<f32>) -> Self {
        Self(scores)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn probability(&self, index: usize) -> Option<f32> {
        self.0.get(index).copied()
    }

    /// Index of the highest score; ties go to the lowest index and NaN never wins
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &p) in self.0.iter().enumerate() {
            if p.is_nan() {
                continue;
            }
            match best {
                Some((_, best_p)) if p <= best_p => {}
                _ => best = Some((i, p)),
            }
        }
        best.map(|(i, _)| i)
    }
}

/// Classifier over a shared, read-only model
#[derive(Clone)]
pub struct EmotionClassifier {
    model: Arc<dyn EmotionModel>,
}

impl EmotionClassifier {
    pub fn new(model: Arc<dyn EmotionModel>) -> Self {
        Self { model }
    }

    pub fn input_shape(&self) -> [usize; 3] {
        self.model.input_shape()
    }

    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    /// Classify one feature vector
    pub fn infer(&self, features: &FeatureVector) -> Result<ProbabilityDistribution, InferenceError> {
        let tensor = InputTensor::from_features(features);
        let expected = self.model.input_shape();
        if tensor.shape() != expected {
            return Err(InferenceError::ShapeMismatch {
                expected,
                actual: tensor.shape(),
            });
        }

        let scores = self.model.predict(&tensor)?;

        let num_classes = self.model.num_classes();
        if scores.len() != num_classes {
            return Err(InferenceError::OutputMismatch {
                expected: num_classes,
                actual: scores.len(),
            });
        }
        if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
            return Err(InferenceError::NonFiniteOutput(index));
        }

        debug!("Class scores: {:?}", scores);
        Ok(ProbabilityDistribution::new(scores))
    }
}
