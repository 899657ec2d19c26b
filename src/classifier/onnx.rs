//! ONNX Runtime backed emotion model.
//!
//! The model takes a `(1, n_coeffs, 1)` f32 tensor of mean MFCCs and returns
//! one score per emotion class.

use std::path::Path;

#[cfg(feature = "onnx")]
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
#[cfg(feature = "onnx")]
use std::sync::Mutex;

use super::{EmotionModel, InferenceError, InputTensor, ModelLoadError};

/// Emotion model backed by an ONNX Runtime session
#[cfg(feature = "onnx")]
pub struct OnnxModel {
    session: Mutex<Session>,
    input_shape: [usize; 3],
    num_classes: usize,
}

#[cfg(feature = "onnx")]
impl OnnxModel {
    /// Load a model and check it accepts `(1, n_coeffs, 1)` input.
    ///
    /// A zero tensor is pushed through the session once; models that reject
    /// the shape or return no scores fail with `IncompatibleShape`. The probe
    /// also fixes the number of classes.
    pub fn load(model_path: &Path, n_coeffs: usize, n_threads: usize) -> Result<Self, ModelLoadError> {
        if !model_path.exists() {
            return Err(ModelLoadError::NotFound(model_path.to_path_buf()));
        }
        if n_coeffs == 0 {
            return Err(ModelLoadError::IncompatibleShape(
                "n_coeffs must be at least 1".to_string(),
            ));
        }

        let mut session = Session::builder()
            .map_err(|e: ort::Error| ModelLoadError::Runtime(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e: ort::Error| ModelLoadError::Runtime(e.to_string()))?
            .with_intra_threads(n_threads.max(1))
            .map_err(|e: ort::Error| ModelLoadError::Runtime(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e: ort::Error| ModelLoadError::Runtime(e.to_string()))?;

        let input_shape = [1, n_coeffs, 1];
        let probe = run_session(&mut session, &InputTensor::zeros(input_shape))
            .map_err(|e| ModelLoadError::IncompatibleShape(e.to_string()))?;
        if probe.is_empty() {
            return Err(ModelLoadError::IncompatibleShape(
                "model produced no output scores".to_string(),
            ));
        }

        tracing::info!(
            "Emotion model loaded from {:?}: input {:?}, {} classes",
            model_path,
            input_shape,
            probe.len()
        );

        Ok(Self {
            session: Mutex::new(session),
            input_shape,
            num_classes: probe.len(),
        })
    }
}

/// Run one forward pass and flatten the first output tensor
#[cfg(feature = "onnx")]
fn run_session(session: &mut Session, input: &InputTensor) -> Result<Vec<f32>, InferenceError> {
    let input_tensor = Value::from_array((input.shape(), input.data().to_vec()))
        .map_err(|e: ort::Error| InferenceError::Runtime(e.to_string()))?;

    let outputs = session
        .run(ort::inputs![input_tensor])
        .map_err(|e: ort::Error| InferenceError::Runtime(e.to_string()))?;

    // Output is [batch, num_classes] = [1, N]
    let output = outputs
        .iter()
        .next()
        .ok_or_else(|| InferenceError::Runtime("No output from model".to_string()))?;

    let tensor = output
        .1
        .try_extract_tensor::<f32>()
        .map_err(|e: ort::Error| InferenceError::Runtime(e.to_string()))?;

    Ok(tensor.1.to_vec())
}

#[cfg(feature = "onnx")]
impl EmotionModel for OnnxModel {
    fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, input: &InputTensor) -> Result<Vec<f32>, InferenceError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Runtime("model session lock poisoned".to_string()))?;
        run_session(&mut session, input)
    }
}

// Stub implementation when feature is not enabled
#[cfg(not(feature = "onnx"))]
pub struct OnnxModel;

#[cfg(not(feature = "onnx"))]
impl OnnxModel {
    pub fn load(_model_path: &Path, _n_coeffs: usize, _n_threads: usize) -> Result<Self, ModelLoadError> {
        Err(ModelLoadError::FeatureNotEnabled)
    }
}

#[cfg(not(feature = "onnx"))]
impl EmotionModel for OnnxModel {
    fn input_shape(&self) -> [usize; 3] {
        [1, 0, 1]
    }

    fn num_classes(&self) -> usize {
        0
    }

    fn predict(&self, _input: &InputTensor) -> Result<Vec<f32>, InferenceError> {
        Err(InferenceError::Runtime("ONNX support not compiled in".to_string()))
    }
}
