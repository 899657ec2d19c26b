//! Single-shot emotion pipeline: capture → extract → classify → resolve.
//!
//! A run walks `Idle → Recording → Extracting → Classifying → Resolving → Done`.
//! Any stage failure, or a cancellation noticed between stages, ends the run in
//! `Failed` carrying the error. No stage runs after a failure and nothing is
//! retried.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::{AudioSource, CaptureRequest, DeviceError};
use crate::cancel::CancelToken;
use crate::classifier::{EmotionClassifier, EmotionModel, InferenceError, ProbabilityDistribution};
use crate::features::{FeatureExtractionError, MfccConfig, MfccExtractor};
use crate::labels::{resolve, EmotionLabel, LabelTable, UnknownClassError};

/// Errors that end a pipeline run
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Audio capture failed: {0}")]
    Device(#[from] DeviceError),

    #[error("Feature extraction failed: {0}")]
    FeatureExtraction(#[from] FeatureExtractionError),

    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("Label resolution failed: {0}")]
    UnknownClass(#[from] UnknownClassError),

    #[error("Pipeline run cancelled")]
    Cancelled,
}

/// Pipeline stage without payload, for progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineStage {
    Idle,
    Recording,
    Extracting,
    Classifying,
    Resolving,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// The stage reached when the current one succeeds
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            Self::Idle => Some(Self::Recording),
            Self::Recording => Some(Self::Extracting),
            Self::Extracting => Some(Self::Classifying),
            Self::Classifying => Some(Self::Resolving),
            Self::Resolving => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn can_transition_to(&self, to: PipelineStage) -> bool {
        !self.is_terminal() && (to == Self::Failed || self.next() == Some(to))
    }
}

/// Pipeline state; the terminal states carry the run's outcome
#[derive(Debug, Clone)]
pub enum PipelineState {
    Idle,
    Recording,
    Extracting,
    Classifying,
    Resolving,
    Done(PredictionResult),
    Failed(PipelineError),
}

impl PipelineState {
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::Idle => PipelineStage::Idle,
            Self::Recording => PipelineStage::Recording,
            Self::Extracting => PipelineStage::Extracting,
            Self::Classifying => PipelineStage::Classifying,
            Self::Resolving => PipelineStage::Resolving,
            Self::Done(_) => PipelineStage::Done,
            Self::Failed(_) => PipelineStage::Failed,
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub run_id: Uuid,
    /// Resolved label name
    pub label: String,
    pub class_index: usize,
    /// Score of the winning class
    pub confidence: f32,
    pub distribution: ProbabilityDistribution,
    /// When the capture window started
    pub recorded_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl PredictionResult {
    /// The label as a built-in emotion, when it is one
    pub fn emotion(&self) -> Option<EmotionLabel> {
        self.label.parse().ok()
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub duration_secs: f32,
    pub sample_rate: u32,
    pub mfcc: MfccConfig,
    /// Where to keep a copy of each captured clip
    pub recording_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            duration_secs: 5.0,
            sample_rate: 44100,
            mfcc: MfccConfig::default(),
            recording_path: None,
        }
    }
}

/// Per-run overrides of the capture window and coefficient count
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunOverrides {
    pub duration_secs: Option<f32>,
    pub sample_rate: Option<u32>,
    pub n_coeffs: Option<usize>,
}

impl RunOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Drives the state machine and reports each transition to an observer
struct StateMachine<'a> {
    stage: PipelineStage,
    run_id: Uuid,
    observer: &'a mut dyn FnMut(&PipelineState),
}

impl<'a> StateMachine<'a> {
    fn new(run_id: Uuid, observer: &'a mut dyn FnMut(&PipelineState)) -> Self {
        Self {
            stage: PipelineStage::Idle,
            run_id,
            observer,
        }
    }

    fn enter(&mut self, state: &PipelineState) {
        let next = state.stage();
        debug_assert!(
            self.stage.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.stage,
            next
        );
        debug!(run_id = %self.run_id, "Pipeline {:?} -> {:?}", self.stage, next);
        self.stage = next;
        (self.observer)(state);
    }

    /// Move to the next working stage unless the run was cancelled
    fn advance(&mut self, state: PipelineState, cancel: &CancelToken) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.enter(&state);
        Ok(())
    }

    fn finish(
        mut self,
        outcome: Result<PredictionResult, PipelineError>,
    ) -> Result<PredictionResult, PipelineError> {
        match outcome {
            Ok(result) => {
                self.enter(&PipelineState::Done(result.clone()));
                Ok(result)
            }
            Err(e) => {
                self.enter(&PipelineState::Failed(e.clone()));
                Err(e)
            }
        }
    }
}

/// The emotion recognition pipeline.
///
/// Owns its audio source and shares the loaded model; a `Pipeline` can only
/// exist once a model has been loaded. It is `Send + Sync`, so one instance can
/// serve several runs (see [`spawn_pipeline`]).
pub struct Pipeline {
    source: Box<dyn AudioSource>,
    classifier: EmotionClassifier,
    labels: LabelTable,
    config: PipelineConfig,
    extractor: MfccExtractor,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn AudioSource>,
        model: Arc<dyn EmotionModel>,
        labels: LabelTable,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let extractor = MfccExtractor::new(config.mfcc.clone(), config.sample_rate)?;
        let classifier = EmotionClassifier::new(model);

        if classifier.num_classes() != labels.len() {
            warn!(
                "Label table has {} entries but the model outputs {} classes",
                labels.len(),
                classifier.num_classes()
            );
        }
        if classifier.input_shape() != [1, config.mfcc.n_coeffs, 1] {
            warn!(
                "Model expects input {:?} but features have {} coefficients",
                classifier.input_shape(),
                config.mfcc.n_coeffs
            );
        }

        info!(
            "Pipeline ready: {} via {}, {:.1}s at {} Hz, {} MFCCs",
            labels.names().join("/"),
            source.describe(),
            config.duration_secs,
            config.sample_rate,
            config.mfcc.n_coeffs
        );

        Ok(Self {
            source,
            classifier,
            labels,
            config,
            extractor,
        })
    }

    /// Run once with the configured parameters
    pub fn run(&self, cancel: &CancelToken) -> Result<PredictionResult, PipelineError> {
        self.run_with(&RunOverrides::default(), cancel, &mut |_| {})
    }

    /// Run once, reporting every state transition to `observer`
    pub fn run_with(
        &self,
        overrides: &RunOverrides,
        cancel: &CancelToken,
        observer: &mut dyn FnMut(&PipelineState),
    ) -> Result<PredictionResult, PipelineError> {
        let run_id = Uuid::new_v4();
        let mut machine = StateMachine::new(run_id, observer);
        let outcome = self.execute(run_id, overrides, cancel, &mut machine);

        match &outcome {
            Ok(result) => info!(
                run_id = %run_id,
                "Predicted emotion: {} ({:.0}%) in {}ms",
                result.label,
                result.confidence * 100.0,
                result.elapsed_ms
            ),
            Err(e) => warn!(run_id = %run_id, "Pipeline run failed: {}", e),
        }

        machine.finish(outcome)
    }

    fn execute(
        &self,
        run_id: Uuid,
        overrides: &RunOverrides,
        cancel: &CancelToken,
        machine: &mut StateMachine<'_>,
    ) -> Result<PredictionResult, PipelineError> {
        let started = Instant::now();
        let request = CaptureRequest::new(
            overrides.duration_secs.unwrap_or(self.config.duration_secs),
            overrides.sample_rate.unwrap_or(self.config.sample_rate),
        );
        request.validate()?;

        // Overrides that change the analysis need their own extractor
        let custom_extractor;
        let extractor = match overrides.n_coeffs {
            Some(n) if n != self.config.mfcc.n_coeffs => {
                let mfcc = MfccConfig {
                    n_coeffs: n,
                    ..self.config.mfcc.clone()
                };
                custom_extractor = MfccExtractor::new(mfcc, request.sample_rate)?;
                &custom_extractor
            }
            _ if request.sample_rate != self.extractor.sample_rate() => {
                custom_extractor = MfccExtractor::new(self.config.mfcc.clone(), request.sample_rate)?;
                &custom_extractor
            }
            _ => &self.extractor,
        };

        machine.advance(PipelineState::Recording, cancel)?;
        let recorded_at = Utc::now();
        let waveform = self.source.capture(&request, cancel).map_err(|e| match e {
            DeviceError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Device(other),
        })?;
        debug!(
            "Captured {} samples ({:.2}s, peak {:.3}) in {:?}",
            waveform.len(),
            waveform.duration_secs(),
            waveform.peak(),
            started.elapsed()
        );
        if let Some(path) = &self.config.recording_path {
            match waveform.write_wav(path) {
                Ok(()) => info!("Saved recording to {:?}", path),
                Err(e) => warn!("Failed to save recording: {:#}", e),
            }
        }

        machine.advance(PipelineState::Extracting, cancel)?;
        let stage_start = Instant::now();
        let features = extractor.extract(&waveform)?;
        drop(waveform);
        debug!("Extracted {} MFCCs in {:?}", features.len(), stage_start.elapsed());

        machine.advance(PipelineState::Classifying, cancel)?;
        let stage_start = Instant::now();
        let distribution = self.classifier.infer(&features)?;
        debug!("Inference complete in {:?}", stage_start.elapsed());

        machine.advance(PipelineState::Resolving, cancel)?;
        let (class_index, label) = resolve(&distribution, &self.labels)?;

        Ok(PredictionResult {
            run_id,
            label: label.to_string(),
            class_index,
            confidence: distribution.probability(class_index).unwrap_or(0.0),
            distribution,
            recorded_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Message from a pipeline worker thread
#[derive(Debug)]
pub enum PipelineMessage {
    /// The run entered a new stage
    Stage(PipelineStage),
    /// The run finished; always the last message
    Finished(Result<PredictionResult, PipelineError>),
}

/// Handle to a pipeline run on a worker thread
pub struct PipelineHandle {
    cancel: CancelToken,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PipelineHandle {
    /// Request the run to stop at the next checkpoint
    pub fn cancel(&self) {
        info!("Requesting pipeline cancellation");
        self.cancel.cancel();
    }

    /// Wait for the worker thread to exit
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Pipeline worker thread panicked");
            }
        }
    }
}

/// Run the pipeline on a dedicated worker thread.
///
/// The blocking capture stays off the caller's thread; stage changes and the
/// final result arrive on the returned channel.
pub fn spawn_pipeline(
    pipeline: Arc<Pipeline>,
    overrides: RunOverrides,
) -> std::io::Result<(PipelineHandle, mpsc::Receiver<PipelineMessage>)> {
    let (tx, rx) = mpsc::channel(16);
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();

    let thread = std::thread::Builder::new()
        .name("emotion-pipeline".to_string())
        .spawn(move || {
            let stage_tx = tx.clone();
            let result = pipeline.run_with(&overrides, &worker_cancel, &mut |state| {
                if !state.stage().is_terminal() {
                    let _ = stage_tx.blocking_send(PipelineMessage::Stage(state.stage()));
                }
            });
            let _ = tx.blocking_send(PipelineMessage::Finished(result));
        })?;

    Ok((
        PipelineHandle {
            cancel,
            thread: Some(thread),
        },
        rx,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Waveform;
    use crate::classifier::InputTensor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Test double for the audio device
    struct FakeSource {
        result: Mutex<Option<DeviceError>>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn silent() -> Self {
            Self {
                result: Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(error: DeviceError) -> Self {
            Self {
                result: Mutex::new(Some(error)),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl AudioSource for Arc<FakeSource> {
        fn capture(&self, request: &CaptureRequest, _cancel: &CancelToken) -> Result<Waveform, DeviceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            request.validate()?;
            match self.result.lock().unwrap().clone() {
                Some(error) => Err(error),
                None => Ok(Waveform::silence(request.expected_len(), request.sample_rate)),
            }
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    /// Always outputs the same distribution
    struct StubModel {
        n_coeffs: usize,
        scores: Vec<f32>,
        calls: AtomicUsize,
    }

    impl StubModel {
        fn calm() -> Arc<Self> {
            Arc::new(Self {
                n_coeffs: 13,
                scores: vec![0.1, 0.7, 0.1, 0.1],
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl EmotionModel for StubModel {
        fn input_shape(&self) -> [usize; 3] {
            [1, self.n_coeffs, 1]
        }

        fn num_classes(&self) -> usize {
            self.scores.len()
        }

        fn predict(&self, _input: &InputTensor) -> Result<Vec<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores.clone())
        }
    }

    fn short_config() -> PipelineConfig {
        PipelineConfig {
            duration_secs: 0.5,
            sample_rate: 16000,
            ..PipelineConfig::default()
        }
    }

    fn pipeline(source: Arc<FakeSource>, model: Arc<StubModel>, config: PipelineConfig) -> Pipeline {
        Pipeline::new(Box::new(source), model, LabelTable::default(), config).unwrap()
    }

    fn run_traced(pipeline: &Pipeline, overrides: RunOverrides, cancel: &CancelToken) -> (Result<PredictionResult, PipelineError>, Vec<PipelineStage>) {
        let mut stages = Vec::new();
        let result = pipeline.run_with(&overrides, cancel, &mut |state| stages.push(state.stage()));
        (result, stages)
    }

    #[test]
    fn test_stage_transitions() {
        assert!(PipelineStage::Idle.can_transition_to(PipelineStage::Recording));
        assert!(PipelineStage::Recording.can_transition_to(PipelineStage::Failed));
        assert!(!PipelineStage::Recording.can_transition_to(PipelineStage::Classifying));
        assert!(!PipelineStage::Done.can_transition_to(PipelineStage::Failed));
        assert!(!PipelineStage::Failed.can_transition_to(PipelineStage::Recording));
        assert_eq!(PipelineStage::Resolving.next(), Some(PipelineStage::Done));
    }

    #[test]
    fn test_end_to_end_with_stub_model() {
        let source = Arc::new(FakeSource::silent());
        let model = StubModel::calm();
        let pipeline = pipeline(source.clone(), model.clone(), PipelineConfig::default());

        let (result, stages) = run_traced(&pipeline, RunOverrides::default(), &CancelToken::new());
        let result = result.unwrap();

        assert_eq!(result.label, "Calm");
        assert_eq!(result.class_index, 1);
        assert_eq!(result.emotion(), Some(EmotionLabel::Calm));
        assert!((result.confidence - 0.7).abs() < 1e-6);
        assert_eq!(result.distribution.as_slice(), &[0.1, 0.7, 0.1, 0.1]);
        assert_eq!(
            stages,
            vec![
                PipelineStage::Recording,
                PipelineStage::Extracting,
                PipelineStage::Classifying,
                PipelineStage::Resolving,
                PipelineStage::Done,
            ]
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_error_fails_before_extraction() {
        let source = Arc::new(FakeSource::failing(DeviceError::NoDefaultDevice));
        let model = StubModel::calm();
        let pipeline = pipeline(source, model.clone(), short_config());

        let mut last_state = None;
        let result = pipeline.run_with(&RunOverrides::default(), &CancelToken::new(), &mut |state| {
            last_state = Some(state.clone());
        });

        assert!(matches!(
            result,
            Err(PipelineError::Device(DeviceError::NoDefaultDevice))
        ));
        assert!(matches!(
            last_state,
            Some(PipelineState::Failed(PipelineError::Device(DeviceError::NoDefaultDevice)))
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);

        let (_, stages) = run_traced(&pipeline, RunOverrides::default(), &CancelToken::new());
        assert_eq!(stages, vec![PipelineStage::Recording, PipelineStage::Failed]);
    }

    #[test]
    fn test_pipeline_reusable_after_failure() {
        let source = Arc::new(FakeSource::failing(DeviceError::Stream("glitch".to_string())));
        let pipeline = pipeline(source.clone(), StubModel::calm(), short_config());

        assert!(pipeline.run(&CancelToken::new()).is_err());
        *source.result.lock().unwrap() = None;
        assert_eq!(pipeline.run(&CancelToken::new()).unwrap().label, "Calm");
    }

    #[test]
    fn test_cancelled_before_start() {
        let source = Arc::new(FakeSource::silent());
        let model = StubModel::calm();
        let pipeline = pipeline(source.clone(), model.clone(), short_config());

        let cancel = CancelToken::new();
        cancel.cancel();
        let (result, stages) = run_traced(&pipeline, RunOverrides::default(), &cancel);

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(stages, vec![PipelineStage::Failed]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    /// Cancels the run while recording but still returns a full clip
    struct CancellingSource;

    impl AudioSource for CancellingSource {
        fn capture(&self, request: &CaptureRequest, cancel: &CancelToken) -> Result<Waveform, DeviceError> {
            cancel.cancel();
            Ok(Waveform::silence(request.expected_len(), request.sample_rate))
        }

        fn describe(&self) -> String {
            "cancelling".to_string()
        }
    }

    /// Records until cancelled
    struct BlockingSource;

    impl AudioSource for BlockingSource {
        fn capture(&self, _request: &CaptureRequest, cancel: &CancelToken) -> Result<Waveform, DeviceError> {
            while !cancel.is_cancelled() {
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
            Err(DeviceError::Cancelled)
        }

        fn describe(&self) -> String {
            "blocking".to_string()
        }
    }

    #[test]
    fn test_cancelled_after_successful_capture() {
        let model = StubModel::calm();
        let pipeline = Pipeline::new(
            Box::new(CancellingSource),
            model.clone(),
            LabelTable::default(),
            short_config(),
        )
        .unwrap();

        let cancel = CancelToken::new();
        let (result, stages) = run_traced(&pipeline, RunOverrides::default(), &cancel);

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(stages, vec![PipelineStage::Recording, PipelineStage::Failed]);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_spawned_pipeline_cancelled_through_handle() {
        let model = StubModel::calm();
        let pipeline = Arc::new(
            Pipeline::new(Box::new(BlockingSource), model.clone(), LabelTable::default(), short_config())
                .unwrap(),
        );
        let (handle, mut rx) = spawn_pipeline(pipeline, RunOverrides::default()).unwrap();

        assert!(matches!(
            rx.blocking_recv(),
            Some(PipelineMessage::Stage(PipelineStage::Recording))
        ));
        handle.cancel();

        assert!(matches!(
            rx.blocking_recv(),
            Some(PipelineMessage::Finished(Err(PipelineError::Cancelled)))
        ));
        assert!(rx.blocking_recv().is_none());
        handle.join();
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_sample_rate_override_is_device_error() {
        let source = Arc::new(FakeSource::silent());
        let pipeline = pipeline(source.clone(), StubModel::calm(), short_config());
        let overrides = RunOverrides {
            sample_rate: Some(0),
            ..RunOverrides::default()
        };

        let (result, stages) = run_traced(&pipeline, overrides, &CancelToken::new());
        assert!(matches!(
            result,
            Err(PipelineError::Device(DeviceError::InvalidRequest(_)))
        ));
        assert_eq!(stages, vec![PipelineStage::Failed]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancellation_during_capture() {
        let source = Arc::new(FakeSource::failing(DeviceError::Cancelled));
        let pipeline = pipeline(source, StubModel::calm(), short_config());
        assert!(matches!(
            pipeline.run(&CancelToken::new()),
            Err(PipelineError::Cancelled)
        ));
    }

    #[test]
    fn test_coefficient_override_mismatch_is_inference_error() {
        let model = StubModel::calm();
        let pipeline = pipeline(Arc::new(FakeSource::silent()), model.clone(), short_config());
        let overrides = RunOverrides {
            n_coeffs: Some(20),
            ..RunOverrides::default()
        };

        let (result, stages) = run_traced(&pipeline, overrides, &CancelToken::new());
        assert!(matches!(
            result,
            Err(PipelineError::Inference(InferenceError::ShapeMismatch { .. }))
        ));
        assert_eq!(stages.last(), Some(&PipelineStage::Failed));
        assert!(stages.contains(&PipelineStage::Classifying));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sample_rate_override() {
        let source = Arc::new(FakeSource::silent());
        let pipeline = pipeline(source, StubModel::calm(), short_config());
        let overrides = RunOverrides {
            duration_secs: Some(0.25),
            sample_rate: Some(22050),
            n_coeffs: None,
        };
        assert!(!overrides.is_empty());

        let result = pipeline
            .run_with(&overrides, &CancelToken::new(), &mut |_| {})
            .unwrap();
        assert_eq!(result.label, "Calm");
    }

    #[test]
    fn test_short_window_is_feature_error() {
        let pipeline = pipeline(Arc::new(FakeSource::silent()), StubModel::calm(), short_config());
        let overrides = RunOverrides {
            duration_secs: Some(0.01), // 160 samples < n_fft
            ..RunOverrides::default()
        };
        assert!(matches!(
            pipeline.run_with(&overrides, &CancelToken::new(), &mut |_| {}),
            Err(PipelineError::FeatureExtraction(FeatureExtractionError::TooShort { .. }))
        ));
    }

    #[test]
    fn test_unknown_class() {
        let model = Arc::new(StubModel {
            n_coeffs: 13,
            scores: vec![0.0, 0.1, 0.1, 0.1, 0.7],
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline(Arc::new(FakeSource::silent()), model, short_config());
        assert!(matches!(
            pipeline.run(&CancelToken::new()),
            Err(PipelineError::UnknownClass(UnknownClassError::Index { index: 4, table_len: 4 }))
        ));
    }

    #[test]
    fn test_recording_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.wav");
        let config = PipelineConfig {
            recording_path: Some(path.clone()),
            ..short_config()
        };
        let pipeline = pipeline(Arc::new(FakeSource::silent()), StubModel::calm(), config);
        pipeline.run(&CancelToken::new()).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len(), 8000);
    }

    #[test]
    fn test_spawned_pipeline_reports_stages() {
        let pipeline = Arc::new(pipeline(
            Arc::new(FakeSource::silent()),
            StubModel::calm(),
            short_config(),
        ));
        let (handle, mut rx) = spawn_pipeline(pipeline, RunOverrides::default()).unwrap();

        let mut stages = Vec::new();
        let result = loop {
            match rx.blocking_recv() {
                Some(PipelineMessage::Stage(stage)) => stages.push(stage),
                Some(PipelineMessage::Finished(result)) => break result,
                None => panic!("worker exited without a result"),
            }
        };
        handle.join();

        assert_eq!(result.unwrap().label, "Calm");
        assert_eq!(stages.first(), Some(&PipelineStage::Recording));
        assert_eq!(stages.last(), Some(&PipelineStage::Resolving));
    }

    #[test]
    fn test_concurrent_runs_share_model() {
        let model = StubModel::calm();
        let pipeline = Arc::new(pipeline(Arc::new(FakeSource::silent()), model.clone(), short_config()));

        std::thread::scope(|scope| {
            for _ in 0..3 {
                let pipeline = pipeline.clone();
                scope.spawn(move || {
                    assert_eq!(pipeline.run(&CancelToken::new()).unwrap().label, "Calm");
                });
            }
        });
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }
}
