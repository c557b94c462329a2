//! Neural FSMN-style voice-activity gate, delegating to an ONNX session.
//!
//! Grounded on the teacher's `SileroVad` (state-carrying ONNX VAD session,
//! `ort::inputs!` call pattern) generalized to the FSMN-VAD contract of
//! spec. §4.2: on any inference error, fall back to RMS for that frame and
//! log once rather than repeatedly.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::{Array, Array2, ArrayD};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputs};
use ort::value::Tensor;

use super::device::{select_device, Device};
use super::rms::RmsVad;
use super::VoiceActivityDetector;
use crate::error::VadError;

/// Probability threshold above which a frame is classified as speech.
pub const DEFAULT_FSMN_THRESHOLD: f32 = 0.5;

pub struct FsmnVad {
    session: Session,
    state: ArrayD<f32>,
    sample_rate: Array<i64, ndarray::Ix1>,
    frame_buffer: Array2<f32>,
    frame_size: usize,
    threshold: f32,
    fallback: RmsVad,
    logged_fallback: AtomicBool,
}

impl FsmnVad {
    pub fn new(model_path: impl AsRef<Path>, sample_rate: usize, device: Device) -> Result<Self, VadError> {
        let frame_size = 512;
        let resolved = select_device(device);

        let mut builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.with_inter_threads(1))
            .map_err(|e| VadError::ModelNotAvailable(e.to_string()))?;

        #[cfg(feature = "ort-cuda")]
        if resolved == Device::Cuda {
            use ort::execution_providers::cuda::CUDAExecutionProvider;
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(|e| VadError::ModelNotAvailable(e.to_string()))?;
        }
        #[cfg(feature = "ort-rocm")]
        if resolved == Device::Rocm {
            use ort::execution_providers::rocm::ROCmExecutionProvider;
            builder = builder
                .with_execution_providers([ROCmExecutionProvider::default().build()])
                .map_err(|e| VadError::ModelNotAvailable(e.to_string()))?;
        }
        #[cfg(feature = "ort-directml")]
        if resolved == Device::Dml {
            use ort::execution_providers::directml::DirectMLExecutionProvider;
            builder = builder
                .with_execution_providers([DirectMLExecutionProvider::default().build()])
                .map_err(|e| VadError::ModelNotAvailable(e.to_string()))?;
        }

        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| VadError::ModelNotAvailable(e.to_string()))?;

        Ok(Self {
            session,
            state: ArrayD::<f32>::zeros([2, 1, 128].as_slice()),
            sample_rate: Array::from_shape_vec([1], vec![sample_rate as i64]).unwrap(),
            frame_buffer: Array2::<f32>::zeros((1, frame_size)),
            frame_size,
            threshold: DEFAULT_FSMN_THRESHOLD,
            fallback: RmsVad::default(),
            logged_fallback: AtomicBool::new(false),
        })
    }

    fn infer(&mut self, frame: &[f32]) -> Result<f32, VadError> {
        let n = frame.len().min(self.frame_size);
        for i in 0..self.frame_size {
            self.frame_buffer[[0, i]] = if i < n { frame[i] } else { 0.0 };
        }

        let frame_tensor = Tensor::from_array(self.frame_buffer.clone())
            .map_err(|e| VadError::InferenceError(e.to_string()))?;
        let state_tensor = Tensor::from_array(std::mem::take(&mut self.state))
            .map_err(|e| VadError::InferenceError(e.to_string()))?;
        let sr_tensor = Tensor::from_array(self.sample_rate.clone())
            .map_err(|e| VadError::InferenceError(e.to_string()))?;

        let inputs = ort::inputs![frame_tensor, state_tensor, sr_tensor];
        let outputs = self
            .session
            .run(SessionInputs::ValueSlice::<3>(&inputs))
            .map_err(|e| VadError::InferenceError(e.to_string()))?;

        self.state = outputs["stateN"]
            .try_extract_array()
            .map_err(|e| VadError::InferenceError(e.to_string()))?
            .to_owned();

        let prob_tensor = outputs["output"]
            .try_extract_tensor::<f32>()
            .map_err(|e| VadError::InferenceError(e.to_string()))?;
        Ok(prob_tensor.1[0])
    }
}

impl VoiceActivityDetector for FsmnVad {
    fn is_speech(&mut self, frame: &[f32]) -> bool {
        match self.infer(frame) {
            Ok(prob) => prob >= self.threshold,
            Err(e) => {
                if !self.logged_fallback.swap(true, Ordering::Relaxed) {
                    tracing::warn!(error = %e, "FSMN-VAD inference failed, falling back to RMS");
                }
                self.fallback.is_speech(frame)
            }
        }
    }
}
