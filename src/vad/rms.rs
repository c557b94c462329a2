//! RMS-energy voice-activity gate (spec. §4.2).

use super::VoiceActivityDetector;

/// Default RMS threshold on the -1.0..1.0 sample scale.
pub const DEFAULT_RMS_THRESHOLD: f32 = 0.009;

pub struct RmsVad {
    threshold: f32,
}

impl RmsVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for RmsVad {
    fn default() -> Self {
        Self::new(DEFAULT_RMS_THRESHOLD)
    }
}

/// Root-mean-square of a frame on the -1.0..1.0 scale.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = frame.iter().map(|&s| s * s).sum();
    (sum_sq / frame.len() as f32).sqrt()
}

impl VoiceActivityDetector for RmsVad {
    fn is_speech(&mut self, frame: &[f32]) -> bool {
        rms(frame) >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_not_speech() {
        let mut vad = RmsVad::default();
        assert!(!vad.is_speech(&[0.0; 512]));
    }

    #[test]
    fn loud_tone_is_speech() {
        let mut vad = RmsVad::default();
        let frame: Vec<f32> = (0..512).map(|_| 0.5).collect();
        assert!(vad.is_speech(&frame));
    }

    #[test]
    fn empty_frame_is_not_speech() {
        let mut vad = RmsVad::default();
        assert!(!vad.is_speech(&[]));
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let mut vad = RmsVad::new(0.1);
        let frame = vec![0.1; 10];
        assert!(vad.is_speech(&frame));
    }
}
