use anyhow::Result;
use opencv::{core, prelude::*};

use crate::config::{HEIGHT, MASSIVE_THRESH, SCENE_THRESH, WIDTH};

/// Per-frame scene-change score against the previous grayscale frame.
/// Only the previous frame is retained; there is no history buffer.
pub struct MotionDetector {
    prev_gray: Option<Mat>,
}

impl MotionDetector {
    pub fn new() -> Self {
        MotionDetector { prev_gray: None }
    }

    /// Mean absolute pixel difference against the previous frame, taking
    /// ownership of the current one. Returns None for the first frame
    /// after a (re)start.
    pub fn score(&mut self, gray: Mat) -> Result<Option<f64>> {
        let score = match &self.prev_gray {
            Some(prev) => {
                let mut diff = Mat::default();
                core::absdiff(prev, &gray, &mut diff)?;
                let total = core::sum_elems(&diff)?[0];
                Some(total / (WIDTH as f64 * HEIGHT as f64))
            }
            None => None,
        };
        self.prev_gray = Some(gray);
        Ok(score)
    }
}

/// Celebration heuristic. Ordinary cuts and replays clear the scene
/// threshold; only full-frame eruptions clear the massive threshold too,
/// and those fire on a single frame with no accumulation.
pub fn is_massive(score: f64) -> bool {
    score > SCENE_THRESH && score > MASSIVE_THRESH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moderate_motion_does_not_fire() {
        assert!(!is_massive(11.9));
        assert!(!is_massive(15.0));
        assert!(!is_massive(20.0));
    }

    #[test]
    fn massive_motion_fires() {
        assert!(is_massive(20.1));
        assert!(is_massive(60.0));
    }

    #[test]
    fn first_frame_has_no_score() {
        let mut detector = MotionDetector::new();
        let black =
            Mat::new_rows_cols_with_default(HEIGHT, WIDTH, core::CV_8UC1, core::Scalar::all(0.0))
                .unwrap();
        assert_eq!(detector.score(black).unwrap(), None);
    }

    #[test]
    fn uniform_brightness_change_scores_the_delta() {
        let mut detector = MotionDetector::new();
        let black =
            Mat::new_rows_cols_with_default(HEIGHT, WIDTH, core::CV_8UC1, core::Scalar::all(0.0))
                .unwrap();
        let gray =
            Mat::new_rows_cols_with_default(HEIGHT, WIDTH, core::CV_8UC1, core::Scalar::all(30.0))
                .unwrap();

        detector.score(black).unwrap();
        let score = detector.score(gray).unwrap().unwrap();
        assert!((score - 30.0).abs() < 1e-6);
    }

    #[test]
    fn identical_frames_score_zero() {
        let mut detector = MotionDetector::new();
        let frame =
            Mat::new_rows_cols_with_default(HEIGHT, WIDTH, core::CV_8UC1, core::Scalar::all(77.0))
                .unwrap();

        detector.score(frame.clone()).unwrap();
        let score = detector.score(frame).unwrap().unwrap();
        assert_eq!(score, 0.0);
    }
}
