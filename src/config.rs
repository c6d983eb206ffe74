use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

/// Fixed decode geometry. The transport decodes every source to this size,
/// so the frame loop never has to probe the stream.
pub const WIDTH: i32 = 1920;
pub const HEIGHT: i32 = 1080;
pub const FPS: f64 = 25.0;
pub const FRAME_BYTES: usize = (WIDTH as usize) * (HEIGHT as usize) * 3;

// Caption text (OCR) sampling
pub const OCR_INTERVAL: f64 = 0.4;
pub const OCR_GAP: f64 = 5.0;
pub const OCR_BINARIZE_THRESH: f64 = 130.0;
/// Priority-ordered; first keyword found in the caption band wins.
pub const OCR_KEYWORDS: &[&str] = &[
    "4", "6", "OUT", "WICKET", "APPEAL", "REVIEW", "BOWLED", "CAUGHT", "CENTURY",
];

// Crowd noise
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;
/// 100 ms of 16-bit mono samples.
pub const AUDIO_CHUNK_BYTES: usize = 8_820;
pub const AUDIO_THRESH: f32 = 0.65;
pub const AUDIO_SUSTAIN: u32 = 3;
pub const AUDIO_GAP: f64 = 10.0;
/// RMS amplitude treated as full loudness.
pub const AUDIO_NORM: f32 = 20_000.0;

// Motion
pub const SCENE_THRESH: f64 = 12.0;
pub const MASSIVE_THRESH: f64 = 20.0;
pub const MOTION_GAP: f64 = 8.0;

// Clip timing
pub const RUNUP_SEC: f64 = 6.0;
pub const POST_SEC: f64 = 12.0;
pub const BALL_MIN: f64 = 8.0;
pub const BALL_MAX: f64 = 25.0;
/// Extra wait after the clip window's tail has been broadcast, to let the
/// recorder flush it to disk.
pub const SETTLE_MARGIN_SEC: u64 = 3;

// Watchdog
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);
pub const RESTART_COOLDOWN: Duration = Duration::from_secs(2);
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);

pub const DEFAULT_SOURCE: &str = "203.130.9.34:7001";

/// One run of the engine against one source. Owns the output directory
/// tree; clip jobs hold an `Arc` so they can keep reading the recording
/// after the session that spawned them has been restarted.
pub struct StreamSession {
    pub match_name: String,
    pub source: String,
    pub recording_path: PathBuf,
    pub balls_dir: PathBuf,
    pub reels_dir: PathBuf,
}

impl StreamSession {
    pub fn new(matches_root: &Path, match_name: &str, source: &str) -> Result<Self> {
        let match_dir = matches_root.join(match_name);
        let balls_dir = match_dir.join("Full Screen");
        let reels_dir = match_dir.join("Reel");
        std::fs::create_dir_all(&balls_dir)
            .with_context(|| format!("failed to create {}", balls_dir.display()))?;
        std::fs::create_dir_all(&reels_dir)
            .with_context(|| format!("failed to create {}", reels_dir.display()))?;

        Ok(StreamSession {
            match_name: match_name.to_string(),
            source: source.to_string(),
            recording_path: match_dir.join("full_match.ts"),
            balls_dir,
            reels_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_creates_output_tree() {
        let root = tempfile::tempdir().unwrap();
        let session = StreamSession::new(root.path(), "test_match", "in.ts").unwrap();

        assert!(session.balls_dir.is_dir());
        assert!(session.reels_dir.is_dir());
        assert_eq!(
            session.recording_path,
            root.path().join("test_match").join("full_match.ts")
        );
        assert!(session.balls_dir.ends_with("Full Screen"));
        assert!(session.reels_dir.ends_with("Reel"));
    }
}
