use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use opencv::{imgproc, prelude::*};
use tokio::io::AsyncReadExt;
use tokio::time::{sleep, timeout};

use crate::audio::{self, AudioSignal};
use crate::clipper;
use crate::config::{
    StreamSession, AUDIO_GAP, FPS, FRAME_BYTES, HEIGHT, IDLE_TIMEOUT, MOTION_GAP, OCR_GAP,
    OCR_INTERVAL, RESTART_COOLDOWN,
};
use crate::motion::{self, MotionDetector};
use crate::ocr::{self, OcrEngine};
use crate::transport::{self, Transport};
use crate::utilities::format_timestamp;

/// Shared debounce gate. One accepted trigger opens a clip window and
/// suppresses every source, including the one that fired, until its own
/// gap has elapsed again. Missed triggers are dropped, never queued.
pub struct TriggerGate {
    ball_start: f64,
}

impl TriggerGate {
    pub fn new() -> Self {
        TriggerGate { ball_start: 0.0 }
    }

    pub fn ready(&self, t: f64, gap: f64) -> bool {
        t - self.ball_start > gap
    }

    pub fn accept(&mut self, t: f64) {
        self.ball_start = t;
    }

    pub fn ball_start(&self) -> f64 {
        self.ball_start
    }
}

/// Why one session of the engine ended.
enum SessionEnd {
    Stalled,
    PipeClosed,
}

/// Watchdog loop: run full sessions of {transport, audio monitor, frame
/// loop} forever, restarting with a cooldown on any transport fault. Frame
/// numbering and the trigger gate reset on every restart; a broadcast
/// outage is expected to be transient, so there is no retry ceiling.
pub async fn run_engine(
    session: Arc<StreamSession>,
    ocr_engine: Arc<dyn OcrEngine + Send + Sync>,
) -> Result<()> {
    let url = transport::build_source_url(&session.source);
    info!("[SYSTEM LIVE] watching visuals + audio + motion on {url}");

    loop {
        info!("[WATCHDOG] starting engine processes");
        let mut transport = match transport::launch(&session, &url) {
            Ok(t) => t,
            Err(e) => {
                error!("[WATCHDOG] transport launch failed: {e:#}");
                sleep(RESTART_COOLDOWN).await;
                continue;
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        let signal = Arc::new(AudioSignal::new());
        let audio_pipe = transport
            .take_audio()
            .context("audio pipe already taken")?;
        let monitor = tokio::spawn(audio::run_monitor(
            audio_pipe,
            Arc::clone(&signal),
            Arc::clone(&running),
        ));

        match run_session(&session, &mut transport, &signal, ocr_engine.as_ref()).await {
            Ok(SessionEnd::Stalled) => warn!(
                "[WATCHDOG] no frame data for {}s, restarting",
                IDLE_TIMEOUT.as_secs()
            ),
            Ok(SessionEnd::PipeClosed) => {
                warn!("[WATCHDOG] video pipe closed, possible stream drop")
            }
            Err(e) => error!("[WATCHDOG] session failed: {e:#}"),
        }

        running.store(false, Ordering::Relaxed);
        transport.shutdown().await;
        let _ = monitor.await;

        // Cooldown lets the SRT socket release before redialing.
        sleep(RESTART_COOLDOWN).await;
    }
}

/// One session's frame loop: drain the video pipe, fuse the three trigger
/// sources per frame in fixed Audio -> OCR -> Motion order, and hand
/// accepted triggers to the clip scheduler.
async fn run_session(
    session: &Arc<StreamSession>,
    transport: &mut Transport,
    signal: &AudioSignal,
    ocr_engine: &dyn OcrEngine,
) -> Result<SessionEnd> {
    let mut frame_buf = vec![0u8; FRAME_BYTES];
    let mut frame_id: u64 = 0;
    let mut gate = TriggerGate::new();
    let mut motion = MotionDetector::new();
    let mut last_ocr_time = 0.0f64;

    loop {
        match timeout(IDLE_TIMEOUT, transport.video.read_exact(&mut frame_buf)).await {
            Err(_) => return Ok(SessionEnd::Stalled),
            Ok(Err(e)) => {
                debug!("[SRT] video read ended: {e}");
                return Ok(SessionEnd::PipeClosed);
            }
            Ok(Ok(_)) => {}
        }
        frame_id += 1;
        let t = frame_id as f64 / FPS;

        let flat = Mat::from_slice(&frame_buf)?;
        let frame = flat.reshape(3, HEIGHT)?;
        let mut gray = Mat::default();
        imgproc::cvt_color_def(&frame, &mut gray, imgproc::COLOR_BGR2GRAY)?;

        // A. Crowd roar. The flag is cleared whether or not it is acted
        // on, so a roar landing inside another source's cooldown is lost.
        let roared = signal.take_trigger();
        if roared && gate.ready(t, AUDIO_GAP) {
            info!(
                "[EVENT] crowd roar at {} (volume {:.2})",
                format_timestamp(t),
                signal.current_volume()
            );
            clipper::schedule(session, t, "Audio-Roar");
            gate.accept(t);
        }

        // B. Caption text, rate-limited and skipped while a window is open.
        if t - last_ocr_time > OCR_INTERVAL && gate.ready(t, OCR_GAP) {
            last_ocr_time = t;
            if let Some(keyword) = ocr::scan_caption_band(ocr_engine, &gray) {
                info!(
                    "[EVENT] caption keyword {:?} at {}",
                    keyword,
                    format_timestamp(t)
                );
                clipper::schedule(session, t, &format!("OCR-{keyword}"));
                gate.accept(t);
            }
        }

        // C. Massive motion, single-frame.
        if let Some(score) = motion.score(gray)? {
            if gate.ready(t, MOTION_GAP) && motion::is_massive(score) {
                info!(
                    "[EVENT] massive motion at {} (score {:.1})",
                    format_timestamp(t),
                    score
                );
                clipper::schedule(session, t, "Motion");
                gate.accept(t);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BALL_MAX, BALL_MIN, POST_SEC, RUNUP_SEC};

    const SOURCE_GAPS: [f64; 3] = [AUDIO_GAP, OCR_GAP, MOTION_GAP];

    /// Every source wants to fire on every frame; acceptance follows the
    /// fixed check order and the shared gate.
    fn accepted_under_constant_pressure(gaps: &[f64], frames: usize) -> Vec<f64> {
        let mut gate = TriggerGate::new();
        let mut accepted = Vec::new();
        for frame_id in 1..=frames {
            let t = frame_id as f64 / FPS;
            for gap in gaps {
                if gate.ready(t, *gap) {
                    gate.accept(t);
                    accepted.push(t);
                    break;
                }
            }
        }
        accepted
    }

    #[test]
    fn gate_starts_closed_until_first_gap_elapses() {
        let gate = TriggerGate::new();
        assert!(!gate.ready(4.9, OCR_GAP));
        assert!(gate.ready(5.1, OCR_GAP));
        assert!(!gate.ready(9.9, AUDIO_GAP));
    }

    #[test]
    fn acceptance_suppresses_all_sources() {
        let mut gate = TriggerGate::new();
        gate.accept(20.0);
        assert_eq!(gate.ball_start(), 20.0);
        for gap in SOURCE_GAPS {
            assert!(!gate.ready(20.0 + gap, gap));
            assert!(gate.ready(20.0 + gap + 0.1, gap));
        }
    }

    #[test]
    fn accepted_triggers_never_closer_than_smallest_gap() {
        let smallest = SOURCE_GAPS.iter().cloned().fold(f64::INFINITY, f64::min);
        let accepted = accepted_under_constant_pressure(&SOURCE_GAPS, 60 * 25);
        assert!(accepted.len() > 3);
        for pair in accepted.windows(2) {
            assert!(
                pair[1] - pair[0] > smallest,
                "triggers at {} and {} too close",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn audio_and_motion_only_space_at_eight_seconds() {
        let accepted = accepted_under_constant_pressure(&[AUDIO_GAP, MOTION_GAP], 90 * 25);
        assert!(accepted.len() > 3);
        for pair in accepted.windows(2) {
            assert!(pair[1] - pair[0] > MOTION_GAP);
        }
    }

    #[test]
    fn scheduled_windows_from_gated_triggers_stay_ordered() {
        let accepted = accepted_under_constant_pressure(&SOURCE_GAPS, 120 * 25);
        let mut prev_start = -1.0;
        for t in accepted {
            let (start, duration) = crate::clipper::clip_window(t);
            assert!(start > prev_start);
            assert!(duration >= BALL_MIN && duration <= BALL_MAX);
            assert!(start >= t - RUNUP_SEC - 1e-9);
            assert!(start + duration <= t + POST_SEC + 1e-9);
            prev_start = start;
        }
    }
}
