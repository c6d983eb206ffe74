use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::io::AsyncReadExt;
use tokio::process::ChildStderr;
use tokio::time::sleep;

use crate::config::{AUDIO_CHUNK_BYTES, AUDIO_NORM, AUDIO_SUSTAIN, AUDIO_THRESH};

/// One-shot crowd-roar signal shared between the monitor task and the
/// fusion loop. The trigger is read-and-cleared by the loop each frame;
/// the volume is published as raw f32 bits so the loop can log it.
pub struct AudioSignal {
    trigger: AtomicBool,
    volume_bits: AtomicU32,
}

impl AudioSignal {
    pub fn new() -> Self {
        AudioSignal {
            trigger: AtomicBool::new(false),
            volume_bits: AtomicU32::new(0),
        }
    }

    pub fn take_trigger(&self) -> bool {
        self.trigger.swap(false, Ordering::AcqRel)
    }

    fn raise(&self) {
        self.trigger.store(true, Ordering::Release);
    }

    pub fn current_volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    fn publish_volume(&self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }
}

/// Sustain counter for crowd noise: a roar only counts once the volume has
/// stayed above threshold for `AUDIO_SUSTAIN` consecutive chunks, so a
/// single bat crack or commentary spike does not open a clip window.
pub struct LoudnessDetector {
    sustain_count: u32,
}

impl LoudnessDetector {
    pub fn new() -> Self {
        LoudnessDetector { sustain_count: 0 }
    }

    /// Feed one chunk's normalized volume; returns true when the sustain
    /// count is reached. The counter restarts after each firing so the
    /// next roar has to reaccumulate from zero.
    pub fn push(&mut self, volume: f32) -> bool {
        if volume > AUDIO_THRESH {
            self.sustain_count += 1;
        } else {
            self.sustain_count = 0;
        }
        if self.sustain_count >= AUDIO_SUSTAIN {
            self.sustain_count = 0;
            return true;
        }
        false
    }
}

/// RMS amplitude of a block of 16-bit LE mono samples, normalized by the
/// loudness baseline and clamped to [0, 1].
pub fn chunk_volume(chunk: &[u8]) -> f32 {
    let samples = chunk.len() / 2;
    if samples == 0 {
        return 0.0;
    }
    let mut sum_sq = 0.0f64;
    for pair in chunk.chunks_exact(2) {
        let s = i16::from_le_bytes([pair[0], pair[1]]) as f64;
        sum_sq += s * s;
    }
    let rms = (sum_sq / samples as f64).sqrt() as f32;
    (rms / AUDIO_NORM).min(1.0)
}

/// Drains the transport's audio pipe for the lifetime of one session.
/// Short reads are treated as transient jitter; a read error ends the
/// monitor and the watchdog handles it like any stalled pipe.
pub async fn run_monitor(
    mut pipe: ChildStderr,
    signal: Arc<AudioSignal>,
    running: Arc<AtomicBool>,
) {
    info!("[AUDIO] listening for crowd roar");
    let mut detector = LoudnessDetector::new();
    let mut chunk = vec![0u8; AUDIO_CHUNK_BYTES];
    let mut filled = 0usize;

    while running.load(Ordering::Relaxed) {
        match pipe.read(&mut chunk[filled..]).await {
            Ok(0) => {
                // Pipe transiently empty or closed; the watchdog decides
                // when to give up on the session.
                sleep(Duration::from_millis(10)).await;
            }
            Ok(n) => {
                filled += n;
                if filled < AUDIO_CHUNK_BYTES {
                    continue;
                }
                filled = 0;
                let volume = chunk_volume(&chunk);
                signal.publish_volume(volume);
                if detector.push(volume) {
                    debug!("[AUDIO] sustained loudness, volume {volume:.2}");
                    signal.raise();
                }
            }
            Err(e) => {
                error!("[AUDIO] read failed: {e}");
                break;
            }
        }
    }
}
