use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info};
use serde::Serialize;
use tokio::time::sleep;

use crate::config::{
    StreamSession, BALL_MAX, BALL_MIN, POST_SEC, RUNUP_SEC, SETTLE_MARGIN_SEC,
};
use crate::utilities::{format_timestamp, run_ffmpeg};

/// One scheduled extraction from the still-growing recording. Also written
/// out as a JSON sidecar so the branding worker knows why the clip exists.
#[derive(Debug, Clone, Serialize)]
pub struct ClipJob {
    pub match_name: String,
    pub filename: String,
    pub reason: String,
    pub start: f64,
    pub duration: f64,
}

/// Clip window around a trigger at `t`: runup before, follow-through
/// after, duration clamped to [BALL_MIN, BALL_MAX].
pub fn clip_window(t: f64) -> (f64, f64) {
    let start = (t - RUNUP_SEC).max(0.0);
    let raw = (t + POST_SEC) - start;
    (start, raw.clamp(BALL_MIN, BALL_MAX))
}

/// Launch a detached cut job for a trigger at `t`. The detection loop
/// never waits on disk I/O or transcoding; a failed job is logged and
/// abandoned, never retried.
pub fn schedule(session: &Arc<StreamSession>, t: f64, reason: &str) {
    let (start, duration) = clip_window(t);
    let job = ClipJob {
        match_name: session.match_name.clone(),
        filename: format!("ball_{}.mp4", Utc::now().timestamp()),
        reason: reason.to_string(),
        start,
        duration,
    };
    info!(
        "[QUEUE] {} at {}, cutting {:.1}s window",
        job.reason,
        format_timestamp(t),
        duration
    );

    let session = Arc::clone(session);
    tokio::spawn(async move {
        if let Err(e) = run_job(&session, &job).await {
            error!("[CLIP] {} abandoned: {e:#}", job.filename);
        }
    });
}

async fn run_job(session: &StreamSession, job: &ClipJob) -> Result<()> {
    settle(&session.recording_path).await;

    let out = session.balls_dir.join(&job.filename);
    trim(&session.recording_path, job, &out).await?;
    info!("[CLIP SAVED] {}", job.filename);

    write_metadata(session, job)?;

    let vertical = make_vertical(session, &out).await?;
    info!("[VERTICAL READY] {}", vertical.display());
    Ok(())
}

/// Wait for the window's tail to exist on disk. The recorder appends in
/// real time, so the bytes for `t + POST_SEC` are not even broadcast until
/// POST_SEC after the trigger; after that margin, poll briefly for the
/// recording file to be present and non-empty rather than trusting a
/// blind sleep alone.
async fn settle(recording: &Path) {
    sleep(Duration::from_secs(POST_SEC as u64 + SETTLE_MARGIN_SEC)).await;
    for _ in 0..10 {
        let len = tokio::fs::metadata(recording)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if len > 0 {
            return;
        }
        sleep(Duration::from_millis(500)).await;
    }
}

/// Stream-copy exactly the window out of the recording, remapping both
/// streams and rebasing timestamps to zero.
async fn trim(recording: &Path, job: &ClipJob, out: &Path) -> Result<()> {
    let start = format!("{:.2}", job.start);
    let duration = format!("{:.2}", job.duration);
    let input = recording.to_string_lossy();
    let output = out.to_string_lossy();

    run_ffmpeg(&[
        "-y",
        "-ss",
        &start,
        "-i",
        &input,
        "-t",
        &duration,
        "-map",
        "0:v",
        "-map",
        "0:a",
        "-c",
        "copy",
        "-avoid_negative_ts",
        "make_zero",
        &output,
    ])
    .await
}

/// Second pass: cropped/scaled portrait rendition for the reel directory.
/// The `_V` suffix is how downstream consumers detect orientation.
async fn make_vertical(session: &StreamSession, clip: &Path) -> Result<PathBuf> {
    let stem = clip
        .file_stem()
        .and_then(|s| s.to_str())
        .context("clip path has no file stem")?;
    let out = session.reels_dir.join(format!("{stem}_V.mp4"));
    let input = clip.to_string_lossy();
    let output = out.to_string_lossy();

    run_ffmpeg(&[
        "-y",
        "-i",
        &input,
        "-vf",
        "scale=1080:1920:force_original_aspect_ratio=increase,crop=1080:1920",
        "-c:v",
        "libx264",
        "-preset",
        "ultrafast",
        "-crf",
        "23",
        "-c:a",
        "aac",
        "-b:a",
        "128k",
        &output,
    ])
    .await?;
    Ok(out)
}

fn write_metadata(session: &StreamSession, job: &ClipJob) -> Result<()> {
    let stem = job.filename.trim_end_matches(".mp4");
    let path = session.balls_dir.join(format!("{stem}.json"));
    let file = std::fs::File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, job).context("failed to write clip metadata")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_includes_runup_and_post() {
        let (start, duration) = clip_window(100.0);
        assert!((start - 94.0).abs() < 1e-9);
        assert!((duration - 18.0).abs() < 1e-9);
    }

    #[test]
    fn early_trigger_clamps_start_to_zero() {
        let (start, duration) = clip_window(2.0);
        assert_eq!(start, 0.0);
        assert!((duration - 14.0).abs() < 1e-9);
    }

    #[test]
    fn trigger_at_zero_still_meets_minimum() {
        let (start, duration) = clip_window(0.0);
        assert_eq!(start, 0.0);
        assert!(duration >= BALL_MIN);
    }

    #[test]
    fn duration_always_within_bounds() {
        let mut t = 0.0;
        while t < 1000.0 {
            let (_, duration) = clip_window(t);
            assert!(duration >= BALL_MIN, "too short at t={t}");
            assert!(duration <= BALL_MAX, "too long at t={t}");
            t += 0.37;
        }
    }

    #[test]
    fn metadata_sidecar_lands_next_to_clip() {
        let root = tempfile::tempdir().unwrap();
        let session = StreamSession::new(root.path(), "m", "src.ts").unwrap();
        let job = ClipJob {
            match_name: "m".into(),
            filename: "ball_1700000000.mp4".into(),
            reason: "OCR-4".into(),
            start: 94.0,
            duration: 18.0,
        };

        write_metadata(&session, &job).unwrap();

        let raw =
            std::fs::read_to_string(session.balls_dir.join("ball_1700000000.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["reason"], "OCR-4");
        assert_eq!(value["duration"], 18.0);
    }
}
