use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::timeout;

use crate::config::{StreamSession, AUDIO_SAMPLE_RATE, TERMINATE_GRACE};

/// Handle over the single ffmpeg invocation that copies the stream to disk
/// while exposing decoded video and audio on two independent pipes. Video
/// and audio each get their own pipe so neither consumer can stall the
/// other's framing.
pub struct Transport {
    child: Child,
    pub video: ChildStdout,
    audio: Option<ChildStderr>,
}

/// Resolve the user-supplied source into something ffmpeg accepts: local
/// files become absolute paths, full URLs pass through, and a bare
/// `host:port` is wrapped with low-latency SRT caller parameters.
pub fn build_source_url(source: &str) -> String {
    if Path::new(source).exists() {
        if let Ok(abs) = std::fs::canonicalize(source) {
            return abs.to_string_lossy().into_owned();
        }
    }
    if ["srt://", "http", "udp"].iter().any(|s| source.starts_with(s)) {
        return source.to_string();
    }
    format!("srt://{source}?mode=caller&transtype=live&latency=1000&peerlatency=1000")
}

/// Spawn the decode/record process. One connection, three outputs: the
/// lossless recording, raw BGR frames on stdout, and mono PCM on stderr.
/// Quiet mode is mandatory; any ffmpeg log line would land inside the
/// audio byte stream.
pub fn launch(session: &StreamSession, url: &str) -> Result<Transport> {
    let sample_rate = AUDIO_SAMPLE_RATE.to_string();
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-err_detect", "ignore_err", "-i", url])
        .args(["-map", "0", "-c", "copy", "-f", "mpegts", "-flags", "+global_header"])
        .arg(&session.recording_path)
        .args(["-map", "0:v", "-f", "rawvideo", "-pix_fmt", "bgr24", "-an", "pipe:1"])
        .args(["-map", "0:a", "-f", "s16le", "-ac", "1", "-ar", &sample_rate, "pipe:2"])
        .args(["-loglevel", "quiet"]);

    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to start ffmpeg transport")?;

    let video = child
        .stdout
        .take()
        .context("transport child has no stdout pipe")?;
    let audio = child
        .stderr
        .take()
        .context("transport child has no stderr pipe")?;

    Ok(Transport {
        child,
        video,
        audio: Some(audio),
    })
}

impl Transport {
    /// Hands the audio pipe to the monitor task; can only be taken once.
    pub fn take_audio(&mut self) -> Option<ChildStderr> {
        self.audio.take()
    }

    /// Terminate the child, waiting a short grace period before giving up
    /// on its exit status.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("[WATCHDOG] transport already gone: {e}");
            return;
        }
        match timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("[WATCHDOG] transport exited: {status}"),
            Ok(Err(e)) => warn!("[WATCHDOG] transport wait failed: {e}"),
            Err(_) => warn!("[WATCHDOG] transport did not exit within grace period"),
        }
    }
}
