use anyhow::{ensure, Result};
use log::debug;

/// Render seconds as an hh:mm:ss,mmm display timestamp.
pub fn format_timestamp(seconds: f64) -> String {
    let total_millis = (seconds * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Run one ffmpeg invocation to completion, failing on non-zero exit.
pub async fn run_ffmpeg(args: &[&str]) -> Result<()> {
    let output = tokio::process::Command::new("ffmpeg")
        .args(args)
        .output()
        .await?;

    debug!("ffmpeg stdout: {}", String::from_utf8_lossy(&output.stdout));
    ensure!(
        output.status.success(),
        "ffmpeg exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_zero() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
    }

    #[test]
    fn formats_hours_minutes_seconds_millis() {
        assert_eq!(format_timestamp(3661.5), "01:01:01,500");
        assert_eq!(format_timestamp(59.999), "00:00:59,999");
    }
}
