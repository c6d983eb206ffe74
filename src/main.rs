mod audio;
mod clip_detector;
mod clipper;
mod config;
mod motion;
mod ocr;
mod transport;
mod utilities;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::info;

use crate::config::{StreamSession, DEFAULT_SOURCE};
use crate::ocr::{OcrEngine, TesseractOcr};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // Usage: cricket_clipper [MATCH_NAME] [SOURCE]
    let mut args = std::env::args().skip(1);
    let match_name = args
        .next()
        .unwrap_or_else(|| format!("match_{}", Utc::now().timestamp()));
    let source = args.next().unwrap_or_else(|| DEFAULT_SOURCE.to_string());

    let matches_root = std::env::current_dir()?.join("matches");
    let session = Arc::new(StreamSession::new(&matches_root, &match_name, &source)?);
    info!(
        "[CONFIG] match: {}, source: {}",
        session.match_name, session.source
    );

    let ocr_engine: Arc<dyn OcrEngine + Send + Sync> = Arc::new(TesseractOcr::new());

    // The transport child is spawned with kill_on_drop, so cancelling the
    // engine future on Ctrl-C also reaps ffmpeg.
    tokio::select! {
        res = clip_detector::run_engine(session, ocr_engine) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("[EXIT] shutdown requested");
            Ok(())
        }
    }
}
