use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, GrayImage};
use log::debug;
use opencv::{core, imgproc, prelude::*};
use rusty_tesseract::{Args as TessArgs, Image as TessImage};

use crate::config::{HEIGHT, OCR_BINARIZE_THRESH, OCR_KEYWORDS, WIDTH};

/// External text-recognition capability. Takes a binarized region and
/// returns recognized fragments in reading order; no bounding boxes.
pub trait OcrEngine {
    fn read_text(&self, region: &GrayImage) -> Result<Vec<String>>;
}

/// Tesseract-backed engine. PSM 6 treats the caption band as a single
/// uniform block of text.
pub struct TesseractOcr {
    args: TessArgs,
}

impl TesseractOcr {
    pub fn new() -> Self {
        TesseractOcr {
            args: TessArgs {
                lang: "eng".to_string(),
                config_variables: HashMap::new(),
                dpi: Some(150),
                psm: Some(6),
                oem: Some(1),
            },
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn read_text(&self, region: &GrayImage) -> Result<Vec<String>> {
        let image = TessImage::from_dynamic_image(&DynamicImage::ImageLuma8(region.clone()))
            .map_err(|e| anyhow!("tesseract rejected region: {e:?}"))?;
        let text = rusty_tesseract::image_to_string(&image, &self.args)
            .map_err(|e| anyhow!("tesseract failed: {e:?}"))?;
        Ok(text.split_whitespace().map(str::to_owned).collect())
    }
}

/// First keyword found in the recognized text wins. Bare digits only count
/// as space-delimited whole words, so the running score overlay ("14/2")
/// cannot fake a boundary.
pub fn match_keywords(text: &str) -> Option<&'static str> {
    let padded = format!(" {text} ");
    for keyword in OCR_KEYWORDS {
        if !text.contains(keyword) {
            continue;
        }
        if matches!(*keyword, "4" | "6") && !padded.contains(&format!(" {keyword} ")) {
            continue;
        }
        return Some(keyword);
    }
    None
}

/// Crop the caption band from a grayscale frame, binarize it, and run
/// recognition. Engine faults are swallowed; a failed scan is simply a
/// scan with no match.
pub fn scan_caption_band(engine: &dyn OcrEngine, gray: &Mat) -> Option<&'static str> {
    match read_caption_band(engine, gray) {
        Ok(text) => match_keywords(&text),
        Err(e) => {
            debug!("[OCR] scan skipped: {e:#}");
            None
        }
    }
}

fn read_caption_band(engine: &dyn OcrEngine, gray: &Mat) -> Result<String> {
    // Horizontally centered band over the lower quarter, where broadcast
    // captions and the third-umpire banner live.
    let top = (HEIGHT as f64 * 0.75) as i32;
    let left = (WIDTH as f64 * 0.15) as i32;
    let band_rect = core::Rect::new(left, top, WIDTH - 2 * left, HEIGHT - top);

    let band = Mat::roi(gray, band_rect)?;
    let mut binary = Mat::default();
    imgproc::threshold(
        &band,
        &mut binary,
        OCR_BINARIZE_THRESH,
        255.0,
        imgproc::THRESH_BINARY,
    )?;

    let buf = binary.data_bytes()?.to_vec();
    let region = GrayImage::from_raw(band_rect.width as u32, band_rect.height as u32, buf)
        .context("caption band buffer size mismatch")?;

    let fragments = engine.read_text(&region)?;
    Ok(fragments.join(" ").to_uppercase())
}
