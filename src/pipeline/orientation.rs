//! Orientation correction: bring a raster page upright.
//!
//! Signals are tried from cheapest to most expensive:
//!
//! 1. EXIF orientation tag equal to 1 means the camera already recorded the
//!    page as upright.
//! 2. Images too small for OCR are accepted as they are.
//! 3. Tesseract OSD, once per language hint, then once without a hint.
//! 4. If OSD never produced an angle, plain recognition is run on the three
//!    non-trivial rotations and the most legible one wins, provided it clears
//!    a minimum score.
//!
//! Correction never fails. The worst outcome is the original image with a
//! `failure` detail the batch turns into a warning.

use crate::config::PipelineConfig;
use crate::ocr::{alphanumeric_score, OcrEngine, OcrError};
use crate::pipeline::encode::write_png;
use crate::pipeline::filename::sanitize_name;
use image::DynamicImage;
use std::fmt;
use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The subset of [`PipelineConfig`] the corrector needs.
#[derive(Debug, Clone)]
pub struct OrientationSettings {
    pub osd_languages: Vec<String>,
    pub ocr_timeout: Duration,
    pub heuristic_language: String,
    pub heuristic_timeout: Duration,
    pub heuristic_min_score: usize,
    pub square_tolerance: f32,
    pub min_ocr_dimension: u32,
}

impl From<&PipelineConfig> for OrientationSettings {
    fn from(c: &PipelineConfig) -> Self {
        Self {
            osd_languages: c.osd_languages.clone(),
            ocr_timeout: c.ocr_timeout(),
            heuristic_language: c.heuristic_language.clone(),
            heuristic_timeout: c.heuristic_timeout(),
            heuristic_min_score: c.heuristic_min_score,
            square_tolerance: c.square_tolerance,
            min_ocr_dimension: c.min_ocr_dimension,
        }
    }
}

impl Default for OrientationSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// Which signal decided the final angle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrientationSource {
    Exif,
    TooSmall,
    Osd { language: Option<String> },
    Heuristic { score: usize },
    /// Nothing gave a usable answer; the image is unrotated.
    Undetermined,
}

/// Result of correcting one image.
pub struct Correction {
    pub image: DynamicImage,
    /// Clockwise degrees applied, one of 0, 90, 180, 270.
    pub angle: u32,
    pub source: OrientationSource,
    /// Set when detection failed outright.
    pub failure: Option<String>,
}

impl Correction {
    fn unrotated(image: DynamicImage, source: OrientationSource) -> Self {
        Self {
            image,
            angle: 0,
            source,
            failure: None,
        }
    }

    pub fn is_rotated(&self) -> bool {
        self.angle != 0
    }
}

impl fmt::Debug for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correction")
            .field("size", &(self.image.width(), self.image.height()))
            .field("angle", &self.angle)
            .field("source", &self.source)
            .field("failure", &self.failure)
            .finish()
    }
}

/// Detects and undoes page rotation using an [`OcrEngine`].
#[derive(Clone)]
pub struct OrientationCorrector {
    engine: Arc<dyn OcrEngine>,
    settings: OrientationSettings,
}

impl OrientationCorrector {
    pub fn new(engine: Arc<dyn OcrEngine>, settings: OrientationSettings) -> Self {
        Self { engine, settings }
    }

    pub fn settings(&self) -> &OrientationSettings {
        &self.settings
    }

    /// Return `image` upright. `exif` is the EXIF orientation tag, if any.
    pub async fn correct(&self, image: DynamicImage, exif: Option<u32>, name: &str) -> Correction {
        if exif == Some(1) {
            debug!("{}: EXIF orientation is normal", name);
            return Correction::unrotated(image, OrientationSource::Exif);
        }

        let (w, h) = (image.width(), image.height());
        let min = self.settings.min_ocr_dimension;
        if w < min || h < min {
            debug!("{}: {}x{} is below OCR minimum {}, kept as-is", name, w, h, min);
            return Correction::unrotated(image, OrientationSource::TooSmall);
        }

        let osd_error = match self.detect_osd(&image, name).await {
            Ok((0, language)) => {
                return Correction::unrotated(image, OrientationSource::Osd { language });
            }
            Ok((angle, language)) => {
                info!("{}: OSD says rotate {}°", name, angle);
                return match rotate_off_thread(&image, angle).await {
                    Some(rotated) => Correction {
                        image: rotated,
                        angle,
                        source: OrientationSource::Osd { language },
                        failure: None,
                    },
                    None => Correction {
                        failure: Some(format!("rotation by {angle}° failed")),
                        ..Correction::unrotated(image, OrientationSource::Undetermined)
                    },
                };
            }
            Err(e) => e,
        };

        warn!("{}: orientation detection failed ({}), trying heuristic", name, osd_error);

        if is_near_square(w, h, self.settings.square_tolerance) {
            debug!("{}: near-square page, heuristic skipped", name);
            return Correction {
                failure: Some(osd_error),
                ..Correction::unrotated(image, OrientationSource::Undetermined)
            };
        }

        match self.heuristic(&image, name).await {
            Some((angle, score, rotated)) => {
                info!("{}: heuristic picked {}° (score {})", name, angle, score);
                Correction {
                    image: rotated,
                    angle,
                    source: OrientationSource::Heuristic { score },
                    failure: None,
                }
            }
            None => Correction {
                failure: Some(osd_error),
                ..Correction::unrotated(image, OrientationSource::Undetermined)
            },
        }
    }

    /// Run OSD over the language chain. The error is a summary of every attempt.
    async fn detect_osd(
        &self,
        image: &DynamicImage,
        name: &str,
    ) -> Result<(u32, Option<String>), String> {
        let attempts = self
            .settings
            .osd_languages
            .iter()
            .map(|l| Some(l.as_str()))
            .chain(std::iter::once(None));

        let mut errors = Vec::new();
        for language in attempts {
            let call = self.engine.detect_orientation(image, language);
            let result = with_timeout(self.settings.ocr_timeout, call)
                .await
                .and_then(|angle| match angle {
                    0 | 90 | 180 | 270 => Ok(angle),
                    other => Err(OcrError::Unparseable(format!("angle {other}"))),
                });
            match result {
                Ok(angle) => return Ok((angle, language.map(str::to_string))),
                Err(e) => {
                    debug!(
                        "{}: OSD with language {:?} failed: {}",
                        name,
                        language.unwrap_or("<none>"),
                        e
                    );
                    errors.push(format!("{}: {}", language.unwrap_or("default"), e));
                }
            }
        }
        Err(errors.join("; "))
    }

    /// Score the three non-trivial rotations; `None` if none clears the bar.
    ///
    /// Returns the winning angle, its score and the rotated image.
    async fn heuristic(
        &self,
        image: &DynamicImage,
        name: &str,
    ) -> Option<(u32, usize, DynamicImage)> {
        let mut best: Option<(u32, usize, DynamicImage)> = None;
        for angle in [90, 180, 270] {
            let Some(rotated) = rotate_off_thread(image, angle).await else {
                debug!("{}: rotation to {}° failed, not scored", name, angle);
                continue;
            };
            let call = self
                .engine
                .recognize_text(&rotated, &self.settings.heuristic_language);
            let score = match with_timeout(self.settings.heuristic_timeout, call).await {
                Ok(text) => alphanumeric_score(&text),
                Err(e) => {
                    debug!("{}: recognition at {}° failed: {}", name, angle, e);
                    0
                }
            };
            debug!("{}: {}° scores {}", name, angle, score);
            if best.as_ref().is_none_or(|(_, s, _)| score > *s) {
                best = Some((angle, score, rotated));
            }
        }
        best.filter(|(_, score, _)| *score > self.settings.heuristic_min_score)
    }
}

async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, OcrError>>,
) -> Result<T, OcrError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(OcrError::Timeout(limit)))
}

/// Read the EXIF orientation tag (1..=8) from encoded image bytes.
pub fn read_exif_orientation(bytes: &[u8]) -> Option<u32> {
    let mut cursor = Cursor::new(bytes);
    let data = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    data.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
}

/// [`rotate_clockwise`] on a copy of `image`, on the blocking pool.
///
/// `None` only if the blocking task died.
async fn rotate_off_thread(image: &DynamicImage, angle: u32) -> Option<DynamicImage> {
    let copy = image.clone();
    tokio::task::spawn_blocking(move || rotate_clockwise(copy, angle))
        .await
        .ok()
}

/// Rotate clockwise by a right angle. Other angles leave the image as-is.
pub fn rotate_clockwise(image: DynamicImage, angle: u32) -> DynamicImage {
    match angle {
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        _ => image,
    }
}

/// `|w - h| < tolerance * min(w, h)`.
pub fn is_near_square(width: u32, height: u32, tolerance: f32) -> bool {
    let diff = width.abs_diff(height) as f32;
    diff < width.min(height) as f32 * tolerance
}

/// `<sanitised stem>_corrected.png`, always a single path component.
pub fn corrected_file_name(stem: &str) -> String {
    format!("{}_corrected.png", sanitize_name(stem))
}

/// Write the corrected raster next to the upload it was derived from.
pub fn persist_corrected(
    dir: &Path,
    stem: &str,
    image: &DynamicImage,
) -> Result<PathBuf, image::ImageError> {
    let path = dir.join(corrected_file_name(stem));
    write_png(image, &path)?;
    Ok(path)
}
