use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::{imageops, RgbaImage};
use imageproc::contrast::equalize_histogram;
use tracing::{info, warn};

use crate::core::errors::PipelineError;
use crate::detection::transform::{ImageCodec, PixelCodec, WorkingImage};

/// Local contrast equalization, as an external capability.
///
/// Takes an image file and returns the path of a new, enhanced file.
pub trait ContrastCapability {
    fn enhance(&self, path: &Path) -> impl Future<Output = anyhow::Result<PathBuf>>;
}

/// Global luminance histogram equalization on top of `imageproc`.
///
/// One histogram covers the whole image; there is no tiling and no clip
/// limit. Colour is kept by scaling each pixel's RGB by its luminance gain.
/// Output is written next to the input as `<stem>_equalized.png`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistogramEqualizer {
    codec: ImageCodec,
}

impl HistogramEqualizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn enhance_file(&self, path: &Path) -> anyhow::Result<PathBuf> {
        let pixels = self.codec.decode(path)?;
        let enhanced = equalize_luminance(&pixels);

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("Image path has no usable file name")?;
        let output = path.with_file_name(format!("{}_equalized.png", stem));
        self.codec.encode(&enhanced, &output)?;
        Ok(output)
    }
}

impl ContrastCapability for HistogramEqualizer {
    async fn enhance(&self, path: &Path) -> anyhow::Result<PathBuf> {
        let this = *self;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || this.enhance_file(&path))
            .await
            .context("Contrast enhancement task panicked")?
    }
}

pub fn equalize_luminance(image: &RgbaImage) -> RgbaImage {
    let luma = imageops::grayscale(image);
    let equalized = equalize_histogram(&luma);

    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let before = luma.get_pixel(x, y)[0];
        let after = equalized.get_pixel(x, y)[0];
        if before == 0 {
            pixel[0] = after;
            pixel[1] = after;
            pixel[2] = after;
            continue;
        }
        let gain = after as f32 / before as f32;
        for c in 0..3 {
            pixel[c] = (pixel[c] as f32 * gain).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Result of the contrast step; never fatal.
#[derive(Debug)]
pub enum Enhancement {
    Applied(WorkingImage),
    /// Capability failed; the pre-enhancement image is handed back untouched
    Skipped {
        image: WorkingImage,
        error: PipelineError,
    },
}

impl Enhancement {
    pub fn into_image(self) -> WorkingImage {
        match self {
            Enhancement::Applied(image) => image,
            Enhancement::Skipped { image, .. } => image,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Enhancement::Applied(_))
    }
}

pub struct ContrastEnhancer<'a, E> {
    capability: &'a E,
}

impl<'a, E: ContrastCapability> ContrastEnhancer<'a, E> {
    pub fn new(capability: &'a E) -> Self {
        Self { capability }
    }

    /// The input file is only released after the capability has produced
    /// its replacement.
    pub async fn apply(&self, input: WorkingImage) -> Enhancement {
        match self.capability.enhance(input.path()).await {
            Ok(path) => {
                info!(path = %path.display(), "Contrast enhancement applied");
                if path != input.path() {
                    input.release();
                }
                Enhancement::Applied(WorkingImage::temporary(path))
            }
            Err(source) => {
                let error = PipelineError::Enhancement {
                    path: input.path().to_path_buf(),
                    source,
                };
                warn!(error = %error, "Continuing with the pre-enhancement image");
                Enhancement::Skipped { image: input, error }
            }
        }
    }
}
