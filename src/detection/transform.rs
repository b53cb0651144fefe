use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use tempdir::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::errors::{PipelineError, PipelineResult};
use crate::models::RegionOfInterest;

/// Decodes image files to RGBA pixels and writes them back.
pub trait PixelCodec: Send + Sync {
    fn decode(&self, path: &Path) -> anyhow::Result<RgbaImage>;
    fn encode(&self, image: &RgbaImage, path: &Path) -> anyhow::Result<()>;
}

/// [`PixelCodec`] on the `image` crate; always writes PNG so intermediate
/// steps are lossless.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl PixelCodec for ImageCodec {
    fn decode(&self, path: &Path) -> anyhow::Result<RgbaImage> {
        let img = image::open(path).with_context(|| format!("Failed to open image {:?}", path))?;
        Ok(img.to_rgba8())
    }

    fn encode(&self, image: &RgbaImage, path: &Path) -> anyhow::Result<()> {
        image
            .save_with_format(path, ImageFormat::Png)
            .with_context(|| format!("Failed to write image {:?}", path))
    }
}

/// The pipeline's current image file.
///
/// Not `Clone`: exactly one holder at a time. The caller's source photo is
/// never deleted; temporaries are deleted by whoever produces their successor.
#[derive(Debug)]
pub struct WorkingImage {
    path: PathBuf,
    owned: bool,
}

impl WorkingImage {
    /// Wrap the caller-owned source image
    pub fn source(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owned: false,
        }
    }

    /// Wrap a file the pipeline created
    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owned: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.owned
    }

    /// Delete the file if the pipeline owns it. Failure is only logged.
    pub fn release(self) {
        if !self.owned {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Deleted superseded working image"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to delete working image"),
        }
    }
}

/// Per-run scratch directory, removed when dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new_in(parent: &Path) -> std::io::Result<Self> {
        Ok(Self {
            dir: TempDir::new_in(parent, "deeptest_run")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Fresh, unused file name inside the workspace
    pub fn new_file(&self, extension: &str) -> PathBuf {
        self.dir.path().join(format!("{}.{}", Uuid::new_v4(), extension))
    }
}

/// Copy out exactly `roi`. Zero-area regions and regions reaching past the
/// image (including ones whose far edge overflows `u32`) are rejected.
pub fn crop_image(image: &RgbaImage, roi: RegionOfInterest) -> PipelineResult<RgbaImage> {
    let right = roi.x.checked_add(roi.width);
    let bottom = roi.y.checked_add(roi.height);
    let in_bounds = matches!((right, bottom), (Some(r), Some(b)) if r <= image.width() && b <= image.height());
    if roi.is_empty() || !in_bounds {
        return Err(PipelineError::Crop { roi });
    }
    Ok(imageops::crop_imm(image, roi.x, roi.y, roi.width, roi.height).to_image())
}

/// Scale to fit inside `size`x`size` and center on a black square canvas.
pub fn letterbox_image(image: &RgbaImage, size: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut canvas = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 255]));
    if width == 0 || height == 0 {
        return canvas;
    }

    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let scaled_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let scaled_h = ((height as f32 * scale).round() as u32).clamp(1, size);

    let scaled = imageops::resize(image, scaled_w, scaled_h, imageops::FilterType::Lanczos3);

    let offset_x = (size - scaled_w) / 2;
    let offset_y = (size - scaled_h) / 2;
    imageops::overlay(&mut canvas, &scaled, offset_x.into(), offset_y.into());

    canvas
}

/// Crop and letterbox stages over working image files.
pub struct ImageTransformStage<'a> {
    codec: &'a dyn PixelCodec,
    workspace: &'a Workspace,
}

impl<'a> ImageTransformStage<'a> {
    pub fn new(codec: &'a dyn PixelCodec, workspace: &'a Workspace) -> Self {
        Self { codec, workspace }
    }

    pub fn crop(&self, input: WorkingImage, roi: RegionOfInterest) -> PipelineResult<WorkingImage> {
        let pixels = self.decode(&input)?;
        let cropped = crop_image(&pixels, roi)?;
        let output = self.write(&cropped)?;
        debug!(%roi, path = %output.path().display(), "Cropped region of interest");
        input.release();
        Ok(output)
    }

    pub fn letterbox(&self, input: WorkingImage, size: u32) -> PipelineResult<WorkingImage> {
        let pixels = self.decode(&input)?;
        let boxed = letterbox_image(&pixels, size);
        let output = self.write(&boxed)?;
        debug!(size, path = %output.path().display(), "Letterboxed working image");
        input.release();
        Ok(output)
    }

    fn decode(&self, image: &WorkingImage) -> PipelineResult<RgbaImage> {
        self.codec
            .decode(image.path())
            .map_err(|source| PipelineError::Decode {
                path: image.path().to_path_buf(),
                source,
            })
    }

    fn write(&self, pixels: &RgbaImage) -> PipelineResult<WorkingImage> {
        let path = self.workspace.new_file("png");
        self.codec
            .encode(pixels, &path)
            .map_err(|source| PipelineError::Decode {
                path: path.clone(),
                source,
            })?;
        Ok(WorkingImage::temporary(path))
    }
}
