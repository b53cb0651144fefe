use image::RgbImage;

/// Detector input side length
pub const DETECTOR_INPUT_SIZE: u32 = 640;
/// Classifier input side length
pub const CLASSIFIER_INPUT_SIZE: u32 = 224;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Per model family normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// `[0, 255]` to `[0, 1]`
    Detector,
    /// `[0, 1]` followed by ImageNet mean/std standardization
    Classifier,
}

impl Normalization {
    fn apply(self, value: u8, channel: usize) -> f32 {
        let scaled = value as f32 / 255.0;
        match self {
            Normalization::Detector => scaled,
            Normalization::Classifier => (scaled - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel],
        }
    }
}

/// Float32 `[1, 3, H, W]` tensor, channels R, G, B.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedTensor {
    pub shape: [usize; 4],
    pub data: Vec<f32>,
}

impl PreprocessedTensor {
    pub fn height(&self) -> usize {
        self.shape[2]
    }

    pub fn width(&self) -> usize {
        self.shape[3]
    }

    /// Value at channel `c`, row `y`, column `x`
    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        let plane = self.height() * self.width();
        self.data[c * plane + y * self.width() + x]
    }
}

/// Build a CHW tensor of `target` size from `image`.
///
/// The image is copied into the top-left corner; any area it does not cover
/// stays zero and anything beyond the target is ignored.
pub fn to_tensor(image: &RgbImage, target: (u32, u32), norm: Normalization) -> PreprocessedTensor {
    let (target_w, target_h) = (target.0 as usize, target.1 as usize);
    let plane = target_w * target_h;
    let mut data = vec![0.0f32; 3 * plane];

    let copy_w = (image.width() as usize).min(target_w);
    let copy_h = (image.height() as usize).min(target_h);

    for y in 0..copy_h {
        for x in 0..copy_w {
            let pixel = image.get_pixel(x as u32, y as u32);
            let idx = y * target_w + x;
            for c in 0..3 {
                data[c * plane + idx] = norm.apply(pixel[c], c);
            }
        }
    }

    PreprocessedTensor {
        shape: [1, 3, target_h, target_w],
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn detector_scales_to_unit_range() {
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 51]));
        let t = to_tensor(&img, (2, 2), Normalization::Detector);
        assert_eq!(t.shape, [1, 3, 2, 2]);
        assert_eq!(t.at(0, 1, 1), 1.0);
        assert_eq!(t.at(1, 0, 0), 0.0);
        assert!((t.at(2, 0, 1) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn classifier_applies_imagenet_standardization() {
        let img = RgbImage::from_pixel(1, 1, Rgb([255, 255, 0]));
        let t = to_tensor(&img, (1, 1), Normalization::Classifier);
        let expected_r = (1.0 - 0.485) / 0.229;
        let expected_g = (1.0 - 0.456) / 0.224;
        let expected_b = (0.0 - 0.406) / 0.225;
        assert!((t.at(0, 0, 0) - expected_r).abs() < 1e-5);
        assert!((t.at(1, 0, 0) - expected_g).abs() < 1e-5);
        assert!((t.at(2, 0, 0) - expected_b).abs() < 1e-5);
    }

    #[test]
    fn layout_is_channel_planar() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 1, Rgb([10, 20, 30]));
        let t = to_tensor(&img, (3, 2), Normalization::Detector);
        // plane = 6, index of (y=1, x=2) = 5
        assert!((t.data[5] - 10.0 / 255.0).abs() < 1e-6);
        assert!((t.data[6 + 5] - 20.0 / 255.0).abs() < 1e-6);
        assert!((t.data[12 + 5] - 30.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn smaller_image_is_zero_padded_bottom_right() {
        let img = RgbImage::from_pixel(2, 1, Rgb([255, 255, 255]));
        let t = to_tensor(&img, (4, 4), Normalization::Detector);
        assert_eq!(t.data.len(), 3 * 16);
        assert_eq!(t.at(0, 0, 1), 1.0);
        assert_eq!(t.at(0, 0, 2), 0.0);
        assert_eq!(t.at(0, 3, 3), 0.0);
    }
}
