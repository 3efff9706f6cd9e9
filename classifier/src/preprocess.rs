//! Deterministic image to tensor transform.
//!
//! The transform has to reproduce, value for value, the input pipeline the
//! classifier was trained with:
//!
//! 1. decode and coerce to 8-bit RGB,
//! 2. resize to `size x size` (aspect ratio is not preserved),
//! 3. scale to `[0, 1]` by dividing by 255,
//! 4. reorder from interleaved `(H, W, C)` to planar `(C, H, W)`,
//! 5. normalize each channel with the ImageNet [`MEAN`] and [`STD`],
//! 6. prepend a batch dimension of 1.

use image::{DynamicImage, RgbImage, imageops::FilterType};

use crate::error::PipelineError;

/// Side length, in pixels, of the square image the model expects.
pub const IMAGE_SIZE: u32 = 512;

/// Per-channel means, in RGB order.
pub const MEAN: [f64; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviations, in RGB order.
pub const STD: [f64; 3] = [0.229, 0.224, 0.225];

const CHANNELS: usize = 3;

/// A `(1, 3, H, W)` tensor of normalized `f32` pixel values, channels in RGB
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl ImageTensor {
    /// Wraps planar pixel data. `data` must hold exactly `3 * height * width`
    /// values.
    pub fn new(height: usize, width: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == CHANNELS * height * width).then_some(Self {
            shape: [1, CHANNELS, height, width],
            data,
        })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Value at channel `c`, row `y`, column `x` of the single batch entry,
    /// or `None` if any coordinate is out of range.
    pub fn at(&self, c: usize, y: usize, x: usize) -> Option<f32> {
        let [_, channels, height, width] = self.shape;
        if c >= channels || y >= height || x >= width {
            return None;
        }
        self.data.get(c * height * width + y * width + x).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessor {
    size: u32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(IMAGE_SIZE)
    }
}

impl Preprocessor {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Decodes raw upload bytes and turns them into the model input.
    pub fn preprocess(&self, bytes: &[u8]) -> Result<ImageTensor, PipelineError> {
        let image = decode(bytes)?;
        Ok(self.to_tensor(&image))
    }

    /// Resizes, rescales and normalizes an already decoded image.
    pub fn to_tensor(&self, image: &DynamicImage) -> ImageTensor {
        let rgb = image.to_rgb8();
        // Bicubic, like the default resampling of the training pipeline.
        let resized = image::imageops::resize(&rgb, self.size, self.size, FilterType::CatmullRom);
        planar_normalized(&resized)
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    let image =
        image::load_from_memory(bytes).map_err(|e| PipelineError::InvalidImage(e.to_string()))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::InvalidImage("image has no pixels".into()));
    }
    Ok(image)
}

fn planar_normalized(image: &RgbImage) -> ImageTensor {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let plane = width * height;
    let mut data = vec![0f32; CHANNELS * plane];
    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        for c in 0..CHANNELS {
            let scaled = f64::from(f32::from(pixel[c]) / 255.0);
            data[c * plane + offset] = ((scaled - MEAN[c]) / STD[c]) as f32;
        }
    }
    ImageTensor {
        shape: [1, CHANNELS, height, width],
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{encode_png, solid_png};
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use rstest::rstest;

    fn normalized(value: u8, channel: usize) -> f32 {
        ((f64::from(f32::from(value) / 255.0) - MEAN[channel]) / STD[channel]) as f32
    }

    #[test]
    fn red_image_normalizes_per_channel() {
        let tensor = Preprocessor::new(8)
            .preprocess(&solid_png(20, 10, [255, 0, 0]))
            .unwrap();
        assert_eq!(tensor.shape(), [1, 3, 8, 8]);
        assert_eq!(tensor.data().len(), 3 * 8 * 8);
        for y in 0..8 {
            for x in 0..8 {
                assert!((tensor.at(0, y, x).unwrap() - 2.248_908).abs() < 1e-5);
                assert!((tensor.at(1, y, x).unwrap() - -2.035_714).abs() < 1e-5);
                assert!((tensor.at(2, y, x).unwrap() - -1.804_444).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn default_size_matches_model_contract() {
        let tensor = Preprocessor::default()
            .preprocess(&solid_png(512, 512, [255, 0, 0]))
            .unwrap();
        assert_eq!(tensor.shape(), [1, 3, 512, 512]);
    }

    #[test]
    fn output_is_planar_rgb() {
        // left half red, right half blue
        let image = RgbImage::from_fn(4, 4, |x, _| {
            if x < 2 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        let tensor = Preprocessor::new(4).preprocess(&encode_png(&image.into())).unwrap();
        for y in 0..4 {
            assert_eq!(tensor.at(0, y, 0).unwrap(), normalized(255, 0));
            assert_eq!(tensor.at(2, y, 0).unwrap(), normalized(0, 2));
            assert_eq!(tensor.at(0, y, 3).unwrap(), normalized(0, 0));
            assert_eq!(tensor.at(2, y, 3).unwrap(), normalized(255, 2));
        }
    }

    #[test]
    fn downscale_is_bicubic() {
        // constant along y, so only the horizontal 8 -> 4 pass changes values
        const ROW: [u8; 8] = [0, 40, 200, 90, 255, 30, 120, 180];
        // Catmull-Rom (support 2, widened by the scale ratio) over ROW;
        // a triangle filter gives [45.7, 145.6, 133.1, 132.9] and nearest
        // neighbour picks raw samples
        const BICUBIC: [f64; 4] = [36.255, 154.884, 131.988, 132.238];

        let image = RgbImage::from_fn(8, 4, |x, _| {
            Rgb([ROW[x as usize], ROW[7 - x as usize], 128])
        });
        let tensor = Preprocessor::new(4).preprocess(&encode_png(&image.into())).unwrap();

        let pixel = |c: usize, y: usize, x: usize| {
            (f64::from(tensor.at(c, y, x).unwrap()) * STD[c] + MEAN[c]) * 255.0
        };
        for y in 0..4 {
            for x in 0..4 {
                let red = pixel(0, y, x);
                let green = pixel(1, y, x);
                assert!((red - BICUBIC[x]).abs() <= 1.0, "red at ({x}, {y}): {red}");
                assert!(
                    (green - BICUBIC[3 - x]).abs() <= 1.0,
                    "green at ({x}, {y}): {green}"
                );
                assert!((pixel(2, y, x) - 128.0).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn at_is_bounds_checked() {
        let tensor = Preprocessor::new(4)
            .preprocess(&solid_png(4, 4, [255, 0, 0]))
            .unwrap();
        assert!(tensor.at(2, 3, 3).is_some());
        assert_eq!(tensor.at(3, 0, 0), None);
        assert_eq!(tensor.at(0, 4, 0), None);
        // would alias the next row if only the flat index were checked
        assert_eq!(tensor.at(0, 0, 4), None);
    }

    #[test]
    fn grayscale_is_coerced_to_rgb() {
        let image = GrayImage::from_pixel(6, 6, Luma([128]));
        let tensor = Preprocessor::new(6).preprocess(&encode_png(&image.into())).unwrap();
        assert_eq!(tensor.shape(), [1, 3, 6, 6]);
        for c in 0..3 {
            assert_eq!(tensor.at(c, 3, 3).unwrap(), normalized(128, c));
        }
    }

    #[test]
    fn values_stay_in_normalized_range() {
        let image = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 255]));
        let tensor = Preprocessor::new(16).preprocess(&encode_png(&image.into())).unwrap();
        assert!(tensor.data().iter().all(|v| (-2.2..=2.7).contains(v)));
    }

    #[test]
    fn is_deterministic() {
        let bytes = solid_png(33, 17, [12, 200, 99]);
        let preprocessor = Preprocessor::new(16);
        assert_eq!(
            preprocessor.preprocess(&bytes).unwrap(),
            preprocessor.preprocess(&bytes).unwrap()
        );
    }

    #[rstest]
    #[case::text(b"definitely not an image".to_vec())]
    #[case::empty(Vec::new())]
    #[case::truncated_png(solid_png(8, 8, [1, 2, 3])[..20].to_vec())]
    fn undecodable_bytes_are_invalid_images(#[case] bytes: Vec<u8>) {
        let err = Preprocessor::new(8).preprocess(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)), "{err:?}");
        assert!(err.is_client_error());
    }
}
