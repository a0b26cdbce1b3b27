use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::geometric_transformations::{Interpolation, warp};
use imageproc::noise::gaussian_noise_mut;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::geometry::{Affine, transform_box};
use crate::plate::BoundingBox;

/// Parameter ranges an operator is sampled from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum OpSpec {
    GaussianBlur {
        sigma: (f32, f32),
    },
    AverageBlur {
        kernel: (u32, u32),
    },
    MedianBlur {
        kernel: (u32, u32),
    },
    Contrast {
        alpha: (f32, f32),
    },
    GaussianNoise {
        scale: (f32, f32),
        per_channel: f64,
    },
    Multiply {
        factor: (f32, f32),
        per_channel: f64,
    },
    Add {
        value: (f32, f32),
        per_channel: f64,
    },
    Dropout {
        p: (f32, f32),
        per_channel: f64,
    },
    Affine {
        rotate: (f32, f32),
        shear: (f32, f32),
        scale_x: (f32, f32),
        scale_y: (f32, f32),
    },
    Fog {
        density: (f32, f32),
    },
}

/// One operator with every random parameter already drawn.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Op {
    GaussianBlur { sigma: f32 },
    AverageBlur { kernel: u32 },
    MedianBlur { kernel: u32 },
    Contrast { alpha: f32 },
    GaussianNoise { scale: f32, per_channel: bool, seed: u64 },
    Multiply { factors: [f32; 3] },
    Add { values: [f32; 3] },
    Dropout { p: f32, per_channel: bool, seed: u64 },
    Affine { rotate: f32, shear: f32, scale: (f32, f32) },
    Fog { density: f32, seed: u64 },
}

impl OpSpec {
    pub(crate) fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Op {
        match *self {
            OpSpec::GaussianBlur { sigma } => Op::GaussianBlur {
                sigma: uniform(rng, sigma),
            },
            OpSpec::AverageBlur { kernel } => Op::AverageBlur {
                kernel: uniform_u32(rng, kernel).max(1),
            },
            OpSpec::MedianBlur { kernel } => Op::MedianBlur {
                kernel: odd_in_range(uniform_u32(rng, kernel), kernel),
            },
            OpSpec::Contrast { alpha } => Op::Contrast {
                alpha: uniform(rng, alpha),
            },
            OpSpec::GaussianNoise { scale, per_channel } => Op::GaussianNoise {
                scale: uniform(rng, scale),
                per_channel: rng.gen_bool(per_channel),
                seed: rng.r#gen(),
            },
            OpSpec::Multiply {
                factor,
                per_channel,
            } => Op::Multiply {
                factors: channel_values(rng, factor, per_channel),
            },
            OpSpec::Add { value, per_channel } => Op::Add {
                values: channel_values(rng, value, per_channel),
            },
            OpSpec::Dropout { p, per_channel } => Op::Dropout {
                p: uniform(rng, p).clamp(0.0, 1.0),
                per_channel: rng.gen_bool(per_channel),
                seed: rng.r#gen(),
            },
            OpSpec::Affine {
                rotate,
                shear,
                scale_x,
                scale_y,
            } => Op::Affine {
                rotate: uniform(rng, rotate),
                shear: uniform(rng, shear),
                scale: (uniform(rng, scale_x), uniform(rng, scale_y)),
            },
            OpSpec::Fog { density } => Op::Fog {
                density: uniform(rng, density).clamp(0.0, 1.0),
                seed: rng.r#gen(),
            },
        }
    }
}

impl Op {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Op::GaussianBlur { .. } => "gaussian-blur",
            Op::AverageBlur { .. } => "average-blur",
            Op::MedianBlur { .. } => "median-blur",
            Op::Contrast { .. } => "contrast",
            Op::GaussianNoise { .. } => "gaussian-noise",
            Op::Multiply { .. } => "multiply",
            Op::Add { .. } => "add",
            Op::Dropout { .. } => "dropout",
            Op::Affine { .. } => "affine",
            Op::Fog { .. } => "fog",
        }
    }

    /// Pixel-space transform for affine ops, pivoting on the image centre.
    pub(crate) fn affine(&self, width: u32, height: u32) -> Option<Affine> {
        let Op::Affine {
            rotate,
            shear,
            scale,
        } = *self
        else {
            return None;
        };
        let local = Affine::rotation(rotate)
            .compose(&Affine::shear_x(shear))
            .compose(&Affine::scale(scale.0, scale.1));
        Some(local.about(width as f32 / 2.0, height as f32 / 2.0))
    }

    pub(crate) fn apply_boxes(
        &self,
        boxes: Vec<BoundingBox>,
        width: u32,
        height: u32,
    ) -> Vec<BoundingBox> {
        match self.affine(width, height) {
            Some(affine) => boxes
                .iter()
                .map(|bbox| transform_box(bbox, &affine))
                .collect(),
            None => boxes,
        }
    }

    pub(crate) fn apply_image(&self, image: RgbImage) -> RgbImage {
        match *self {
            // Smaller sigmas are visually a no-op.
            Op::GaussianBlur { sigma } if sigma < 0.01 => image,
            Op::GaussianBlur { sigma } => gaussian_blur_f32(&image, sigma),
            Op::AverageBlur { kernel } => box_blur(&image, kernel),
            Op::MedianBlur { kernel } => {
                let radius = kernel / 2;
                median_filter(&image, radius, radius)
            }
            Op::Contrast { alpha } => map_values(image, |_, v| 128.0 + alpha * (v - 128.0)),
            Op::GaussianNoise {
                scale,
                per_channel,
                seed,
            } => add_noise(image, scale, per_channel, seed),
            Op::Multiply { factors } => map_values(image, |c, v| v * factors[c]),
            Op::Add { values } => map_values(image, |c, v| v + values[c]),
            Op::Dropout {
                p,
                per_channel,
                seed,
            } => dropout(image, p, per_channel, seed),
            Op::Affine { .. } => {
                let (width, height) = image.dimensions();
                match self
                    .affine(width, height)
                    .and_then(|affine| affine.to_projection())
                {
                    Some(projection) => {
                        warp(&image, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]))
                    }
                    None => image,
                }
            }
            Op::Fog { density, seed } => fog(image, density, seed),
        }
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, (lo, hi): (f32, f32)) -> f32 {
    if lo >= hi { lo } else { rng.gen_range(lo..=hi) }
}

fn uniform_u32<R: Rng + ?Sized>(rng: &mut R, (lo, hi): (u32, u32)) -> u32 {
    if lo >= hi { lo } else { rng.gen_range(lo..=hi) }
}

fn odd_in_range(value: u32, (lo, hi): (u32, u32)) -> u32 {
    if value % 2 == 1 {
        value
    } else if value + 1 <= hi.max(lo) {
        value + 1
    } else {
        value.saturating_sub(1).max(1)
    }
}

fn channel_values<R: Rng + ?Sized>(rng: &mut R, range: (f32, f32), per_channel: f64) -> [f32; 3] {
    if rng.gen_bool(per_channel) {
        [uniform(rng, range), uniform(rng, range), uniform(rng, range)]
    } else {
        let value = uniform(rng, range);
        [value; 3]
    }
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn map_values<F>(mut image: RgbImage, func: F) -> RgbImage
where
    F: Fn(usize, f32) -> f32,
{
    for pixel in image.pixels_mut() {
        for (channel, value) in pixel.0.iter_mut().enumerate() {
            *value = to_u8(func(channel, *value as f32));
        }
    }
    image
}

/// Mean over a `kernel x kernel` window, clamping at the edges.
fn box_blur(image: &RgbImage, kernel: u32) -> RgbImage {
    if kernel <= 1 {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    let before = (kernel / 2) as i64;
    let after = (kernel - 1) as i64 - before;
    let clamp = |value: i64, max: u32| value.clamp(0, max as i64 - 1) as u32;

    let mut horizontal = vec![[0f32; 3]; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let mut sum = [0f32; 3];
            for dx in -before..=after {
                let sample = image.get_pixel(clamp(x as i64 + dx, width), y);
                for c in 0..3 {
                    sum[c] += sample[c] as f32;
                }
            }
            horizontal[(y * width + x) as usize] = sum;
        }
    }

    let area = (kernel * kernel) as f32;
    RgbImage::from_fn(width, height, |x, y| {
        let mut sum = [0f32; 3];
        for dy in -before..=after {
            let row = clamp(y as i64 + dy, height);
            let sample = horizontal[(row * width + x) as usize];
            for c in 0..3 {
                sum[c] += sample[c];
            }
        }
        Rgb([to_u8(sum[0] / area), to_u8(sum[1] / area), to_u8(sum[2] / area)])
    })
}

fn standard_normal(rng: &mut StdRng) -> f32 {
    // Box-Muller; u1 is kept away from zero for the logarithm.
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

fn add_noise(mut image: RgbImage, scale: f32, per_channel: bool, seed: u64) -> RgbImage {
    if scale <= 0.0 {
        return image;
    }
    if per_channel {
        gaussian_noise_mut(&mut image, 0.0, f64::from(scale), seed);
        return image;
    }
    // One draw per pixel, added to all three channels.
    let mut rng = StdRng::seed_from_u64(seed);
    for pixel in image.pixels_mut() {
        let noise = standard_normal(&mut rng) * scale;
        for value in pixel.0.iter_mut() {
            *value = to_u8(*value as f32 + noise);
        }
    }
    image
}

fn dropout(mut image: RgbImage, p: f32, per_channel: bool, seed: u64) -> RgbImage {
    if p <= 0.0 {
        return image;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let p = f64::from(p);
    for pixel in image.pixels_mut() {
        if per_channel {
            for value in pixel.0.iter_mut() {
                if rng.gen_bool(p) {
                    *value = 0;
                }
            }
        } else if rng.gen_bool(p) {
            *pixel = Rgb([0, 0, 0]);
        }
    }
    image
}

/// Blends toward a light grey through a smooth random density field.
fn fog(mut image: RgbImage, density: f32, seed: u64) -> RgbImage {
    let (width, height) = image.dimensions();
    if density <= 0.0 || width == 0 || height == 0 {
        return image;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let coarse = GrayImage::from_fn(8, 4, |_, _| Luma([rng.gen_range(0u8..=255)]));
    let field = imageops::resize(&coarse, width, height, FilterType::Triangle);
    let tint = rng.gen_range(200.0..=235.0f32);

    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let local = field.get_pixel(x, y)[0] as f32 / 255.0;
        let alpha = density * (0.5 + 0.5 * local);
        for value in pixel.0.iter_mut() {
            *value = to_u8(*value as f32 * (1.0 - alpha) + tint * alpha);
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient() -> RgbImage {
        RgbImage::from_fn(40, 20, |x, y| Rgb([(x * 6) as u8, (y * 12) as u8, 128]))
    }

    #[test]
    fn sampled_parameters_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            match (OpSpec::MedianBlur { kernel: (3, 11) }).sample(&mut rng) {
                Op::MedianBlur { kernel } => {
                    assert!(kernel % 2 == 1 && (3..=11).contains(&kernel))
                }
                other => panic!("unexpected {other:?}"),
            }
            match (OpSpec::Contrast { alpha: (0.75, 1.9) }).sample(&mut rng) {
                Op::Contrast { alpha } => assert!((0.75..=1.9).contains(&alpha)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn non_geometric_ops_keep_boxes_and_size() {
        let boxes = vec![BoundingBox::new(1.0, 2.0, 5.0, 9.0, "7")];
        let ops = [
            Op::GaussianBlur { sigma: 1.5 },
            Op::AverageBlur { kernel: 4 },
            Op::MedianBlur { kernel: 3 },
            Op::Contrast { alpha: 1.4 },
            Op::GaussianNoise {
                scale: 12.0,
                per_channel: true,
                seed: 9,
            },
            Op::Multiply {
                factors: [0.5, 1.0, 1.2],
            },
            Op::Add {
                values: [-10.0, 0.0, 10.0],
            },
            Op::Dropout {
                p: 0.1,
                per_channel: false,
                seed: 3,
            },
            Op::Fog {
                density: 0.4,
                seed: 1,
            },
        ];
        for op in ops {
            assert_eq!(op.apply_boxes(boxes.clone(), 40, 20), boxes, "{}", op.name());
            assert_eq!(op.apply_image(gradient()).dimensions(), (40, 20));
        }
    }

    #[test]
    fn seeded_noise_is_repeatable() {
        let op = Op::GaussianNoise {
            scale: 20.0,
            per_channel: false,
            seed: 42,
        };
        let grey = RgbImage::from_pixel(40, 20, Rgb([128, 128, 128]));
        let first = op.apply_image(grey.clone());
        assert_eq!(first, op.apply_image(grey.clone()));
        assert_ne!(first, grey);
        // Shared noise moves every channel of a pixel by the same amount.
        assert!(first.pixels().all(|pixel| pixel[0] == pixel[1] && pixel[1] == pixel[2]));

        let per_channel = Op::GaussianNoise {
            scale: 20.0,
            per_channel: true,
            seed: 42,
        }
        .apply_image(grey.clone());
        assert!(per_channel.pixels().any(|pixel| pixel[0] != pixel[1]));
        assert_eq!(per_channel, imageproc::noise::gaussian_noise(&grey, 0.0, 20.0, 42));
    }

    #[test]
    fn multiply_and_contrast_map_values() {
        let image = RgbImage::from_pixel(2, 2, Rgb([100, 200, 128]));
        let doubled = Op::Multiply {
            factors: [2.0, 2.0, 0.5],
        }
        .apply_image(image.clone());
        assert_eq!(doubled.get_pixel(0, 0), &Rgb([200, 255, 64]));

        let flattened = Op::Contrast { alpha: 0.5 }.apply_image(image);
        assert_eq!(flattened.get_pixel(1, 1), &Rgb([114, 164, 128]));
    }

    #[test]
    fn box_blur_averages_a_uniform_image_to_itself() {
        let image = RgbImage::from_pixel(9, 5, Rgb([40, 80, 120]));
        assert_eq!(box_blur(&image, 5), image);
    }

    #[test]
    fn affine_moves_boxes_with_the_image() {
        let op = Op::Affine {
            rotate: 0.0,
            shear: 0.0,
            scale: (0.5, 0.5),
        };
        let boxes = vec![BoundingBox::new(0.0, 0.0, 40.0, 20.0, "plate")];
        let moved = op.apply_boxes(boxes, 40, 20);
        assert_eq!(moved, vec![BoundingBox::new(10.0, 5.0, 30.0, 15.0, "plate")]);
        let warped = op.apply_image(gradient());
        assert_eq!(warped.dimensions(), (40, 20));
        assert_eq!(warped.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }
}
