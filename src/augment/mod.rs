mod geometry;
mod ops;

use anyhow::{Result, anyhow, bail};
use image::RgbImage;
use image::imageops::{self, FilterType};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::plate::BoundingBox;
use crate::settings::Settings;
use ops::{Op, OpSpec};

/// Transform applied to an image together with its boxes.
///
/// Implementations must draw their randomness once per call so that the image
/// and the boxes see the same transform.
pub trait Augmenter: Send + Sync {
    fn augment(
        &self,
        image: RgbImage,
        boxes: Vec<BoundingBox>,
        rng: &mut StdRng,
    ) -> Result<(RgbImage, Vec<BoundingBox>)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugmentProfile {
    Train,
    Test,
}

impl AugmentProfile {
    pub fn name(self) -> &'static str {
        match self {
            AugmentProfile::Train => "train",
            AugmentProfile::Test => "test",
        }
    }

    fn steps(self) -> &'static [Step] {
        match self {
            AugmentProfile::Train => TRAIN_STEPS,
            AugmentProfile::Test => TEST_STEPS,
        }
    }
}

impl fmt::Display for AugmentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AugmentProfile {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(AugmentProfile::Train),
            "test" => Ok(AugmentProfile::Test),
            other => Err(anyhow!(
                "unknown augmentation profile '{}' (expected train or test)",
                other
            )),
        }
    }
}

/// What happens to boxes that leave the frame after augmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipPolicy {
    Keep,
    Clip,
}

impl FromStr for ClipPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(ClipPolicy::Keep),
            "clip" => Ok(ClipPolicy::Clip),
            other => Err(anyhow!(
                "unknown clip policy '{}' (expected clip or keep)",
                other
            )),
        }
    }
}

/// Resize to `reference * s` before augmenting, `s` drawn from `scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeOptions {
    pub reference: (u32, u32),
    pub scale: (f32, f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AugmentOptions {
    pub profile: AugmentProfile,
    pub clip: ClipPolicy,
    pub resize: Option<ResizeOptions>,
}

impl AugmentOptions {
    pub fn from_settings(profile: AugmentProfile, settings: &Settings, resize: bool) -> Self {
        let clip = match profile {
            AugmentProfile::Train => settings.train_clip,
            AugmentProfile::Test => settings.test_clip,
        };
        let resize = resize.then_some(ResizeOptions {
            reference: settings.resize_reference,
            scale: settings.resize_scale,
        });
        Self {
            profile,
            clip,
            resize,
        }
    }
}

/// `Sometimes(probability, OneOf(choices))`.
#[derive(Debug)]
struct Step {
    probability: f64,
    choices: &'static [OpSpec],
}

const NO_SCALE: (f32, f32) = (1.0, 1.0);

const TRAIN_STEPS: &[Step] = &[
    Step {
        probability: 0.5,
        choices: &[
            OpSpec::GaussianBlur { sigma: (0.0, 3.0) },
            OpSpec::AverageBlur { kernel: (2, 7) },
            OpSpec::MedianBlur { kernel: (3, 11) },
        ],
    },
    Step {
        probability: 1.0,
        choices: &[OpSpec::Contrast { alpha: (0.75, 1.9) }],
    },
    Step {
        probability: 1.0,
        choices: &[OpSpec::GaussianNoise {
            scale: (0.0, 0.1 * 255.0),
            per_channel: 0.6,
        }],
    },
    Step {
        probability: 1.0,
        choices: &[OpSpec::Multiply {
            factor: (0.5, 1.2),
            per_channel: 0.2,
        }],
    },
    Step {
        probability: 0.5,
        choices: &[OpSpec::Affine {
            rotate: (-5.0, 5.0),
            shear: (-8.0, 8.0),
            scale_x: NO_SCALE,
            scale_y: NO_SCALE,
        }],
    },
    Step {
        probability: 0.5,
        choices: &[OpSpec::Affine {
            rotate: (-7.0, 7.0),
            shear: (-3.0, 3.0),
            scale_x: NO_SCALE,
            scale_y: NO_SCALE,
        }],
    },
    Step {
        probability: 0.5,
        choices: &[OpSpec::Affine {
            rotate: (0.0, 0.0),
            shear: (0.0, 0.0),
            scale_x: (0.4, 1.2),
            scale_y: (0.4, 1.2),
        }],
    },
    Step {
        probability: 0.5,
        choices: &[OpSpec::Add {
            value: (-10.0, 10.0),
            per_channel: 0.5,
        }],
    },
    Step {
        probability: 0.5,
        choices: &[OpSpec::Dropout {
            p: (0.01, 0.1),
            per_channel: 0.5,
        }],
    },
    Step {
        probability: 0.5,
        choices: &[OpSpec::Affine {
            rotate: (0.0, 0.0),
            shear: (-3.0, 3.0),
            scale_x: NO_SCALE,
            scale_y: NO_SCALE,
        }],
    },
    Step {
        probability: 0.2,
        choices: &[OpSpec::Fog {
            density: (0.2, 0.6),
        }],
    },
];

const TEST_STEPS: &[Step] = &[
    Step {
        probability: 0.9,
        choices: &[OpSpec::GaussianBlur { sigma: (0.0, 0.9) }],
    },
    Step {
        probability: 1.0,
        choices: &[OpSpec::Contrast { alpha: (0.75, 2.0) }],
    },
    Step {
        probability: 1.0,
        choices: &[OpSpec::GaussianNoise {
            scale: (0.0, 0.2 * 255.0),
            per_channel: 0.6,
        }],
    },
    Step {
        probability: 1.0,
        choices: &[OpSpec::Multiply {
            factor: (0.8, 1.2),
            per_channel: 0.2,
        }],
    },
    Step {
        probability: 0.8,
        choices: &[OpSpec::Affine {
            rotate: (-5.0, 7.0),
            shear: (-2.0, 10.0),
            scale_x: NO_SCALE,
            scale_y: NO_SCALE,
        }],
    },
    Step {
        probability: 0.8,
        choices: &[OpSpec::Affine {
            rotate: (0.0, 0.0),
            shear: (-3.0, 3.0),
            scale_x: NO_SCALE,
            scale_y: NO_SCALE,
        }],
    },
];

/// A profile with every random decision fixed: which steps fire, which
/// alternative each picks, their parameters and the shuffled order.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    ops: Vec<Op>,
}

impl Pipeline {
    pub fn sample<R: Rng + ?Sized>(profile: AugmentProfile, rng: &mut R) -> Self {
        let mut ops = Vec::new();
        for step in profile.steps() {
            if !rng.gen_bool(step.probability) {
                continue;
            }
            if let Some(spec) = step.choices.choose(rng) {
                ops.push(spec.sample(rng));
            }
        }
        ops.shuffle(rng);
        Self { ops }
    }

    pub fn op_names(&self) -> Vec<&'static str> {
        self.ops.iter().map(Op::name).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn apply(
        &self,
        mut image: RgbImage,
        mut boxes: Vec<BoundingBox>,
    ) -> (RgbImage, Vec<BoundingBox>) {
        for op in &self.ops {
            let (width, height) = image.dimensions();
            boxes = op.apply_boxes(boxes, width, height);
            image = op.apply_image(image);
        }
        (image, boxes)
    }
}

/// Resizes to a random multiple of the reference plate size.
pub fn resize_to_reference<R: Rng + ?Sized>(
    image: &RgbImage,
    boxes: &[BoundingBox],
    options: &ResizeOptions,
    rng: &mut R,
) -> (RgbImage, Vec<BoundingBox>) {
    let (lo, hi) = options.scale;
    let scale = if lo >= hi { lo } else { rng.gen_range(lo..=hi) };
    let target_w = ((options.reference.0 as f32 * scale).round() as u32).max(1);
    let target_h = ((options.reference.1 as f32 * scale).round() as u32).max(1);
    let (width, height) = image.dimensions();
    let sx = target_w as f32 / width.max(1) as f32;
    let sy = target_h as f32 / height.max(1) as f32;
    let resized = imageops::resize(image, target_w, target_h, FilterType::Triangle);
    let boxes = boxes.iter().map(|bbox| bbox.scaled(sx, sy)).collect();
    (resized, boxes)
}

/// Resize (optional), one sampled pipeline, then the clip policy.
#[derive(Debug, Clone)]
pub struct SequentialAugmenter {
    options: AugmentOptions,
}

impl SequentialAugmenter {
    pub fn new(options: AugmentOptions) -> Result<Self> {
        if let Some(resize) = &options.resize {
            let (w, h) = resize.reference;
            if w == 0 || h == 0 {
                bail!("resize reference must be non-empty, got {}x{}", w, h);
            }
            let (lo, hi) = resize.scale;
            if !(lo > 0.0 && lo <= hi) {
                bail!("invalid resize scale range [{}, {}]", lo, hi);
            }
        }
        Ok(Self { options })
    }
}

impl Augmenter for SequentialAugmenter {
    fn augment(
        &self,
        image: RgbImage,
        boxes: Vec<BoundingBox>,
        rng: &mut StdRng,
    ) -> Result<(RgbImage, Vec<BoundingBox>)> {
        let (image, boxes) = match &self.options.resize {
            Some(resize) => resize_to_reference(&image, &boxes, resize, rng),
            None => (image, boxes),
        };
        let pipeline = Pipeline::sample(self.options.profile, rng);
        debug!(
            profile = %self.options.profile,
            ops = ?pipeline.op_names(),
            "sampled augmentation pipeline"
        );
        let (image, boxes) = pipeline.apply(image, boxes);
        let (width, height) = image.dimensions();
        let boxes = geometry::clip_boxes(boxes, width, height, self.options.clip);
        Ok((image, boxes))
    }
}
