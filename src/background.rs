use anyhow::{Context, Result, anyhow, bail};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use image::RgbImage;
use image::imageops::{self, FilterType};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::plate::BoundingBox;

/// Where the plate lands on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Centered,
    Random,
}

impl FromStr for Placement {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "centered" | "center" => Ok(Placement::Centered),
            "random" => Ok(Placement::Random),
            other => Err(anyhow!(
                "unknown placement '{}' (expected centered or random)",
                other
            )),
        }
    }
}

/// Candidate background files, sorted by path.
#[derive(Debug, Clone)]
pub struct BackgroundPool {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl BackgroundPool {
    pub fn discover(dir: &Path, patterns: &[String]) -> Result<Self> {
        let matcher = build_matcher(patterns)?;
        let entries = fs::read_dir(dir)
            .with_context(|| format!("failed to read background dir {}", dir.display()))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|value| value.to_str()) else {
                continue;
            };
            if matcher.is_match(name) {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            bail!("no background images found in {}", dir.display());
        }
        paths.sort();
        debug!(dir = %dir.display(), count = paths.len(), "discovered backgrounds");
        Ok(Self {
            dir: dir.to_path_buf(),
            paths,
        })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&Path> {
        self.paths
            .choose(rng)
            .map(PathBuf::as_path)
            .ok_or_else(|| anyhow!("no background images found in {}", self.dir.display()))
    }
}

fn build_matcher(patterns: &[String]) -> Result<GlobSet> {
    if patterns.is_empty() {
        bail!("at least one background pattern is required");
    }
    let mut builder = GlobSetBuilder::new();
    for raw in patterns {
        let glob = GlobBuilder::new(raw.trim())
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .map_err(|err| anyhow!("invalid background pattern '{}': {}", raw, err))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|err| anyhow!("invalid background patterns: {}", err))
}

/// Top-left paste position of a `plate` sized image on a `canvas`.
///
/// Random offsets are drawn per axis from `[(c - p) * 0.1, (c - p) * 1.0]`.
pub fn paste_offset<R: Rng + ?Sized>(
    canvas: (u32, u32),
    plate: (u32, u32),
    placement: Placement,
    rng: &mut R,
) -> (u32, u32) {
    let slack_x = canvas.0.saturating_sub(plate.0);
    let slack_y = canvas.1.saturating_sub(plate.1);
    match placement {
        Placement::Centered => (slack_x / 2, slack_y / 2),
        Placement::Random => (random_axis(slack_x, rng), random_axis(slack_y, rng)),
    }
}

fn random_axis<R: Rng + ?Sized>(slack: u32, rng: &mut R) -> u32 {
    let lo = (slack as f32 * 0.1).round() as u32;
    if lo >= slack {
        return slack;
    }
    rng.gen_range(lo..=slack)
}

/// Result of placing a plate on a background.
#[derive(Debug, Clone)]
pub struct Composite {
    pub image: RgbImage,
    pub boxes: Vec<BoundingBox>,
    pub offset: (u32, u32),
    pub background: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BackgroundCompositor {
    pool: BackgroundPool,
    canvas: (u32, u32),
    placement: Placement,
}

impl BackgroundCompositor {
    pub fn new(pool: BackgroundPool, canvas: (u32, u32), placement: Placement) -> Result<Self> {
        if canvas.0 == 0 || canvas.1 == 0 {
            bail!("background canvas must be non-empty, got {}x{}", canvas.0, canvas.1);
        }
        Ok(Self {
            pool,
            canvas,
            placement,
        })
    }

    pub fn composite<R: Rng + ?Sized>(
        &self,
        plate: &RgbImage,
        boxes: &[BoundingBox],
        rng: &mut R,
    ) -> Result<Composite> {
        let path = self.pool.choose(rng)?.to_path_buf();
        let background = image::open(&path)
            .with_context(|| format!("failed to read background {}", path.display()))?
            .to_rgb8();
        let mut composite = self.composite_onto(&background, plate, boxes, rng);
        composite.background = Some(path);
        Ok(composite)
    }

    /// Places `plate` on an already decoded background.
    pub fn composite_onto<R: Rng + ?Sized>(
        &self,
        background: &RgbImage,
        plate: &RgbImage,
        boxes: &[BoundingBox],
        rng: &mut R,
    ) -> Composite {
        let (canvas_w, canvas_h) = self.canvas;
        let mut canvas = if background.dimensions() == self.canvas {
            background.clone()
        } else {
            imageops::resize(background, canvas_w, canvas_h, FilterType::Triangle)
        };

        let (plate, boxes) = fit_to_canvas(plate, boxes, self.canvas);
        let offset = paste_offset(self.canvas, plate.dimensions(), self.placement, rng);
        imageops::overlay(&mut canvas, &plate, offset.0 as i64, offset.1 as i64);

        let (dx, dy) = (offset.0 as f32, offset.1 as f32);
        let boxes = boxes.iter().map(|bbox| bbox.translated(dx, dy)).collect();
        Composite {
            image: canvas,
            boxes,
            offset,
            background: None,
        }
    }
}

/// Shrinks a plate that does not fit the canvas, keeping its aspect ratio.
fn fit_to_canvas(
    plate: &RgbImage,
    boxes: &[BoundingBox],
    canvas: (u32, u32),
) -> (RgbImage, Vec<BoundingBox>) {
    let (width, height) = plate.dimensions();
    if width <= canvas.0 && height <= canvas.1 {
        return (plate.clone(), boxes.to_vec());
    }
    let factor = (canvas.0 as f32 / width as f32).min(canvas.1 as f32 / height as f32);
    let target_w = ((width as f32 * factor).floor() as u32).clamp(1, canvas.0);
    let target_h = ((height as f32 * factor).floor() as u32).clamp(1, canvas.1);
    debug!(
        from = ?(width, height),
        to = ?(target_w, target_h),
        "plate larger than canvas, shrinking"
    );
    let sx = target_w as f32 / width as f32;
    let sy = target_h as f32 / height as f32;
    let resized = imageops::resize(plate, target_w, target_h, FilterType::Triangle);
    let boxes = boxes.iter().map(|bbox| bbox.scaled(sx, sy)).collect();
    (resized, boxes)
}
