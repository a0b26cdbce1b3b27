use anyhow::{Context, Result, anyhow, bail};
use image::{DynamicImage, RgbaImage};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info};

use crate::augment::{AugmentOptions, Augmenter, SequentialAugmenter};
use crate::background::{BackgroundCompositor, BackgroundPool, Placement};
use crate::plate::{
    ComposeOptions, GlyphSet, PlateRecord, PlateVariant, VariantGeometry, compose_plate,
};
use crate::settings::Settings;
use crate::statistics::Statistics;

#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundOptions {
    pub dir: PathBuf,
    pub patterns: Vec<String>,
    pub canvas: (u32, u32),
    pub placement: Placement,
}

impl BackgroundOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            dir: settings.background_dir.clone(),
            patterns: settings.background_patterns.clone(),
            canvas: settings.canvas,
            placement: settings.placement,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorOptions {
    pub variant: PlateVariant,
    /// Root holding one asset directory per variant.
    pub data_dir: PathBuf,
    pub compose: ComposeOptions,
    pub augment: Option<AugmentOptions>,
    pub background: Option<BackgroundOptions>,
    pub seed: u64,
}

impl GeneratorOptions {
    pub fn new(variant: PlateVariant, data_dir: &Path, seed: u64) -> Self {
        Self {
            variant,
            data_dir: data_dir.to_path_buf(),
            compose: ComposeOptions::default(),
            augment: None,
            background: None,
            seed,
        }
    }
}

/// Everything a batch needs, resolved and loaded once.
pub struct PlateGenerator {
    geometry: VariantGeometry,
    template: RgbaImage,
    glyphs: GlyphSet,
    compose: ComposeOptions,
    augmenter: Option<Box<dyn Augmenter>>,
    compositor: Option<BackgroundCompositor>,
    seed: u64,
}

impl PlateGenerator {
    pub fn new(options: GeneratorOptions, settings: &Settings) -> Result<Self> {
        let overrides = settings.variants.get(options.variant.name());
        let geometry = VariantGeometry::resolve(options.variant, overrides)?;

        let asset_dir = options.data_dir.join(&geometry.asset_dir);
        let template_path = asset_dir.join(&geometry.template);
        if !template_path.is_file() {
            bail!("plate template not found: {}", template_path.display());
        }
        let template = image::open(&template_path)
            .with_context(|| format!("failed to decode template {}", template_path.display()))?
            .to_rgba8();
        let glyphs = GlyphSet::load(&asset_dir, &geometry)?;

        let augmenter = match options.augment {
            Some(augment) => {
                Some(Box::new(SequentialAugmenter::new(augment)?) as Box<dyn Augmenter>)
            }
            None => None,
        };
        let compositor = match options.background {
            Some(background) => {
                let pool = BackgroundPool::discover(&background.dir, &background.patterns)?;
                Some(BackgroundCompositor::new(
                    pool,
                    background.canvas,
                    background.placement,
                )?)
            }
            None => None,
        };

        info!(
            variant = %options.variant,
            template = %template_path.display(),
            glyphs = glyphs.len(),
            augment = augmenter.is_some(),
            background = compositor.is_some(),
            "plate generator ready"
        );
        Ok(Self {
            geometry,
            template,
            glyphs,
            compose: options.compose,
            augmenter,
            compositor,
            seed: options.seed,
        })
    }

    /// Replaces the augmentation stage.
    pub fn with_augmenter(mut self, augmenter: Box<dyn Augmenter>) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    pub fn geometry(&self) -> &VariantGeometry {
        &self.geometry
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Builds the plate at `index`; the same seed and index give the same plate.
    pub fn generate_one(&self, index: usize, stats: &mut Statistics) -> Result<PlateRecord> {
        let mut rng = plate_rng(self.seed, index);
        let composed = compose_plate(
            &self.template,
            &self.geometry,
            &self.glyphs,
            &mut rng,
            stats,
            self.compose,
        )
        .with_context(|| format!("failed to compose plate {}", index))?;

        let mut image = DynamicImage::ImageRgba8(composed.image).to_rgb8();
        let mut boxes = composed.boxes;
        if let Some(augmenter) = &self.augmenter {
            (image, boxes) = augmenter
                .augment(image, boxes, &mut rng)
                .with_context(|| format!("failed to augment plate {}", index))?;
        }
        if let Some(compositor) = &self.compositor {
            let composite = compositor
                .composite(&image, &boxes, &mut rng)
                .with_context(|| format!("failed to composite plate {}", index))?;
            image = composite.image;
            boxes = composite.boxes;
        }
        debug!(index, text = %composed.text, boxes = boxes.len(), "generated plate");
        Ok(PlateRecord {
            index,
            image,
            boxes,
            text: composed.text,
        })
    }

    pub fn generate(&self, count: usize, stats: &mut Statistics) -> Result<Vec<PlateRecord>> {
        let mut records = Vec::with_capacity(count);
        self.generate_into(count, stats, |record| {
            records.push(record);
            Ok(())
        })?;
        Ok(records)
    }

    /// Streams plates `0..count` to `sink` in index order.
    pub fn generate_into<F>(&self, count: usize, stats: &mut Statistics, mut sink: F) -> Result<()>
    where
        F: FnMut(PlateRecord) -> Result<()>,
    {
        for index in 0..count {
            let record = self.generate_one(index, stats)?;
            sink(record)?;
        }
        Ok(())
    }

    /// Splits `0..count` across `jobs` scoped workers.
    ///
    /// Each worker keeps its own statistics; they are merged into `stats` once
    /// all workers stop. `sink` sees plates in no particular order. The first
    /// error stops the remaining workers and is returned.
    pub fn generate_parallel<F>(
        &self,
        count: usize,
        jobs: usize,
        stats: &mut Statistics,
        sink: F,
    ) -> Result<()>
    where
        F: Fn(PlateRecord) -> Result<()> + Sync,
    {
        let jobs = jobs.clamp(1, count.max(1));
        if jobs == 1 {
            return self.generate_into(count, stats, sink);
        }
        let abort = AtomicBool::new(false);
        let outcomes: Vec<Result<Statistics>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..jobs)
                .map(|worker| {
                    let abort = &abort;
                    let sink = &sink;
                    scope.spawn(move || -> Result<Statistics> {
                        let mut local = Statistics::new();
                        for index in (worker..count).step_by(jobs) {
                            if abort.load(Ordering::Relaxed) {
                                break;
                            }
                            let outcome = self
                                .generate_one(index, &mut local)
                                .and_then(|record| sink(record));
                            if let Err(err) = outcome {
                                abort.store(true, Ordering::Relaxed);
                                return Err(err);
                            }
                        }
                        Ok(local)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("plate worker panicked")))
                })
                .collect()
        });

        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(local) => stats.merge(&local),
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(_) => {}
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Independent stream per plate so batches can be split freely.
fn plate_rng(seed: u64, index: usize) -> StdRng {
    StdRng::seed_from_u64(splitmix64(seed ^ splitmix64(index as u64)))
}

fn splitmix64(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
