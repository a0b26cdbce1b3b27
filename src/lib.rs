use anyhow::{Context, Result, anyhow, bail};
use rand::Rng;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

pub mod augment;
pub mod background;
pub mod export;
pub mod generator;
pub mod logging;
pub mod overlay;
mod paths;
pub mod plate;
pub mod settings;
pub mod statistics;
#[cfg(test)]
mod test_util;

pub use augment::{AugmentOptions, AugmentProfile, Augmenter, ClipPolicy, SequentialAugmenter};
pub use generator::{BackgroundOptions, GeneratorOptions, PlateGenerator};
pub use plate::{BoundingBox, PlateRecord, PlateVariant};
pub use statistics::Statistics;

use export::{AnnotationEntry, AnnotationStatus, ImageWriter, NamingScheme};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub count: usize,
    pub variant: Option<String>,
    pub seed: Option<u64>,
    pub include_dash: bool,
    pub include_plate_box: bool,
    pub no_augment: bool,
    pub profile: Option<String>,
    pub resize: bool,
    pub background: bool,
    pub placement: Option<String>,
    pub data_dir: Option<String>,
    pub background_dir: Option<String>,
    pub output_dir: Option<String>,
    pub format: Option<String>,
    pub name_by_text: bool,
    pub csv_path: Option<String>,
    pub annotations_path: Option<String>,
    pub debug_boxes: bool,
    pub show_statistics: bool,
    pub jobs: Option<usize>,
    pub settings_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub generated: usize,
    pub seed: u64,
    pub output_dir: PathBuf,
    pub files: Vec<String>,
    pub statistics: Statistics,
    pub csv_path: Option<PathBuf>,
    pub annotations_path: Option<PathBuf>,
    pub statistics_paths: Option<(PathBuf, PathBuf)>,
    pub elapsed: Duration,
}

pub fn run(config: Config) -> Result<RunSummary> {
    let started = Instant::now();
    if config.resize && config.no_augment {
        bail!("--resize is part of augmentation and cannot be combined with --no-augment");
    }
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    apply_overrides(&mut settings, &config)?;

    let variant: PlateVariant = config.variant.as_deref().unwrap_or("standard").parse()?;
    let profile = match config.profile.as_deref() {
        Some(value) => value.parse()?,
        None => AugmentProfile::Train,
    };
    let seed = config
        .seed
        .unwrap_or_else(|| rand::thread_rng().r#gen::<u64>());

    let mut options = GeneratorOptions::new(variant, &settings.data_dir, seed);
    options.compose.include_dash = config.include_dash;
    options.compose.include_plate_box = config.include_plate_box;
    if !config.no_augment {
        options.augment = Some(AugmentOptions::from_settings(
            profile,
            &settings,
            config.resize,
        ));
    }
    if config.background {
        options.background = Some(BackgroundOptions::from_settings(&settings));
    }
    let status = AnnotationStatus::for_profile((!config.no_augment).then_some(profile));

    let generator = PlateGenerator::new(options, &settings)?;
    let writer = ImageWriter::new(
        &settings.output_dir,
        settings.output_format,
        settings.output_naming,
    )?;
    let jobs = config.jobs.unwrap_or_else(num_cpus::get).max(1);
    info!(
        count = config.count,
        variant = %variant,
        seed,
        jobs,
        output = %settings.output_dir.display(),
        "generating plates"
    );

    let entries = Mutex::new(Vec::with_capacity(config.count));
    let mut statistics = Statistics::new();
    generator.generate_parallel(config.count, jobs, &mut statistics, |record| {
        let file = writer.write(&record)?;
        if config.debug_boxes {
            write_debug_overlay(writer.dir(), &file, &record)?;
        }
        let entry = AnnotationEntry::new(&record, file);
        entries
            .lock()
            .map_err(|_| anyhow!("annotation list poisoned"))?
            .push(entry);
        Ok(())
    })?;
    let mut entries = entries
        .into_inner()
        .map_err(|_| anyhow!("annotation list poisoned"))?;
    entries.sort_by_key(|entry| entry.index);
    for (from, to) in writer.promote_text_names(&mut entries)? {
        if config.debug_boxes {
            let from = writer.dir().join(overlay_file_name(&from));
            let to = writer.dir().join(overlay_file_name(&to));
            fs::rename(&from, &to).with_context(|| {
                format!("failed to rename {} to {}", from.display(), to.display())
            })?;
        }
    }

    let csv_path = config.csv_path.as_deref().map(PathBuf::from);
    if let Some(path) = &csv_path {
        export::write_annotations_csv_file(path, &entries, status, &settings.csv_prefix)?;
    }
    let annotations_path = config.annotations_path.as_deref().map(PathBuf::from);
    if let Some(path) = &annotations_path {
        export::write_annotations_json(path, &entries)?;
    }
    let statistics_paths = if config.show_statistics {
        Some(write_statistics(&settings.output_dir, &statistics)?)
    } else {
        None
    };

    let elapsed = started.elapsed();
    info!(
        generated = entries.len(),
        seconds = elapsed.as_secs_f64(),
        "plates generated"
    );
    Ok(RunSummary {
        generated: entries.len(),
        seed,
        output_dir: settings.output_dir.clone(),
        files: entries.into_iter().map(|entry| entry.file).collect(),
        statistics,
        csv_path,
        annotations_path,
        statistics_paths,
        elapsed,
    })
}

fn apply_overrides(settings: &mut settings::Settings, config: &Config) -> Result<()> {
    if let Some(dir) = config.data_dir.as_deref() {
        settings.data_dir = paths::expand_dir(dir);
    }
    if let Some(dir) = config.background_dir.as_deref() {
        settings.background_dir = paths::expand_dir(dir);
    }
    if let Some(dir) = config.output_dir.as_deref() {
        settings.output_dir = paths::expand_dir(dir);
    }
    if let Some(format) = config.format.as_deref() {
        settings.output_format = format.parse()?;
    }
    if config.name_by_text {
        settings.output_naming = NamingScheme::Text;
    }
    if let Some(placement) = config.placement.as_deref() {
        settings.placement = placement.parse()?;
    }
    Ok(())
}

fn overlay_file_name(file: &str) -> String {
    let stem = Path::new(file)
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or(file);
    format!("{}_bbox.png", stem)
}

fn write_debug_overlay(dir: &Path, file: &str, record: &PlateRecord) -> Result<()> {
    let path = dir.join(overlay_file_name(file));
    let bytes = overlay::render_boxes_png(&record.image, &record.boxes)?;
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn write_statistics(dir: &Path, stats: &Statistics) -> Result<(PathBuf, PathBuf)> {
    let json_path = dir.join("statistics.json");
    export::write_statistics_json(&json_path, stats)?;
    let svg = overlay::render_histogram_svg(stats);
    let png = overlay::render_svg_bytes(&svg, "image/png")?;
    let png_path = dir.join("statistics.png");
    fs::write(&png_path, png).with_context(|| format!("failed to write {}", png_path.display()))?;
    Ok((json_path, png_path))
}

/// `label count` lines in display order.
pub fn format_statistics(stats: &Statistics) -> String {
    let mut out = String::new();
    for (label, count) in stats.ordered() {
        let _ = writeln!(out, "{:<6}{}", label, count);
    }
    let _ = write!(out, "{:<6}{}", "total", stats.total());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate::VariantGeometry;
    use crate::test_util::{with_temp_home, write_variant_fixture};

    fn config_for(root: &Path) -> Config {
        let geometry = VariantGeometry::resolve(PlateVariant::Standard, None).expect("geometry");
        write_variant_fixture(&root.join("data"), &geometry);
        Config {
            count: 3,
            seed: Some(5),
            no_augment: true,
            data_dir: Some(root.join("data").display().to_string()),
            output_dir: Some(root.join("out").display().to_string()),
            jobs: Some(2),
            ..Config::default()
        }
    }

    #[test]
    fn run_writes_images_and_annotations() {
        with_temp_home(|home| {
            let mut config = config_for(home);
            config.csv_path = Some(home.join("out/labels.csv").display().to_string());
            config.annotations_path = Some(home.join("out/labels.json").display().to_string());
            config.show_statistics = true;
            let summary = run(config).expect("run");

            assert_eq!(summary.generated, 3);
            assert_eq!(
                summary.files,
                vec!["plate_000000.png", "plate_000001.png", "plate_000002.png"]
            );
            for file in &summary.files {
                assert!(home.join("out").join(file).is_file());
            }
            let csv = fs::read_to_string(home.join("out/labels.csv")).expect("csv");
            assert_eq!(csv.lines().count(), 3 * 7);
            assert!(csv.lines().all(|line| line.starts_with("TRAIN,plate_")));
            assert!(home.join("out/labels.json").is_file());
            let (json, png) = summary.statistics_paths.expect("statistics");
            assert!(json.is_file() && png.is_file());
            assert_eq!(summary.statistics.total(), 3 * 8);
        });
    }

    #[test]
    fn text_naming_and_debug_overlays() {
        with_temp_home(|home| {
            let mut config = config_for(home);
            config.name_by_text = true;
            config.debug_boxes = true;
            config.format = Some("jpg".to_string());
            let summary = run(config).expect("run");
            for file in &summary.files {
                assert!(file.ends_with(".jpg"));
                let stem = file.trim_end_matches(".jpg");
                assert!(home.join("out").join(format!("{}_bbox.png", stem)).is_file());
            }
        });
    }

    #[test]
    fn text_names_do_not_depend_on_worker_count() {
        with_temp_home(|home| {
            // One digit per plate, so 40 plates repeat every text.
            let settings = home.join("single-digit.toml");
            fs::write(&settings, "[variants.standard]\npattern = \"N\"\n").expect("settings");
            let run_with = |jobs: usize| {
                let mut config = config_for(home);
                config.count = 40;
                config.name_by_text = true;
                config.debug_boxes = true;
                config.jobs = Some(jobs);
                config.settings_path = Some(settings.display().to_string());
                config.output_dir = Some(home.join(format!("out-{jobs}")).display().to_string());
                let summary = run(config).expect("run");
                let mut listed: Vec<String> = fs::read_dir(&summary.output_dir)
                    .expect("list")
                    .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
                    .collect();
                listed.sort();
                (summary.files, listed)
            };

            let (files, listed) = run_with(1);
            assert_eq!(run_with(8), (files.clone(), listed.clone()));
            assert_eq!(run_with(8), (files.clone(), listed.clone()));
            assert_eq!(listed.len(), 2 * 40);

            let mut seen = std::collections::HashSet::new();
            for (index, file) in files.iter().enumerate() {
                let text = file.split(['_', '.']).next().expect("text");
                assert_eq!(text.len(), 1, "{file}");
                let expected = if seen.insert(text.to_string()) {
                    format!("{text}.png")
                } else {
                    format!("{text}_{index:06}.png")
                };
                assert_eq!(file, &expected);
                assert!(listed.contains(&overlay_file_name(file)), "{file}");
            }
        });
    }

    #[test]
    fn unknown_names_fail_before_generating() {
        with_temp_home(|home| {
            let mut config = config_for(home);
            config.variant = Some("tractor".to_string());
            assert!(run(config).is_err());

            let mut config = config_for(home);
            config.profile = Some("eval".to_string());
            assert!(run(config).is_err());

            let mut config = config_for(home);
            config.resize = true;
            let err = run(config).expect_err("resize without augmentation");
            assert!(err.to_string().contains("--no-augment"));
            assert!(!home.join("out").exists());
        });
    }

    #[test]
    fn statistics_table_ends_with_total() {
        let mut stats = Statistics::new();
        stats.record("A");
        let table = format_statistics(&stats);
        assert!(table.starts_with("A     1\n"));
        assert!(table.ends_with("total 1"));
    }
}
