use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::augment::ClipPolicy;
use crate::background::Placement;
use crate::export::{ImageFormat, NamingScheme};
use crate::paths;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub background_dir: PathBuf,
    pub background_patterns: Vec<String>,
    pub output_dir: PathBuf,
    pub output_format: ImageFormat,
    pub output_naming: NamingScheme,
    pub csv_prefix: String,
    pub canvas: (u32, u32),
    pub placement: Placement,
    pub resize_reference: (u32, u32),
    pub resize_scale: (f32, f32),
    pub train_clip: ClipPolicy,
    pub test_clip: ClipPolicy,
    /// Keyed by kebab-case variant name.
    pub variants: HashMap<String, VariantOverride>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            background_dir: PathBuf::from("data/backgrounds"),
            background_patterns: vec![
                "*.jpg".to_string(),
                "*.jpeg".to_string(),
                "*.png".to_string(),
            ],
            output_dir: PathBuf::from("output"),
            output_format: ImageFormat::Png,
            output_naming: NamingScheme::Index,
            csv_prefix: String::new(),
            canvas: (640, 480),
            placement: Placement::Random,
            resize_reference: (400, 130),
            resize_scale: (0.35, 1.0),
            train_clip: ClipPolicy::Clip,
            test_clip: ClipPolicy::Keep,
            variants: HashMap::new(),
        }
    }
}

/// Per-variant geometry override; unset fields keep the built-in preset.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct VariantOverride {
    pub asset_dir: Option<String>,
    pub template: Option<String>,
    pub pattern: Option<String>,
    pub initial: Option<[u32; 2]>,
    pub padding: Option<u32>,
    pub line_restart: Option<u32>,
    pub line_height: Option<u32>,
    pub glyph_size: Option<[u32; 2]>,
    pub remap: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    data: Option<DataSettings>,
    output: Option<OutputSettings>,
    background: Option<BackgroundSettings>,
    augmentation: Option<AugmentationSettings>,
    variants: Option<HashMap<String, VariantOverride>>,
}

#[derive(Debug, Default, Deserialize)]
struct DataSettings {
    dir: Option<String>,
    background_dir: Option<String>,
    background_patterns: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputSettings {
    dir: Option<String>,
    format: Option<ImageFormat>,
    naming: Option<NamingScheme>,
    csv_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BackgroundSettings {
    canvas: Option<[u32; 2]>,
    placement: Option<Placement>,
}

#[derive(Debug, Default, Deserialize)]
struct AugmentationSettings {
    resize_reference: Option<[u32; 2]>,
    resize_scale: Option<[f32; 2]>,
    train_clip: Option<ClipPolicy>,
    test_clip: Option<ClipPolicy>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = paths::settings_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings
                .merge_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            debug!(path = %path.display(), "merged settings");
        }
    }

    Ok(settings)
}

impl Settings {
    pub fn merge_str(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed)
    }

    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(data) = incoming.data {
            if let Some(dir) = non_empty(data.dir) {
                self.data_dir = paths::expand_dir(&dir);
            }
            if let Some(dir) = non_empty(data.background_dir) {
                self.background_dir = paths::expand_dir(&dir);
            }
            if let Some(patterns) = data.background_patterns {
                if !patterns.is_empty() {
                    self.background_patterns = patterns;
                }
            }
        }
        if let Some(output) = incoming.output {
            if let Some(dir) = non_empty(output.dir) {
                self.output_dir = paths::expand_dir(&dir);
            }
            if let Some(format) = output.format {
                self.output_format = format;
            }
            if let Some(naming) = output.naming {
                self.output_naming = naming;
            }
            if let Some(prefix) = output.csv_prefix {
                self.csv_prefix = prefix.trim().to_string();
            }
        }
        if let Some(background) = incoming.background {
            if let Some([w, h]) = background.canvas {
                if w == 0 || h == 0 {
                    return Err(anyhow!("background canvas must be non-empty, got {}x{}", w, h));
                }
                self.canvas = (w, h);
            }
            if let Some(placement) = background.placement {
                self.placement = placement;
            }
        }
        if let Some(augmentation) = incoming.augmentation {
            if let Some([w, h]) = augmentation.resize_reference {
                if w == 0 || h == 0 {
                    return Err(anyhow!("resize reference must be non-empty, got {}x{}", w, h));
                }
                self.resize_reference = (w, h);
            }
            if let Some([min, max]) = augmentation.resize_scale {
                if !(min > 0.0 && min <= max) {
                    return Err(anyhow!("invalid resize scale range [{}, {}]", min, max));
                }
                self.resize_scale = (min, max);
            }
            if let Some(policy) = augmentation.train_clip {
                self.train_clip = policy;
            }
            if let Some(policy) = augmentation.test_clip {
                self.test_clip = policy;
            }
        }
        if let Some(variants) = incoming.variants {
            for (name, incoming) in variants {
                let key = name.trim().to_lowercase().replace('_', "-");
                let entry = self.variants.entry(key).or_default();
                entry.merge(incoming);
            }
        }
        Ok(())
    }
}

impl VariantOverride {
    fn merge(&mut self, incoming: VariantOverride) {
        if incoming.asset_dir.is_some() {
            self.asset_dir = incoming.asset_dir;
        }
        if incoming.template.is_some() {
            self.template = incoming.template;
        }
        if incoming.pattern.is_some() {
            self.pattern = incoming.pattern;
        }
        if incoming.initial.is_some() {
            self.initial = incoming.initial;
        }
        if incoming.padding.is_some() {
            self.padding = incoming.padding;
        }
        if incoming.line_restart.is_some() {
            self.line_restart = incoming.line_restart;
        }
        if incoming.line_height.is_some() {
            self.line_height = incoming.line_height;
        }
        if incoming.glyph_size.is_some() {
            self.glyph_size = incoming.glyph_size;
        }
        if let Some(map) = incoming.remap {
            self.remap.get_or_insert_with(HashMap::new).extend(map);
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = paths::settings_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn embedded_defaults_match_builtin_settings() {
        let mut settings = Settings::default();
        settings.merge_str(DEFAULT_SETTINGS_TOML).expect("parse defaults");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn later_files_override_earlier_fields() {
        let mut settings = Settings::default();
        settings
            .merge_str(
                r#"
                [output]
                naming = "text"
                csv_prefix = " gs://bucket/plates/ "

                [background]
                canvas = [320, 240]
                placement = "centered"

                [variants.standard]
                padding = 3

                [variants.standard.remap]
                Q = "O0"
                "#,
            )
            .expect("merge");
        assert_eq!(settings.output_naming, NamingScheme::Text);
        assert_eq!(settings.csv_prefix, "gs://bucket/plates/");
        assert_eq!(settings.canvas, (320, 240));
        assert_eq!(settings.placement, Placement::Centered);
        assert_eq!(settings.output_format, ImageFormat::Png);

        settings
            .merge_str(
                r#"
                [variants.Standard]
                initial = [10, 12]
                [variants.standard.remap]
                D = "O0"

                [variants.mercosul_motorcycle]
                padding = 2
                "#,
            )
            .expect("merge");
        let standard = settings.variants.get("standard").expect("override");
        assert_eq!(standard.padding, Some(3));
        assert_eq!(standard.initial, Some([10, 12]));
        let remap = standard.remap.as_ref().expect("remap");
        assert_eq!(remap.get("Q").map(String::as_str), Some("O0"));
        assert_eq!(remap.get("D").map(String::as_str), Some("O0"));
        let moto = settings
            .variants
            .get("mercosul-motorcycle")
            .expect("kebab-case key");
        assert_eq!(moto.padding, Some(2));
    }

    #[test]
    fn rejects_empty_canvas_and_inverted_scale() {
        let mut settings = Settings::default();
        assert!(settings.merge_str("[background]\ncanvas = [0, 10]\n").is_err());
        assert!(
            settings
                .merge_str("[augmentation]\nresize_scale = [1.0, 0.5]\n")
                .is_err()
        );
        assert!(settings.merge_str("[output]\nformat = \"gif\"\n").is_err());
    }

    #[test]
    fn load_settings_writes_home_defaults_and_reads_extra_file() {
        with_temp_home(|home| {
            let extra = home.join("extra.toml");
            fs::write(&extra, "[output]\nformat = \"jpg\"\n").expect("write extra");
            let settings = load_settings(Some(&extra)).expect("load settings");
            assert_eq!(settings.output_format, ImageFormat::Jpeg);
            assert!(home.join(".plate-generator-rust/settings.toml").exists());

            let missing = home.join("missing.toml");
            assert!(load_settings(Some(&missing)).is_err());
        });
    }
}
