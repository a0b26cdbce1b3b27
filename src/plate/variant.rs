use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::Cursor;
use crate::settings::VariantOverride;

include!(concat!(env!("OUT_DIR"), "/embedded_variant_presets.rs"));

pub const LETTERS: [char; 26] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];
pub const DIGITS: [char; 10] = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub const DASH: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlateVariant {
    Standard,
    Red,
    Mercosul,
    Motorcycle,
    MercosulMotorcycle,
}

impl PlateVariant {
    pub const ALL: [PlateVariant; 5] = [
        PlateVariant::Standard,
        PlateVariant::Red,
        PlateVariant::Mercosul,
        PlateVariant::Motorcycle,
        PlateVariant::MercosulMotorcycle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PlateVariant::Standard => "standard",
            PlateVariant::Red => "red",
            PlateVariant::Mercosul => "mercosul",
            PlateVariant::Motorcycle => "motorcycle",
            PlateVariant::MercosulMotorcycle => "mercosul-motorcycle",
        }
    }
}

impl fmt::Display for PlateVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PlateVariant {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        PlateVariant::ALL
            .into_iter()
            .find(|variant| variant.name() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = PlateVariant::ALL.iter().map(|v| v.name()).collect();
                anyhow!(
                    "unknown plate variant '{}' (expected one of: {})",
                    value,
                    known.join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Letter,
    Number,
    Dash,
    LineBreak,
}

/// Slot sequence parsed from `L` (letter), `N` (digit), `-` (dash), `/` (line break).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPattern {
    slots: Vec<Slot>,
}

impl LayoutPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut slots = Vec::new();
        for ch in raw.trim().chars() {
            let slot = match ch.to_ascii_uppercase() {
                'L' => Slot::Letter,
                'N' => Slot::Number,
                '-' => Slot::Dash,
                '/' => Slot::LineBreak,
                other => bail!("invalid layout pattern '{}': unexpected '{}'", raw, other),
            };
            slots.push(slot);
        }
        let pattern = Self { slots };
        if pattern.char_count() == 0 {
            bail!("layout pattern '{}' places no characters", raw);
        }
        Ok(pattern)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn char_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Letter | Slot::Number))
            .count()
    }

    pub fn has_dash(&self) -> bool {
        self.slots.contains(&Slot::Dash)
    }

    pub fn lines(&self) -> usize {
        1 + self
            .slots
            .iter()
            .filter(|slot| **slot == Slot::LineBreak)
            .count()
    }

    /// Every symbol the pattern can paste.
    pub fn symbols(&self) -> Vec<char> {
        let mut symbols = Vec::new();
        if self.slots.contains(&Slot::Letter) {
            symbols.extend(LETTERS);
        }
        if self.slots.contains(&Slot::Number) {
            symbols.extend(DIGITS);
        }
        if self.has_dash() {
            symbols.push(DASH);
        }
        symbols
    }
}

/// Geometry of one plate variant, resolved once per generator.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantGeometry {
    pub variant: PlateVariant,
    pub asset_dir: String,
    pub template: String,
    pub pattern: LayoutPattern,
    pub initial: Cursor,
    pub padding: u32,
    pub line_restart: u32,
    pub line_height: u32,
    pub glyph_size: Option<(u32, u32)>,
    /// Fallback asset for a symbol whose own raster is missing.
    pub remap: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PresetFile {
    asset_dir: String,
    template: String,
    pattern: String,
    initial: [u32; 2],
    padding: u32,
    line_restart: u32,
    line_height: u32,
    glyph_size: Option<[u32; 2]>,
    remap: Option<HashMap<String, String>>,
}

impl VariantGeometry {
    pub fn resolve(variant: PlateVariant, overrides: Option<&VariantOverride>) -> Result<Self> {
        let raw = embedded_variant_preset(variant.name())
            .ok_or_else(|| anyhow!("no built-in preset for plate variant '{}'", variant))?;
        let mut preset: PresetFile = toml::from_str(raw)
            .with_context(|| format!("failed to parse preset for plate variant '{}'", variant))?;
        let mut remap = preset.remap.take().unwrap_or_default();

        if let Some(overrides) = overrides {
            if let Some(dir) = overrides.asset_dir.clone() {
                preset.asset_dir = dir;
            }
            if let Some(template) = overrides.template.clone() {
                preset.template = template;
            }
            if let Some(pattern) = overrides.pattern.clone() {
                preset.pattern = pattern;
            }
            if let Some(initial) = overrides.initial {
                preset.initial = initial;
            }
            if let Some(padding) = overrides.padding {
                preset.padding = padding;
            }
            if let Some(restart) = overrides.line_restart {
                preset.line_restart = restart;
            }
            if let Some(height) = overrides.line_height {
                preset.line_height = height;
            }
            if overrides.glyph_size.is_some() {
                preset.glyph_size = overrides.glyph_size;
            }
            if let Some(map) = &overrides.remap {
                for (symbol, target) in map {
                    // An empty target removes a built-in remap entry.
                    if target.trim().is_empty() {
                        remap.remove(symbol);
                    } else {
                        remap.insert(symbol.clone(), target.trim().to_string());
                    }
                }
            }
        }

        let glyph_size = match preset.glyph_size {
            Some([w, h]) if w == 0 || h == 0 => {
                bail!("glyph size for '{}' must be non-empty, got {}x{}", variant, w, h)
            }
            Some([w, h]) => Some((w, h)),
            None => None,
        };
        let pattern = LayoutPattern::parse(&preset.pattern)
            .with_context(|| format!("invalid layout for plate variant '{}'", variant))?;

        let geometry = VariantGeometry {
            variant,
            asset_dir: preset.asset_dir,
            template: preset.template,
            pattern,
            initial: Cursor::new(preset.initial[0], preset.initial[1]),
            padding: preset.padding,
            line_restart: preset.line_restart,
            line_height: preset.line_height,
            glyph_size,
            remap,
        };
        debug!(
            variant = %variant,
            pattern = %preset.pattern,
            x = geometry.initial.x,
            y = geometry.initial.y,
            padding = geometry.padding,
            "resolved plate geometry"
        );
        Ok(geometry)
    }

    pub fn char_count(&self) -> usize {
        self.pattern.char_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_preset() {
        for variant in PlateVariant::ALL {
            let geometry = VariantGeometry::resolve(variant, None).expect("preset");
            assert_eq!(geometry.char_count(), 7, "{}", variant);
        }
        let standard = VariantGeometry::resolve(PlateVariant::Standard, None).expect("standard");
        assert_eq!(standard.initial, Cursor::new(30, 55));
        assert_eq!(standard.padding, 0);
        assert!(standard.pattern.has_dash());
        assert_eq!(standard.remap.get("O").map(String::as_str), Some("O0"));

        let mercosul = VariantGeometry::resolve(PlateVariant::Mercosul, None).expect("mercosul");
        assert!(!mercosul.pattern.has_dash());
        assert!(mercosul.remap.is_empty());

        let moto = VariantGeometry::resolve(PlateVariant::Motorcycle, None).expect("moto");
        assert_eq!(moto.pattern.lines(), 2);
    }

    #[test]
    fn embedded_presets_match_the_variant_enum() {
        let mut names: Vec<&str> = PlateVariant::ALL.iter().map(|v| v.name()).collect();
        names.sort_unstable();
        assert_eq!(EMBEDDED_VARIANT_NAMES, names.as_slice());
        assert!(embedded_variant_preset("mercosul_motorcycle").is_none());
    }

    #[test]
    fn variant_names_round_trip_through_from_str() {
        assert_eq!(
            "Mercosul_Motorcycle".parse::<PlateVariant>().expect("parse"),
            PlateVariant::MercosulMotorcycle
        );
        assert_eq!("red".parse::<PlateVariant>().expect("parse"), PlateVariant::Red);
        assert!("truck".parse::<PlateVariant>().is_err());
    }

    #[test]
    fn layout_pattern_rejects_unknown_slots() {
        assert!(LayoutPattern::parse("LLX").is_err());
        assert!(LayoutPattern::parse("-/").is_err());
        let pattern = LayoutPattern::parse("LLL/NLNN").expect("pattern");
        assert_eq!(pattern.char_count(), 7);
        assert_eq!(pattern.symbols().len(), 36);
    }

    #[test]
    fn overrides_replace_geometry_and_edit_remap() {
        let mut remap = HashMap::new();
        remap.insert("I".to_string(), String::new());
        remap.insert("B".to_string(), "B8".to_string());
        let overrides = VariantOverride {
            padding: Some(4),
            initial: Some([12, 14]),
            pattern: Some("LLLNNNN".to_string()),
            remap: Some(remap),
            ..VariantOverride::default()
        };
        let geometry =
            VariantGeometry::resolve(PlateVariant::Standard, Some(&overrides)).expect("resolve");
        assert_eq!(geometry.padding, 4);
        assert_eq!(geometry.initial, Cursor::new(12, 14));
        assert!(!geometry.pattern.has_dash());
        assert!(!geometry.remap.contains_key("I"));
        assert_eq!(geometry.remap.get("B").map(String::as_str), Some("B8"));
        assert_eq!(geometry.remap.get("O").map(String::as_str), Some("O0"));

        let bad = VariantOverride {
            glyph_size: Some([0, 10]),
            ..VariantOverride::default()
        };
        assert!(VariantGeometry::resolve(PlateVariant::Standard, Some(&bad)).is_err());
    }
}
