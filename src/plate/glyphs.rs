use anyhow::{Context, Result, anyhow};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::VariantGeometry;

/// Pre-rendered glyph rasters for every symbol a variant can paste.
#[derive(Debug, Clone)]
pub struct GlyphSet {
    dir: PathBuf,
    glyphs: HashMap<char, RgbaImage>,
}

pub fn glyph_file_name(name: &str) -> String {
    format!("{}.png", name)
}

impl GlyphSet {
    /// Loads and, when the geometry asks for it, resizes every glyph.
    ///
    /// A symbol resolves to `<symbol>.png`; only when that file is missing is
    /// the remap table consulted. A symbol with neither is fatal.
    pub fn load(dir: &Path, geometry: &VariantGeometry) -> Result<Self> {
        let mut glyphs = HashMap::new();
        for symbol in geometry.pattern.symbols() {
            let path = resolve_asset(dir, symbol, &geometry.remap)?;
            let glyph = image::open(&path)
                .with_context(|| format!("failed to decode glyph: {}", path.display()))?
                .to_rgba8();
            let glyph = match geometry.glyph_size {
                Some((w, h)) if glyph.dimensions() != (w, h) => {
                    imageops::resize(&glyph, w, h, FilterType::Triangle)
                }
                _ => glyph,
            };
            glyphs.insert(symbol, glyph);
        }
        debug!(dir = %dir.display(), count = glyphs.len(), "loaded glyph assets");
        Ok(Self {
            dir: dir.to_path_buf(),
            glyphs,
        })
    }

    pub fn get(&self, symbol: char) -> Result<&RgbaImage> {
        self.glyphs.get(&symbol).ok_or_else(|| {
            anyhow!(
                "glyph asset not found for '{}' in {}",
                symbol,
                self.dir.display()
            )
        })
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

fn resolve_asset(dir: &Path, symbol: char, remap: &HashMap<String, String>) -> Result<PathBuf> {
    let key = symbol.to_string();
    let direct = dir.join(glyph_file_name(&key));
    if direct.is_file() {
        return Ok(direct);
    }
    if let Some(target) = remap.get(&key) {
        let fallback = dir.join(glyph_file_name(target));
        if fallback.is_file() {
            debug!(symbol = %symbol, asset = %target, "using remapped glyph");
            return Ok(fallback);
        }
        return Err(anyhow!(
            "glyph asset not found for '{}' in {} (tried {} and {})",
            symbol,
            dir.display(),
            direct.display(),
            fallback.display()
        ));
    }
    Err(anyhow!(
        "glyph asset not found for '{}' in {}",
        symbol,
        dir.display()
    ))
}
