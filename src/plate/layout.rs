use anyhow::{Result, anyhow};
use image::RgbaImage;
use image::imageops;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::warn;

use super::variant::{DASH, DIGITS, LETTERS};
use super::{BoundingBox, Cursor, GlyphSet, PLATE_LABEL, Slot, VariantGeometry};
use crate::statistics::Statistics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Record a box for the dash glyph (it is pasted either way).
    pub include_dash: bool,
    /// Append a box covering the whole plate.
    pub include_plate_box: bool,
}

#[derive(Debug, Clone)]
pub struct ComposedPlate {
    pub image: RgbaImage,
    pub boxes: Vec<BoundingBox>,
    pub text: String,
}

/// Pastes glyphs at an advancing cursor and records their boxes.
pub struct LayoutEngine<'a> {
    geometry: &'a VariantGeometry,
    glyphs: &'a GlyphSet,
    cursor: Cursor,
    boxes: Vec<BoundingBox>,
}

impl<'a> LayoutEngine<'a> {
    pub fn new(geometry: &'a VariantGeometry, glyphs: &'a GlyphSet) -> Self {
        Self {
            geometry,
            glyphs,
            cursor: geometry.initial,
            boxes: Vec::new(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn place(
        &mut self,
        canvas: &mut RgbaImage,
        symbol: char,
        record: bool,
        stats: &mut Statistics,
    ) -> Result<()> {
        let glyph = self.glyphs.get(symbol)?;
        let (glyph_w, glyph_h) = glyph.dimensions();
        let Cursor { x, y } = self.cursor;

        imageops::overlay(canvas, glyph, i64::from(x), i64::from(y));
        if record {
            let bbox = BoundingBox::new(
                x as f32,
                y as f32,
                x.saturating_add(glyph_w) as f32,
                y.saturating_add(glyph_h) as f32,
                symbol.to_string(),
            );
            if bbox.x_max > canvas.width() as f32 || bbox.y_max > canvas.height() as f32 {
                warn!(
                    symbol = %symbol,
                    x_max = bbox.x_max,
                    y_max = bbox.y_max,
                    "glyph extends past the plate template"
                );
            }
            self.boxes.push(bbox);
        }
        self.cursor.advance(glyph_w, self.geometry.padding);
        stats.record(&symbol.to_string());
        Ok(())
    }

    pub fn line_break(&mut self) {
        self.cursor
            .line_break(self.geometry.line_restart, self.geometry.line_height);
    }

    pub fn finish(self) -> Vec<BoundingBox> {
        self.boxes
    }
}

/// Assembles one plate on a copy of `template`, choosing every symbol at random.
pub fn compose_plate<R: Rng + ?Sized>(
    template: &RgbaImage,
    geometry: &VariantGeometry,
    glyphs: &GlyphSet,
    rng: &mut R,
    stats: &mut Statistics,
    options: ComposeOptions,
) -> Result<ComposedPlate> {
    let mut image = template.clone();
    let mut engine = LayoutEngine::new(geometry, glyphs);
    let mut text = String::with_capacity(geometry.char_count());

    for slot in geometry.pattern.slots() {
        match slot {
            Slot::Letter => {
                let symbol = pick(&LETTERS, rng)?;
                engine.place(&mut image, symbol, true, stats)?;
                text.push(symbol);
            }
            Slot::Number => {
                let symbol = pick(&DIGITS, rng)?;
                engine.place(&mut image, symbol, true, stats)?;
                text.push(symbol);
            }
            Slot::Dash => {
                engine.place(&mut image, DASH, options.include_dash, stats)?;
            }
            Slot::LineBreak => engine.line_break(),
        }
    }

    let mut boxes = engine.finish();
    if options.include_plate_box {
        let (w, h) = image.dimensions();
        boxes.push(BoundingBox::new(0.0, 0.0, w as f32, h as f32, PLATE_LABEL));
        stats.record(PLATE_LABEL);
    }

    Ok(ComposedPlate { image, boxes, text })
}

fn pick<R: Rng + ?Sized>(alphabet: &[char], rng: &mut R) -> Result<char> {
    alphabet
        .choose(rng)
        .copied()
        .ok_or_else(|| anyhow!("cannot pick a symbol from an empty alphabet"))
}
