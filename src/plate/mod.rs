mod glyphs;
mod layout;
mod variant;

use image::RgbImage;
use serde::Serialize;

pub use glyphs::{GlyphSet, glyph_file_name};
pub use layout::{ComposeOptions, ComposedPlate, LayoutEngine, compose_plate};
pub use variant::{DASH, DIGITS, LETTERS, LayoutPattern, PlateVariant, Slot, VariantGeometry};

/// Label of the whole-plate box.
pub const PLATE_LABEL: &str = "plate";
pub const DASH_LABEL: &str = "-";

/// Axis-aligned box in pixel coordinates of the image it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    pub label: String,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32, label: impl Into<String>) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
            label: label.into(),
        }
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    pub fn is_valid(&self) -> bool {
        self.x_min < self.x_max && self.y_min < self.y_max
    }

    pub fn is_plate(&self) -> bool {
        self.label == PLATE_LABEL
    }

    pub fn translated(&self, dx: f32, dy: f32) -> BoundingBox {
        BoundingBox {
            x_min: self.x_min + dx,
            y_min: self.y_min + dy,
            x_max: self.x_max + dx,
            y_max: self.y_max + dy,
            label: self.label.clone(),
        }
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> BoundingBox {
        BoundingBox {
            x_min: self.x_min * sx,
            y_min: self.y_min * sy,
            x_max: self.x_max * sx,
            y_max: self.y_max * sy,
            label: self.label.clone(),
        }
    }
}

/// Running paste position while a plate is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub x: u32,
    pub y: u32,
}

impl Cursor {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub fn reset(&mut self, origin: Cursor) {
        *self = origin;
    }

    pub fn advance(&mut self, width: u32, padding: u32) {
        self.x = self.x.saturating_add(width).saturating_add(padding);
    }

    pub fn line_break(&mut self, restart_x: u32, line_height: u32) {
        self.x = restart_x;
        self.y = self.y.saturating_add(line_height);
    }
}

/// One generated sample, owned by the caller once returned.
#[derive(Debug, Clone)]
pub struct PlateRecord {
    pub index: usize,
    pub image: RgbImage,
    pub boxes: Vec<BoundingBox>,
    /// Letters and digits in placement order.
    pub text: String,
}

impl PlateRecord {
    pub fn character_boxes(&self) -> impl Iterator<Item = &BoundingBox> {
        self.boxes.iter().filter(|bbox| !bbox.is_plate())
    }
}
