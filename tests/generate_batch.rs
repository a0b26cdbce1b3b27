use std::path::{Path, PathBuf};

use anyhow::Result;
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use plate_generator_rust::plate::{VariantGeometry, glyph_file_name};
use plate_generator_rust::settings::Settings;
use plate_generator_rust::{
    Augmenter, BackgroundOptions, BoundingBox, GeneratorOptions, PlateGenerator, PlateVariant,
    Statistics,
};
use plate_generator_rust::background::Placement;
use rand::rngs::StdRng;

fn write_assets(root: &Path, variant: PlateVariant) -> PathBuf {
    let geometry = VariantGeometry::resolve(variant, None).unwrap();
    let dir = root.join(&geometry.asset_dir);
    std::fs::create_dir_all(&dir).unwrap();
    RgbImage::from_pixel(400, 180, Rgb([240, 240, 240]))
        .save(dir.join(&geometry.template))
        .unwrap();
    for symbol in geometry.pattern.symbols() {
        let name = geometry
            .remap
            .get(&symbol.to_string())
            .cloned()
            .unwrap_or_else(|| symbol.to_string());
        let width = 18 + (symbol as u32 % 3);
        let height = if symbol == '-' { 6 } else { 32 };
        RgbaImage::from_pixel(width, height, Rgba([15, 15, 15, 255]))
            .save(dir.join(glyph_file_name(&name)))
            .unwrap();
    }
    root.to_path_buf()
}

#[test]
fn every_variant_emits_its_character_count() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = Settings::default();
    for variant in PlateVariant::ALL {
        let data = write_assets(tmp.path(), variant);
        let generator =
            PlateGenerator::new(GeneratorOptions::new(variant, &data, 11), &settings).unwrap();
        let expected = generator.geometry().char_count();
        let mut stats = Statistics::new();
        let records = generator.generate(6, &mut stats).unwrap();
        for record in &records {
            assert_eq!(record.character_boxes().count(), expected, "{variant}");
            assert_eq!(record.text.chars().count(), expected);
        }
        let dashes = if generator.geometry().pattern.has_dash() { 6 } else { 0 };
        assert_eq!(stats.total(), (6 * expected + dashes) as u64, "{variant}");
    }
}

#[test]
fn fixed_seed_without_augmentation_is_byte_identical() {
    let tmp = tempfile::tempdir().unwrap();
    let data = write_assets(tmp.path(), PlateVariant::Standard);
    let settings = Settings::default();
    let encode = |seed: u64| {
        let generator = PlateGenerator::new(
            GeneratorOptions::new(PlateVariant::Standard, &data, seed),
            &settings,
        )
        .unwrap();
        let record = generator.generate_one(0, &mut Statistics::new()).unwrap();
        let mut bytes = Vec::new();
        record
            .image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    };
    assert_eq!(encode(123), encode(123));
}

#[test]
fn background_insertion_fills_the_canvas() {
    let tmp = tempfile::tempdir().unwrap();
    let data = write_assets(tmp.path(), PlateVariant::Mercosul);
    let backgrounds = tmp.path().join("backgrounds");
    std::fs::create_dir_all(&backgrounds).unwrap();
    RgbImage::from_pixel(200, 100, Rgb([90, 90, 200]))
        .save(backgrounds.join("sky.png"))
        .unwrap();

    let mut options = GeneratorOptions::new(PlateVariant::Mercosul, &data, 3);
    options.background = Some(BackgroundOptions {
        dir: backgrounds,
        patterns: vec!["*.png".to_string()],
        canvas: (800, 600),
        placement: Placement::Centered,
    });
    let generator = PlateGenerator::new(options, &Settings::default()).unwrap();
    let record = generator.generate_one(0, &mut Statistics::new()).unwrap();
    assert_eq!(record.image.dimensions(), (800, 600));
    // Centered on an 800x600 canvas a 400x180 plate starts at (200, 210).
    assert!(record.boxes.iter().all(|bbox| bbox.x_min >= 200.0 && bbox.y_min >= 210.0));
    assert!(record.boxes.iter().all(|bbox| bbox.x_max <= 600.0 && bbox.y_max <= 390.0));
}

struct MirrorAugmenter;

impl Augmenter for MirrorAugmenter {
    fn augment(
        &self,
        image: RgbImage,
        boxes: Vec<BoundingBox>,
        _rng: &mut StdRng,
    ) -> Result<(RgbImage, Vec<BoundingBox>)> {
        let width = image.width() as f32;
        let boxes = boxes
            .into_iter()
            .map(|bbox| {
                BoundingBox::new(
                    width - bbox.x_max,
                    bbox.y_min,
                    width - bbox.x_min,
                    bbox.y_max,
                    bbox.label,
                )
            })
            .collect();
        Ok((image::imageops::flip_horizontal(&image), boxes))
    }
}

#[test]
fn custom_augmenters_plug_into_the_generator() {
    let tmp = tempfile::tempdir().unwrap();
    let data = write_assets(tmp.path(), PlateVariant::Standard);
    let settings = Settings::default();
    let options = GeneratorOptions::new(PlateVariant::Standard, &data, 8);
    let plain = PlateGenerator::new(options.clone(), &settings).unwrap();
    let mirrored = PlateGenerator::new(options, &settings)
        .unwrap()
        .with_augmenter(Box::new(MirrorAugmenter));

    let a = plain.generate_one(2, &mut Statistics::new()).unwrap();
    let b = mirrored.generate_one(2, &mut Statistics::new()).unwrap();
    assert_eq!(a.text, b.text);
    assert_eq!(a.boxes[0].x_min, 400.0 - b.boxes[0].x_max);
    assert_eq!(a.boxes[0].label, b.boxes[0].label);
}
