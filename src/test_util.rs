#[cfg(test)]
use crate::plate::{VariantGeometry, glyph_file_name};

#[cfg(test)]
pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&std::path::Path) -> R,
{
    static HOME_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let _guard = HOME_MUTEX.lock().unwrap_or_else(|err| err.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let old_home = std::env::var("HOME").ok();
    // SAFETY: every test that touches HOME holds HOME_MUTEX.
    unsafe { std::env::set_var("HOME", dir.path()) };
    let result = func(dir.path());
    if let Some(old) = old_home {
        unsafe { std::env::set_var("HOME", old) };
    } else {
        unsafe { std::env::remove_var("HOME") };
    }
    result
}

/// Writes a template plus one glyph per symbol the geometry can emit.
///
/// Symbols listed in the remap table only get their remapped raster, so the
/// fallback path is exercised. Glyph widths vary per symbol.
#[cfg(test)]
pub(crate) fn write_variant_fixture(
    root: &std::path::Path,
    geometry: &VariantGeometry,
) -> std::path::PathBuf {
    let dir = root.join(&geometry.asset_dir);
    std::fs::create_dir_all(&dir).expect("fixture dir");
    let (w, h) = if geometry.pattern.lines() > 1 {
        (220, 180)
    } else {
        (400, 130)
    };
    let template = image::RgbImage::from_pixel(w, h, image::Rgb([235, 235, 235]));
    template
        .save(dir.join(&geometry.template))
        .expect("write template");

    for symbol in geometry.pattern.symbols() {
        let file = match geometry.remap.get(&symbol.to_string()) {
            Some(target) => glyph_file_name(target),
            None => glyph_file_name(&symbol.to_string()),
        };
        let path = dir.join(file);
        if path.exists() {
            continue;
        }
        fixture_glyph(symbol).save(&path).expect("write glyph");
    }
    dir
}

#[cfg(test)]
pub(crate) fn fixture_glyph(symbol: char) -> image::RgbaImage {
    let width = 16 + (symbol as u32 % 5);
    let height = if symbol == '-' { 8 } else { 30 };
    image::RgbaImage::from_fn(width, height, |x, y| {
        if x >= 2 && x + 2 < width && y >= 1 && y + 1 < height {
            image::Rgba([20, 20, 20, 255])
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    })
}
