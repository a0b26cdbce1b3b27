use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::RgbImage;
use resvg::render;
use std::io::Cursor;
use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Options, Tree, fontdb};

use crate::plate::BoundingBox;
use crate::statistics::Statistics;

const BOX_STROKE: &str = "#00c853";
const BAR_FILL: &str = "#1e88e5";

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .with_context(|| "failed to encode png")?;
    Ok(bytes)
}

/// The image with every box drawn on top, labels above the boxes.
pub fn render_boxes_svg(
    image_bytes: &[u8],
    image_mime: &str,
    width: u32,
    height: u32,
    boxes: &[BoundingBox],
) -> String {
    let encoded = BASE64.encode(image_bytes);
    let data_uri = format!("data:{};base64,{}", image_mime, encoded);

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = width,
        h = height
    ));

    for bbox in boxes {
        svg.push_str(&format!(
            r#"<rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" fill="none" stroke="{stroke}" stroke-width="1"/>"#,
            x = bbox.x_min,
            y = bbox.y_min,
            w = bbox.width().max(0.0),
            h = bbox.height().max(0.0),
            stroke = BOX_STROKE,
        ));
        if bbox.is_plate() {
            continue;
        }
        svg.push_str(&format!(
            r#"<text x="{x:.1}" y="{y:.1}" font-family="sans-serif" font-size="10" fill="{stroke}">{label}</text>"#,
            x = bbox.x_min,
            y = (bbox.y_min - 2.0).max(10.0),
            stroke = BOX_STROKE,
            label = escape_xml(&bbox.label),
        ));
    }

    svg.push_str("</svg>");
    svg
}

/// Bar chart of label counts in display order.
pub fn render_histogram_svg(stats: &Statistics) -> String {
    let entries = stats.ordered();
    let bar_w = 16.0_f32;
    let gap = 4.0_f32;
    let chart_h = 200.0_f32;
    let margin = 24.0_f32;
    let width = margin * 2.0 + entries.len() as f32 * (bar_w + gap);
    let height = chart_h + margin * 2.0;
    let max = entries.iter().map(|(_, count)| *count).max().unwrap_or(0).max(1);

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width.ceil() as u32,
        h = height.ceil() as u32
    ));
    svg.push_str(r##"<rect x="0" y="0" width="100%" height="100%" fill="#ffffff"/>"##);
    for (i, (label, count)) in entries.iter().enumerate() {
        let bar_h = chart_h * (*count as f32 / max as f32);
        let x = margin + i as f32 * (bar_w + gap);
        let y = margin + chart_h - bar_h;
        svg.push_str(&format!(
            r#"<rect x="{x:.1}" y="{y:.1}" width="{bar_w:.1}" height="{bar_h:.1}" fill="{fill}"><title>{label}: {count}</title></rect>"#,
            fill = BAR_FILL,
            label = escape_xml(label),
        ));
        svg.push_str(&format!(
            r#"<text x="{tx:.1}" y="{ty:.1}" font-family="sans-serif" font-size="10" text-anchor="middle">{label}</text>"#,
            tx = x + bar_w / 2.0,
            ty = margin + chart_h + 14.0,
            label = escape_xml(label),
        ));
    }
    svg.push_str("</svg>");
    svg
}

pub fn render_svg_bytes(svg: &str, output_mime: &str) -> Result<Vec<u8>> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    let options = Options {
        fontdb: Arc::new(db),
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    let image = image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))?;
    let format = image_format_from_mime(output_mime)
        .ok_or_else(|| anyhow!("unsupported output image mime '{}'", output_mime))?;
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    let encoded = match format {
        // No alpha channel in JPEG.
        image::ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(
            image::DynamicImage::ImageRgba8(image).to_rgb8(),
        ),
        _ => image::DynamicImage::ImageRgba8(image),
    };
    encoded
        .write_to(&mut cursor, format)
        .with_context(|| "failed to encode image from SVG")?;
    Ok(bytes)
}

/// Draws `boxes` over `image` and returns PNG bytes.
pub fn render_boxes_png(image: &RgbImage, boxes: &[BoundingBox]) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    let png = encode_png(image)?;
    let svg = render_boxes_svg(&png, "image/png", width, height, boxes);
    render_svg_bytes(&svg, "image/png")
}

fn image_format_from_mime(mime: &str) -> Option<image::ImageFormat> {
    match mime {
        "image/png" => Some(image::ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Some(image::ImageFormat::Jpeg),
        _ => None,
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
