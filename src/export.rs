use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::augment::AugmentProfile;
use crate::plate::{BoundingBox, PlateRecord};
use crate::statistics::Statistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ImageFormat {
    #[serde(rename = "png")]
    Png,
    #[serde(rename = "jpg", alias = "jpeg")]
    Jpeg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    fn encoder(self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            other => Err(anyhow!("unsupported image format '{}' (expected png or jpg)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingScheme {
    /// `plate_<index:06>`
    Index,
    /// The plate text for its lowest index, `<text>_<index:06>` for repeats.
    Text,
}

/// Value of the first CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationStatus {
    Train,
    Test,
}

impl AnnotationStatus {
    pub fn for_profile(profile: Option<AugmentProfile>) -> Self {
        match profile {
            Some(AugmentProfile::Test) => AnnotationStatus::Test,
            Some(AugmentProfile::Train) | None => AnnotationStatus::Train,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationStatus::Train => "TRAIN",
            AnnotationStatus::Test => "TEST",
        }
    }
}

/// File name stem for a record under the given scheme.
pub fn file_stem(record: &PlateRecord, naming: NamingScheme) -> String {
    match naming {
        NamingScheme::Index => format!("plate_{:06}", record.index),
        NamingScheme::Text if record.text.is_empty() => format!("plate_{:06}", record.index),
        NamingScheme::Text => record.text.clone(),
    }
}

#[derive(Debug, Clone)]
pub struct ImageWriter {
    dir: PathBuf,
    format: ImageFormat,
    naming: NamingScheme,
}

impl ImageWriter {
    pub fn new(dir: &Path, format: ImageFormat, naming: NamingScheme) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            format,
            naming,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the record image and returns the file name it was stored under.
    ///
    /// Text names always carry the index here; `promote_text_names` hands the
    /// bare `<text>.<ext>` name out afterwards.
    pub fn write(&self, record: &PlateRecord) -> Result<String> {
        let ext = self.format.extension();
        let file_name = match self.naming {
            NamingScheme::Text if !record.text.is_empty() => {
                format!("{}_{:06}.{}", record.text, record.index, ext)
            }
            naming => format!("{}.{}", file_stem(record, naming), ext),
        };
        let path = self.dir.join(&file_name);
        let mut writer = BufWriter::new(create_file(&path)?);
        record
            .image
            .write_to(&mut writer, self.format.encoder())
            .with_context(|| format!("failed to encode {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(file_name)
    }

    /// Renames the lowest-index image of each plate text to `<text>.<ext>`.
    ///
    /// Returns the `(from, to)` file names that changed.
    pub fn promote_text_names(
        &self,
        entries: &mut [AnnotationEntry],
    ) -> Result<Vec<(String, String)>> {
        if self.naming != NamingScheme::Text {
            return Ok(Vec::new());
        }
        let mut first: HashMap<String, usize> = HashMap::new();
        for entry in entries.iter().filter(|entry| !entry.text.is_empty()) {
            let index = first.entry(entry.text.clone()).or_insert(entry.index);
            *index = (*index).min(entry.index);
        }

        let ext = self.format.extension();
        let mut renamed = Vec::new();
        for entry in entries.iter_mut() {
            if first.get(&entry.text) != Some(&entry.index) {
                continue;
            }
            let name = format!("{}.{}", entry.text, ext);
            let from = self.dir.join(&entry.file);
            let to = self.dir.join(&name);
            fs::rename(&from, &to).with_context(|| {
                format!("failed to rename {} to {}", from.display(), to.display())
            })?;
            renamed.push((std::mem::replace(&mut entry.file, name.clone()), name));
        }
        debug!(renamed = renamed.len(), "assigned text file names");
        Ok(renamed)
    }
}

fn create_file(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

/// What gets written about one stored image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationEntry {
    pub index: usize,
    pub file: String,
    pub width: u32,
    pub height: u32,
    pub text: String,
    pub boxes: Vec<BoundingBox>,
}

impl AnnotationEntry {
    pub fn new(record: &PlateRecord, file: impl Into<String>) -> Self {
        let (width, height) = record.image.dimensions();
        Self {
            index: record.index,
            file: file.into(),
            width,
            height,
            text: record.text.clone(),
            boxes: record.boxes.clone(),
        }
    }
}

fn normalized(value: f32, extent: u32) -> String {
    let ratio = if extent == 0 {
        0.0
    } else {
        (value / extent as f32).clamp(0.0, 1.0)
    };
    format!("{:.6}", ratio)
}

/// One row per box: `status, file, label, x1, y1, "", "", x2, y2, "", ""`.
pub fn write_annotations_csv<W: Write>(
    writer: W,
    entries: &[AnnotationEntry],
    status: AnnotationStatus,
    prefix: &str,
) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);
    for entry in entries {
        let file = format!("{}{}", prefix, entry.file);
        for bbox in &entry.boxes {
            wtr.write_record([
                status.as_str(),
                file.as_str(),
                bbox.label.as_str(),
                normalized(bbox.x_min, entry.width).as_str(),
                normalized(bbox.y_min, entry.height).as_str(),
                "",
                "",
                normalized(bbox.x_max, entry.width).as_str(),
                normalized(bbox.y_max, entry.height).as_str(),
                "",
                "",
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_annotations_csv_file(
    path: &Path,
    entries: &[AnnotationEntry],
    status: AnnotationStatus,
    prefix: &str,
) -> Result<()> {
    ensure_parent(path)?;
    let file = create_file(path)?;
    write_annotations_csv(BufWriter::new(file), entries, status, prefix)
        .with_context(|| format!("failed to write {}", path.display()))?;
    let rows: usize = entries.iter().map(|entry| entry.boxes.len()).sum();
    info!(path = %path.display(), rows, "wrote csv annotations");
    Ok(())
}

pub fn write_annotations_json(path: &Path, entries: &[AnnotationEntry]) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(entries)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), entries = entries.len(), "wrote json annotations");
    Ok(())
}

pub fn write_statistics_json(path: &Path, stats: &Statistics) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(stats.counts())?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), total = stats.total(), "wrote statistics");
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}
