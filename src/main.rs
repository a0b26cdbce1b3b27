use anyhow::Result;
use clap::Parser;

use plate_generator_rust::{Config, format_statistics};

#[derive(Parser, Debug)]
#[command(
    name = "plate-generator-rust",
    version,
    about = "Generate synthetic license plate images with character boxes"
)]
struct Cli {
    /// Number of plates to generate
    count: Option<usize>,

    /// Plate variant (standard, red, mercosul, motorcycle, mercosul-motorcycle)
    #[arg(short = 'v', long = "variant")]
    variant: Option<String>,

    /// Random seed; the same seed reproduces the same batch
    #[arg(short = 's', long = "seed")]
    seed: Option<u64>,

    /// Record a box for the dash glyph
    #[arg(long = "dash")]
    dash: bool,

    /// Append a box covering the whole plate
    #[arg(long = "plate-box")]
    plate_box: bool,

    /// Skip the augmentation stage
    #[arg(long = "no-augment")]
    no_augment: bool,

    /// Augmentation profile (train or test)
    #[arg(short = 'p', long = "profile")]
    profile: Option<String>,

    /// Resize to a random multiple of the reference plate size before augmenting
    #[arg(long = "resize")]
    resize: bool,

    /// Paste each plate onto a random background image
    #[arg(short = 'b', long = "background")]
    background: bool,

    /// Background placement (centered or random)
    #[arg(long = "placement")]
    placement: Option<String>,

    /// Root directory of glyph and template assets
    #[arg(long = "data-dir")]
    data_dir: Option<String>,

    /// Directory of background images
    #[arg(long = "background-dir")]
    background_dir: Option<String>,

    /// Directory generated images are written to
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<String>,

    /// Image format (png or jpg)
    #[arg(short = 'f', long = "format")]
    format: Option<String>,

    /// Name files by plate text instead of index
    #[arg(long = "name-by-text")]
    name_by_text: bool,

    /// Write box annotations to a CSV file
    #[arg(long = "csv")]
    csv: Option<String>,

    /// Write box annotations to a JSON file
    #[arg(long = "annotations")]
    annotations: Option<String>,

    /// Also write <name>_bbox.png with the boxes drawn
    #[arg(long = "debug-boxes")]
    debug_boxes: bool,

    /// Print character counts and write statistics.png/statistics.json
    #[arg(long = "show-statistics")]
    show_statistics: bool,

    /// Worker threads (default: number of CPUs)
    #[arg(short = 'j', long = "jobs")]
    jobs: Option<usize>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    plate_generator_rust::logging::init(cli.verbose)?;

    let Some(count) = cli.count else {
        println!("You should specify the number of plates");
        return Ok(());
    };

    let config = Config {
        count,
        variant: cli.variant,
        seed: cli.seed,
        include_dash: cli.dash,
        include_plate_box: cli.plate_box,
        no_augment: cli.no_augment,
        profile: cli.profile,
        resize: cli.resize,
        background: cli.background,
        placement: cli.placement,
        data_dir: cli.data_dir,
        background_dir: cli.background_dir,
        output_dir: cli.output_dir,
        format: cli.format,
        name_by_text: cli.name_by_text,
        csv_path: cli.csv,
        annotations_path: cli.annotations,
        debug_boxes: cli.debug_boxes,
        show_statistics: cli.show_statistics,
        jobs: cli.jobs,
        settings_path: cli.read_settings,
    };
    let summary = plate_generator_rust::run(config)?;

    println!(
        "Plates generated successfully in {:.2} seconds",
        summary.elapsed.as_secs_f64()
    );
    println!("images: {} ({})", summary.output_dir.display(), summary.generated);
    println!("seed: {}", summary.seed);
    if let Some(path) = &summary.csv_path {
        println!("csv: {}", path.display());
    }
    if let Some(path) = &summary.annotations_path {
        println!("annotations: {}", path.display());
    }
    if let Some((json, png)) = &summary.statistics_paths {
        println!("{}", format_statistics(&summary.statistics));
        println!("statistics: {} {}", json.display(), png.display());
    }
    Ok(())
}
