//! mapforge-bench: CLI tool for leak-detection tuning and diagnostics.
//!
//! Runs blueprint-leak detection (or a revision diff) on image files with
//! configurable thresholds, printing per-stage diagnostics. Useful for:
//!
//! - Tuning size, color, flatness and solidity thresholds per style
//! - Inspecting which clusters exist and how solid they are
//! - Writing heatmap and diff overlays for visual inspection
//! - Measuring per-stage durations
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin mapforge-bench -- detect [OPTIONS] <IMAGE_PATH>
//! cargo run --release --bin mapforge-bench -- diff [OPTIONS] <BEFORE> <AFTER>
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default
//! `warn`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use mapforge_analysis::{DetectionConfig, DetectionDiagnostics, OutputStyle};
use tracing_subscriber::EnvFilter;

/// Leak-detection tuning and diagnostics for mapforge.
#[derive(Parser)]
#[command(name = "mapforge-bench", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run leak detection on a generated map.
    Detect(DetectArgs),
    /// Render the diff map between two revisions.
    Diff(DiffArgs),
}

#[derive(Args)]
struct DetectArgs {
    /// Path to the generated map (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Output style whose thresholds apply.
    #[arg(long, value_enum, default_value_t = Style::Realistic)]
    style: Style,

    /// Override: minimum cluster size (exclusive).
    #[arg(long)]
    cluster_size: Option<usize>,

    /// Override: palette match tolerance (squared RGB distance).
    #[arg(long)]
    color_match_sq: Option<u32>,

    /// Override: flat-patch tolerance (squared RGB distance, 0 disables).
    #[arg(long)]
    flatness_sq: Option<u32>,

    /// Override: cluster window radius in pixels.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    radius: Option<u32>,

    /// Override: solidity threshold.
    #[arg(long)]
    solidity: Option<f64>,

    /// Full detection config as a JSON string.
    ///
    /// When provided, the individual threshold flags are ignored. The
    /// JSON must be a valid `DetectionConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Write the leak heatmap PNG to this path.
    #[arg(long)]
    heatmap: Option<PathBuf>,

    /// List the largest clusters with their solidity.
    #[arg(long, value_name = "N")]
    clusters: Option<usize>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DiffArgs {
    /// The earlier revision.
    before: PathBuf,

    /// The later revision.
    after: PathBuf,

    /// Squared RGB distance above which a pixel counts as changed.
    #[arg(long, default_value_t = DetectionConfig::DEFAULT_DIFF_THRESHOLD_SQ)]
    threshold_sq: u32,

    /// Write the diff overlay PNG to this path.
    #[arg(long)]
    output: Option<PathBuf>,
}

/// Output style selection.
#[derive(Clone, Copy, ValueEnum)]
enum Style {
    /// Blended, painterly terrain.
    Realistic,
    /// Flat-shaded, blocky terrain.
    Stylized,
}

impl From<Style> for OutputStyle {
    fn from(style: Style) -> Self {
        match style {
            Style::Realistic => Self::Realistic,
            Style::Stylized => Self::Stylized,
        }
    }
}

/// Build a [`DetectionConfig`] from CLI arguments.
///
/// If `--config-json` is provided it is parsed directly and the
/// individual threshold flags are ignored. Otherwise the flags override
/// the preset of the selected style.
fn config_from_cli(args: &DetectArgs) -> Result<DetectionConfig, String> {
    let config = if let Some(ref json) = args.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        let mut config = DetectionConfig::default();
        let thresholds = match OutputStyle::from(args.style) {
            OutputStyle::Realistic => &mut config.realistic,
            OutputStyle::Stylized => &mut config.stylized,
        };
        if let Some(size) = args.cluster_size {
            thresholds.cluster_size_threshold = size;
        }
        if let Some(sq) = args.color_match_sq {
            thresholds.color_match_threshold_sq = sq;
        }
        if let Some(sq) = args.flatness_sq {
            thresholds.flatness_threshold_sq = (sq > 0).then_some(sq);
        }
        if let Some(radius) = args.radius {
            thresholds.neighborhood_radius = radius;
        }
        if let Some(solidity) = args.solidity {
            thresholds.solidity_threshold = solidity;
        }
        config
    };

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Detect(args) => run_detect(&args),
        Command::Diff(args) => run_diff(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
}

fn write_png(path: &Path, bytes: &[u8], what: &str) {
    match std::fs::write(path, bytes) {
        Ok(()) => eprintln!("{what} written to {} ({} bytes)", path.display(), bytes.len()),
        Err(e) => eprintln!("Error writing {what} to {}: {e}", path.display()),
    }
}

fn run_detect(args: &DetectArgs) -> Result<(), String> {
    let config = config_from_cli(args)?;
    let style = OutputStyle::from(args.style);
    let image_bytes = read_image(&args.image_path)?;
    tracing::debug!(?config, "detection config");

    eprintln!(
        "Image: {} ({} bytes)",
        args.image_path.display(),
        image_bytes.len(),
    );
    eprintln!("Style: {style}");
    eprintln!("Thresholds: {:#?}", config.thresholds_for(style));
    eprintln!("Runs: {}", args.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(args.runs);

    for run in 0..args.runs {
        if args.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, args.runs);
        }

        let detection = mapforge_analysis::detect(&image_bytes, &config, style)
            .map_err(|e| format!("Detection error: {e}"))?;

        if args.json {
            let json = serde_json::to_string_pretty(&detection.diagnostics)
                .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
            println!("{json}");
        } else {
            println!("{}", detection.diagnostics.report());
        }

        if run == 0 {
            if let Some(ref path) = args.heatmap {
                match detection.leak_map {
                    Some(ref png) => write_png(path, png.as_bytes(), "Heatmap"),
                    None => eprintln!("No leak pixels; heatmap not written"),
                }
            }
            if let Some(limit) = args.clusters {
                print_clusters(&detection.mask, config.thresholds_for(style).neighborhood_radius, limit);
            }
        }

        all_diagnostics.push(detection.diagnostics);

        if args.runs > 1 {
            eprintln!();
        }
    }

    if args.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    Ok(())
}

fn run_diff(args: &DiffArgs) -> Result<(), String> {
    let before = mapforge_analysis::EncodedImage::from_bytes(read_image(&args.before)?);
    let after = mapforge_analysis::EncodedImage::from_bytes(read_image(&args.after)?);

    match mapforge_analysis::diff_encoded(&before, &after, args.threshold_sq)
        .map_err(|e| format!("Diff error: {e}"))?
    {
        Some(overlay) => {
            println!("Pixels changed above threshold {}", args.threshold_sq);
            if let Some(ref path) = args.output {
                write_png(path, overlay.as_bytes(), "Diff map");
            }
        }
        None => println!("No visible change"),
    }
    Ok(())
}

/// Print the `limit` largest clusters.
fn print_clusters(mask: &mapforge_analysis::LeakMask, radius: u32, limit: usize) {
    let clusters = mapforge_analysis::find_clusters(mask, radius);
    println!();
    println!("Clusters ({} total, radius {radius})", clusters.len());
    println!("{:>4} {:>10} {:>6} {:>12} {:>10}", "#", "Pixels", "Hull", "Hull area", "Solidity");
    println!("{}", "-".repeat(47));
    for (i, cluster) in clusters.iter().take(limit).enumerate() {
        let solidity = cluster
            .solidity()
            .map_or_else(|| "-".to_string(), |s| format!("{s:.3}"));
        println!(
            "{:>4} {:>10} {:>6} {:>12.1} {:>10}",
            i + 1,
            cluster.pixel_count(),
            cluster.hull().len(),
            cluster.hull_area(),
            solidity,
        );
    }
}

/// Min, mean and max of one stage's duration across runs, in
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Timing {
    samples: usize,
    min_ms: f64,
    mean_ms: f64,
    max_ms: f64,
}

impl Timing {
    #[allow(clippy::cast_precision_loss)]
    fn of(durations: impl IntoIterator<Item = Duration>) -> Option<Self> {
        let ms: Vec<f64> = durations
            .into_iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        if ms.is_empty() {
            return None;
        }
        Some(Self {
            samples: ms.len(),
            min_ms: ms.iter().copied().fold(f64::INFINITY, f64::min),
            mean_ms: ms.iter().sum::<f64>() / ms.len() as f64,
            max_ms: ms.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Per-stage durations of one run. Render is absent for clean maps.
fn stage_durations(d: &DetectionDiagnostics) -> [(&'static str, Option<Duration>); 5] {
    [
        ("decode", Some(d.decode.duration)),
        ("classify", Some(d.classify.duration)),
        ("cluster", Some(d.cluster.duration)),
        ("render", d.render.as_ref().map(|s| s.duration)),
        ("total", Some(d.total_duration)),
    ]
}

/// Timing per stage across runs, skipping stages no run reached.
fn stage_timings(all_diagnostics: &[DetectionDiagnostics]) -> Vec<(&'static str, Timing)> {
    let per_run: Vec<_> = all_diagnostics.iter().map(stage_durations).collect();
    let Some(first) = per_run.first() else {
        return Vec::new();
    };
    first
        .iter()
        .enumerate()
        .filter_map(|(i, &(name, _))| {
            Timing::of(per_run.iter().filter_map(|stages| stages[i].1)).map(|t| (name, t))
        })
        .collect()
}

/// Whether every run produced the same verdict and leak count.
fn verdict_is_stable(all_diagnostics: &[DetectionDiagnostics]) -> bool {
    all_diagnostics.windows(2).all(|pair| {
        let (a, b) = (&pair[0].summary, &pair[1].summary);
        a.needs_refinement == b.needs_refinement && a.leak_pixel_count == b.leak_pixel_count
    })
}

/// Print per-stage min/mean/max across runs and flag verdict drift.
fn print_multi_run_summary(all_diagnostics: &[DetectionDiagnostics]) {
    println!();
    println!("Summary ({} runs)", all_diagnostics.len());
    println!("{:<10} {:>5} {:>10} {:>10} {:>10}", "Stage", "Runs", "Min ms", "Mean ms", "Max ms");
    println!("{}", "-".repeat(49));
    for (name, t) in stage_timings(all_diagnostics) {
        println!(
            "{name:<10} {:>5} {:>10.3} {:>10.3} {:>10.3}",
            t.samples, t.min_ms, t.mean_ms, t.max_ms,
        );
    }
    if !verdict_is_stable(all_diagnostics) {
        println!();
        println!("Warning: verdict or leak count differed between runs");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn detect_args(extra: &[&str]) -> DetectArgs {
        let mut argv = vec!["mapforge-bench", "detect", "map.png"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Detect(args) => args,
            Command::Diff(_) => unreachable!("parsed a detect command"),
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_selected_style_only() {
        let args = detect_args(&["--style", "stylized", "--cluster-size", "99", "--flatness-sq", "25"]);
        let config = config_from_cli(&args).unwrap();
        assert_eq!(config.stylized.cluster_size_threshold, 99);
        assert_eq!(config.stylized.flatness_threshold_sq, Some(25));
        assert_eq!(config.realistic, DetectionConfig::default().realistic);
    }

    #[test]
    fn zero_flatness_disables_pass() {
        let config = config_from_cli(&detect_args(&["--flatness-sq", "0"])).unwrap();
        assert_eq!(config.realistic.flatness_threshold_sq, None);
    }

    #[test]
    fn config_json_replaces_flags() {
        let mut custom = DetectionConfig::default();
        custom.realistic.solidity_threshold = 0.5;
        let json = serde_json::to_string(&custom).unwrap();
        let config =
            config_from_cli(&detect_args(&["--config-json", &json, "--solidity", "0.9"])).unwrap();
        assert!((config.realistic.solidity_threshold - 0.5).abs() < f64::EPSILON);
    }

    fn diagnostics_for(image: &mapforge_analysis::RgbaImage) -> DetectionDiagnostics {
        mapforge_analysis::detect_image(image, &DetectionConfig::default(), OutputStyle::Stylized)
            .unwrap()
            .diagnostics
    }

    #[test]
    fn timing_spans_min_to_max() {
        let t = Timing::of([
            Duration::from_millis(2),
            Duration::from_millis(4),
            Duration::from_millis(9),
        ])
        .unwrap();
        assert_eq!(t.samples, 3);
        assert!((t.min_ms - 2.0).abs() < 1e-9);
        assert!((t.mean_ms - 5.0).abs() < 1e-9);
        assert!((t.max_ms - 9.0).abs() < 1e-9);
        assert!(Timing::of(Vec::<Duration>::new()).is_none());
    }

    #[test]
    fn render_stage_is_skipped_when_no_run_rendered() {
        let clean = mapforge_analysis::RgbaImage::new(8, 8);
        let runs = vec![diagnostics_for(&clean), diagnostics_for(&clean)];
        let names: Vec<_> = stage_timings(&runs).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["decode", "classify", "cluster", "total"]);
        assert!(stage_timings(&[]).is_empty());
    }

    #[test]
    fn verdict_drift_is_detected() {
        let clean = diagnostics_for(&mapforge_analysis::RgbaImage::new(8, 8));
        let mut drifted = clean.clone();
        drifted.summary.leak_pixel_count += 1;
        assert!(verdict_is_stable(&[clean.clone(), clean.clone()]));
        assert!(!verdict_is_stable(&[clean, drifted]));
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let err = config_from_cli(&detect_args(&["--solidity=-1"])).unwrap_err();
        assert!(err.contains("solidity"), "{err}");
        assert!(config_from_cli(&detect_args(&["--config-json", "{"])).is_err());
    }
}
