//! mapforge-analysis: blueprint-leak detection for generated maps (sans-IO).
//!
//! A generated map "leaks" when the raw, flat-colored regions of the
//! user's blueprint survive into the model's output. Detection runs:
//!
//! decode -> classify (flat patches, palette matches) -> cluster ->
//! solidity check -> heatmap.
//!
//! Also provides diff maps between consecutive revisions.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! byte slices and bitmaps. Threading lives in `mapforge-worker`, the
//! refinement loop in `mapforge-refine`.

pub mod classify;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod detect;
pub mod diagnostics;
pub mod diff;
pub mod heatmap;
pub mod hull;
pub mod palette;
pub mod types;

pub use classify::{Classification, classify};
pub use cluster::{Cluster, ClusterScan, find_clusters, needs_refinement};
pub use codec::{EncodedImage, decode_rgba, encode_png};
pub use config::{DetectionConfig, DetectionThresholds, OutputStyle};
pub use detect::{Detection, detect, detect_image};
pub use diagnostics::{DetectionDiagnostics, StageDiagnostics, StageMetrics};
pub use diff::{DIFF_HIGHLIGHT, diff_encoded, diff_map};
pub use heatmap::{LEAK_HIGHLIGHT, render_heatmap};
pub use hull::{convex_hull, polygon_area};
pub use palette::{Palette, PaletteEntry};
pub use types::{AnalysisError, Dimensions, LeakMask, Rgb, RgbaImage};
