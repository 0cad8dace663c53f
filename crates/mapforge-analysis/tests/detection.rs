//! Integration tests: synthetic maps through the full detection path.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use image::Rgba;
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};
use mapforge_analysis::{
    DetectionConfig, OutputStyle, RgbaImage, detect, diff_encoded, encode_png, find_clusters,
};

const WATER: Rgba<u8> = Rgba([0x1e, 0x64, 0xc8, 255]);

/// Blended-looking terrain: a checkerboard of two greens that matches no
/// palette entry and forms no flat patches.
fn terrain(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([90, 140, 90, 255])
        } else {
            Rgba([110, 160, 100, 255])
        }
    })
}

fn with_disk(size: u32, radius: i32) -> RgbaImage {
    let mut img = terrain(size, size);
    let c = i32::try_from(size / 2).unwrap();
    draw_filled_circle_mut(&mut img, (c, c), radius, WATER);
    img
}

fn with_ring(size: u32, radius: i32) -> RgbaImage {
    let mut img = terrain(size, size);
    let c = i32::try_from(size / 2).unwrap();
    draw_hollow_circle_mut(&mut img, (c, c), radius, WATER);
    img
}

fn run(img: &RgbaImage, style: OutputStyle) -> mapforge_analysis::Detection {
    let bytes = encode_png(img).unwrap().into_bytes();
    detect(&bytes, &DetectionConfig::default(), style).unwrap()
}

#[test]
fn clean_terrain_passes() {
    for style in OutputStyle::ALL {
        let detection = run(&terrain(64, 64), style);
        assert!(!detection.needs_refinement, "{style}");
        assert!(detection.leak_map.is_none(), "{style}");
    }
}

#[test]
fn solid_disk_of_blueprint_color_needs_refinement() {
    let img = with_disk(120, 18);
    let detection = run(&img, OutputStyle::Realistic);
    let leaks = detection.leak_pixel_count();
    assert!(leaks > 900 && leaks < 1200, "disk leak count {leaks}");
    assert!(detection.needs_refinement);
    assert!(detection.leak_map.is_some());
}

#[test]
fn thin_ring_of_comparable_size_does_not() {
    let img = with_ring(340, 160);
    let detection = run(&img, OutputStyle::Realistic);
    let leaks = detection.leak_pixel_count();
    assert!(leaks > 800, "ring leak count {leaks}");

    let clusters = find_clusters(&detection.mask, 2);
    assert_eq!(clusters.len(), 1);
    let solidity = clusters[0].solidity().unwrap();
    assert!(solidity < 0.05, "ring solidity {solidity}");

    assert!(!detection.needs_refinement);
    // Leaks are still reported for display.
    assert!(detection.leak_map.is_some());
}

#[test]
fn small_leak_below_size_threshold_passes() {
    let detection = run(&with_disk(80, 8), OutputStyle::Realistic);
    assert!(detection.leak_pixel_count() > 0);
    assert!(!detection.needs_refinement);
}

#[test]
fn stylized_needs_a_larger_blob() {
    // ~1000 pixels: over the realistic threshold, under the stylized one.
    let medium = with_disk(120, 18);
    assert!(run(&medium, OutputStyle::Realistic).needs_refinement);
    assert!(!run(&medium, OutputStyle::Stylized).needs_refinement);

    let large = with_disk(120, 32);
    assert!(run(&large, OutputStyle::Stylized).needs_refinement);
}

#[test]
fn detection_is_deterministic() {
    let mut img = with_disk(150, 20);
    draw_hollow_circle_mut(&mut img, (75, 75), 60, Rgba([0x1f, 0x7a, 0x2e, 255]));
    let a = run(&img, OutputStyle::Realistic);
    let b = run(&img, OutputStyle::Realistic);
    assert_eq!(a.mask, b.mask);
    assert_eq!(a.needs_refinement, b.needs_refinement);
    assert_eq!(a.leak_map, b.leak_map);
}

#[test]
fn diff_between_revisions_marks_the_repainted_area() {
    let before = encode_png(&with_disk(100, 15)).unwrap();
    let after = encode_png(&terrain(100, 100)).unwrap();
    let threshold = DetectionConfig::default().diff_threshold_sq;

    let forward = diff_encoded(&before, &after, threshold).unwrap().unwrap();
    let backward = diff_encoded(&after, &before, threshold).unwrap().unwrap();
    assert_eq!(forward, backward);

    let overlay = forward.decode().unwrap();
    assert_eq!(overlay.get_pixel(50, 50).0[3], 160);
    assert_eq!(overlay.get_pixel(0, 0).0[3], 0);
}
