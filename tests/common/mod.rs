//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::OnceLock;

use chrono::NaiveDate;
use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::ExtendedColorType;
use forgepress_core::{Chapter, PublicationMetadata};

pub fn chapters(n: u32) -> Vec<Chapter> {
    (1..=n)
        .map(|i| {
            Chapter::new(
                i,
                format!("Chapter {i}"),
                format!("The tide came in for the {i} time.\n\nNobody on the pier said a word about it."),
            )
        })
        .collect()
}

pub fn metadata() -> PublicationMetadata {
    let mut meta = PublicationMetadata::new("Tidewater", "R. Vale", NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
    meta.description = "A coastal mystery told across three long, salt-stained summers.".into();
    meta.categories = vec!["FIC022000".into()];
    meta.keywords = vec!["mystery".into(), "coastal".into()];
    meta
}

/// Grayscale baseline JPEG declaring `dpi` in its JFIF header.
pub fn jpeg(width: u16, height: u16, dpi: u16) -> Vec<u8> {
    let mut out = vec![];
    let pixels = vec![128u8; width as usize * height as usize];
    let mut encoder = JpegEncoder::new_with_quality(&mut out, 50);
    encoder.set_pixel_density(PixelDensity::dpi(dpi));
    encoder
        .encode(&pixels, width as u32, height as u32, ExtendedColorType::L8)
        .unwrap();
    out
}

/// A cover that satisfies every destination's dimensions. Encoded once.
pub fn full_cover() -> Vec<u8> {
    static COVER: OnceLock<Vec<u8>> = OnceLock::new();
    COVER.get_or_init(|| jpeg(1600, 2560, 300)).clone()
}
