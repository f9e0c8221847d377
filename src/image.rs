//! Cover image probing
//!
//! Encoding and pixel dimensions come from the `image` decoders, which read
//! headers only. The decoders do not surface declared density, so the PNG
//! `pHYs` chunk and the JFIF `APP0` segment are read directly.

use std::io::Cursor;

use ::image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Png,
    Jpeg,
}

impl ImageEncoding {
    pub fn media_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub encoding: ImageEncoding,
    pub width: u32,
    pub height: u32,
    /// Declared density, if the file carries one.
    pub dpi: Option<u32>,
}

/// Describe an image. Returns `None` for unsupported or unreadable data.
pub fn probe(data: &[u8]) -> Option<ImageInfo> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format().ok()?;
    let encoding = match reader.format()? {
        ImageFormat::Png => ImageEncoding::Png,
        ImageFormat::Jpeg => ImageEncoding::Jpeg,
        _ => return None,
    };
    let (width, height) = reader.into_dimensions().ok()?;

    let dpi = match encoding {
        ImageEncoding::Png => png_density(data),
        ImageEncoding::Jpeg => jfif_density(data),
    };
    Some(ImageInfo { encoding, width, height, dpi })
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    let bytes = data.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// `pHYs` must precede the first `IDAT`.
fn png_density(data: &[u8]) -> Option<u32> {
    let mut offset = 8;
    loop {
        let len = be_u32(data, offset)? as usize;
        match data.get(offset + 4..offset + 8)? {
            b"pHYs" => {
                let ppu_x = be_u32(data, offset + 8)?;
                // unit 1 = pixels per metre
                return (*data.get(offset + 16)? == 1).then(|| (ppu_x as f64 * 0.0254).round() as u32);
            }
            b"IDAT" | b"IEND" => return None,
            _ => offset += 12 + len,
        }
    }
}

/// Density from a JFIF `APP0` segment ahead of the frame header.
fn jfif_density(data: &[u8]) -> Option<u32> {
    let mut offset = 2;
    loop {
        if *data.get(offset)? != 0xFF {
            return None;
        }
        let marker = *data.get(offset + 1)?;
        if marker == 0xFF {
            offset += 1;
            continue;
        }
        match marker {
            0xE0 if data.get(offset + 4..offset + 9) == Some(&b"JFIF\0"[..]) => {
                let density = be_u16(data, offset + 12)? as u32;
                return match *data.get(offset + 11)? {
                    1 => Some(density),
                    2 => Some((density as f64 * 2.54).round() as u32),
                    _ => None,
                };
            }
            0xE1..=0xEF | 0xFE => offset += 2 + be_u16(data, offset + 2)? as usize,
            _ => return None,
        }
    }
}
