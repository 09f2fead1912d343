//! Image file codec over the `image` crate.
//!
//! Everything is normalized to interleaved 8-bit samples with 1 to 4 channels.

use crate::errors::CodecError;
use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, ExtendedColorType, ImageEncoder, ImageError, ImageReader};
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Input extensions picked up by a directory scan, lowercase.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Whether `path` names a file the codec is expected to read.
/// Hidden files are never inputs.
pub fn is_supported_input(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Decoded image: interleaved 8-bit samples, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub pixels: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self, CodecError> {
        if !(1..=4).contains(&channels) {
            return Err(CodecError::InvalidBuffer(format!(
                "{channels} channels, expected 1 to 4"
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(CodecError::InvalidBuffer(format!(
                "{width}x{height}x{channels} needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    pub fn has_alpha(&self) -> bool {
        self.channels == 2 || self.channels == 4
    }

    fn color_type(&self) -> ExtendedColorType {
        match self.channels {
            1 => ExtendedColorType::L8,
            2 => ExtendedColorType::La8,
            3 => ExtendedColorType::Rgb8,
            _ => ExtendedColorType::Rgba8,
        }
    }

    /// The buffer with its alpha channel dropped. Opaque buffers are borrowed.
    pub fn without_alpha(&self) -> Cow<'_, PixelBuffer> {
        if !self.has_alpha() {
            return Cow::Borrowed(self);
        }
        let stride = self.channels as usize;
        let keep = stride - 1;
        let pixels = self
            .pixels
            .chunks_exact(stride)
            .flat_map(|px| px[..keep].iter().copied())
            .collect();
        Cow::Owned(PixelBuffer {
            width: self.width,
            height: self.height,
            channels: keep as u8,
            pixels,
        })
    }
}

impl From<DynamicImage> for PixelBuffer {
    fn from(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let (channels, pixels) = match image.color() {
            ColorType::L8 => (1, image.into_luma8().into_raw()),
            ColorType::La8 => (2, image.into_luma_alpha8().into_raw()),
            ColorType::Rgb8 => (3, image.into_rgb8().into_raw()),
            ColorType::Rgba8 => (4, image.into_rgba8().into_raw()),
            other if other.has_alpha() => (4, image.into_rgba8().into_raw()),
            _ => (3, image.into_rgb8().into_raw()),
        };
        PixelBuffer {
            width,
            height,
            channels,
            pixels,
        }
    }
}

/// Encoded file format of filter outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg { quality: u8 },
    Png,
    Bmp,
}

impl OutputFormat {
    pub fn jpeg(quality: u8) -> Result<Self, CodecError> {
        if !(1..=100).contains(&quality) {
            return Err(CodecError::InvalidQuality(quality));
        }
        Ok(OutputFormat::Jpeg { quality })
    }

    /// Replace the JPEG quality; lossless formats are returned unchanged.
    pub fn with_quality(self, quality: u8) -> Result<Self, CodecError> {
        match self {
            OutputFormat::Jpeg { .. } => Self::jpeg(quality),
            other => Ok(other),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Bmp => "bmp",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Bmp => "bmp",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Jpeg {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::default()),
            "png" => Ok(OutputFormat::Png),
            "bmp" => Ok(OutputFormat::Bmp),
            other => Err(CodecError::UnknownFormat(other.to_string())),
        }
    }
}

pub fn decode(path: &Path) -> Result<PixelBuffer, CodecError> {
    let decode_err = |source: ImageError| CodecError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let image = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| decode_err(ImageError::IoError(e)))?
        .decode()
        .map_err(decode_err)?;

    Ok(PixelBuffer::from(image))
}

pub fn encode(path: &Path, image: &PixelBuffer, format: OutputFormat) -> Result<(), CodecError> {
    let encode_err = |source: ImageError| CodecError::Encode {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = BufWriter::new(File::create(path)?);
    match format {
        OutputFormat::Jpeg { quality } => {
            // JPEG has no alpha channel
            let opaque = image.without_alpha();
            JpegEncoder::new_with_quality(&mut writer, quality)
                .write_image(
                    &opaque.pixels,
                    opaque.width,
                    opaque.height,
                    opaque.color_type(),
                )
                .map_err(encode_err)?;
        }
        OutputFormat::Png => PngEncoder::new(&mut writer)
            .write_image(&image.pixels, image.width, image.height, image.color_type())
            .map_err(encode_err)?,
        OutputFormat::Bmp => BmpEncoder::new(&mut writer)
            .write_image(&image.pixels, image.width, image.height, image.color_type())
            .map_err(encode_err)?,
    }
    writer.flush()?;
    Ok(())
}
