use crate::codec::{OutputFormat, PixelBuffer, encode};
use crate::errors::FilterError;
use common::span_debug;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Grayscale,
    Blur,
    Resize,
}

impl FilterKind {
    pub const ALL: [FilterKind; 3] = [FilterKind::Grayscale, FilterKind::Blur, FilterKind::Resize];

    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::Grayscale => "grayscale",
            FilterKind::Blur => "blur",
            FilterKind::Resize => "resize",
        }
    }

    /// Run the transform. The input is only read; the result is a new buffer.
    pub fn apply(&self, input: &PixelBuffer) -> PixelBuffer {
        match self {
            FilterKind::Grayscale => grayscale(input),
            FilterKind::Blur => box_blur(input),
            FilterKind::Resize => half_size(input),
        }
    }

    /// Transform `input` and encode the result to `path`.
    pub fn render(
        &self,
        input: &PixelBuffer,
        path: &Path,
        format: OutputFormat,
    ) -> Result<(), FilterError> {
        let _s = span_debug!("filter", filter = self.name());
        let output = self.apply(input);
        encode(path, &output, format).map_err(|source| FilterError::Output {
            kind: *self,
            source,
        })
    }

    /// Parse a comma separated list such as `grayscale,blur`.
    /// Duplicates are dropped, order is kept.
    pub fn parse_list(list: &str) -> Result<Vec<FilterKind>, FilterError> {
        let mut kinds = Vec::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let kind = item.parse()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        if kinds.is_empty() {
            return Err(FilterError::NoFilters);
        }
        Ok(kinds)
    }

    pub fn join_names(kinds: &[FilterKind]) -> String {
        kinds
            .iter()
            .map(FilterKind::name)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterKind {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FilterError::UnknownFilter(s.to_string()))
    }
}

/// `{output_dir}/{stem}_{filter}.{ext}` for an input file name.
pub fn output_path(
    output_dir: &Path,
    input_name: &str,
    kind: FilterKind,
    format: OutputFormat,
) -> PathBuf {
    let stem = Path::new(input_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(input_name);
    output_dir.join(format!("{stem}_{}.{}", kind.name(), format.extension()))
}

/// ITU-R 601 luma into the colour channels. Alpha is kept; images with fewer
/// than three channels are returned as they are.
fn grayscale(input: &PixelBuffer) -> PixelBuffer {
    let mut output = input.clone();
    if input.channels < 3 {
        return output;
    }
    for px in output.pixels.chunks_exact_mut(input.channels as usize) {
        let luma = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
        let gray = luma as u8;
        px[0] = gray;
        px[1] = gray;
        px[2] = gray;
    }
    output
}

/// 3x3 box average; edge pixels average only their in-bounds neighbours.
fn box_blur(input: &PixelBuffer) -> PixelBuffer {
    let (w, h, c) = (
        input.width as usize,
        input.height as usize,
        input.channels as usize,
    );
    let src = &input.pixels;
    let mut dst = vec![0u8; src.len()];

    for y in 0..h {
        let rows = y.saturating_sub(1)..=(y + 1).min(h - 1);
        for x in 0..w {
            let cols = x.saturating_sub(1)..=(x + 1).min(w - 1);
            let count = (rows.end() - rows.start() + 1) * (cols.end() - cols.start() + 1);
            for ch in 0..c {
                let mut sum = 0u32;
                for ny in rows.clone() {
                    for nx in cols.clone() {
                        sum += src[(ny * w + nx) * c + ch] as u32;
                    }
                }
                dst[(y * w + x) * c + ch] = (sum / count as u32) as u8;
            }
        }
    }

    PixelBuffer {
        width: input.width,
        height: input.height,
        channels: input.channels,
        pixels: dst,
    }
}

/// Nearest-neighbour downscale to half size, never below 1x1.
fn half_size(input: &PixelBuffer) -> PixelBuffer {
    let (sw, sh, c) = (
        input.width as usize,
        input.height as usize,
        input.channels as usize,
    );
    let dw = (sw / 2).max(1);
    let dh = (sh / 2).max(1);
    let mut dst = Vec::with_capacity(dw * dh * c);

    for y in 0..dh {
        let sy = (y * 2).min(sh.saturating_sub(1));
        for x in 0..dw {
            let sx = (x * 2).min(sw.saturating_sub(1));
            let idx = (sy * sw + sx) * c;
            dst.extend_from_slice(&input.pixels[idx..idx + c]);
        }
    }

    PixelBuffer {
        width: dw as u32,
        height: dh as u32,
        channels: input.channels,
        pixels: dst,
    }
}
