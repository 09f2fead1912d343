use crate::FilterKind;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Pixel buffer mismatch: {0}")]
    InvalidBuffer(String),

    #[error("Unknown output format {0:?}")]
    UnknownFormat(String),

    #[error("JPEG quality {0} outside 1..=100")]
    InvalidQuality(u8),
}

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Unknown filter {0:?}")]
    UnknownFilter(String),

    #[error("No filters selected")]
    NoFilters,

    #[error("{kind} output failed: {source}")]
    Output {
        kind: FilterKind,
        #[source]
        source: CodecError,
    },

    #[error("{0} filter panicked")]
    Panicked(FilterKind),
}
