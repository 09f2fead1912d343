pub mod codec;
pub mod errors;
pub mod filters;

pub use codec::{
    DEFAULT_JPEG_QUALITY, OutputFormat, PixelBuffer, SUPPORTED_EXTENSIONS, decode, encode,
    is_supported_input,
};
pub use errors::{CodecError, FilterError};
pub use filters::{FilterKind, output_path};
