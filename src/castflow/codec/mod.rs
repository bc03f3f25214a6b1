//! Pure codecs for the per-key stored representation: segment markers and
//! the compressed payload blob. No I/O lives here.

pub mod marker;
pub mod payload;

pub use marker::{decode_marker, encode_marker, normalize_epoch_ms, utc_day, DecodedMarker};
pub use payload::{
    compress_payload, decompress_payload, extras_to_string, merge_extras, parse_extras, CodecError,
};
