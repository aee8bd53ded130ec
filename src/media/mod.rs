//! Media-format awareness
//!
//! The relay never re-encodes media; the only protocol-aware decision it
//! makes is spotting H.264 key-frame starts so late joiners can bootstrap
//! from a decodable position.

pub mod nal;

pub use nal::{is_keyframe_start, NaluType};
