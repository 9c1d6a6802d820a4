//! PCM frame codec
//!
//! Converts captured frames to self-describing wire payloads and back.
//! Samples are copied verbatim as native-endian f32 PCM; the only
//! transformation is a small fixed header carrying the format metadata a
//! receiver needs to reconstruct playable audio.

pub mod wire;

pub use wire::{decode, encode, WireHeader, HEADER_LEN};
