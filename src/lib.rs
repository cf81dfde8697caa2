//! BitSpec: schema-driven bit-level payload serialization
//!
//! This crate encodes structured data into compact bit-level messages
//! described by JSON payload specs, aimed at bandwidth-constrained
//! links (LoRa, satellite, SMS) where every bit counts.
//!
//! # Message Layout
//!
//! ```text
//! +-------------+----------------+----------------+---------+--------+
//! | Version?    | Header blocks  | Body blocks    | Zero    | CRC8?  |
//! | (n bits)    | (bit-packed)   | (bit-packed)   | padding | (8 bit)|
//! +-------------+----------------+----------------+---------+--------+
//! ```
//!
//! # Features
//!
//! - Ten block types: boolean, binary, integer, float, pad, array,
//!   object, string, steps and categories
//! - Sub-byte field widths with no alignment or length markers
//! - Dotted keys addressing nested input/output structures
//! - Version field with multi-spec dispatch on decode
//! - Optional CRC8 trailer, verified and reported in decode metadata
//! - Three lossless message forms: binary text, hex text, raw bytes
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//!
//! let spec = json!({
//!     "name": "sensor",
//!     "version": 1,
//!     "body": [
//!         {"key": "active", "type": "boolean"},
//!         {"key": "temperature", "type": "float", "bits": 10,
//!          "lower": -40, "upper": 85}
//!     ]
//! });
//!
//! let message = bitspec::encode(&json!({"active": true, "temperature": 21.5}), &spec)?;
//! let decoded = bitspec::decode(&message, &spec)?;
//! assert_eq!(decoded.body["active"], json!(true));
//! # Ok::<(), bitspec::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bits;
pub mod block;
pub mod crc8;
pub mod error;
pub mod keys;
pub mod payload;
pub mod random;

// Re-export main types
pub use bits::{BitReader, BitString, Message};
pub use block::{decode_block, encode_block, Block, BlockKind};
pub use error::{DecodeError, EncodeError, Error, PoolError, Result, SchemaError};
pub use payload::{
    decode, decode_from_specs, encode, stats, Decoded, DecodedMeta, PayloadSpec, Stats,
};
pub use random::{random_payload, random_payload_data};
