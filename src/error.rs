//! Error types for the bitspec codec
//!
//! Failures are split by the phase that detects them: schema validation
//! (eager, at codec construction), encoding, decoding, and multi-spec
//! dispatch. [`Error`] unifies them for the payload-level entry points.

use thiserror::Error;

/// Errors detected while validating a block or payload specification.
///
/// These are always raised at construction time, never deferred to
/// encode or decode.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A required key is absent from a block spec
    #[error("block '{block}' is missing required key '{key}'")]
    MissingKey {
        /// Block key (or spec context) where the key is missing
        block: String,
        /// The missing key
        key: String,
    },
    /// A key not belonging to the block type's parameter set was found
    #[error("unexpected key '{key}' in block '{block}'")]
    UnexpectedKey {
        /// Block key where the stray key appeared
        block: String,
        /// The unexpected key
        key: String,
    },
    /// A spec key holds a value of the wrong JSON type
    #[error("key '{key}' of block '{block}' must be {expected}")]
    WrongType {
        /// Block key
        block: String,
        /// Offending spec key
        key: String,
        /// Description of the expected type
        expected: &'static str,
    },
    /// The `type` tag does not name a known block type
    #[error("block '{block}' has unknown type '{kind}'")]
    UnknownType {
        /// Block key
        block: String,
        /// The unrecognized type tag
        kind: String,
    },
    /// Two sibling fields flatten to the same dotted key, or one
    /// flattened key is a strict prefix of another
    #[error("duplicate or colliding key '{key}' in payload spec")]
    DuplicateKey {
        /// The colliding dotted key
        key: String,
    },
    /// A steps list is not strictly ascending
    #[error("steps of block '{block}' must be strictly ascending")]
    UnsortedSteps {
        /// Block key
        block: String,
    },
    /// `steps_names` does not have exactly `len(steps) + 1` entries
    #[error("steps_names of block '{block}' must have {expected} entries")]
    StepsNamesLength {
        /// Block key
        block: String,
        /// Required number of names
        expected: usize,
    },
    /// An array block directly nests another array block
    #[error("block '{block}': arrays of arrays are not supported")]
    NestedArray {
        /// Block key
        block: String,
    },
    /// A numeric block width outside the supported 1..=64 range
    #[error("block '{block}' has unsupported bit width {bits} (must be 1..=64)")]
    BitsOutOfRange {
        /// Block key
        block: String,
        /// The declared width
        bits: u64,
    },
    /// A spec parameter holds a structurally invalid value
    #[error("key '{key}' of block '{block}' is invalid: {reason}")]
    InvalidValue {
        /// Block key
        block: String,
        /// Offending spec key
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
    /// The declared version does not fit in `version_bits`
    #[error("version {version} does not fit in {bits} bits")]
    VersionOverflow {
        /// Declared payload version
        version: u64,
        /// Declared version field width
        bits: usize,
    },
    /// A payload spec with no version field, no header and no body
    #[error("payload spec carries no information (empty body, header and version)")]
    EmptySpec,
    /// A static `value` could not be encoded with its own block
    #[error("static value of block '{block}' is invalid: {reason}")]
    StaticValue {
        /// Block key
        block: String,
        /// Underlying encode failure
        reason: String,
    },
}

/// Errors raised while encoding a runtime value into a bit stream.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The runtime value has the wrong type for the block
    #[error("value for block '{key}' must be {expected}")]
    WrongType {
        /// Block key
        key: String,
        /// Description of the accepted type
        expected: &'static str,
    },
    /// The dotted key was not found in the input mapping
    #[error("no value found for block '{key}'")]
    MissingValue {
        /// Dotted block key that failed to resolve
        key: String,
    },
    /// A categories value is absent from the list and no fallback is declared
    #[error("value '{value}' for block '{key}' is not a listed category")]
    UnknownCategory {
        /// Block key
        key: String,
        /// The unlisted value
        value: String,
    },
    /// A fixed array received input of the wrong length
    #[error("fixed array '{key}' requires exactly {expected} items, got {actual}")]
    ArrayLength {
        /// Block key
        key: String,
        /// Declared length
        expected: usize,
        /// Input length
        actual: usize,
    },
    /// A binary block value is not a `0b`/`0x` literal
    #[error("value '{value}' for block '{key}' must be a binary or hex string")]
    BadBinary {
        /// Block key
        key: String,
        /// The rejected literal
        value: String,
    },
}

/// Errors raised while decoding a message.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The message ended before the current field's bits were available
    #[error("unexpected end of message: needed {needed} bits, {available} available")]
    UnexpectedEof {
        /// Bits the field still required
        needed: usize,
        /// Bits left in the message
        available: usize,
    },
    /// The version field disagrees with the spec's declared version.
    ///
    /// Recoverable control flow for [`decode_from_specs`](crate::decode_from_specs),
    /// fatal otherwise.
    #[error("message version {found} does not match spec version {expected}")]
    Version {
        /// Version declared by the spec
        expected: u64,
        /// Version carried by the message
        found: u64,
    },
    /// The message is neither a `0b` string, a `0x` string nor raw bytes
    #[error("unknown message format")]
    UnknownFormat,
    /// A textual message form contains invalid characters
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// What failed to parse
        reason: String,
    },
}

/// Errors raised while validating a pool of candidate payload specs.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The candidate list is empty
    #[error("payload spec pool is empty")]
    Empty,
    /// Candidates do not share the same name
    #[error("payload spec '{found}' does not share pool name '{expected}'")]
    NameMismatch {
        /// Name of the first candidate
        expected: String,
        /// The diverging name
        found: String,
    },
    /// Candidates do not share the same version field width
    #[error("payload specs in a pool must share version_bits")]
    VersionBitsMismatch,
    /// Two candidates declare the same version
    #[error("duplicate version {version} in payload spec pool")]
    DuplicateVersion {
        /// The duplicated version
        version: u64,
    },
    /// A candidate does not encode its version, so it can never be dispatched
    #[error("payload spec '{name}' does not encode its version")]
    VersionNotEncoded {
        /// Name of the offending candidate
        name: String,
    },
}

/// Unified error for the payload-level entry points.
#[derive(Debug, Error)]
pub enum Error {
    /// Spec validation failure
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Encode failure
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// Decode failure
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Spec pool consistency failure
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// No candidate spec in the pool matched the message's version
    #[error("no payload spec matches message version {version}")]
    NoMatchingSpec {
        /// Version read from the message
        version: u64,
    },
}

/// Result type alias for bitspec operations
pub type Result<T> = core::result::Result<T, Error>;
