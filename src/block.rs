//! Field codec engine
//!
//! A [`Block`] is one schema-declared, independently encodable and
//! decodable unit of a payload. The ten block types are represented as
//! a tagged union ([`BlockKind`]), each variant carrying its validated
//! parameters, so required/optional parameter handling stays exhaustive
//! at compile time.
//!
//! The engine upholds one central invariant: the number of bits a block
//! reports while scanning a message equals the number of bits its
//! encoder produced for the value that was written. That symmetry is
//! what lets sibling fields be decoded sequentially from one
//! concatenated bit stream with no length or tag markers between them.
//!
//! Blocks are immutable once constructed from a spec. A block whose
//! spec carries a literal `value` is static: its encoding is computed
//! and cached at construction, `encode` ignores the runtime input, and
//! a decode that finds different bits on the wire logs a warning but
//! still returns the expected literal.

use serde_json::{Map, Value};

use crate::bits::{truncate_bits, BitReader, BitString};
use crate::error::{DecodeError, EncodeError, SchemaError};
use crate::keys::{self, KeyPath};

/// The 64-symbol alphabet used by string blocks (6 bits per character).
pub(crate) const ALPHABET: [char; 64] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S',
    'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l',
    'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4',
    '5', '6', '7', '8', '9', '+', '/',
];

/// Bits per string character
const LETTER_BITS: usize = 6;

/// Code the space character maps to (`+` in the default alphabet)
const SPACE_CODE: u64 = 62;

/// Code assigned to characters outside the alphabet
const UNKNOWN_CODE: u64 = 63;

/// Smallest width able to distinguish `n` codes
pub(crate) fn bits_for(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }
}

/// Overflow policy for integer blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerMode {
    /// Clamp the offset-adjusted value into `[0, 2^bits - 1]`
    Truncate,
    /// Reduce modulo `2^bits`, wrapping instead of clamping
    Remainder,
}

/// Quantization policy for float blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approximation {
    /// Round to nearest, ties to even
    Round,
    /// Round toward negative infinity
    Floor,
    /// Round toward positive infinity
    Ceil,
}

impl Approximation {
    fn apply(self, value: f64) -> f64 {
        match self {
            Approximation::Round => value.round_ties_even(),
            Approximation::Floor => value.floor(),
            Approximation::Ceil => value.ceil(),
        }
    }
}

/// The per-type parameters of a block.
#[derive(Debug, Clone)]
pub enum BlockKind {
    /// Single bit, `true` -> `1`
    Boolean,
    /// Fixed-width literal bit string
    Binary {
        /// Field width in bits
        bits: usize,
    },
    /// Fixed-width unsigned integer with offset and overflow policy
    Integer {
        /// Field width in bits (1..=64)
        bits: usize,
        /// Subtracted before encoding, added back after decoding
        offset: i64,
        /// Overflow policy
        mode: IntegerMode,
    },
    /// Linear quantization of a float into `[lower, upper]`
    Float {
        /// Field width in bits (1..=64)
        bits: usize,
        /// Lower bound of the representable range
        lower: f64,
        /// Upper bound of the representable range
        upper: f64,
        /// Quantization policy
        approximation: Approximation,
    },
    /// Alignment filler: encodes all ones, decodes to nothing
    Pad {
        /// Filler width in bits
        bits: usize,
    },
    /// Repetition of an inner block, with or without a count prefix
    Array {
        /// Maximum (variable) or exact (fixed) element count
        length: usize,
        /// True for exact-length arrays without a count prefix
        fixed: bool,
        /// Width of the count prefix (0 when fixed)
        prefix_bits: usize,
        /// Element codec
        items: Box<Block>,
    },
    /// Ordered list of child blocks encoded back to back
    Object {
        /// Child codecs in declared order
        blocklist: Vec<Block>,
    },
    /// Fixed-length text over the 64-symbol alphabet
    String {
        /// Character count
        length: usize,
        /// Code -> character overrides of the default alphabet
        custom_alphabet: Vec<(u8, char)>,
    },
    /// Numeric threshold bucketing
    Steps {
        /// Strictly ascending bucket thresholds
        steps: Vec<f64>,
        /// One label per bucket (`len(steps) + 1` entries)
        steps_names: Vec<String>,
        /// Bucket index width
        bits: usize,
    },
    /// Label-list indexing
    Categories {
        /// Category labels, with the fallback appended when it is new
        categories: Vec<String>,
        /// Number of labels declared in the spec
        declared: usize,
        /// Index encoded for unlisted values, if a fallback is declared
        fallback: Option<usize>,
        /// Index width
        bits: usize,
    },
}

impl BlockKind {
    /// The spec-level type tag for this kind
    pub fn type_name(&self) -> &'static str {
        match self {
            BlockKind::Boolean => "boolean",
            BlockKind::Binary { .. } => "binary",
            BlockKind::Integer { .. } => "integer",
            BlockKind::Float { .. } => "float",
            BlockKind::Pad { .. } => "pad",
            BlockKind::Array { .. } => "array",
            BlockKind::Object { .. } => "object",
            BlockKind::String { .. } => "string",
            BlockKind::Steps { .. } => "steps",
            BlockKind::Categories { .. } => "categories",
        }
    }
}

/// Cached encoding of a static block
#[derive(Debug, Clone)]
struct StaticCache {
    message: BitString,
    value: Value,
}

/// One field codec: a dotted key, an optional output alias, and the
/// validated per-type parameters.
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) key: String,
    pub(crate) alias: Option<String>,
    pub(crate) kind: BlockKind,
    cache: Option<StaticCache>,
}

/// Typed accessors over a block spec map, with uniform error reporting.
struct SpecReader<'a> {
    block: &'a str,
    map: &'a Map<String, Value>,
}

impl<'a> SpecReader<'a> {
    fn require(&self, key: &str) -> Result<&'a Value, SchemaError> {
        self.map.get(key).ok_or_else(|| SchemaError::MissingKey {
            block: self.block.to_owned(),
            key: key.to_owned(),
        })
    }

    fn wrong_type(&self, key: &str, expected: &'static str) -> SchemaError {
        SchemaError::WrongType {
            block: self.block.to_owned(),
            key: key.to_owned(),
            expected,
        }
    }

    fn require_u64(&self, key: &str) -> Result<u64, SchemaError> {
        self.require(key)?
            .as_u64()
            .ok_or_else(|| self.wrong_type(key, "a non-negative integer"))
    }

    fn require_usize(&self, key: &str) -> Result<usize, SchemaError> {
        usize::try_from(self.require_u64(key)?).map_err(|_| self.wrong_type(key, "a non-negative integer"))
    }

    fn require_str(&self, key: &str) -> Result<&'a str, SchemaError> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| self.wrong_type(key, "a string"))
    }

    fn require_array(&self, key: &str) -> Result<&'a Vec<Value>, SchemaError> {
        self.require(key)?
            .as_array()
            .ok_or_else(|| self.wrong_type(key, "a list"))
    }

    fn opt_i64(&self, key: &str, default: i64) -> Result<i64, SchemaError> {
        match self.map.get(key) {
            None => Ok(default),
            Some(v) => v.as_i64().ok_or_else(|| self.wrong_type(key, "an integer")),
        }
    }

    fn opt_f64(&self, key: &str, default: f64) -> Result<f64, SchemaError> {
        match self.map.get(key) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| self.wrong_type(key, "a number")),
        }
    }

    fn opt_bool(&self, key: &str, default: bool) -> Result<bool, SchemaError> {
        match self.map.get(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| self.wrong_type(key, "a boolean")),
        }
    }

    fn opt_str(&self, key: &str) -> Result<Option<&'a str>, SchemaError> {
        match self.map.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| self.wrong_type(key, "a string")),
        }
    }

    /// Reject any key outside the base set plus `allowed`
    fn check_allowed(&self, allowed: &[&str]) -> Result<(), SchemaError> {
        const BASE: [&str; 4] = ["key", "type", "value", "alias"];
        for key in self.map.keys() {
            if !BASE.contains(&key.as_str()) && !allowed.contains(&key.as_str()) {
                return Err(SchemaError::UnexpectedKey {
                    block: self.block.to_owned(),
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Block {
    /// Build and validate a block from its spec.
    ///
    /// All schema-level violations are detected here; encode and decode
    /// never re-validate the spec.
    pub fn from_spec(spec: &Value) -> Result<Self, SchemaError> {
        let map = spec.as_object().ok_or_else(|| SchemaError::WrongType {
            block: "?".to_owned(),
            key: "block".to_owned(),
            expected: "an object",
        })?;

        let probe = SpecReader { block: "?", map };
        let key = probe.require_str("key")?.to_owned();
        let reader = SpecReader { block: &key, map };
        let type_name = reader.require_str("type")?;
        let alias = reader.opt_str("alias")?.map(str::to_owned);
        let static_value = map.get("value").cloned();

        let kind = match type_name {
            "boolean" => {
                reader.check_allowed(&[])?;
                BlockKind::Boolean
            }
            "binary" => {
                reader.check_allowed(&["bits"])?;
                let bits = reader.require_usize("bits")?;
                if bits == 0 {
                    return Err(SchemaError::InvalidValue {
                        block: key,
                        key: "bits",
                        reason: "must be at least 1".to_owned(),
                    });
                }
                BlockKind::Binary { bits }
            }
            "integer" => {
                reader.check_allowed(&["bits", "offset", "mode"])?;
                let bits = reader.require_u64("bits")?;
                if bits == 0 || bits > 64 {
                    return Err(SchemaError::BitsOutOfRange { block: key, bits });
                }
                let mode = match reader.opt_str("mode")?.unwrap_or("truncate") {
                    "truncate" => IntegerMode::Truncate,
                    "remainder" => IntegerMode::Remainder,
                    other => {
                        return Err(SchemaError::InvalidValue {
                            block: key.clone(),
                            key: "mode",
                            reason: format!("must be 'truncate' or 'remainder', got '{other}'"),
                        })
                    }
                };
                BlockKind::Integer {
                    bits: bits as usize,
                    offset: reader.opt_i64("offset", 0)?,
                    mode,
                }
            }
            "float" => {
                reader.check_allowed(&["bits", "lower", "upper", "approximation"])?;
                let bits = reader.require_u64("bits")?;
                if bits == 0 || bits > 64 {
                    return Err(SchemaError::BitsOutOfRange { block: key, bits });
                }
                let lower = reader.opt_f64("lower", 0.0)?;
                let upper = reader.opt_f64("upper", 1.0)?;
                if !(lower < upper) {
                    return Err(SchemaError::InvalidValue {
                        block: key,
                        key: "upper",
                        reason: format!("range [{lower}, {upper}] is empty"),
                    });
                }
                let approximation = match reader.opt_str("approximation")?.unwrap_or("round") {
                    "round" => Approximation::Round,
                    "floor" => Approximation::Floor,
                    "ceil" => Approximation::Ceil,
                    other => {
                        return Err(SchemaError::InvalidValue {
                            block: key.clone(),
                            key: "approximation",
                            reason: format!("must be 'round', 'floor' or 'ceil', got '{other}'"),
                        })
                    }
                };
                BlockKind::Float {
                    bits: bits as usize,
                    lower,
                    upper,
                    approximation,
                }
            }
            "pad" => {
                reader.check_allowed(&["bits"])?;
                let bits = reader.require_usize("bits")?;
                if bits == 0 {
                    return Err(SchemaError::InvalidValue {
                        block: key,
                        key: "bits",
                        reason: "must be at least 1".to_owned(),
                    });
                }
                BlockKind::Pad { bits }
            }
            "array" => {
                reader.check_allowed(&["length", "fixed", "blocks"])?;
                let length = reader.require_usize("length")?;
                if length == 0 {
                    return Err(SchemaError::InvalidValue {
                        block: key,
                        key: "length",
                        reason: "must be at least 1".to_owned(),
                    });
                }
                let fixed = reader.opt_bool("fixed", false)?;
                let items = Box::new(Block::from_spec(reader.require("blocks")?)?);
                if matches!(items.kind, BlockKind::Array { .. }) {
                    return Err(SchemaError::NestedArray { block: key });
                }
                let prefix_bits = if fixed { 0 } else { bits_for(length + 1) };
                BlockKind::Array {
                    length,
                    fixed,
                    prefix_bits,
                    items,
                }
            }
            "object" => {
                reader.check_allowed(&["blocklist"])?;
                let specs = reader.require_array("blocklist")?;
                let blocklist = specs
                    .iter()
                    .map(Block::from_spec)
                    .collect::<Result<Vec<_>, _>>()?;
                let mut flat = Vec::new();
                for child in &blocklist {
                    child.collect_keys("", &mut flat);
                }
                if let Some(dup) = keys::find_collision(&flat) {
                    return Err(SchemaError::DuplicateKey { key: dup });
                }
                BlockKind::Object { blocklist }
            }
            "string" => {
                reader.check_allowed(&["length", "custom_alphabet"])?;
                let length = reader.require_usize("length")?;
                if length == 0 {
                    return Err(SchemaError::InvalidValue {
                        block: key,
                        key: "length",
                        reason: "must be at least 1".to_owned(),
                    });
                }
                let custom_alphabet = parse_custom_alphabet(&reader)?;
                BlockKind::String {
                    length,
                    custom_alphabet,
                }
            }
            "steps" => {
                reader.check_allowed(&["steps", "steps_names"])?;
                let raw_steps = reader.require_array("steps")?;
                if raw_steps.is_empty() {
                    return Err(SchemaError::InvalidValue {
                        block: key,
                        key: "steps",
                        reason: "must not be empty".to_owned(),
                    });
                }
                let mut steps = Vec::with_capacity(raw_steps.len());
                let mut displays = Vec::with_capacity(raw_steps.len());
                for step in raw_steps {
                    let n = step
                        .as_f64()
                        .ok_or_else(|| reader.wrong_type("steps", "a list of numbers"))?;
                    steps.push(n);
                    displays.push(step.to_string());
                }
                if steps.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(SchemaError::UnsortedSteps { block: key });
                }
                let steps_names = match map.get("steps_names") {
                    Some(raw_names) => {
                        let raw_names = raw_names
                            .as_array()
                            .ok_or_else(|| reader.wrong_type("steps_names", "a list"))?;
                        if raw_names.len() != steps.len() + 1 {
                            return Err(SchemaError::StepsNamesLength {
                                block: key,
                                expected: steps.len() + 1,
                            });
                        }
                        raw_names
                            .iter()
                            .map(|name| {
                                name.as_str().map(str::to_owned).ok_or_else(|| {
                                    reader.wrong_type("steps_names", "a list of strings")
                                })
                            })
                            .collect::<Result<Vec<_>, _>>()?
                    }
                    None => auto_steps_names(&displays),
                };
                BlockKind::Steps {
                    bits: bits_for(steps.len() + 1),
                    steps,
                    steps_names,
                }
            }
            "categories" => {
                reader.check_allowed(&["categories", "error"])?;
                let raw = reader.require_array("categories")?;
                if raw.is_empty() {
                    return Err(SchemaError::InvalidValue {
                        block: key,
                        key: "categories",
                        reason: "must not be empty".to_owned(),
                    });
                }
                let mut categories = raw
                    .iter()
                    .map(|c| {
                        c.as_str()
                            .map(str::to_owned)
                            .ok_or_else(|| reader.wrong_type("categories", "a list of strings"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let declared = categories.len();
                // The fallback reuses an existing code when it names a
                // listed category; only a new label costs an extra code.
                let fallback = match reader.opt_str("error")? {
                    Some(label) => Some(match categories.iter().position(|c| c == label) {
                        Some(index) => index,
                        None => {
                            categories.push(label.to_owned());
                            categories.len() - 1
                        }
                    }),
                    None => None,
                };
                BlockKind::Categories {
                    bits: bits_for(categories.len()),
                    categories,
                    declared,
                    fallback,
                }
            }
            other => {
                return Err(SchemaError::UnknownType {
                    block: key.clone(),
                    kind: other.to_owned(),
                })
            }
        };

        let cache = match (&static_value, &kind) {
            // Pads always encode the same filler; the literal is
            // informational only.
            (Some(_), BlockKind::Pad { .. }) => None,
            (Some(value), _) => {
                let message =
                    kind.encode_value(value, &key)
                        .map_err(|e| SchemaError::StaticValue {
                            block: key.clone(),
                            reason: e.to_string(),
                        })?;
                let mut reader = BitReader::new(&message);
                let decoded =
                    kind.decode_value(&mut reader)
                        .map_err(|e| SchemaError::StaticValue {
                            block: key.clone(),
                            reason: e.to_string(),
                        })?;
                Some(StaticCache {
                    message,
                    value: decoded,
                })
            }
            (None, _) => None,
        };

        Ok(Block {
            key,
            alias,
            kind,
            cache,
        })
    }

    /// The dotted schema key
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The output-side alias, if any
    #[inline]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// The validated per-type parameters
    #[inline]
    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    /// True for alignment-filler blocks
    #[inline]
    pub fn is_pad(&self) -> bool {
        matches!(self.kind, BlockKind::Pad { .. })
    }

    /// True when the spec fixes this block's value
    #[inline]
    pub fn is_static(&self) -> bool {
        self.cache.is_some()
    }

    /// Encode a runtime value into this block's bits.
    ///
    /// Static blocks ignore `value` and return the cached encoding.
    pub fn encode(&self, value: &Value) -> Result<BitString, EncodeError> {
        if let Some(cache) = &self.cache {
            return Ok(cache.message.clone());
        }
        self.kind.encode_value(value, &self.key)
    }

    /// Decode this block's bits from the reader, consuming exactly the
    /// width the matching encode produced.
    ///
    /// For static blocks a wire mismatch is logged and the expected
    /// literal is returned; this is the soft corruption signal, distinct
    /// from the hard CRC8 check.
    pub fn decode(&self, reader: &mut BitReader<'_>) -> Result<Value, DecodeError> {
        let value = self.kind.decode_value(reader)?;
        if let Some(cache) = &self.cache {
            if value != cache.value {
                tracing::warn!(
                    key = %self.key,
                    decoded = %value,
                    expected = %cache.value,
                    "decoded bits do not match static value"
                );
            }
            return Ok(cache.value.clone());
        }
        Ok(value)
    }

    /// Number of bits this block occupies at the start of `message`.
    ///
    /// Fixed-width kinds ignore the message; variable-width kinds read
    /// just enough of it to determine the count.
    pub fn bit_width(&self, message: &BitString) -> Result<usize, DecodeError> {
        let mut reader = BitReader::new(message);
        self.advance(&mut reader)
    }

    /// Advance the reader past this block, returning the width skipped
    pub(crate) fn advance(&self, reader: &mut BitReader<'_>) -> Result<usize, DecodeError> {
        match &self.kind {
            BlockKind::Boolean => {
                reader.skip(1)?;
                Ok(1)
            }
            BlockKind::Binary { bits }
            | BlockKind::Integer { bits, .. }
            | BlockKind::Float { bits, .. }
            | BlockKind::Pad { bits }
            | BlockKind::Steps { bits, .. }
            | BlockKind::Categories { bits, .. } => {
                reader.skip(*bits)?;
                Ok(*bits)
            }
            BlockKind::String { length, .. } => {
                let bits = length * LETTER_BITS;
                reader.skip(bits)?;
                Ok(bits)
            }
            BlockKind::Array {
                length,
                fixed,
                prefix_bits,
                items,
            } => {
                let count = if *fixed {
                    *length
                } else {
                    reader.read_uint(*prefix_bits)? as usize
                };
                let mut total = *prefix_bits;
                for _ in 0..count {
                    total += items.advance(reader)?;
                }
                Ok(total)
            }
            BlockKind::Object { blocklist } => {
                let mut total = 0;
                for child in blocklist {
                    total += child.advance(reader)?;
                }
                Ok(total)
            }
        }
    }

    /// Smallest and largest width this block can occupy, in bits.
    ///
    /// The two diverge only for variable-length arrays (and anything
    /// containing one).
    pub fn width_range(&self) -> (usize, usize) {
        match &self.kind {
            BlockKind::Boolean => (1, 1),
            BlockKind::Binary { bits }
            | BlockKind::Integer { bits, .. }
            | BlockKind::Float { bits, .. }
            | BlockKind::Pad { bits }
            | BlockKind::Steps { bits, .. }
            | BlockKind::Categories { bits, .. } => (*bits, *bits),
            BlockKind::String { length, .. } => (length * LETTER_BITS, length * LETTER_BITS),
            BlockKind::Array {
                length,
                fixed,
                prefix_bits,
                items,
            } => {
                let (item_min, item_max) = items.width_range();
                if *fixed {
                    (length * item_min, length * item_max)
                } else {
                    (*prefix_bits, prefix_bits + length * item_max)
                }
            }
            BlockKind::Object { blocklist } => blocklist.iter().fold((0, 0), |(min, max), child| {
                let (child_min, child_max) = child.width_range();
                (min + child_min, max + child_max)
            }),
        }
    }

    /// Flatten this block's dotted keys (descending into object
    /// children) for collision detection
    pub(crate) fn collect_keys(&self, prefix: &str, out: &mut Vec<String>) {
        let full = if prefix.is_empty() {
            self.key.clone()
        } else {
            format!("{prefix}.{}", self.key)
        };
        if let BlockKind::Object { blocklist } = &self.kind {
            for child in blocklist {
                child.collect_keys(&full, out);
            }
        } else {
            out.push(full);
        }
    }
}

impl BlockKind {
    fn encode_value(&self, value: &Value, key: &str) -> Result<BitString, EncodeError> {
        match self {
            BlockKind::Boolean => {
                let truthy = match value {
                    Value::Bool(b) => *b,
                    Value::Number(n) if n.as_i64().is_some() || n.as_u64().is_some() => {
                        n.as_i64() != Some(0) && n.as_u64() != Some(0)
                    }
                    _ => {
                        return Err(EncodeError::WrongType {
                            key: key.to_owned(),
                            expected: "a boolean",
                        })
                    }
                };
                let mut out = BitString::with_capacity(1);
                out.push(truthy);
                Ok(out)
            }
            BlockKind::Binary { bits } => {
                let text = value.as_str().ok_or_else(|| EncodeError::WrongType {
                    key: key.to_owned(),
                    expected: "a binary or hex string",
                })?;
                let bad = || EncodeError::BadBinary {
                    key: key.to_owned(),
                    value: text.to_owned(),
                };
                let parsed = if text.starts_with("0b") {
                    BitString::from_bin_str(text).map_err(|_| bad())?
                } else if text.starts_with("0x") || text.starts_with("0X") {
                    BitString::from_hex_str(text).map_err(|_| bad())?
                } else {
                    return Err(bad());
                };
                Ok(truncate_bits(&parsed, *bits))
            }
            BlockKind::Integer { bits, offset, mode } => {
                let raw = value_as_i128(value).ok_or_else(|| EncodeError::WrongType {
                    key: key.to_owned(),
                    expected: "an integer",
                })?;
                let adjusted = raw - i128::from(*offset);
                let cap = (1i128 << *bits) - 1;
                let coded = match mode {
                    IntegerMode::Truncate => adjusted.clamp(0, cap),
                    IntegerMode::Remainder => adjusted.rem_euclid(cap + 1),
                };
                let mut out = BitString::with_capacity(*bits);
                out.push_uint(coded as u64, *bits);
                Ok(out)
            }
            BlockKind::Float {
                bits,
                lower,
                upper,
                approximation,
            } => {
                let raw = value.as_f64().ok_or_else(|| EncodeError::WrongType {
                    key: key.to_owned(),
                    expected: "a number",
                })?;
                let cap = ((1u128 << *bits) - 1) as f64;
                let scaled = cap * (raw - lower) / (upper - lower);
                let coded = approximation.apply(scaled.clamp(0.0, cap)) as u64;
                let mut out = BitString::with_capacity(*bits);
                out.push_uint(coded, *bits);
                Ok(out)
            }
            BlockKind::Pad { bits } => {
                let mut out = BitString::with_capacity(*bits);
                for _ in 0..*bits {
                    out.push(true);
                }
                Ok(out)
            }
            BlockKind::Array {
                length,
                fixed,
                prefix_bits,
                items,
            } => {
                let values = value.as_array().ok_or_else(|| EncodeError::WrongType {
                    key: key.to_owned(),
                    expected: "a list",
                })?;
                let mut out = BitString::new();
                if *fixed {
                    if values.len() != *length {
                        return Err(EncodeError::ArrayLength {
                            key: key.to_owned(),
                            expected: *length,
                            actual: values.len(),
                        });
                    }
                    for item in values {
                        out.extend(&items.encode(item)?);
                    }
                } else {
                    // Longer input is silently truncated to the
                    // representable maximum, never an error.
                    let count = values.len().min(*length);
                    out.push_uint(count as u64, *prefix_bits);
                    for item in &values[..count] {
                        out.extend(&items.encode(item)?);
                    }
                }
                Ok(out)
            }
            BlockKind::Object { blocklist } => encode_blocklist(blocklist, value, key),
            BlockKind::String {
                length,
                custom_alphabet,
            } => {
                let text = value.as_str().ok_or_else(|| EncodeError::WrongType {
                    key: key.to_owned(),
                    expected: "a string",
                })?;
                let chars: Vec<char> = text.chars().collect();
                let mut out = BitString::with_capacity(length * LETTER_BITS);
                for _ in chars.len()..*length {
                    out.push_uint(SPACE_CODE, LETTER_BITS);
                }
                let start = chars.len().saturating_sub(*length);
                for &ch in &chars[start..] {
                    out.push_uint(char_code(ch, custom_alphabet), LETTER_BITS);
                }
                Ok(out)
            }
            BlockKind::Steps { steps, bits, .. } => {
                let raw = value.as_f64().ok_or_else(|| EncodeError::WrongType {
                    key: key.to_owned(),
                    expected: "a number",
                })?;
                // Lower-inclusive boundary: x >= steps[i] advances the bucket.
                let bucket = steps.iter().take_while(|&&step| raw >= step).count();
                let mut out = BitString::with_capacity(*bits);
                out.push_uint(bucket as u64, *bits);
                Ok(out)
            }
            BlockKind::Categories {
                categories,
                fallback,
                bits,
                ..
            } => {
                let label = value.as_str().ok_or_else(|| EncodeError::WrongType {
                    key: key.to_owned(),
                    expected: "a string",
                })?;
                let index = match categories.iter().position(|c| c == label) {
                    Some(index) => index,
                    None => fallback.ok_or_else(|| EncodeError::UnknownCategory {
                        key: key.to_owned(),
                        value: label.to_owned(),
                    })?,
                };
                let mut out = BitString::with_capacity(*bits);
                out.push_uint(index as u64, *bits);
                Ok(out)
            }
        }
    }

    fn decode_value(&self, reader: &mut BitReader<'_>) -> Result<Value, DecodeError> {
        match self {
            BlockKind::Boolean => Ok(Value::Bool(reader.read_uint(1)? == 1)),
            BlockKind::Binary { bits } => {
                Ok(Value::String(reader.read_bits(*bits)?.to_bin_string()))
            }
            BlockKind::Integer { bits, offset, .. } => {
                let raw = reader.read_uint(*bits)?;
                Ok(int_value(i128::from(raw) + i128::from(*offset)))
            }
            BlockKind::Float {
                bits, lower, upper, ..
            } => {
                let raw = reader.read_uint(*bits)?;
                let cap = ((1u128 << *bits) - 1) as f64;
                Ok(Value::from(raw as f64 * (upper - lower) / cap + lower))
            }
            BlockKind::Pad { bits } => {
                reader.skip(*bits)?;
                Ok(Value::Null)
            }
            BlockKind::Array {
                length,
                fixed,
                prefix_bits,
                items,
            } => {
                let count = if *fixed {
                    *length
                } else {
                    reader.read_uint(*prefix_bits)? as usize
                };
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(items.decode(reader)?);
                }
                Ok(Value::Array(values))
            }
            BlockKind::Object { blocklist } => {
                Ok(Value::Object(decode_blocklist(blocklist, reader)?))
            }
            BlockKind::String {
                length,
                custom_alphabet,
            } => {
                let mut text = String::with_capacity(*length);
                for _ in 0..*length {
                    let code = reader.read_uint(LETTER_BITS)?;
                    text.push(code_char(code, custom_alphabet));
                }
                Ok(Value::String(text))
            }
            BlockKind::Steps {
                steps_names, bits, ..
            } => {
                let index = reader.read_uint(*bits)? as usize;
                let name = steps_names.get(index).map_or("error", String::as_str);
                Ok(Value::String(name.to_owned()))
            }
            BlockKind::Categories {
                categories, bits, ..
            } => {
                let index = reader.read_uint(*bits)? as usize;
                let label = categories.get(index).map_or("error", String::as_str);
                Ok(Value::String(label.to_owned()))
            }
        }
    }
}

/// Encode an ordered block list against a nested input mapping,
/// resolving each dynamic block's dotted key. Shared by object blocks
/// and the payload envelope.
pub(crate) fn encode_blocklist<'a>(
    blocks: impl IntoIterator<Item = &'a Block>,
    value: &Value,
    context: &str,
) -> Result<BitString, EncodeError> {
    if !value.is_object() {
        return Err(EncodeError::WrongType {
            key: context.to_owned(),
            expected: "an object",
        });
    }
    let mut out = BitString::new();
    for block in blocks {
        if block.is_static() || block.is_pad() {
            out.extend(&block.encode(&Value::Null)?);
            continue;
        }
        let path = KeyPath::parse(&block.key);
        let item = keys::get_value(value, &path).ok_or_else(|| EncodeError::MissingValue {
            key: block.key.clone(),
        })?;
        out.extend(&block.encode(item)?);
    }
    Ok(out)
}

/// Decode an ordered block list into a nested mapping, dropping pads
/// and applying aliases. Shared by object blocks and the payload
/// envelope.
pub(crate) fn decode_blocklist<'a>(
    blocks: impl IntoIterator<Item = &'a Block>,
    reader: &mut BitReader<'_>,
) -> Result<Map<String, Value>, DecodeError> {
    let mut out = Map::new();
    for block in blocks {
        let value = block.decode(reader)?;
        if block.is_pad() {
            continue;
        }
        let out_key = block.alias.as_deref().unwrap_or(&block.key);
        keys::insert_value(&mut out, &KeyPath::parse(out_key), value);
    }
    Ok(out)
}

/// Encode a single value with a standalone block spec
pub fn encode_block(value: &Value, block_spec: &Value) -> crate::error::Result<BitString> {
    let block = Block::from_spec(block_spec)?;
    Ok(block.encode(value)?)
}

/// Decode a single value from the start of a bit string with a
/// standalone block spec
pub fn decode_block(message: &BitString, block_spec: &Value) -> crate::error::Result<Value> {
    let block = Block::from_spec(block_spec)?;
    let mut reader = BitReader::new(message);
    Ok(block.decode(&mut reader)?)
}

fn value_as_i128(value: &Value) -> Option<i128> {
    let n = value.as_number()?;
    if let Some(i) = n.as_i64() {
        return Some(i128::from(i));
    }
    n.as_u64().map(i128::from)
}

fn int_value(value: i128) -> Value {
    if let Ok(i) = i64::try_from(value) {
        Value::from(i)
    } else if let Ok(u) = u64::try_from(value) {
        Value::from(u)
    } else {
        Value::from(value as f64)
    }
}

fn char_code(ch: char, custom: &[(u8, char)]) -> u64 {
    if let Some(&(code, _)) = custom.iter().find(|&&(_, c)| c == ch) {
        return u64::from(code);
    }
    if ch == ' ' {
        return SPACE_CODE;
    }
    ALPHABET
        .iter()
        .position(|&c| c == ch)
        .map_or(UNKNOWN_CODE, |index| index as u64)
}

pub(crate) fn code_char(code: u64, custom: &[(u8, char)]) -> char {
    if let Some(&(_, ch)) = custom.iter().find(|&&(c, _)| u64::from(c) == code) {
        return ch;
    }
    ALPHABET.get(code as usize).copied().unwrap_or('/')
}

fn parse_custom_alphabet(reader: &SpecReader<'_>) -> Result<Vec<(u8, char)>, SchemaError> {
    let raw = match reader.map.get("custom_alphabet") {
        None => return Ok(Vec::new()),
        Some(raw) => raw.as_object().ok_or_else(|| SchemaError::WrongType {
            block: reader.block.to_owned(),
            key: "custom_alphabet".to_owned(),
            expected: "an object",
        })?,
    };
    let mut overrides = Vec::with_capacity(raw.len());
    for (code_text, ch_value) in raw {
        let code: u8 = code_text
            .parse()
            .ok()
            .filter(|code| *code < 64)
            .ok_or_else(|| SchemaError::InvalidValue {
                block: reader.block.to_owned(),
                key: "custom_alphabet",
                reason: format!("code '{code_text}' is not in 0..=63"),
            })?;
        let text = ch_value.as_str().ok_or_else(|| SchemaError::WrongType {
            block: reader.block.to_owned(),
            key: "custom_alphabet".to_owned(),
            expected: "an object of single-character strings",
        })?;
        let mut chars = text.chars();
        let ch = match (chars.next(), chars.next()) {
            (Some(ch), None) => ch,
            _ => {
                return Err(SchemaError::InvalidValue {
                    block: reader.block.to_owned(),
                    key: "custom_alphabet",
                    reason: format!("'{text}' is not a single character"),
                })
            }
        };
        overrides.push((code, ch));
    }
    Ok(overrides)
}

fn auto_steps_names(displays: &[String]) -> Vec<String> {
    let mut names = Vec::with_capacity(displays.len() + 1);
    names.push(format!("x<{}", displays[0]));
    for pair in displays.windows(2) {
        names.push(format!("{}<=x<{}", pair[0], pair[1]));
    }
    names.push(format!("x>={}", displays[displays.len() - 1]));
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block(spec: Value) -> Block {
        Block::from_spec(&spec).unwrap()
    }

    fn encode_bin(block: &Block, value: Value) -> String {
        block.encode(&value).unwrap().to_bin_string()
    }

    fn decode_one(block: &Block, bits: &str) -> Value {
        let message = BitString::from_bin_str(bits).unwrap();
        let mut reader = BitReader::new(&message);
        block.decode(&mut reader).unwrap()
    }

    #[test]
    fn test_boolean_roundtrip() {
        let b = block(json!({"key": "active", "type": "boolean"}));
        assert_eq!(encode_bin(&b, json!(true)), "0b1");
        assert_eq!(encode_bin(&b, json!(false)), "0b0");
        assert_eq!(decode_one(&b, "0b1"), json!(true));
        assert_eq!(decode_one(&b, "0b0"), json!(false));
    }

    #[test]
    fn test_boolean_accepts_integers() {
        let b = block(json!({"key": "active", "type": "boolean"}));
        assert_eq!(encode_bin(&b, json!(1)), "0b1");
        assert_eq!(encode_bin(&b, json!(0)), "0b0");
    }

    #[test]
    fn test_boolean_rejects_strings() {
        let b = block(json!({"key": "active", "type": "boolean"}));
        assert!(matches!(
            b.encode(&json!("yes")),
            Err(EncodeError::WrongType { .. })
        ));
    }

    #[test]
    fn test_binary_bin_and_hex_literals() {
        let b = block(json!({"key": "s3cr37", "type": "binary", "bits": 10}));
        assert_eq!(encode_bin(&b, json!("0b100101")), "0b0000100101");
        assert_eq!(encode_bin(&b, json!("0xa1")), "0b0010100001");
        assert_eq!(decode_one(&b, "0b0010100001"), json!("0b0010100001"));
    }

    #[test]
    fn test_binary_rejects_garbage() {
        let b = block(json!({"key": "s3cr37", "type": "binary", "bits": 10}));
        assert!(matches!(
            b.encode(&json!("0b012")),
            Err(EncodeError::BadBinary { .. })
        ));
        assert!(matches!(
            b.encode(&json!("nope")),
            Err(EncodeError::BadBinary { .. })
        ));
    }

    #[test]
    fn test_integer_clamps_overflow_and_underflow() {
        let b = block(json!({"key": "count", "type": "integer", "bits": 6}));
        assert_eq!(encode_bin(&b, json!(128)), "0b111111");
        assert_eq!(encode_bin(&b, json!(-10)), "0b000000");
        assert_eq!(encode_bin(&b, json!(42)), "0b101010");
    }

    #[test]
    fn test_integer_offset() {
        let b = block(json!({"key": "temp", "type": "integer", "bits": 6, "offset": 100}));
        assert_eq!(encode_bin(&b, json!(110)), "0b001010");
        assert_eq!(decode_one(&b, "0b001010"), json!(110));
    }

    #[test]
    fn test_integer_remainder_mode_wraps() {
        let b = block(json!({"key": "seq", "type": "integer", "bits": 4, "mode": "remainder"}));
        assert_eq!(encode_bin(&b, json!(18)), "0b0010");
        assert_eq!(encode_bin(&b, json!(-1)), "0b1111");
    }

    #[test]
    fn test_float_round_policy() {
        let b = block(json!({"key": "date", "type": "float", "bits": 2}));
        assert_eq!(encode_bin(&b, json!(0.66)), "0b10");
    }

    #[test]
    fn test_float_floor_policy() {
        let b = block(
            json!({"key": "date", "type": "float", "bits": 2, "approximation": "floor"}),
        );
        assert_eq!(encode_bin(&b, json!(0.66)), "0b01");
        let decoded = decode_one(&b, "0b01");
        let delta = (decoded.as_f64().unwrap() - 1.0 / 3.0).abs();
        assert!(delta < 1e-9);
    }

    #[test]
    fn test_float_clamps_out_of_range() {
        let b = block(json!({"key": "v", "type": "float", "bits": 6, "lower": 10, "upper": 13}));
        assert_eq!(encode_bin(&b, json!(8)), "0b000000");
        assert_eq!(encode_bin(&b, json!(14.1)), "0b111111");
    }

    #[test]
    fn test_pad_encodes_ones_and_decodes_to_null() {
        let b = block(json!({"key": "pad", "type": "pad", "bits": 5}));
        assert_eq!(encode_bin(&b, json!(null)), "0b11111");
        assert_eq!(decode_one(&b, "0b11111"), Value::Null);
    }

    #[test]
    fn test_string_pads_left_with_spaces() {
        let b = block(json!({"key": "holy", "type": "string", "length": 10}));
        assert_eq!(decode_one(&b, &encode_bin(&b, json!("grail"))), json!("+++++grail"));
    }

    #[test]
    fn test_string_unknown_characters_become_slash() {
        let b = block(json!({"key": "user", "type": "string", "length": 3}));
        assert_eq!(decode_one(&b, &encode_bin(&b, json!("a!b"))), json!("a/b"));
    }

    #[test]
    fn test_string_custom_alphabet() {
        let b = block(json!({
            "key": "msg", "type": "string", "length": 6,
            "custom_alphabet": {"62": " "}
        }));
        assert_eq!(decode_one(&b, &encode_bin(&b, json!("a b"))), json!("   a b"));
    }

    #[test]
    fn test_steps_boundaries() {
        let b = block(json!({
            "key": "battery", "type": "steps",
            "steps": [0, 5, 10],
            "steps_names": ["critical", "low", "charged", "full"]
        }));
        assert_eq!(encode_bin(&b, json!(-1)), "0b00");
        assert_eq!(decode_one(&b, "0b00"), json!("critical"));
        assert_eq!(encode_bin(&b, json!(5)), "0b10");
        assert_eq!(decode_one(&b, "0b10"), json!("charged"));
        assert_eq!(encode_bin(&b, json!(11)), "0b11");
        assert_eq!(decode_one(&b, "0b11"), json!("full"));
    }

    #[test]
    fn test_steps_auto_names() {
        let b = block(json!({"key": "rain", "type": "steps", "steps": [0, 10, 20, 30]}));
        assert_eq!(decode_one(&b, &encode_bin(&b, json!(25))), json!("20<=x<30"));
        assert_eq!(decode_one(&b, &encode_bin(&b, json!(-3))), json!("x<0"));
        assert_eq!(decode_one(&b, &encode_bin(&b, json!(99))), json!("x>=30"));
    }

    #[test]
    fn test_steps_unsorted_is_schema_error() {
        let result = Block::from_spec(&json!({
            "key": "rain", "type": "steps", "steps": [10, 0, 20]
        }));
        assert!(matches!(result, Err(SchemaError::UnsortedSteps { .. })));
    }

    #[test]
    fn test_steps_names_length_error() {
        let result = Block::from_spec(&json!({
            "key": "rain", "type": "steps", "steps": [0, 5, 10],
            "steps_names": ["one", "two"]
        }));
        assert!(matches!(
            result,
            Err(SchemaError::StepsNamesLength { expected: 4, .. })
        ));
    }

    #[test]
    fn test_categories_without_fallback_rejects_unlisted() {
        let b = block(json!({
            "key": "battery", "type": "categories",
            "categories": ["critical", "low", "charged", "full"]
        }));
        assert_eq!(encode_bin(&b, json!("charged")), "0b10");
        assert!(matches!(
            b.encode(&json!("unlisted")),
            Err(EncodeError::UnknownCategory { .. })
        ));
    }

    #[test]
    fn test_categories_fallback_reuses_existing_code() {
        let b = block(json!({
            "key": "battery", "type": "categories",
            "categories": ["critical", "low", "charged", "full"],
            "error": "critical"
        }));
        // No extra code allocated: still 2 bits, fallback is index 0.
        assert_eq!(encode_bin(&b, json!("unlisted")), "0b00");
        assert_eq!(decode_one(&b, "0b00"), json!("critical"));
    }

    #[test]
    fn test_categories_fallback_new_label_allocates_code() {
        let b = block(json!({
            "key": "battery", "type": "categories",
            "categories": ["critical", "low", "charged", "full"],
            "error": "unknown"
        }));
        assert_eq!(encode_bin(&b, json!("unlisted")), "0b100");
        assert_eq!(decode_one(&b, "0b100"), json!("unknown"));
        assert_eq!(encode_bin(&b, json!("full")), "0b011");
    }

    #[test]
    fn test_categories_out_of_range_code_decodes_to_error() {
        let b = block(json!({
            "key": "battery", "type": "categories",
            "categories": ["critical", "low", "charged", "full"]
        }));
        // 2-bit field always decodes in range; widen via a new label
        // pool where codes 5..7 are unused.
        let b5 = block(json!({
            "key": "battery", "type": "categories",
            "categories": ["a", "b", "c", "d"], "error": "e"
        }));
        assert_eq!(decode_one(&b5, "0b111"), json!("error"));
        assert_eq!(decode_one(&b, "0b11"), json!("full"));
    }

    #[test]
    fn test_fixed_array_length_mismatch() {
        let b = block(json!({
            "key": "buffer", "type": "array", "length": 3, "fixed": true,
            "blocks": {"key": "item", "type": "integer", "bits": 4}
        }));
        assert!(matches!(
            b.encode(&json!([1, 2])),
            Err(EncodeError::ArrayLength { expected: 3, actual: 2, .. })
        ));
        assert_eq!(encode_bin(&b, json!([1, 2, 3])), "0b000100100011");
    }

    #[test]
    fn test_variable_array_truncates_long_input() {
        let b = block(json!({
            "key": "buffer", "type": "array", "length": 3,
            "blocks": {"key": "item", "type": "integer", "bits": 4}
        }));
        let bits = encode_bin(&b, json!([1, 2, 3, 4, 5]));
        assert_eq!(bits, "0b11000100100011");
        assert_eq!(decode_one(&b, &bits), json!([1, 2, 3]));
    }

    #[test]
    fn test_array_of_array_rejected() {
        let result = Block::from_spec(&json!({
            "key": "matrix", "type": "array", "length": 3,
            "blocks": {
                "key": "row", "type": "array", "length": 3,
                "blocks": {"key": "cell", "type": "integer", "bits": 4}
            }
        }));
        assert!(matches!(result, Err(SchemaError::NestedArray { .. })));
    }

    #[test]
    fn test_object_nested_keys_roundtrip() {
        let b = block(json!({
            "key": "sensor", "type": "object",
            "blocklist": [
                {"key": "value.y", "type": "integer", "bits": 6},
                {"key": "value.z", "type": "boolean"}
            ]
        }));
        let data = json!({"value": {"y": 10, "z": true}});
        let bits = encode_bin(&b, data.clone());
        assert_eq!(decode_one(&b, &bits), data);
    }

    #[test]
    fn test_object_duplicate_child_keys_rejected() {
        let result = Block::from_spec(&json!({
            "key": "sensor", "type": "object",
            "blocklist": [
                {"key": "x", "type": "boolean"},
                {"key": "x", "type": "integer", "bits": 4}
            ]
        }));
        assert!(matches!(result, Err(SchemaError::DuplicateKey { .. })));
    }

    #[test]
    fn test_alias_renames_decoded_output() {
        let b = block(json!({
            "key": "wrapper", "type": "object",
            "blocklist": [
                {"key": "deep.reading", "alias": "reading", "type": "integer", "bits": 6}
            ]
        }));
        let bits = encode_bin(&b, json!({"deep": {"reading": 17}}));
        assert_eq!(decode_one(&b, &bits), json!({"reading": 17}));
    }

    #[test]
    fn test_static_value_ignores_runtime_input() {
        let b = block(json!({
            "key": "msg_version", "type": "integer", "value": 2, "bits": 6
        }));
        assert!(b.is_static());
        assert_eq!(encode_bin(&b, json!(55)), "0b000010");
        assert_eq!(decode_one(&b, "0b000010"), json!(2));
    }

    #[test]
    fn test_static_value_mismatch_still_returns_literal() {
        let b = block(json!({
            "key": "msg_version", "type": "integer", "value": 2, "bits": 6
        }));
        // Wire carries 5, the schema promises 2: soft signal only.
        assert_eq!(decode_one(&b, "0b000101"), json!(2));
    }

    #[test]
    fn test_bit_width_matches_encoded_length() {
        let b = block(json!({
            "key": "occurrences", "type": "array", "length": 7,
            "blocks": {
                "key": "species", "type": "object",
                "blocklist": [
                    {"key": "name", "type": "categories", "categories": ["kitten", "doggo"]},
                    {"key": "count", "type": "integer", "bits": 6}
                ]
            }
        }));
        let encoded = b
            .encode(&json!([
                {"name": "kitten", "count": 4},
                {"name": "doggo", "count": 10}
            ]))
            .unwrap();
        assert_eq!(b.bit_width(&encoded).unwrap(), encoded.len());
    }

    #[test]
    fn test_width_range_variable_array() {
        let b = block(json!({
            "key": "buffer", "type": "array", "length": 3,
            "blocks": {"key": "item", "type": "integer", "bits": 4}
        }));
        assert_eq!(b.width_range(), (2, 2 + 3 * 4));
    }

    #[test]
    fn test_missing_required_key() {
        let result = Block::from_spec(&json!({"key": "count", "type": "integer"}));
        assert!(matches!(result, Err(SchemaError::MissingKey { .. })));
    }

    #[test]
    fn test_unexpected_key_rejected() {
        let result = Block::from_spec(&json!({
            "key": "count", "type": "integer", "bits": 6, "steps": [1, 2]
        }));
        assert!(matches!(result, Err(SchemaError::UnexpectedKey { .. })));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = Block::from_spec(&json!({"key": "count", "type": "quaternion"}));
        assert!(matches!(result, Err(SchemaError::UnknownType { .. })));
    }

    #[test]
    fn test_encode_block_and_decode_block_helpers() {
        let spec = json!({"key": "count", "type": "integer", "bits": 6});
        let bits = encode_block(&json!(42), &spec).unwrap();
        assert_eq!(bits.to_bin_string(), "0b101010");
        assert_eq!(decode_block(&bits, &spec).unwrap(), json!(42));
    }
}
