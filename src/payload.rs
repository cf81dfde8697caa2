//! Payload envelope
//!
//! A [`PayloadSpec`] composes an ordered block list into one complete
//! message: an optional version field, a header of dynamic blocks and
//! zero-bit static annotations, the body, zero padding up to the next
//! byte boundary, and an optional trailing CRC8 byte.
//!
//! Multi-version dispatch works through the version field:
//! [`PayloadSpec::decode`] fails with [`DecodeError::Version`] when the
//! wire version disagrees with the spec, and [`decode_from_specs`]
//! treats exactly that failure as "try the next candidate".

use serde::Serialize;
use serde_json::{Map, Value};

use crate::bits::{BitReader, BitString, Message};
use crate::block::{self, Block};
use crate::crc8;
use crate::error::{DecodeError, Error, PoolError, Result, SchemaError};
use crate::keys::{self, KeyPath};

/// One header entry: a wire-encoded block or a zero-bit annotation
/// merged verbatim into the decoded metadata.
#[derive(Debug, Clone)]
enum HeaderEntry {
    Dynamic(Block),
    Static { key: String, value: Value },
}

/// A validated payload specification.
///
/// Construction performs all schema-level checks eagerly; a built spec
/// can always encode and decode without re-validation.
#[derive(Debug, Clone)]
pub struct PayloadSpec {
    name: String,
    version: u64,
    encode_version: bool,
    version_bits: usize,
    header: Vec<HeaderEntry>,
    crc8: bool,
    body: Vec<Block>,
}

/// Decode output: envelope metadata plus the reconstructed body.
#[derive(Debug, Clone, Serialize)]
pub struct Decoded {
    /// Envelope metadata
    pub meta: DecodedMeta,
    /// Nested body mapping (pads dropped, aliases applied)
    pub body: Value,
}

/// Envelope metadata attached to every decode.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedMeta {
    /// Spec name
    pub name: String,
    /// Spec version
    pub version: u64,
    /// The raw message, hex form
    pub message: String,
    /// CRC8 verification result, when the spec declares a trailer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc8: Option<bool>,
    /// Decoded header merged with static annotations, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<Value>,
}

/// Size report for a payload spec.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    /// Spec name
    pub name: String,
    /// Spec version
    pub version: u64,
    /// Smallest possible message size in bits, padding and CRC included
    pub min_bits: usize,
    /// Largest possible message size in bits, padding and CRC included
    pub max_bits: usize,
    /// Per-block breakdown, header blocks first
    pub blocks: Vec<BlockStats>,
}

/// Size contribution of a single block.
#[derive(Debug, Clone, Serialize)]
pub struct BlockStats {
    /// Dotted block key
    pub key: String,
    /// Block type tag
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Smallest width in bits
    pub min_bits: usize,
    /// Largest width in bits
    pub max_bits: usize,
}

impl PayloadSpec {
    /// Build and validate a payload spec from its JSON representation.
    pub fn from_value(spec: &Value) -> Result<Self> {
        let map = as_map(spec, "payload spec")?;
        check_keys(map, &["name", "version", "meta", "body"], "payload spec")?;

        let name = require_str(map, "name", "payload spec")?.to_owned();
        let version = require_u64(map, "version", &name)?;

        let (encode_version, version_bits, header, with_crc8) = match map.get("meta") {
            None => (false, 0, Vec::new(), false),
            Some(meta) => {
                let meta = as_map(meta, &name)?;
                check_keys(
                    meta,
                    &["encode_version", "version_bits", "header", "crc8"],
                    &name,
                )?;
                let encode_version = opt_bool(meta, "encode_version", false, &name)?;
                let version_bits = if encode_version {
                    let bits = require_u64(meta, "version_bits", &name)?;
                    if bits == 0 || bits > 64 {
                        return Err(SchemaError::BitsOutOfRange {
                            block: name,
                            bits,
                        }
                        .into());
                    }
                    bits as usize
                } else {
                    0
                };
                let header = match meta.get("header") {
                    None => Vec::new(),
                    Some(raw) => {
                        let entries = raw.as_array().ok_or_else(|| SchemaError::WrongType {
                            block: name.clone(),
                            key: "header".to_owned(),
                            expected: "a list",
                        })?;
                        entries
                            .iter()
                            .map(parse_header_entry)
                            .collect::<Result<Vec<_>>>()?
                    }
                };
                let with_crc8 = opt_bool(meta, "crc8", false, &name)?;
                (encode_version, version_bits, header, with_crc8)
            }
        };

        if encode_version && version_bits < 64 && version >= 1 << version_bits {
            return Err(SchemaError::VersionOverflow {
                version,
                bits: version_bits,
            }
            .into());
        }

        let body_specs = map
            .get("body")
            .and_then(Value::as_array)
            .ok_or_else(|| SchemaError::MissingKey {
                block: name.clone(),
                key: "body".to_owned(),
            })?;
        let body = body_specs
            .iter()
            .map(|b| Block::from_spec(b).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?;

        if !encode_version && header.is_empty() && body.is_empty() {
            return Err(SchemaError::EmptySpec.into());
        }

        // Header and body share one flat namespace.
        let mut flat = Vec::new();
        for entry in &header {
            match entry {
                HeaderEntry::Dynamic(b) => b.collect_keys("", &mut flat),
                HeaderEntry::Static { key, .. } => flat.push(key.clone()),
            }
        }
        for b in &body {
            b.collect_keys("", &mut flat);
        }
        if let Some(dup) = keys::find_collision(&flat) {
            return Err(SchemaError::DuplicateKey { key: dup }.into());
        }

        Ok(Self {
            name,
            version,
            encode_version,
            version_bits,
            header,
            crc8: with_crc8,
            body,
        })
    }

    /// Spec name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spec version
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Body blocks in declared order
    #[inline]
    pub fn body(&self) -> &[Block] {
        &self.body
    }

    pub(crate) fn dynamic_header(&self) -> impl Iterator<Item = &Block> {
        self.header.iter().filter_map(|entry| match entry {
            HeaderEntry::Dynamic(b) => Some(b),
            HeaderEntry::Static { .. } => None,
        })
    }

    /// Encode a payload mapping into a complete message.
    ///
    /// Header and body values are both resolved against `payload` by
    /// their dotted keys. The output is always byte-aligned.
    pub fn encode(&self, payload: &Value) -> Result<Message> {
        let mut bits = BitString::new();
        if self.encode_version {
            bits.push_uint(self.version, self.version_bits);
        }
        bits.extend(&block::encode_blocklist(
            self.dynamic_header(),
            payload,
            "payload",
        )?);
        bits.extend(&block::encode_blocklist(&self.body, payload, "payload")?);
        bits.pad_to_byte();
        if self.crc8 {
            let digest = crc8::compute(&bits.to_bytes());
            bits.push_uint(u64::from(digest), 8);
        }
        Ok(Message::from_bits(bits))
    }

    /// Decode a message against this spec.
    ///
    /// A failed CRC8 check is reported in the metadata, not raised; a
    /// version mismatch is [`DecodeError::Version`].
    pub fn decode(&self, message: &Message) -> Result<Decoded> {
        let mut bits = message.bits().clone();
        let crc_result = if self.crc8 {
            if bits.len() < 8 {
                return Err(DecodeError::UnexpectedEof {
                    needed: 8,
                    available: bits.len(),
                }
                .into());
            }
            let passed = crc8::verify(&bits.to_bytes());
            if !passed {
                tracing::warn!(name = %self.name, "crc8 check failed");
            }
            bits = bits.slice(0, bits.len() - 8);
            Some(passed)
        } else {
            None
        };

        let mut reader = BitReader::new(&bits);
        if self.encode_version {
            let found = reader.read_uint(self.version_bits)?;
            if found != self.version {
                return Err(DecodeError::Version {
                    expected: self.version,
                    found,
                }
                .into());
            }
        }

        let header = if self.header.is_empty() {
            None
        } else {
            let mut merged = block::decode_blocklist(self.dynamic_header(), &mut reader)?;
            for entry in &self.header {
                if let HeaderEntry::Static { key, value } = entry {
                    keys::insert_value(&mut merged, &KeyPath::parse(key), value.clone());
                }
            }
            Some(Value::Object(merged))
        };

        let body = Value::Object(block::decode_blocklist(&self.body, &mut reader)?);
        // Whatever remains is the zero padding added at encode time.

        Ok(Decoded {
            meta: DecodedMeta {
                name: self.name.clone(),
                version: self.version,
                message: message.to_hex(),
                crc8: crc_result,
                header,
            },
            body,
        })
    }

    /// Compute the size report for this spec.
    pub fn stats(&self) -> Stats {
        let mut blocks = Vec::new();
        let mut min_bits = 0;
        let mut max_bits = 0;
        if self.encode_version {
            min_bits += self.version_bits;
            max_bits += self.version_bits;
        }
        for b in self.dynamic_header().chain(self.body.iter()) {
            let (min, max) = b.width_range();
            blocks.push(BlockStats {
                key: b.key().to_owned(),
                kind: b.kind().type_name(),
                min_bits: min,
                max_bits: max,
            });
            min_bits += min;
            max_bits += max;
        }
        // Zero padding rounds each bound up to a byte boundary.
        min_bits = min_bits.div_ceil(8) * 8;
        max_bits = max_bits.div_ceil(8) * 8;
        if self.crc8 {
            min_bits += 8;
            max_bits += 8;
        }
        Stats {
            name: self.name.clone(),
            version: self.version,
            min_bits,
            max_bits,
            blocks,
        }
    }
}

fn parse_header_entry(entry: &Value) -> Result<HeaderEntry> {
    let map = as_map(entry, "header")?;
    if map.contains_key("type") {
        return Ok(HeaderEntry::Dynamic(Block::from_spec(entry)?));
    }
    check_keys(map, &["key", "value"], "header")?;
    let key = require_str(map, "key", "header")?.to_owned();
    let value = map
        .get("value")
        .cloned()
        .ok_or_else(|| SchemaError::MissingKey {
            block: key.clone(),
            key: "value".to_owned(),
        })?;
    Ok(HeaderEntry::Static { key, value })
}

/// Decode a message by trying each candidate spec in order.
///
/// All candidates must share a name, encode their version with the same
/// width, and declare distinct versions; this is checked up front. A
/// [`DecodeError::Version`] moves on to the next candidate, any other
/// failure is terminal, and exhausting the pool is
/// [`Error::NoMatchingSpec`].
pub fn decode_from_spec_pool(message: &Message, specs: &[PayloadSpec]) -> Result<Decoded> {
    let first = specs.first().ok_or(PoolError::Empty)?;
    let mut seen = Vec::with_capacity(specs.len());
    for spec in specs {
        if spec.name != first.name {
            return Err(PoolError::NameMismatch {
                expected: first.name.clone(),
                found: spec.name.clone(),
            }
            .into());
        }
        if !spec.encode_version {
            return Err(PoolError::VersionNotEncoded {
                name: spec.name.clone(),
            }
            .into());
        }
        if spec.version_bits != first.version_bits {
            return Err(PoolError::VersionBitsMismatch.into());
        }
        if seen.contains(&spec.version) {
            return Err(PoolError::DuplicateVersion {
                version: spec.version,
            }
            .into());
        }
        seen.push(spec.version);
    }

    for spec in specs {
        match spec.decode(message) {
            Ok(decoded) => return Ok(decoded),
            Err(Error::Decode(DecodeError::Version { expected, found })) => {
                tracing::debug!(
                    name = %spec.name,
                    expected,
                    found,
                    "version mismatch, trying next spec"
                );
            }
            Err(other) => return Err(other),
        }
    }

    let mut reader = BitReader::new(message.bits());
    let version = reader.read_uint(first.version_bits)?;
    Err(Error::NoMatchingSpec { version })
}

/// Encode a payload with a JSON payload spec
pub fn encode(payload: &Value, spec: &Value) -> Result<Message> {
    PayloadSpec::from_value(spec)?.encode(payload)
}

/// Decode a message with a JSON payload spec
pub fn decode(message: &Message, spec: &Value) -> Result<Decoded> {
    PayloadSpec::from_value(spec)?.decode(message)
}

/// Decode a message against a pool of JSON payload specs
pub fn decode_from_specs(message: &Message, specs: &[Value]) -> Result<Decoded> {
    let pool = specs
        .iter()
        .map(PayloadSpec::from_value)
        .collect::<Result<Vec<_>>>()?;
    decode_from_spec_pool(message, &pool)
}

/// Compute the size report for a JSON payload spec
pub fn stats(spec: &Value) -> Result<Stats> {
    Ok(PayloadSpec::from_value(spec)?.stats())
}

fn as_map<'a>(value: &'a Value, context: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| {
            SchemaError::WrongType {
                block: context.to_owned(),
                key: "spec".to_owned(),
                expected: "an object",
            }
            .into()
        })
}

fn check_keys(map: &Map<String, Value>, allowed: &[&str], context: &str) -> Result<()> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(SchemaError::UnexpectedKey {
                block: context.to_owned(),
                key: key.clone(),
            }
            .into());
        }
    }
    Ok(())
}

fn require_str<'a>(map: &'a Map<String, Value>, key: &str, context: &str) -> Result<&'a str> {
    map.get(key)
        .ok_or_else(|| {
            Error::from(SchemaError::MissingKey {
                block: context.to_owned(),
                key: key.to_owned(),
            })
        })?
        .as_str()
        .ok_or_else(|| {
            SchemaError::WrongType {
                block: context.to_owned(),
                key: key.to_owned(),
                expected: "a string",
            }
            .into()
        })
}

fn require_u64(map: &Map<String, Value>, key: &str, context: &str) -> Result<u64> {
    map.get(key)
        .ok_or_else(|| {
            Error::from(SchemaError::MissingKey {
                block: context.to_owned(),
                key: key.to_owned(),
            })
        })?
        .as_u64()
        .ok_or_else(|| {
            SchemaError::WrongType {
                block: context.to_owned(),
                key: key.to_owned(),
                expected: "a non-negative integer",
            }
            .into()
        })
}

fn opt_bool(map: &Map<String, Value>, key: &str, default: bool, context: &str) -> Result<bool> {
    match map.get(key) {
        None => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| {
            SchemaError::WrongType {
                block: context.to_owned(),
                key: key.to_owned(),
                expected: "a boolean",
            }
            .into()
        }),
    }
}
