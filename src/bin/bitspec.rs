//! Command-line interface for encoding and decoding bitspec payloads.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};

use bitspec::payload::decode_from_spec_pool;
use bitspec::{random_payload, Message, PayloadSpec};

#[derive(Parser)]
#[command(name = "bitspec", version, about = "Schema-driven bit-level payload codec")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Binary text (`0b...`)
    Bin,
    /// Hex text (`0x...`)
    Hex,
    /// Raw bytes
    Bytes,
}

#[derive(Subcommand)]
enum Command {
    /// Encode a JSON payload read from stdin (or a file) into a message
    Encode {
        /// Payload spec file
        #[arg(short = 'p', long = "payload-spec")]
        spec: PathBuf,
        /// Payload data file (defaults to stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Output message form
        #[arg(short, long, value_enum, default_value_t = Format::Bytes)]
        format: Format,
    },
    /// Decode a message read from stdin (or a file) into JSON
    Decode {
        /// Payload spec files; more than one enables version dispatch
        #[arg(short = 'p', long = "payload-spec", required = true, num_args = 1..)]
        specs: Vec<PathBuf>,
        /// Message file (defaults to stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Input message form
        #[arg(short, long, value_enum, default_value_t = Format::Bytes)]
        format: Format,
        /// Include envelope metadata in the output
        #[arg(long)]
        meta: bool,
    },
    /// Print the size report of a payload spec
    Stats {
        /// Payload spec file
        #[arg(short = 'p', long = "payload-spec")]
        spec: PathBuf,
    },
    /// Generate a random payload valid for a spec
    Random {
        /// Payload spec file
        #[arg(short = 'p', long = "payload-spec")]
        spec: PathBuf,
        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
        /// Output message form
        #[arg(short, long, value_enum, default_value_t = Format::Hex)]
        format: Format,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Command::Encode {
            spec,
            input,
            format,
        } => {
            let spec = load_spec(&spec)?;
            let data: Value = serde_json::from_slice(&read_input(input.as_deref())?)
                .context("payload data is not valid JSON")?;
            let message = spec.encode(&data)?;
            write_message(&message, format)
        }
        Command::Decode {
            specs,
            input,
            format,
            meta,
        } => {
            let pool = specs
                .iter()
                .map(|path| load_spec(path))
                .collect::<Result<Vec<_>>>()?;
            let message = read_message(input.as_deref(), format)?;
            let decoded = if pool.len() == 1 {
                pool[0].decode(&message)?
            } else {
                decode_from_spec_pool(&message, &pool)?
            };
            let rendered = if meta {
                serde_json::to_string_pretty(&decoded)?
            } else {
                serde_json::to_string_pretty(&decoded.body)?
            };
            println!("{rendered}");
            Ok(())
        }
        Command::Stats { spec } => {
            let stats = load_spec(&spec)?.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Random { spec, seed, format } => {
            let spec = load_spec(&spec)?;
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let (message, data) = random_payload(&spec, &mut rng)?;
            let rendered = json!({
                "message": render_text(&message, format),
                "data": data,
            });
            println!("{}", serde_json::to_string_pretty(&rendered)?);
            Ok(())
        }
    }
}

fn load_spec(path: &Path) -> Result<PayloadSpec> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("cannot read spec file '{}'", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("spec file '{}' is not valid JSON", path.display()))?;
    PayloadSpec::from_value(&value)
        .with_context(|| format!("spec file '{}' failed validation", path.display()))
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => {
            fs::read(path).with_context(|| format!("cannot read '{}'", path.display()))
        }
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf).context("cannot read stdin")?;
            Ok(buf)
        }
    }
}

fn read_message(path: Option<&Path>, format: Format) -> Result<Message> {
    let raw = read_input(path)?;
    if format == Format::Bytes {
        return Ok(Message::from_bytes(&raw));
    }
    let text = String::from_utf8(raw).context("message is not valid text")?;
    let text = text.trim();
    let message = match format {
        Format::Bin if text.starts_with("0b") => Message::from_bin(text)?,
        Format::Bin => Message::from_bin(&format!("0b{text}"))?,
        Format::Hex if text.starts_with("0x") || text.starts_with("0X") => {
            Message::from_hex(text)?
        }
        Format::Hex => Message::from_hex(&format!("0x{text}"))?,
        Format::Bytes => bail!("unreachable message form"),
    };
    Ok(message)
}

fn render_text(message: &Message, format: Format) -> String {
    match format {
        Format::Bin => message.to_bin(),
        Format::Hex | Format::Bytes => message.to_hex(),
    }
}

fn write_message(message: &Message, format: Format) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match format {
        Format::Bytes => stdout
            .write_all(&message.to_bytes())
            .context("cannot write message"),
        Format::Bin => {
            writeln!(stdout, "{}", message.to_bin()).context("cannot write message")
        }
        Format::Hex => {
            writeln!(stdout, "{}", message.to_hex()).context("cannot write message")
        }
    }
}
