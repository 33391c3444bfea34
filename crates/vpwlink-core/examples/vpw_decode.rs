//! Annotate a text log of bus traffic.
//!
//! VPW logs carry one frame of hex bytes per line. CAN logs are a raw
//! hex byte stream in the adapter's sentinel framing.
//!
//! Usage: vpw_decode [--can] <log.txt>

use std::env;
use std::fs;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;
use vpwlink_core::bus::{CanParser, VpwLogParser};
use vpwlink_core::hex::from_hex;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (can, path) = match args.as_slice() {
        [flag, path] if flag == "--can" => (true, path),
        [path] => (false, path),
        _ => bail!("Usage: vpw_decode [--can] <log.txt>"),
    };

    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;

    if can {
        decode_can(&text)
    } else {
        decode_vpw(&text);
        Ok(())
    }
}

fn decode_vpw(text: &str) {
    let frames = VpwLogParser::parse_log(text);
    let mut invalid = 0;
    for frame in &frames {
        println!("{}", frame);
        for error in &frame.errors {
            println!("    {}", error);
        }
        if !frame.is_valid() {
            invalid += 1;
        }
    }
    println!("\n{} frames, {} with errors", frames.len(), invalid);
}

fn decode_can(text: &str) -> Result<()> {
    let bytes = from_hex(text).context("CAN log is not a hex byte stream")?;
    let mut parser = CanParser::new();
    let frames = parser.feed(&bytes);
    for frame in &frames {
        let mut notes = Vec::new();
        if frame.dlc_clamped() {
            notes.push("DLC clamped");
        }
        if !frame.trailer_valid() {
            notes.push("bad trailer");
        }
        if notes.is_empty() {
            println!("{}", frame);
        } else {
            println!("{}  ({})", frame, notes.join(", "));
        }
    }
    println!(
        "\n{} frames, {} bytes skipped while hunting for a sentinel",
        frames.len(),
        parser.skipped()
    );
    Ok(())
}
