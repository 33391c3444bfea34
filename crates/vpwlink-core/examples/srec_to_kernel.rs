//! Carve the kernel load range out of an S-Record file into a flat binary.
//!
//! Usage: srec_to_kernel <input.S> <output.bin>

use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;
use vpwlink_core::srecord::{PayloadFilter, SRecordReader, KERNEL_LOAD_RANGE};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("Usage: srec_to_kernel <input.S> <output.bin>");
    }

    let reader = SRecordReader::open(&args[1])
        .with_context(|| format!("failed to open {}", args[1]))?;
    let output = File::create(&args[2])
        .with_context(|| format!("failed to create {}", args[2]))?;
    let mut output = BufWriter::new(output);

    let filter = PayloadFilter::new(KERNEL_LOAD_RANGE);
    let written = filter.extract_to(reader, &mut output)?;
    output.flush()?;

    println!(
        "Wrote {} bytes from {:#08X}..{:#08X} to {}",
        written, filter.range().start, filter.range().end, args[2]
    );
    Ok(())
}
