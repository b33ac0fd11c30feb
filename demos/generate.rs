//! Writes random decimal integers without leading zeros, one per line, until the file reaches the requested size.
//!
//! Usage: `generate <output file> <size, e.g. 4GiB>`

use std::env;
use std::fs;
use std::io::{self, prelude::*};
use std::process;

use bytesize::ByteSize;
use rand::Rng;

fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: {} <output> <size>", args[0]);
        process::exit(2);
    }

    let size = match args[2].parse::<ByteSize>() {
        Ok(size) => size.as_u64(),
        Err(err) => {
            eprintln!("size format incorrect: {}", err);
            process::exit(2);
        }
    };

    let mut output = io::BufWriter::new(fs::File::create(&args[1])?);
    let mut rng = rand::thread_rng();
    let mut written = 0u64;

    while written < size {
        let value: u128 = rng.gen_range(0..10_000_000_000_000_000_000_000_000_000);
        let line = format!("{}\n", value);
        output.write_all(line.as_bytes())?;
        written += line.len() as u64;
    }

    return output.flush();
}
