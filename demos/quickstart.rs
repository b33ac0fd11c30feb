use std::fs;
use std::io::{self, prelude::*};
use std::path;

use env_logger;
use log;

use line_sort::ExternalSorterBuilder;

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let mut input = io::Cursor::new(b"10\n2\n33\n1\n100\n7\n7\n".to_vec());
    let mut output = Vec::new();

    let mut sorter = ExternalSorterBuilder::new()
        .with_tmp_dir(path::Path::new("./"))
        .with_block_size(16)
        .with_output_buffer_size(8)
        .build()
        .unwrap();

    let stats = sorter.sort(&mut input, &mut output).unwrap();
    log::info!("{:?}", stats);

    let mut result = fs::File::create("output.txt").unwrap();
    result.write_all(&output).unwrap();
}
