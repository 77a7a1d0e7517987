use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use ext_line_sort::run::RUN_DIR_PREFIX;
use ext_line_sort::Record;

const VOCABULARY: [&str; 6] = [
    "Apple",
    "Banana is yellow",
    "Cherry is the best",
    "Something something something",
    "apple",
    "Mr. Smith. Jr.",
];

/// Writes `"<number>. <text>"` lines to `writer` until about `target_bytes` are written.
/// Numbers are drawn from a narrow range so equal records are frequent.
pub fn generate<W: Write>(writer: &mut W, target_bytes: usize, seed: u64) -> io::Result<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut written = 0;
    let mut lines = 0;

    while written < target_bytes {
        let number: i64 = rng.gen_range(1..500);
        let text = VOCABULARY.choose(&mut rng).expect("vocabulary is not empty");
        let line = format!("{}. {}\n", number, text);
        writer.write_all(line.as_bytes())?;
        written += line.len();
        lines += 1;
    }

    return Ok(lines);
}

pub fn generate_string(target_bytes: usize, seed: u64) -> String {
    let mut buffer = Vec::new();
    generate(&mut buffer, target_bytes, seed).unwrap();
    String::from_utf8(buffer).unwrap()
}

pub fn generate_file(path: &Path, target_bytes: usize, seed: u64) -> usize {
    let mut writer = io::BufWriter::new(fs::File::create(path).unwrap());
    let lines = generate(&mut writer, target_bytes, seed).unwrap();
    writer.flush().unwrap();
    lines
}

pub fn parse_lines(contents: &str) -> Vec<Record> {
    contents
        .lines()
        .filter(|line| !Record::is_blank(line))
        .map(|line| Record::parse(line).unwrap())
        .collect()
}

/// Inserts blank and whitespace-only lines at random positions.
pub fn sprinkle_blank_lines(contents: &str, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let blanks = ["", " ", "\t", "   \t "];
    let mut result = String::new();

    for line in contents.lines() {
        if rng.gen_bool(0.2) {
            result.push_str(blanks.choose(&mut rng).expect("blanks are not empty"));
            result.push('\n');
        }
        result.push_str(line);
        result.push('\n');
    }
    result.push('\n');

    return result;
}

pub fn leftover_run_dirs(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(RUN_DIR_PREFIX))
        .collect()
}
