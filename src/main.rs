use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_line_sort::buffer::mem::MemoryLimitedBufferBuilder;
use ext_line_sort::{ChunkBufferBuilder, ExternalSorterBuilder, LimitedBufferBuilder};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let input = path::Path::new(arg_parser.value_of("input").expect("value has default"));
    let output = path::Path::new(arg_parser.value_of("output").expect("value has default"));
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let chunk_size: usize = arg_parser.value_of_t_or_exit("chunk_size");
    let batch_size: usize = arg_parser.value_of_t_or_exit("batch_size");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let mut sorter_builder = ExternalSorterBuilder::new().with_batch_size(batch_size);
    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let result = match arg_parser.value_of("chunk_memory") {
        Some(chunk_memory) => {
            let limit = chunk_memory.parse::<ByteSize>().expect("value is pre-validated").as_u64();
            log::info!("chunks limited by memory ({})", ByteSize(limit));
            run_sort(sorter_builder.with_buffer(MemoryLimitedBufferBuilder::new(limit)), input, output)
        }
        None => {
            log::info!("chunks limited by records count ({})", chunk_size);
            run_sort(sorter_builder.with_buffer(LimitedBufferBuilder::new(chunk_size, true)), input, output)
        }
    };

    if let Err(err) = result {
        log::error!("{}", err);
        process::exit(1);
    }
}

fn run_sort<B: ChunkBufferBuilder>(
    sorter_builder: ExternalSorterBuilder<B>,
    input: &path::Path,
    output: &path::Path,
) -> Result<(), String> {
    let sorter = sorter_builder
        .build()
        .map_err(|err| format!("sorter initialization error: {}", err))?;

    log::info!("sorting {} into {}", input.display(), output.display());
    sorter
        .sort_file(input, output)
        .map_err(|err| format!("data sorting error: {}", err))?;

    return Ok(());
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-line-sort")
        .about("external sorter of \"<number>. <text>\" lines, by text then by number")
        .arg(
            clap::Arg::new("input")
                .help("file to be sorted")
                .index(1)
                .default_value("testfile.txt"),
        )
        .arg(
            clap::Arg::new("output")
                .help("result file")
                .index(2)
                .default_value("sortedfile.txt"),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel chunk sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary runs")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("maximum number of records in a chunk")
                .takes_value(true)
                .default_value("1000000")
                .validator(|v| match v.parse::<usize>() {
                    Ok(0) => Err("Chunk size must be positive".to_string()),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Chunk size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("chunk_memory")
                .short('m')
                .long("chunk-memory")
                .help("memory limit of a chunk, overrides --chunk-size (e.g. 512MB)")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Chunk memory format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("batch_size")
                .short('b')
                .long("batch-size")
                .help("number of merged records handed to the output writer at once")
                .takes_value(true)
                .default_value("10000")
                .validator(|v| match v.parse::<usize>() {
                    Ok(0) => Err("Batch size must be positive".to_string()),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Batch size format incorrect: {}", err)),
                }),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
