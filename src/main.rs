use clap::{Parser, Subcommand};
use color_eyre::eyre::{self, WrapErr};
use console::style;
use memtrace::{
    allocation::AllocationTables, database, Config, DeviceMemory, Event, Header,
    MemoryTraceGenerator, StreamReader, TraceDatabase, TraceGenerator,
};
use std::path::PathBuf;
use trace_model::{ExecutableKernel, TraceEvent};

#[derive(Parser, Debug, Clone)]
pub struct HeaderOptions {
    #[clap(help = "header file")]
    pub path: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct EventsOptions {
    #[clap(help = "trace file")]
    pub path: PathBuf,
    #[clap(long = "limit", help = "maximum number of events to print")]
    pub limit: Option<usize>,
}

#[derive(Parser, Debug, Clone)]
pub struct ReplayOptions {
    #[clap(help = "recorded trace events (msgpack)")]
    pub events: PathBuf,
    #[clap(long = "kernel", help = "launched kernel (json)")]
    pub kernel: PathBuf,
    #[clap(long = "allocations", help = "allocation tables (json)")]
    pub allocations: Option<PathBuf>,
    #[clap(long = "header-only", help = "do not record events")]
    pub header_only: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct DatabaseOptions {
    #[clap(long = "kernel", help = "only list traces of this kernel")]
    pub kernel: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print a trace header.
    Header(HeaderOptions),
    /// Print the events of a trace.
    Events(EventsOptions),
    /// Replay recorded trace events through the memory trace generator.
    Replay(ReplayOptions),
    /// List the traces in the database.
    Database(DatabaseOptions),
}

#[derive(Parser, Debug, Clone)]
#[clap(
    version = option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
    about = "inspect and replay memory traces of emulated kernels",
)]
pub struct Options {
    #[clap(long = "config", help = "configuration file (yaml)")]
    pub config: Option<PathBuf>,
    #[clap(long = "database", help = "trace database")]
    pub database: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

fn load_config(options: &Options) -> eyre::Result<Config> {
    let mut config = match &options.config {
        Some(path) => {
            let reader = utils::fs::open_readable(path)?;
            Config::from_reader(reader)
                .wrap_err_with(|| format!("failed to parse config {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(database) = &options.database {
        config.database = database.clone();
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> eyre::Result<()> {
    let mut stdout = std::io::stdout().lock();
    database::write_json(&mut stdout, value)?;
    println!();
    Ok(())
}

fn replay(mut config: Config, options: &ReplayOptions) -> eyre::Result<Header> {
    config.header_only |= options.header_only;

    let reader = utils::fs::open_readable(&options.kernel)?;
    let kernel: ExecutableKernel = serde_json::from_reader(reader)
        .wrap_err_with(|| format!("failed to parse kernel {}", options.kernel.display()))?;
    let memory = match &options.allocations {
        Some(path) => {
            let reader = utils::fs::open_readable(path)?;
            let tables: AllocationTables = serde_json::from_reader(reader)
                .wrap_err_with(|| format!("failed to parse allocations {}", path.display()))?;
            DeviceMemory::try_from(tables)?
        }
        None => DeviceMemory::default(),
    };

    let mut generator = MemoryTraceGenerator::new(config);
    generator.initialize(&kernel, &memory)?;
    for event in StreamReader::<_, TraceEvent>::open(&options.events)? {
        let event = event?;
        generator.event(&event)?;
        generator.post_event(&event)?;
    }
    if let Some(entry) = generator.entry() {
        eprintln!("writing trace to {}", style(entry.path.display()).cyan());
    }
    generator.finish()?;
    Ok(generator.header().clone())
}

fn main() -> eyre::Result<()> {
    env_logger::init();
    color_eyre::install()?;

    let options = Options::parse();
    let config = load_config(&options)?;

    match &options.command {
        Command::Header(HeaderOptions { path }) => {
            let header: Header = memtrace::stream::read_value(path)
                .wrap_err_with(|| format!("failed to read header {}", path.display()))?;
            print_json(&header)?;
        }
        Command::Events(EventsOptions { path, limit }) => {
            let events = StreamReader::<_, Event>::open(path)?;
            let mut count = 0;
            for event in events.take(limit.unwrap_or(usize::MAX)) {
                println!("{}", event?);
                count += 1;
            }
            eprintln!("{}", style(format!("{count} events")).bold());
        }
        Command::Replay(replay_options) => {
            let start = std::time::Instant::now();
            let header = replay(config, replay_options)?;
            print_json(&header)?;
            eprintln!("replayed in {:?}", start.elapsed());
        }
        Command::Database(DatabaseOptions { kernel }) => {
            let database = TraceDatabase::open(&config.database)?;
            let entries: Vec<_> = match kernel {
                Some(kernel) => database.find(kernel).collect(),
                None => database.entries.iter().collect(),
            };
            for entry in &entries {
                println!("{entry}");
            }
            if entries.is_empty() {
                eprintln!(
                    "{}",
                    style(format!("no traces in {}", config.database.display())).yellow()
                );
            }
        }
    }
    Ok(())
}
