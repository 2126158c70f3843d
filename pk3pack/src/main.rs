use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use pack_core::cancel::CancelToken;
use pack_core::config::OptionsFile;
use pack_core::error::PackError;
use pack_core::logging::{self, LogLevel};
use pack_core::map::Map;
use pack_core::pipeline::{self, PackOptions};
use pack_core::source::{self, SourceFilters};

const EXIT_SUCCESS: i32 = 0;
const EXIT_USAGE: i32 = 2;
const EXIT_ENVIRONMENT: i32 = 10;
const EXIT_INVALID_DATA: i32 = 11;
const EXIT_MISSING_ASSET: i32 = 12;
const EXIT_IO: i32 = 13;
const EXIT_CANCELED: i32 = 20;
const EXIT_INTERNAL: i32 = 70;

#[derive(Parser)]
#[command(
    name = "pk3pack",
    version,
    about = "Packages an Enemy Territory map and its assets into a pk3"
)]
struct Cli {
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Pack(PackArgs),
    Sources(SourcesArgs),
}

#[derive(Args)]
struct PackArgs {
    #[arg(value_name = "MAP")]
    map_file: PathBuf,

    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    use_shaderlist: bool,

    #[arg(long)]
    include_source: bool,

    #[arg(long)]
    require_all_assets: bool,

    #[arg(long)]
    load_pk3s: bool,

    #[arg(long, value_name = "NAME")]
    exclude_source: Vec<String>,

    #[arg(long, value_name = "NAME")]
    ignore_source: Vec<String>,

    #[arg(long, value_name = "FILE")]
    options: Option<PathBuf>,
}

#[derive(Args)]
struct SourcesArgs {
    #[arg(value_name = "MAP")]
    map_file: PathBuf,

    #[arg(long)]
    load_pk3s: bool,

    #[arg(long, value_name = "NAME")]
    exclude_source: Vec<String>,

    #[arg(long, value_name = "NAME")]
    ignore_source: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        logging::set_max_level(LogLevel::Debug);
    }
    let exit_code = match cli.command {
        Commands::Pack(args) => run_pack(args),
        Commands::Sources(args) => run_sources(args),
    };
    process::exit(exit_code);
}

fn run_pack(args: PackArgs) -> i32 {
    let mut options = PackOptions::new(args.map_file.clone());
    if let Some(path) = &args.options {
        match OptionsFile::load(path) {
            Ok(file) => file.apply(&mut options),
            Err(err) => {
                eprintln!("{}", err);
                return EXIT_USAGE;
            }
        }
    }
    // Explicit flags win over the options file.
    if let Some(output) = args.output {
        options.output = Some(output);
    }
    options.overwrite |= args.overwrite;
    options.dry_run |= args.dry_run;
    options.use_shaderlist |= args.use_shaderlist;
    options.include_source |= args.include_source;
    options.require_all_assets |= args.require_all_assets;
    options.load_pk3s |= args.load_pk3s;
    for item in args.exclude_source {
        if !options.exclude_sources.contains(&item) {
            options.exclude_sources.push(item);
        }
    }
    for item in args.ignore_source {
        if !options.ignore_sources.contains(&item) {
            options.ignore_sources.push(item);
        }
    }

    let cancel = CancelToken::new();
    match pipeline::run(&options, &cancel) {
        Ok(summary) => {
            match &summary.output {
                Some(path) => println!(
                    "wrote {} ({} entries, {} bytes, {} warnings)",
                    path.display(),
                    summary.entries.len(),
                    summary.bytes_written,
                    summary.warnings
                ),
                None => println!(
                    "dry run ok ({} entries, {} warnings)",
                    summary.entries.len(),
                    summary.warnings
                ),
            }
            EXIT_SUCCESS
        }
        Err(err) => report_error(err),
    }
}

fn run_sources(args: SourcesArgs) -> i32 {
    let map = match Map::locate(&args.map_file) {
        Ok(map) => map,
        Err(err) => return report_error(err),
    };
    let filters = SourceFilters {
        load_pk3s: args.load_pk3s,
        exclude: args.exclude_source,
        ignore: args.ignore_source,
    };
    match source::enumerate_sources(&map, &filters) {
        Ok(sources) => {
            for entry in &sources {
                println!("{:>3} {}", entry.order, entry.describe());
            }
            EXIT_SUCCESS
        }
        Err(err) => report_error(err),
    }
}

fn report_error(err: PackError) -> i32 {
    if err.is_canceled() {
        eprintln!("canceled");
        return EXIT_CANCELED;
    }
    eprintln!("{}", err);
    match err {
        PackError::Environment(_) => EXIT_ENVIRONMENT,
        PackError::InvalidData { .. } => EXIT_INVALID_DATA,
        PackError::MissingAsset(_) => EXIT_MISSING_ASSET,
        PackError::Io(_) | PackError::Archive(_) => EXIT_IO,
        PackError::Canceled => EXIT_CANCELED,
        PackError::Internal(_) => EXIT_INTERNAL,
    }
}
