use clap::Parser;

use paintcore::cli::{self, CliArgs};
use paintcore::logger;

fn main() -> std::process::ExitCode {
    let args = CliArgs::parse();

    // Session log (overwrites the previous session's log)
    let path = args.log_file.clone().unwrap_or_else(logger::default_log_path);
    let level = if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if let Err(e) = logger::init(&path, level) {
        eprintln!("warning: could not open log file '{}': {}", path.display(), e);
    }

    cli::run(args)
}
