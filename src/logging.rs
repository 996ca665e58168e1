use env_logger::{Builder, Env};
use log::LevelFilter;

fn level_for(verbose: bool, quiet: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Info
    } else if quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Warn
    }
}

/// `RUST_LOG`, when set, wins over the level picked from the flags.
pub fn init(verbose: bool, quiet: bool) {
    let _ = Builder::new()
        .filter_level(level_for(verbose, quiet))
        .parse_env(Env::default())
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}
