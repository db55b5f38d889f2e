use env_logger::{Builder, Env};

/// Environment variable holding the log filter (`error`, `warn`, `info`, `debug`, ...).
pub const LOG_ENV: &str = "CHESS_LOG";

const DEFAULT_FILTER: &str = "info";

/// Install the process-wide logger. Safe to call more than once.
pub fn init() {
    let _ = Builder::from_env(Env::default().filter_or(LOG_ENV, DEFAULT_FILTER))
        .format_target(false)
        .try_init();
}
