//! Logging setup for both the UI process and the model-host worker.
//!
//! Everything goes to a timestamped file under `logs/` and to stderr.
//! Stdout is never used: in worker mode it carries the JSON Lines protocol.

use chrono::Local;
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

const LOG_DIR: &str = "logs";

/// Parse a level name, falling back to `Info` for anything unrecognized.
pub fn parse_level(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::Info)
}

/// Install the global logger. `role` prefixes the log file name.
pub fn setup_logging(level: &str, role: &str) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(LOG_DIR)?;
    let timestamp = Local::now().format("%Y-%m-%d-%H_%M").to_string();
    let log_path = format!("{LOG_DIR}/{role}-{timestamp}.log");

    let file_appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}{n}",
        )))
        .build(log_path)?;

    let stderr_appender = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("[{l}] [{M}] {m}{n}")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .appender(Appender::builder().build("stderr", Box::new(stderr_appender)))
        .build(
            Root::builder()
                .appender("file")
                .appender("stderr")
                .build(parse_level(level)),
        )?;

    log4rs::init_config(config)?;

    Ok(())
}
