//! Tracing subscriber setup.

use crate::CliResult;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Maps a `-v` count to the default log level.
///
/// `0` is `INFO`, `1` is `DEBUG` and anything higher is `TRACE`.
pub const fn verbosity_to_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Installs the global tracing subscriber.
///
/// If `filter` is `None`, the filter is read from `RUST_LOG` and falls back to the level implied
/// by `verbosity`.
pub fn init_tracing_subscriber(verbosity: u8, filter: Option<EnvFilter>) -> CliResult<()> {
    let filter = match filter {
        Some(filter) => filter,
        None => EnvFilter::builder()
            .with_default_directive(verbosity_to_level(verbosity).into())
            .from_env()?,
    };

    tracing_subscriber::registry().with(fmt::layer().with_target(true)).with(filter).try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, Level::INFO)]
    #[case(1, Level::DEBUG)]
    #[case(2, Level::TRACE)]
    #[case(7, Level::TRACE)]
    fn test_verbosity_to_level(#[case] verbosity: u8, #[case] expected: Level) {
        assert_eq!(verbosity_to_level(verbosity), expected);
    }
}
