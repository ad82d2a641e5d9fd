//! Tracing setup for the pescar binary.

use tracing_subscriber::{fmt, EnvFilter};

use crate::{PescarError, PescarResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const DEFAULT_LOG_FILTER: &str = "pescar=info";

const VERBOSE_LOG_FILTER: &str = "pescar=debug";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the defaults. Without it pescar logs at `info`, or `debug` when
/// `verbose` is set. `json` switches the output to one JSON object per line.
pub fn init_tracing(json: bool, verbose: bool) -> PescarResult<()> {
    let filter = log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), verbose);

    let builder = fmt()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_env_filter(filter);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| {
        PescarError::custom(anyhow::anyhow!("failed to install tracing subscriber: {e}"))
    })
}

fn log_filter(directives: Option<&str>, verbose: bool) -> EnvFilter {
    let default = if verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };

    match directives {
        Some(directives) if !directives.trim().is_empty() => {
            EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(default))
        }
        _ => EnvFilter::new(default),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_defaults() {
        assert_eq!(log_filter(None, false).to_string(), "pescar=info");
        assert_eq!(log_filter(Some("  "), true).to_string(), "pescar=debug");

        let custom = log_filter(Some("pescar=trace,kube=warn"), false).to_string();
        assert!(custom.contains("pescar=trace"));
        assert!(custom.contains("kube=warn"));
    }
}
