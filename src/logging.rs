//! Structured logging setup
//! Initializes the tracing subscriber and provides field-masking helpers

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the global tracing subscriber.
///
/// Honors `RUST_LOG` when set; otherwise falls back to the configured level.
/// Safe to call more than once — later calls are no-ops.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init(),
        LogFormat::Plain => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };

    if result.is_ok() {
        tracing::info!(level = %config.level, format = ?config.format, "tracing initialized");
    }
}

/// Mask a payer address for logging: keep a recognizable prefix and suffix,
/// hide the middle.
pub fn mask_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}…{}", &address[..6], &address[address.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_long_addresses() {
        let masked = mask_address("0x1234567890abcdef1234567890abcdef12345678");
        assert!(masked.starts_with("0x1234"));
        assert!(masked.ends_with("5678"));
        assert!(masked.len() < 42);
    }

    #[test]
    fn leaves_short_strings_alone() {
        assert_eq!(mask_address("0xabc"), "0xabc");
    }
}
