use speechlink_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Filter directives from config: base level first, then per-target overrides.
fn directives(logging: Option<&LoggingConfig>, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        logging.and_then(|l| l.level.as_deref()).unwrap_or("info")
    };
    let mut parts = vec![level.to_string()];
    if let Some(l) = logging {
        parts.extend(l.filters.iter().filter(|f| !f.trim().is_empty()).cloned());
    }
    parts.join(",")
}

/// Initialize the global subscriber. `RUST_LOG` wins over config.
pub fn init(logging: Option<&LoggingConfig>, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(logging, verbose)));

    let writer = match logging.map(|l| l.output.as_str()) {
        Some("stdout") => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    match logging.map(|l| l.format.as_str()) {
        Some("json") => builder.json().init(),
        _ => builder.init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logging(level: Option<&str>, filters: &[&str]) -> LoggingConfig {
        LoggingConfig {
            format: "plain".into(),
            level: level.map(String::from),
            filters: filters.iter().map(|f| f.to_string()).collect(),
            output: "stderr".into(),
        }
    }

    #[test]
    fn test_default_directives() {
        assert_eq!(directives(None, false), "info");
        assert_eq!(directives(None, true), "debug");
    }

    #[test]
    fn test_config_level_and_filters() {
        let cfg = logging(Some("warn"), &["speechlink_media=trace", " "]);
        assert_eq!(directives(Some(&cfg), false), "warn,speechlink_media=trace");
        assert_eq!(directives(Some(&cfg), true), "debug,speechlink_media=trace");
    }
}
