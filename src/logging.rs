//! Logging setup.
//!
//! Log lines are routed through tracing targets named after the subsystems
//! (`orders`, `fills`, `prices`, `state`, `ks_websocket`, `signal_websocket`,
//! `runner`). The config's `logger_list` selects which targets emit at info
//! level; everything else stays at warn.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init(config: &LoggingConfig) {
    if !config.console_outs {
        return;
    }

    let filter = build_filter(&config.logger_list);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

fn build_filter(logger_list: &[String]) -> EnvFilter {
    if logger_list.is_empty() {
        return EnvFilter::new("info");
    }

    let mut directives = String::from("warn");
    for target in logger_list {
        directives.push_str(&format!(",{}=info", target));
    }
    EnvFilter::new(directives)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_enables_info_globally() {
        let filter = build_filter(&[]);
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_listed_targets_get_info_directives() {
        let filter = build_filter(&["orders".to_string(), "fills".to_string()]);
        let rendered = filter.to_string();
        assert!(rendered.contains("orders=info"));
        assert!(rendered.contains("fills=info"));
        assert!(rendered.contains("warn"));
    }
}
