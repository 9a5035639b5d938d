use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Installs the fmt subscriber, filtered by `RUST_LOG` or `info` when unset.
pub fn init() {
    let filter = filter_from(std::env::var("RUST_LOG").ok().as_deref());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_info_without_rust_log() {
        assert_eq!(filter_from(None).to_string(), "info");
        assert_eq!(filter_from(Some("")).to_string(), "info");
    }

    #[test]
    fn rust_log_directives_win() {
        assert_eq!(filter_from(Some("rtsp_relay=debug")).to_string(), "rtsp_relay=debug");
    }
}
