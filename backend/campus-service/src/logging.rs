use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Install the global subscriber. `RUST_LOG` overrides [`DEFAULT_FILTER`];
/// `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = fmt().with_env_filter(env_filter).with_target(false);

    if json_output(std::env::var("LOG_FORMAT").ok().as_deref()) {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn json_output(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.trim().eq_ignore_ascii_case("json"))
}
