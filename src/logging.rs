use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global stderr subscriber.
///
/// `SQLDIFF_LOG` takes an `EnvFilter` directive and wins over `verbosity`,
/// which otherwise maps 0/1/2+ to `warn`/`info`/`debug` for this crate.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_env("SQLDIFF_LOG").unwrap_or_else(|_| default_filter(verbosity));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

fn default_filter(verbosity: u8) -> EnvFilter {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    EnvFilter::new(format!("sqldiff={level}"))
}
