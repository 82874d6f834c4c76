mod airspace;
pub mod fixtures;
mod manager;

pub use airspace::TestAirspace;
pub use manager::TestManager;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Routes store logs to the test writer. `RUST_LOG` overrides the default
/// `warn` filter. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
