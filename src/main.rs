use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use transport_rs::{run, Config};

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let cfg = Config::new()?;
    run(cfg)
}
