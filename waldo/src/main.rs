use std::path::Path;

use anyhow::Result;
use aya::include_bytes_aligned;
use log::error;

use waldo::{WaldoEngine, settings::Settings, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::new()?;

    if let Err(e) = telemetry::init_metrics() {
        error!("Failed to initialize metrics: {:#}", e);
    }

    let engine = match WaldoEngine::new(
        program_name(),
        settings,
        include_bytes_aligned!(concat!(env!("OUT_DIR"), "/waldo")),
    ) {
        Ok(engine) => engine,
        Err(e) => {
            error!("{:#}", e);
            telemetry::shutdown_metrics();
            std::process::exit(1);
        }
    };

    let code = engine.run().await?;

    telemetry::shutdown_metrics();
    std::process::exit(code);
}

fn program_name() -> String {
    std::env::args()
        .next()
        .and_then(|arg0| {
            Path::new(&arg0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}
