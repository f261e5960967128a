use anyhow::{bail, Result};
use harness::ModuleRunner;
use modules::gateway::Gateway;
use options::{LogFormat, MainOptions};
use structopt::StructOpt;
use tracing::info;

mod options;

#[tokio::main]
async fn main() -> Result<()> {
    let options = init();
    let runner = ModuleRunner::new(options.startup_timeout, options.shutdown_timeout);

    let reason = runner.run(Gateway::new(options.gateway)).await;

    if !reason.is_graceful() {
        bail!(reason);
    }

    Ok(())
}

fn init() -> MainOptions {
    let options = MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log.as_str());

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    info!("Bridge {}", env!("CARGO_PKG_VERSION"));

    options
}
