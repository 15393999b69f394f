mod alert;
mod host;
mod lease;
mod link;
mod metrics;
mod remote;
mod serial;
mod settings;
mod store;
mod tick;

use clap::{Parser, ValueEnum};
use tracing::error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Mode {
    /// Own the serial device and answer telemetry frames until stopped
    TelemetryLink,
    /// Run one control decision against the shared store and exit
    ControlEngineTick,
    /// Emit one metrics snapshot and exit
    MetricsFlush,
}

#[derive(Parser, Debug)]
#[command(name = "solar-controller", version, about = "Solar boiler controller")]
struct Cli {
    #[arg(value_enum)]
    mode: Mode,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    host::init_tracing();

    if let Err(err) = host::run(cli.mode).await {
        error!(mode = ?cli.mode, "{err:#}");
    }
}
