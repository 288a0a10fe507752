use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port for the CRI endpoint on localhost.
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
}

pub async fn execute(args: ServeArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let mut options = global.options();
    options.cri_enabled = true;
    if let Some(port) = args.port {
        options.cri_port = port;
    }
    let port = options.cri_port;

    let runtime = vessel::VesselRuntime::new(options)?;
    tracing::info!(port, "starting CRI endpoint");

    tokio::select! {
        result = vessel::cri::serve(runtime, port) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    Ok(())
}
