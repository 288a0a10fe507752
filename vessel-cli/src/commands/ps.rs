use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use vessel_shared::cri;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show containers in every state, not just running ones.
    #[arg(long, short = 'a')]
    pub all: bool,

    /// Only containers of this sandbox.
    #[arg(long)]
    pub pod: Option<String>,
}

pub fn execute(args: PsArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;

    let filter = cri::ContainerFilter {
        state: (!args.all).then_some(cri::ContainerState::ContainerRunning),
        pod_sandbox_id: args.pod,
        ..Default::default()
    };
    let containers = runtime.list_containers(Some(&filter));

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["CONTAINER ID", "IMAGE", "NAME", "STATE", "CREATED"]);
    for c in containers {
        table.add_row([
            c.id[..12.min(c.id.len())].to_string(),
            c.image.image,
            c.metadata.name,
            format!("{:?}", c.state),
            chrono::DateTime::from_timestamp_nanos(c.created_at)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ]);
    }
    println!("{}", table);
    Ok(())
}
