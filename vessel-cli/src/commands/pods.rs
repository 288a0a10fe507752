use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct PodsArgs {}

pub fn execute(_args: PodsArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let sandboxes = runtime.list_sandboxes(None);

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["POD ID", "NAME", "NAMESPACE", "ATTEMPT", "STATE"]);
    for sb in sandboxes {
        table.add_row([
            sb.id[..12.min(sb.id.len())].to_string(),
            sb.metadata.name,
            sb.metadata.namespace,
            sb.metadata.attempt.to_string(),
            format!("{:?}", sb.state),
        ]);
    }
    println!("{}", table);
    Ok(())
}
