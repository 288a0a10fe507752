use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: InfoArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let backend = runtime.backend();
    let version = runtime.version();
    let status = runtime.runtime_status();

    if args.json {
        let doc = serde_json::json!({
            "runtime_name": version.runtime_name,
            "runtime_version": version.runtime_version,
            "backend": backend.kind.label(),
            "platform": backend.caps.platform_label,
            "capabilities": backend.caps,
            "data_dir": runtime.options().data_dir,
            "conditions": status.conditions,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("runtime:  {} {}", version.runtime_name, version.runtime_version);
    println!("backend:  {} ({})", backend.kind, backend.caps.platform_label);
    println!(
        "caps:     process={} network={} filesystem={} limits={} true-containerization={}",
        backend.caps.process_isolation,
        backend.caps.network_isolation,
        backend.caps.filesystem_isolation,
        backend.caps.resource_limits,
        backend.caps.true_containerization,
    );
    println!("data dir: {}", runtime.options().data_dir.display());
    for condition in status.conditions {
        println!(
            "cond:     {}={} {}",
            condition.condition_type, condition.status, condition.message
        );
    }
    Ok(())
}
