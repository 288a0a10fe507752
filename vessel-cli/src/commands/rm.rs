use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct RmArgs {
    /// Stop a running container before removing it.
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Container ID(s) to remove.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub fn execute(args: RmArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;

    let mut errors = Vec::new();
    for target in args.targets {
        match runtime.remove_container(&target, args.force) {
            Ok(()) => println!("{}", target),
            Err(e) => {
                eprintln!("Error removing container '{}': {}", target, e);
                errors.push(format!("{}: {}", target, e));
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!(
            "failed to remove {} container(s):\n  {}",
            errors.len(),
            errors.join("\n  ")
        );
    }
    Ok(())
}
