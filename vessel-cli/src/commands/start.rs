use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Container ID(s) to start.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub fn execute(args: StartArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;

    let mut errors = Vec::new();
    for target in args.targets {
        match runtime.start_container(&target) {
            Ok(()) => println!("{}", target),
            Err(e) => {
                eprintln!("Error starting container '{}': {}", target, e);
                errors.push(format!("{}: {}", target, e));
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!(
            "failed to start {} container(s):\n  {}",
            errors.len(),
            errors.join("\n  ")
        );
    }
    Ok(())
}
