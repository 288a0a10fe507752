use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Seconds to wait before force-killing.
    #[arg(long, short = 't', default_value_t = 10)]
    pub timeout: i64,

    /// Container ID(s) to stop.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub fn execute(args: StopArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;

    let mut errors = Vec::new();
    for target in args.targets {
        match runtime.stop_container(&target, args.timeout) {
            Ok(()) => println!("{}", target),
            Err(e) => {
                eprintln!("Error stopping container '{}': {}", target, e);
                errors.push(format!("{}: {}", target, e));
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!(
            "failed to stop {} container(s):\n  {}",
            errors.len(),
            errors.join("\n  ")
        );
    }
    Ok(())
}
