use std::io::Write;

use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Seconds before the command is killed.
    #[arg(long, short = 't', default_value_t = 60)]
    pub timeout: i64,

    /// Container ID.
    pub target: String,

    /// Command and arguments.
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    pub command: Vec<String>,
}

pub fn execute(args: ExecArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let output = runtime.exec_sync(&args.target, &args.command, args.timeout)?;

    std::io::stdout().write_all(&output.stdout)?;
    std::io::stderr().write_all(&output.stderr)?;
    if output.exit_code != 0 {
        anyhow::bail!("command exited with code {}", output.exit_code);
    }
    Ok(())
}
