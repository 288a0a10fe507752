use std::time::Duration;

use clap::Args;
use vessel_shared::cri;

use crate::cli::{GlobalFlags, ensure_default_sandbox};
use crate::commands::create::{CreateArgs, build_config};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub create: CreateArgs,

    /// Remove the container after it exits.
    #[arg(long)]
    pub rm: bool,

    /// Do not wait for the container to exit.
    #[arg(long, short = 'd')]
    pub detach: bool,
}

pub fn execute(args: RunArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let sandbox_id = ensure_default_sandbox(&runtime)?;

    let config = build_config(&args.create)?;
    let id = runtime.create_container(&sandbox_id, config)?;
    runtime.start_container(&id)?;

    if args.detach {
        println!("{}", id);
        return Ok(());
    }

    // Wait for the reaper, then echo the captured log.
    let exit_code = loop {
        let status = runtime.container_status(&id)?;
        match status.state {
            cri::ContainerState::ContainerExited => break status.exit_code,
            cri::ContainerState::ContainerUnknown => break -1,
            _ => std::thread::sleep(Duration::from_millis(50)),
        }
    };

    // The pumps flush line-wise; the final lines can trail the reap by a
    // moment.
    let mut log = Vec::new();
    for _ in 0..50 {
        log = runtime.read_log(&id, 0, 1 << 20)?.0;
        if !log.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    print!("{}", String::from_utf8_lossy(&log));

    if args.rm {
        runtime.remove_container(&id, true)?;
    }
    if exit_code != 0 {
        anyhow::bail!("container exited with code {}", exit_code);
    }
    Ok(())
}
