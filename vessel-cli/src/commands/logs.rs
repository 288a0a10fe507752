use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Byte offset to start from.
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Keep tailing until interrupted.
    #[arg(long, short = 'f')]
    pub follow: bool,

    /// Container ID.
    pub target: String,
}

const CHUNK: usize = 64 * 1024;

pub fn execute(args: LogsArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;

    let mut offset = args.offset;
    loop {
        let (chunk, next) = runtime.read_log(&args.target, offset, CHUNK)?;
        if !chunk.is_empty() {
            print!("{}", String::from_utf8_lossy(&chunk));
            offset = next;
            continue;
        }
        if !args.follow {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    Ok(())
}
