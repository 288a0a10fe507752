use clap::Args;
use vessel_shared::cri;

use crate::cli::{GlobalFlags, ensure_default_sandbox};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Container name.
    #[arg(long)]
    pub name: Option<String>,

    /// Working directory inside the container.
    #[arg(long, short = 'w')]
    pub workdir: Option<String>,

    /// Environment variables (KEY=VALUE), repeatable.
    #[arg(long, short = 'e')]
    pub env: Vec<String>,

    /// Labels (KEY=VALUE), repeatable.
    #[arg(long, short = 'l')]
    pub label: Vec<String>,

    /// Image reference.
    pub image: String,

    /// Command and arguments.
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    pub command: Vec<String>,
}

pub fn execute(args: CreateArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let sandbox_id = ensure_default_sandbox(&runtime)?;
    let config = build_config(&args)?;
    let id = runtime.create_container(&sandbox_id, config)?;
    println!("{}", id);
    Ok(())
}

pub(crate) fn build_config(args: &CreateArgs) -> anyhow::Result<cri::ContainerConfig> {
    let mut envs = Vec::new();
    for pair in &args.env {
        let (key, value) = split_pair(pair)
            .ok_or_else(|| anyhow::anyhow!("invalid --env value (want KEY=VALUE): {}", pair))?;
        envs.push(cri::KeyValue { key, value });
    }

    let mut labels = std::collections::HashMap::new();
    for pair in &args.label {
        let (key, value) = split_pair(pair)
            .ok_or_else(|| anyhow::anyhow!("invalid --label value (want KEY=VALUE): {}", pair))?;
        labels.insert(key, value);
    }

    Ok(cri::ContainerConfig {
        metadata: cri::ContainerMetadata {
            name: args
                .name
                .clone()
                .unwrap_or_else(|| args.command[0].replace('/', "-")),
            attempt: 0,
        },
        image: cri::ImageSpec {
            image: args.image.clone(),
        },
        command: vec![args.command[0].clone()],
        args: args.command[1..].to_vec(),
        working_dir: args.workdir.clone().unwrap_or_default(),
        envs,
        labels,
        ..Default::default()
    })
}

fn split_pair(pair: &str) -> Option<(String, String)> {
    pair.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
}
