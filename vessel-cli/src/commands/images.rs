use std::path::PathBuf;

use clap::{Args, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};

use crate::cli::GlobalFlags;

#[derive(Subcommand, Debug)]
pub enum ImagesCommand {
    /// List images.
    Ls(LsArgs),
    /// Import a root filesystem tarball as an image.
    Import(ImportArgs),
    /// Remove image(s).
    Rm(RmArgs),
    /// Add a tag to an existing image.
    Tag(TagArgs),
}

#[derive(Args, Debug)]
pub struct LsArgs {
    /// Substring filter on repository tags.
    #[arg(long)]
    pub filter: Option<String>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Path to a tar (optionally gzipped) archive of the root filesystem.
    pub tarball: PathBuf,

    /// Tag(s) for the imported image.
    #[arg(long, short = 't', required = true, num_args = 1..)]
    pub tag: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RmArgs {
    /// Image reference(s): tag or digest.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

#[derive(Args, Debug)]
pub struct TagArgs {
    /// Existing image reference.
    pub reference: String,
    /// New tag.
    pub tag: String,
}

pub fn execute(command: ImagesCommand, global: &GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    match command {
        ImagesCommand::Ls(args) => {
            let records = runtime.images().list(args.filter.as_deref());
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(["DIGEST", "TAGS", "SIZE", "CREATED"]);
            for record in records {
                table.add_row([
                    record.hex()[..12.min(record.hex().len())].to_string(),
                    record.repo_tags.join(", "),
                    format!("{}", record.size_bytes),
                    record.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                ]);
            }
            println!("{}", table);
            Ok(())
        }
        ImagesCommand::Import(args) => {
            let record = runtime.images().import(&args.tarball, args.tag)?;
            println!("{}", record.digest);
            Ok(())
        }
        ImagesCommand::Rm(args) => {
            let mut errors = Vec::new();
            for target in args.targets {
                match runtime.images().remove(&target) {
                    Ok(()) => println!("{}", target),
                    Err(e) => {
                        eprintln!("Error removing image '{}': {}", target, e);
                        errors.push(format!("{}: {}", target, e));
                    }
                }
            }
            if !errors.is_empty() {
                anyhow::bail!(
                    "failed to remove {} image(s):\n  {}",
                    errors.len(),
                    errors.join("\n  ")
                );
            }
            Ok(())
        }
        ImagesCommand::Tag(args) => {
            runtime.images().tag(&args.reference, &args.tag)?;
            Ok(())
        }
    }
}
