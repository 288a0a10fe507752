mod cli;
mod commands;

use clap::Parser;

use cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Create(args) => commands::create::execute(args, &cli.global),
        Command::Start(args) => commands::start::execute(args, &cli.global),
        Command::Run(args) => commands::run::execute(args, &cli.global),
        Command::Stop(args) => commands::stop::execute(args, &cli.global),
        Command::Rm(args) => commands::rm::execute(args, &cli.global),
        Command::Ps(args) => commands::ps::execute(args, &cli.global),
        Command::Logs(args) => commands::logs::execute(args, &cli.global),
        Command::Exec(args) => commands::exec::execute(args, &cli.global),
        Command::Images(command) => commands::images::execute(command, &cli.global),
        Command::Pods(args) => commands::pods::execute(args, &cli.global),
        Command::Serve(args) => commands::serve::execute(args, &cli.global).await,
        Command::Info(args) => commands::info::execute(args, &cli.global),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
