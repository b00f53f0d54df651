use std::path::PathBuf;

use clap::Parser;
use owo_colors::OwoColorize;

use gbfs_daemon::{observability, Config};

mod cli;

use cli::op::{Op, OpContext};
use cli::ops::{Cat, Check, Ls, Mount};

crate::command_enum! {
    (Mount, Mount),
    (Ls, Ls),
    (Cat, Cat),
    (Check, Check),
}

#[derive(Parser, Debug)]
#[command(name = "gbfs", version, about = "Read-only filesystem over bare git repositories")]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(long, global = true, env = "GBFS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

async fn run(cli: Cli) -> anyhow::Result<OpOutput> {
    let config = Config::load(cli.config.as_deref())?;
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let _guard = observability::init(level, config.log_dir.as_deref());

    let ctx = OpContext::new(config);
    Ok(cli.command.execute(&ctx).await?)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(output) => {
            // Text ending in a newline (file content from `cat`) goes out as is.
            let text = output.to_string();
            if text.is_empty() || text.ends_with('\n') {
                print!("{text}");
            } else {
                println!("{text}");
            }
        }
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}
