use anyhow::Result;
use clap::Parser;
use llm_oracle::{cfg::Network, node};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Off-chain oracle node for the on-chain LLM service")]
struct Args {
    /// Network to run against.
    #[arg(value_enum)]
    network: Network,
}

fn main() -> Result<()> {
    // A missing or unknown network always exits with 1, like every other
    // startup failure.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    std::process::exit(0)
                }
                _ => std::process::exit(1),
            }
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true)
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(node::run(args.network))
}
