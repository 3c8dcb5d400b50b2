//! NimbusKV command-line client.
//!
//! Sends one command and prints the decoded response.

use nimbuskv::client::Client;
use nimbuskv::config::{CliAction, ClientConfig};

fn print_help() {
    println!(
        r#"
nimbuskv-cli - send one command to a NimbusKV server

USAGE:
    nimbuskv-cli [OPTIONS] <COMMAND> [ARGS...]

OPTIONS:
    -h, --host <HOST>    Server host (default: 127.0.0.1)
    -p, --port <PORT>    Server port (default: {})
    -v, --version        Print version information
        --help           Print this help message

EXAMPLES:
    nimbuskv-cli set name nimbus 60000
    nimbuskv-cli get name
    nimbuskv-cli persist name
"#,
        nimbuskv::DEFAULT_PORT
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = match ClientConfig::from_args(std::env::args().skip(1))? {
        CliAction::Run(config) => config,
        CliAction::Help => {
            print_help();
            return Ok(());
        }
        CliAction::Version => {
            println!("nimbuskv-cli version {}", nimbuskv::VERSION);
            return Ok(());
        }
    };

    let mut client = Client::connect(config.address()).await?;
    let response = client.request(&config.command).await?;
    println!("{}", response);
    Ok(())
}
