//! Probe tool: connects to a commd server, runs the status exchange,
//! and prints the response transcript.

use clap::Parser;
use commd_client::{Client, ClientConfig};
use commd_protocol::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(name = "commd-probe", about = "Run a status exchange against a commd server")]
struct Args {
    /// Server host.
    #[arg(long, default_value = "localhost", env = "COMMD_HOST")]
    host: String,

    /// Server port.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "COMMD_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = ClientConfig::new(args.host, args.port);

    let client = Client::connect(&config).await?;
    let transcript = client.run_status_exchange().await?;

    for response in &transcript {
        println!("{:?} --> {}", response.cmd(), response.data().unwrap_or(""));
    }

    Ok(())
}
