// agent-dispatch/crates/agent-dispatch/src/main.rs

#[cfg(feature = "cli")]
use agent_dispatch::{config::Config, run_server};
#[cfg(feature = "cli")]
use clap::Parser;

/// Multi-agent chat service: intent routing, capability dispatch and
/// sandboxed analytics behind an SSE chat API.
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "agent-dispatch", version, about)]
struct Args {
    /// Override API_HOST
    #[arg(long)]
    host: Option<String>,

    /// Override API_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Override LLM_BASE_URL
    #[arg(long)]
    llm_base_url: Option<String>,

    /// Override UPLOAD_DIR
    #[arg(long)]
    upload_dir: Option<std::path::PathBuf>,

    /// Override DATA_DIR
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg = Config::from_env()?;

    if let Some(host) = args.host {
        cfg.api_host = host;
    }
    if let Some(port) = args.port {
        cfg.api_port = port;
    }
    if let Some(url) = args.llm_base_url {
        cfg.llm_base_url = url;
    }
    if let Some(dir) = args.upload_dir {
        cfg.upload_dir = dir;
    }
    if let Some(dir) = args.data_dir {
        cfg.data_dir = dir;
    }

    run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
