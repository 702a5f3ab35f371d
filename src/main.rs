// # RustyRing Node
//
// Entry point for one membership-service node. Parses the positional
// arguments, configures logging, starts the protocol tasks, and serves the
// HTTP control surface until quit.

use rusty_ring::config::NodeConfig;
use rusty_ring::control::ControlServer;
use rusty_ring::dns::FileDns;
use rusty_ring::membership::Node;
use rusty_ring::notify::HttpChangeSink;
use rusty_ring::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} <machine_id> <is_introducer> <port> [log_level]",
        program
    );
    eprintln!(
        "(Alt usage): {} <machine_id> <is_introducer> <port> <ping_rate_secs> <drop_threshold> <loss_rate>",
        program
    );
    std::process::exit(1);
}

fn init_logging(level: Option<&str>) {
    let directive = level
        .map(str::to_owned)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    let filter = match EnvFilter::try_new(&directive) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("invalid log filter {:?}: {}", directive, e);
            std::process::exit(3);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let program = args
        .first()
        .map(String::as_str)
        .unwrap_or("rusty-ring-node");

    if !matches!(args.len(), 4 | 5 | 7) {
        usage(program);
    }

    let machine_id: u32 = args[1].parse().unwrap_or_else(|_| usage(program));
    let introducer = args[2] == "true";
    let port: u16 = args[3].parse().unwrap_or_else(|_| usage(program));

    init_logging(if args.len() == 5 {
        Some(args[4].as_str())
    } else {
        None
    });

    let mut config = NodeConfig {
        machine_id,
        introducer,
        port,
        ..NodeConfig::default()
    }
    .with_env_overrides();

    if args.len() == 7 {
        let ping_rate_secs: u64 = args[4].parse().unwrap_or_else(|_| usage(program));
        config.ping_rate = Duration::from_secs(ping_rate_secs);
        config.drop_threshold = args[5].parse().unwrap_or_else(|_| usage(program));
        config.loss_rate = args[6].parse().unwrap_or_else(|_| usage(program));
    }

    info!(
        version = rusty_ring::VERSION,
        machine_id,
        introducer,
        port = config.port,
        control_port = config.control_port,
        "starting rusty-ring node"
    );

    let dns = Arc::new(FileDns::new(config.dns_path.clone()));
    let sink = Arc::new(HttpChangeSink::new(config.notify_url.clone()));
    let control_addr = format!("0.0.0.0:{}", config.control_port);

    let node = Arc::new(Node::new(config, dns, sink));
    node.start()?;

    let server = ControlServer::new(node);
    server.run(&control_addr).await?;

    info!("control surface stopped, node going down");
    Ok(())
}
