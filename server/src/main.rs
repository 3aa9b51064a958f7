use clap::Parser;
use log::info;
use server::network::Server;
use server::session::SessionConfig;
use std::time::Duration;

/// Authoritative session server for the blindfold maze game
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Maze width in cells
    #[clap(long, default_value = "15", value_parser = clap::value_parser!(u16).range(2..=64))]
    width: u16,
    /// Maze height in cells
    #[clap(long, default_value = "15", value_parser = clap::value_parser!(u16).range(2..=64))]
    height: u16,
    /// Seconds per round before the lobby loses
    #[clap(short, long, default_value = "120")]
    time_limit: u64,
    /// Seconds between wall shifts
    #[clap(long, default_value = "15")]
    wall_shift: u64,
    /// Maximum number of connected clients
    #[clap(short, long, default_value = "64")]
    max_clients: usize,
    /// Base seed for reproducible mazes
    #[clap(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    // Parse command line arguments
    let args = Args::parse();

    let config = SessionConfig {
        width: usize::from(args.width),
        height: usize::from(args.height),
        time_limit_secs: args.time_limit,
        wall_shift_interval: Duration::from_secs(args.wall_shift.max(1)),
        seed: args.seed,
        ..SessionConfig::default()
    };
    info!(
        "Mazes {}x{}, {}s rounds, walls shift every {:?}",
        config.width, config.height, config.time_limit_secs, config.wall_shift_interval
    );

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, args.max_clients, config).await?;
    let handle = server.handle();

    // Handle shutdown gracefully
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = handle.send(server::network::ServerMessage::Shutdown);
        }
    });

    server.run().await
}
