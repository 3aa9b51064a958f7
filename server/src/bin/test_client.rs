use bincode::{deserialize, serialize};
use clap::Parser;
use log::{debug, info, warn};
use server::network::MAX_DATAGRAM;
use shared::path::guide_step;
use shared::{Grid, Packet, PlayerId, Position, Role, TileKind, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, timeout};

/// Scripted walker that joins a lobby and heads for the exit
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,
    /// Lobby to join
    #[clap(short, long, default_value = "BOT")]
    lobby: String,
    /// Display name
    #[clap(short, long, default_value = "bot")]
    name: String,
    /// Send a start request after joining
    #[clap(long)]
    start: bool,
    /// Milliseconds between steps
    #[clap(long, default_value = "300")]
    step_ms: u64,
}

/// What the bot believes about its own round
#[derive(Default)]
struct Walker {
    maze: Option<Grid>,
    role: Option<Role>,
    position: Position,
    keys: u32,
}

impl Walker {
    fn apply(&mut self, me: PlayerId, packet: Packet) -> bool {
        match packet {
            Packet::GameStarted { session } => {
                info!("Level {} started, {} lives", session.level, session.lives);
                self.role = session.players.get(&me).map(|p| p.role);
                self.maze = session.maze;
                self.position = Position::ORIGIN;
                self.keys = 0;
            }
            Packet::MazeUpdate { maze } => self.maze = Some(maze),
            Packet::PlayerMoved { id, x, y, keys } if id == me => {
                self.position = Position::new(x, y);
                self.keys = keys;
            }
            Packet::KeyCollected { player_id, keys } | Packet::DoorOpened { player_id, keys }
                if player_id == me =>
            {
                self.keys = keys
            }
            Packet::LivesUpdate { lives } => info!("Lives left: {}", lives),
            Packet::WallMoveAlert => info!("Walls shifted"),
            Packet::GameOver { reason } => {
                info!("Game over: {:?}", reason);
                return false;
            }
            Packet::StartFailed { reason } => {
                warn!("Start failed: {}", reason);
                return false;
            }
            other => debug!("Received {:?}", other),
        }
        true
    }

    /// Next intent to send, if this bot is walking and has somewhere to go
    fn next_intent(&mut self, lobby_id: &str) -> Option<Packet> {
        if self.role != Some(Role::Walker) {
            return None;
        }
        let maze = self.maze.as_ref()?;
        let next = guide_step(maze, self.position, self.keys)?;
        self.position = next;

        let (x, y) = (next.x as i32, next.y as i32);
        let lobby_id = lobby_id.to_string();
        Some(if maze.kind(next) == TileKind::Exit {
            Packet::PlayerOnExit { lobby_id, x, y }
        } else {
            Packet::Move { lobby_id, x, y }
        })
    }
}

async fn send(socket: &UdpSocket, server: SocketAddr, packet: &Packet) -> std::io::Result<()> {
    let data = serialize(packet).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    socket.send_to(&data, server).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let args = Args::parse();

    // Create local socket
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    info!("Client socket bound to {}", socket.local_addr()?);

    send(
        &socket,
        args.server,
        &Packet::Connect {
            client_version: PROTOCOL_VERSION,
        },
    )
    .await?;

    // Buffer large enough for a full session snapshot
    let mut buf = vec![0u8; MAX_DATAGRAM];

    let (len, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf)).await??;
    let me = match deserialize::<Packet>(&buf[..len])? {
        Packet::Connected { client_id } => client_id,
        other => return Err(format!("expected Connected, got {:?}", other).into()),
    };
    info!("Connection accepted with client ID: {}", me);

    send(
        &socket,
        args.server,
        &Packet::JoinGame {
            lobby_id: args.lobby.clone(),
            player_name: args.name.clone(),
        },
    )
    .await?;
    if args.start {
        send(
            &socket,
            args.server,
            &Packet::StartGame {
                lobby_id: args.lobby.clone(),
            },
        )
        .await?;
    }

    let mut walker = Walker::default();
    let mut heartbeat = interval(Duration::from_secs(1));
    let mut step = interval(Duration::from_millis(args.step_ms.max(1)));

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, _) = received?;
                match deserialize::<Packet>(&buf[..len]) {
                    Ok(packet) => {
                        if !walker.apply(me, packet) {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to deserialize packet: {}", e),
                }
            }
            _ = heartbeat.tick() => {
                send(&socket, args.server, &Packet::Heartbeat).await?;
            }
            _ = step.tick() => {
                if let Some(intent) = walker.next_intent(&args.lobby) {
                    send(&socket, args.server, &intent).await?;
                }
            }
        }
    }

    send(&socket, args.server, &Packet::Disconnect).await?;
    info!("Test client finished");
    Ok(())
}
