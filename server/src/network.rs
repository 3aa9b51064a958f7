//! Server network layer handling UDP communications and the session event loop

use crate::client_manager::{ClientManager, CLIENT_TIMEOUT};
use crate::registry::{Delivery, SessionRegistry};
use crate::session::SessionConfig;
use crate::timers::TimerEvent;
use crate::utils::get_timestamp;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PlayerId, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Largest UDP payload; voice signals carry full SDP offers
pub const MAX_DATAGRAM: usize = 65536;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: PlayerId },
    Shutdown,
}

/// Messages sent from the server loop to the network sender
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    Deliver {
        packet: Packet,
        recipients: Vec<PlayerId>,
    },
}

/// Main server coordinating networking and lobby sessions
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    registry: SessionRegistry,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
    timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
}

impl Server {
    pub async fn new(
        addr: &str,
        max_clients: usize,
        config: SessionConfig,
    ) -> Result<Self, BoxError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            registry: SessionRegistry::new(config, Some(timer_tx)),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
            timer_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender for injecting messages, e.g. [`ServerMessage::Shutdown`]
    pub fn handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::Deliver { packet, recipients } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_addrs(&recipients)
                        };

                        for (client_id, addr) in client_addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(CLIENT_TIMEOUT)
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), BoxError> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        for Delivery { packet, recipients } in deliveries {
            if let Err(e) = self.game_tx.send(GameMessage::Deliver { packet, recipients }) {
                error!("Failed to queue delivery: {}", e);
            }
        }
    }

    /// Drops a client from its lobby, telling the rest of the lobby
    fn drop_from_lobby(&mut self, client_id: PlayerId) {
        let deliveries = self.registry.leave(client_id, get_timestamp());
        self.deliver(deliveries);
    }

    /// Processes one incoming packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect { client_version } = packet {
            self.handle_connect(client_version, addr).await;
            return;
        }

        // Any packet counts as a sign of life
        let client_id = {
            let mut clients = self.clients.write().await;
            clients.touch_by_addr(addr)
        };
        let Some(client_id) = client_id else {
            debug!("Ignoring packet from unknown address {}", addr);
            return;
        };

        match packet {
            Packet::Heartbeat => {}

            Packet::Disconnect => {
                {
                    let mut clients = self.clients.write().await;
                    clients.remove_client(&client_id);
                }
                self.drop_from_lobby(client_id);
            }

            Packet::VoiceSignal { to, signal, .. } => {
                let target = {
                    let clients = self.clients.read().await;
                    clients.get_addr(to)
                };
                match target {
                    Some(target) => self.send_packet(
                        Packet::IncomingVoiceSignal {
                            from: client_id,
                            signal,
                        },
                        target,
                    ),
                    None => debug!("Voice signal from {} to unknown client {}", client_id, to),
                }
            }

            intent if intent.lobby_id().is_some() => {
                match self.registry.handle_intent(client_id, intent, get_timestamp()) {
                    Ok(deliveries) => self.deliver(deliveries),
                    Err(e) => debug!("Dropped intent from client {}: {}", client_id, e),
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            self.send_packet(
                Packet::Disconnected {
                    reason: "Protocol version mismatch".to_string(),
                },
                addr,
            );
            return;
        }

        // Remove existing connection if present
        let existing_client_id = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)
        };
        if let Some(existing_id) = existing_client_id {
            info!("Removing existing client {} from {}", existing_id, addr);
            {
                let mut clients = self.clients.write().await;
                clients.remove_client(&existing_id);
            }
            self.drop_from_lobby(existing_id);
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            clients.add_client(addr)
        };

        let response = match client_id {
            Some(client_id) => Packet::Connected { client_id },
            None => Packet::Disconnected {
                reason: "Server full".to_string(),
            },
        };
        self.send_packet(response, addr);
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), BoxError> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.drop_from_lobby(client_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle session timers
                Some(event) = self.timer_rx.recv() => {
                    let deliveries = self.registry.on_timer(&event, get_timestamp());
                    self.deliver(deliveries);
                },
            }
        }

        Ok(())
    }
}
