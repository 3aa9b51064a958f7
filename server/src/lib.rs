//! # Blindfold Maze Session Server
//!
//! This library provides the authoritative server for a cooperative maze game.
//! One player per lobby, the leader, sees the maze; every other player walks
//! through it blind and relies on the leader's voice. The server owns the
//! canonical state of every lobby and tells clients what happened.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Game State
//! The server decides whether a move is legal, whether a trap was sprung,
//! whether the round timed out and whether the level was cleared. Clients
//! only send intents and render whatever the server reports back.
//!
//! ### Lobby Management
//! Lobbies are created on the first join and destroyed when the last player
//! leaves. Each lobby runs its own round clock and wall-shift schedule, both
//! of which stop when the round is lost or the lobby closes.
//!
//! ### Maze Generation and Mutation
//! Every level gets a freshly carved maze with traps, locked doors and their
//! keys. While a round is running the maze periodically shifts a few walls,
//! never in a way that cuts a walker off from the exit.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! All session state is touched from one loop that consumes network events
//! and timer ticks in order. Session code needs no locks and every operation
//! sees a consistent lobby.
//!
//! ### UDP-Based Communication
//! Clients talk to the server over UDP with bincode-encoded [`shared::Packet`]s.
//! A connect handshake assigns each address a player ID, and clients that go
//! quiet for longer than [`client_manager::CLIENT_TIMEOUT`] are dropped.
//!
//! ### Timers as Messages
//! Session timers are background tasks that post [`timers::TimerEvent`]s into
//! the event loop instead of mutating state themselves. Each arming carries an
//! epoch so a tick queued before a restart is recognised as stale.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Connection tracking: player ID assignment, address lookup, liveness and
//! capacity limits.
//!
//! ### Generator Module (`generator`)
//! Recursive-backtracker carving plus trap, door and key placement.
//!
//! ### Mutator Module (`mutator`)
//! Validated wall toggles that keep every walker connected to the exit.
//!
//! ### Session Module (`session`)
//! The per-lobby state machine: join, start, move, exit, traps, switches,
//! timeouts, restart and departures.
//!
//! ### Registry Module (`registry`)
//! Lobby directory that routes intents to sessions and resolves who receives
//! each resulting packet.
//!
//! ### Network Module (`network`)
//! UDP socket tasks and the event loop tying clients, timers and the registry
//! together.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::session::SessionConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     // Bind to a local port, accept up to 64 clients, default 15x15 mazes
//!     let mut server = Server::new("127.0.0.1:8080", 64, SessionConfig::default()).await?;
//!
//!     // Runs until a shutdown message arrives:
//!     // - answers connect handshakes and heartbeats
//!     // - routes lobby intents to their sessions
//!     // - fires round clocks and wall shifts
//!     // - drops clients that time out
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod generator;
pub mod mutator;
pub mod network;
pub mod registry;
pub mod session;
pub mod timers;
pub mod utils;
