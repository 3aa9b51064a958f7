//! Wire protocol and maze model shared between the session server and clients.

pub mod maze;
pub mod path;

pub use maze::{Cell, Direction, Grid, Position, TileKind, Walls};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_MAZE_WIDTH: usize = 15;
pub const DEFAULT_MAZE_HEIGHT: usize = 15;
pub const STARTING_LIVES: u32 = 5;
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 120;

pub type PlayerId = u32;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Connection management
    Connect {
        client_version: u32,
    },
    Heartbeat,
    Disconnect,

    // Lobby and gameplay intents
    JoinGame {
        lobby_id: String,
        player_name: String,
    },
    StartGame {
        lobby_id: String,
    },
    Move {
        lobby_id: String,
        x: i32,
        y: i32,
    },
    PlayerOnExit {
        lobby_id: String,
        x: i32,
        y: i32,
    },
    HitTrap {
        lobby_id: String,
    },
    ActivateSwitch {
        lobby_id: String,
    },
    RestartGame {
        lobby_id: String,
    },
    VoiceSignal {
        to: PlayerId,
        from: PlayerId,
        signal: String,
    },

    Connected {
        client_id: PlayerId,
    },
    Disconnected {
        reason: String,
    },
    UpdateLobby {
        session: SessionSnapshot,
    },
    GameStarted {
        session: SessionSnapshot,
    },
    PlayerMoved {
        id: PlayerId,
        x: usize,
        y: usize,
        keys: u32,
    },
    LivesUpdate {
        lives: u32,
    },
    MazeUpdate {
        maze: Grid,
    },
    WallMoveAlert,
    SwitchActivated,
    KeyCollected {
        player_id: PlayerId,
        keys: u32,
    },
    DoorOpened {
        player_id: PlayerId,
        keys: u32,
    },
    PlayerHitTrap {
        id: PlayerId,
    },
    GameOver {
        reason: LossReason,
    },
    StartFailed {
        reason: String,
    },
    IncomingVoiceSignal {
        from: PlayerId,
        signal: String,
    },
}

impl Packet {
    /// Lobby targeted by a gameplay intent, `None` for every other packet
    pub fn lobby_id(&self) -> Option<&str> {
        match self {
            Packet::JoinGame { lobby_id, .. }
            | Packet::StartGame { lobby_id }
            | Packet::Move { lobby_id, .. }
            | Packet::PlayerOnExit { lobby_id, .. }
            | Packet::HitTrap { lobby_id }
            | Packet::ActivateSwitch { lobby_id }
            | Packet::RestartGame { lobby_id } => Some(lobby_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Leader,
    Walker,
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    Waiting,
    Playing,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossReason {
    TimeOut,
    Traps,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color: String,
    pub role: Role,
    pub position: Position,
    pub keys: u32,
}

impl Player {
    pub fn new(id: PlayerId, name: String, color: String, role: Role) -> Self {
        Self {
            id,
            name,
            color,
            role,
            position: Position::ORIGIN,
            keys: 0,
        }
    }

    /// Puts the player back on the start tile with empty pockets
    pub fn respawn(&mut self) {
        self.position = Position::ORIGIN;
        self.keys = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MazeConfig {
    pub width: usize,
    pub height: usize,
}

impl Default for MazeConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_MAZE_WIDTH,
            height: DEFAULT_MAZE_HEIGHT,
        }
    }
}

/// Everything a client needs to render a lobby or a running round
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionSnapshot {
    pub players: HashMap<PlayerId, Player>,
    pub status: GameStatus,
    pub maze: Option<Grid>,
    /// Round start, milliseconds since the Unix epoch
    pub start_time: u64,
    pub time_limit: u64,
    pub lives: u32,
    pub level: u32,
    pub config: MazeConfig,
}

impl SessionSnapshot {
    /// Seconds left on the round clock at `now_ms`, never negative
    pub fn remaining_secs(&self, now_ms: u64) -> f64 {
        let elapsed = now_ms.saturating_sub(self.start_time) as f64 / 1000.0;
        (self.time_limit as f64 - elapsed).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn snapshot() -> SessionSnapshot {
        let mut players = HashMap::new();
        players.insert(
            7,
            Player::new(7, "Ann".to_string(), "hsl(0, 70%, 50%)".to_string(), Role::Leader),
        );
        SessionSnapshot {
            players,
            status: GameStatus::Playing,
            maze: Some(Grid::new(3, 3)),
            start_time: 10_000,
            time_limit: 120,
            lives: STARTING_LIVES,
            level: 1,
            config: MazeConfig::default(),
        }
    }

    #[test]
    fn test_player_creation() {
        let player = Player::new(1, "Ben".to_string(), "red".to_string(), Role::Waiting);
        assert_eq!(player.id, 1);
        assert_eq!(player.position, Position::ORIGIN);
        assert_eq!(player.keys, 0);
        assert_eq!(player.role, Role::Waiting);
    }

    #[test]
    fn test_player_respawn() {
        let mut player = Player::new(1, "Ben".to_string(), "red".to_string(), Role::Walker);
        player.position = Position::new(4, 2);
        player.keys = 2;
        player.respawn();
        assert_eq!(player.position, Position::ORIGIN);
        assert_eq!(player.keys, 0);
    }

    #[test]
    fn test_remaining_secs() {
        let snap = snapshot();
        assert_approx_eq!(snap.remaining_secs(10_000), 120.0, 1e-9);
        assert_approx_eq!(snap.remaining_secs(40_500), 89.5, 1e-9);
        assert_approx_eq!(snap.remaining_secs(500_000), 0.0, 1e-9);
        // clock skew before the anchor counts as no time elapsed
        assert_approx_eq!(snap.remaining_secs(0), 120.0, 1e-9);
    }

    #[test]
    fn test_lobby_id_extraction() {
        let packet = Packet::Move {
            lobby_id: "ABC".to_string(),
            x: 1,
            y: 0,
        };
        assert_eq!(packet.lobby_id(), Some("ABC"));
        assert_eq!(Packet::Heartbeat.lobby_id(), None);
        assert_eq!(
            Packet::VoiceSignal {
                to: 1,
                from: 2,
                signal: "offer".to_string()
            }
            .lobby_id(),
            None
        );
    }

    #[test]
    fn test_packet_serialization_snapshot() {
        let packet = Packet::GameStarted {
            session: snapshot(),
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::GameStarted { session } => {
                assert_eq!(session.status, GameStatus::Playing);
                assert_eq!(session.players.get(&7).map(|p| p.role), Some(Role::Leader));
                assert_eq!(session.maze, Some(Grid::new(3, 3)));
                assert_eq!(session.config.width, DEFAULT_MAZE_WIDTH);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_game_over() {
        let packet = Packet::GameOver {
            reason: LossReason::Traps,
        };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::GameOver { reason } => assert_eq!(reason, LossReason::Traps),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }
}
