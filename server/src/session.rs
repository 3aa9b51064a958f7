//! Per-lobby game session
//!
//! A [`GameSession`] owns everything about one lobby: its players, the live
//! maze, lives, level, the round clock anchor, the leader rotation and the
//! timer pair. It is a plain state machine, `Waiting → Playing → Lost`, with
//! `Playing → Playing` on level-up and `Lost → Playing` on restart.
//!
//! Operations never talk to the network. Each returns the [`Dispatch`] list it
//! wants delivered, leaving addressing to the caller. Rejected intents come
//! back as a [`SessionError`] and leave the state untouched.

use crate::generator::{generate_maze, GenerationError};
use crate::mutator;
use crate::timers::{SessionTimers, TimerEvent, TimerKind, TimerSender};
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use shared::{
    GameStatus, Grid, LossReason, MazeConfig, Packet, Player, PlayerId, Position, Role,
    SessionSnapshot, TileKind, DEFAULT_MAZE_HEIGHT, DEFAULT_MAZE_WIDTH, DEFAULT_TIME_LIMIT_SECS,
    STARTING_LIVES,
};
use std::collections::HashMap;
use std::time::Duration;

/// Tunables shared by every lobby on a server
///
/// Built once from the command line and cloned into each new session, so
/// changing it only affects lobbies created afterwards.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maze width in cells, used for every level
    pub width: usize,
    /// Maze height in cells
    pub height: usize,
    /// Seconds a round may last before it is lost on time
    pub time_limit_secs: u64,
    /// Shared lives at the start of every round, level-ups included
    pub starting_lives: u32,
    /// How often the round clock is checked
    pub clock_interval: Duration,
    /// How often walls shift while a round is running
    pub wall_shift_interval: Duration,
    /// Base seed for reproducible sessions, fresh entropy when `None`
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_MAZE_WIDTH,
            height: DEFAULT_MAZE_HEIGHT,
            time_limit_secs: DEFAULT_TIME_LIMIT_SECS,
            starting_lives: STARTING_LIVES,
            clock_interval: Duration::from_secs(1),
            wall_shift_interval: Duration::from_secs(15),
            seed: None,
        }
    }
}

/// Who in the lobby should receive a packet
///
/// Audiences are resolved against the lobby's membership at delivery time,
/// so a player who left during the operation is never addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every current member
    Lobby,
    /// Every member but one, typically the player whose move is being echoed
    AllExcept(PlayerId),
    /// A single member
    Only(PlayerId),
}

/// A packet a session wants sent, before addressing
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub audience: Audience,
    pub packet: Packet,
}

impl Dispatch {
    /// Broadcast to the whole lobby
    pub fn lobby(packet: Packet) -> Self {
        Self {
            audience: Audience::Lobby,
            packet,
        }
    }

    /// Broadcast to everyone except `id`
    pub fn all_except(id: PlayerId, packet: Packet) -> Self {
        Self {
            audience: Audience::AllExcept(id),
            packet,
        }
    }

    /// Send to `id` alone
    pub fn only(id: PlayerId, packet: Packet) -> Self {
        Self {
            audience: Audience::Only(id),
            packet,
        }
    }
}

/// Reasons an intent is dropped
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("lobby {0} does not exist")]
    UnknownLobby(String),

    #[error("player {0} is not in this lobby")]
    UnknownPlayer(PlayerId),

    #[error("lobby has no players")]
    NoPlayers,

    #[error("no round in progress")]
    NotPlaying,

    #[error("player {0} is not a walker")]
    NotAWalker(PlayerId),

    #[error("target ({x}, {y}) is outside the maze")]
    OutOfBounds { x: i32, y: i32 },

    #[error("target is not next to the player")]
    NotAdjacent,

    #[error("a wall is in the way")]
    WallInTheWay,

    #[error("door is locked and the player holds no key")]
    DoorLocked,

    #[error("packet is not a lobby intent")]
    UnsupportedIntent,

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Authoritative state of one lobby
///
/// The session is owned by the registry and only ever touched from the
/// server loop, so it needs no locking. It holds:
/// - the players, in join order, with their roles, positions and keys
/// - the live maze, absent until the first successful start
/// - shared lives, the level counter and the round clock anchor
/// - the leader rotation and the clock and wall-shift timers
pub struct GameSession {
    lobby_id: String,
    config: SessionConfig,
    players: HashMap<PlayerId, Player>,
    join_order: Vec<PlayerId>,
    maze: Option<Grid>,
    status: GameStatus,
    loss_reason: Option<LossReason>,
    lives: u32,
    level: u32,
    /// Round start in milliseconds since the Unix epoch
    start_time: u64,
    rotation_order: Vec<PlayerId>,
    leader_index: usize,
    rng: StdRng,
    timers: SessionTimers,
    timer_tx: Option<TimerSender>,
}

impl GameSession {
    /// Creates an empty lobby in the `Waiting` state
    ///
    /// All randomness (maze layout, rotation shuffles, wall shifts) comes
    /// from `rng`, so a seeded generator replays a lobby exactly. Without a
    /// `timer_tx` no timers are ever armed and the caller drives the clock
    /// through [`GameSession::on_timer`] or [`GameSession::check_clock`].
    pub fn new(
        lobby_id: String,
        config: SessionConfig,
        rng: StdRng,
        timer_tx: Option<TimerSender>,
    ) -> Self {
        Self {
            lobby_id,
            lives: config.starting_lives,
            config,
            players: HashMap::new(),
            join_order: Vec::new(),
            maze: None,
            status: GameStatus::Waiting,
            loss_reason: None,
            level: 1,
            start_time: 0,
            rotation_order: Vec::new(),
            leader_index: 0,
            rng,
            timers: SessionTimers::new(),
            timer_tx,
        }
    }

    /// Code players type to join this lobby
    pub fn lobby_id(&self) -> &str {
        &self.lobby_id
    }

    /// Current phase of the lobby
    pub fn status(&self) -> GameStatus {
        self.status
    }

    /// Why the last game ended, cleared when a new one starts
    pub fn loss_reason(&self) -> Option<LossReason> {
        self.loss_reason
    }

    /// Lives shared by the whole lobby
    pub fn lives(&self) -> u32 {
        self.lives
    }

    /// Levels cleared so far plus one; back to 1 on start and restart
    pub fn level(&self) -> u32 {
        self.level
    }

    /// When the current round began, in milliseconds since the Unix epoch.
    /// Reset on every start, restart and level-up.
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// The live maze, including opened doors, collected keys and shifted walls
    pub fn maze(&self) -> Option<&Grid> {
        self.maze.as_ref()
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    /// Player IDs in ascending order
    pub fn player_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.players.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Order in which leadership passes at each level-up
    ///
    /// Shuffled on start and restart. Late joiners are appended at the next
    /// level-up or restart.
    pub fn rotation_order(&self) -> &[PlayerId] {
        &self.rotation_order
    }

    /// The player currently guiding the walkers, if any
    pub fn leader(&self) -> Option<PlayerId> {
        self.players
            .values()
            .find(|p| p.role == Role::Leader)
            .map(|p| p.id)
    }

    /// True while a round is running with live clock and wall-shift tasks
    pub fn timers_armed(&self) -> bool {
        self.timers.is_armed()
    }

    /// Epoch stamped on timer events. Ticks carrying an older epoch belong to
    /// a previous round and are ignored.
    pub fn timer_epoch(&self) -> u64 {
        self.timers.epoch()
    }

    /// Full picture of the lobby as sent to clients
    ///
    /// Used for `UpdateLobby` and `GameStarted`. The snapshot carries the
    /// whole maze, so clients can redraw from it alone after joining late or
    /// missing packets.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            players: self.players.clone(),
            status: self.status,
            maze: self.maze.clone(),
            start_time: self.start_time,
            time_limit: self.config.time_limit_secs,
            lives: self.lives,
            level: self.level,
            config: MazeConfig {
                width: self.config.width,
                height: self.config.height,
            },
        }
    }

    /// Adds a player, or renames one who joins again. The first player in an
    /// empty lobby leads; everyone after waits for the next round.
    pub fn join(&mut self, id: PlayerId, name: String, color: String) -> Vec<Dispatch> {
        match self.players.get_mut(&id) {
            Some(existing) => existing.name = name,
            None => {
                let role = if self.players.is_empty() {
                    Role::Leader
                } else {
                    Role::Waiting
                };
                info!("Player {} ({}) joined lobby {} as {:?}", id, name, self.lobby_id, role);
                self.players.insert(id, Player::new(id, name, color, role));
                self.join_order.push(id);
            }
        }

        vec![Dispatch::lobby(Packet::UpdateLobby {
            session: self.snapshot(),
        })]
    }

    /// Starts a fresh game: new rotation order, level 1, new maze
    ///
    /// Works from any state. The rotation order is a shuffle of everyone in
    /// the lobby; its first entry leads and the rest walk. Lives, positions,
    /// keys and the clock are reset and both timers are (re)armed. Returns
    /// a single `GameStarted` broadcast. When generation fails the lobby keeps
    /// its previous state and the error is returned.
    pub fn start(&mut self, now_ms: u64) -> Result<Vec<Dispatch>, SessionError> {
        if self.players.is_empty() {
            return Err(SessionError::NoPlayers);
        }
        let maze = self.fresh_maze()?;

        let mut order = self.player_ids();
        order.shuffle(&mut self.rng);
        self.rotation_order = order;
        self.leader_index = 0;
        self.level = 1;

        Ok(self.begin_round(maze, now_ms))
    }

    /// Resets lives, level and clock on a new maze, keeping the rotation order
    pub fn restart(&mut self, now_ms: u64) -> Result<Vec<Dispatch>, SessionError> {
        if self.players.is_empty() {
            return Err(SessionError::NoPlayers);
        }
        if self.rotation_order.is_empty() {
            return self.start(now_ms);
        }
        let maze = self.fresh_maze()?;

        self.enroll_newcomers();
        self.level = 1;

        Ok(self.begin_round(maze, now_ms))
    }

    /// Handles a walker stepping to an adjacent cell
    ///
    /// `x` and `y` are the client's claimed target. The step is rejected
    /// unless the round is running, the mover is a walker, and the target is
    /// an in-bounds neighbour reached through a passage. A closed door also
    /// needs a key. Keys and doors take effect before the position echo, which
    /// skips the mover. Traps, switches and the exit take effect after it.
    pub fn move_player(
        &mut self,
        id: PlayerId,
        x: i32,
        y: i32,
        now_ms: u64,
    ) -> Result<Vec<Dispatch>, SessionError> {
        if self.status != GameStatus::Playing {
            return Err(SessionError::NotPlaying);
        }
        let player = self.players.get(&id).ok_or(SessionError::UnknownPlayer(id))?;
        if player.role != Role::Walker {
            return Err(SessionError::NotAWalker(id));
        }
        let maze = self.maze.as_ref().ok_or(SessionError::NotPlaying)?;

        let target = maze
            .position(x, y)
            .ok_or(SessionError::OutOfBounds { x, y })?;
        let dir = maze
            .direction_to(player.position, target)
            .ok_or(SessionError::NotAdjacent)?;
        if !maze.is_passage(player.position, dir) {
            return Err(SessionError::WallInTheWay);
        }
        if maze.kind(target) == TileKind::Door && player.keys == 0 {
            return Err(SessionError::DoorLocked);
        }

        Ok(self.step_onto(id, target, now_ms))
    }

    /// A walker announcing it stands on the exit. Moves it there first when it
    /// is reporting from the neighbouring cell.
    pub fn report_exit(
        &mut self,
        id: PlayerId,
        x: i32,
        y: i32,
        now_ms: u64,
    ) -> Result<Vec<Dispatch>, SessionError> {
        let already_there = self
            .maze
            .as_ref()
            .and_then(|maze| maze.position(x, y))
            .zip(self.players.get(&id))
            .map_or(false, |(target, player)| target == player.position);

        if self.status == GameStatus::Playing && already_there {
            return Ok(self.check_exit(now_ms));
        }
        self.move_player(id, x, y, now_ms)
    }

    /// Trap reported by the client itself
    pub fn hit_trap(&mut self, id: PlayerId) -> Result<Vec<Dispatch>, SessionError> {
        if self.status != GameStatus::Playing {
            return Err(SessionError::NotPlaying);
        }
        if !self.players.contains_key(&id) {
            return Err(SessionError::UnknownPlayer(id));
        }
        Ok(self.spring_trap(id))
    }

    /// Switch reported by the client itself
    pub fn activate_switch(&mut self, id: PlayerId) -> Result<Vec<Dispatch>, SessionError> {
        if self.status != GameStatus::Playing {
            return Err(SessionError::NotPlaying);
        }
        if !self.players.contains_key(&id) {
            return Err(SessionError::UnknownPlayer(id));
        }
        Ok(self.flip_switch())
    }

    /// Removes a player. An emptied session disarms its timers and produces
    /// nothing; the owner is expected to drop it.
    pub fn leave(&mut self, id: PlayerId, now_ms: u64) -> Vec<Dispatch> {
        let Some(departed) = self.players.remove(&id) else {
            return Vec::new();
        };
        self.join_order.retain(|other| *other != id);
        info!("Player {} left lobby {}", id, self.lobby_id);

        if self.players.is_empty() {
            self.timers.disarm();
            return Vec::new();
        }

        if let Some(slot) = self.rotation_order.iter().position(|other| *other == id) {
            self.rotation_order.remove(slot);
            if slot < self.leader_index {
                self.leader_index -= 1;
            }
            if self.rotation_order.is_empty() {
                self.leader_index = 0;
            } else {
                self.leader_index %= self.rotation_order.len();
            }
        }

        if departed.role == Role::Leader {
            self.promote_leader();
        }

        let mut out = vec![Dispatch::lobby(Packet::UpdateLobby {
            session: self.snapshot(),
        })];
        if self.status == GameStatus::Playing {
            out.extend(self.check_exit(now_ms));
        }
        out
    }

    /// Routes a tick from the timer pair, dropping stale ones
    ///
    /// A tick is stale when the timers are disarmed or its epoch predates the
    /// latest arming, for example a wall shift queued just before a level-up.
    pub fn on_timer(&mut self, event: &TimerEvent, now_ms: u64) -> Vec<Dispatch> {
        if !self.timers.accepts(event.epoch) {
            debug!(
                "Ignoring stale {:?} tick for lobby {} (epoch {})",
                event.kind, self.lobby_id, event.epoch
            );
            return Vec::new();
        }

        match event.kind {
            TimerKind::Clock => self.check_clock(now_ms),
            TimerKind::WallShift => self.shift_walls(),
        }
    }

    /// Ends the round once the time limit has passed
    pub fn check_clock(&mut self, now_ms: u64) -> Vec<Dispatch> {
        if self.status != GameStatus::Playing {
            return Vec::new();
        }
        let elapsed_ms = now_ms.saturating_sub(self.start_time);
        if elapsed_ms >= self.config.time_limit_secs.saturating_mul(1000) {
            self.lose(LossReason::TimeOut)
        } else {
            Vec::new()
        }
    }

    /// Runs one validated wall shift on the live maze
    ///
    /// Current walker positions are passed to the mutator so nobody can be
    /// walled off. Broadcasts the new maze and a `WallMoveAlert` only when at
    /// least one wall actually moved.
    pub fn shift_walls(&mut self) -> Vec<Dispatch> {
        if self.status != GameStatus::Playing {
            return Vec::new();
        }
        let walkers: Vec<Position> = self
            .players
            .values()
            .filter(|p| p.role == Role::Walker)
            .map(|p| p.position)
            .collect();
        let Some(maze) = self.maze.as_mut() else {
            return Vec::new();
        };

        let shift = mutator::shift_walls(maze, &walkers, &mut self.rng);
        debug!(
            "Wall shift in lobby {}: {} of {} attempts applied",
            self.lobby_id, shift.applied, shift.attempts
        );
        if shift.applied == 0 {
            return Vec::new();
        }

        vec![
            Dispatch::lobby(Packet::MazeUpdate { maze: maze.clone() }),
            Dispatch::lobby(Packet::WallMoveAlert),
        ]
    }

    /// Stops the timers ahead of dropping the session
    pub fn shutdown(&mut self) {
        self.timers.disarm();
    }

    fn fresh_maze(&mut self) -> Result<Grid, GenerationError> {
        generate_maze(self.config.width, self.config.height, &mut self.rng).map_err(|e| {
            error!("Maze generation failed for lobby {}: {}", self.lobby_id, e);
            e
        })
    }

    fn begin_round(&mut self, maze: Grid, now_ms: u64) -> Vec<Dispatch> {
        self.maze = Some(maze);
        self.lives = self.config.starting_lives;
        self.start_time = now_ms;
        self.status = GameStatus::Playing;
        self.loss_reason = None;
        self.assign_roles();
        for player in self.players.values_mut() {
            player.respawn();
        }
        self.timers.arm(
            &self.lobby_id,
            self.timer_tx.as_ref(),
            self.config.clock_interval,
            self.config.wall_shift_interval,
        );

        info!(
            "Lobby {} playing level {} with {} players, leader {:?}",
            self.lobby_id,
            self.level,
            self.players.len(),
            self.leader()
        );

        vec![Dispatch::lobby(Packet::GameStarted {
            session: self.snapshot(),
        })]
    }

    /// Applies the effects of `id` entering `target`, which must already be validated
    fn step_onto(&mut self, id: PlayerId, target: Position, now_ms: u64) -> Vec<Dispatch> {
        let mut out = Vec::new();
        let (Some(maze), Some(player)) = (self.maze.as_mut(), self.players.get_mut(&id)) else {
            return out;
        };

        let kind = maze.kind(target);
        match kind {
            TileKind::Key => {
                maze.set_kind(target, TileKind::Empty);
                player.keys += 1;
                out.push(Dispatch::lobby(Packet::MazeUpdate { maze: maze.clone() }));
                out.push(Dispatch::lobby(Packet::KeyCollected {
                    player_id: id,
                    keys: player.keys,
                }));
            }
            TileKind::Door => {
                player.keys = player.keys.saturating_sub(1);
                maze.set_kind(target, TileKind::OpenDoor);
                out.push(Dispatch::lobby(Packet::MazeUpdate { maze: maze.clone() }));
                out.push(Dispatch::lobby(Packet::DoorOpened {
                    player_id: id,
                    keys: player.keys,
                }));
            }
            _ => {}
        }

        player.position = target;
        out.push(Dispatch::all_except(
            id,
            Packet::PlayerMoved {
                id,
                x: target.x,
                y: target.y,
                keys: player.keys,
            },
        ));

        match kind {
            TileKind::Trap => out.extend(self.spring_trap(id)),
            TileKind::Switch => out.extend(self.flip_switch()),
            TileKind::Exit => out.extend(self.check_exit(now_ms)),
            _ => {}
        }
        out
    }

    fn spring_trap(&mut self, id: PlayerId) -> Vec<Dispatch> {
        self.lives = self.lives.saturating_sub(1);
        info!(
            "Player {} hit a trap in lobby {}, {} lives left",
            id, self.lobby_id, self.lives
        );

        let mut out = vec![
            Dispatch::lobby(Packet::LivesUpdate { lives: self.lives }),
            Dispatch::all_except(id, Packet::PlayerHitTrap { id }),
        ];
        if let Some(player) = self.players.get_mut(&id) {
            player.position = Position::ORIGIN;
            out.push(Dispatch::lobby(Packet::PlayerMoved {
                id,
                x: 0,
                y: 0,
                keys: player.keys,
            }));
        }

        if self.lives == 0 {
            out.extend(self.lose(LossReason::Traps));
        }
        out
    }

    fn flip_switch(&mut self) -> Vec<Dispatch> {
        let Some(maze) = self.maze.as_mut() else {
            return Vec::new();
        };
        let toggled = maze.toggle_doors();
        debug!("Switch in lobby {} toggled {} doors", self.lobby_id, toggled);

        vec![
            Dispatch::lobby(Packet::MazeUpdate { maze: maze.clone() }),
            Dispatch::lobby(Packet::SwitchActivated),
        ]
    }

    /// Advances the level when every walker stands on an exit tile
    fn check_exit(&mut self, now_ms: u64) -> Vec<Dispatch> {
        let Some(maze) = self.maze.as_ref() else {
            return Vec::new();
        };
        let mut walkers = self
            .players
            .values()
            .filter(|p| p.role == Role::Walker)
            .peekable();
        if walkers.peek().is_none() {
            return Vec::new();
        }
        if walkers.all(|p| maze.kind(p.position) == TileKind::Exit) {
            self.level_up(now_ms)
        } else {
            Vec::new()
        }
    }

    fn level_up(&mut self, now_ms: u64) -> Vec<Dispatch> {
        let maze = match self.fresh_maze() {
            Ok(maze) => maze,
            Err(e) => {
                return vec![Dispatch::lobby(Packet::StartFailed {
                    reason: e.to_string(),
                })]
            }
        };

        self.level += 1;
        self.enroll_newcomers();
        if !self.rotation_order.is_empty() {
            self.leader_index = (self.leader_index + 1) % self.rotation_order.len();
        }

        self.begin_round(maze, now_ms)
    }

    fn lose(&mut self, reason: LossReason) -> Vec<Dispatch> {
        self.status = GameStatus::Lost;
        self.loss_reason = Some(reason);
        self.timers.disarm();
        info!("Lobby {} lost at level {}: {:?}", self.lobby_id, self.level, reason);

        vec![Dispatch::lobby(Packet::GameOver { reason })]
    }

    fn assign_roles(&mut self) {
        let leader = self.rotation_order.get(self.leader_index).copied();
        for player in self.players.values_mut() {
            player.role = if Some(player.id) == leader {
                Role::Leader
            } else {
                Role::Walker
            };
        }
    }

    /// Appends players who joined mid-game to the end of the rotation
    fn enroll_newcomers(&mut self) {
        let newcomers: Vec<PlayerId> = self
            .player_ids()
            .into_iter()
            .filter(|id| !self.rotation_order.contains(id))
            .collect();
        self.rotation_order.extend(newcomers);
    }

    /// Hands leadership to the next player in rotation, or the earliest
    /// remaining joiner when no rotation exists yet
    fn promote_leader(&mut self) {
        let next = self
            .rotation_order
            .get(self.leader_index)
            .or_else(|| self.join_order.first())
            .copied();

        if let Some(player) = next.and_then(|id| self.players.get_mut(&id)) {
            player.role = Role::Leader;
            info!("Player {} now leads lobby {}", player.id, self.lobby_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use shared::Direction;

    fn new_session() -> GameSession {
        GameSession::new(
            "ABC".to_string(),
            SessionConfig::default(),
            StdRng::seed_from_u64(42),
            None,
        )
    }

    /// Straight open corridor along the top row
    fn corridor(len: usize) -> Grid {
        let mut grid = Grid::new(len, 1);
        for x in 0..len - 1 {
            grid.set_wall(Position::new(x, 0), Direction::Right, false);
        }
        grid.set_kind(grid.start(), TileKind::Start);
        grid.set_kind(grid.exit(), TileKind::Exit);
        grid
    }

    /// Two-player session in progress on `grid`; returns (session, walker, leader)
    fn playing_on(grid: Grid) -> (GameSession, PlayerId, PlayerId) {
        let mut session = new_session();
        session.join(1, "Ann".to_string(), "red".to_string());
        session.join(2, "Ben".to_string(), "blue".to_string());
        session.start(0).unwrap();
        session.maze = Some(grid);

        let leader = session.leader().unwrap();
        let walker = if leader == 1 { 2 } else { 1 };
        (session, walker, leader)
    }

    fn packets(dispatches: &[Dispatch]) -> Vec<&Packet> {
        dispatches.iter().map(|d| &d.packet).collect()
    }

    #[test]
    fn test_first_joiner_leads() {
        let mut session = new_session();
        let out = session.join(1, "Ann".to_string(), "red".to_string());
        session.join(2, "Ben".to_string(), "blue".to_string());

        assert_eq!(session.player(1).unwrap().role, Role::Leader);
        assert_eq!(session.player(2).unwrap().role, Role::Waiting);
        assert_eq!(session.status(), GameStatus::Waiting);
        assert!(matches!(out[0].packet, Packet::UpdateLobby { .. }));
        assert_eq!(out[0].audience, Audience::Lobby);
    }

    #[test]
    fn test_rejoin_keeps_role() {
        let mut session = new_session();
        session.join(1, "Ann".to_string(), "red".to_string());
        session.join(1, "Annie".to_string(), "red".to_string());
        assert_eq!(session.len(), 1);
        assert_eq!(session.player(1).unwrap().name, "Annie");
        assert_eq!(session.player(1).unwrap().role, Role::Leader);
    }

    #[test]
    fn test_start_requires_players() {
        let mut session = new_session();
        assert!(matches!(session.start(0), Err(SessionError::NoPlayers)));
        assert_eq!(session.status(), GameStatus::Waiting);
    }

    #[test]
    fn test_start_assigns_roles_and_arms_timers() {
        let mut session = new_session();
        session.join(1, "Ann".to_string(), "red".to_string());
        session.join(2, "Ben".to_string(), "blue".to_string());
        session.join(3, "Cat".to_string(), "green".to_string());

        let out = session.start(5_000).unwrap();

        assert_eq!(session.status(), GameStatus::Playing);
        assert_eq!(session.lives(), STARTING_LIVES);
        assert_eq!(session.level(), 1);
        assert_eq!(session.start_time(), 5_000);
        assert!(session.timers_armed());
        assert!(session.maze().is_some());

        let mut order = session.rotation_order().to_vec();
        assert_eq!(session.leader(), Some(order[0]));
        order.sort_unstable();
        assert_eq!(order, vec![1, 2, 3]);

        let walkers = session
            .player_ids()
            .into_iter()
            .filter(|id| session.player(*id).unwrap().role == Role::Walker)
            .count();
        assert_eq!(walkers, 2);
        for id in session.player_ids() {
            assert_eq!(session.player(id).unwrap().position, Position::ORIGIN);
        }
        assert!(matches!(out[0].packet, Packet::GameStarted { .. }));
    }

    #[test]
    fn test_generation_failure_keeps_lobby_waiting() {
        let config = SessionConfig {
            width: 1,
            ..SessionConfig::default()
        };
        let mut session = GameSession::new(
            "ABC".to_string(),
            config,
            StdRng::seed_from_u64(1),
            None,
        );
        session.join(1, "Ann".to_string(), "red".to_string());

        assert!(matches!(session.start(0), Err(SessionError::Generation(_))));
        assert_eq!(session.status(), GameStatus::Waiting);
        assert!(session.maze().is_none());
        assert!(!session.timers_armed());
    }

    #[test]
    fn test_move_rejections() {
        let (mut session, walker, leader) = playing_on(Grid::new(3, 3));

        assert!(matches!(
            session.move_player(walker, 1, 0, 0),
            Err(SessionError::WallInTheWay)
        ));
        assert!(matches!(
            session.move_player(walker, -1, 0, 0),
            Err(SessionError::OutOfBounds { .. })
        ));
        assert!(matches!(
            session.move_player(walker, 2, 0, 0),
            Err(SessionError::NotAdjacent)
        ));
        assert!(matches!(
            session.move_player(leader, 1, 0, 0),
            Err(SessionError::NotAWalker(_))
        ));
        assert!(matches!(
            session.move_player(99, 1, 0, 0),
            Err(SessionError::UnknownPlayer(99))
        ));
        assert_eq!(session.player(walker).unwrap().position, Position::ORIGIN);
    }

    #[test]
    fn test_move_is_not_echoed_to_mover() {
        let (mut session, walker, _) = playing_on(corridor(4));

        let out = session.move_player(walker, 1, 0, 0).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].audience, Audience::AllExcept(walker));
        assert!(matches!(
            out[0].packet,
            Packet::PlayerMoved { x: 1, y: 0, keys: 0, .. }
        ));
        assert_eq!(session.player(walker).unwrap().position, Position::new(1, 0));
    }

    #[test]
    fn test_locked_door_rejects_without_key() {
        let mut grid = corridor(4);
        grid.set_kind(Position::new(1, 0), TileKind::Door);
        let (mut session, walker, _) = playing_on(grid);

        assert!(matches!(
            session.move_player(walker, 1, 0, 0),
            Err(SessionError::DoorLocked)
        ));
        assert_eq!(session.player(walker).unwrap().position, Position::ORIGIN);
    }

    #[test]
    fn test_key_then_door() {
        let mut grid = corridor(5);
        grid.set_kind(Position::new(1, 0), TileKind::Key);
        grid.set_kind(Position::new(2, 0), TileKind::Door);
        let (mut session, walker, _) = playing_on(grid);

        let out = session.move_player(walker, 1, 0, 0).unwrap();
        assert_eq!(session.player(walker).unwrap().keys, 1);
        assert_eq!(session.maze().unwrap().kind(Position::new(1, 0)), TileKind::Empty);
        let sent = packets(&out);
        assert!(matches!(sent[0], Packet::MazeUpdate { .. }));
        assert!(matches!(sent[1], Packet::KeyCollected { keys: 1, .. }));

        let out = session.move_player(walker, 2, 0, 0).unwrap();
        assert_eq!(session.player(walker).unwrap().keys, 0);
        assert_eq!(
            session.maze().unwrap().kind(Position::new(2, 0)),
            TileKind::OpenDoor
        );
        assert!(matches!(packets(&out)[1], Packet::DoorOpened { keys: 0, .. }));

        // an opened door stays open for everyone
        session.move_player(walker, 1, 0, 0).unwrap();
        assert!(session.move_player(walker, 2, 0, 0).is_ok());
    }

    #[test]
    fn test_trap_costs_a_life_and_respawns() {
        let mut grid = corridor(4);
        grid.set_kind(Position::new(1, 0), TileKind::Trap);
        let (mut session, walker, _) = playing_on(grid);

        let out = session.move_player(walker, 1, 0, 0).unwrap();

        assert_eq!(session.lives(), STARTING_LIVES - 1);
        assert_eq!(session.player(walker).unwrap().position, Position::ORIGIN);
        let sent = packets(&out);
        assert!(matches!(sent[1], Packet::LivesUpdate { lives: 4 }));
        assert_eq!(out[2].audience, Audience::AllExcept(walker));
        assert!(matches!(sent[2], Packet::PlayerHitTrap { .. }));
        assert_eq!(out[3].audience, Audience::Lobby);
        assert!(matches!(sent[3], Packet::PlayerMoved { x: 0, y: 0, .. }));
    }

    #[test]
    fn test_running_out_of_lives_loses_the_game() {
        let mut grid = corridor(4);
        grid.set_kind(Position::new(1, 0), TileKind::Trap);
        let (mut session, walker, _) = playing_on(grid);

        for _ in 0..STARTING_LIVES - 1 {
            session.move_player(walker, 1, 0, 0).unwrap();
        }
        assert_eq!(session.status(), GameStatus::Playing);

        let out = session.move_player(walker, 1, 0, 0).unwrap();
        assert_eq!(session.lives(), 0);
        assert_eq!(session.status(), GameStatus::Lost);
        assert_eq!(session.loss_reason(), Some(LossReason::Traps));
        assert!(!session.timers_armed());
        assert!(matches!(
            out.last().map(|d| &d.packet),
            Some(Packet::GameOver {
                reason: LossReason::Traps
            })
        ));

        assert!(matches!(
            session.move_player(walker, 1, 0, 0),
            Err(SessionError::NotPlaying)
        ));
        assert!(matches!(session.hit_trap(walker), Err(SessionError::NotPlaying)));
        assert_eq!(session.lives(), 0);
    }

    #[test]
    fn test_reported_trap_matches_stepped_trap() {
        let (mut session, walker, _) = playing_on(corridor(4));
        session.move_player(walker, 1, 0, 0).unwrap();

        session.hit_trap(walker).unwrap();
        assert_eq!(session.lives(), STARTING_LIVES - 1);
        assert_eq!(session.player(walker).unwrap().position, Position::ORIGIN);
    }

    #[test]
    fn test_timeout() {
        let (mut session, walker, _) = playing_on(corridor(4));
        session.start_time = 1_000;
        assert_approx_eq!(session.snapshot().remaining_secs(61_000), 60.0, 1e-9);

        assert!(session.check_clock(1_000 + 119_999).is_empty());
        assert_eq!(session.status(), GameStatus::Playing);

        let out = session.check_clock(1_000 + 120_000);
        assert_eq!(session.status(), GameStatus::Lost);
        assert_eq!(session.loss_reason(), Some(LossReason::TimeOut));
        assert!(!session.timers_armed());
        assert!(matches!(
            out[0].packet,
            Packet::GameOver {
                reason: LossReason::TimeOut
            }
        ));

        assert!(session.move_player(walker, 1, 0, 200_000).is_err());
        assert_eq!(session.player(walker).unwrap().position, Position::ORIGIN);
        // clock keeps quiet once the round is over
        assert!(session.check_clock(500_000).is_empty());
    }

    #[test]
    fn test_stale_timer_events_are_ignored() {
        let (mut session, _, _) = playing_on(corridor(4));
        let stale = TimerEvent {
            lobby_id: "ABC".to_string(),
            kind: TimerKind::Clock,
            epoch: session.timer_epoch() - 1,
        };
        assert!(session.on_timer(&stale, u64::MAX).is_empty());
        assert_eq!(session.status(), GameStatus::Playing);

        let current = TimerEvent {
            epoch: session.timer_epoch(),
            ..stale
        };
        assert_eq!(session.on_timer(&current, u64::MAX).len(), 1);
        assert_eq!(session.status(), GameStatus::Lost);
    }

    #[test]
    fn test_level_up_rotates_leader() {
        let (mut session, walker, leader) = playing_on(corridor(3));
        let order = session.rotation_order().to_vec();
        session.hit_trap(walker).unwrap();
        let epoch = session.timer_epoch();

        session.move_player(walker, 1, 0, 0).unwrap();
        let out = session.move_player(walker, 2, 0, 9_000).unwrap();

        assert!(matches!(
            out.last().map(|d| &d.packet),
            Some(Packet::GameStarted { .. })
        ));
        assert_eq!(session.level(), 2);
        assert_eq!(session.lives(), STARTING_LIVES);
        assert_eq!(session.start_time(), 9_000);
        assert_eq!(session.status(), GameStatus::Playing);
        assert_eq!(session.rotation_order(), order.as_slice());
        assert_eq!(session.leader(), Some(walker));
        assert_eq!(session.player(leader).unwrap().role, Role::Walker);
        assert_eq!(session.player(walker).unwrap().position, Position::ORIGIN);
        assert_eq!(session.maze().unwrap().width(), DEFAULT_MAZE_WIDTH);
        assert!(session.timer_epoch() > epoch);
    }

    #[test]
    fn test_every_walker_must_reach_the_exit() {
        let mut session = new_session();
        for (id, name) in [(1, "Ann"), (2, "Ben"), (3, "Cat")] {
            session.join(id, name.to_string(), "red".to_string());
        }
        session.start(0).unwrap();
        session.maze = Some(corridor(2));
        let walkers: Vec<PlayerId> = session
            .player_ids()
            .into_iter()
            .filter(|id| session.player(*id).unwrap().role == Role::Walker)
            .collect();

        session.move_player(walkers[0], 1, 0, 0).unwrap();
        assert_eq!(session.level(), 1);

        // re-reporting from the exit only re-checks
        assert!(session.report_exit(walkers[0], 1, 0, 0).unwrap().is_empty());

        session.report_exit(walkers[1], 1, 0, 0).unwrap();
        assert_eq!(session.level(), 2);
    }

    #[test]
    fn test_switch_toggles_doors() {
        let mut grid = corridor(4);
        grid.set_kind(Position::new(1, 0), TileKind::Switch);
        grid.set_kind(Position::new(2, 0), TileKind::Door);
        let (mut session, walker, _) = playing_on(grid);

        let out = session.move_player(walker, 1, 0, 0).unwrap();
        assert_eq!(
            session.maze().unwrap().kind(Position::new(2, 0)),
            TileKind::OpenDoor
        );
        assert!(matches!(packets(&out).last(), Some(Packet::SwitchActivated)));

        session.activate_switch(walker).unwrap();
        assert_eq!(session.maze().unwrap().kind(Position::new(2, 0)), TileKind::Door);
    }

    #[test]
    fn test_restart_after_loss() {
        let (mut session, _, _) = playing_on(corridor(4));
        let order = session.rotation_order().to_vec();
        session.check_clock(u64::MAX);
        assert_eq!(session.status(), GameStatus::Lost);

        let out = session.restart(50_000).unwrap();
        assert_eq!(session.status(), GameStatus::Playing);
        assert_eq!(session.loss_reason(), None);
        assert_eq!(session.lives(), STARTING_LIVES);
        assert_eq!(session.level(), 1);
        assert_eq!(session.start_time(), 50_000);
        assert!(session.timers_armed());
        assert_eq!(session.rotation_order(), order.as_slice());
        assert_eq!(session.maze().unwrap().width(), DEFAULT_MAZE_WIDTH);
        assert!(matches!(out[0].packet, Packet::GameStarted { .. }));
    }

    #[test]
    fn test_restart_before_start_acts_as_start() {
        let mut session = new_session();
        session.join(1, "Ann".to_string(), "red".to_string());
        session.restart(0).unwrap();
        assert_eq!(session.status(), GameStatus::Playing);
        assert_eq!(session.rotation_order(), &[1]);
        assert_eq!(session.leader(), Some(1));
    }

    #[test]
    fn test_late_joiner_waits_then_walks() {
        let (mut session, walker, _) = playing_on(corridor(3));
        session.join(3, "Cat".to_string(), "green".to_string());
        assert_eq!(session.player(3).unwrap().role, Role::Waiting);

        session.move_player(walker, 1, 0, 0).unwrap();
        session.move_player(walker, 2, 0, 0).unwrap();

        assert_eq!(session.level(), 2);
        assert_eq!(session.rotation_order().last(), Some(&3));
        assert_eq!(session.player(3).unwrap().role, Role::Walker);
    }

    #[test]
    fn test_leader_departure_promotes_next_in_rotation() {
        let (mut session, walker, leader) = playing_on(corridor(4));

        let out = session.leave(leader, 0);
        assert_eq!(session.leader(), Some(walker));
        assert_eq!(session.rotation_order(), &[walker]);
        assert!(matches!(out[0].packet, Packet::UpdateLobby { .. }));
    }

    #[test]
    fn test_leader_departure_before_start() {
        let mut session = new_session();
        session.join(1, "Ann".to_string(), "red".to_string());
        session.join(2, "Ben".to_string(), "blue".to_string());
        session.join(3, "Cat".to_string(), "green".to_string());

        session.leave(1, 0);
        assert_eq!(session.leader(), Some(2));
        assert_eq!(session.player(3).unwrap().role, Role::Waiting);
    }

    #[test]
    fn test_walker_departure_can_finish_the_level() {
        let mut session = new_session();
        for (id, name) in [(1, "Ann"), (2, "Ben"), (3, "Cat")] {
            session.join(id, name.to_string(), "red".to_string());
        }
        session.start(0).unwrap();
        session.maze = Some(corridor(2));
        let walkers: Vec<PlayerId> = session
            .player_ids()
            .into_iter()
            .filter(|id| session.player(*id).unwrap().role == Role::Walker)
            .collect();

        session.move_player(walkers[0], 1, 0, 0).unwrap();
        let out = session.leave(walkers[1], 0);

        assert_eq!(session.level(), 2);
        assert!(matches!(
            out.last().map(|d| &d.packet),
            Some(Packet::GameStarted { .. })
        ));
    }

    #[test]
    fn test_last_departure_disarms_timers() {
        let (mut session, walker, leader) = playing_on(corridor(4));
        session.leave(walker, 0);
        assert!(session.timers_armed());

        assert!(session.leave(leader, 0).is_empty());
        assert!(session.is_empty());
        assert!(!session.timers_armed());
        assert!(session.leave(leader, 0).is_empty());
    }

    #[test]
    fn test_wall_shift_never_strands_walkers() {
        let mut session = new_session();
        session.join(1, "Ann".to_string(), "red".to_string());
        session.join(2, "Ben".to_string(), "blue".to_string());
        session.start(0).unwrap();
        if let Some(maze) = session.maze.as_mut() {
            maze.toggle_doors();
        }

        for _ in 0..30 {
            let out = session.shift_walls();
            assert!(out.is_empty() || out.len() == 2);
            let maze = session.maze().unwrap();
            assert!(maze.walls_mirrored());
            let walkers: Vec<Position> = session
                .player_ids()
                .into_iter()
                .filter_map(|id| session.player(id))
                .filter(|p| p.role == Role::Walker)
                .map(|p| p.position)
                .collect();
            assert!(mutator::keeps_everyone_connected(maze, &walkers));
        }
    }

    #[test]
    fn test_snapshot_mirrors_state() {
        let (session, walker, _) = playing_on(corridor(4));
        let snap = session.snapshot();
        assert_eq!(snap.status, GameStatus::Playing);
        assert_eq!(snap.lives, STARTING_LIVES);
        assert_eq!(snap.time_limit, DEFAULT_TIME_LIMIT_SECS);
        assert_eq!(snap.config.width, DEFAULT_MAZE_WIDTH);
        assert_eq!(snap.players.len(), 2);
        assert_eq!(snap.players[&walker].role, Role::Walker);
    }
}
