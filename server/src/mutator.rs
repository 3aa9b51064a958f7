//! Periodic wall shifting on a live maze
//!
//! Each shift proposes a handful of single-wall toggles. A toggle is kept only
//! if, for the start cell and every walker, nothing about the route to the
//! exit gets worse:
//! - a source that reaches the exit with closed doors impassable still does
//! - a source that does not reach it that way still does not, so locked doors
//!   are never bypassed
//! - a source that can finish by collecting keys and unlocking doors still can
//!
//! Rejected toggles are reverted on the spot, so a shift never strands a
//! player or softlocks the maze.

use rand::seq::SliceRandom;
use rand::Rng;
use shared::path::reachable;
use shared::{Direction, Grid, Position, TileKind};

pub const MAX_ATTEMPTS: usize = 10;
pub const TARGET_CHANGES: usize = 5;
/// Cells with `x + y` at or below this are never touched
pub const START_BUFFER: usize = 2;

const IMPASSABLE: [TileKind; 1] = [TileKind::Door];

/// Outcome of one shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WallShift {
    pub attempts: usize,
    pub applied: usize,
}

/// How a single cell stands with respect to the exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reach {
    /// Exit reachable without passing a closed door
    direct: bool,
    /// Exit reachable by picking up keys and unlocking doors on the way
    with_keys: bool,
}

impl Reach {
    fn of(grid: &Grid, from: Position) -> Self {
        let direct = reachable(grid, from, &IMPASSABLE).contains(&grid.exit());
        Self {
            direct,
            with_keys: direct || solvable_with_keys(grid, from),
        }
    }

    fn preserved_by(self, after: Reach) -> bool {
        self.direct == after.direct && (!self.with_keys || after.with_keys)
    }
}

/// True when the exit is reachable from the start and from every walker
/// without crossing a closed door
pub fn keeps_everyone_connected(grid: &Grid, walkers: &[Position]) -> bool {
    let exit = grid.exit();
    sources(grid, walkers).all(|from| reachable(grid, from, &IMPASSABLE).contains(&exit))
}

/// Whether a player at `from` holding no keys can reach the exit by
/// repeatedly collecting every key in reach and unlocking a bordering door.
///
/// Doors are opened greedily, so a maze with more doors than keys may be
/// judged unsolvable even when a careful route exists.
pub fn solvable_with_keys(grid: &Grid, from: Position) -> bool {
    let exit = grid.exit();
    let mut scratch = grid.clone();
    let mut spent = 0;

    loop {
        let region = reachable(&scratch, from, &IMPASSABLE);
        if region.contains(&exit) {
            return true;
        }

        let keys = region
            .iter()
            .filter(|pos| scratch.kind(**pos) == TileKind::Key)
            .count();
        if keys <= spent {
            return false;
        }

        let bordering = scratch.positions_of(TileKind::Door).into_iter().find(|door| {
            Direction::ALL.into_iter().any(|dir| {
                scratch.is_passage(*door, dir)
                    && scratch
                        .neighbor(*door, dir)
                        .map_or(false, |next| region.contains(&next))
            })
        });
        match bordering {
            Some(door) => {
                scratch.set_kind(door, TileKind::OpenDoor);
                spent += 1;
            }
            None => return false,
        }
    }
}

/// Toggles the wall on `dir` of `pos` and keeps it only when every source's
/// standing toward the exit is preserved. Returns whether the toggle stuck.
pub fn try_toggle(grid: &mut Grid, walkers: &[Position], pos: Position, dir: Direction) -> bool {
    let mut standing = survey(grid, walkers);
    toggle_checked(grid, walkers, pos, dir, &mut standing)
}

/// Runs one bounded round of validated wall toggles
pub fn shift_walls<R: Rng + ?Sized>(grid: &mut Grid, walkers: &[Position], rng: &mut R) -> WallShift {
    let mut shift = WallShift::default();
    let exit = grid.exit();
    let mut standing = survey(grid, walkers);

    while shift.attempts < MAX_ATTEMPTS && shift.applied < TARGET_CHANGES {
        shift.attempts += 1;

        let pos = Position::new(
            rng.gen_range(0..grid.width()),
            rng.gen_range(0..grid.height()),
        );
        if pos.x + pos.y <= START_BUFFER || pos == exit {
            continue;
        }

        let Some(&dir) = Direction::ALL.choose(rng) else {
            continue;
        };
        if toggle_checked(grid, walkers, pos, dir, &mut standing) {
            shift.applied += 1;
        }
    }

    shift
}

fn survey(grid: &Grid, walkers: &[Position]) -> Vec<Reach> {
    sources(grid, walkers).map(|from| Reach::of(grid, from)).collect()
}

/// `standing` holds the current reach of each source and is refreshed when
/// the toggle is kept
fn toggle_checked(
    grid: &mut Grid,
    walkers: &[Position],
    pos: Position,
    dir: Direction,
    standing: &mut Vec<Reach>,
) -> bool {
    if !grid.toggle_wall(pos, dir) {
        return false;
    }

    let mut after = Vec::with_capacity(standing.len());
    for (from, was) in sources(grid, walkers).zip(standing.iter()) {
        let now = Reach::of(grid, from);
        if !was.preserved_by(now) {
            grid.toggle_wall(pos, dir);
            return false;
        }
        after.push(now);
    }

    *standing = after;
    true
}

fn sources<'a>(grid: &Grid, walkers: &'a [Position]) -> impl Iterator<Item = Position> + 'a {
    std::iter::once(grid.start()).chain(walkers.iter().copied())
}
