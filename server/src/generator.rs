//! Procedural maze generation
//!
//! Mazes are carved with a randomized depth-first "recursive backtracker",
//! which yields a spanning tree over every cell. Special tiles are then placed
//! so the maze stays solvable from a cold start:
//! - traps never sit on the start→exit solution path
//! - doors always sit on the solution path
//! - every door's key is reachable without crossing a closed door or a trap
//!
//! All randomness comes from the caller's RNG so a seeded generator always
//! produces the same maze.

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::path::{reachable, shortest_path};
use shared::{Direction, Grid, Position, TileKind};
use std::collections::HashSet;

/// One trap attempt per this many cells
pub const TRAP_DENSITY_DIVISOR: usize = 20;
/// Cells with `x + y` below this stay trap free
pub const TRAP_START_CLEARANCE: usize = 3;
pub const DOOR_COUNT: usize = 2;
/// Solution-path cells kept door free at each end
pub const DOOR_ENDPOINT_MARGIN: usize = 4;
/// Minimum distance between two doors, in solution-path steps
pub const DOOR_SPACING: usize = 5;
pub const MIN_DIMENSION: usize = 2;

/// Tiles a player cannot pass on the way to a key
const KEY_ROUTE_BLOCKERS: [TileKind; 2] = [TileKind::Door, TileKind::Trap];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("maze of {width}x{height} is too small, both sides must be at least 2")]
    TooSmall { width: usize, height: usize },

    #[error("no route from start to exit in generated maze")]
    Unsolvable,
}

/// Builds a complete, solvable maze of the given size
pub fn generate_maze<R: Rng + ?Sized>(
    width: usize,
    height: usize,
    rng: &mut R,
) -> Result<Grid, GenerationError> {
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(GenerationError::TooSmall { width, height });
    }

    let mut grid = Grid::new(width, height);
    carve_passages(&mut grid, rng);

    let start = grid.start();
    let exit = grid.exit();
    grid.set_kind(start, TileKind::Start);
    grid.set_kind(exit, TileKind::Exit);

    let solution = shortest_path(&grid, start, exit, &[]);
    if solution.is_empty() {
        return Err(GenerationError::Unsolvable);
    }

    let traps = place_traps(&mut grid, &solution, rng);
    let doors = place_doors(&mut grid, &solution, rng);
    let keys = place_keys(&mut grid, &doors, rng);

    debug!(
        "Generated {}x{} maze: solution {} cells, {} traps, {} doors, {} keys",
        width,
        height,
        solution.len(),
        traps,
        grid.count_kind(TileKind::Door),
        keys
    );

    Ok(grid)
}

/// Iterative recursive backtracker starting from (0,0)
fn carve_passages<R: Rng + ?Sized>(grid: &mut Grid, rng: &mut R) {
    let width = grid.width();
    let mut visited = vec![false; width * grid.height()];
    let start = grid.start();
    visited[start.y * width + start.x] = true;
    let mut stack = vec![start];

    while let Some(&current) = stack.last() {
        let unvisited: Vec<(Direction, Position)> = Direction::ALL
            .into_iter()
            .filter_map(|dir| grid.neighbor(current, dir).map(|next| (dir, next)))
            .filter(|(_, next)| !visited[next.y * width + next.x])
            .collect();

        match unvisited.choose(rng) {
            Some(&(dir, next)) => {
                grid.set_wall(current, dir, false);
                visited[next.y * width + next.x] = true;
                stack.push(next);
            }
            None => {
                stack.pop();
            }
        }
    }
}

/// Scatters traps off the solution path. Returns how many were placed;
/// repeated or ineligible picks are simply skipped.
fn place_traps<R: Rng + ?Sized>(grid: &mut Grid, solution: &[Position], rng: &mut R) -> usize {
    let on_path: HashSet<Position> = solution.iter().copied().collect();
    let exit = grid.exit();
    let attempts = grid.width() * grid.height() / TRAP_DENSITY_DIVISOR;
    let mut placed = 0;

    for _ in 0..attempts {
        let pos = Position::new(
            rng.gen_range(0..grid.width()),
            rng.gen_range(0..grid.height()),
        );

        if pos.x + pos.y < TRAP_START_CLEARANCE || pos == exit || on_path.contains(&pos) {
            continue;
        }

        if grid.kind(pos) == TileKind::Empty {
            grid.set_kind(pos, TileKind::Trap);
            placed += 1;
        }
    }

    placed
}

/// Puts up to [`DOOR_COUNT`] doors on interior solution-path cells.
/// Returns the door cells in placement order.
fn place_doors<R: Rng + ?Sized>(
    grid: &mut Grid,
    solution: &[Position],
    rng: &mut R,
) -> Vec<Position> {
    let upper = solution.len().saturating_sub(DOOR_ENDPOINT_MARGIN);
    let mut indices: Vec<usize> = (DOOR_ENDPOINT_MARGIN + 1..upper).collect();
    indices.shuffle(rng);

    let mut doors: Vec<(Position, usize)> = Vec::with_capacity(DOOR_COUNT);
    for idx in indices {
        if doors.len() >= DOOR_COUNT {
            break;
        }
        if doors.iter().any(|(_, other)| other.abs_diff(idx) < DOOR_SPACING) {
            continue;
        }

        let pos = solution[idx];
        if grid.kind(pos) == TileKind::Empty {
            grid.set_kind(pos, TileKind::Door);
            doors.push((pos, idx));
        }
    }

    doors.into_iter().map(|(pos, _)| pos).collect()
}

/// Places one key per door. Each key lands in the area reachable from the
/// start with the doors still to be processed closed; the door just handled
/// is opened temporarily so later keys may sit deeper. A door that gets no key
/// is removed so the maze can never softlock. Returns the number of keys placed.
fn place_keys<R: Rng + ?Sized>(grid: &mut Grid, doors: &[Position], rng: &mut R) -> usize {
    let start = grid.start();
    let mut kept = Vec::with_capacity(doors.len());

    for &door in doors {
        let area = reachable(grid, start, &KEY_ROUTE_BLOCKERS);
        let candidates: Vec<Position> = grid
            .positions()
            .filter(|pos| {
                grid.kind(*pos) == TileKind::Empty && area.contains(pos) && !doors.contains(pos)
            })
            .collect();

        match candidates.choose(rng) {
            Some(&key) => {
                grid.set_kind(key, TileKind::Key);
                kept.push(door);
            }
            None => debug!("No room for a key before door at {:?}, dropping it", door),
        }

        grid.set_kind(door, TileKind::Empty);
    }

    for &door in &kept {
        grid.set_kind(door, TileKind::Door);
    }

    kept.len()
}
