//! Breadth-first reachability over a [`Grid`]
//!
//! An edge is crossed only when neither side has a wall and the destination
//! tile is not in the caller's `blocked` set. The starting cell itself is never
//! checked against `blocked`, so a player standing on a door can still leave it.

use crate::maze::{Direction, Grid, Position, TileKind};
use std::collections::{HashMap, HashSet, VecDeque};

const TRAPS: &[TileKind] = &[TileKind::Trap];
const TRAPS_AND_DOORS: &[TileKind] = &[TileKind::Trap, TileKind::Door];

fn can_step(grid: &Grid, from: Position, dir: Direction, blocked: &[TileKind]) -> Option<Position> {
    if !grid.is_passage(from, dir) {
        return None;
    }
    let next = grid.neighbor(from, dir)?;
    if blocked.contains(&grid.kind(next)) {
        None
    } else {
        Some(next)
    }
}

/// Every cell reachable from `from`, including `from` itself
pub fn reachable(grid: &Grid, from: Position, blocked: &[TileKind]) -> HashSet<Position> {
    let mut visited = HashSet::new();
    if !grid.contains(from) {
        return visited;
    }

    let mut queue = VecDeque::new();
    visited.insert(from);
    queue.push_back(from);

    while let Some(current) = queue.pop_front() {
        for dir in Direction::ALL {
            if let Some(next) = can_step(grid, current, dir, blocked) {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
    }

    visited
}

/// Shortest path from `from` to `to`, both ends included.
/// Returns an empty vector when `to` cannot be reached.
pub fn shortest_path(
    grid: &Grid,
    from: Position,
    to: Position,
    blocked: &[TileKind],
) -> Vec<Position> {
    if !grid.contains(from) || !grid.contains(to) {
        return Vec::new();
    }

    let mut came_from: HashMap<Position, Position> = HashMap::new();
    let mut visited = HashSet::from([from]);
    let mut queue = VecDeque::from([from]);

    while let Some(current) = queue.pop_front() {
        if current == to {
            let mut path = vec![current];
            let mut cursor = current;
            while let Some(prev) = came_from.get(&cursor) {
                path.push(*prev);
                cursor = *prev;
            }
            path.reverse();
            return path;
        }

        for dir in Direction::ALL {
            if let Some(next) = can_step(grid, current, dir, blocked) {
                if visited.insert(next) {
                    came_from.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
    }

    Vec::new()
}

pub fn is_reachable(grid: &Grid, from: Position, to: Position, blocked: &[TileKind]) -> bool {
    reachable(grid, from, blocked).contains(&to)
}

/// The next cell a walker at `from` holding `keys` should step onto to make
/// progress toward the exit: straight for the exit when the keys suffice,
/// otherwise toward the nearest key. Traps are always avoided.
/// Returns `None` when standing on the exit or when nothing useful is reachable.
pub fn guide_step(grid: &Grid, from: Position, keys: u32) -> Option<Position> {
    let exit = grid.exit();
    if from == exit {
        return None;
    }

    let blocked = if keys > 0 { TRAPS } else { TRAPS_AND_DOORS };

    let to_exit = shortest_path(grid, from, exit, blocked);
    if to_exit.len() > 1 {
        return Some(to_exit[1]);
    }

    grid.positions_of(TileKind::Key)
        .into_iter()
        .map(|key| shortest_path(grid, from, key, TRAPS_AND_DOORS))
        .filter(|path| path.len() > 1)
        .min_by_key(|path| path.len())
        .map(|path| path[1])
}
