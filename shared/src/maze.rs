//! Maze lattice shared by server and clients
//!
//! A [`Grid`] is a W×H array of [`Cell`]s stored row-major. Every cell carries
//! four wall flags and a [`TileKind`]. Walls between two neighbours are always
//! mirrored: if cell A has no wall facing B, B has no wall facing A. All wall
//! edits go through [`Grid::set_wall`] / [`Grid::toggle_wall`] which update
//! both sides at once.

use serde::{Deserialize, Serialize};

/// What occupies a cell besides its walls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileKind {
    Empty,
    Start,
    Exit,
    Trap,
    Door,
    OpenDoor,
    Switch,
    Key,
}

/// One of the four sides of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Top,
    Right,
    Bottom,
    Left,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Top,
        Direction::Right,
        Direction::Bottom,
        Direction::Left,
    ];

    pub fn opposite(self) -> Self {
        match self {
            Direction::Top => Direction::Bottom,
            Direction::Right => Direction::Left,
            Direction::Bottom => Direction::Top,
            Direction::Left => Direction::Right,
        }
    }

    /// Column/row delta when stepping through this side
    pub fn offset(self) -> (isize, isize) {
        match self {
            Direction::Top => (0, -1),
            Direction::Right => (1, 0),
            Direction::Bottom => (0, 1),
            Direction::Left => (-1, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Walls {
    pub top: bool,
    pub right: bool,
    pub bottom: bool,
    pub left: bool,
}

impl Walls {
    pub fn all() -> Self {
        Self {
            top: true,
            right: true,
            bottom: true,
            left: true,
        }
    }

    pub fn get(&self, dir: Direction) -> bool {
        match dir {
            Direction::Top => self.top,
            Direction::Right => self.right,
            Direction::Bottom => self.bottom,
            Direction::Left => self.left,
        }
    }

    pub fn set(&mut self, dir: Direction, present: bool) {
        match dir {
            Direction::Top => self.top = present,
            Direction::Right => self.right = present,
            Direction::Bottom => self.bottom = present,
            Direction::Left => self.left = present,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub walls: Walls,
    pub kind: TileKind,
}

impl Cell {
    /// A fully walled, empty cell
    pub fn new() -> Self {
        Self {
            walls: Walls::all(),
            kind: TileKind::Empty,
        }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::new()
    }
}

/// Cell coordinates, (0,0) is the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0, y: 0 };

    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    pub fn manhattan(self, other: Position) -> usize {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl Grid {
    /// Creates a grid with every wall standing and every tile empty
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::new(); width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn start(&self) -> Position {
        Position::ORIGIN
    }

    pub fn exit(&self) -> Position {
        Position::new(self.width.saturating_sub(1), self.height.saturating_sub(1))
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos.x < self.width && pos.y < self.height
    }

    /// Converts client-supplied signed coordinates, rejecting anything off the grid
    pub fn position(&self, x: i32, y: i32) -> Option<Position> {
        let pos = Position::new(usize::try_from(x).ok()?, usize::try_from(y).ok()?);
        self.contains(pos).then_some(pos)
    }

    fn index(&self, pos: Position) -> usize {
        pos.y * self.width + pos.x
    }

    pub fn get(&self, pos: Position) -> Option<&Cell> {
        if self.contains(pos) {
            self.cells.get(self.index(pos))
        } else {
            None
        }
    }

    /// Tile kind at `pos`. Panics if `pos` is outside the grid.
    pub fn kind(&self, pos: Position) -> TileKind {
        self.cells[self.index(pos)].kind
    }

    pub fn set_kind(&mut self, pos: Position, kind: TileKind) {
        let idx = self.index(pos);
        self.cells[idx].kind = kind;
    }

    pub fn neighbor(&self, pos: Position, dir: Direction) -> Option<Position> {
        let (dx, dy) = dir.offset();
        let x = pos.x.checked_add_signed(dx)?;
        let y = pos.y.checked_add_signed(dy)?;
        let next = Position::new(x, y);
        self.contains(next).then_some(next)
    }

    /// Side of `from` that faces `to`, if the two cells are orthogonally adjacent
    pub fn direction_to(&self, from: Position, to: Position) -> Option<Direction> {
        Direction::ALL
            .into_iter()
            .find(|dir| self.neighbor(from, *dir) == Some(to))
    }

    /// True when a neighbour exists on `dir` and neither side has a wall
    pub fn is_passage(&self, pos: Position, dir: Direction) -> bool {
        match self.neighbor(pos, dir) {
            Some(next) => {
                !self.cells[self.index(pos)].walls.get(dir)
                    && !self.cells[self.index(next)].walls.get(dir.opposite())
            }
            None => false,
        }
    }

    /// Sets the wall shared by `pos` and its neighbour on `dir`, on both sides.
    /// Returns false (and changes nothing) when there is no neighbour.
    pub fn set_wall(&mut self, pos: Position, dir: Direction, present: bool) -> bool {
        let Some(next) = self.neighbor(pos, dir) else {
            return false;
        };
        let here = self.index(pos);
        let there = self.index(next);
        self.cells[here].walls.set(dir, present);
        self.cells[there].walls.set(dir.opposite(), present);
        true
    }

    /// Flips the shared wall on `dir`. Returns false when there is no neighbour.
    pub fn toggle_wall(&mut self, pos: Position, dir: Direction) -> bool {
        if self.neighbor(pos, dir).is_none() {
            return false;
        }
        let present = self.cells[self.index(pos)].walls.get(dir);
        self.set_wall(pos, dir, !present)
    }

    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| Position::new(x, y)))
    }

    pub fn positions_of(&self, kind: TileKind) -> Vec<Position> {
        self.positions().filter(|p| self.kind(*p) == kind).collect()
    }

    pub fn count_kind(&self, kind: TileKind) -> usize {
        self.cells.iter().filter(|c| c.kind == kind).count()
    }

    /// Swaps every closed door with an open one and vice versa.
    /// Returns how many tiles changed.
    pub fn toggle_doors(&mut self) -> usize {
        let mut changed = 0;
        for cell in &mut self.cells {
            cell.kind = match cell.kind {
                TileKind::Door => TileKind::OpenDoor,
                TileKind::OpenDoor => TileKind::Door,
                other => other,
            };
            if matches!(cell.kind, TileKind::Door | TileKind::OpenDoor) {
                changed += 1;
            }
        }
        changed
    }

    /// Checks the bidirectional wall invariant over every adjacent pair
    pub fn walls_mirrored(&self) -> bool {
        self.positions().all(|pos| {
            [Direction::Right, Direction::Bottom].into_iter().all(|dir| {
                match self.neighbor(pos, dir) {
                    Some(next) => {
                        self.cells[self.index(pos)].walls.get(dir)
                            == self.cells[self.index(next)].walls.get(dir.opposite())
                    }
                    None => true,
                }
            })
        })
    }
}
