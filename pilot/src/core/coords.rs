//! Logical (1920x1080) to device pixel mapping, plus the logical layout of
//! the game's touch targets.

use serde::{Deserialize, Serialize};

use crate::core::error::ExecutionError;
use crate::core::types::{Action, ActionType, Position};

/// Pixel dimensions of a capture surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
}

/// Resolution all logical coordinates are expressed in.
pub const REFERENCE: Surface = Surface {
    width: 1920,
    height: 1080,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LogicalPoint {
    pub x: f64,
    pub y: f64,
}

impl LogicalPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DevicePoint {
    pub x: f64,
    pub y: f64,
}

impl DevicePoint {
    /// Integer pixel, rounded at dispatch time.
    pub fn pixel(self) -> (i64, i64) {
        (self.x.round() as i64, self.y.round() as i64)
    }
}

/// Affine scale from logical to device coordinates, cached per surface.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateNormalizer {
    surface: Surface,
    scale_x: f64,
    scale_y: f64,
}

impl Default for CoordinateNormalizer {
    fn default() -> Self {
        Self::new(REFERENCE)
    }
}

impl CoordinateNormalizer {
    pub fn new(surface: Surface) -> Self {
        let mut normalizer = Self {
            surface: REFERENCE,
            scale_x: 1.0,
            scale_y: 1.0,
        };
        normalizer.observe(surface);
        normalizer
    }

    /// Record the surface seen this cycle. Recomputes the scale only when the
    /// dimensions changed; degenerate surfaces are ignored. Returns whether
    /// the scale was recomputed.
    pub fn observe(&mut self, surface: Surface) -> bool {
        if surface == self.surface || surface.width == 0 || surface.height == 0 {
            return false;
        }
        self.surface = surface;
        self.scale_x = f64::from(surface.width) / f64::from(REFERENCE.width);
        self.scale_y = f64::from(surface.height) / f64::from(REFERENCE.height);
        true
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    pub fn to_device(&self, point: LogicalPoint) -> DevicePoint {
        DevicePoint {
            x: point.x * self.scale_x,
            y: point.y * self.scale_y,
        }
    }

    pub fn to_logical(&self, point: DevicePoint) -> LogicalPoint {
        LogicalPoint {
            x: point.x / self.scale_x,
            y: point.y / self.scale_y,
        }
    }
}

/// A touch interaction in logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Tap(LogicalPoint),
    Drag { from: LogicalPoint, to: LogicalPoint },
}

/// Logical positions of the interactive regions on the reference screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub shop_origin: LogicalPoint,
    pub shop_slot_width: f64,
    pub shop_slot_height: f64,
    pub shop_slot_gap: f64,
    pub board_origin: LogicalPoint,
    pub board_cell: f64,
    pub bench_origin: LogicalPoint,
    pub bench_slot_width: f64,
    pub bench_slot_height: f64,
    pub bench_slot_gap: f64,
    pub refresh_button: LogicalPoint,
    pub experience_button: LogicalPoint,
    /// Dropping a hero here sells it.
    pub sell_zone: LogicalPoint,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            shop_origin: LogicalPoint::new(240.0, 940.0),
            shop_slot_width: 280.0,
            shop_slot_height: 120.0,
            shop_slot_gap: 10.0,
            board_origin: LogicalPoint::new(240.0, 200.0),
            board_cell: 160.0,
            bench_origin: LogicalPoint::new(240.0, 850.0),
            bench_slot_width: 120.0,
            bench_slot_height: 80.0,
            bench_slot_gap: 5.0,
            refresh_button: LogicalPoint::new(200.0, 1000.0),
            experience_button: LogicalPoint::new(200.0, 930.0),
            sell_zone: LogicalPoint::new(960.0, 1000.0),
        }
    }
}

impl Layout {
    /// Center of a board, bench or shop position.
    pub fn point(&self, position: Position) -> LogicalPoint {
        match position {
            Position::Shop { slot } => self.shop_origin.offset(
                f64::from(slot) * (self.shop_slot_width + self.shop_slot_gap)
                    + self.shop_slot_width / 2.0,
                self.shop_slot_height / 2.0,
            ),
            Position::Board { row, col } => self.board_origin.offset(
                f64::from(col) * self.board_cell + self.board_cell / 2.0,
                f64::from(row) * self.board_cell + self.board_cell / 2.0,
            ),
            Position::Bench { index } => self.bench_origin.offset(
                f64::from(index) * (self.bench_slot_width + self.bench_slot_gap)
                    + self.bench_slot_width / 2.0,
                self.bench_slot_height / 2.0,
            ),
        }
    }

    /// The gesture that performs `action`.
    pub fn gesture(&self, action: &Action) -> Result<Gesture, ExecutionError> {
        let missing = || ExecutionError::NoTarget(action.kind().to_string());
        match action.kind() {
            ActionType::BuyHero => {
                let slot = action.position().ok_or_else(missing)?;
                Ok(Gesture::Tap(self.point(slot)))
            }
            ActionType::SellHero => Ok(Gesture::Drag {
                from: self.point(action.position().ok_or_else(missing)?),
                to: self.sell_zone,
            }),
            ActionType::MoveHero => Ok(Gesture::Drag {
                from: self.point(action.position().ok_or_else(missing)?),
                to: self.point(action.destination().ok_or_else(missing)?),
            }),
            ActionType::LevelUp | ActionType::BuyExperience => {
                Ok(Gesture::Tap(self.experience_button))
            }
            ActionType::RefreshShop => Ok(Gesture::Tap(self.refresh_button)),
            ActionType::None => Err(missing()),
        }
    }
}
