//! Gesture synthesis
//!
//! Logical interactions become ordered pointer-action sequences. Points are
//! given in grid coordinates and emitted in backend pixel space.

use devrig_core::{DeviceInfo, Point, SwipeDirection};

/// Pause between press and release of a tap
pub const TAP_PAUSE_MS: u64 = 150;

/// Hold duration of a long press
pub const LONG_PRESS_MS: u64 = 3000;

/// Duration of the swipe behind `scroll_vertical`
pub const SCROLL_DURATION_MS: u64 = 400;

/// A single pointer action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAction {
    /// Move to an absolute point over `duration_ms`
    Move { x: i32, y: i32, duration_ms: u64 },
    Down,
    Pause { duration_ms: u64 },
    Up,
}

/// Ordered pointer actions for one finger
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GestureSequence {
    pub actions: Vec<PointerAction>,
}

impl GestureSequence {
    /// Start point of the gesture
    pub fn start(&self) -> Option<Point> {
        self.actions.iter().find_map(|a| match a {
            PointerAction::Move { x, y, .. } => Some(Point::new(*x, *y)),
            _ => None,
        })
    }

    /// End point and travel duration, when the gesture moves after pressing
    pub fn travel(&self) -> Option<(Point, u64)> {
        let mut pressed = false;
        for action in &self.actions {
            match action {
                PointerAction::Down => pressed = true,
                PointerAction::Move {
                    x,
                    y,
                    duration_ms,
                } if pressed => return Some((Point::new(*x, *y), *duration_ms)),
                _ => {}
            }
        }
        None
    }

    /// Total pause between press and release
    pub fn hold_ms(&self) -> u64 {
        self.actions
            .iter()
            .map(|a| match a {
                PointerAction::Pause { duration_ms } => *duration_ms,
                _ => 0,
            })
            .sum()
    }
}

/// Builds gesture sequences for one device
#[derive(Debug, Clone, Copy)]
pub struct GestureSynthesizer {
    info: DeviceInfo,
}

impl GestureSynthesizer {
    pub fn new(info: DeviceInfo) -> Self {
        Self { info }
    }

    fn to_pixels(&self, point: Point) -> Point {
        self.info.grid_to_pixels(point)
    }

    /// move(0) → down → pause(150) → up
    pub fn tap(&self, point: Point) -> GestureSequence {
        let p = self.to_pixels(point);
        GestureSequence {
            actions: vec![
                PointerAction::Move {
                    x: p.x,
                    y: p.y,
                    duration_ms: 0,
                },
                PointerAction::Down,
                PointerAction::Pause {
                    duration_ms: TAP_PAUSE_MS,
                },
                PointerAction::Up,
            ],
        }
    }

    /// move(0) → down → move(duration) → up
    pub fn swipe(&self, start: Point, end: Point, duration_ms: u64) -> GestureSequence {
        let s = self.to_pixels(start);
        let e = self.to_pixels(end);
        GestureSequence {
            actions: vec![
                PointerAction::Move {
                    x: s.x,
                    y: s.y,
                    duration_ms: 0,
                },
                PointerAction::Down,
                PointerAction::Move {
                    x: e.x,
                    y: e.y,
                    duration_ms,
                },
                PointerAction::Up,
            ],
        }
    }

    /// A swipe from a point to itself held for [`LONG_PRESS_MS`]
    pub fn long_press(&self, point: Point) -> GestureSequence {
        self.swipe(point, point, LONG_PRESS_MS)
    }

    pub fn directional(&self, direction: SwipeDirection, duration_ms: u64) -> GestureSequence {
        let (start, end) = directional_endpoints(&self.info, direction);
        self.swipe(start, end, duration_ms)
    }

    pub fn from_element(
        &self,
        element: Point,
        direction: SwipeDirection,
        duration_ms: u64,
    ) -> GestureSequence {
        let (start, end) = element_endpoints(&self.info, element, direction);
        self.swipe(start, end, duration_ms)
    }
}

/// Grid endpoints of a full-screen swipe
pub fn directional_endpoints(info: &DeviceInfo, direction: SwipeDirection) -> (Point, Point) {
    let ((sx, sy), (ex, ey)) = match direction {
        SwipeDirection::Up => ((0.5, 0.5), (0.5, 0.1)),
        SwipeDirection::Down => ((0.5, 0.2), (0.5, 0.9)),
        SwipeDirection::Right => ((0.1, 0.5), (0.9, 0.5)),
        SwipeDirection::Left => ((0.9, 0.5), (0.1, 0.5)),
    };
    (info.grid_point(sx, sy), info.grid_point(ex, ey))
}

/// Grid endpoints of a swipe anchored at an element, projected to the screen edge
pub fn element_endpoints(
    info: &DeviceInfo,
    element: Point,
    direction: SwipeDirection,
) -> (Point, Point) {
    let end = match direction {
        SwipeDirection::Up => Point::new(element.x, info.grid_point(0.0, 0.1).y),
        SwipeDirection::Down => Point::new(element.x, info.grid_point(0.0, 0.9).y),
        SwipeDirection::Right => Point::new(info.grid_point(0.9, 0.0).x, element.y),
        SwipeDirection::Left => Point::new(info.grid_point(0.1, 0.0).x, element.y),
    };
    (element, end)
}
