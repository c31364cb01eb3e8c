//! Rectangle-based directional focus search.
//!
//! The widget tree reports on-screen rectangles per pane; candidates in
//! the travel direction are filtered to those sharing a perpendicular
//! range with the active pane, then ranked by Manhattan distance between
//! centers. Structural tree navigation is the fallback when no geometry
//! is available.

use super::{Direction, PaneId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    fn x_overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.width && other.x < self.x + self.width
    }

    fn y_overlaps(&self, other: &Rect) -> bool {
        self.y < other.y + other.height && other.y < self.y + self.height
    }
}

/// Pick the pane to focus when moving `direction` from `active`, given
/// the visible rectangles. Panes whose perpendicular range overlaps the
/// active pane win; the closest center by Manhattan distance is chosen.
pub fn find_in_direction(
    active: &str,
    rects: &[(PaneId, Rect)],
    direction: Direction,
) -> Option<PaneId> {
    let (_, origin) = rects.iter().find(|(id, _)| id == active)?;
    let origin = *origin;
    let (ox, oy) = origin.center();

    let mut best: Option<(&PaneId, f64, bool)> = None;
    for (id, rect) in rects {
        if id == active {
            continue;
        }
        let (cx, cy) = rect.center();
        let ahead = match direction {
            Direction::Left => cx < ox,
            Direction::Right => cx > ox,
            Direction::Up => cy < oy,
            Direction::Down => cy > oy,
        };
        if !ahead {
            continue;
        }
        let overlaps = match direction {
            Direction::Left | Direction::Right => rect.y_overlaps(&origin),
            Direction::Up | Direction::Down => rect.x_overlaps(&origin),
        };
        let distance = (cx - ox).abs() + (cy - oy).abs();

        let better = match &best {
            None => true,
            // Overlapping candidates always beat non-overlapping ones.
            Some((_, best_dist, best_overlaps)) => match (overlaps, best_overlaps) {
                (true, false) => true,
                (false, true) => false,
                _ => distance < *best_dist,
            },
        };
        if better {
            best = Some((id, distance, overlaps));
        }
    }

    best.map(|(id, _, _)| id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rects() -> Vec<(PaneId, Rect)> {
        // +-------+-------+
        // |  a    |   b   |
        // |       +-------+
        // |       |   c   |
        // +-------+-------+
        vec![
            ("a".to_string(), Rect::new(0.0, 0.0, 100.0, 100.0)),
            ("b".to_string(), Rect::new(100.0, 0.0, 100.0, 50.0)),
            ("c".to_string(), Rect::new(100.0, 50.0, 100.0, 50.0)),
        ]
    }

    #[test]
    fn test_right_prefers_y_overlap() {
        let rects = rects();
        // a's center is at y=50; both b and c overlap its y-range, b's
        // center (25) and c's center (75) are equidistant in y but b wins
        // on total distance tie-break ordering being stable is not
        // required, so move from c instead for a deterministic case.
        assert_eq!(
            find_in_direction("c", &rects, Direction::Left),
            Some("a".to_string())
        );
        assert_eq!(
            find_in_direction("b", &rects, Direction::Down),
            Some("c".to_string())
        );
        assert_eq!(
            find_in_direction("c", &rects, Direction::Up),
            Some("b".to_string())
        );
    }

    #[test]
    fn test_no_candidate_past_edge() {
        let rects = rects();
        assert_eq!(find_in_direction("a", &rects, Direction::Left), None);
        assert_eq!(find_in_direction("b", &rects, Direction::Up), None);
    }

    #[test]
    fn test_overlap_beats_closer_non_overlap() {
        let rects = vec![
            ("a".to_string(), Rect::new(0.0, 0.0, 100.0, 40.0)),
            // Far to the right but sharing a's y-range.
            ("b".to_string(), Rect::new(300.0, 0.0, 100.0, 40.0)),
            // Near but entirely below a's y-range.
            ("c".to_string(), Rect::new(110.0, 200.0, 100.0, 40.0)),
        ];
        assert_eq!(
            find_in_direction("a", &rects, Direction::Right),
            Some("b".to_string())
        );
    }

    #[test]
    fn test_unknown_active_pane() {
        assert_eq!(find_in_direction("zzz", &rects(), Direction::Right), None);
    }
}
