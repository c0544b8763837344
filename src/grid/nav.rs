use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridPos {
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Enter,
    ArrowDown,
    ArrowUp,
    Tab,
    ShiftTab,
}

impl NavKey {
    /// Maps a DOM-style key name. Keys the grid does not handle yield `None`.
    pub fn parse(key: &str, shift: bool) -> Option<Self> {
        match key {
            "Enter" => Some(Self::Enter),
            "ArrowDown" => Some(Self::ArrowDown),
            "ArrowUp" => Some(Self::ArrowUp),
            "Tab" if shift => Some(Self::ShiftTab),
            "Tab" => Some(Self::Tab),
            _ => None,
        }
    }
}

/// Target cell for `key` pressed on `from`. Moves past an edge stay put.
pub fn navigate(from: GridPos, key: NavKey, rows: usize, cols: usize) -> GridPos {
    if from.row >= rows || from.col >= cols {
        return from;
    }
    match key {
        NavKey::Enter | NavKey::ArrowDown if from.row + 1 < rows => GridPos {
            row: from.row + 1,
            ..from
        },
        NavKey::ArrowUp if from.row > 0 => GridPos {
            row: from.row - 1,
            ..from
        },
        NavKey::Tab if from.col + 1 < cols => GridPos {
            col: from.col + 1,
            ..from
        },
        NavKey::ShiftTab if from.col > 0 => GridPos {
            col: from.col - 1,
            ..from
        },
        _ => from,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(row: usize, col: usize) -> GridPos {
        GridPos { row, col }
    }

    #[test]
    fn moves_within_bounds() {
        assert_eq!(navigate(at(0, 0), NavKey::Enter, 3, 4), at(1, 0));
        assert_eq!(navigate(at(1, 2), NavKey::ArrowUp, 3, 4), at(0, 2));
        assert_eq!(navigate(at(1, 2), NavKey::Tab, 3, 4), at(1, 3));
        assert_eq!(navigate(at(1, 2), NavKey::ShiftTab, 3, 4), at(1, 1));
    }

    #[test]
    fn edges_do_not_wrap() {
        assert_eq!(navigate(at(2, 1), NavKey::ArrowDown, 3, 4), at(2, 1));
        assert_eq!(navigate(at(0, 1), NavKey::ArrowUp, 3, 4), at(0, 1));
        assert_eq!(navigate(at(1, 3), NavKey::Tab, 3, 4), at(1, 3));
        assert_eq!(navigate(at(1, 0), NavKey::ShiftTab, 3, 4), at(1, 0));
    }

    #[test]
    fn key_names() {
        assert_eq!(NavKey::parse("Tab", true), Some(NavKey::ShiftTab));
        assert_eq!(NavKey::parse("Tab", false), Some(NavKey::Tab));
        assert_eq!(NavKey::parse("ArrowLeft", false), None);
    }
}
