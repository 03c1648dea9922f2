use crate::dimensions::Dimensions;

/// How a run of screen cells is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Attr {
    #[default]
    Normal,
    Bold,
    Underline,
    /// Part of the current search match.
    Selected,
}

/// Something the formatter can draw cells onto.
pub trait Canvas {
    fn clear(&mut self);

    /// Draw `text` (one base character plus any marks on it) at the given
    /// cell. It covers `width` columns.
    fn put(&mut self, row: usize, col: usize, text: &str, width: usize, attr: Attr);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Cell {
    text: String,
    attr: Attr,
    // Covered by a wide character to its left.
    continuation: bool,
}

/// An in-memory screen, used to inspect rendered output.
pub struct Grid {
    dimensions: Dimensions,
    cells: Vec<Cell>,
}

impl Grid {
    pub fn new(dimensions: Dimensions) -> Grid {
        Grid {
            dimensions,
            cells: vec![Cell::default(); dimensions.width * dimensions.height],
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    fn cell(&self, row: usize, col: usize) -> &Cell {
        &self.cells[row * self.dimensions.width + col]
    }

    pub fn text_at(&self, row: usize, col: usize) -> &str {
        &self.cell(row, col).text
    }

    pub fn attr_at(&self, row: usize, col: usize) -> Attr {
        self.cell(row, col).attr
    }

    /// The text of one row; untouched cells read as spaces.
    pub fn row_text(&self, row: usize) -> String {
        let mut text = String::new();
        for col in 0..self.dimensions.width {
            let cell = self.cell(row, col);
            if cell.continuation {
                continue;
            }
            if cell.text.is_empty() {
                text.push(' ');
            } else {
                text.push_str(&cell.text);
            }
        }
        text
    }

    /// Every row framed in `|`, one per line.
    pub fn render(&self) -> String {
        (0..self.dimensions.height)
            .map(|row| format!("|{}|", self.row_text(row)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One letter per cell: `.` normal, `B` bold, `U` underline, `S` selected.
    pub fn render_attrs(&self) -> String {
        (0..self.dimensions.height)
            .map(|row| {
                (0..self.dimensions.width)
                    .map(|col| match self.attr_at(row, col) {
                        Attr::Normal => '.',
                        Attr::Bold => 'B',
                        Attr::Underline => 'U',
                        Attr::Selected => 'S',
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Canvas for Grid {
    fn clear(&mut self) {
        self.cells.fill(Cell::default());
    }

    fn put(&mut self, row: usize, col: usize, text: &str, width: usize, attr: Attr) {
        let Dimensions { width: cols, height } = self.dimensions;
        if row >= height || col >= cols {
            return;
        }

        let start = row * cols + col;
        self.cells[start] = Cell {
            text: text.to_string(),
            attr,
            continuation: false,
        };
        for covered in 1..width.min(cols - col) {
            self.cells[start + covered] = Cell {
                text: String::new(),
                attr,
                continuation: true,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    #[test]
    fn test_grid() {
        let mut grid = Grid::new(Dimensions {
            width: 5,
            height: 2,
        });
        grid.put(0, 0, "a", 1, Attr::Bold);
        grid.put(0, 1, "日", 2, Attr::Normal);
        grid.put(1, 4, "z", 1, Attr::Selected);
        // Off screen: ignored.
        grid.put(2, 0, "x", 1, Attr::Normal);

        assert_snapshot!(grid.render(), @r"
        |a日  |
        |    z|
        ");
        assert_snapshot!(grid.render_attrs(), @r"
        B....
        ....S
        ");

        grid.clear();
        assert_eq!("     ", grid.row_text(0));
    }
}
