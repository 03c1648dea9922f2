use std::io;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Dimensions {
    pub width: usize,
    pub height: usize,
}

impl Dimensions {
    /// The rows left for text once `reserved` rows (status line) are taken.
    pub fn without_rows(self, reserved: usize) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height.saturating_sub(reserved),
        }
    }
}

pub fn current() -> io::Result<Dimensions> {
    let (columns, rows) = termion::terminal_size()?;

    Ok(Dimensions {
        width: columns as usize,
        height: rows as usize,
    })
}
