use crate::charset::Encoding;

/// Everything the viewer can be asked to do, independent of how the request
/// was made (key, mouse, command line).
#[derive(Debug, Clone)]
pub enum Action {
    // Does nothing, for debugging, shouldn't modify any state.
    #[allow(dead_code)]
    NoOp,

    MoveDown(u64),
    MoveUp(u64),
    PageDown,
    PageUp,
    HalfPageDown,
    HalfPageUp,

    MoveLeft(u64),
    MoveRight(u64),
    MoveToBol,
    MoveToEol,

    MoveToTop,
    MoveToBottom,
    // 0-based.
    MoveToLine(u64),
    MoveToOffset(u64),

    ToggleWrap,
    ToggleNroff,
    SetEncoding(Encoding),
}
