//! The rendering and navigation engine of a terminal pager: bytes from a
//! file, a pipe or memory come in; wrapped or unwrapped rows of text, with
//! nroff overprinting and search highlighting, go out to a `Canvas`.

pub mod action;
pub mod app;
pub mod canvas;
pub mod charset;
pub mod config;
pub mod coord_cache;
pub mod datasource;
pub mod dimensions;
pub mod error;
pub mod formatter;
pub mod growbuf;
pub mod navigation;
pub mod nroff;
pub mod pipe;
pub mod search;
pub mod terminal;
pub mod view;

#[cfg(test)]
mod test_helpers;
