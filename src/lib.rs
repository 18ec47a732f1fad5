#![deny(clippy::unwrap_used)]

pub mod terminal;
