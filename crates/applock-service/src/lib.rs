//! Host daemon glue for the lock engine: platform adapters driven by a
//! newline-delimited signal feed, and the local status socket.

pub mod feed;
pub mod host;
pub mod status;
