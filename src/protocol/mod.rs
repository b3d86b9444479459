//! Wire protocol: frames, argument parsing and framed TCP connections

pub mod connection;
pub mod frame;
pub mod parse;

pub use connection::Connection;
pub use frame::{Frame, FrameError};
pub use parse::Parse;
