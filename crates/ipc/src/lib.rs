#![forbid(unsafe_code)]

pub mod channel;
pub mod command;
mod envelope;
pub mod error;
pub mod event;
pub mod frame;

mod client;
mod server;

pub use client::Client;
pub use error::Error;
pub use frame::{Frame, FrameType, generate_tid};
pub use server::Server;
