//! Management surface: request/reply framing over a Unix-domain control
//! socket carrying typed JSON requests.

pub mod client;
pub mod frame;
pub mod protocol;
pub mod server;

pub use client::ManagementClient;
pub use frame::{read_frame, write_frame, FrameError};
pub use protocol::{Command, Request, Response};
pub use server::ManagementServer;
