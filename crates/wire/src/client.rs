//! Management client: one request, a stream of responses.

use crate::frame::{read_frame, write_frame, FrameError};
use crate::protocol::{Request, Response};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

/// Client side of the control socket.
pub struct ManagementClient {
    socket_path: PathBuf,
}

impl ManagementClient {
    /// Client for a socket path.
    pub fn new(socket_path: &Path) -> Self {
        ManagementClient {
            socket_path: socket_path.to_path_buf(),
        }
    }

    /// Send one request and collect responses until `Final`.
    pub fn request(&self, request: &Request) -> Result<Vec<Response>, FrameError> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        write_frame(&mut stream, request)?;

        let mut responses = Vec::new();
        loop {
            let response: Response = read_frame(&mut stream)?;
            let done = response.final_message;
            responses.push(response);
            if done {
                break;
            }
        }
        Ok(responses)
    }
}
