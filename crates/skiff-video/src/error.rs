use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("transcoder '{tool}' not found")]
    ToolUnavailable { tool: String },

    #[error("camera {camera}: no usable connection URL configured")]
    NoCandidates { camera: String },

    #[error("camera {camera}: transcoder exited during start ({status}){}", last_line(.stderr))]
    ProcessExitedEarly { camera: String, status: String, stderr: Option<String> },

    #[error("camera {camera}: no playlist after {waited:?}")]
    PlaylistTimeout { camera: String, waited: Duration },

    #[error("camera {camera}: all candidates failed, last error: {last_error}")]
    CandidateExhausted { camera: String, last_error: String },

    #[error("stream I/O: {0}")]
    Io(#[from] std::io::Error),
}

fn last_line(stderr: &Option<String>) -> String {
    match stderr {
        Some(line) => format!(": {}", line),
        None => String::new(),
    }
}
