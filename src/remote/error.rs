//! Errors raised by the remote transport.

use thiserror::Error;

/// Errors surfaced while talking to the zone host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when a local program cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the multiplexed connection cannot be established.
    #[error("failed to open session to {destination}: exit status {status_text}: {stderr}")]
    SessionOpen {
        /// `user@host` the session targeted.
        destination: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the client.
        stderr: String,
    },
    /// Raised when a one-shot remote command exits with a non-zero status.
    #[error("`{command}` exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Remote command line that failed.
        command: String,
        /// Exit status as reported by the client.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when copying an artifact to the host fails.
    #[error("failed to upload {local} to {remote}: exit status {status_text}: {stderr}")]
    Upload {
        /// Local file that was being copied.
        local: String,
        /// Destination path on the host.
        remote: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the copy.
        stderr: String,
    },
    /// Raised when a polled command never reports an accepted status.
    #[error("`{command}` did not reach an accepted status after {attempts} attempts")]
    Timeout {
        /// Remote command line that was polled.
        command: String,
        /// Number of attempts made.
        attempts: u32,
        /// Exit status observed on the final attempt.
        last_status: Option<i32>,
    },
}
