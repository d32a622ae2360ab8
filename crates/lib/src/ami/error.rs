use std::io;

/// Failure of one originate attempt. Logged by the dispatcher, never retried.
#[derive(Debug, thiserror::Error)]
pub enum AmiError {
    #[error("connecting to AMI at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out waiting for AMI at {0}")]
    ConnectTimeout(String),
    #[error("AMI connection closed by peer")]
    Closed,
    #[error("AMI login failed: {0}")]
    AuthFailed(String),
    #[error("timed out waiting for {0} response")]
    Timeout(&'static str),
    #[error("originate rejected: {0}")]
    OriginateRejected(String),
    #[error("AMI protocol error: {0}")]
    Protocol(String),
    #[error("AMI i/o error: {0}")]
    Io(#[from] io::Error),
}
