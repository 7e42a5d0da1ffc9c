//! Where client listings and attribute records come from
//!
//! Production reads them from the `pivpn` command ([`PivpnCommand`]); tests
//! substitute fixed text. Providers return raw output only, parsing lives in
//! [`crate::backend`].

pub mod command;

pub use command::PivpnCommand;

use crate::backend::ClientId;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Supplies the client listing table
pub trait SnapshotProvider {
    fn listing(&self) -> impl Future<Output = Result<String, SourceError>> + Send;
}

/// Supplies the attribute rows matching one client
pub trait AttributeProvider {
    fn record(&self, client: &ClientId)
    -> impl Future<Output = Result<String, SourceError>> + Send;
}
