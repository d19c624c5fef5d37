use crate::audit::AuditError;
use crate::config::ConfigError;
use crate::document::{PageLoadError, ScriptError};
use crate::program::ProgramError;
use crate::server::SshError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("document root unusable: {0}")]
    Documents(#[from] PageLoadError),
    #[error("key binding script failed: {0}")]
    Script(#[from] ScriptError),
    #[error("audit log unavailable: {0}")]
    Audit(#[from] AuditError),
    #[error("{0}")]
    Ssh(#[from] SshError),
    #[error("terminal program failed: {0}")]
    Program(#[from] ProgramError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("terminal runtime error: {0}")]
    Runtime(String),
}
