use crate::admission::AdmissionController;
use crate::audit::AuditLog;
use crate::config::Config;
use crate::document::{BindingTable, PageLibrary, PageLoader};
use crate::navigation::Navigator;
use crate::program::{self, CrosstermEvents, RawModeGuard};
use crate::server::{SessionDeps, SessionLimits, SessionOrchestrator, SshServer, load_host_key};
use crate::terminal::cli::Cli;
use crate::terminal::error::CliError;
use std::io;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, &cli);

    let library = Arc::new(PageLibrary::open(
        &config.documents.root,
        &config.documents.home,
    )?);
    let bindings = match config.documents.bindings_script() {
        Some(path) => BindingTable::load(&path)?,
        None => BindingTable::default(),
    };
    info!(
        target: "terminal_web::app",
        root = %library.root().display(),
        pages = library.pages().len(),
        bindings = bindings.len(),
        "documents loaded"
    );

    if cli.server {
        serve(config, library, bindings).await
    } else {
        preview(library, bindings).await
    }
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(docs) = &cli.docs {
        config.documents.root = docs.clone();
    }
}

async fn serve(
    config: Config,
    library: Arc<PageLibrary>,
    bindings: BindingTable,
) -> Result<(), CliError> {
    let audit = Arc::new(AuditLog::open(&config.logging.audit_log)?);
    let host_key = load_host_key(&config.server.host_key)?;
    let admission = Arc::new(AdmissionController::new(
        config.security.rate_limit_per_minute,
        config.security.max_connections,
    ));
    let home = library.home_index();
    let orchestrator = Arc::new(SessionOrchestrator::new(SessionDeps {
        library,
        home,
        bindings: Arc::new(bindings),
        admission,
        audit: Arc::clone(&audit),
        limits: SessionLimits {
            max_duration: config.security.max_session(),
            idle_timeout: config.security.idle_timeout(),
        },
    }));
    info!(
        target: "terminal_web::app",
        addr = %config.listen_addr(),
        max_connections = config.security.max_connections,
        rate_limit = config.security.rate_limit_per_minute,
        audit_log = %config.logging.audit_log.display(),
        "starting ssh service"
    );
    SshServer::new(orchestrator, audit)
        .serve(host_key, &config.server.host, config.server.port)
        .await?;
    Ok(())
}

/// Renders the document on the invoking terminal until the user quits.
async fn preview(library: Arc<PageLibrary>, bindings: BindingTable) -> Result<(), CliError> {
    tokio::task::spawn_blocking(move || -> Result<(), CliError> {
        let (width, height) = crossterm::terminal::size()?;
        let home = library.home_index();
        let navigator = Navigator::new(library, bindings.controllers().to_vec(), home, width, height)?;
        let _raw = RawModeGuard::new(true);
        let exit = program::run(
            navigator,
            &mut CrosstermEvents,
            io::stdout(),
            &CancellationToken::new(),
            |err| warn!(target: "terminal_web::app", error = %err, "page failed to load"),
        )?;
        info!(target: "terminal_web::app", ?exit, "preview finished");
        Ok(())
    })
    .await
    .map_err(|err| CliError::Runtime(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn cli_flags_override_config() {
        let cli = Cli::try_parse_from(["terminal-web", "--port", "2022", "--docs", "site"]).unwrap();
        let mut config = Config::default();
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config.server.port, 2022);
        assert_eq!(config.documents.root, PathBuf::from("site"));
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
