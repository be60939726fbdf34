use std::sync::Arc;

use fixlink_codec::{FieldMap, FieldValue};
use fixlink_metadata::xml;
use fixlink_session::{
    Application, EngineCore, LoginError, MemoryStore, Settings, acceptor, store::MemorySession,
};
use tokio::{net::TcpListener, runtime::Builder, task::LocalSet};
use tokio_util::sync::CancellationToken;
use tracing::info;

struct EchoApp;

impl Application<MemorySession> for EchoApp {
    async fn on_logon(
        &mut self,
        message: &FieldMap,
        _engine: &mut EngineCore<MemorySession>,
    ) -> Result<(), LoginError> {
        match message.get("Username").and_then(FieldValue::as_str) {
            Some(username) => {
                info!(username, "logon");
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn on_application_message(
        &mut self,
        message: &FieldMap,
        engine: &mut EngineCore<MemorySession>,
    ) -> anyhow::Result<()> {
        info!(?message, "application message");
        // Answer orders with a session-level heartbeat just to show the
        // engine surface; a real server would produce ExecutionReports.
        engine.send_message("HEARTBEAT", None).await?;
        Ok(())
    }
}

async fn serve() -> anyhow::Result<()> {
    let protocol = Arc::new(xml::load_file(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| "FIX44.xml".to_owned()),
    )?);
    let listener = TcpListener::bind("127.0.0.1:10050").await?;
    info!("listening on {}", listener.local_addr()?);

    let mut settings = Settings::new("fixlink-server", "client");
    settings.heartbeat_timeout = std::time::Duration::from_secs(10);

    acceptor::serve(
        listener,
        protocol,
        settings,
        MemoryStore::new(),
        || EchoApp,
        CancellationToken::new(),
    )
    .await?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let runtime = Builder::new_current_thread().enable_all().build()?;
    let local_set = LocalSet::new();
    runtime.block_on(local_set.run_until(serve()))
}
