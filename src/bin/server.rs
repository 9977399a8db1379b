use anyhow::Result;
use dao_server::{DEFAULT_LISTEN_ADDR, MemoryDaoFactory, MemoryStore};
use dao_session::transport;
use dao_session::{HeartbeatConfig, SessionHooks, SessionRegistry, SessionSettings};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());

    let store = MemoryStore::new();
    let settings = SessionSettings::default().with_heartbeat(HeartbeatConfig::default());
    let hooks = SessionHooks::new()
        .on_server_error(|id, err| warn!(connection_id = id, error = %err, "DAO failure"))
        .on_client_error(|id, err| warn!(connection_id = id, error = %err, "Client misbehaved"));
    let registry = SessionRegistry::new(Arc::new(MemoryDaoFactory::new(store)), settings)
        .with_hooks(hooks);

    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "Listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let (reader, writer) = stream.into_split();
        match registry.accept(transport::lines(reader, writer)) {
            Ok(id) => info!(connection_id = %id, %peer, "Connection opened"),
            Err(e) => warn!(%peer, error = %e, "Rejected connection"),
        }
    }
}
