//! Chat server binary.
//!
//! Usage: `chat-server [config.toml]`
//!
//! Without a path the configuration comes from `CHAT_PROTOCOL_*` environment
//! variables over the defaults.

use chat_protocol::config::NetworkConfig;
use chat_protocol::error::Result;
use chat_protocol::service::server::ChatServer;
use chat_protocol::utils::logging::init_logging;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::from_env()?,
    };
    init_logging(&config.logging)?;

    let server = ChatServer::bind(config).await?;
    info!(
        stream = %server.stream_addr()?,
        datagram = %server.datagram_addr()?,
        "Accepting peers"
    );
    server.run_until_ctrl_c().await
}
