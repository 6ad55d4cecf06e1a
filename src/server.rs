use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::{config::ServerConfig, engine::Database};

mod connection;

pub use connection::Connection;

/// Binds `config.listen` and serves connections until the process exits.
///
/// ## Arguments
/// * `db` - Tables shared by every connection
/// * `config` - Listen address plus per-connection buffer limits
///
/// ## Returns
/// * `Err(_)` - The address could not be bound; accept errors are logged and retried
///
/// ## Protocol
/// One request per `\n`-terminated line, answered in order:
/// ```text
/// Client: SELECT name FROM cities WHERE population > 1000 ORDER BY name
/// Server: Accra
/// Server: Berlin
/// Client: INSERT INTO test VALUES (1, 'one')
/// Server: inserted at id 1
/// Client: DELETE FROM test WHERE first = 1
/// Server: deleted 1 rows
/// Client: SELECT * FROM nope
/// Server: ERROR: not found: no such table: nope
/// Client: QUIT
/// Server: bye
/// ```
pub async fn serve(db: Arc<Database>, config: &ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.listen).await?;
    info!(addr = %listener.local_addr()?, "listening");
    serve_listener(listener, db, config.clone()).await
}

/// Accept loop over an already bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    db: Arc<Database>,
    config: ServerConfig,
) -> Result<()> {
    loop {
        // Step 1: wait for a client, backing off briefly on accept errors
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "accept error");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        info!(%peer, "client connected");

        // Step 2: hand the socket to its own task
        let connection = Connection::new(socket, peer, Arc::clone(&db), &config);
        tokio::spawn(connection.run());
    }
}
