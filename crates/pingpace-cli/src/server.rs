use anyhow::Result;
use pingpace_core::serve_connection;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub async fn run_server(listen: &str) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, "listening for probers");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                };
                if let Err(err) = stream.set_nodelay(true) {
                    warn!(%remote, %err, "failed to disable nagle");
                }
                tokio::spawn(async move {
                    match serve_connection(stream).await {
                        Ok(stats) => info!(
                            %remote,
                            pings = stats.pings,
                            last_latency_ms = ?stats.last_latency_ms,
                            "prober disconnected"
                        ),
                        Err(err) => warn!(%remote, %err, "connection closed with error"),
                    }
                });
            }
        }
    }

    Ok(())
}
