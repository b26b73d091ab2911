/// Read-side HTTP API

pub mod guard;
pub mod ratelimit;
pub mod routes;

pub use ratelimit::RateLimiter;
pub use routes::ApiContext;

use std::net::SocketAddr;

use tokio::sync::broadcast;
use tracing::info;

/// Serve the API until the shutdown signal fires.
pub async fn serve(
    ctx: ApiContext,
    bind: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let routes = routes::build(ctx);
    let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(bind, async move {
        let _ = shutdown.recv().await;
    });
    info!(%addr, "read API listening");
    server.await;
    info!("read API shut down");
    Ok(())
}
