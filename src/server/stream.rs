//! Accept loop and per-connection read loop for stream transports.

use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use super::registry::ConnectionRegistry;
use super::{run_hook, DispatchOutcome, Dispatcher, RunHandles, Server};
use crate::codec::Marshaller;
use crate::error::{MuxwireError, Result};
use crate::handler::{Context, Handler};
use crate::transport::{StreamListener, StreamReader};

const ACCEPT_RETRY_INITIAL: Duration = Duration::from_millis(10);
const ACCEPT_RETRY_MAX: Duration = Duration::from_secs(1);

struct ConnShared<M: Marshaller> {
    dispatcher: Arc<Dispatcher<M>>,
    on_connect: Option<Arc<dyn Handler<M>>>,
    on_close: Option<Arc<dyn Handler<M>>>,
    registry: Arc<ConnectionRegistry>,
}

/// Accept connections until shutdown, spawning one tracked task each.
///
/// Accept errors are transient: logged and retried with exponential
/// back-off. Only cancellation ends the loop; the listener closes when it
/// is dropped on return.
pub(crate) async fn serve<M: Marshaller>(
    server: &Server<M>,
    listener: StreamListener,
    handles: RunHandles,
) -> Result<()> {
    let RunHandles {
        shutdown,
        tracker,
        registry,
    } = handles;
    // Keeps `stop` from returning before this loop has exited.
    let _run_guard = tracker.token();

    let shared = Arc::new(ConnShared {
        dispatcher: server.dispatcher(),
        on_connect: server.on_connect.clone(),
        on_close: server.on_close.clone(),
        registry,
    });

    tracing::debug!(addr = ?listener.local_addr(), "stream server listening");

    let mut retry_delay = ACCEPT_RETRY_INITIAL;
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((reader, writer, peer)) => {
                    retry_delay = ACCEPT_RETRY_INITIAL;
                    let conn_token = shutdown.child_token();
                    let conn_id = shared.registry.register(conn_token.clone());
                    let writer = Arc::new(tokio::sync::Mutex::new(writer));
                    let ctx = Context::for_stream(
                        shared.dispatcher.framer.clone(),
                        writer,
                        shared.registry.clone(),
                        conn_id,
                        peer,
                    );
                    let shared = shared.clone();
                    tracker.spawn(connection_loop(shared, ctx, reader, conn_token, conn_id));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed, retrying");
                    sleep(retry_delay).await;
                    retry_delay = (retry_delay * 2).min(ACCEPT_RETRY_MAX);
                }
            },
        }
    }

    Ok(())
}

/// One connection's read loop.
///
/// Requests are executed inline: the context's chain and cursor are shared
/// mutable state, so block N's chain must finish before block N+1 is read.
async fn connection_loop<M: Marshaller>(
    shared: Arc<ConnShared<M>>,
    ctx: Context<M>,
    mut reader: StreamReader,
    conn_token: CancellationToken,
    conn_id: u64,
) {
    if let Some(hook) = &shared.on_connect {
        run_hook(hook, &ctx, "on_connect").await;
    }

    loop {
        tokio::select! {
            biased;

            _ = conn_token.cancelled() => break,
            block = shared.dispatcher.framer.read_block(&mut reader) => match block {
                Ok(block) => {
                    if shared.dispatcher.dispatch(&ctx, block).await == DispatchOutcome::Close {
                        break;
                    }
                }
                Err(MuxwireError::EndOfStream) => break,
                Err(e) => {
                    tracing::warn!(conn_id, error = %e, "read failed, dropping connection");
                    break;
                }
            },
        }
    }

    if let Some(hook) = &shared.on_close {
        run_hook(hook, &ctx, "on_close").await;
    }
    shared.registry.remove(conn_id);
}
