//! Reader loop and per-datagram dispatch for packet transports.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::{DatagramDispatch, Dispatcher, RunHandles, Server};
use crate::codec::Marshaller;
use crate::error::Result;
use crate::handler::Context;

/// Queue depth per worker in bounded dispatch mode.
const QUEUE_PER_WORKER: usize = 16;

/// Read datagrams until shutdown.
///
/// Every datagram gets a fresh context, so requests are independent and
/// safe to run on any task: unbounded mode spawns one tracked task per
/// datagram, bounded mode feeds a fixed worker pool and drops datagrams
/// when the queue is full.
pub(crate) async fn serve<M: Marshaller>(
    server: &Server<M>,
    socket: UdpSocket,
    handles: RunHandles,
) -> Result<()> {
    let RunHandles {
        shutdown, tracker, ..
    } = handles;
    // Keeps `stop` from returning before this loop has exited.
    let _run_guard = tracker.token();

    let socket = Arc::new(socket);
    let dispatcher = server.dispatcher();
    let mut buf = vec![0u8; server.config.datagram_buffer_size];

    tracing::debug!(addr = ?socket.local_addr(), "datagram server listening");

    let pool = match server.config.datagram_dispatch {
        DatagramDispatch::Unbounded => None,
        DatagramDispatch::Bounded(workers) => {
            let workers = workers.max(1);
            let (tx, rx) = mpsc::channel::<(Bytes, SocketAddr)>(workers * QUEUE_PER_WORKER);
            let rx = Arc::new(tokio::sync::Mutex::new(rx));
            for _ in 0..workers {
                let rx = rx.clone();
                let dispatcher = dispatcher.clone();
                let socket = socket.clone();
                tracker.spawn(worker_loop(rx, dispatcher, socket));
            }
            Some(tx)
        }
    };

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, peer)) => {
                    let block = match dispatcher.framer.block_from_bytes(&buf[..n]) {
                        Ok(block) => block,
                        Err(e) => {
                            tracing::warn!(%peer, error = %e, "datagram dropped");
                            continue;
                        }
                    };
                    match &pool {
                        None => {
                            let dispatcher = dispatcher.clone();
                            let ctx = Context::for_datagram(
                                dispatcher.framer.clone(),
                                socket.clone(),
                                peer,
                            );
                            tracker.spawn(async move {
                                dispatcher.dispatch(&ctx, block).await;
                            });
                        }
                        Some(tx) => {
                            if tx.try_send((block, peer)).is_err() {
                                tracing::warn!(%peer, "datagram queue full, dropped");
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "datagram read failed");
                }
            },
        }
    }

    // Dropping the sender lets the workers drain the queue and exit.
    drop(pool);
    Ok(())
}

/// One bounded-pool worker: pull datagrams until the queue closes.
async fn worker_loop<M: Marshaller>(
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<(Bytes, SocketAddr)>>>,
    dispatcher: Arc<Dispatcher<M>>,
    socket: Arc<UdpSocket>,
) {
    loop {
        let received = { rx.lock().await.recv().await };
        let Some((block, peer)) = received else {
            break;
        };
        let ctx = Context::for_datagram(dispatcher.framer.clone(), socket.clone(), peer);
        dispatcher.dispatch(&ctx, block).await;
    }
}
