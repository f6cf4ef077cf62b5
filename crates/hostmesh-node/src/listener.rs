//! Registry listener -- accepts TCP connections, one task per connection.
//!
//! Each connection is a request/response loop over length-prefixed frames.
//! A closed stream ends the loop quietly; a malformed frame is logged and
//! closes that connection only. The accept loop itself never exits on a
//! per-connection failure.

use std::net::SocketAddr;

use hostmesh_protocol::{read_message, write_message};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::dispatcher::Dispatcher;

/// Accept connections until shutdown. Every connection task subscribes to
/// `shutdown_tx` so in-flight connections close with the listener.
pub async fn run_listener(
    listener: TcpListener,
    dispatcher: Dispatcher,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            accept = listener.accept() => {
                match accept {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "listener: connection accepted");
                        let dispatcher = dispatcher.clone();
                        let conn_shutdown = shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, dispatcher, conn_shutdown).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!("listener: accept error: {e}");
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("listener: shutting down");
                break;
            }
        }
    }
}

/// Serve one connection until the peer closes it, sends garbage, or the
/// node shuts down.
pub async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = stream.split();
    let mut handled: u64 = 0;

    loop {
        let read = tokio::select! {
            read = read_message(&mut reader) => read,
            _ = shutdown.recv() => break,
        };

        let message = match read {
            Ok(message) => message,
            Err(e) if e.is_connection_closed() => {
                tracing::debug!(%peer, handled, "listener: connection closed");
                break;
            }
            Err(e) => {
                tracing::warn!(%peer, "listener: bad frame, closing connection: {e}");
                break;
            }
        };

        let kind = message.type_name();
        handled += 1;
        let Some(response) = dispatcher.dispatch(message) else {
            continue;
        };
        if let Err(e) = write_message(&mut writer, &response).await {
            tracing::debug!(%peer, kind, "listener: response write failed: {e}");
            break;
        }
    }
}
