//! The background service: one [`VmManager`] shared by every connection.
//!
//! Each connection gets a bounded outbound queue drained by its own writer
//! task. The same queue carries responses and, once the connection has
//! subscribed, state-change pushes; a connection whose queue is full or
//! whose socket stalls past the write timeout loses its subscription.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quickvm_common::types::{CommandRequest, SubscriberId};
use quickvm_hypervisor::error::StartupError;
use quickvm_hypervisor::hypervisor::Hypervisor;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::ipc::protocol::{Call, ClientFrame, Reply, ServerFrame, encode_frame, read_next_valid_frame};
use crate::manager::VmManager;
use crate::registry::{ChannelSubscriber, Subscriber};

/// Opens the listening socket.
///
/// # Errors
///
/// Returns [`StartupError::Bind`] if the address is invalid or taken.
pub async fn bind(addr: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Accepts connections until `shutdown` turns `true`.
///
/// # Errors
///
/// Returns an error if the listener's address cannot be read.
pub async fn serve<H: Hypervisor + 'static>(
    listener: TcpListener,
    manager: Arc<VmManager<H>>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let local = listener.local_addr()?;
    tracing::info!(
        addr = %local,
        queue_capacity = manager.config().service.queue_capacity,
        "service listening"
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, peer)) => {
                        let manager = Arc::clone(&manager);
                        let _ = tokio::spawn(handle_connection(stream, peer, manager));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
        }
    }

    tracing::info!(addr = %local, "service stopped");
    Ok(())
}

async fn handle_connection<H: Hypervisor + 'static>(
    stream: TcpStream,
    peer: SocketAddr,
    manager: Arc<VmManager<H>>,
) {
    let conn = SubscriberId::generate();
    tracing::info!(conn = %conn, peer = %peer, "client connected");

    let service = manager.config().service.clone();
    let (reader_half, writer_half) = stream.into_split();
    let mut reader = BufReader::new(reader_half);
    let (tx, rx) = mpsc::channel::<ServerFrame>(service.queue_capacity);
    let writer_task = tokio::spawn(writer_loop(conn, writer_half, rx, service.write_timeout()));
    let subscriber: Arc<dyn Subscriber> = Arc::new(ChannelSubscriber::new(conn, tx.clone()));

    while let Some(frame) = read_next_valid_frame::<ClientFrame, _>(&mut reader).await {
        tracing::debug!(conn = %conn, id = frame.id, call = ?frame.call, "request");
        let reply = handle_call(&manager, &subscriber, frame.call).await;
        let response = ServerFrame::Response { id: frame.id, reply };
        if tx.send(response).await.is_err() {
            break;
        }
    }

    let _ = manager.unsubscribe(&conn);
    drop(subscriber);
    drop(tx);
    let _ = writer_task.await;
    tracing::info!(conn = %conn, peer = %peer, "client disconnected");
}

async fn handle_call<H: Hypervisor + 'static>(
    manager: &Arc<VmManager<H>>,
    subscriber: &Arc<dyn Subscriber>,
    call: Call,
) -> Reply {
    match call {
        Call::Ping => Reply::Pong,
        Call::Subscribe => {
            let _ = manager.subscribe(Arc::clone(subscriber));
            Reply::Subscribed
        }
        Call::Unsubscribe => {
            let _ = manager.unsubscribe(&subscriber.id());
            Reply::Unsubscribed
        }
        Call::GetVm { name } => {
            blocking(manager, move |m| Reply::Vms(m.get_vm(name.as_ref()))).await
        }
        Call::RequestVmStateChange {
            name,
            requested_state,
        } => {
            let request = CommandRequest::new(name, requested_state);
            blocking(manager, move |m| {
                Reply::Outcome(m.request_vm_state_change(&request))
            })
            .await
        }
        Call::ShutdownVm { name } => {
            blocking(manager, move |m| Reply::Outcome(m.shutdown_vm(&name))).await
        }
    }
}

/// Runs an engine call off the async workers; hypervisor calls block.
async fn blocking<H, F>(manager: &Arc<VmManager<H>>, call: F) -> Reply
where
    H: Hypervisor + 'static,
    F: FnOnce(&VmManager<H>) -> Reply + Send + 'static,
{
    let manager = Arc::clone(manager);
    match tokio::task::spawn_blocking(move || call(&manager)).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(error = %e, "engine call panicked");
            Reply::Error(format!("internal error: {e}"))
        }
    }
}

async fn writer_loop(
    conn: SubscriberId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<ServerFrame>,
    write_timeout: Duration,
) {
    while let Some(frame) = rx.recv().await {
        let bytes = match encode_frame(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(conn = %conn, error = %e, "failed to encode frame");
                continue;
            }
        };
        let send = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        };
        match tokio::time::timeout(write_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(conn = %conn, error = %e, "write failed");
                break;
            }
            Err(_) => {
                tracing::warn!(
                    conn = %conn,
                    timeout_ms = write_timeout.as_millis(),
                    "write timed out, closing"
                );
                break;
            }
        }
    }
}
