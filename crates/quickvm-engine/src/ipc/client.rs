//! Front-end side of the service protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use quickvm_common::constants::DEFAULT_QUEUE_CAPACITY;
use quickvm_common::error::{QuickVmError, Result};
use quickvm_common::types::{CommandOutcome, CommandRequest, StateChangeEvent, VmId, VmStatus};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::ipc::protocol::{Call, ClientFrame, Reply, ServerFrame, encode_frame, read_next_valid_frame};

type Pending = Arc<Mutex<Waiters>>;

/// Requests awaiting a response. Once `open` is false the reader has gone
/// and nothing may wait any more.
struct Waiters {
    open: bool,
    by_id: HashMap<u64, oneshot::Sender<Reply>>,
}

/// A connection to a running service.
///
/// Requests may be issued concurrently; responses are matched by id.
pub struct ServiceClient {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Pending,
    events: Mutex<Option<mpsc::Receiver<StateChangeEvent>>>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl ServiceClient {
    /// Connects to the service at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`QuickVmError::Connection`] if nothing is listening.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| QuickVmError::Connection {
                message: format!("{addr}: {e}"),
            })?;
        let (reader_half, writer_half) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(Waiters {
            open: true,
            by_id: HashMap::new(),
        }));
        let (event_tx, event_rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let reader = tokio::spawn(reader_loop(
            BufReader::new(reader_half),
            Arc::clone(&pending),
            event_tx,
        ));
        tracing::debug!(addr, "connected to service");
        Ok(Self {
            writer: tokio::sync::Mutex::new(writer_half),
            pending,
            events: Mutex::new(Some(event_rx)),
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    /// Checks that the service answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is lost or the reply is wrong.
    pub async fn ping(&self) -> Result<()> {
        match self.call(Call::Ping).await? {
            Reply::Pong => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Current machines, optionally restricted to one name.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is lost or the reply is wrong.
    pub async fn get_vm(&self, name: Option<&VmId>) -> Result<Vec<VmStatus>> {
        match self.call(Call::GetVm { name: name.cloned() }).await? {
            Reply::Vms(vms) => Ok(vms),
            other => Err(unexpected(&other)),
        }
    }

    /// Requests a state change.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is lost or the reply is wrong.
    /// Refusals by the engine are an `Ok` outcome.
    pub async fn request_vm_state_change(&self, request: &CommandRequest) -> Result<CommandOutcome> {
        let call = Call::RequestVmStateChange {
            name: request.vm.clone(),
            requested_state: request.requested,
        };
        match self.call(call).await? {
            Reply::Outcome(outcome) => Ok(outcome),
            other => Err(unexpected(&other)),
        }
    }

    /// Asks a guest to shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is lost or the reply is wrong.
    pub async fn shutdown_vm(&self, vm: &VmId) -> Result<CommandOutcome> {
        match self.call(Call::ShutdownVm { name: vm.clone() }).await? {
            Reply::Outcome(outcome) => Ok(outcome),
            other => Err(unexpected(&other)),
        }
    }

    /// Starts state-change pushes on this connection. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is lost or the reply is wrong.
    pub async fn subscribe(&self) -> Result<()> {
        match self.call(Call::Subscribe).await? {
            Reply::Subscribed => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Stops state-change pushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is lost or the reply is wrong.
    pub async fn unsubscribe(&self) -> Result<()> {
        match self.call(Call::Unsubscribe).await? {
            Reply::Unsubscribed => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Takes the receiving end of the event stream. `None` after the
    /// first call.
    pub fn events(&self) -> Option<mpsc::Receiver<StateChangeEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn call(&self, call: Call) -> Result<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = encode_frame(&ClientFrame { id, call })?;
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = lock(&self.pending);
            if !waiters.open {
                return Err(QuickVmError::Connection {
                    message: "service closed the connection".to_string(),
                });
            }
            let _ = waiters.by_id.insert(id, tx);
        }

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(&bytes).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            let _ = lock(&self.pending).by_id.remove(&id);
            return Err(QuickVmError::Connection {
                message: format!("failed to send request: {e}"),
            });
        }

        match rx.await {
            Ok(Reply::Error(message)) => Err(QuickVmError::Protocol { message }),
            Ok(reply) => Ok(reply),
            Err(_) => Err(QuickVmError::Connection {
                message: "service closed the connection".to_string(),
            }),
        }
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn lock(pending: &Pending) -> MutexGuard<'_, Waiters> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unexpected(reply: &Reply) -> QuickVmError {
    QuickVmError::Protocol {
        message: format!("unexpected reply: {reply:?}"),
    }
}

async fn reader_loop(
    mut reader: BufReader<OwnedReadHalf>,
    pending: Pending,
    events: mpsc::Sender<StateChangeEvent>,
) {
    while let Some(frame) = read_next_valid_frame::<ServerFrame, _>(&mut reader).await {
        match frame {
            ServerFrame::Response { id, reply } => {
                let waiter = lock(&pending).by_id.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => tracing::debug!(id, "response for unknown request"),
                }
            }
            ServerFrame::StateChanged { event } => match events.try_send(event) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(event)) => {
                    tracing::warn!(vm = %event.vm, sequence = event.sequence, "event queue full, dropping event");
                }
            },
        }
    }
    // Wakes every waiter with a closed-channel error and turns later calls
    // away.
    {
        let mut waiters = lock(&pending);
        waiters.open = false;
        waiters.by_id.clear();
    }
    tracing::debug!("service connection closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    async fn closing_listener() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _ = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });
        addr
    }

    #[tokio::test]
    async fn calls_fail_once_the_service_hangs_up() {
        let client = ServiceClient::connect(&closing_listener().await).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(3), client.ping())
            .await
            .expect("ping must not hang");
        assert!(matches!(first, Err(QuickVmError::Connection { .. })));

        // Later calls are refused too, not parked behind a dead reader.
        let second = tokio::time::timeout(Duration::from_secs(3), client.ping())
            .await
            .expect("ping must not hang");
        assert!(matches!(second, Err(QuickVmError::Connection { .. })));
    }

    #[tokio::test]
    async fn unknown_service_address_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let result = ServiceClient::connect(&addr).await;
        assert!(matches!(result, Err(QuickVmError::Connection { .. })));
    }
}
