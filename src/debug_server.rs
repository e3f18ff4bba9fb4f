//! Optional debug listener.
//!
//! Started at loop owner construction when [`GlobalFlag::EnableQmlDebug`] is
//! set. Runs a current-thread tokio runtime on its own thread so the event
//! loop thread never blocks on it. Failing to bind is not fatal: the owner
//! logs a warning and carries on without the listener.
//!
//! [`GlobalFlag::EnableQmlDebug`]: crate::config::GlobalFlag::EnableQmlDebug

use std::io;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Greeting written to every debug client
pub const DEBUG_BANNER: &[u8] = b"lifetime-bridge debug\n";

pub struct DebugServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl DebugServer {
    /// Bind `127.0.0.1:port` and start accepting clients.
    ///
    /// Returns once the listener is bound (or binding failed).
    pub fn start(port: u16) -> io::Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<io::Result<SocketAddr>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread_handle = thread::Builder::new()
            .name("bridge-debug-server".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                runtime.block_on(serve(port, ready_tx, shutdown_rx));
            })?;

        match ready_rx.recv() {
            Ok(Ok(local_addr)) => {
                log::info!("Debug server listening on {}", local_addr);
                Ok(Self {
                    local_addr,
                    shutdown_tx: Some(shutdown_tx),
                    thread_handle: Some(thread_handle),
                })
            }
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(io::Error::other("debug server thread exited before binding"))
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn serve(
    port: u16,
    ready_tx: mpsc::Sender<io::Result<SocketAddr>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let _ = ready_tx.send(listener.local_addr());

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,

            accepted = listener.accept() => match accepted {
                Ok((mut stream, peer)) => {
                    log::info!("Debug client connected from {}", peer);

                    if let Err(e) = stream.write_all(DEBUG_BANNER).await {
                        log::warn!("Failed to greet debug client {}: {}", peer, e);
                    }
                }
                Err(e) => log::warn!("Debug server accept failed: {}", e),
            },
        }
    }

    log::debug!("Debug server stopped");
}

impl Drop for DebugServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for DebugServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugServer")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
