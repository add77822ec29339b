//! `RollcallServer` builder and server loop.
//!
//! This is the entry point for running a Rollcall server. It ties together
//! all the layers: transport → protocol → attendance → codes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rollcall_attendance::{
    AttendanceBook, AttendanceConfig, AttendanceService, Directory, IdentityResolver,
};
use rollcall_codes::Sweeper;
use rollcall_protocol::JsonCodec;

use crate::RollcallError;
use crate::handler::serve_connection;
use crate::transport::WebSocketListener;

/// The current protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<R, D: Directory, B: AttendanceBook> {
    pub(crate) service: AttendanceService<D, B>,
    pub(crate) resolver: R,
    pub(crate) codec: JsonCodec,
    pub(crate) handshake_timeout: Duration,
    pub(crate) idle_timeout: Duration,
}

/// Builder for configuring and starting a Rollcall server.
///
/// # Example
///
/// ```rust,ignore
/// use rollcall::prelude::*;
///
/// let server = RollcallServer::builder()
///     .bind("0.0.0.0:8080")
///     .idle_timeout(Duration::from_secs(120))
///     .build(my_resolver, my_directory, my_book)
///     .await?;
/// server.run().await
/// ```
pub struct RollcallServerBuilder {
    bind_addr: String,
    attendance_config: AttendanceConfig,
    handshake_timeout: Duration,
    idle_timeout: Duration,
}

impl RollcallServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            attendance_config: AttendanceConfig::default(),
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets code, geofence, and collaborator timeout settings.
    pub fn attendance_config(mut self, config: AttendanceConfig) -> Self {
        self.attendance_config = config;
        self
    }

    /// Total time a new connection gets, from accept, to finish the
    /// WebSocket upgrade and deliver its `Handshake`.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// How long an authenticated connection may stay silent before it is
    /// closed.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Binds the listener, starts the expiry sweeper, and returns the
    /// server ready to [`run`](RollcallServer::run).
    pub async fn build<R, D, B>(
        self,
        resolver: R,
        directory: D,
        book: B,
    ) -> Result<RollcallServer<R, D, B>, RollcallError>
    where
        R: IdentityResolver,
        D: Directory,
        B: AttendanceBook,
    {
        let listener = WebSocketListener::bind(&self.bind_addr).await?;
        let service = AttendanceService::new(self.attendance_config, directory, book);
        let sweeper = service.spawn_sweeper();

        let state = Arc::new(ServerState {
            service,
            resolver,
            codec: JsonCodec,
            handshake_timeout: self.handshake_timeout,
            idle_timeout: self.idle_timeout,
        });

        Ok(RollcallServer {
            listener,
            state,
            sweeper,
        })
    }
}

impl Default for RollcallServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Rollcall server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RollcallServer<R, D: Directory, B: AttendanceBook> {
    listener: WebSocketListener,
    state: Arc<ServerState<R, D, B>>,
    sweeper: Sweeper,
}

impl<R, D, B> RollcallServer<R, D, B>
where
    R: IdentityResolver,
    D: Directory,
    B: AttendanceBook,
{
    /// Creates a new builder.
    pub fn builder() -> RollcallServerBuilder {
        RollcallServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// The attendance service every connection shares.
    pub fn service(&self) -> &AttendanceService<D, B> {
        &self.state.service
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), RollcallError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes.
    ///
    /// Each accepted connection gets its own task. Connections already
    /// being served keep running after shutdown until they close or go
    /// idle; the expiry sweeper is stopped before this returns.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), RollcallError> {
        let Self {
            listener,
            state,
            sweeper,
        } = self;
        tokio::pin!(shutdown);

        tracing::info!(addr = ?listener.local_addr().ok(), "Rollcall server running");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(serve_connection(stream, peer, state));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        sweeper.stop().await;
        tracing::info!("Rollcall server stopped");
        Ok(())
    }
}
