#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

mod config;
pub mod connection;
mod error;
pub mod framing;
pub mod ports;
mod socket;
mod supervisor;
mod worker;

use std::sync::Arc;

use ironkdc_as::Kdc;
use tokio_util::sync::CancellationToken;

pub use self::config::{LimitsConfig, ListenConfig, ServerConfig, WorkersConfig};
pub use self::error::{ServerError, ServerErrorExt, ServerErrorKind, ServerResult};
pub use self::socket::BoundSockets;
pub use self::supervisor::{Supervisor, SupervisorState, DRAIN_LIMIT, KILL_LIMIT, SPAWN_THROTTLE};
use self::worker::{Worker, WorkerOptions};

/// A bound KDC, ready to serve.
pub struct KdcServer {
    config: ServerConfig,
    kdc: Arc<Kdc>,
    sockets: Arc<BoundSockets>,
    prepend_length: bool,
}

impl KdcServer {
    /// Binds the configured ports. Must be called from within a tokio runtime.
    pub fn bind(config: ServerConfig, kdc: Kdc) -> ServerResult<Self> {
        let ports = ports::parse_port_specs(&config.listen.ports, config.listen.enable_http)?;
        let sockets = BoundSockets::bind(&config.listen.addresses, &ports)?;

        Ok(Self::with_sockets(config, kdc, sockets))
    }

    pub fn with_sockets(config: ServerConfig, kdc: Kdc, sockets: BoundSockets) -> Self {
        Self {
            config,
            kdc: Arc::new(kdc),
            sockets: Arc::new(sockets),
            prepend_length: false,
        }
    }

    /// Length-prefix datagram replies the way stream replies are.
    #[must_use]
    pub fn with_datagram_length_prefix(mut self, enabled: bool) -> Self {
        self.prepend_length = enabled;
        self
    }

    pub fn sockets(&self) -> &BoundSockets {
        &self.sockets
    }

    /// Serves until `shutdown` is cancelled.
    ///
    /// In single-process mode one worker runs on the caller's task; otherwise a
    /// [`Supervisor`] keeps the configured number of worker tasks alive.
    pub async fn run(self, shutdown: CancellationToken) -> ServerResult<()> {
        let options = WorkerOptions::new(&self.config, self.prepend_length);

        if self.config.single_process {
            info!(realm = %self.config.realm, "Serving from a single worker");

            let sockets = self.sockets.for_worker()?;
            Worker::new(0, self.kdc, options, sockets, shutdown).run().await;

            return Ok(());
        }

        let target = self.config.worker_count();
        info!(realm = %self.config.realm, workers = target, "Serving");

        let kdc = self.kdc;
        let sockets = self.sockets;

        let supervisor = Supervisor::new(target, move |id, liveness| {
            let kdc = Arc::clone(&kdc);
            let sockets = Arc::clone(&sockets);

            async move {
                match sockets.for_worker() {
                    Ok(handles) => Worker::new(id, kdc, options, handles, liveness).run().await,
                    Err(e) => error!(worker = id, error = %e.report(), "Failed to register sockets"),
                }
            }
        });

        let state = supervisor.run(shutdown).await;
        info!(?state, "Server stopped");

        Ok(())
    }
}
