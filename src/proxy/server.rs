//! Accept loop for intercepted connections.
//!
//! # Responsibilities
//! - Accept redirected connections under the listener's connection limit
//! - Give each connection its own task, span and tracking guard
//! - Contain connection failures: log, count, move on
//! - On shutdown stop accepting and let open connections drain

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::archive::{Archive, RecordStore};
use crate::config::ProxyConfig;
use crate::net::connection::ConnectionTracker;
use crate::net::transport;
use crate::net::{
    DestinationResolver, Listener, ListenerError, OriginalDestination, TlsContext, TlsError,
};
use crate::observability::metrics;
use crate::proxy::pipeline::{ConnectionPipeline, PipelineSettings};
use crate::proxy::ProxyError;

/// Pause after a failed accept so a persistent error (EMFILE) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// State every connection task reads.
#[derive(Debug)]
struct Shared {
    archive: Arc<Archive>,
    tls: TlsContext,
    resolver: Arc<dyn DestinationResolver>,
    recorder: Option<RecordStore>,
    settings: PipelineSettings,
}

/// The intercepting proxy.
pub struct ProxyServer {
    archive: Arc<Archive>,
    tls: TlsContext,
    resolver: Arc<dyn DestinationResolver>,
    recorder: Option<RecordStore>,
    settings: PipelineSettings,
    shutdown_grace: Duration,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Build from configuration with an empty archive and the kernel's
    /// original-destination lookup.
    pub fn new(config: &ProxyConfig) -> Result<Self, TlsError> {
        let tls = TlsContext::from_config(config.tls.as_ref())?;
        if !tls.can_accept() {
            tracing::warn!("No [tls] certificate configured; port 443 connections will be refused");
        }
        let recorder = config.archive.record_dir.as_ref().map(RecordStore::new);
        if let Some(store) = &recorder {
            tracing::info!(dir = %store.dir().display(), "Recording exchanges to disk");
        }

        Ok(Self {
            archive: Arc::new(Archive::new()),
            tls,
            resolver: Arc::new(OriginalDestination),
            recorder,
            settings: PipelineSettings::from_config(config),
            shutdown_grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
            tracker: ConnectionTracker::new(),
        })
    }

    /// Replace the destination lookup.
    pub fn with_resolver(mut self, resolver: impl DestinationResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Share an existing archive instead of starting empty.
    pub fn with_archive(mut self, archive: Arc<Archive>) -> Self {
        self.archive = archive;
        self
    }

    pub fn archive(&self) -> Arc<Archive> {
        Arc::clone(&self.archive)
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept connections until `shutdown` fires, then wait for open
    /// connections up to the grace period.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let tracker = self.tracker;
        let grace = self.shutdown_grace;
        let shared = Arc::new(Shared {
            archive: self.archive,
            tls: self.tls,
            resolver: self.resolver,
            recorder: self.recorder,
            settings: self.settings,
        });

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "Proxy accepting connections");
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Accept(e)) => {
                            tracing::warn!(error = %e, "Accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let guard = tracker.track();
                    let span = tracing::info_span!(
                        "connection",
                        connection_id = %guard.id(),
                        peer_addr = %peer,
                    );
                    let shared = Arc::clone(&shared);
                    tokio::spawn(
                        async move {
                            let _permit = permit;
                            let _guard = guard;
                            if let Err(e) = serve(stream, &shared).await {
                                tracing::warn!(error = %e, kind = e.kind(), "Connection torn down");
                                metrics::record_connection_error(e.kind());
                            }
                        }
                        .instrument(span),
                    );
                }
            }
        }

        let active = tracker.active_count();
        if active > 0 {
            tracing::info!(active, grace = ?grace, "Waiting for open connections");
            if !tracker.wait_idle(grace).await {
                tracing::warn!(
                    remaining = tracker.active_count(),
                    "Grace period elapsed with connections still open"
                );
            }
        }
        tracing::info!("Proxy stopped");
        Ok(())
    }
}

async fn serve(client: TcpStream, shared: &Shared) -> Result<(), ProxyError> {
    let destination = shared
        .resolver
        .resolve(&client)
        .map_err(ProxyError::Destination)?;
    tracing::debug!(destination = %destination, "Resolved original destination");
    let _ = client.set_nodelay(true);

    let legs = transport::open(
        client,
        destination,
        &shared.tls,
        shared.settings.connect_timeout,
    )
    .await?;
    tracing::debug!(tls = ?legs.client.tls_role(), "Legs open");

    ConnectionPipeline::new(
        Arc::clone(&shared.archive),
        shared.recorder.clone(),
        shared.settings.clone(),
    )
    .run(legs.client, legs.server)
    .await
}
