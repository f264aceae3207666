//! Per-connection dispatcher.
//!
//! One task drives both legs of a connection. Each turn of the loop
//! re-evaluates four guarded actions and runs whichever becomes ready:
//!
//! ```text
//! server leg ──read──▶ ResponseParser ──▶ completed ─┐
//!                            └─ in-flight bytes ─────┼─▶ outbound ──flush──▶ client leg
//! client leg ──read──▶ RequestParser ──▶ decide ─────┘
//!                                          ├─ Inserted: forward to server leg
//!                                          ├─ Ready:    stream cached bytes
//!                                          └─ Pending:  wait, then stream
//! ```
//!
//! Responses reach the client in request order: a cached answer is held
//! back while forwarded requests on the same connection are unanswered.
//!
//! Once the origin leg is closed nothing new is added to the archive;
//! queued requests are answered from it or dropped. Requests this
//! connection forwarded but never saw answered are abandoned when the
//! pipeline goes away, however it ends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::archive::{Archive, ArchiveError, ArchivedRecord, Lookup, RecordStore, ResponseSlot};
use crate::config::ProxyConfig;
use crate::http::{ParsedResponse, RequestParser, ResponseParser};
use crate::net::buffer::OutboundBuffer;
use crate::observability::metrics::{self, RequestOutcome};
use crate::proxy::ProxyError;

/// Upper bound on closing a leg once the dispatcher is done.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Tunables for a single connection.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub idle: Duration,
    pub pending_wait: Duration,
    pub connect_timeout: Duration,
    pub read_chunk: usize,
    pub outbound_capacity: usize,
    pub max_head: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            idle: Duration::from_secs(config.timeouts.idle_secs),
            pending_wait: Duration::from_secs(config.timeouts.pending_wait_secs),
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            read_chunk: config.buffers.read_chunk_bytes,
            outbound_capacity: config.buffers.outbound_bytes,
            max_head: config.buffers.max_head_bytes,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Answer for the request at the front of the queue, when it does not go
/// to the origin.
#[derive(Debug)]
enum Delivery {
    /// An identical request is in flight at this archive index.
    Waiting { index: usize },
    /// Archived bytes, `sent` of which are already in the outbound buffer.
    Streaming {
        bytes: Bytes,
        sent: usize,
        outcome: RequestOutcome,
    },
}

/// State of one client↔origin connection.
#[derive(Debug)]
pub struct ConnectionPipeline {
    archive: Arc<Archive>,
    recorder: Option<RecordStore>,
    settings: PipelineSettings,
    requests: RequestParser,
    responses: ResponseParser,
    completed: VecDeque<ParsedResponse>,
    outbound: OutboundBuffer,
    delivery: Option<Delivery>,
    client_eof: bool,
    server_eof: bool,
}

impl ConnectionPipeline {
    pub fn new(
        archive: Arc<Archive>,
        recorder: Option<RecordStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            archive,
            recorder,
            requests: RequestParser::new(settings.max_head),
            responses: ResponseParser::new(settings.max_head),
            completed: VecDeque::new(),
            outbound: OutboundBuffer::new(settings.outbound_capacity),
            delivery: None,
            client_eof: false,
            server_eof: false,
            settings,
        }
    }

    /// Ferry traffic until the connection is finished, then close both legs.
    pub async fn run<C, S>(mut self, client: C, server: S) -> Result<(), ProxyError>
    where
        C: AsyncRead + AsyncWrite,
        S: AsyncRead + AsyncWrite,
    {
        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        let (mut server_rd, mut server_wr) = tokio::io::split(server);

        let result = self
            .dispatch(&mut client_rd, &mut client_wr, &mut server_rd, &mut server_wr)
            .await;

        close(&mut client_wr).await;
        close(&mut server_wr).await;
        result
    }

    async fn dispatch<CR, CW, SR, SW>(
        &mut self,
        client_rd: &mut CR,
        client_wr: &mut CW,
        server_rd: &mut SR,
        server_wr: &mut SW,
    ) -> Result<(), ProxyError>
    where
        CR: AsyncRead + Unpin,
        CW: AsyncWrite + Unpin,
        SR: AsyncRead + Unpin,
        SW: AsyncWrite + Unpin,
    {
        let mut client_buf = vec![0u8; self.settings.read_chunk];
        let mut server_buf = vec![0u8; self.settings.read_chunk];

        loop {
            if self.finished() {
                tracing::debug!("Connection finished");
                return Ok(());
            }

            let read_server =
                !self.server_eof && (!self.client_eof || self.responses.outstanding() > 0);
            let read_client = !self.client_eof && !self.server_eof;
            let deciding = self.can_decide();
            let flushing = !self.outbound.is_empty() || !self.completed.is_empty();

            tokio::select! {
                read = server_rd.read(&mut server_buf), if read_server => {
                    let n = read?;
                    self.on_server_bytes(&server_buf[..n])?;
                }
                read = client_rd.read(&mut client_buf), if read_client => {
                    let n = read?;
                    self.on_client_bytes(&client_buf[..n])?;
                }
                _ = std::future::ready(()), if deciding => {
                    self.decide(server_wr).await?;
                }
                _ = std::future::ready(()), if flushing => {
                    self.flush(client_wr).await?;
                }
                _ = tokio::time::sleep(self.settings.idle) => {
                    tracing::debug!(idle = ?self.settings.idle, "Connection idle, closing");
                    return Ok(());
                }
            }
        }
    }

    fn finished(&self) -> bool {
        let drained =
            self.outbound.is_empty() && self.completed.is_empty() && self.delivery.is_none();
        if !drained {
            return false;
        }
        let unanswerable = self.server_eof && self.responses.outstanding() > 0;
        (self.client_eof && self.server_eof)
            || (self.server_eof && self.requests.is_empty())
            || (self.client_eof && self.requests.is_empty() && self.responses.outstanding() == 0)
            || unanswerable
    }

    fn can_decide(&self) -> bool {
        if self.requests.is_empty() {
            return false;
        }
        match self.delivery {
            None => true,
            Some(_) => {
                self.responses.outstanding() == 0
                    && self.completed.is_empty()
                    && self.outbound.space() > 0
            }
        }
    }

    fn on_client_bytes(&mut self, bytes: &[u8]) -> Result<(), ProxyError> {
        if bytes.is_empty() {
            tracing::debug!(queued = self.requests.len(), "Client closed its side");
            self.client_eof = true;
            return Ok(());
        }
        self.requests.parse(bytes)?;
        Ok(())
    }

    fn on_server_bytes(&mut self, bytes: &[u8]) -> Result<(), ProxyError> {
        let done = if bytes.is_empty() {
            tracing::debug!(
                outstanding = self.responses.outstanding(),
                "Origin closed its side"
            );
            self.server_eof = true;
            self.responses.finish()?.into_iter().collect()
        } else {
            self.responses.parse(bytes)?
        };

        for response in done {
            self.complete(response)?;
        }
        if self.completed.is_empty() {
            self.responses.stream_partial(&mut self.outbound);
        }
        Ok(())
    }

    fn complete(&mut self, response: ParsedResponse) -> Result<(), ProxyError> {
        if let Some(forwarded) = &response.answers {
            self.archive
                .add_response(response.wire.clone(), forwarded.index)?;
            tracing::debug!(
                index = forwarded.index,
                bytes = response.wire.len(),
                "Recorded origin response"
            );
            self.persist(ArchivedRecord {
                request: forwarded.request.clone(),
                response: response.message.clone(),
            });
        }
        self.completed.push_back(response);
        Ok(())
    }

    fn persist(&self, record: ArchivedRecord) {
        let Some(store) = self.recorder.clone() else {
            return;
        };
        tokio::task::spawn_blocking(move || match store.save(&record) {
            Ok(path) => tracing::debug!(path = %path.display(), "Exchange written"),
            Err(e) => tracing::warn!(error = %e, "Failed to write exchange"),
        });
    }

    async fn decide<W: AsyncWrite + Unpin>(&mut self, server: &mut W) -> Result<(), ProxyError> {
        if self.delivery.is_none() {
            return self.classify(server).await;
        }
        if let Some(Delivery::Waiting { index }) = self.delivery {
            let Some(bytes) = self.wait_for(index).await? else {
                tracing::debug!(index, "In-flight request abandoned, classifying again");
                self.delivery = None;
                return Ok(());
            };
            self.delivery = Some(Delivery::Streaming {
                bytes,
                sent: 0,
                outcome: RequestOutcome::Deduplicated,
            });
        }
        self.stream_cached();
        Ok(())
    }

    async fn classify<W: AsyncWrite + Unpin>(&mut self, server: &mut W) -> Result<(), ProxyError> {
        let Some(request) = self.requests.front() else {
            return Ok(());
        };
        let lookup = if self.server_eof {
            match self.archive.lookup(request) {
                Some(lookup) => lookup,
                None => {
                    tracing::debug!(
                        dropped = self.requests.len(),
                        "Origin closed, queued requests cannot be forwarded"
                    );
                    self.requests.clear();
                    return Ok(());
                }
            }
        } else {
            self.archive.lookup_or_insert(request)
        };

        match lookup {
            Lookup::Inserted(index) => {
                if let Some(request) = self.requests.pop() {
                    let wire = request.to_bytes();
                    tracing::debug!(index, request = %request.first_line(), "Forwarding to origin");
                    // registered first so a failed write still abandons the entry
                    self.responses.expect(request, index);
                    server.write_all(&wire).await?;
                    server.flush().await?;
                    metrics::record_request(RequestOutcome::Forwarded);
                }
            }
            Lookup::Ready(bytes) => {
                tracing::debug!(bytes = bytes.len(), "Answering from archive");
                self.delivery = Some(Delivery::Streaming {
                    bytes,
                    sent: 0,
                    outcome: RequestOutcome::Cached,
                });
            }
            Lookup::Pending(index) => {
                tracing::debug!(index, "Identical request already in flight");
                self.delivery = Some(Delivery::Waiting { index });
            }
        }
        Ok(())
    }

    /// Response of the in-flight entry at `index`, or `None` if the
    /// connection forwarding it went away first.
    async fn wait_for(&self, index: usize) -> Result<Option<Bytes>, ProxyError> {
        match self.archive.response(index)? {
            ResponseSlot::Ready(bytes) => return Ok(Some(bytes)),
            ResponseSlot::Abandoned => return Ok(None),
            ResponseSlot::Pending => {}
        }
        let archive = Arc::clone(&self.archive);
        let timeout = self.settings.pending_wait;
        let started = Instant::now();
        let waited =
            tokio::task::spawn_blocking(move || archive.wait_for_response(index, timeout)).await?;
        metrics::record_pending_wait(started.elapsed());
        match waited {
            Ok(bytes) => {
                tracing::debug!(index, waited = ?started.elapsed(), "In-flight request answered");
                Ok(Some(bytes))
            }
            Err(ArchiveError::Abandoned { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Push as much of the cached answer as fits; the request leaves the
    /// queue once all of it has.
    fn stream_cached(&mut self) {
        let Some(Delivery::Streaming {
            bytes,
            sent,
            outcome,
        }) = &mut self.delivery
        else {
            return;
        };
        *sent += self.outbound.push(&bytes[*sent..]);
        if *sent < bytes.len() {
            return;
        }
        let outcome = *outcome;
        self.delivery = None;
        self.requests.pop();
        metrics::record_request(outcome);
    }

    async fn flush<W: AsyncWrite + Unpin>(&mut self, client: &mut W) -> Result<(), ProxyError> {
        if !self.outbound.is_empty() {
            client.write_all(self.outbound.as_slice()).await?;
            let written = self.outbound.len();
            self.outbound.consume(written);
        }
        while let Some(response) = self.completed.front() {
            client.write_all(response.remaining()).await?;
            self.completed.pop_front();
        }
        client.flush().await?;
        self.responses.stream_partial(&mut self.outbound);
        Ok(())
    }
}

impl Drop for ConnectionPipeline {
    fn drop(&mut self) {
        for index in self.responses.awaiting_indices() {
            if let Ok(true) = self.archive.abandon(index) {
                tracing::debug!(index, "Abandoned unanswered request");
            }
        }
    }
}

async fn close<W: AsyncWrite + Unpin>(leg: &mut W) {
    match tokio::time::timeout(CLOSE_TIMEOUT, leg.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::trace!(error = %e, "Leg shutdown failed"),
        Err(_) => tracing::trace!("Leg shutdown timed out"),
    }
}
