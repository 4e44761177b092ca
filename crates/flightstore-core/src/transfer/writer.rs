//! Writer client: drains one input stream over the remote `Write` service.

use tracing::{debug, warn};

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::stream::InputStream;
use crate::transfer::wire::{
    RpcBus, Transfer, TransferKind, WriteRequest, WriteResponse, FileError, WRITE_PORT_ID,
};

/// States of the writer machine. `Send*` states emit a request on the next
/// tick; `Wait*` states sit on an outstanding request; `Resend*` states
/// retransmit the cached request unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Nothing to do; polls the stream for the next image.
    Idle,
    /// Emit the first chunk (the metadata record).
    SendInit,
    /// Waiting for the init acknowledgement.
    WaitInit,
    /// Init failed; retransmit it.
    ResendInit,
    /// Emit the next payload chunk.
    SendTransfer,
    /// Waiting for a chunk acknowledgement.
    WaitTransfer,
    /// Chunk delivery failed; retransmit it.
    ResendTransfer,
    /// Stream drained; emit the zero-length end marker.
    SendDone,
    /// Waiting for the final acknowledgement.
    WaitDone,
    /// End marker failed; retransmit it.
    ResendDone,
}

/// Client state machine that walks an [`InputStream`] and pushes it to the
/// peer chunk by chunk over the `Write` service.
///
/// Driven by periodic ticks: each [`poll`](Self::poll) consumes at most one
/// pending response and emits at most one request. Retries are unbounded
/// per chunk; a retransmission repeats the same bytes at the same offset
/// without advancing the stream.
pub struct WriterClient<S: InputStream> {
    stream: S,
    state: WriterState,
    size: usize,
    offset: u64,
    pending: Option<WriteRequest>,
    chunk_size: usize,
    remote_node_id: u8,
    transfer_id: u8,
}

impl<S: InputStream> WriterClient<S> {
    /// Creates an idle writer over `stream`.
    pub fn new(stream: S, config: &TransferConfig) -> Self {
        Self {
            stream,
            state: WriterState::Idle,
            size: 0,
            offset: 0,
            pending: None,
            chunk_size: config.chunk_size,
            remote_node_id: config.remote_node_id,
            transfer_id: 0,
        }
    }

    /// Current machine state.
    #[must_use]
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Byte offset of the next chunk to send.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Logical stream size recorded at init, zero before.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The wrapped stream.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// One cooperative tick: consume one response, then emit at most one
    /// request.
    pub fn poll<B: RpcBus>(&mut self, bus: &mut B) -> Result<(), TransferError> {
        self.respond(bus);
        self.request(bus)
    }

    fn reset(&mut self) {
        self.state = WriterState::Idle;
        self.size = 0;
        self.offset = 0;
        self.pending = None;
    }

    fn respond<B: RpcBus>(&mut self, bus: &mut B) {
        let Some(transfer) = bus.receive() else {
            return;
        };
        if transfer.kind != TransferKind::Response {
            warn!("writer: expected a response transfer");
            return;
        }

        // a malformed response counts as a failed delivery
        let ok = match WriteResponse::decode(&transfer.payload) {
            Ok(response) => response.error == FileError::Ok,
            Err(e) => {
                warn!(error = %e, "writer: undecodable response");
                false
            }
        };

        self.state = match (self.state, ok) {
            (WriterState::WaitInit, true) => WriterState::SendTransfer,
            (WriterState::WaitTransfer, true) => {
                if self.offset < self.size as u64 {
                    WriterState::SendTransfer
                } else {
                    WriterState::SendDone
                }
            }
            (WriterState::WaitDone, true) => {
                debug!("writer: stream delivered");
                self.reset();
                return;
            }
            (WriterState::WaitInit, false) => WriterState::ResendInit,
            (WriterState::WaitTransfer, false) => WriterState::ResendTransfer,
            (WriterState::WaitDone, false) => WriterState::ResendDone,
            (state, _) => {
                debug!(?state, "writer: stray response ignored");
                state
            }
        };
    }

    fn request<B: RpcBus>(&mut self, bus: &mut B) -> Result<(), TransferError> {
        if matches!(
            self.state,
            WriterState::WaitInit | WriterState::WaitTransfer | WriterState::WaitDone
        ) {
            return Ok(());
        }

        if self.state == WriterState::Idle {
            if self.stream.is_empty() {
                return Ok(());
            }
            self.state = WriterState::SendInit;
        }

        match self.state {
            WriterState::SendInit => {
                let mut buf = vec![0u8; self.chunk_size];
                let n = self.stream.initialize(&mut buf)?;
                buf.truncate(n);

                self.size = self.stream.size();
                let request = WriteRequest {
                    path: self.stream.name().as_bytes().to_vec(),
                    offset: self.offset,
                    data: buf,
                };
                self.offset += n as u64;
                self.pending = Some(request);
                self.state = WriterState::WaitInit;
            }
            WriterState::SendTransfer => {
                let mut buf = vec![0u8; self.chunk_size];
                let n = self.stream.get_chunk(&mut buf)?;
                buf.truncate(n);

                let request = WriteRequest {
                    path: self.stream.name().as_bytes().to_vec(),
                    offset: self.offset,
                    data: buf,
                };
                self.offset += n as u64;
                self.pending = Some(request);
                self.state = WriterState::WaitTransfer;
            }
            WriterState::SendDone => {
                // the empty chunk is the stream's end-of-stream sentinel
                // and pops the image; retransmits must not repeat it
                self.stream.get_chunk(&mut [])?;
                self.pending = Some(WriteRequest {
                    path: self.stream.name().as_bytes().to_vec(),
                    offset: self.offset,
                    data: Vec::new(),
                });
                self.state = WriterState::WaitDone;
            }
            WriterState::ResendInit => self.state = WriterState::WaitInit,
            WriterState::ResendTransfer => self.state = WriterState::WaitTransfer,
            WriterState::ResendDone => self.state = WriterState::WaitDone,
            _ => return Ok(()),
        }

        let Some(request) = self.pending.as_ref() else {
            return Ok(());
        };
        let payload = request.encode()?;
        bus.send(Transfer {
            kind: TransferKind::Request,
            port_id: WRITE_PORT_ID,
            remote_node_id: self.remote_node_id,
            transfer_id: self.transfer_id,
            payload,
        })?;
        self.transfer_id = self.transfer_id.wrapping_add(1);
        debug!(state = ?self.state, offset = self.offset, "writer: request sent");
        Ok(())
    }
}
