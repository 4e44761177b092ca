//! Reader client: pulls a remote file into a local output sink.

use tracing::{debug, warn};

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::stream::{OutputStream, StreamName};
use crate::transfer::wire::{
    FileError, ReadRequest, ReadResponse, RpcBus, Transfer, TransferKind, READ_PORT_ID,
};

/// States of the reader machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// No transfer in progress.
    Idle,
    /// Emit the next read request.
    SendRequest,
    /// Waiting for the peer's response.
    WaitResponse,
    /// Response was bad; repeat the same request.
    ResendRequest,
}

/// Cursor over the remote file being pulled: path, offset, chunk size.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: Vec<u8>,
    offset: u64,
    chunk_size: usize,
}

impl FileSource {
    /// Creates a cursor at the start of `path`.
    #[must_use]
    pub fn new(path: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            path,
            offset: 0,
            chunk_size,
        }
    }

    /// Remote path being read.
    #[must_use]
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    /// Retargets the cursor and rewinds it.
    pub fn set_path(&mut self, path: Vec<u8>) {
        self.path = path;
        self.offset = 0;
    }

    /// Current byte offset.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Moves the cursor.
    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Bytes requested per chunk.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

/// Client state machine that pulls a remote file chunk by chunk over the
/// `Read` service and forwards the bytes to a local [`OutputStream`].
///
/// Mirror of the writer: one response consumed and at most one request
/// emitted per tick, unbounded retries per chunk. An empty response chunk
/// marks end-of-file, finalizes the output and parks the machine in
/// [`ReaderState::Idle`] until [`start`](Self::start) is called again.
pub struct ReaderClient<O: OutputStream> {
    source: FileSource,
    output: O,
    state: ReaderState,
    pending: Option<ReadRequest>,
    remote_node_id: u8,
    transfer_id: u8,
}

impl<O: OutputStream> ReaderClient<O> {
    /// Creates an idle reader pulling `source` into `output`.
    pub fn new(source: FileSource, output: O, config: &TransferConfig) -> Self {
        Self {
            source,
            output,
            state: ReaderState::Idle,
            pending: None,
            remote_node_id: config.remote_node_id,
            transfer_id: 0,
        }
    }

    /// Current machine state.
    #[must_use]
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// The remote-file cursor.
    #[must_use]
    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// The local sink.
    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Begins (or restarts) the transfer from the source's current offset.
    pub fn start(&mut self) -> Result<(), TransferError> {
        let name = StreamName::from_path(&self.source.path);
        self.output.initialize(&name)?;
        self.state = ReaderState::SendRequest;
        Ok(())
    }

    /// One cooperative tick: consume one response, then emit at most one
    /// request.
    pub fn poll<B: RpcBus>(&mut self, bus: &mut B) -> Result<(), TransferError> {
        self.respond(bus);
        self.request(bus)
    }

    fn respond<B: RpcBus>(&mut self, bus: &mut B) {
        if self.state != ReaderState::WaitResponse {
            return;
        }
        let Some(transfer) = bus.receive() else {
            return;
        };
        if transfer.kind != TransferKind::Response {
            warn!("reader: expected a response transfer");
            return;
        }

        let response = match ReadResponse::decode(&transfer.payload) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "reader: undecodable response");
                self.state = ReaderState::ResendRequest;
                return;
            }
        };

        if response.error != FileError::Ok {
            warn!(error = ?response.error, "reader: peer reported an error");
            self.state = ReaderState::ResendRequest;
            return;
        }

        if self.output.output(&response.data).is_err() {
            warn!("reader: local output rejected the chunk");
            self.state = ReaderState::ResendRequest;
            return;
        }

        if response.data.is_empty() {
            debug!("reader: end of file");
            let _ = self.output.finalize();
            self.pending = None;
            self.state = ReaderState::Idle;
            return;
        }

        self.source.offset += response.data.len() as u64;
        self.state = ReaderState::SendRequest;
    }

    fn request<B: RpcBus>(&mut self, bus: &mut B) -> Result<(), TransferError> {
        match self.state {
            ReaderState::SendRequest => {
                self.pending = Some(ReadRequest {
                    path: self.source.path.clone(),
                    offset: self.source.offset,
                });
            }
            ReaderState::ResendRequest => {}
            ReaderState::Idle | ReaderState::WaitResponse => return Ok(()),
        }

        let Some(request) = self.pending.as_ref() else {
            return Ok(());
        };
        let payload = request.encode()?;
        bus.send(Transfer {
            kind: TransferKind::Request,
            port_id: READ_PORT_ID,
            remote_node_id: self.remote_node_id,
            transfer_id: self.transfer_id,
            payload,
        })?;
        self.transfer_id = self.transfer_id.wrapping_add(1);
        self.state = ReaderState::WaitResponse;
        debug!(offset = self.source.offset, "reader: request sent");
        Ok(())
    }
}
