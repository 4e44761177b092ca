//! Server-side responders for the file `Read` and `Write` services.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{RingError, TransferError};
use crate::stream::{OutputStream, StreamName};
use crate::transfer::wire::{
    FileError, ReadRequest, ReadResponse, RpcBus, Transfer, TransferKind, WriteRequest,
    WriteResponse, CHUNK_CAP,
};

/// Random-access read surface the read responder serves from.
pub trait FileAccess {
    /// Reads up to `buf.len()` bytes of `path` at `offset`; returns the
    /// byte count, 0 at end-of-file.
    fn read(&mut self, path: &[u8], offset: u64, buf: &mut [u8]) -> Result<usize, RingError>;
}

/// In-memory file store keyed by wire path; doubles as a fixture for the
/// peer side in tests.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: HashMap<Vec<u8>, Vec<u8>>,
}

impl MemoryFileStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `data` under `path`.
    pub fn add_file(&mut self, path: &[u8], data: Vec<u8>) {
        self.files.insert(path.to_vec(), data);
    }

    /// Contents stored under `path`, if any.
    #[must_use]
    pub fn file(&self, path: &[u8]) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }
}

impl FileAccess for MemoryFileStore {
    fn read(&mut self, path: &[u8], offset: u64, buf: &mut [u8]) -> Result<usize, RingError> {
        let data = self.files.get(path).ok_or(RingError::Read)?;
        let offset = usize::try_from(offset).map_err(|_| RingError::OutOfBounds)?;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }
}

/// Services `Read(path, offset)` requests from a local [`FileAccess`].
///
/// Stateless across responses: every pending request is answered in the
/// tick it is seen. Requests that fail to decode are logged and dropped;
/// the peer's retry machinery recovers.
pub struct ReadResponder<F: FileAccess> {
    access: F,
    chunk_size: usize,
}

impl<F: FileAccess> ReadResponder<F> {
    /// Serves chunks of at most `chunk_size` bytes from `access`.
    pub fn new(access: F, chunk_size: usize) -> Self {
        Self {
            access,
            chunk_size: chunk_size.min(CHUNK_CAP),
        }
    }

    /// The local file surface.
    pub fn access_mut(&mut self) -> &mut F {
        &mut self.access
    }

    /// Services all pending requests.
    pub fn poll<B: RpcBus>(&mut self, bus: &mut B) -> Result<(), TransferError> {
        while let Some(transfer) = bus.receive() {
            if transfer.kind != TransferKind::Request {
                warn!("read responder: expected a request transfer");
                continue;
            }

            let request = match ReadRequest::decode(&transfer.payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "read responder: dropping undecodable request");
                    continue;
                }
            };

            let mut data = vec![0u8; self.chunk_size];
            let response = match self.access.read(&request.path, request.offset, &mut data) {
                Ok(n) => {
                    data.truncate(n);
                    ReadResponse {
                        error: FileError::Ok,
                        data,
                    }
                }
                Err(e) => {
                    debug!(error = %e, "read responder: local read failed");
                    ReadResponse {
                        error: FileError::IoError,
                        data: Vec::new(),
                    }
                }
            };

            bus.send(Transfer {
                kind: TransferKind::Response,
                port_id: transfer.port_id,
                remote_node_id: transfer.remote_node_id,
                transfer_id: transfer.transfer_id,
                payload: response.encode()?,
            })?;
        }
        Ok(())
    }
}

/// Services `Write(path, offset, data)` requests into a local
/// [`OutputStream`].
///
/// The first chunk of a stream (offset zero) opens the sink under the
/// request path; an empty data field closes it. Replies `IO_ERROR` when
/// the local sink rejects bytes, otherwise `OK`.
pub struct WriteResponder<O: OutputStream> {
    output: O,
}

impl<O: OutputStream> WriteResponder<O> {
    /// Writes incoming streams into `output`.
    pub fn new(output: O) -> Self {
        Self { output }
    }

    /// The local sink.
    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Services all pending requests.
    pub fn poll<B: RpcBus>(&mut self, bus: &mut B) -> Result<(), TransferError> {
        while let Some(transfer) = bus.receive() {
            if transfer.kind != TransferKind::Request {
                warn!("write responder: expected a request transfer");
                continue;
            }

            let request = match WriteRequest::decode(&transfer.payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "write responder: dropping undecodable request");
                    continue;
                }
            };

            let error = match self.apply(&request) {
                Ok(()) => FileError::Ok,
                Err(e) => {
                    debug!(error = %e, "write responder: local sink failed");
                    FileError::IoError
                }
            };

            bus.send(Transfer {
                kind: TransferKind::Response,
                port_id: transfer.port_id,
                remote_node_id: transfer.remote_node_id,
                transfer_id: transfer.transfer_id,
                payload: WriteResponse { error }.encode()?,
            })?;
        }
        Ok(())
    }

    fn apply(&mut self, request: &WriteRequest) -> Result<(), RingError> {
        if request.offset == 0 && !request.data.is_empty() {
            self.output
                .initialize(&StreamName::from_path(&request.path))?;
        }
        if request.data.is_empty() {
            return self.output.finalize();
        }
        self.output.output(&request.data)
    }
}
