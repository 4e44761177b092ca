//! RPC surface: bus contract, fixed port ids and frame payload codecs.
//!
//! The bus itself (framing, node addressing, subscription bookkeeping) lives
//! outside this crate; the state machines see it only as [`RpcBus`]. Frame
//! payloads are packed little-endian with explicit length prefixes and hard
//! caps: 19 bytes of path, 256 bytes of data per chunk.

use bytes::{Buf, BufMut};

use crate::error::{TransferError, WireError};
use crate::stream::NAME_LENGTH;

/// Protocol cap on the data carried by one request or response.
pub const CHUNK_CAP: usize = 256;

/// Fixed port id of the file `Read` service.
pub const READ_PORT_ID: u16 = 408;

/// Fixed port id of the file `Write` service.
pub const WRITE_PORT_ID: u16 = 407;

/// Wire error codes of the file service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FileError {
    /// Operation succeeded.
    Ok = 0,
    /// The peer could not service the request.
    IoError = 1,
}

impl FileError {
    fn from_wire(value: u16) -> Self {
        if value == 0 {
            Self::Ok
        } else {
            Self::IoError
        }
    }
}

/// Direction of a transfer on the request/response bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Client-to-server request.
    Request,
    /// Server-to-client response.
    Response,
}

/// One transfer as seen by the state machines.
#[derive(Debug, Clone)]
pub struct Transfer {
    /// Request or response.
    pub kind: TransferKind,
    /// Service port the transfer belongs to.
    pub port_id: u16,
    /// The other node involved.
    pub remote_node_id: u8,
    /// Per-transfer id, echoed by responses.
    pub transfer_id: u8,
    /// Serialized frame payload.
    pub payload: Vec<u8>,
}

/// Narrow contract to the point-to-point request/response transport.
///
/// `send` enqueues one outgoing transfer; `receive` drains one pending
/// incoming transfer, if any. Implementations deliver each incoming
/// transfer to exactly one consumer.
pub trait RpcBus {
    /// Enqueues `transfer` for transmission.
    fn send(&mut self, transfer: Transfer) -> Result<(), TransferError>;
    /// Takes the next pending incoming transfer.
    fn receive(&mut self) -> Option<Transfer>;
}

fn put_path(out: &mut Vec<u8>, path: &[u8]) -> Result<(), WireError> {
    if path.len() > NAME_LENGTH {
        return Err(WireError::PathTooLong(path.len()));
    }
    out.put_u8(path.len() as u8);
    out.put_slice(path);
    Ok(())
}

fn take_path(buf: &mut &[u8]) -> Result<Vec<u8>, WireError> {
    need(buf, 1)?;
    let len = usize::from(buf.get_u8());
    if len > NAME_LENGTH {
        return Err(WireError::PathTooLong(len));
    }
    need(buf, len)?;
    let mut path = vec![0u8; len];
    buf.copy_to_slice(&mut path);
    Ok(path)
}

fn put_data(out: &mut Vec<u8>, data: &[u8]) -> Result<(), WireError> {
    if data.len() > CHUNK_CAP {
        return Err(WireError::DataTooLong(data.len()));
    }
    out.put_u16_le(data.len() as u16);
    out.put_slice(data);
    Ok(())
}

fn take_data(buf: &mut &[u8]) -> Result<Vec<u8>, WireError> {
    need(buf, 2)?;
    let len = usize::from(buf.get_u16_le());
    if len > CHUNK_CAP {
        return Err(WireError::DataTooLong(len));
    }
    need(buf, len)?;
    let mut data = vec![0u8; len];
    buf.copy_to_slice(&mut data);
    Ok(data)
}

fn need(buf: &&[u8], n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        return Err(WireError::Truncated {
            need: n,
            have: buf.remaining(),
        });
    }
    Ok(())
}

/// `Read(path, offset)` request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// Stream name, at most 19 bytes.
    pub path: Vec<u8>,
    /// Byte offset into the stream.
    pub offset: u64,
}

impl ReadRequest {
    /// Serializes the request.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(9 + self.path.len());
        out.put_u64_le(self.offset);
        put_path(&mut out, &self.path)?;
        Ok(out)
    }

    /// Deserializes a request payload.
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        need(&buf, 8)?;
        let offset = buf.get_u64_le();
        let path = take_path(&mut buf)?;
        Ok(Self { path, offset })
    }
}

/// `Read` response payload: data plus an error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    /// Outcome of the read.
    pub error: FileError,
    /// Up to one chunk of data; empty marks end-of-stream.
    pub data: Vec<u8>,
}

impl ReadResponse {
    /// Serializes the response.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.put_u16_le(self.error as u16);
        put_data(&mut out, &self.data)?;
        Ok(out)
    }

    /// Deserializes a response payload.
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        need(&buf, 2)?;
        let error = FileError::from_wire(buf.get_u16_le());
        let data = take_data(&mut buf)?;
        Ok(Self { error, data })
    }
}

/// `Write(path, offset, data)` request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    /// Stream name, at most 19 bytes.
    pub path: Vec<u8>,
    /// Byte offset of this chunk in the stream.
    pub offset: u64,
    /// Up to one chunk of data; empty marks end-of-stream.
    pub data: Vec<u8>,
}

impl WriteRequest {
    /// Serializes the request.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(11 + self.path.len() + self.data.len());
        out.put_u64_le(self.offset);
        put_path(&mut out, &self.path)?;
        put_data(&mut out, &self.data)?;
        Ok(out)
    }

    /// Deserializes a request payload.
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        need(&buf, 8)?;
        let offset = buf.get_u64_le();
        let path = take_path(&mut buf)?;
        let data = take_data(&mut buf)?;
        Ok(Self { path, offset, data })
    }
}

/// `Write` response payload: just an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse {
    /// Outcome of the write.
    pub error: FileError,
}

impl WriteResponse {
    /// Serializes the response.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(2);
        out.put_u16_le(self.error as u16);
        Ok(out)
    }

    /// Deserializes a response payload.
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        need(&buf, 2)?;
        Ok(Self {
            error: FileError::from_wire(buf.get_u16_le()),
        })
    }
}
