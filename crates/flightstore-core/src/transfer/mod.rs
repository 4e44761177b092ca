//! Chunked file transfer over a point-to-point request/response bus.
//!
//! Two cooperative client state machines ([`WriterClient`],
//! [`ReaderClient`]) and the matching server responders
//! ([`ReadResponder`], [`WriteResponder`]), all tick-driven: one consumed
//! response and at most one emitted request per poll, with bounded per-tick
//! work and unbounded per-chunk retries. The bus is abstracted behind
//! [`wire::RpcBus`]; everything on the wire respects the 256-byte chunk cap
//! and the 19-byte stream name.

pub mod reader;
pub mod responder;
#[cfg(test)]
mod tests;
pub mod wire;
pub mod writer;

pub use reader::{FileSource, ReaderClient, ReaderState};
pub use responder::{FileAccess, MemoryFileStore, ReadResponder, WriteResponder};
pub use wire::{RpcBus, Transfer, TransferKind};
pub use writer::{WriterClient, WriterState};
