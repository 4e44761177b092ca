//! Tests for the wire codecs, the client state machines and the responders.

use std::collections::VecDeque;

use crate::config::TransferConfig;
use crate::error::{TransferError, WireError};
use crate::ring::{ImageMetadata, ImageRingBuffer, Producer};
use crate::storage::RamAccessor;
use crate::stream::{ImageInputStream, ImageStore, InputStream, SingleImageBuffer, VecOutputStream};
use crate::transfer::reader::{FileSource, ReaderClient, ReaderState};
use crate::transfer::responder::{MemoryFileStore, ReadResponder, WriteResponder};
use crate::transfer::wire::{
    FileError, ReadRequest, ReadResponse, RpcBus, Transfer, TransferKind, WriteRequest,
    WriteResponse, CHUNK_CAP, READ_PORT_ID, WRITE_PORT_ID,
};
use crate::transfer::writer::{WriterClient, WriterState};

#[derive(Default)]
struct MockBus {
    sent: VecDeque<Transfer>,
    incoming: VecDeque<Transfer>,
}

impl RpcBus for MockBus {
    fn send(&mut self, transfer: Transfer) -> Result<(), TransferError> {
        self.sent.push_back(transfer);
        Ok(())
    }

    fn receive(&mut self) -> Option<Transfer> {
        self.incoming.pop_front()
    }
}

impl MockBus {
    fn inject_write_response(&mut self, error: FileError) {
        self.incoming.push_back(Transfer {
            kind: TransferKind::Response,
            port_id: WRITE_PORT_ID,
            remote_node_id: 96,
            transfer_id: 0,
            payload: WriteResponse { error }.encode().unwrap(),
        });
    }

    fn last_write_request(&self) -> WriteRequest {
        WriteRequest::decode(&self.sent.back().unwrap().payload).unwrap()
    }
}

/// Moves everything one side sent into the other side's inbox.
fn shuttle(from: &mut MockBus, to: &mut MockBus) {
    while let Some(transfer) = from.sent.pop_front() {
        to.incoming.push_back(transfer);
    }
}

fn staged_stream(timestamp: u32, payload: &[u8]) -> ImageInputStream<SingleImageBuffer> {
    let mut buffer = SingleImageBuffer::new();
    let mut meta = ImageMetadata::new(Producer::Camera1);
    meta.timestamp = timestamp;
    meta.payload_size = payload.len() as u32;
    buffer.add_image(&meta).unwrap();
    buffer.add_data_chunk(payload).unwrap();
    buffer.push_image().unwrap();
    ImageInputStream::new(buffer)
}

// ---------------------------------------------------------------------
// Wire codecs
// ---------------------------------------------------------------------

#[test]
fn wire_frames_round_trip() {
    let read_request = ReadRequest {
        path: b"fedcba9876543210_10".to_vec(),
        offset: 4096,
    };
    let decoded = ReadRequest::decode(&read_request.encode().unwrap()).unwrap();
    assert_eq!(decoded, read_request);

    let read_response = ReadResponse {
        error: FileError::Ok,
        data: vec![0xAB; 256],
    };
    let decoded = ReadResponse::decode(&read_response.encode().unwrap()).unwrap();
    assert_eq!(decoded, read_response);

    let write_request = WriteRequest {
        path: b"name".to_vec(),
        offset: u64::MAX,
        data: vec![],
    };
    let decoded = WriteRequest::decode(&write_request.encode().unwrap()).unwrap();
    assert_eq!(decoded, write_request);

    let write_response = WriteResponse {
        error: FileError::IoError,
    };
    let decoded = WriteResponse::decode(&write_response.encode().unwrap()).unwrap();
    assert_eq!(decoded, write_response);
}

#[test]
fn wire_rejects_oversized_fields() {
    let request = WriteRequest {
        path: vec![b'x'; 20],
        offset: 0,
        data: vec![],
    };
    assert_eq!(request.encode(), Err(WireError::PathTooLong(20)));

    let request = WriteRequest {
        path: vec![],
        offset: 0,
        data: vec![0; CHUNK_CAP + 1],
    };
    assert_eq!(request.encode(), Err(WireError::DataTooLong(CHUNK_CAP + 1)));
}

#[test]
fn wire_rejects_truncated_frames() {
    let good = WriteRequest {
        path: b"abc".to_vec(),
        offset: 1,
        data: vec![1, 2, 3, 4],
    }
    .encode()
    .unwrap();

    for cut in 0..good.len() {
        assert!(WriteRequest::decode(&good[..cut]).is_err(), "cut at {cut}");
    }

    // declared data length larger than the remaining bytes
    let mut lying = ReadResponse {
        error: FileError::Ok,
        data: vec![5; 8],
    }
    .encode()
    .unwrap();
    lying[2] = 200;
    assert!(matches!(
        ReadResponse::decode(&lying),
        Err(WireError::Truncated { .. })
    ));
}

// ---------------------------------------------------------------------
// Writer client
// ---------------------------------------------------------------------

#[test]
fn writer_full_lifecycle() {
    let payload = [0x33u8; 32];
    let mut writer = WriterClient::new(staged_stream(0xBEEF, &payload), &TransferConfig::default());
    let mut bus = MockBus::default();

    // INIT: first chunk carries the metadata record
    writer.poll(&mut bus).unwrap();
    assert_eq!(writer.state(), WriterState::WaitInit);
    let init = bus.last_write_request();
    assert_eq!(init.offset, 0);
    assert_eq!(init.data.len(), ImageMetadata::SIZE);
    assert_eq!(init.path.len(), 19);

    // TRANSFER: one payload chunk
    bus.inject_write_response(FileError::Ok);
    writer.poll(&mut bus).unwrap();
    assert_eq!(writer.state(), WriterState::WaitTransfer);
    let chunk = bus.last_write_request();
    assert_eq!(chunk.offset, ImageMetadata::SIZE as u64);
    assert_eq!(chunk.data, payload);

    // DONE: empty data at offset == metadata + payload
    bus.inject_write_response(FileError::Ok);
    writer.poll(&mut bus).unwrap();
    assert_eq!(writer.state(), WriterState::WaitDone);
    let done = bus.last_write_request();
    assert_eq!(done.data.len(), 0);
    assert_eq!(done.offset, (ImageMetadata::SIZE + payload.len()) as u64);

    // the DONE build consumed the image
    assert!(writer.stream_mut().is_empty());

    bus.inject_write_response(FileError::Ok);
    writer.poll(&mut bus).unwrap();
    assert_eq!(writer.state(), WriterState::Idle);
    assert_eq!(writer.offset(), 0);
}

#[test]
fn writer_chunks_large_payloads() {
    let payload = vec![0x5Au8; 600];
    let mut writer = WriterClient::new(staged_stream(1, &payload), &TransferConfig::default());
    let mut bus = MockBus::default();

    writer.poll(&mut bus).unwrap();
    let mut offsets = vec![bus.last_write_request().offset];
    let mut lengths = vec![bus.last_write_request().data.len()];

    while writer.state() != WriterState::WaitDone {
        bus.inject_write_response(FileError::Ok);
        writer.poll(&mut bus).unwrap();
        offsets.push(bus.last_write_request().offset);
        lengths.push(bus.last_write_request().data.len());
    }

    assert_eq!(lengths, vec![33, 256, 256, 88, 0]);
    assert_eq!(offsets, vec![0, 33, 289, 545, 633]);
}

#[test]
fn writer_retransmits_the_same_chunk_on_error() {
    let mut writer = WriterClient::new(staged_stream(2, &[1, 2, 3, 4]), &TransferConfig::default());
    let mut bus = MockBus::default();

    // init accepted, first transfer sent
    writer.poll(&mut bus).unwrap();
    bus.inject_write_response(FileError::Ok);
    writer.poll(&mut bus).unwrap();
    let first = bus.last_write_request();

    // peer rejects the chunk: the retransmission is byte-identical
    bus.inject_write_response(FileError::IoError);
    writer.poll(&mut bus).unwrap();
    assert_eq!(writer.state(), WriterState::WaitTransfer);
    let resent = bus.last_write_request();
    assert_eq!(resent, first);

    // and the stream cursor did not advance
    bus.inject_write_response(FileError::Ok);
    writer.poll(&mut bus).unwrap();
    let done = bus.last_write_request();
    assert_eq!(done.data.len(), 0);
    assert_eq!(done.offset, (ImageMetadata::SIZE + 4) as u64);
}

#[test]
fn writer_resends_init_on_error_response() {
    let mut writer = WriterClient::new(staged_stream(3, &[9; 8]), &TransferConfig::default());
    let mut bus = MockBus::default();

    writer.poll(&mut bus).unwrap();
    let first_init = bus.last_write_request();

    bus.inject_write_response(FileError::IoError);
    writer.poll(&mut bus).unwrap();
    assert_eq!(writer.state(), WriterState::WaitInit);
    assert_eq!(bus.last_write_request(), first_init);
    assert_eq!(bus.sent.len(), 2);
}

#[test]
fn writer_treats_garbage_responses_as_errors() {
    let mut writer = WriterClient::new(staged_stream(4, &[7; 4]), &TransferConfig::default());
    let mut bus = MockBus::default();

    writer.poll(&mut bus).unwrap();
    let first_init = bus.last_write_request();

    bus.incoming.push_back(Transfer {
        kind: TransferKind::Response,
        port_id: WRITE_PORT_ID,
        remote_node_id: 96,
        transfer_id: 0,
        payload: vec![0xFF],
    });
    writer.poll(&mut bus).unwrap();
    assert_eq!(writer.state(), WriterState::WaitInit);
    assert_eq!(bus.last_write_request(), first_init);
}

#[test]
fn idle_writer_with_empty_stream_stays_quiet() {
    let stream = ImageInputStream::new(SingleImageBuffer::new());
    let mut writer = WriterClient::new(stream, &TransferConfig::default());
    let mut bus = MockBus::default();

    writer.poll(&mut bus).unwrap();
    assert_eq!(writer.state(), WriterState::Idle);
    assert!(bus.sent.is_empty());
}

// ---------------------------------------------------------------------
// Reader client and responders
// ---------------------------------------------------------------------

#[test]
fn reader_pulls_a_remote_file_to_completion() {
    let config = TransferConfig::default();
    let contents: Vec<u8> = (0..700u32).map(|v| (v % 256) as u8).collect();

    let mut store = MemoryFileStore::new();
    store.add_file(b"remote.bin", contents.clone());
    let mut responder = ReadResponder::new(store, config.chunk_size);

    let source = FileSource::new(b"remote.bin".to_vec(), config.chunk_size);
    let mut reader = ReaderClient::new(source, VecOutputStream::default(), &config);
    reader.start().unwrap();

    let mut client_bus = MockBus::default();
    let mut server_bus = MockBus::default();

    for _ in 0..16 {
        reader.poll(&mut client_bus).unwrap();
        shuttle(&mut client_bus, &mut server_bus);
        responder.poll(&mut server_bus).unwrap();
        shuttle(&mut server_bus, &mut client_bus);
        if reader.state() == ReaderState::Idle && client_bus.incoming.is_empty() {
            break;
        }
    }
    // drain the final EOF response
    reader.poll(&mut client_bus).unwrap();

    assert_eq!(reader.state(), ReaderState::Idle);
    assert_eq!(reader.output_mut().data, contents);
    assert_eq!(reader.output_mut().finalized, 1);
    assert_eq!(reader.source().offset(), contents.len() as u64);
}

#[test]
fn reader_retries_on_peer_error() {
    let config = TransferConfig::default();
    let source = FileSource::new(b"missing".to_vec(), config.chunk_size);
    let mut reader = ReaderClient::new(source, VecOutputStream::default(), &config);
    reader.start().unwrap();

    let mut bus = MockBus::default();
    reader.poll(&mut bus).unwrap();
    assert_eq!(reader.state(), ReaderState::WaitResponse);
    let first = ReadRequest::decode(&bus.sent.back().unwrap().payload).unwrap();

    bus.incoming.push_back(Transfer {
        kind: TransferKind::Response,
        port_id: READ_PORT_ID,
        remote_node_id: 96,
        transfer_id: 0,
        payload: ReadResponse {
            error: FileError::IoError,
            data: Vec::new(),
        }
        .encode()
        .unwrap(),
    });
    reader.poll(&mut bus).unwrap();

    // same request again, same offset
    assert_eq!(reader.state(), ReaderState::WaitResponse);
    let resent = ReadRequest::decode(&bus.sent.back().unwrap().payload).unwrap();
    assert_eq!(resent, first);
    assert_eq!(bus.sent.len(), 2);
}

#[test]
fn read_responder_reports_missing_files() {
    let mut responder = ReadResponder::new(MemoryFileStore::new(), 256);
    let mut bus = MockBus::default();

    bus.incoming.push_back(Transfer {
        kind: TransferKind::Request,
        port_id: READ_PORT_ID,
        remote_node_id: 11,
        transfer_id: 5,
        payload: ReadRequest {
            path: b"nope".to_vec(),
            offset: 0,
        }
        .encode()
        .unwrap(),
    });
    responder.poll(&mut bus).unwrap();

    let reply = bus.sent.pop_front().unwrap();
    assert_eq!(reply.kind, TransferKind::Response);
    assert_eq!(reply.transfer_id, 5);
    let response = ReadResponse::decode(&reply.payload).unwrap();
    assert_eq!(response.error, FileError::IoError);
    assert!(response.data.is_empty());
}

#[test]
fn responders_drop_undecodable_requests_silently() {
    let mut responder = ReadResponder::new(MemoryFileStore::new(), 256);
    let mut bus = MockBus::default();

    bus.incoming.push_back(Transfer {
        kind: TransferKind::Request,
        port_id: READ_PORT_ID,
        remote_node_id: 11,
        transfer_id: 1,
        payload: vec![1, 2],
    });
    responder.poll(&mut bus).unwrap();
    assert!(bus.sent.is_empty());
}

#[test]
fn write_responder_reassembles_a_stream() {
    let mut responder = WriteResponder::new(VecOutputStream::default());
    let mut bus = MockBus::default();

    let chunks: [(u64, &[u8]); 3] = [(0, b"hello "), (6, b"world"), (11, b"")];
    for (i, (offset, data)) in chunks.into_iter().enumerate() {
        bus.incoming.push_back(Transfer {
            kind: TransferKind::Request,
            port_id: WRITE_PORT_ID,
            remote_node_id: 11,
            transfer_id: i as u8,
            payload: WriteRequest {
                path: b"stream01".to_vec(),
                offset,
                data: data.to_vec(),
            }
            .encode()
            .unwrap(),
        });
    }
    responder.poll(&mut bus).unwrap();

    assert_eq!(bus.sent.len(), 3);
    for reply in &bus.sent {
        let response = WriteResponse::decode(&reply.payload).unwrap();
        assert_eq!(response.error, FileError::Ok);
    }

    let sink = responder.output_mut();
    assert_eq!(sink.data, b"hello world");
    assert_eq!(sink.finalized, 1);
}

// ---------------------------------------------------------------------
// End-to-end: ring buffer -> writer -> responder -> sink
// ---------------------------------------------------------------------

#[test]
fn image_leaves_the_ring_and_arrives_at_the_peer() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = TransferConfig::default();
    let payload: Vec<u8> = (0..300u32).map(|v| (v * 7 % 256) as u8).collect();

    let mut flash = RamAccessor::new(0, 4096);
    let mut ring = ImageRingBuffer::new(&mut flash);
    let mut meta = ImageMetadata::new(Producer::Thermal);
    meta.timestamp = 0x00C0_FFEE;
    meta.payload_size = payload.len() as u32;
    ImageStore::add_image(&mut ring, &meta).unwrap();
    ImageStore::add_data_chunk(&mut ring, &payload).unwrap();
    ImageStore::push_image(&mut ring).unwrap();

    let mut writer = WriterClient::new(ImageInputStream::new(ring), &config);
    let mut responder = WriteResponder::new(VecOutputStream::default());
    let mut client_bus = MockBus::default();
    let mut server_bus = MockBus::default();

    for _ in 0..16 {
        writer.poll(&mut client_bus).unwrap();
        shuttle(&mut client_bus, &mut server_bus);
        responder.poll(&mut server_bus).unwrap();
        shuttle(&mut server_bus, &mut client_bus);
        if writer.state() == WriterState::Idle && client_bus.incoming.is_empty() {
            break;
        }
    }
    writer.poll(&mut client_bus).unwrap();

    assert_eq!(writer.state(), WriterState::Idle);
    assert!(writer.stream_mut().is_empty());

    // the sink holds the metadata record followed by the payload
    let sink = responder.output_mut();
    assert_eq!(sink.finalized, 1);
    assert_eq!(sink.data.len(), ImageMetadata::SIZE + payload.len());
    let received = ImageMetadata::decode(sink.data[..ImageMetadata::SIZE].try_into().unwrap())
        .unwrap();
    assert_eq!(received.timestamp, 0x00C0_FFEE);
    assert_eq!(received.payload_size as usize, payload.len());
    assert_eq!(&sink.data[ImageMetadata::SIZE..], &payload[..]);
}
