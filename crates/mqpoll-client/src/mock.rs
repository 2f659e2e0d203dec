//! In-memory transport for tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use mqpoll_core::{decode_frame, Packet, ProtocolVersion};
use parking_lot::Mutex;

use crate::error::{ClientError, Result};
use crate::transport::{Connector, Transport};

#[derive(Debug, Default)]
struct MockState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    eof: bool,
    closed: bool,
    reclaimed: usize,
    fail_writes: bool,
}

/// Scripted byte stream. Clones share state, so a test keeps one handle
/// while the client owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport(Arc<Mutex<MockState>>);

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        self.0.lock().inbound.extend(bytes);
    }

    pub fn push_packet(&self, packet: &Packet, version: ProtocolVersion) {
        let frame = packet.pack(version).unwrap();
        self.push_bytes(&frame);
    }

    /// Reads return EOF once the queued bytes are consumed.
    pub fn close_inbound(&self) {
        self.0.lock().eof = true;
    }

    pub fn fail_writes(&self) {
        self.0.lock().fail_writes = true;
    }

    pub fn take_sent_bytes(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.lock().outbound)
    }

    /// Decode and drain everything the client has written.
    pub fn take_sent(&self, version: ProtocolVersion) -> Vec<Packet> {
        let bytes = self.take_sent_bytes();
        let mut packets = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let (packet, used) = decode_frame(&bytes[offset..], version).unwrap().unwrap();
            packets.push(packet);
            offset += used;
        }
        packets
    }

    pub fn is_closed(&self) -> bool {
        self.0.lock().closed
    }

    pub fn reclaim_count(&self) -> usize {
        self.0.lock().reclaimed
    }

    fn reset(&self) {
        *self.0.lock() = MockState::default();
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.lock();
        if state.inbound.is_empty() {
            return if state.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.lock();
        if state.fail_writes || state.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        state.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn poll_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        let state = self.0.lock();
        Ok(!state.inbound.is_empty() || state.eof)
    }

    fn close(&mut self) {
        self.0.lock().closed = true;
    }

    fn reclaim(&mut self) {
        self.0.lock().reclaimed += 1;
    }
}

/// Hands out the shared [`MockTransport`], optionally failing the first
/// few opens. Each successful open starts from a fresh stream preloaded with
/// the next scripted batch of packets.
#[derive(Debug, Clone)]
pub struct MockConnector {
    pub transport: MockTransport,
    version: ProtocolVersion,
    failures: Arc<Mutex<u32>>,
    scripts: Arc<Mutex<VecDeque<Vec<Packet>>>>,
    opens: Arc<Mutex<u32>>,
}

impl MockConnector {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            transport: MockTransport::new(),
            version,
            failures: Arc::new(Mutex::new(0)),
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            opens: Arc::new(Mutex::new(0)),
        }
    }

    pub fn fail_next(&self, count: u32) {
        *self.failures.lock() = count;
    }

    /// Queue the packets the broker "sends" right after the next open.
    pub fn script(&self, packets: Vec<Packet>) {
        self.scripts.lock().push_back(packets);
    }

    pub fn opens(&self) -> u32 {
        *self.opens.lock()
    }
}

impl Connector for MockConnector {
    fn open(&mut self, _host: &str, _port: u16, _timeout: Duration) -> Result<Box<dyn Transport>> {
        *self.opens.lock() += 1;
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ClientError::Io(io::ErrorKind::ConnectionRefused.into()));
            }
        }
        self.transport.reset();
        if let Some(packets) = self.scripts.lock().pop_front() {
            for packet in &packets {
                self.transport.push_packet(packet, self.version);
            }
        }
        Ok(Box::new(self.transport.clone()))
    }
}
