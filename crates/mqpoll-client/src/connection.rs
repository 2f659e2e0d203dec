//! Packet framing over a [`Transport`].
//!
//! One packet at a time: the fixed header byte, the remaining-length varint a
//! byte at a time, then the body. Any partial read is bounded by a deadline.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use mqpoll_core::varint;
use mqpoll_core::{decode_packet, Packet, ProtocolVersion};

use crate::error::{ClientError, Result};
use crate::transport::Transport;

/// Poll interval while a write keeps blocking.
const SEND_RETRY: Duration = Duration::from_millis(10);

/// Read one packet.
///
/// `timeout` bounds the whole read, including waiting for the first byte.
/// Returns `Ok(None)` for packets the client does not handle (AUTH, reserved
/// types). A peer close surfaces as [`ClientError::ConnectionClosed`].
pub fn read_packet(
    transport: &mut dyn Transport,
    version: ProtocolVersion,
    timeout: Duration,
) -> Result<Option<Packet>> {
    let deadline = Instant::now() + timeout;

    let mut header = [0u8; 1];
    read_exact(transport, &mut header, deadline)?;

    let mut len_bytes = Vec::with_capacity(varint::MAX_BYTES);
    let remaining = loop {
        let mut byte = [0u8; 1];
        read_exact(transport, &mut byte, deadline)?;
        len_bytes.push(byte[0]);
        if let Some((value, _)) = varint::decode_partial(&len_bytes)? {
            break value as usize;
        }
    };

    let mut body = vec![0u8; remaining];
    read_exact(transport, &mut body, deadline)?;

    let packet = decode_packet(header[0], &body, version)?;
    match &packet {
        Some(p) => log::trace!("received {} ({} bytes)", p.packet_type().name(), remaining),
        None => log::debug!("ignoring packet type {:#04x}", header[0] >> 4),
    }
    Ok(packet)
}

/// Fill `buf` completely, waiting for readability until `deadline`.
fn read_exact(transport: &mut dyn Transport, buf: &mut [u8], deadline: Instant) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match transport.read(&mut buf[filled..]) {
            Ok(0) => return Err(ClientError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() || !transport.poll_readable(remaining)? {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("read timed out with {} of {} bytes", filled, buf.len()),
                    )
                    .into());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Encode and write one packet, retrying while the transport would block.
pub fn send_packet(
    transport: &mut dyn Transport,
    packet: &Packet,
    version: ProtocolVersion,
    timeout: Duration,
) -> Result<()> {
    let frame = packet.pack(version)?;
    write_frame(transport, &frame, timeout)?;
    log::trace!("sent {} ({} bytes)", packet.packet_type().name(), frame.len());
    Ok(())
}

/// Write pre-encoded bytes in full.
pub fn write_frame(transport: &mut dyn Transport, frame: &[u8], timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut written = 0;
    while written < frame.len() {
        match transport.write(&frame[written..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "send timed out").into());
                }
                std::thread::sleep(SEND_RETRY);
            }
            Err(e) => return Err(e.into()),
        }
    }
    loop {
        match transport.flush() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                std::thread::sleep(SEND_RETRY);
            }
            Err(e) => return Err(e.into()),
        }
    }
}
