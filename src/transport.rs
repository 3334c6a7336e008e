//! Per-tick frame transport: one channel-index byte followed by 16-bit R/G/B,
//! framed by an opaque protocol header the discovery/pairing collaborator
//! already computed. This crate treats that header as an opaque byte slice
//! it never inspects.

use std::error::Error;
use std::net::UdpSocket;

/// A single light's channel assignment and its current RGB16 value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Channel {
    pub index: u8,
    pub rgb16: (u16, u16, u16),
}

/// Sends one assembled frame per tick. The header is opaque to this crate —
/// it is handed the bytes a separate discovery/pairing collaborator already
/// produced and appends the per-channel payload unmodified.
pub trait Transport {
    fn send_frame(&mut self, header: &[u8], channels: &[Channel]) -> Result<(), Box<dyn Error>>;
}

/// Serializes `header ++ (index, r_hi, r_lo, g_hi, g_lo, b_hi, b_lo)*` and
/// fires it as a single UDP datagram, matching the wire contract's
/// channel-index-byte-then-16-bit-RGB framing.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn connect(local_addr: &str, remote_addr: &str) -> Result<Self, Box<dyn Error>> {
        let socket = UdpSocket::bind(local_addr)?;
        socket.connect(remote_addr)?;
        Ok(UdpTransport { socket })
    }

    pub fn encode_frame(header: &[u8], channels: &[Channel]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(header.len() + channels.len() * 7);
        buf.extend_from_slice(header);
        for channel in channels {
            buf.push(channel.index);
            let (r, g, b) = channel.rgb16;
            buf.extend_from_slice(&r.to_be_bytes());
            buf.extend_from_slice(&g.to_be_bytes());
            buf.extend_from_slice(&b.to_be_bytes());
        }
        buf
    }
}

impl Transport for UdpTransport {
    fn send_frame(&mut self, header: &[u8], channels: &[Channel]) -> Result<(), Box<dyn Error>> {
        let buf = Self::encode_frame(header, channels);
        self.socket.send(&buf)?;
        Ok(())
    }
}

/// A transport that only logs at trace level, for when the out-of-scope
/// discovery/pairing collaborator hasn't wired up a real socket yet.
#[derive(Default)]
pub struct LoggingTransport;

impl Transport for LoggingTransport {
    fn send_frame(&mut self, _header: &[u8], channels: &[Channel]) -> Result<(), Box<dyn Error>> {
        log::trace!("frame: {} channels", channels.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_frame_prefixes_header_then_packs_channels() {
        let header = [0xAA, 0xBB];
        let channels = [Channel { index: 3, rgb16: (0x1234, 0x5678, 0x9ABC) }];
        let buf = UdpTransport::encode_frame(&header, &channels);
        assert_eq!(buf, vec![0xAA, 0xBB, 3, 0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
    }

    #[test]
    fn encode_frame_packs_multiple_channels_in_order() {
        let channels = [
            Channel { index: 0, rgb16: (0, 0, 0) },
            Channel { index: 1, rgb16: (0xFFFF, 0xFFFF, 0xFFFF) },
        ];
        let buf = UdpTransport::encode_frame(&[], &channels);
        assert_eq!(buf.len(), 14);
        assert_eq!(buf[0], 0);
        assert_eq!(&buf[1..7], &[0, 0, 0, 0, 0, 0]);
        assert_eq!(buf[7], 1);
        assert_eq!(&buf[8..14], &[0xFF; 6]);
    }
}
