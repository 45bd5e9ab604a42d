//! Framed blocking transport over a single incoming TCP connection.
//!
//! Every packet is an 8-byte little-endian header `{ type:u32, size:u32 }`
//! followed by `size` payload bytes. All reads and writes are blocking and
//! all-or-nothing; a short read or write is a fatal transport failure. The
//! only non-blocking operation is [`DebugTransport::has_incoming_data`],
//! used to poll for client requests while the target runs.

use crate::error::Error;
use crate::protocol::PacketType;
use crate::protocol::codec::RequestReader;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};

pub struct DebugTransport {
    listener: TcpListener,
    stream: Option<TcpStream>,
}

impl DebugTransport {
    /// Start listening on `port`. Port 0 requests an ephemeral port, see
    /// [`DebugTransport::local_port`].
    pub fn bind(port: u16) -> Result<Self, Error> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        Ok(Self {
            listener,
            stream: None,
        })
    }

    pub fn local_port(&self) -> Result<u16, Error> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Block until a client connects. Only one client is ever accepted.
    pub fn accept(&mut self) -> Result<(), Error> {
        let (stream, peer) = self.listener.accept()?;
        stream.set_nodelay(true)?;
        log::info!(target: "hldp", "debug client connected from {peer}");
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut TcpStream, Error> {
        self.stream.as_mut().ok_or(Error::NotConnected)
    }

    /// Write raw bytes outside of packet framing (the banner).
    pub fn write_raw(&mut self, data: &[u8]) -> Result<(), Error> {
        self.stream()?.write_all(data)?;
        Ok(())
    }

    /// Send one packet: header plus payload.
    pub fn send(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<(), Error> {
        log::debug!(
            target: "hldp",
            "send {packet_type:?}, payload size {}",
            payload.len()
        );

        let mut header = [0u8; 8];
        header[..4].copy_from_slice(&(packet_type as u32).to_le_bytes());
        header[4..].copy_from_slice(&(payload.len() as u32).to_le_bytes());

        let stream = self.stream()?;
        stream.write_all(&header)?;
        stream.write_all(payload)?;
        Ok(())
    }

    /// Receive one packet into `reader`. Returns the decoded packet type;
    /// an unrecognized type value is reported as [`Error::UnknownPacket`]
    /// after its payload has been drained, so the connection stays usable.
    pub fn receive(&mut self, reader: &mut RequestReader) -> Result<PacketType, Error> {
        let stream = self.stream()?;

        let mut header = [0u8; 8];
        stream.read_exact(&mut header)?;
        let raw_type = u32::from_le_bytes(header[..4].try_into().expect("infallible"));
        let payload_size = u32::from_le_bytes(header[4..].try_into().expect("infallible"));

        let payload = reader.reset(payload_size as usize);
        if !payload.is_empty() {
            stream.read_exact(payload)?;
        }

        let packet_type =
            PacketType::from_repr(raw_type).ok_or(Error::UnknownPacket(raw_type))?;
        log::debug!(target: "hldp", "receive {packet_type:?}, payload size {payload_size}");
        Ok(packet_type)
    }

    /// Non-blocking readiness poll with a zero-length timeout. Also reports
    /// true when the peer has closed the connection, in which case the next
    /// blocking read surfaces the failure.
    pub fn has_incoming_data(&self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return false;
        };
        if stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        let result = match stream.peek(&mut probe) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(_) => true,
        };
        let _ = stream.set_nonblocking(false);
        result
    }
}
