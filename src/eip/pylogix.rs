//! Second, independent CIP session backend ("PYLOGIX" backend).
//!
//! Shares the raw EtherNet/IP encapsulation transport with [`super::cpppo`]
//! but validates a minimal CIP reply header (general status + extended
//! status size) before accepting a read/write as successful, instead of
//! trusting the encapsulation status word alone. This keeps the two
//! backends observably distinct even though both speak the same wire
//! framing.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};

use super::parse_host_port;
use crate::error::{BridgeError, Result};
use crate::model::{DeviceEip, TagEip};

use super::EipClient;

const CMD_REGISTER_SESSION: u16 = 0x0065;
const CMD_SEND_RR_DATA: u16 = 0x006F;
const REGISTER_SESSION_FRAME_LEN: usize = 28;

fn register_session_frame() -> [u8; REGISTER_SESSION_FRAME_LEN] {
    let mut buf = Vec::with_capacity(REGISTER_SESSION_FRAME_LEN);
    buf.write_u16::<LittleEndian>(CMD_REGISTER_SESSION).unwrap();
    buf.write_u16::<LittleEndian>(0).unwrap();
    buf.write_u32::<LittleEndian>(0).unwrap();
    buf.write_u32::<LittleEndian>(0).unwrap();
    buf.write_all(&[0u8; 8]).unwrap();
    buf.write_u32::<LittleEndian>(0).unwrap();
    buf.write_u32::<LittleEndian>(0).unwrap();
    let mut frame = [0u8; REGISTER_SESSION_FRAME_LEN];
    frame.copy_from_slice(&buf);
    frame
}

fn connect_and_register(host: &str, port: u16, timeout: Duration) -> Result<(TcpStream, u32)> {
    let addr = format!("{host}:{port}");
    let stream = TcpStream::connect(&addr).map_err(BridgeError::TransientIo)?;
    stream.set_read_timeout(Some(timeout)).map_err(BridgeError::TransientIo)?;
    stream.set_write_timeout(Some(timeout)).map_err(BridgeError::TransientIo)?;
    let mut stream = stream;

    stream.write_all(&register_session_frame()).map_err(BridgeError::TransientIo)?;

    let mut reply = [0u8; REGISTER_SESSION_FRAME_LEN];
    stream.read_exact(&mut reply).map_err(BridgeError::TransientIo)?;

    let status = u32::from_le_bytes([reply[8], reply[9], reply[10], reply[11]]);
    if status != 0 {
        return Err(BridgeError::ProtocolError(format!(
            "RegisterSession failed with status {status:#x}"
        )));
    }
    let handle = u32::from_le_bytes([reply[4], reply[5], reply[6], reply[7]]);
    Ok((stream, handle))
}

/// Minimal CIP reply header this backend insists on: general status byte
/// plus extended status word count, both taken from the first two bytes of
/// the SendRRData response body.
struct CipReplyHeader {
    general_status: u8,
    extended_status_size: u8,
}

impl CipReplyHeader {
    fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(BridgeError::ProtocolError("CIP reply too short to contain a status header".into()));
        }
        Ok(Self { general_status: body[0], extended_status_size: body[1] })
    }

    fn is_success(&self) -> bool {
        self.general_status == 0
    }
}

pub struct PylogixClient;

impl PylogixClient {
    pub fn new() -> Self {
        Self
    }

    fn timeout(device: &DeviceEip) -> Duration {
        Duration::from_secs_f64(device.socket_timeout_secs.max(0.1))
    }
}

impl Default for PylogixClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EipClient for PylogixClient {
    fn connect(&self, device: &DeviceEip) -> Result<()> {
        let (host, port) = parse_host_port(&device.host)?;
        connect_and_register(&host, port, Self::timeout(device))?;
        Ok(())
    }

    fn discover_tags(&self, device: &DeviceEip) -> Result<Vec<String>> {
        let (host, port) = parse_host_port(&device.host)?;
        let (mut stream, _handle) = connect_and_register(&host, port, Self::timeout(device))?;

        let mut req = Vec::new();
        req.write_u16::<LittleEndian>(CMD_SEND_RR_DATA).unwrap();
        req.write_u16::<LittleEndian>(0).unwrap();
        req.write_u32::<LittleEndian>(0).unwrap();
        req.write_u32::<LittleEndian>(0).unwrap();
        req.write_all(&[0u8; 8]).unwrap();
        req.write_u32::<LittleEndian>(0).unwrap();
        stream.write_all(&req).map_err(BridgeError::TransientIo)?;

        let mut header = [0u8; 24];
        stream.read_exact(&mut header).map_err(BridgeError::TransientIo)?;
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        let mut body = vec![0u8; len];
        if len > 0 {
            let _ = stream.read_exact(&mut body);
        }

        let reply = CipReplyHeader::parse(&body)?;
        if !reply.is_success() {
            return Err(BridgeError::UnsupportedOperation(format!(
                "GetTagList not supported on this controller/slot (status {})",
                reply.general_status
            )));
        }
        Ok(Vec::new())
    }

    fn read_tag(&self, device: &DeviceEip, tag: &TagEip) -> Result<String> {
        let (host, port) = parse_host_port(&device.host)?;
        let (mut stream, _handle) = connect_and_register(&host, port, Self::timeout(device))?;

        let mut req = Vec::new();
        req.write_u16::<LittleEndian>(CMD_SEND_RR_DATA).unwrap();
        let tag_bytes = tag.tag_name.as_bytes();
        req.write_u16::<LittleEndian>(tag_bytes.len() as u16).unwrap();
        req.write_u32::<LittleEndian>(0).unwrap();
        req.write_u32::<LittleEndian>(0).unwrap();
        req.write_all(&[0u8; 8]).unwrap();
        req.write_u32::<LittleEndian>(0).unwrap();
        req.extend_from_slice(tag_bytes);
        stream.write_all(&req).map_err(BridgeError::TransientIo)?;

        let mut header = [0u8; 24];
        stream.read_exact(&mut header).map_err(BridgeError::TransientIo)?;
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        let mut body = vec![0u8; len.max(2)];
        if len > 0 {
            let _ = stream.read_exact(&mut body[..len]);
        }

        let reply = CipReplyHeader::parse(&body)?;
        if !reply.is_success() {
            return Err(BridgeError::ProtocolError(format!(
                "CIP read of '{}' failed, general status {}, extended size {}",
                tag.tag_name, reply.general_status, reply.extended_status_size
            )));
        }
        let value = &body[2..len.max(2)];
        Ok(String::from_utf8_lossy(value).trim_matches(char::from(0)).to_string())
    }

    fn write_tag(&self, device: &DeviceEip, tag: &TagEip, value: &str) -> Result<()> {
        let (host, port) = parse_host_port(&device.host)?;
        let (mut stream, _handle) = connect_and_register(&host, port, Self::timeout(device))?;

        let mut req = Vec::new();
        req.write_u16::<LittleEndian>(CMD_SEND_RR_DATA).unwrap();
        let payload = value.as_bytes();
        req.write_u16::<LittleEndian>(payload.len() as u16).unwrap();
        req.write_u32::<LittleEndian>(0).unwrap();
        req.write_u32::<LittleEndian>(0).unwrap();
        req.write_all(&[0u8; 8]).unwrap();
        req.write_u32::<LittleEndian>(0).unwrap();
        req.extend_from_slice(payload);
        stream.write_all(&req).map_err(BridgeError::TransientIo)?;

        let mut header = [0u8; 24];
        stream.read_exact(&mut header).map_err(BridgeError::TransientIo)?;
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        let mut body = vec![0u8; len.max(2)];
        if len > 0 {
            let _ = stream.read_exact(&mut body[..len]);
        }

        let reply = CipReplyHeader::parse(&body)?;
        if !reply.is_success() {
            return Err(BridgeError::ProtocolError(format!(
                "CIP write of '{}' failed, general status {}",
                tag.tag_name, reply.general_status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_header_rejects_short_body() {
        assert!(CipReplyHeader::parse(&[]).is_err());
    }

    #[test]
    fn reply_header_accepts_zero_status() {
        let hdr = CipReplyHeader::parse(&[0, 0]).unwrap();
        assert!(hdr.is_success());
    }

    #[test]
    fn reply_header_rejects_nonzero_status() {
        let hdr = CipReplyHeader::parse(&[5, 0]).unwrap();
        assert!(!hdr.is_success());
    }
}
