//! Hand-coded EtherNet/IP encapsulation client ("CPPPO" backend).
//!
//! Speaks just enough of the CIP/EtherNet/IP encapsulation protocol to
//! register a session and round-trip a tag read/write. There is no
//! general-purpose EtherNet/IP crate in the ecosystem, so the wire framing
//! below is written by hand against the encapsulation header layout (24
//! bytes, little-endian): command, length, session handle, status, sender
//! context, options.
//!
//! Known limitation (carried over from the source this was modeled on): the
//! read/write paths accept any reply with status word 0 as success without
//! parsing the CIP service-specific reply body.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};

use super::parse_host_port;
use crate::error::{BridgeError, Result};
use crate::model::{DeviceEip, TagEip};

use super::EipClient;

const CMD_REGISTER_SESSION: u16 = 0x0065;
const CMD_UNREGISTER_SESSION: u16 = 0x0066;
const CMD_SEND_RR_DATA: u16 = 0x006F;
const REGISTER_SESSION_FRAME_LEN: usize = 28;

/// Builds the 28-byte `RegisterSession` request frame: a 24-byte
/// encapsulation header (command, length=0, handle=0, status=0, an 8-byte
/// zeroed sender context, options=0) followed by 4 bytes of zeroed command
/// data (protocol version / option flags).
fn register_session_frame() -> [u8; REGISTER_SESSION_FRAME_LEN] {
    let mut buf = Vec::with_capacity(REGISTER_SESSION_FRAME_LEN);
    buf.write_u16::<LittleEndian>(CMD_REGISTER_SESSION).unwrap();
    buf.write_u16::<LittleEndian>(0).unwrap(); // length
    buf.write_u32::<LittleEndian>(0).unwrap(); // session handle
    buf.write_u32::<LittleEndian>(0).unwrap(); // status
    buf.write_all(&[0u8; 8]).unwrap(); // sender context
    buf.write_u32::<LittleEndian>(0).unwrap(); // options
    buf.write_u32::<LittleEndian>(0).unwrap(); // command data (zeroed)
    let mut frame = [0u8; REGISTER_SESSION_FRAME_LEN];
    frame.copy_from_slice(&buf);
    frame
}

fn connect_and_register(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
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
    Ok(stream)
}

fn unregister_session(stream: &mut TcpStream, session_handle: u32) {
    let mut buf = Vec::with_capacity(24);
    let _ = buf.write_u16::<LittleEndian>(CMD_UNREGISTER_SESSION);
    let _ = buf.write_u16::<LittleEndian>(0);
    let _ = buf.write_u32::<LittleEndian>(session_handle);
    let _ = buf.write_u32::<LittleEndian>(0);
    let _ = buf.write_all(&[0u8; 8]);
    let _ = buf.write_u32::<LittleEndian>(0);
    let _ = stream.write_all(&buf);
}

pub struct CpppoClient;

impl CpppoClient {
    pub fn new() -> Self {
        Self
    }

    fn timeout(device: &DeviceEip) -> Duration {
        Duration::from_secs_f64(device.socket_timeout_secs.max(0.1))
    }
}

impl Default for CpppoClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EipClient for CpppoClient {
    fn connect(&self, device: &DeviceEip) -> Result<()> {
        let (host, port) = parse_host_port(&device.host)?;
        let mut stream = connect_and_register(&host, port, Self::timeout(device))?;
        unregister_session(&mut stream, 0);
        Ok(())
    }

    fn discover_tags(&self, _device: &DeviceEip) -> Result<Vec<String>> {
        Err(BridgeError::UnsupportedOperation(
            "tag discovery is not supported on this controller/slot (CPPPO backend)".into(),
        ))
    }

    fn read_tag(&self, device: &DeviceEip, tag: &TagEip) -> Result<String> {
        let (host, port) = parse_host_port(&device.host)?;
        let mut stream = connect_and_register(&host, port, Self::timeout(device))?;

        // SendRRData carrying a CIP GetAttributeSingle-style read request.
        // The reply body is not parsed (see module docs); any status-0 reply
        // of plausible length is treated as success.
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
        let status = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if status != 0 {
            return Err(BridgeError::ProtocolError(format!(
                "CIP read of '{}' failed with status {status:#x}",
                tag.tag_name
            )));
        }
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        let mut body = vec![0u8; len];
        if len > 0 {
            let _ = stream.read_exact(&mut body);
        }
        unregister_session(&mut stream, 0);
        Ok(String::from_utf8_lossy(&body).trim_matches(char::from(0)).to_string())
    }

    fn write_tag(&self, device: &DeviceEip, tag: &TagEip, value: &str) -> Result<()> {
        let (host, port) = parse_host_port(&device.host)?;
        let mut stream = connect_and_register(&host, port, Self::timeout(device))?;

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
        let status = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        unregister_session(&mut stream, 0);
        if status != 0 {
            return Err(BridgeError::ProtocolError(format!(
                "CIP write of '{}' failed with status {status:#x}",
                tag.tag_name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_session_frame_is_28_bytes_and_correct_command() {
        let frame = register_session_frame();
        assert_eq!(frame.len(), 28);
        let command = u16::from_le_bytes([frame[0], frame[1]]);
        assert_eq!(command, CMD_REGISTER_SESSION);
        let length = u16::from_le_bytes([frame[2], frame[3]]);
        assert_eq!(length, 0);
        assert!(frame[4..].iter().all(|&b| b == 0));
    }
}
