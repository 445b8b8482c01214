//! Length-prefixed framing: a big-endian `u32` byte count, then a JSON body

use std::io::{self, Read, Write};

use super::connection::TransportError;
use super::message::Message;

/// Largest body a peer may send.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub fn write_message(writer: &mut impl Write, message: &Message) -> Result<(), TransportError> {
    let body = message
        .encode()
        .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame body. `Ok(None)` is a clean end of stream between frames.
pub fn read_frame(reader: &mut impl Read) -> Result<Option<Vec<u8>>, TransportError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}
