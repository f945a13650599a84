use std::io::{self, Read, Write};

use crate::error::FrameError;

pub const HEADER_LEN: usize = 4;
pub const DEFAULT_MAX_REQUEST_LEN: usize = 1024;
pub const MAX_RESPONSE_LEN: usize = 64 * 1024;

pub fn write_frame<W: Write>(writer: &mut W, message: &str) -> Result<(), FrameError> {
    let len = u32::try_from(message.len()).map_err(|_| FrameError::TooLong {
        len: message.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(message.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the peer closed the stream between frames.
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> Result<Option<String>, FrameError> {
    let mut header = [0u8; HEADER_LEN];
    if !read_header(reader, &mut header)? {
        return Ok(None);
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        let drained = io::copy(&mut reader.by_ref().take(len as u64), &mut io::sink())?;
        if drained < len as u64 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        return Err(FrameError::TooLong { len, max: max_len });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(String::from_utf8(body)?))
}

fn read_header<R: Read>(reader: &mut R, header: &mut [u8; HEADER_LEN]) -> Result<bool, FrameError> {
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framed(messages: &[&str]) -> Cursor<Vec<u8>> {
        let mut buf = Vec::new();
        for m in messages {
            write_frame(&mut buf, m).unwrap();
        }
        Cursor::new(buf)
    }

    #[test]
    fn test_frame_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, "1").unwrap();
        assert_eq!(buf, vec![0, 0, 0, 1, b'1']);
    }

    #[test]
    fn test_read_sequence_then_clean_eof() {
        let mut cursor = framed(&["1", "Average: 20.00% RH\nRecords: 3"]);
        assert_eq!(read_frame(&mut cursor, 1024).unwrap().as_deref(), Some("1"));
        assert_eq!(
            read_frame(&mut cursor, 1024).unwrap().as_deref(),
            Some("Average: 20.00% RH\nRecords: 3")
        );
        assert_eq!(read_frame(&mut cursor, 1024).unwrap(), None);
    }

    #[test]
    fn test_empty_message() {
        let mut cursor = framed(&[""]);
        assert_eq!(read_frame(&mut cursor, 16).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_oversized_frame_is_drained() {
        let long = "x".repeat(2000);
        let mut cursor = framed(&[long.as_str(), "2"]);
        let err = read_frame(&mut cursor, 1024).unwrap_err();
        assert!(matches!(err, FrameError::TooLong { len: 2000, max: 1024 }));
        assert!(err.is_recoverable());
        assert_eq!(read_frame(&mut cursor, 1024).unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_truncated_header() {
        let mut cursor = Cursor::new(vec![0u8, 0]);
        let err = read_frame(&mut cursor, 1024).unwrap_err();
        assert!(matches!(err, FrameError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_truncated_body() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0, 5, b'a', b'b']);
        let err = read_frame(&mut cursor, 1024).unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0, 2, 0xff, 0xfe]);
        let err = read_frame(&mut cursor, 1024).unwrap_err();
        assert!(matches!(err, FrameError::InvalidUtf8(_)));
    }
}
