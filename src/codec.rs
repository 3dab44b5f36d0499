//! Record layer framing.
//!
//! Every chunk forwarded to the remote server travels inside a record that
//! looks like TLS application data. The codec is stateless: wrapping and
//! peeling are pure functions, and [`read_record`] only pulls exactly one
//! record off a stream.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    error::BadRecord,
    specification::{RECORD_HDR_LEN, RECORD_PAYLOAD_MAX_LEN},
};

/// Decoded record header.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RecordHeader {
    /// The content type tag.
    pub content_type: u8,
    /// The protocol version tag.
    pub version: [u8; 2],
    /// Number of payload bytes following the header.
    pub length: usize,
}

impl RecordHeader {
    pub(crate) fn parse(hdr: &[u8; RECORD_HDR_LEN]) -> Self {
        Self {
            content_type: hdr[0],
            version: [hdr[1], hdr[2]],
            length: u16::from_be_bytes([hdr[3], hdr[4]]) as usize,
        }
    }
}

/// Wraps `payload` in a record with the given content type and version tags.
pub fn add_record_layer(payload: &[u8], content_type: u8, version: [u8; 2]) -> Vec<u8> {
    debug_assert!(payload.len() <= RECORD_PAYLOAD_MAX_LEN);
    let mut record = Vec::with_capacity(RECORD_HDR_LEN + payload.len());
    record.push(content_type);
    record.extend_from_slice(&version);
    record.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    record.extend_from_slice(payload);
    record
}

/// Strips the header from one complete record and returns its payload.
pub fn peel_record_layer(frame: &[u8]) -> Result<&[u8], BadRecord> {
    let Some((hdr, body)) = frame.split_first_chunk::<RECORD_HDR_LEN>() else {
        return Err(BadRecord::Truncated {
            received: frame.len(),
        });
    };
    let header = RecordHeader::parse(hdr);
    if header.length > RECORD_PAYLOAD_MAX_LEN {
        return Err(BadRecord::Oversized {
            declared: header.length,
        });
    }
    if header.length != body.len() {
        return Err(BadRecord::LengthMismatch {
            declared: header.length,
            actual: body.len(),
        });
    }
    Ok(body)
}

/// Reads exactly one record, header included, from `reader`.
///
/// Blocks until the whole record is available. Record boundaries never line
/// up with the reads of the underlying transport, so a single fixed-size
/// read is not enough. End of stream at any point is reported as
/// [`ErrorKind::UnexpectedEof`].
///
/// [`ErrorKind::UnexpectedEof`]: std::io::ErrorKind::UnexpectedEof
pub async fn read_record<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hdr = [0u8; RECORD_HDR_LEN];
    reader.read_exact(&mut hdr).await?;
    let header = RecordHeader::parse(&hdr);
    if header.length > RECORD_PAYLOAD_MAX_LEN {
        return Err(BadRecord::Oversized {
            declared: header.length,
        }
        .into());
    }

    let mut record = vec![0u8; RECORD_HDR_LEN + header.length];
    record[..RECORD_HDR_LEN].copy_from_slice(&hdr);
    reader.read_exact(&mut record[RECORD_HDR_LEN..]).await?;
    Ok(record)
}
