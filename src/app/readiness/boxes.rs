//! Top-level box walker for ISO-BMFF style containers
//!
//! Boxes are laid out back to back from offset 0. Each starts with a 32-bit
//! big-endian size and a four-character type. A size of `1` means a 64-bit
//! size follows the type; a size of `0` means the box runs to the end of the
//! file, so nothing can follow it.
//!
//! The walker only ever looks at the first `available` bytes, which lets it
//! run against a file that is still being downloaded.

use std::fmt;
use std::io::{self, SeekFrom};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::constants::readiness::{BOX_HEADER_LEN, EXTENDED_BOX_HEADER_LEN};

/// Four-character box type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    /// Printable ASCII, as every registered top-level box type is
    pub fn is_printable(&self) -> bool {
        self.0.iter().all(|b| (0x20..=0x7e).contains(b))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_printable() {
            // Printable ASCII is valid UTF-8
            f.write_str(std::str::from_utf8(&self.0).unwrap_or("????"))
        } else {
            write!(f, "0x{:08x}", u32::from_be_bytes(self.0))
        }
    }
}

impl TryFrom<String> for FourCc {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes: [u8; 4] = value
            .as_bytes()
            .try_into()
            .map_err(|_| format!("box type must be exactly 4 bytes, got '{}'", value))?;
        Ok(FourCc(bytes))
    }
}

impl From<FourCc> for String {
    fn from(value: FourCc) -> Self {
        value.to_string()
    }
}

impl From<[u8; 4]> for FourCc {
    fn from(value: [u8; 4]) -> Self {
        FourCc(value)
    }
}

/// Declared extent of a box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxSize {
    /// Total size in bytes, header included
    Exact(u64),
    /// Box extends to the end of the file
    ToEnd,
}

/// Parsed box header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: FourCc,
    pub size: BoxSize,
    pub header_len: u64,
}

/// Where a box sits in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoxLocation {
    pub offset: u64,
    pub size: u64,
}

impl BoxLocation {
    /// First byte past the box
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// Result of parsing header bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderParse {
    Header(BoxHeader),
    /// More bytes are needed before the header can be decoded
    NeedBytes(u64),
    Malformed(String),
}

/// Result of one walk over the available prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Target box is entirely inside the available bytes
    Found(BoxLocation),
    /// Target box starts inside the available bytes but ends past them
    Incomplete {
        location: BoxLocation,
        available: u64,
    },
    /// Ran out of available bytes before finding the target
    NeedMoreData { resume_at: u64 },
    /// Hit a box that extends to end of file; nothing can follow it
    UnboundedBox { offset: u64, box_type: FourCc },
    /// Bytes at `offset` are not a valid box header
    Malformed { offset: u64, reason: String },
}

/// Decode a box header from the bytes at the start of a box
pub fn parse_header(bytes: &[u8]) -> HeaderParse {
    if (bytes.len() as u64) < BOX_HEADER_LEN {
        return HeaderParse::NeedBytes(BOX_HEADER_LEN);
    }

    let size32 = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let box_type = FourCc([bytes[4], bytes[5], bytes[6], bytes[7]]);

    if !box_type.is_printable() {
        return HeaderParse::Malformed(format!("non-printable box type {}", box_type));
    }

    match size32 {
        0 => HeaderParse::Header(BoxHeader {
            box_type,
            size: BoxSize::ToEnd,
            header_len: BOX_HEADER_LEN,
        }),
        1 => {
            if (bytes.len() as u64) < EXTENDED_BOX_HEADER_LEN {
                return HeaderParse::NeedBytes(EXTENDED_BOX_HEADER_LEN);
            }
            let mut large = [0u8; 8];
            large.copy_from_slice(&bytes[8..16]);
            let size = u64::from_be_bytes(large);
            if size < EXTENDED_BOX_HEADER_LEN {
                return HeaderParse::Malformed(format!(
                    "extended size {} of '{}' is smaller than its header",
                    size, box_type
                ));
            }
            HeaderParse::Header(BoxHeader {
                box_type,
                size: BoxSize::Exact(size),
                header_len: EXTENDED_BOX_HEADER_LEN,
            })
        }
        n if u64::from(n) < BOX_HEADER_LEN => HeaderParse::Malformed(format!(
            "declared size {} of '{}' is smaller than its header",
            n, box_type
        )),
        n => HeaderParse::Header(BoxHeader {
            box_type,
            size: BoxSize::Exact(u64::from(n)),
            header_len: BOX_HEADER_LEN,
        }),
    }
}

/// Walk top-level boxes from `start` looking for `target` within the first
/// `available` bytes of `reader`.
///
/// `start` must be the offset of a box header; callers resume from the
/// `resume_at` / `location.offset` of a previous outcome since boxes before
/// it cannot change as the prefix grows.
pub async fn scan<R>(
    reader: &mut R,
    start: u64,
    available: u64,
    target: FourCc,
) -> io::Result<ScanOutcome>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let mut offset = start;
    let mut buf = [0u8; EXTENDED_BOX_HEADER_LEN as usize];

    loop {
        let remaining = available.saturating_sub(offset);
        if remaining < BOX_HEADER_LEN {
            return Ok(ScanOutcome::NeedMoreData { resume_at: offset });
        }

        let want = remaining.min(EXTENDED_BOX_HEADER_LEN) as usize;
        reader.seek(SeekFrom::Start(offset)).await?;
        match reader.read_exact(&mut buf[..want]).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(ScanOutcome::NeedMoreData { resume_at: offset });
            }
            Err(e) => return Err(e),
        }

        let header = match parse_header(&buf[..want]) {
            HeaderParse::Header(header) => header,
            HeaderParse::NeedBytes(_) => {
                return Ok(ScanOutcome::NeedMoreData { resume_at: offset });
            }
            HeaderParse::Malformed(reason) => {
                return Ok(ScanOutcome::Malformed { offset, reason });
            }
        };

        let size = match header.size {
            BoxSize::ToEnd => {
                return Ok(ScanOutcome::UnboundedBox {
                    offset,
                    box_type: header.box_type,
                });
            }
            BoxSize::Exact(size) => size,
        };

        let location = BoxLocation { offset, size };
        if header.box_type == target {
            return Ok(match offset.checked_add(size) {
                Some(end) if end <= available => ScanOutcome::Found(location),
                _ => ScanOutcome::Incomplete {
                    location,
                    available,
                },
            });
        }

        offset = match offset.checked_add(size) {
            Some(next) => next,
            None => {
                return Ok(ScanOutcome::Malformed {
                    offset,
                    reason: format!("size {} of '{}' overflows the file", size, header.box_type),
                });
            }
        };
    }
}

/// Encode a box with a compact header, or an extended one when the payload needs it
pub fn encode_box(box_type: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let compact = BOX_HEADER_LEN + payload.len() as u64;
    let mut out = Vec::with_capacity(compact as usize + 8);
    if compact <= u64::from(u32::MAX) {
        out.extend_from_slice(&(compact as u32).to_be_bytes());
        out.extend_from_slice(&box_type);
    } else {
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&box_type);
        out.extend_from_slice(&(EXTENDED_BOX_HEADER_LEN + payload.len() as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}
