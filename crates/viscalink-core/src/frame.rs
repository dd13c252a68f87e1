//! Wire framing for the SRT channel.
//!
//! Every SRT datagram carries exactly one frame. A one-byte protocol tag
//! selects the format; all multi-byte integers are big-endian.
//!
//! # VISCA frame (tag `0x01`)
//!
//! ```text
//! [0]      protocol_tag  u8      0x01
//! [1]      visca_type    u8      0x01 Command, 0x02 Response, 0x03 Inquiry, 0xFF Error
//! [2]      camera_id     u8      routing key
//! [3..5]   sequence      u16 BE  request/response correlation (0 = unsolicited)
//! [5..7]   length        u16 BE  payload byte count
//! [7..]    payload       [u8]    raw VISCA bytes
//! ```
//!
//! # NDI tally frame (tag `0x02`)
//!
//! ```text
//! [0]      protocol_tag  u8      0x02
//! [1]      state         u8      0 Off, 1 Program, 2 Preview, 3 Program+Preview
//! [2]      name_length   u8      source name byte count
//! [3..7]   timestamp     u32 BE  sender wall-clock seconds
//! [7..]    source_name   [u8]    UTF-8, not NUL-terminated
//! ```
//!
//! Both formats are 7 bytes of header plus a variable tail, so truncation is
//! detected the same way for either tag. Unknown `visca_type` / `state`
//! values are surfaced as [`ViscaType::Unknown`] / [`TallyState::Unknown`];
//! the frame stays structurally valid and the caller decides what to do.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;

pub const PROTOCOL_TAG_VISCA: u8 = 0x01;
pub const PROTOCOL_TAG_NDI_TALLY: u8 = 0x02;

/// Fixed header size shared by both frame formats.
pub const FRAME_HEADER_LEN: usize = 7;

// ── Enumerations ──────────────────────────────────────────────────────────────

/// Inner VISCA frame subtype, distinct from the outer protocol tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViscaType {
    Command,
    Response,
    Inquiry,
    Error,
    /// Value outside the known set; carried through unchanged.
    Unknown(u8),
}

impl ViscaType {
    pub fn from_wire(value: u8) -> Self {
        match value {
            0x01 => Self::Command,
            0x02 => Self::Response,
            0x03 => Self::Inquiry,
            0xFF => Self::Error,
            other => Self::Unknown(other),
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Command => 0x01,
            Self::Response => 0x02,
            Self::Inquiry => 0x03,
            Self::Error => 0xFF,
            Self::Unknown(other) => other,
        }
    }

    /// Commands and inquiries elicit a reply from the camera; everything
    /// else is forwarded without waiting.
    pub fn expects_reply(self) -> bool {
        matches!(self, Self::Command | Self::Inquiry)
    }
}

/// On-air state of an NDI source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyState {
    Off,
    Program,
    Preview,
    ProgramPreview,
    /// Value outside the known set; carried through unchanged.
    Unknown(u8),
}

impl TallyState {
    pub fn from_wire(value: u8) -> Self {
        match value {
            0x00 => Self::Off,
            0x01 => Self::Program,
            0x02 => Self::Preview,
            0x03 => Self::ProgramPreview,
            other => Self::Unknown(other),
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Off => 0x00,
            Self::Program => 0x01,
            Self::Preview => 0x02,
            Self::ProgramPreview => 0x03,
            Self::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for TallyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Program => write!(f, "program"),
            Self::Preview => write!(f, "preview"),
            Self::ProgramPreview => write!(f, "program+preview"),
            Self::Unknown(v) => write!(f, "unknown(0x{v:02X})"),
        }
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// SRT-encapsulated VISCA traffic for one camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViscaFrame {
    pub visca_type: ViscaType,
    pub camera_id: u8,
    pub sequence: u16,
    pub payload: Bytes,
}

/// One NDI source's tally state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyFrame {
    pub source_name: String,
    pub state: TallyState,
    pub timestamp: u32,
}

/// The closed set of wire message kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Visca(ViscaFrame),
    NdiTally(TallyFrame),
}

impl Message {
    /// Serialize to a single SRT datagram. Total; never fails.
    ///
    /// A source name longer than 255 bytes is cut at 255 (the wire field is
    /// one byte); VISCA payloads are bounded by the MTU long before the u16
    /// length field saturates.
    pub fn encode(&self) -> Bytes {
        match self {
            Message::Visca(frame) => {
                let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + frame.payload.len());
                buf.put_u8(PROTOCOL_TAG_VISCA);
                buf.put_u8(frame.visca_type.to_wire());
                buf.put_u8(frame.camera_id);
                buf.put_u16(frame.sequence);
                buf.put_u16(frame.payload.len() as u16);
                buf.extend_from_slice(&frame.payload);
                buf.freeze()
            }
            Message::NdiTally(frame) => {
                let name = frame.source_name.as_bytes();
                let name = &name[..name.len().min(u8::MAX as usize)];
                let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + name.len());
                buf.put_u8(PROTOCOL_TAG_NDI_TALLY);
                buf.put_u8(frame.state.to_wire());
                buf.put_u8(name.len() as u8);
                buf.put_u32(frame.timestamp);
                buf.extend_from_slice(name);
                buf.freeze()
            }
        }
    }

    /// Parse one datagram. The payload is sliced out of `buf` without
    /// copying.
    ///
    /// The buffer must hold exactly one frame: fewer bytes than the header
    /// or the declared tail is [`FrameError::Truncated`], extra trailing
    /// bytes are [`FrameError::LengthMismatch`].
    pub fn decode(buf: Bytes) -> Result<Message, FrameError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Truncated {
                have: buf.len(),
                need: FRAME_HEADER_LEN,
            });
        }

        match buf[0] {
            PROTOCOL_TAG_VISCA => {
                let length = u16::from_be_bytes([buf[5], buf[6]]) as usize;
                let total = FRAME_HEADER_LEN + length;
                if buf.len() < total {
                    return Err(FrameError::Truncated {
                        have: buf.len(),
                        need: total,
                    });
                }
                if buf.len() > total {
                    return Err(FrameError::LengthMismatch {
                        declared: length,
                        actual: buf.len() - FRAME_HEADER_LEN,
                    });
                }
                Ok(Message::Visca(ViscaFrame {
                    visca_type: ViscaType::from_wire(buf[1]),
                    camera_id: buf[2],
                    sequence: u16::from_be_bytes([buf[3], buf[4]]),
                    payload: buf.slice(FRAME_HEADER_LEN..total),
                }))
            }
            PROTOCOL_TAG_NDI_TALLY => {
                let name_length = buf[2] as usize;
                let total = FRAME_HEADER_LEN + name_length;
                if buf.len() < total {
                    return Err(FrameError::Truncated {
                        have: buf.len(),
                        need: total,
                    });
                }
                if buf.len() > total {
                    return Err(FrameError::LengthMismatch {
                        declared: name_length,
                        actual: buf.len() - FRAME_HEADER_LEN,
                    });
                }
                Ok(Message::NdiTally(TallyFrame {
                    state: TallyState::from_wire(buf[1]),
                    timestamp: u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]),
                    source_name: String::from_utf8_lossy(&buf[FRAME_HEADER_LEN..total])
                        .into_owned(),
                }))
            }
            tag => Err(FrameError::UnknownTag(tag)),
        }
    }
}
