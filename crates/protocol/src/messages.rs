//! Protocol messages and their binary encoding.
//!
//! # Wire format
//!
//! Each frame payload starts with a one-byte tag. All integers are
//! big-endian.
//!
//! ```text
//! 0x01 Challenge   (Recv -> Send): [2: version][32: nonce]
//! 0x02 Response    (Send -> Recv): [64: ed25519 signature over nonce]
//! 0x03 AuthOk      (Recv -> Send)
//! 0x04 AuthFailed  (Recv -> Send)
//! 0x10 FileOffer   (Send -> Recv): [2: name_len][name][8: size][32: head_digest][1: restart]
//! 0x11 ResumeAt    (Recv -> Send): [8: offset]
//! 0x12 Chunk       (Send -> Recv): [rest of frame: file data]
//! 0x13 Done        (Send -> Recv): [32: sha256 of the whole source]
//! 0x14 Ack         (Recv -> Send)
//! 0x1F Rejected    (Recv -> Send): [1: code][2: reason_len][reason]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::identity::FileIdentity;
use crate::{DIGEST_LEN, Digest, NONCE_LEN, SIGNATURE_LEN};

const TAG_CHALLENGE: u8 = 0x01;
const TAG_RESPONSE: u8 = 0x02;
const TAG_AUTH_OK: u8 = 0x03;
const TAG_AUTH_FAILED: u8 = 0x04;
const TAG_FILE_OFFER: u8 = 0x10;
const TAG_RESUME_AT: u8 = 0x11;
const TAG_CHUNK: u8 = 0x12;
const TAG_DONE: u8 = 0x13;
const TAG_ACK: u8 = 0x14;
const TAG_REJECTED: u8 = 0x1F;

/// Why the receiver refused to continue a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    /// Another session currently owns this file identity.
    Busy,
    /// The whole-file digest did not match.
    Integrity,
    /// The sender broke the protocol.
    Protocol,
    /// The receiver hit a local I/O failure.
    Io,
}

impl RejectCode {
    fn to_byte(self) -> u8 {
        match self {
            RejectCode::Busy => 1,
            RejectCode::Integrity => 2,
            RejectCode::Protocol => 3,
            RejectCode::Io => 4,
        }
    }

    fn from_byte(b: u8) -> Result<Self, WireError> {
        match b {
            1 => Ok(RejectCode::Busy),
            2 => Ok(RejectCode::Integrity),
            3 => Ok(RejectCode::Protocol),
            4 => Ok(RejectCode::Io),
            other => Err(WireError::protocol(format!("unknown reject code {other}"))),
        }
    }
}

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectCode::Busy => "busy",
            RejectCode::Integrity => "integrity",
            RejectCode::Protocol => "protocol",
            RejectCode::Io => "io",
        };
        f.write_str(s)
    }
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Challenge {
        version: u16,
        nonce: [u8; NONCE_LEN],
    },
    Response {
        signature: [u8; SIGNATURE_LEN],
    },
    AuthOk,
    AuthFailed,
    FileOffer {
        identity: FileIdentity,
        /// Asks the receiver to discard any prior progress.
        restart: bool,
    },
    ResumeAt {
        offset: u64,
    },
    Chunk {
        data: Bytes,
    },
    Done {
        digest: Digest,
    },
    Ack,
    Rejected {
        code: RejectCode,
        reason: String,
    },
}

impl Message {
    /// Short name used in logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Challenge { .. } => "Challenge",
            Message::Response { .. } => "Response",
            Message::AuthOk => "AuthOk",
            Message::AuthFailed => "AuthFailed",
            Message::FileOffer { .. } => "FileOffer",
            Message::ResumeAt { .. } => "ResumeAt",
            Message::Chunk { .. } => "Chunk",
            Message::Done { .. } => "Done",
            Message::Ack => "Ack",
            Message::Rejected { .. } => "Rejected",
        }
    }

    /// Encodes the message into a frame payload.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::new();
        match self {
            Message::Challenge { version, nonce } => {
                buf.put_u8(TAG_CHALLENGE);
                buf.put_u16(*version);
                buf.put_slice(nonce);
            }
            Message::Response { signature } => {
                buf.put_u8(TAG_RESPONSE);
                buf.put_slice(signature);
            }
            Message::AuthOk => buf.put_u8(TAG_AUTH_OK),
            Message::AuthFailed => buf.put_u8(TAG_AUTH_FAILED),
            Message::FileOffer { identity, restart } => {
                let name = identity.name.as_bytes();
                if name.len() > u16::MAX as usize {
                    return Err(WireError::protocol(format!(
                        "file name too long: {} bytes",
                        name.len()
                    )));
                }
                buf.put_u8(TAG_FILE_OFFER);
                buf.put_u16(name.len() as u16);
                buf.put_slice(name);
                buf.put_u64(identity.size);
                buf.put_slice(&identity.head_digest);
                buf.put_u8(u8::from(*restart));
            }
            Message::ResumeAt { offset } => {
                buf.put_u8(TAG_RESUME_AT);
                buf.put_u64(*offset);
            }
            Message::Chunk { data } => {
                buf.reserve(1 + data.len());
                buf.put_u8(TAG_CHUNK);
                buf.put_slice(data);
            }
            Message::Done { digest } => {
                buf.put_u8(TAG_DONE);
                buf.put_slice(digest);
            }
            Message::Ack => buf.put_u8(TAG_ACK),
            Message::Rejected { code, reason } => {
                // Reasons are informational; clip instead of failing.
                let reason = clip_utf8(reason, u16::MAX as usize);
                buf.put_u8(TAG_REJECTED);
                buf.put_u8(code.to_byte());
                buf.put_u16(reason.len() as u16);
                buf.put_slice(reason.as_bytes());
            }
        }
        Ok(buf.freeze())
    }

    /// Decodes a frame payload.
    ///
    /// The whole payload must be consumed; trailing bytes are an error.
    pub fn decode(mut buf: Bytes) -> Result<Self, WireError> {
        if !buf.has_remaining() {
            return Err(WireError::protocol("empty frame"));
        }
        let tag = buf.get_u8();

        let msg = match tag {
            TAG_CHALLENGE => {
                need(&buf, 2 + NONCE_LEN, "Challenge")?;
                let version = buf.get_u16();
                Message::Challenge {
                    version,
                    nonce: take_array(&mut buf),
                }
            }
            TAG_RESPONSE => {
                need(&buf, SIGNATURE_LEN, "Response")?;
                Message::Response {
                    signature: take_array(&mut buf),
                }
            }
            TAG_AUTH_OK => Message::AuthOk,
            TAG_AUTH_FAILED => Message::AuthFailed,
            TAG_FILE_OFFER => {
                need(&buf, 2, "FileOffer")?;
                let name_len = buf.get_u16() as usize;
                need(&buf, name_len + 8 + DIGEST_LEN + 1, "FileOffer")?;
                let name = take_string(&mut buf, name_len)?;
                let size = buf.get_u64();
                let head_digest = take_array(&mut buf);
                let restart = match buf.get_u8() {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(WireError::protocol(format!(
                            "invalid restart flag {other}"
                        )));
                    }
                };
                Message::FileOffer {
                    identity: FileIdentity::new(name, size, head_digest),
                    restart,
                }
            }
            TAG_RESUME_AT => {
                need(&buf, 8, "ResumeAt")?;
                Message::ResumeAt {
                    offset: buf.get_u64(),
                }
            }
            TAG_CHUNK => {
                let data = buf.split_to(buf.len());
                Message::Chunk { data }
            }
            TAG_DONE => {
                need(&buf, DIGEST_LEN, "Done")?;
                Message::Done {
                    digest: take_array(&mut buf),
                }
            }
            TAG_ACK => Message::Ack,
            TAG_REJECTED => {
                need(&buf, 3, "Rejected")?;
                let code = RejectCode::from_byte(buf.get_u8())?;
                let reason_len = buf.get_u16() as usize;
                need(&buf, reason_len, "Rejected")?;
                let reason = take_string(&mut buf, reason_len)?;
                Message::Rejected { code, reason }
            }
            other => {
                return Err(WireError::protocol(format!(
                    "unknown message tag 0x{other:02x}"
                )));
            }
        };

        if buf.has_remaining() {
            return Err(WireError::protocol(format!(
                "{} bytes trailing {} message",
                buf.remaining(),
                msg.kind()
            )));
        }
        Ok(msg)
    }
}

fn need(buf: &Bytes, n: usize, what: &str) -> Result<(), WireError> {
    if buf.remaining() < n {
        return Err(WireError::protocol(format!(
            "truncated {what}: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn take_array<const N: usize>(buf: &mut Bytes) -> [u8; N] {
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    out
}

fn take_string(buf: &mut Bytes, len: usize) -> Result<String, WireError> {
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| WireError::protocol(format!("invalid UTF-8 string: {e}")))
}

fn clip_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
