//! The TCP option codec.
//!
//! The engine understands the four options the stack negotiates: maximum
//! segment size, window scale, SACK-permitted (advertised, never used),
//! and timestamps. Anything else is skipped over by its length octet.

use crate::segment::ParseError;

const KIND_END: u8 = 0;
const KIND_NOP: u8 = 1;
const KIND_MSS: u8 = 2;
const KIND_WINDOW_SCALE: u8 = 3;
const KIND_SACK_PERMITTED: u8 = 4;
const KIND_TIMESTAMPS: u8 = 8;

/// A recognized TCP option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpOption {
    /// Kind 2. Only meaningful on SYN segments.
    MaximumSegmentSize(u16),
    /// Kind 3. Only meaningful on SYN segments.
    WindowScale(u8),
    /// Kind 4. The stack advertises the capability but never emits SACK
    /// blocks.
    SackPermitted,
    /// Kind 8. `tsecr` is only meaningful on segments with ACK set.
    Timestamps { tsval: u32, tsecr: u32 },
}

impl TcpOption {
    fn wire_len(&self) -> usize {
        match self {
            TcpOption::MaximumSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::SackPermitted => 2,
            TcpOption::Timestamps { .. } => 10,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match *self {
            TcpOption::MaximumSegmentSize(mss) => {
                out.extend_from_slice(&[KIND_MSS, 4]);
                out.extend_from_slice(&mss.to_be_bytes());
            }
            TcpOption::WindowScale(shift) => {
                out.extend_from_slice(&[KIND_WINDOW_SCALE, 3, shift]);
            }
            TcpOption::SackPermitted => {
                out.extend_from_slice(&[KIND_SACK_PERMITTED, 2]);
            }
            TcpOption::Timestamps { tsval, tsecr } => {
                out.extend_from_slice(&[KIND_TIMESTAMPS, 10]);
                out.extend_from_slice(&tsval.to_be_bytes());
                out.extend_from_slice(&tsecr.to_be_bytes());
            }
        }
    }
}

/// Serializes options, padded with NOPs to a four-octet boundary.
pub fn serialize(options: &[TcpOption]) -> Vec<u8> {
    let raw: usize = options.iter().map(TcpOption::wire_len).sum();
    let padded = (raw + 3) & !3;
    let mut out = Vec::with_capacity(padded);
    for option in options {
        option.write(&mut out);
    }
    while out.len() < padded {
        out.push(KIND_NOP);
    }
    out
}

/// Parses the option block of a header, collecting recognized options and
/// stepping over unknown ones.
pub fn parse(bytes: &[u8]) -> Result<Vec<TcpOption>, ParseError> {
    let mut options = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            KIND_END => break,
            KIND_NOP => {
                i += 1;
            }
            kind => {
                let len = *bytes.get(i + 1).ok_or(ParseError::BadOption)? as usize;
                if len < 2 || i + len > bytes.len() {
                    return Err(ParseError::BadOption);
                }
                let body = &bytes[i + 2..i + len];
                match kind {
                    KIND_MSS if len == 4 => {
                        options.push(TcpOption::MaximumSegmentSize(u16::from_be_bytes([
                            body[0], body[1],
                        ])));
                    }
                    KIND_WINDOW_SCALE if len == 3 => {
                        options.push(TcpOption::WindowScale(body[0]));
                    }
                    KIND_SACK_PERMITTED if len == 2 => {
                        options.push(TcpOption::SackPermitted);
                    }
                    KIND_TIMESTAMPS if len == 10 => {
                        options.push(TcpOption::Timestamps {
                            tsval: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
                            tsecr: u32::from_be_bytes([body[4], body[5], body[6], body[7]]),
                        });
                    }
                    // Recognized kind with a malformed length, or a kind
                    // we do not speak: step over it.
                    _ => {}
                }
                i += len;
            }
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syn_option_block() {
        let options = [
            TcpOption::MaximumSegmentSize(1460),
            TcpOption::WindowScale(5),
            TcpOption::SackPermitted,
        ];
        let bytes = serialize(&options);
        assert_eq!(bytes.len() % 4, 0);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, options);
    }

    #[test]
    fn timestamps_roundtrip() {
        let options = [TcpOption::Timestamps {
            tsval: 0xdead_beef,
            tsecr: 77,
        }];
        let parsed = parse(&serialize(&options)).unwrap();
        assert_eq!(parsed, options);
    }

    #[test]
    fn unknown_options_are_skipped() {
        // MD5 signature (kind 19, length 18) in front of a window scale.
        let mut bytes = vec![19, 18];
        bytes.extend_from_slice(&[0; 16]);
        bytes.extend_from_slice(&[3, 3, 7]);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, vec![TcpOption::WindowScale(7)]);
    }

    #[test]
    fn truncated_option_is_an_error() {
        assert!(parse(&[2, 4, 5]).is_err());
        assert!(parse(&[8]).is_err());
        assert!(parse(&[3, 1, 0]).is_err());
    }

    #[test]
    fn end_of_list_stops_parsing() {
        let parsed = parse(&[4, 2, 0, 3, 3, 7]).unwrap();
        assert_eq!(parsed, vec![TcpOption::SackPermitted]);
    }
}
