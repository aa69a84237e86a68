//! TCP segment headers and their wire format.
//!
//! The header type keeps the fields the state machine reads constantly
//! (sequence, acknowledgement, control bits, window) in parsed form, and
//! the options as a decoded list. Serialization fills in the checksum
//! over the IPv4 pseudo-header.

use crate::{
    options::{self, TcpOption},
    payload::Payload,
    socket::Ipv4Address,
};
use std::fmt::{self, Display};

/// The base TCP header length in octets, without options.
pub const BASE_HEADER_LEN: usize = 20;

/// Errors from decoding a segment off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("the header ends before all fields are present")]
    HeaderTooShort,
    #[error("the data offset field is smaller than the minimum header")]
    BadDataOffset,
    #[error("an option runs past the end of the header")]
    BadOption,
    #[error("checksum mismatch: computed {computed:#06x}, segment carries {carried:#06x}")]
    InvalidChecksum { computed: u16, carried: u16 },
}

/// The ones'-complement checksum used by TCP, fed the pseudo-header, the
/// header, and the text.
#[derive(Debug, Default, Clone, Copy)]
pub struct Checksum(u32);

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_u16(&mut self, value: u16) {
        self.0 += u32::from(value);
    }

    pub fn add_u8(&mut self, a: u8, b: u8) {
        self.add_u16(u16::from_be_bytes([a, b]));
    }

    pub fn add_u32(&mut self, value: [u8; 4]) {
        self.add_u8(value[0], value[1]);
        self.add_u8(value[2], value[3]);
    }

    /// Accumulates a byte stream, zero-padding a trailing odd octet.
    pub fn accumulate(&mut self, mut bytes: impl Iterator<Item = u8>) {
        while let Some(a) = bytes.next() {
            self.add_u8(a, bytes.next().unwrap_or(0));
        }
    }

    pub fn as_u16(self) -> u16 {
        let mut sum = self.0;
        while sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        !(sum as u16)
    }
}

/// The six control bits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Control(u8);

const FIN: u8 = 1 << 0;
const SYN: u8 = 1 << 1;
const RST: u8 = 1 << 2;
const PSH: u8 = 1 << 3;
const ACK: u8 = 1 << 4;
const URG: u8 = 1 << 5;

impl Control {
    pub fn new(urg: bool, ack: bool, psh: bool, rst: bool, syn: bool, fin: bool) -> Self {
        Self(
            fin as u8 * FIN
                | syn as u8 * SYN
                | rst as u8 * RST
                | psh as u8 * PSH
                | ack as u8 * ACK
                | urg as u8 * URG,
        )
    }

    /// Urgent pointer field significant. Parsed, never acted on.
    pub fn urg(self) -> bool {
        self.0 & URG != 0
    }

    /// Acknowledgment field significant.
    pub fn ack(self) -> bool {
        self.0 & ACK != 0
    }

    /// Push function.
    pub fn psh(self) -> bool {
        self.0 & PSH != 0
    }

    /// Reset the connection.
    pub fn rst(self) -> bool {
        self.0 & RST != 0
    }

    /// Synchronize sequence numbers.
    pub fn syn(self) -> bool {
        self.0 & SYN != 0
    }

    /// No more data from the sender.
    pub fn fin(self) -> bool {
        self.0 & FIN != 0
    }
}

impl From<u8> for Control {
    fn from(bits: u8) -> Self {
        Self(bits & 0b11_1111)
    }
}

impl From<Control> for u8 {
    fn from(control: Control) -> Self {
        control.0
    }
}

/// A parsed TCP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub ctl: Control,
    pub wnd: u16,
    pub urg: u16,
    pub options: Vec<TcpOption>,
}

impl TcpHeader {
    /// The header length on the wire, options included.
    pub fn len(&self) -> usize {
        BASE_HEADER_LEN + options::serialize(&self.options).len()
    }

    /// The timestamp option, if the header carries one.
    pub fn timestamps(&self) -> Option<(u32, u32)> {
        self.options.iter().find_map(|option| match option {
            TcpOption::Timestamps { tsval, tsecr } => Some((*tsval, *tsecr)),
            _ => None,
        })
    }

    /// Decodes a header from the start of `bytes`, validating the
    /// checksum over the whole segment. Returns the header and its
    /// length, so the caller can split off the text.
    pub fn from_bytes(
        bytes: &[u8],
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
    ) -> Result<(Self, usize), ParseError> {
        if bytes.len() < BASE_HEADER_LEN {
            return Err(ParseError::HeaderTooShort);
        }

        let data_offset = (bytes[12] >> 4) as usize * 4;
        if data_offset < BASE_HEADER_LEN {
            return Err(ParseError::BadDataOffset);
        }
        if bytes.len() < data_offset {
            return Err(ParseError::HeaderTooShort);
        }

        let carried = u16::from_be_bytes([bytes[16], bytes[17]]);
        let mut checksum = Checksum::new();
        checksum.add_u32(src_address.to_bytes());
        checksum.add_u32(dst_address.to_bytes());
        checksum.add_u8(0, 6);
        checksum.add_u16(bytes.len() as u16);
        checksum.accumulate(
            bytes
                .iter()
                .enumerate()
                .map(|(i, &b)| if (16..18).contains(&i) { 0 } else { b }),
        );
        let computed = checksum.as_u16();
        if computed != carried {
            return Err(ParseError::InvalidChecksum { computed, carried });
        }

        let header = Self {
            src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
            dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
            seq: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ack: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            ctl: Control::from(bytes[13]),
            wnd: u16::from_be_bytes([bytes[14], bytes[15]]),
            urg: u16::from_be_bytes([bytes[18], bytes[19]]),
            options: options::parse(&bytes[BASE_HEADER_LEN..data_offset])?,
        };
        Ok((header, data_offset))
    }

    fn serialize_with_checksum(&self, checksum: u16) -> Vec<u8> {
        let options = options::serialize(&self.options);
        let mut out = Vec::with_capacity(BASE_HEADER_LEN + options.len());
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        let data_offset = ((BASE_HEADER_LEN + options.len()) / 4) as u8;
        out.push(data_offset << 4);
        out.push(self.ctl.into());
        out.extend_from_slice(&self.wnd.to_be_bytes());
        out.extend_from_slice(&checksum.to_be_bytes());
        out.extend_from_slice(&self.urg.to_be_bytes());
        out.extend_from_slice(&options);
        out
    }
}

impl Display for TcpHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SEQ={} ACK={} WND={} [", self.seq, self.ack, self.wnd)?;
        for (flag, set) in [
            ("SYN", self.ctl.syn()),
            ("ACK", self.ctl.ack()),
            ("PSH", self.ctl.psh()),
            ("RST", self.ctl.rst()),
            ("FIN", self.ctl.fin()),
        ] {
            if set {
                write!(f, " {flag}")?;
            }
        }
        write!(f, " ]")
    }
}

/// A builder for outgoing headers; control bits default to clear and the
/// window to zero.
#[derive(Debug, Clone)]
pub struct TcpHeaderBuilder(TcpHeader);

impl TcpHeaderBuilder {
    pub fn new(src_port: u16, dst_port: u16, seq: u32) -> Self {
        Self(TcpHeader {
            src_port,
            dst_port,
            seq,
            ack: 0,
            ctl: Control::default(),
            wnd: 0,
            urg: 0,
            options: Vec::new(),
        })
    }

    pub fn syn(mut self) -> Self {
        self.0.ctl = Control::new(
            false,
            self.0.ctl.ack(),
            self.0.ctl.psh(),
            self.0.ctl.rst(),
            true,
            self.0.ctl.fin(),
        );
        self
    }

    pub fn ack(mut self, ack: u32) -> Self {
        self.0.ack = ack;
        self.0.ctl = Control::new(
            false,
            true,
            self.0.ctl.psh(),
            self.0.ctl.rst(),
            self.0.ctl.syn(),
            self.0.ctl.fin(),
        );
        self
    }

    pub fn psh(mut self) -> Self {
        self.0.ctl = Control::new(
            false,
            self.0.ctl.ack(),
            true,
            self.0.ctl.rst(),
            self.0.ctl.syn(),
            self.0.ctl.fin(),
        );
        self
    }

    pub fn rst(mut self) -> Self {
        self.0.ctl = Control::new(
            false,
            self.0.ctl.ack(),
            self.0.ctl.psh(),
            true,
            self.0.ctl.syn(),
            self.0.ctl.fin(),
        );
        self
    }

    pub fn fin(mut self) -> Self {
        self.0.ctl = Control::new(
            false,
            self.0.ctl.ack(),
            self.0.ctl.psh(),
            self.0.ctl.rst(),
            self.0.ctl.syn(),
            true,
        );
        self
    }

    pub fn wnd(mut self, wnd: u16) -> Self {
        self.0.wnd = wnd;
        self
    }

    pub fn option(mut self, option: TcpOption) -> Self {
        self.0.options.push(option);
        self
    }

    pub fn build(self) -> TcpHeader {
        self.0
    }
}

/// A header paired with its text: the unit the engine receives and
/// emits.
#[derive(Debug, Clone)]
pub struct Segment {
    pub header: TcpHeader,
    pub text: Payload,
}

impl Segment {
    pub fn new(header: TcpHeader, text: Payload) -> Self {
        Self { header, text }
    }

    /// The sequence space the segment occupies: its text plus one for
    /// SYN and one for FIN.
    pub fn seg_len(&self) -> usize {
        self.text.len() + self.header.ctl.syn() as usize + self.header.ctl.fin() as usize
    }

    /// The sequence number just past this segment.
    pub fn seq_end(&self) -> u32 {
        self.header.seq.wrapping_add(self.seg_len() as u32)
    }

    /// Decodes a segment, splitting header from text.
    pub fn from_wire(
        bytes: &[u8],
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
    ) -> Result<Self, ParseError> {
        let (header, header_len) = TcpHeader::from_bytes(bytes, src_address, dst_address)?;
        let text = Payload::new(bytes[header_len..].to_vec());
        Ok(Self { header, text })
    }

    /// Serializes the segment for handoff to the network layer: the
    /// header goes in front as its own chunk with the checksum (over
    /// the given pseudo-header addresses) filled in, and the text is
    /// shared rather than copied.
    pub fn to_wire(&self, src_address: Ipv4Address, dst_address: Ipv4Address) -> Payload {
        let unsummed = self.header.serialize_with_checksum(0);
        let total_len = unsummed.len() + self.text.len();

        let mut checksum = Checksum::new();
        checksum.add_u32(src_address.to_bytes());
        checksum.add_u32(dst_address.to_bytes());
        checksum.add_u8(0, 6);
        checksum.add_u16(total_len as u16);
        checksum.accumulate(unsummed.iter().copied().chain(self.text.iter()));

        let mut out = self.text.clone();
        out.prepend(self.header.serialize_with_checksum(checksum.as_u16()));
        out
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} LEN={}", self.header, self.text.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Address = Ipv4Address::new([10, 0, 0, 1]);
    const DST: Ipv4Address = Ipv4Address::new([10, 0, 0, 2]);

    #[test]
    fn matches_etherparse() -> anyhow::Result<()> {
        let payload = b"Hello, world!";
        let mut expected = etherparse::TcpHeader::new(0xcafe, 0xbabe, 123456789, 1024);
        expected.acknowledgment_number = 10;
        expected.ack = true;
        expected.psh = true;
        let ip_header = etherparse::Ipv4Header::new(
            (expected.header_len() as usize + payload.len()) as u16,
            30,
            etherparse::IpNumber::Tcp as u8,
            SRC.to_bytes(),
            DST.to_bytes(),
        );
        expected.checksum = expected.calc_checksum_ipv4(&ip_header, payload)?;

        let segment = Segment::new(
            TcpHeaderBuilder::new(0xcafe, 0xbabe, 123456789)
                .ack(10)
                .psh()
                .wnd(1024)
                .build(),
            Payload::new(payload),
        );
        let wire = segment.to_wire(SRC, DST);

        let mut reference = vec![];
        expected.write(&mut reference)?;
        reference.extend_from_slice(payload);
        assert_eq!(wire.to_vec(), reference);
        Ok(())
    }

    #[test]
    fn roundtrip_with_options() -> anyhow::Result<()> {
        let segment = Segment::new(
            TcpHeaderBuilder::new(80, 49152, 1000)
                .syn()
                .wnd(8192)
                .option(TcpOption::MaximumSegmentSize(1460))
                .option(TcpOption::WindowScale(5))
                .option(TcpOption::SackPermitted)
                .build(),
            Payload::empty(),
        );
        let wire = segment.to_wire(SRC, DST).to_vec();
        let parsed = Segment::from_wire(&wire, SRC, DST)?;
        assert_eq!(parsed.header, segment.header);
        assert!(parsed.text.is_empty());
        assert_eq!(parsed.seg_len(), 1);
        Ok(())
    }

    #[test]
    fn corrupted_text_fails_the_checksum() {
        let segment = Segment::new(
            TcpHeaderBuilder::new(80, 49152, 1000).ack(55).wnd(64).build(),
            Payload::new(b"text"),
        );
        let mut wire = segment.to_wire(SRC, DST).to_vec();
        *wire.last_mut().unwrap() ^= 0xff;
        assert!(matches!(
            Segment::from_wire(&wire, SRC, DST),
            Err(ParseError::InvalidChecksum { .. })
        ));
    }

    #[test]
    fn syn_and_fin_occupy_sequence_space() {
        let syn = Segment::new(
            TcpHeaderBuilder::new(1, 2, 100).syn().build(),
            Payload::empty(),
        );
        assert_eq!(syn.seg_len(), 1);
        assert_eq!(syn.seq_end(), 101);

        let fin = Segment::new(
            TcpHeaderBuilder::new(1, 2, 200).fin().ack(50).build(),
            Payload::new(b"bye"),
        );
        assert_eq!(fin.seg_len(), 4);
        assert_eq!(fin.seq_end(), 204);
    }
}
