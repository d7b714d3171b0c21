//! Classic libpcap stream format, as read and written by the ring import and
//! export tools.
//!
//! A stream is a 24-byte file header followed by records of a 16-byte header
//! plus `length_capture` payload bytes. The wire-length word carries the
//! capture port in bit 15.

use std::io::{self, BufRead, BufReader, Read, Write};

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError as ParseError, PcapHeader};

use crate::SPSC::PacketInfo;

pub const MAGIC_NANO: u32 = 0xa1b2_3c4d;
pub const MAGIC_USEC: u32 = 0xa1b2_c3d4;
/// Chunked FMADIO capture stream. Recognised, not decoded.
pub const MAGIC_FMAD_CHUNK: u32 = 0x1337_bab3;
/// FMADIO ring stream. Recognised, not decoded.
pub const MAGIC_FMAD_RING: u32 = 0x1337_bab7;

pub const VERSION_MAJOR: u16 = 2;
pub const VERSION_MINOR: u16 = 4;

pub const LINK_ETHERNET: u32 = 1;
pub const LINK_ERF: u32 = 197;

pub const FILE_HEADER_LEN: usize = 24;
pub const RECORD_HEADER_LEN: usize = 16;

const WIRE_LENGTH_MASK: u32 = 0x7fff;
const PORT_SHIFT: u32 = 15;
const NANOS_PER_SEC: u64 = 1_000_000_000;

// Parser buffer; must hold the largest record plus its header.
const PARSE_BUFFER_SIZE: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum PcapError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("pcap parse error: {0}")]
    Parse(String),

    #[error("invalid pcap header magic {0:#010x}")]
    BadMagic(u32),

    #[error("truncated pcap {what}")]
    Truncated { what: &'static str },

    #[error("pcap record of {len} bytes exceeds buffer of {max} bytes")]
    RecordTooLarge { len: usize, max: usize },
}

impl PcapError {
    fn parse<I: std::fmt::Debug>(err: ParseError<I>) -> Self {
        PcapError::Parse(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapFileHeader {
    pub magic: u32,
    pub major: u16,
    pub minor: u16,
    pub timezone: u32,
    pub sig_flags: u32,
    pub snap_len: u32,
    pub link: u32,
}

impl PcapFileHeader {
    /// Nanosecond-resolution header as written by the ring exporter.
    pub fn nanosecond(link: u32) -> Self {
        Self {
            magic: MAGIC_NANO,
            major: VERSION_MAJOR,
            minor: VERSION_MINOR,
            timezone: 0,
            sig_flags: 0,
            snap_len: 0xffff,
            link,
        }
    }

    /// Nanoseconds per fractional timestamp unit, or `None` for an
    /// unsupported magic.
    pub fn time_scale(&self) -> Option<u64> {
        match self.magic {
            MAGIC_NANO => Some(1),
            MAGIC_USEC => Some(1000),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> [u8; FILE_HEADER_LEN] {
        let mut b = [0u8; FILE_HEADER_LEN];
        b[0..4].copy_from_slice(&self.magic.to_le_bytes());
        b[4..6].copy_from_slice(&self.major.to_le_bytes());
        b[6..8].copy_from_slice(&self.minor.to_le_bytes());
        b[8..12].copy_from_slice(&self.timezone.to_le_bytes());
        b[12..16].copy_from_slice(&self.sig_flags.to_le_bytes());
        b[16..20].copy_from_slice(&self.snap_len.to_le_bytes());
        b[20..24].copy_from_slice(&self.link.to_le_bytes());
        b
    }

    fn from_parsed(h: &PcapHeader) -> Self {
        Self {
            magic: if h.is_nanosecond_precision() {
                MAGIC_NANO
            } else {
                MAGIC_USEC
            },
            major: h.version_major,
            minor: h.version_minor,
            timezone: h.thiszone as u32,
            sig_flags: h.sigfigs,
            snap_len: h.snaplen,
            link: h.network.0 as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapRecordHeader {
    pub sec: u32,
    /// Fraction of a second in the stream's time scale.
    pub frac: u32,
    pub length_capture: u32,
    /// Bits 14:0 wire length, bit 15 port.
    pub length_wire: u32,
}

impl PcapRecordHeader {
    /// Nanosecond record for a packet received from a ring.
    pub fn from_packet(info: &PacketInfo) -> Self {
        Self {
            sec: info.seconds(),
            frac: info.nanos(),
            length_capture: info.length_capture as u32,
            length_wire: (info.length_wire as u32 & WIRE_LENGTH_MASK)
                | (((info.port as u32) & 1) << PORT_SHIFT),
        }
    }

    pub fn wire_length(&self) -> u16 {
        (self.length_wire & WIRE_LENGTH_MASK) as u16
    }

    pub fn port(&self) -> u8 {
        ((self.length_wire >> PORT_SHIFT) & 1) as u8
    }

    /// Epoch nanoseconds for a stream with the given time scale.
    pub fn timestamp_ns(&self, time_scale: u64) -> u64 {
        self.sec as u64 * NANOS_PER_SEC + self.frac as u64 * time_scale
    }

    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut b = [0u8; RECORD_HEADER_LEN];
        b[0..4].copy_from_slice(&self.sec.to_le_bytes());
        b[4..8].copy_from_slice(&self.frac.to_le_bytes());
        b[8..12].copy_from_slice(&self.length_capture.to_le_bytes());
        b[12..16].copy_from_slice(&self.length_wire.to_le_bytes());
        b
    }

}

pub struct PcapWriter<W: Write> {
    inner: W,
    packets: u64,
    bytes: u64,
}

impl<W: Write> PcapWriter<W> {
    /// Write `header` and return a writer positioned at the first record.
    pub fn new(mut inner: W, header: PcapFileHeader) -> io::Result<Self> {
        inner.write_all(&header.to_bytes())?;
        Ok(Self {
            inner,
            packets: 0,
            bytes: 0,
        })
    }

    pub fn write_record(&mut self, header: &PcapRecordHeader, payload: &[u8]) -> io::Result<()> {
        self.inner.write_all(&header.to_bytes())?;
        self.inner.write_all(payload)?;
        self.packets += 1;
        self.bytes += payload.len() as u64;
        Ok(())
    }

    /// Write a ring packet whose capture bytes are `payload`.
    pub fn write_packet(&mut self, info: &PacketInfo, payload: &[u8]) -> io::Result<()> {
        let mut header = PcapRecordHeader::from_packet(info);
        header.length_capture = payload.len() as u32;
        self.write_record(&header, payload)
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

pub struct PcapReader<R: Read> {
    inner: LegacyPcapReader<BufReader<R>>,
    header: PcapFileHeader,
    swapped: bool,
    time_scale: u64,
}

impl<R: Read> PcapReader<R> {
    /// Consume and validate the file header.
    pub fn new(inner: R) -> Result<Self, PcapError> {
        let mut inner = BufReader::new(inner);
        let head = inner.fill_buf()?;
        let magic = match head.get(..4) {
            Some(m) => u32::from_le_bytes([m[0], m[1], m[2], m[3]]),
            None => 0,
        };

        let mut reader = match LegacyPcapReader::new(PARSE_BUFFER_SIZE, inner) {
            Ok(reader) => reader,
            Err(ParseError::HeaderNotRecognized) => {
                if magic == MAGIC_FMAD_CHUNK || magic == MAGIC_FMAD_RING {
                    log::error!("FMADIO capture stream {:#010x} is not supported", magic);
                }
                return Err(PcapError::BadMagic(magic));
            }
            Err(ParseError::Incomplete(_)) | Err(ParseError::UnexpectedEof) => {
                return Err(PcapError::Truncated {
                    what: "file header",
                })
            }
            Err(e) => return Err(PcapError::parse(e)),
        };

        let parsed = match reader.next() {
            Ok((offset, PcapBlockOwned::LegacyHeader(h))) => {
                let parsed = (PcapFileHeader::from_parsed(&h), h.is_bigendian());
                reader.consume(offset);
                parsed
            }
            Ok(_) => return Err(PcapError::Parse("missing file header".into())),
            Err(e) => return Err(PcapError::parse(e)),
        };
        let (header, swapped) = parsed;
        let time_scale = header
            .time_scale()
            .ok_or(PcapError::BadMagic(header.magic))?;
        log::debug!(
            "pcap stream magic {:#010x} link {} swapped {}",
            header.magic,
            header.link,
            swapped
        );
        Ok(Self {
            inner: reader,
            header,
            swapped,
            time_scale,
        })
    }

    pub fn header(&self) -> &PcapFileHeader {
        &self.header
    }

    pub fn is_swapped(&self) -> bool {
        self.swapped
    }

    /// Nanoseconds per fractional timestamp unit (1 or 1000).
    pub fn time_scale(&self) -> u64 {
        self.time_scale
    }

    /// Read the next record's payload into `buf`.
    ///
    /// Returns `Ok(None)` at a clean end of stream. A record cut short
    /// anywhere else is `Truncated`.
    pub fn next_record(&mut self, buf: &mut [u8]) -> Result<Option<PcapRecordHeader>, PcapError> {
        loop {
            match self.inner.next() {
                Ok((offset, PcapBlockOwned::Legacy(block))) => {
                    let len = block.data.len();
                    if len > buf.len() {
                        let max = buf.len();
                        self.inner.consume(offset);
                        return Err(PcapError::RecordTooLarge { len, max });
                    }
                    buf[..len].copy_from_slice(block.data);
                    let header = PcapRecordHeader {
                        sec: block.ts_sec,
                        frac: block.ts_usec,
                        length_capture: block.caplen,
                        length_wire: block.origlen,
                    };
                    self.inner.consume(offset);
                    return Ok(Some(header));
                }
                Ok((offset, _)) => self.inner.consume(offset),
                Err(ParseError::Eof) => {
                    if self.inner.reader_exhausted() {
                        return Ok(None);
                    }
                    self.inner.refill().map_err(PcapError::parse)?;
                }
                Err(ParseError::Incomplete(_)) => {
                    if self.inner.reader_exhausted() {
                        return Err(PcapError::Truncated { what: "record" });
                    }
                    self.inner.refill().map_err(PcapError::parse)?;
                }
                Err(ParseError::UnexpectedEof) => {
                    return Err(PcapError::Truncated { what: "record" })
                }
                Err(e) => return Err(PcapError::parse(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian_24_bytes() {
        let b = PcapFileHeader::nanosecond(LINK_ETHERNET).to_bytes();
        assert_eq!(&b[0..4], &[0x4d, 0x3c, 0xb2, 0xa1]);
        assert_eq!(u16::from_le_bytes([b[4], b[5]]), 2);
        assert_eq!(u16::from_le_bytes([b[6], b[7]]), 4);
        assert_eq!(u32::from_le_bytes([b[16], b[17], b[18], b[19]]), 0xffff);
        assert_eq!(u32::from_le_bytes([b[20], b[21], b[22], b[23]]), 1);
    }

    #[test]
    fn big_endian_stream_is_decoded() {
        let mut be = Vec::new();
        be.extend_from_slice(&MAGIC_USEC.to_be_bytes());
        be.extend_from_slice(&VERSION_MAJOR.to_be_bytes());
        be.extend_from_slice(&VERSION_MINOR.to_be_bytes());
        be.extend_from_slice(&[0u8; 8]);
        be.extend_from_slice(&0xffffu32.to_be_bytes());
        be.extend_from_slice(&LINK_ETHERNET.to_be_bytes());
        for word in [3u32, 7, 2, 0x8000 | 60] {
            be.extend_from_slice(&word.to_be_bytes());
        }
        be.extend_from_slice(b"hi");

        let mut reader = PcapReader::new(be.as_slice()).unwrap();
        assert!(reader.is_swapped());
        assert_eq!(reader.header().magic, MAGIC_USEC);
        assert_eq!(reader.header().major, VERSION_MAJOR);
        assert_eq!(reader.header().link, LINK_ETHERNET);
        assert_eq!(reader.time_scale(), 1000);

        let mut buf = [0u8; 16];
        let rec = reader.next_record(&mut buf).unwrap().unwrap();
        assert_eq!(rec.sec, 3);
        assert_eq!(rec.frac, 7);
        assert_eq!(rec.length_capture, 2);
        assert_eq!(rec.wire_length(), 60);
        assert_eq!(rec.port(), 1);
        assert_eq!(&buf[..2], b"hi");
        assert!(reader.next_record(&mut buf).unwrap().is_none());
    }

    #[test]
    fn fmad_magics_are_not_decoded() {
        for magic in [MAGIC_FMAD_RING, MAGIC_FMAD_CHUNK] {
            let mut h = PcapFileHeader::nanosecond(LINK_ERF);
            h.magic = magic;
            let stream = h.to_bytes();
            match PcapReader::new(&stream[..]) {
                Err(PcapError::BadMagic(m)) => assert_eq!(m, magic),
                Err(e) => panic!("unexpected error {}", e),
                Ok(_) => panic!("FMADIO magic {:#x} accepted", magic),
            }
        }
    }

    #[test]
    fn port_rides_in_wire_length_bit_15() {
        let info = PacketInfo {
            timestamp_ns: 5_000_000_007,
            length_wire: 1514,
            length_capture: 64,
            port: 1,
            flags: 0,
        };
        let h = PcapRecordHeader::from_packet(&info);
        assert_eq!(h.length_wire, 0x8000 | 1514);
        assert_eq!(h.wire_length(), 1514);
        assert_eq!(h.port(), 1);
        assert_eq!(h.sec, 5);
        assert_eq!(h.frac, 7);
        assert_eq!(h.timestamp_ns(1), 5_000_000_007);
    }

    #[test]
    fn microsecond_records_scale_to_nanoseconds() {
        let h = PcapRecordHeader {
            sec: 2,
            frac: 500_000,
            length_capture: 0,
            length_wire: 0,
        };
        assert_eq!(h.timestamp_ns(1000), 2_500_000_000);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut stream = PcapFileHeader::nanosecond(LINK_ETHERNET).to_bytes().to_vec();
        let rec = PcapRecordHeader {
            sec: 0,
            frac: 0,
            length_capture: 10,
            length_wire: 10,
        };
        stream.extend_from_slice(&rec.to_bytes());
        stream.extend_from_slice(&[0xaa; 4]);

        let mut reader = PcapReader::new(stream.as_slice()).unwrap();
        let mut buf = [0u8; 64];
        assert!(matches!(
            reader.next_record(&mut buf),
            Err(PcapError::Truncated { what: "record" })
        ));
    }
}
