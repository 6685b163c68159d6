use bitfield::bitfield;
use embedded_can::Id;

use super::tx::{decode_id, TxHeader};
use super::{
    len_for_dlc, HEADER_SIZE_DWORDS, MAX_FD_BUFFER_SIZE, RX_OBJECT_HEADER_SIZE, TEF_OBJECT_SIZE,
};

bitfield! {
    pub struct RxHeader([u32]);
    impl Debug;
    u8;

    /* R0 */

    /// Standard ID
    pub u16, sid, _: 10, 0;
    /// Extended ID
    pub u32, eid, _: 28, 11;
    sid11, _: 29;

    /* R1 */

    /// Data Length Code
    pub dlc, _: 35, 32;
    /// ID Extension
    pub ide, _: 36;
    /// Remote Transmission Request
    pub rtr, _: 37;
    /// Bit Rate Switched
    pub brs, _: 38;
    /// FD Frame
    pub fdf, _: 39;
    /// Error Status Indicator
    pub esi, _: 40;
    /// Number of the filter that matched
    pub filter_hit, _: 47, 43;
}

impl<T: AsRef<[u32]>> RxHeader<T> {
    pub fn identifier(&self) -> Id {
        decode_id(self.sid(), self.eid(), self.ide())
    }
}

/// A received message lifted out of FIFO RAM.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxMessage {
    #[cfg_attr(feature = "defmt", defmt(Debug2Format))]
    header: RxHeader<[u32; HEADER_SIZE_DWORDS]>,
    timestamp: u32,
    data: [u8; MAX_FD_BUFFER_SIZE],
}

impl RxMessage {
    /// Parses an RX object from its RAM image: two header words, the
    /// timestamp word, then the payload. `buf` may be shorter than a full
    /// payload when only part of it was fetched.
    pub fn from_ram_bytes(buf: &[u8]) -> Option<RxMessage> {
        if buf.len() < RX_OBJECT_HEADER_SIZE {
            return None;
        }

        let word = |i: usize| {
            u32::from_le_bytes([buf[4 * i], buf[4 * i + 1], buf[4 * i + 2], buf[4 * i + 3]])
        };
        let header = RxHeader([word(0), word(1)]);
        let timestamp = word(2);

        let available = (buf.len() - RX_OBJECT_HEADER_SIZE).min(MAX_FD_BUFFER_SIZE);
        let mut data = [0u8; MAX_FD_BUFFER_SIZE];
        data[..available].copy_from_slice(&buf[RX_OBJECT_HEADER_SIZE..][..available]);

        Some(Self {
            header,
            timestamp,
            data,
        })
    }

    /// Gets the message header to inspect the low level control bits
    pub fn header(&self) -> &RxHeader<[u32; HEADER_SIZE_DWORDS]> {
        &self.header
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Creates a slice over the data associated with this message with the
    /// correct length calculated from the DLC
    pub fn data(&self) -> &[u8] {
        let len = len_for_dlc(self.header.dlc(), self.header.fdf()).unwrap_or(0);
        &self.data[..len]
    }

    /// Determines from the header whether or not this message is a CAN FD frame
    pub fn is_fd(&self) -> bool {
        self.header.fdf()
    }
}

/// One transmit event record. The SEQ field carries the FIFO the frame was
/// submitted on, which ties the completion back to the scheduler masks.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxEventObject {
    #[cfg_attr(feature = "defmt", defmt(Debug2Format))]
    header: TxHeader<[u32; HEADER_SIZE_DWORDS]>,
    timestamp: u32,
}

impl TxEventObject {
    pub fn from_ram_bytes(buf: &[u8]) -> Option<TxEventObject> {
        if buf.len() < TEF_OBJECT_SIZE {
            return None;
        }

        let word = |i: usize| {
            u32::from_le_bytes([buf[4 * i], buf[4 * i + 1], buf[4 * i + 2], buf[4 * i + 3]])
        };

        Some(Self {
            header: TxHeader([word(0), word(1)]),
            timestamp: word(2),
        })
    }

    pub fn header(&self) -> &TxHeader<[u32; HEADER_SIZE_DWORDS]> {
        &self.header
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// The FIFO the completed frame was originally submitted on.
    pub fn origin_fifo(&self) -> u8 {
        (self.header.seq() & 0x1F) as u8
    }

    /// Payload bytes of the completed frame.
    pub fn frame_len(&self) -> usize {
        len_for_dlc(self.header.dlc(), self.header.fdf()).unwrap_or(0)
    }
}

/// An object drained during one interrupt cycle, kept tagged so TEF records
/// and received frames can be merged into a single timestamp-ordered run.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CollectedObject {
    Rx(RxMessage),
    Tef(TxEventObject),
}

impl CollectedObject {
    pub fn timestamp(&self) -> u32 {
        match self {
            CollectedObject::Rx(rx) => rx.timestamp(),
            CollectedObject::Tef(tef) => tef.timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::StandardId;

    #[test]
    fn rx_object_parses_header_timestamp_and_payload() {
        let mut buf = [0u8; 24];
        // sid 0x123
        buf[0] = 0x23;
        buf[1] = 0x01;
        // dlc 8
        buf[4] = 0x08;
        // timestamp 0x01020304
        buf[8..12].copy_from_slice(&0x0102_0304u32.to_le_bytes());
        buf[12..20].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let msg = RxMessage::from_ram_bytes(&buf).unwrap();
        assert_eq!(
            msg.header().identifier(),
            Id::Standard(StandardId::new(0x123).unwrap())
        );
        assert_eq!(msg.timestamp(), 0x0102_0304);
        assert!(!msg.is_fd());
        assert_eq!(msg.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn partial_rx_read_still_exposes_short_payloads() {
        let mut buf = [0u8; 20];
        buf[4] = 0x03; // dlc 3
        buf[12..15].copy_from_slice(&[0xAA, 0xBB, 0xCC]);

        let msg = RxMessage::from_ram_bytes(&buf).unwrap();
        assert_eq!(msg.data(), &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn tef_record_reports_its_origin_fifo() {
        // TE1: dlc 8 in bits 3..0, seq 25 starting at bit 9
        let te1: u32 = 8 | (25 << 9);
        let mut buf = [0u8; TEF_OBJECT_SIZE];
        buf[4..8].copy_from_slice(&te1.to_le_bytes());
        buf[8..12].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());

        let tef = TxEventObject::from_ram_bytes(&buf).unwrap();
        assert_eq!(tef.origin_fifo(), 25);
        assert_eq!(tef.timestamp(), 0xFFFF_FFF0);
        assert_eq!(tef.frame_len(), 8);
    }

    #[test]
    fn truncated_buffers_are_rejected() {
        assert!(RxMessage::from_ram_bytes(&[0u8; 11]).is_none());
        assert!(TxEventObject::from_ram_bytes(&[0u8; 8]).is_none());
    }
}
