use bitfield::bitfield;
use embedded_can::{ExtendedId, Id, StandardId};

use super::{
    dlc_for_len, len_for_dlc, HEADER_SIZE_DWORDS, MAX_FD_BUFFER_SIZE, TX_OBJECT_HEADER_SIZE,
};

bitfield! {
    pub struct TxHeader([u32]);
    impl Debug;
    u8;

    // T0
    pub u16, sid, set_sid: 10, 0;
    pub u32, eid, set_eid: 28, 11;
    pub sid11, set_sid11: 29;

    // T1
    pub dlc, set_dlc: 35, 32;
    pub ide, set_ide: 36;
    pub rtr, set_rtr: 37;
    pub brs, set_brs: 38;
    pub fdf, set_fdf: 39;
    pub esi, set_esi: 40;
    pub u32, seq, set_seq: 63, 41;
}

impl<T: AsRef<[u32]>> TxHeader<T> {
    /// Reassembles the bus identifier from the SID/EID fields.
    pub fn identifier(&self) -> Id {
        decode_id(self.sid(), self.eid(), self.ide())
    }
}

pub(crate) fn decode_id(sid: u16, eid: u32, ide: bool) -> Id {
    if ide {
        let raw = ((sid as u32) << 18) | (eid & 0x3_FFFF);
        match ExtendedId::new(raw) {
            Some(id) => Id::Extended(id),
            None => Id::Extended(ExtendedId::ZERO),
        }
    } else {
        match StandardId::new(sid) {
            Some(id) => Id::Standard(id),
            None => Id::Standard(StandardId::ZERO),
        }
    }
}

pub(crate) fn encode_id<T: AsMut<[u32]> + AsRef<[u32]>>(header: &mut TxHeader<T>, identifier: Id) {
    match identifier {
        Id::Standard(id) => {
            header.set_sid(id.as_raw());
        }
        Id::Extended(id) => {
            header.set_sid(id.standard_id().as_raw());
            header.set_eid(id.as_raw() & 0x3_FFFF);
            header.set_ide(true);
        }
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxMessage {
    #[cfg_attr(feature = "defmt", defmt(Debug2Format))]
    header: TxHeader<[u32; HEADER_SIZE_DWORDS]>,
    data: [u8; MAX_FD_BUFFER_SIZE],
    data_len: usize,
}

impl TxMessage {
    pub fn new_fd(identifier: Id, data: &[u8]) -> Option<Self> {
        Self::new(identifier, data, true)
    }

    pub fn new_2_0(identifier: Id, data: &[u8]) -> Option<Self> {
        Self::new(identifier, data, false)
    }

    fn new(identifier: Id, data: &[u8], is_fd: bool) -> Option<Self> {
        let mut header = TxHeader([0u32; HEADER_SIZE_DWORDS]);

        let dlc = dlc_for_len(data.len(), is_fd)?;

        header.set_dlc(dlc);
        header.set_fdf(is_fd);

        encode_id(&mut header, identifier);

        let mut data_buf = [0u8; MAX_FD_BUFFER_SIZE];
        data_buf[..data.len()].copy_from_slice(data);

        Some(Self {
            header,
            data: data_buf,
            data_len: data.len(),
        })
    }

    pub fn with_remote(mut self, rtr: bool) -> Self {
        self.header.set_rtr(rtr);
        self
    }

    pub fn with_bit_rate_switched(mut self, brs: bool) -> Self {
        self.header.set_brs(brs);
        self
    }

    pub fn with_error_status_indicator(mut self, esi: bool) -> Self {
        self.header.set_esi(esi);
        self
    }

    /// The SEQ field comes back in the transmit event record, so the
    /// scheduler stamps the origin FIFO into it before submission.
    pub(crate) fn set_sequence(&mut self, seq: u32) {
        self.header.set_seq(seq);
    }

    pub fn header(&self) -> &TxHeader<[u32; HEADER_SIZE_DWORDS]> {
        &self.header
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len]
    }

    /// Serializes the object for FIFO RAM. Returns the number of valid
    /// bytes, rounded up to a full word as RAM transfers require, and the
    /// backing buffer.
    pub fn as_bytes(&self) -> (usize, [u8; TX_OBJECT_HEADER_SIZE + MAX_FD_BUFFER_SIZE]) {
        let mut buffer = [0u8; TX_OBJECT_HEADER_SIZE + MAX_FD_BUFFER_SIZE];

        buffer[0..4].copy_from_slice(&self.header.0[0].to_le_bytes());
        buffer[4..8].copy_from_slice(&self.header.0[1].to_le_bytes());

        buffer[TX_OBJECT_HEADER_SIZE..TX_OBJECT_HEADER_SIZE + self.data_len]
            .copy_from_slice(&self.data[..self.data_len]);

        let payload = len_for_dlc(self.header.dlc(), self.header.fdf()).unwrap_or(0);
        let aligned = (payload + 3) & !3;

        (TX_OBJECT_HEADER_SIZE + aligned, buffer)
    }
}
