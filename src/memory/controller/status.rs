use crate::memory::controller::diagnostic::{
    BusDiagnosticRegister0, BusDiagnosticRegister1, TransmitReceiveErrorCountRegister,
};
use crate::memory::controller::interrupt::InterruptRegister;
use crate::memory::SFRAddress;

/// Number of bytes covered by one status burst read.
pub const STATUS_SNAPSHOT_SIZE: usize = 36;

/// One burst read of the nine consecutive status registers starting at
/// C1INT (0x1C..=0x3F). Taking them in a single transfer keeps the flags,
/// the per-FIFO masks and the diagnostics coherent with each other.
pub struct StatusSnapshot {
    pub intf: InterruptRegister,
    pub rxif: u32,
    pub txif: u32,
    pub rxovif: u32,
    pub txatif: u32,
    pub txreq: u32,
    pub trec: TransmitReceiveErrorCountRegister,
    pub bdiag0: BusDiagnosticRegister0,
    pub bdiag1: BusDiagnosticRegister1,
}

impl StatusSnapshot {
    pub const ADDRESS: SFRAddress = SFRAddress::C1INT;

    pub fn from_bytes(buf: &[u8; STATUS_SNAPSHOT_SIZE]) -> Self {
        let word = |i: usize| {
            u32::from_le_bytes([buf[4 * i], buf[4 * i + 1], buf[4 * i + 2], buf[4 * i + 3]])
        };
        Self {
            intf: InterruptRegister(word(0)),
            rxif: word(1),
            txif: word(2),
            rxovif: word(3),
            txatif: word(4),
            txreq: word(5),
            trec: TransmitReceiveErrorCountRegister(word(6)),
            bdiag0: BusDiagnosticRegister0(word(7)),
            bdiag1: BusDiagnosticRegister1(word(8)),
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::from_bytes(&[0; STATUS_SNAPSHOT_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_decodes_little_endian_words() {
        let mut buf = [0u8; STATUS_SNAPSHOT_SIZE];
        // intf: RXIF flag + RXIE enable
        buf[0] = 0x02;
        buf[2] = 0x02;
        // rxif mask: fifos 1 and 3
        buf[4] = 0b0000_1010;
        // txreq: fifo 30
        buf[23] = 0x40;
        // trec: rec=9 tec=5 txwarn
        buf[24] = 9;
        buf[25] = 5;
        buf[26] = 0x04;

        let status = StatusSnapshot::from_bytes(&buf);
        assert!(status.intf.rxif());
        assert!(status.intf.any_enabled_flag());
        assert_eq!(status.rxif, 0b1010);
        assert_eq!(status.txreq, 1 << 30);
        assert_eq!(status.trec.tec(), 5);
        assert_eq!(status.trec.rec(), 9);
        assert!(status.trec.txwarn());
        assert!(!status.trec.txbo());
    }
}
