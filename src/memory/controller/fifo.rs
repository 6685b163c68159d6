use bitfield::bitfield;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::memory::{RepeatedRegister, RAM_BASE_ADDRESS};
use crate::{impl_register, impl_to_from_u32, software_clearable, software_settable};

/// Number of message FIFOs the controller exposes. Slot 0 belongs to the
/// TXQ which this driver keeps disabled, so usable indices are 1..=31.
pub const FIFO_COUNT: u8 = 31;

const FIFO_CON_BASE: u16 = 0x50;
const FIFO_STA_BASE: u16 = 0x54;
const FIFO_UA_BASE: u16 = 0x58;
const FIFO_SPACING: u16 = 12;

/// Index of one of the 31 message FIFOs.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FifoIndex(u8);

impl FifoIndex {
    pub const fn new(index: u8) -> Option<Self> {
        if index >= 1 && index <= FIFO_COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Position of this FIFO in the per-FIFO interrupt/request masks.
    pub const fn bit(self) -> u32 {
        1 << self.0
    }
}

bitfield! {
    pub struct UserAddressRegister(u32);
    u32;
    pub fifoua, _: 31, 0;
}

impl_to_from_u32!(UserAddressRegister);

impl UserAddressRegister {
    /// The hardware reports addresses relative to the start of RAM.
    pub fn calculate_ram_address(&self) -> u16 {
        self.fifoua() as u16 + RAM_BASE_ADDRESS
    }
}

impl RepeatedRegister for UserAddressRegister {
    type Index = FifoIndex;

    fn get_address_for(index: FifoIndex) -> u16 {
        FIFO_UA_BASE + FIFO_SPACING * index.get() as u16
    }
}

bitfield! {
    pub struct TxEventFifoControlRegister(u32);
    impl Debug;
    u8;
    pub tefneie, set_tefneie: 0;
    pub tefhie, set_tefhie: 1;
    pub teffie, set_teffie: 2;
    pub tefovie, set_tefovie: 3;
    pub teftsen, set_teftsen: 5;

    _uinc, _set_uinc: 8;
    _freset, _set_freset: 10;

    _fsize, _set_fsize: 28, 24;
}

impl TxEventFifoControlRegister {
    software_settable!(uinc, set_uinc);
    software_settable!(freset, set_freset);

    // Max size is 32
    pub fn fifo_size(&self) -> u8 {
        self._fsize() + 1
    }

    /// Max size is 32.
    pub fn set_fifo_size(&mut self, size: u8) {
        self._set_fsize(match size.cmp(&32u8) {
            core::cmp::Ordering::Greater => 31,
            _ => size - 1,
        });
    }
}

impl_register!(TxEventFifoControlRegister, C1TEFCON);
impl_to_from_u32!(TxEventFifoControlRegister);

bitfield! {
    pub struct TxEventFifoStatusRegister(u32);
    impl Debug;
    u8;
    pub tefneif, _: 0;
    pub tefhif, _: 1;
    pub teffif, _: 2;
    _tefovif, _set_tefovif: 3;
}

impl_register!(TxEventFifoStatusRegister, C1TEFSTA);
impl_to_from_u32!(TxEventFifoStatusRegister);

impl TxEventFifoStatusRegister {
    software_clearable!(tefovif, clear_tefovif);
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RetransmissionAttempts {
    Disabled = 0,
    ThreeRetries = 1,
    #[default]
    #[num_enum(alternatives = [3])]
    UnlimitedRetries = 2,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PayloadSize {
    Bytes8 = 0,
    Bytes12 = 1,
    Bytes16 = 2,
    Bytes20 = 3,
    Bytes24 = 4,
    Bytes32 = 5,
    Bytes48 = 6,
    Bytes64 = 7,
}

impl PayloadSize {
    pub fn num_bytes(&self) -> usize {
        match self {
            Self::Bytes8 => 8,
            Self::Bytes12 => 12,
            Self::Bytes16 => 16,
            Self::Bytes20 => 20,
            Self::Bytes24 => 24,
            Self::Bytes32 => 32,
            Self::Bytes48 => 48,
            Self::Bytes64 => 64,
        }
    }
}

bitfield! {
    pub struct FifoControlRegister(u32);
    impl Debug;
    u8;
    pub tfnrfnie, set_tfnrfnie: 0;
    pub tfhrfhie, set_tfhrfhie: 1;
    pub tferffie, set_tferffie: 2;
    pub rxovie, set_rxovie: 3;
    pub txatie, set_txatie: 4;
    pub rxtsen, set_rxtsen: 5;
    pub rtren, set_rtren: 6;
    pub txen, set_txen: 7;
    _uinc, _set_uinc: 8;
    pub txreq, set_txreq: 9;
    _freset, _set_freset: 10;
    pub txpri, set_txpri: 20, 16;
    _txat, _set_txat: 22, 21;
    _fsize, _set_fsize: 28, 24;
    _plsize, _set_plsize: 31, 29;
}

impl_to_from_u32!(FifoControlRegister);

impl FifoControlRegister {
    software_settable!(uinc, set_uinc);
    software_settable!(freset, set_freset);

    /// TXREQ and UINC share the second byte of the register, which allows
    /// arming a transmission with a single-byte masked write.
    pub const TRIGGER_MASK: u32 = 1 << 9 | 1 << 8;

    pub fn retransmission_attempts(&self) -> RetransmissionAttempts {
        match RetransmissionAttempts::try_from(self._txat()) {
            Ok(val) => val,
            _ => RetransmissionAttempts::UnlimitedRetries,
        }
    }

    pub fn set_retransmission_attempts(&mut self, value: RetransmissionAttempts) {
        self._set_txat(value.into())
    }

    // Max size is 32
    pub fn fifo_size(&self) -> u8 {
        self._fsize() + 1
    }

    /// Max size is 32.
    pub fn set_fifo_size(&mut self, size: u8) {
        self._set_fsize(match size.cmp(&32u8) {
            core::cmp::Ordering::Greater => 31,
            _ => size - 1,
        });
    }

    pub fn payload_size(&self) -> PayloadSize {
        match PayloadSize::try_from(self._plsize()) {
            Ok(val) => val,
            _ => PayloadSize::Bytes8,
        }
    }

    pub fn set_payload_size(&mut self, size: PayloadSize) {
        self._set_plsize(size.into());
    }
}

impl RepeatedRegister for FifoControlRegister {
    type Index = FifoIndex;

    fn get_address_for(index: FifoIndex) -> u16 {
        FIFO_CON_BASE + FIFO_SPACING * index.get() as u16
    }
}

bitfield! {
    pub struct FifoStatusRegister(u32);
    impl Debug;
    u8;
    pub tfnrfnif, _: 0;
    pub tfhrfhif, _: 1;
    pub tferffif, _: 2;
    _rxovif, _set_rxovif: 3;
    _txatif, _set_txatif: 4;
    _txerr, _set_txerr: 5;
    _txlarb, _set_txlarb: 6;
    _txabt, _set_txabt: 7;
    pub fifoci, _: 12, 8;
}

impl_to_from_u32!(FifoStatusRegister);

impl FifoStatusRegister {
    pub const RXOVIF_MASK: u32 = 1 << 3;

    software_clearable!(rxovif, clear_rxovif);
    software_clearable!(txatif, clear_txatif);
    software_clearable!(txerr, clear_txerr);
    software_clearable!(txlarb, clear_txlarb);
    software_clearable!(txabt, clear_txabt);
}

impl RepeatedRegister for FifoStatusRegister {
    type Index = FifoIndex;

    fn get_address_for(index: FifoIndex) -> u16 {
        FIFO_STA_BASE + FIFO_SPACING * index.get() as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_registers_are_spaced_twelve_bytes_apart() {
        let f1 = FifoIndex::new(1).unwrap();
        let f31 = FifoIndex::new(31).unwrap();
        assert_eq!(FifoControlRegister::get_address_for(f1), 0x5C);
        assert_eq!(FifoStatusRegister::get_address_for(f1), 0x60);
        assert_eq!(UserAddressRegister::get_address_for(f1), 0x64);
        assert_eq!(FifoControlRegister::get_address_for(f31), 0x1C4);
    }

    #[test]
    fn fifo_index_range_is_checked() {
        assert!(FifoIndex::new(0).is_none());
        assert!(FifoIndex::new(32).is_none());
        assert_eq!(FifoIndex::new(5).unwrap().bit(), 1 << 5);
    }

    #[test]
    fn trigger_mask_covers_txreq_and_uinc() {
        let mut con = FifoControlRegister(0);
        con.set_txreq(true);
        con.set_uinc();
        assert_eq!(u32::from(con), FifoControlRegister::TRIGGER_MASK);
    }
}
