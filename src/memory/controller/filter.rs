use bitfield::bitfield;

use crate::impl_to_from_u32;
use crate::memory::controller::fifo::FifoIndex;
use crate::memory::RepeatedRegister;

const FLT_CON_BASE: u16 = 0x1D0;
const FLT_OBJ_BASE: u16 = 0x1F0;
const FLT_MASK_BASE: u16 = 0x1F4;
const FLT_OBJ_SPACING: u16 = 8;

/// Number of acceptance filters.
pub const FILTER_COUNT: u8 = 32;

/// Index of one of the 32 acceptance filters.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterIndex(u8);

impl FilterIndex {
    pub const fn new(index: u8) -> Option<Self> {
        if index < FILTER_COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Four filters share one FLTCON register, one byte each.
    pub const fn control_address(self) -> u16 {
        FLT_CON_BASE + (self.0 as u16 & !0x3)
    }

    /// Byte lane of this filter within its FLTCON register.
    pub const fn control_shift(self) -> u32 {
        8 * (self.0 as u32 & 0x3)
    }
}

bitfield! {
    pub struct FilterObjectRegister(u32);
    impl Debug;
    u8;
    pub u16, sid, set_sid: 10, 0;
    pub u32, eid, set_eid: 28, 11;
    pub sid11, set_sid11: 29;
    pub exide, set_exide: 30;
}

impl_to_from_u32!(FilterObjectRegister);

impl RepeatedRegister for FilterObjectRegister {
    type Index = FilterIndex;

    fn get_address_for(index: FilterIndex) -> u16 {
        FLT_OBJ_BASE + FLT_OBJ_SPACING * index.get() as u16
    }
}

bitfield! {
    pub struct FilterMaskRegister(u32);
    impl Debug;
    u8;
    pub u16, msid, set_msid: 10, 0;
    pub u32, meid, set_meid: 28, 11;
    pub msid11, set_msid11: 29;
    pub mide, set_mide: 30;
}

impl_to_from_u32!(FilterMaskRegister);

impl RepeatedRegister for FilterMaskRegister {
    type Index = FilterIndex;

    fn get_address_for(index: FilterIndex) -> u16 {
        FLT_MASK_BASE + FLT_OBJ_SPACING * index.get() as u16
    }
}

/// One byte of a FLTCON register: enable bit plus target FIFO.
pub fn filter_control_byte(enabled: bool, target: FifoIndex) -> u8 {
    (u8::from(enabled) << 7) | target.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_share_control_registers_in_groups_of_four() {
        let f0 = FilterIndex::new(0).unwrap();
        let f3 = FilterIndex::new(3).unwrap();
        let f4 = FilterIndex::new(4).unwrap();
        assert_eq!(f0.control_address(), 0x1D0);
        assert_eq!(f3.control_address(), 0x1D0);
        assert_eq!(f3.control_shift(), 24);
        assert_eq!(f4.control_address(), 0x1D4);
        assert_eq!(f4.control_shift(), 0);
    }

    #[test]
    fn object_and_mask_addresses_interleave() {
        let f31 = FilterIndex::new(31).unwrap();
        assert_eq!(FilterObjectRegister::get_address_for(f31), 0x2E8);
        assert_eq!(FilterMaskRegister::get_address_for(f31), 0x2EC);
    }

    #[test]
    fn control_byte_routes_to_fifo() {
        let fifo = FifoIndex::new(9).unwrap();
        assert_eq!(filter_control_byte(true, fifo), 0x89);
        assert_eq!(filter_control_byte(false, fifo), 0x09);
    }
}
