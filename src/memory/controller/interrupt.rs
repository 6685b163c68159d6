use bitfield::bitfield;

use crate::{impl_register, impl_to_from_u32, software_clearable};

bitfield! {
    /// C1INT. The low half holds the interrupt flags, the high half the
    /// matching enable bits, so `flags & (raw >> 16)` yields the flags that
    /// are actually allowed to assert the interrupt line.
    pub struct InterruptRegister(u32);
    impl Debug;
    u8;
    pub txif, _: 0;
    pub rxif, _: 1;
    _tbcif, _set_tbcif: 2;
    _modif, _set_modif: 3;
    pub tefif, _: 4;
    pub eccif, _: 8;
    pub spicrcif, _: 9;
    pub txatif, _: 10;
    pub rxovif, _: 11;
    _serrif, _set_serrif: 12;
    _cerrif, _set_cerrif: 13;
    _wakif, _set_wakif: 14;
    _ivmif, _set_ivmif: 15;

    pub txie, set_txie: 16;
    pub rxie, set_rxie: 17;
    pub tbcie, set_tbcie: 18;
    pub modie, set_modie: 19;
    pub tefie, set_tefie: 20;
    pub eccie, set_eccie: 24;
    pub spicrcie, set_spicrcie: 25;
    pub txatie, set_txatie: 26;
    pub rxovie, set_rxovie: 27;
    pub serrie, set_serrie: 28;
    pub cerrie, set_cerrie: 29;
    pub wakie, set_wakie: 30;
    pub ivmie, set_ivmie: 31;
}

impl InterruptRegister {
    pub const TXIF: u32 = 1 << 0;
    pub const RXIF: u32 = 1 << 1;
    pub const TBCIF: u32 = 1 << 2;
    pub const MODIF: u32 = 1 << 3;
    pub const TEFIF: u32 = 1 << 4;
    pub const ECCIF: u32 = 1 << 8;
    pub const SPICRCIF: u32 = 1 << 9;
    pub const TXATIF: u32 = 1 << 10;
    pub const RXOVIF: u32 = 1 << 11;
    pub const SERRIF: u32 = 1 << 12;
    pub const CERRIF: u32 = 1 << 13;
    pub const WAKIF: u32 = 1 << 14;
    pub const IVMIF: u32 = 1 << 15;

    /// Offset between a flag bit and its enable bit.
    pub const IE_SHIFT: u32 = 16;

    software_clearable!(tbcif, clear_tbcif);
    software_clearable!(modif, clear_modif);
    software_clearable!(serrif, clear_serrif);
    software_clearable!(cerrif, clear_cerrif);
    software_clearable!(wakif, clear_wakif);
    software_clearable!(ivmif, clear_ivmif);

    /// The enable set the interrupt worker runs with.
    pub fn worker_enables() -> Self {
        let mut reg = Self(0);
        reg.set_tefie(true);
        reg.set_rxie(true);
        reg.set_modie(true);
        reg.set_serrie(true);
        reg.set_ivmie(true);
        reg.set_cerrie(true);
        reg.set_eccie(true);
        reg
    }

    /// True if any flag with its matching enable bit is set.
    pub fn any_enabled_flag(&self) -> bool {
        self.0 & (self.0 >> Self::IE_SHIFT) != 0
    }
}

impl_to_from_u32!(InterruptRegister);
impl_register!(InterruptRegister, C1INT);
