use core::convert::TryFrom;

use num_enum::{IntoPrimitive, TryFromPrimitive, TryFromPrimitiveError};

use bitfield::bitfield;

use crate::{impl_register, impl_to_from_u32};

#[derive(Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum WakeupFilterTime {
    T00Filter = 0,
    T01Filter = 1,
    T10Filter = 2,
    T11Filter = 3,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OperationMode {
    NormalCanFD = 0,
    Sleep = 1,
    InternalLoopback = 2,
    ListenOnly = 3,
    Configuration = 4,
    ExternalLoopback = 5,
    NormalCan2 = 6,
    Restricted = 7,
    Unknown = 0xff,
}

/// All times are in arbitration bit times
#[derive(Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum InterTransmissionDelay {
    NoDelay = 0,
    Delay2 = 1,
    Delay4 = 2,
    Delay8 = 3,
    Delay16 = 4,
    Delay32 = 5,
    Delay64 = 6,
    Delay128 = 7,
    Delay256 = 8,
    Delay512 = 9,
    Delay1024 = 10,
    Delay2048 = 11,
    Delay4096 = 12,
}

/// Power-on reset contents of C1CON: Configuration mode requested and
/// active, ISO CRC, protocol exception disabled, wake-up filter T11,
/// TEF and TXQ enabled.
pub const CON_DEFAULT: u32 = 0x0498_0760;

/// The C1CON bits that are compared against [`CON_DEFAULT`] when probing
/// for the chip. Excludes BUSY and the reserved bits.
pub const CON_DEFAULT_MASK: u32 = 0xFFFF_177F;

/// Mask of the OPMOD field (the mode the controller is actually in).
pub const CON_OPMOD_MASK: u32 = 0x00E0_0000;

bitfield! {
    pub struct CanControlRegister(u32);
    impl Debug;
    u8;
    pub dncnt, set_dncnt: 4, 0;
    pub isocrcen, set_isocrcen: 5;
    pub pxedis, set_pxedis: 6;
    pub wakfil, set_wakfil: 8;
    _wft, _set_wft: 10, 9;
    pub busy, _: 11;
    pub brsdis, set_brsdis: 12;
    pub rtxat, set_rtxat: 16;
    pub esigm, set_esigm: 17;
    pub serr2lom, set_serr2lom: 18;
    pub stef, set_stef: 19;
    pub txqen, set_txqen: 20;
    _opmod, _: 23, 21;
    _, _set_reqop: 26, 24;
    pub abat, set_abat: 27;
    _txbws, _set_txbws: 31, 28;
}

impl_to_from_u32!(CanControlRegister);
impl_register!(CanControlRegister, C1CON);

impl CanControlRegister {
    pub fn wft(&self) -> Result<WakeupFilterTime, TryFromPrimitiveError<WakeupFilterTime>> {
        WakeupFilterTime::try_from(self._wft())
    }

    pub fn set_wft(&mut self, filter: WakeupFilterTime) {
        self._set_wft(filter.into())
    }

    pub fn opmode(&self) -> OperationMode {
        match OperationMode::try_from(self._opmod()) {
            Ok(val) => val,
            Err(_) => OperationMode::Unknown,
        }
    }

    pub fn set_opmode(&mut self, mode: OperationMode) {
        self._set_reqop(mode.into());
    }

    pub fn txbws(
        &self,
    ) -> Result<InterTransmissionDelay, TryFromPrimitiveError<InterTransmissionDelay>> {
        InterTransmissionDelay::try_from(self._txbws())
    }

    pub fn set_txbws(&mut self, delay: InterTransmissionDelay) {
        self._set_txbws(delay.into());
    }
}

bitfield! {
    pub struct NominalBitTimeConfigurationRegister(u32);
    impl Debug;
    u8;
    pub sjw, set_sjw: 6, 0;
    pub tseg2, set_tseg2: 14, 8;
    pub tseg1, set_tseg1: 23, 16;
    pub brp, set_brp: 31, 24;
}

impl_to_from_u32!(NominalBitTimeConfigurationRegister);
impl_register!(NominalBitTimeConfigurationRegister, C1NBTCFG);

bitfield! {
    pub struct DataBitTimeConfigurationRegister(u32);
    impl Debug;
    u8;
    pub sjw, set_sjw: 3, 0;
    pub tseg2, set_tseg2: 11, 8;
    pub tseg1, set_tseg1: 20, 16;
    pub brp, set_brp: 31, 24;
}

impl_to_from_u32!(DataBitTimeConfigurationRegister);
impl_register!(DataBitTimeConfigurationRegister, C1DBTCFG);

#[derive(Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TransmitterDelayCompensationMode {
    Disabled = 0,
    Manual = 1,
    #[num_enum(alternatives = [3])]
    Automatic = 2,
}

bitfield! {
    pub struct TransmitterDelayCompensationRegister(u32);
    impl Debug;
    u8;
    pub tdcv, set_tdcv: 5, 0;
    pub tdco, set_tdco: 13, 8;
    _tdcmod, _set_tdcmod: 17, 16;
    pub sid11en, set_sid11en: 24;
    pub edgflten, set_edgflten: 25;
}

impl TransmitterDelayCompensationRegister {
    pub fn tdcmod(
        &self,
    ) -> Result<
        TransmitterDelayCompensationMode,
        TryFromPrimitiveError<TransmitterDelayCompensationMode>,
    > {
        TransmitterDelayCompensationMode::try_from(self._tdcmod())
    }

    pub fn set_tdcmod(&mut self, filter: TransmitterDelayCompensationMode) {
        self._set_tdcmod(filter.into())
    }
}

impl_to_from_u32!(TransmitterDelayCompensationRegister);
impl_register!(TransmitterDelayCompensationRegister, C1TDC);

bitfield! {
    pub struct TimeBaseCounterRegister(u32);
    impl Debug;
    u32;
    pub tbc, set_tbc: 31, 0;
}

impl_to_from_u32!(TimeBaseCounterRegister);
impl_register!(TimeBaseCounterRegister, C1TBC);

bitfield! {
    pub struct TimeStampControlRegister(u32);
    impl Debug;
    u8;
    pub u16, tbcpre, set_tbcpre: 9, 0;
    pub tbcen, set_tbcen: 16;
    pub tseof, set_tseof: 17;
    pub tsres, set_tsres: 18;
}

impl_to_from_u32!(TimeStampControlRegister);
impl_register!(TimeStampControlRegister, C1TSCON);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_default_matches_field_encoding() {
        let mut con = CanControlRegister(0);
        con.set_isocrcen(true);
        con.set_pxedis(true);
        con.set_wakfil(true);
        con.set_wft(WakeupFilterTime::T11Filter);
        con.set_stef(true);
        con.set_txqen(true);
        con.set_opmode(OperationMode::Configuration);

        // OPMOD is read-only through the typed view, patch it in raw form
        let raw = u32::from(con) | (u32::from(u8::from(OperationMode::Configuration)) << 21);
        assert_eq!(raw & CON_DEFAULT_MASK, CON_DEFAULT);
    }

    #[test]
    fn opmode_reads_the_active_mode_field() {
        let con = CanControlRegister(CON_DEFAULT);
        assert_eq!(con.opmode(), OperationMode::Configuration);
        assert!(!con.busy());
    }
}
