pub mod chip;
pub mod controller;

/// Base address of the chip's message RAM. Used for verifying memory accesses
/// and calculating FIFO pointer addresses.
pub const RAM_BASE_ADDRESS: u16 = 0x400;

/// End address of the chip's message RAM (inclusive).
pub const RAM_END_ADDRESS: u16 = 0xBFF;

/// Size of the message RAM in bytes.
pub const RAM_SIZE: usize = 2048;

/// Calculates whether a RAM address range is valid without making any IO calls
pub fn is_valid_ram_address(address: u16, data_size: usize) -> bool {
    address >= RAM_BASE_ADDRESS
        && (address as usize + data_size) <= RAM_BASE_ADDRESS as usize + RAM_SIZE
}

/// Represents an SFR register that has a single unique memory location
pub trait Register {
    fn get_address() -> SFRAddress;
}

/// Represents an SFR register whose structure is reused in several locations
/// in memory. The concrete address is computed from an index.
pub trait RepeatedRegister {
    type Index: Copy;

    fn get_address_for(index: Self::Index) -> u16;
}

/// Addresses of the registers that live at a single fixed location. Per-FIFO
/// and per-filter registers are computed arithmetically, see
/// [`controller::fifo`] and [`controller::filter`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SFRAddress {
    /* Chip Specific Registers */
    OSC = 0xE00,
    IOCON = 0xE04,
    CRC = 0xE08,
    ECCCON = 0xE0C,
    ECCSTAT = 0xE10,
    DEVID = 0xE14,

    /* Controller Registers */
    C1CON = 0x0,
    C1NBTCFG = 0x4,
    C1DBTCFG = 0x8,
    C1TDC = 0xC,
    C1TBC = 0x10,
    C1TSCON = 0x14,
    C1VEC = 0x18,
    C1INT = 0x1C,
    C1RXIF = 0x20,
    C1TXIF = 0x24,
    C1RXOVIF = 0x28,
    C1TXATIF = 0x2C,
    C1TXREQ = 0x30,
    C1TREC = 0x34,
    C1BDIAG0 = 0x38,
    C1BDIAG1 = 0x3C,
    C1TEFCON = 0x40,
    C1TEFSTA = 0x44,
    C1TEFUA = 0x48,
}

impl SFRAddress {
    pub const fn address(self) -> u16 {
        self as u16
    }
}

/* Glue for the bitfield register structs */

macro_rules! impl_to_from_u32 {
    ($reg:ident) => {
        impl From<$reg> for u32 {
            fn from(reg: $reg) -> u32 {
                reg.0
            }
        }

        impl From<u32> for $reg {
            fn from(raw: u32) -> $reg {
                $reg(raw)
            }
        }
    };
}

macro_rules! impl_register {
    ($reg:ident, $variant:ident) => {
        impl $crate::memory::Register for $reg {
            fn get_address() -> $crate::memory::SFRAddress {
                $crate::memory::SFRAddress::$variant
            }
        }
    };
}

/// Exposes a flag the hardware raises and software may only clear. The
/// bitfield declares the raw accessors with a leading underscore so only
/// these wrappers are public.
macro_rules! software_clearable {
    ($flag:ident, $clear:ident) => {
        concat_idents::concat_idents!(raw_get = _, $flag {
            pub fn $flag(&self) -> bool {
                self.raw_get()
            }
        });
        concat_idents::concat_idents!(raw_set = _set_, $flag {
            pub fn $clear(&mut self) {
                self.raw_set(false)
            }
        });
    };
}

/// Counterpart for command bits software may only raise.
macro_rules! software_settable {
    ($flag:ident, $set:ident) => {
        concat_idents::concat_idents!(raw_get = _, $flag {
            pub fn $flag(&self) -> bool {
                self.raw_get()
            }
        });
        concat_idents::concat_idents!(raw_set = _set_, $flag {
            pub fn $set(&mut self) {
                self.raw_set(true)
            }
        });
    };
}

pub(crate) use impl_register;
pub(crate) use impl_to_from_u32;
pub(crate) use software_clearable;
pub(crate) use software_settable;
