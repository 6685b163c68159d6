use core::fmt::Debug;

use bitfield::bitfield;
use crc::{Crc, CRC_16_CMS};
use embedded_hal::spi::{Operation, SpiDevice};

use crate::error::Error;
use crate::memory::{is_valid_ram_address, Register, RepeatedRegister};

/// Transfers no longer than this are merged into a single full-duplex
/// exchange through the scratch buffers, saving one CS toggle per access.
const SCRATCH_SIZE: usize = 96;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_CMS);

/// The byte-oriented command transport: every access is an opcode plus a
/// 12-bit address, followed by little-endian payload bytes.
pub struct Bus<SPI> {
    spi: SPI,
    tx_scratch: [u8; SCRATCH_SIZE],
    rx_scratch: [u8; SCRATCH_SIZE],
}

impl<SPI, SPIE> Bus<SPI>
where
    SPI: SpiDevice<u8, Error = SPIE>,
    SPIE: Debug,
{
    pub fn new(spi: SPI) -> Bus<SPI> {
        Self {
            spi,
            tx_scratch: [0; SCRATCH_SIZE],
            rx_scratch: [0; SCRATCH_SIZE],
        }
    }

    /// Releases ownership of the SPI resources
    pub fn free(self) -> SPI {
        self.spi
    }

    /// Performs a software reset of the chip. Only effective while the
    /// controller is in Configuration mode.
    pub fn reset(&mut self) -> Result<(), Error> {
        let instruction = Instruction::new(OpCode::RESET, 0);

        self.spi
            .write(&instruction.into_spi_data())
            .map_err(|_| Error::SPIWrite)?;

        Ok(())
    }

    /// Reads a contiguous byte range starting at `address`.
    pub fn read_bytes(&mut self, address: u16, data: &mut [u8]) -> Result<(), Error> {
        let cmd = Instruction::new(OpCode::READ, address).into_spi_data();
        let total = 2 + data.len();

        if total <= SCRATCH_SIZE {
            self.tx_scratch[..2].copy_from_slice(&cmd);
            self.tx_scratch[2..total].fill(0);

            self.spi
                .transaction(&mut [Operation::Transfer(
                    &mut self.rx_scratch[..total],
                    &self.tx_scratch[..total],
                )])
                .map_err(|_| Error::SPIRead)?;

            data.copy_from_slice(&self.rx_scratch[2..total]);
        } else {
            self.spi
                .transaction(&mut [Operation::Write(&cmd), Operation::Read(data)])
                .map_err(|_| Error::SPIRead)?;
        }

        Ok(())
    }

    /// Writes a contiguous byte range starting at `address`.
    pub fn write_bytes(&mut self, address: u16, data: &[u8]) -> Result<(), Error> {
        let cmd = Instruction::new(OpCode::WRITE, address).into_spi_data();
        let total = 2 + data.len();

        if total <= SCRATCH_SIZE {
            self.tx_scratch[..2].copy_from_slice(&cmd);
            self.tx_scratch[2..total].copy_from_slice(data);

            self.spi
                .write(&self.tx_scratch[..total])
                .map_err(|_| Error::SPIWrite)?;
        } else {
            self.spi
                .transaction(&mut [Operation::Write(&cmd), Operation::Write(data)])
                .map_err(|_| Error::SPIWrite)?;
        }

        Ok(())
    }

    /// Reads a byte range with the CRC-guarded opcode: the chip appends a
    /// CRC-16/CMS over the command echo and the payload, which guards
    /// against corruption on a marginal bus.
    pub fn read_bytes_crc(&mut self, address: u16, data: &mut [u8]) -> Result<(), Error> {
        if data.is_empty() || data.len() > u8::MAX as usize {
            return Err(Error::InvalidLength(data.len()));
        }

        let cmd = Instruction::new(OpCode::READ_CRC, address).into_spi_data();
        let header = [cmd[0], cmd[1], data.len() as u8];
        let mut crc_buf = [0u8; 2];

        self.spi
            .transaction(&mut [
                Operation::Write(&header),
                Operation::Read(data),
                Operation::Read(&mut crc_buf),
            ])
            .map_err(|_| Error::SPIRead)?;

        let mut digest = CRC16.digest();
        digest.update(&header);
        digest.update(data);

        if digest.finalize() != u16::from_be_bytes(crc_buf) {
            return Err(Error::CrcMismatch { address });
        }

        Ok(())
    }

    /// Writes a byte range with the CRC-guarded opcode so the chip can
    /// reject a transfer that was corrupted in flight.
    pub fn write_bytes_crc(&mut self, address: u16, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() || data.len() > u8::MAX as usize {
            return Err(Error::InvalidLength(data.len()));
        }

        let cmd = Instruction::new(OpCode::WRITE_CRC, address).into_spi_data();
        let header = [cmd[0], cmd[1], data.len() as u8];

        let mut digest = CRC16.digest();
        digest.update(&header);
        digest.update(data);
        let crc = digest.finalize().to_be_bytes();

        self.spi
            .transaction(&mut [
                Operation::Write(&header),
                Operation::Write(data),
                Operation::Write(&crc),
            ])
            .map_err(|_| Error::SPIWrite)?;

        Ok(())
    }

    /// Writes a byte range with the safe-write opcode. There is no length
    /// byte; the chip checks the trailing CRC-16 over the command and data
    /// and drops the whole transfer on a mismatch instead of applying it.
    pub fn write_bytes_safe(&mut self, address: u16, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Err(Error::InvalidLength(0));
        }

        let cmd = Instruction::new(OpCode::WRITE_SAFE, address).into_spi_data();

        let mut digest = CRC16.digest();
        digest.update(&cmd);
        digest.update(data);
        let crc = digest.finalize().to_be_bytes();

        self.spi
            .transaction(&mut [
                Operation::Write(&cmd),
                Operation::Write(data),
                Operation::Write(&crc),
            ])
            .map_err(|_| Error::SPIWrite)?;

        Ok(())
    }

    /* SFR access */

    pub fn read_sfr(&mut self, address: u16) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        self.read_bytes(address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_sfr(&mut self, address: u16, value: u32) -> Result<(), Error> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    /// Writes only the register bytes covered by `mask`. Partial access
    /// keeps flag registers safe: bytes outside the span are never
    /// transferred, so their write-1-to-clear bits stay untouched.
    pub fn write_sfr_masked(&mut self, address: u16, value: u32, mask: u32) -> Result<(), Error> {
        let (first, last) = mask_span(mask)?;
        let bytes = value.to_le_bytes();
        self.write_bytes(address + first as u16, &bytes[first..=last])
    }

    /// Reads only the register bytes covered by `mask`; uncovered bytes of
    /// the result are zero.
    pub fn read_sfr_masked(&mut self, address: u16, mask: u32) -> Result<u32, Error> {
        let (first, last) = mask_span(mask)?;
        let mut bytes = [0u8; 4];
        self.read_bytes(address + first as u16, &mut bytes[first..=last])?;
        Ok(u32::from_le_bytes(bytes))
    }

    /* Typed register access */

    pub fn read_register<R>(&mut self) -> Result<R, Error>
    where
        R: Register + From<u32>,
    {
        self.read_sfr(R::get_address() as u16).map(R::from)
    }

    pub fn write_register<R>(&mut self, value: R) -> Result<(), Error>
    where
        R: Register + Into<u32>,
    {
        self.write_sfr(R::get_address() as u16, value.into())
    }

    pub fn modify_register<R, F>(&mut self, transform: F) -> Result<(), Error>
    where
        R: Register + From<u32> + Into<u32>,
        F: FnOnce(R) -> R,
    {
        let register = self.read_register::<R>()?;
        self.write_register::<R>(transform(register))
    }

    pub fn read_repeated_register<R>(&mut self, index: R::Index) -> Result<R, Error>
    where
        R: RepeatedRegister + From<u32>,
    {
        self.read_sfr(R::get_address_for(index)).map(R::from)
    }

    pub fn write_repeated_register<R>(&mut self, index: R::Index, value: R) -> Result<(), Error>
    where
        R: RepeatedRegister + Into<u32>,
    {
        self.write_sfr(R::get_address_for(index), value.into())
    }

    /* RAM access */

    /// Reads a contiguous range from RAM into the provided buffer
    pub fn read_ram(&mut self, address: u16, data: &mut [u8]) -> Result<(), Error> {
        self.check_ram_access(address, data.len())?;
        self.read_bytes(address, data)
    }

    /// Writes to a contiguous range in RAM from the provided buffer
    pub fn write_ram(&mut self, address: u16, data: &[u8]) -> Result<(), Error> {
        self.check_ram_access(address, data.len())?;
        self.write_bytes(address, data)
    }

    fn check_ram_access(&self, address: u16, len: usize) -> Result<(), Error> {
        if !is_valid_ram_address(address, len) {
            return Err(Error::InvalidRamAddress(address));
        }

        // RAM transfers must cover whole words
        if len % 4 != 0 {
            return Err(Error::InvalidLength(len));
        }

        Ok(())
    }
}

/// Byte span `[first, last]` of a register touched by `mask`.
fn mask_span(mask: u32) -> Result<(usize, usize), Error> {
    if mask == 0 {
        return Err(Error::InvalidArgument);
    }

    let first = (mask.trailing_zeros() / 8) as usize;
    let last = ((31 - mask.leading_zeros()) / 8) as usize;

    Ok((first, last))
}

/* Low level SPI instruction encoding */

bitfield! {
    struct Instruction(u16);
    impl Debug;
    u16;
    pub op_code, set_op_code: 15, 12;
    pub address, set_address: 11, 0;
}

impl Instruction {
    fn new(op_code: u16, address: u16) -> Self {
        let mut instruction = Instruction(op_code);
        instruction.set_address(address);
        instruction
    }

    /// The command word goes out MSB first, unlike the payload.
    pub fn into_spi_data(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

struct OpCode;

impl OpCode {
    pub const RESET: u16 = 0b0000 << 12;
    pub const WRITE: u16 = 0b0010 << 12;
    pub const READ: u16 = 0b0011 << 12;
    pub const WRITE_CRC: u16 = 0b1010 << 12;
    pub const READ_CRC: u16 = 0b1011 << 12;
    pub const WRITE_SAFE: u16 = 0b1100 << 12;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_word_packs_opcode_and_address() {
        let cmd = Instruction::new(OpCode::READ, 0xE00).into_spi_data();
        assert_eq!(cmd, [0x3E, 0x00]);

        let cmd = Instruction::new(OpCode::WRITE, 0x048).into_spi_data();
        assert_eq!(cmd, [0x20, 0x48]);
    }

    #[test]
    fn mask_span_covers_only_touched_bytes() {
        assert_eq!(mask_span(0x0000_0001), Ok((0, 0)));
        assert_eq!(mask_span(0x0000_0300), Ok((1, 1)));
        assert_eq!(mask_span(0x00FF_0100), Ok((1, 2)));
        assert_eq!(mask_span(0x8000_0000), Ok((3, 3)));
        assert_eq!(mask_span(0xFFFF_FFFF), Ok((0, 3)));
        assert_eq!(mask_span(0), Err(Error::InvalidArgument));
    }

    #[test]
    fn trigger_mask_spans_a_single_byte() {
        // TXREQ | UINC live in byte 1, so arming a FIFO costs 3 bytes on
        // the wire
        assert_eq!(mask_span(0x300), Ok((1, 1)));
    }
}
