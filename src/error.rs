#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Failed to read from the chip over SPI
    SPIRead,
    /// Failed to write to the chip over SPI
    SPIWrite,
    /// A CRC-guarded read came back with a bad checksum
    CrcMismatch { address: u16 },
    /// A masked register access was given an empty mask
    InvalidArgument,
    /// Attempted to access an invalid RAM address
    InvalidRamAddress(u16),
    /// Tried to transfer a RAM range that was not a multiple of 4 bytes
    InvalidLength(usize),
    /// Every transmit FIFO is in flight; retry after the next completion
    Busy,
    /// The session has been stopped (teardown or unrecoverable bus-off)
    Stopped,
    /// The requested FIFO layout does not fit in message RAM
    ResourceExhausted,
    /// Completion accounting disagrees with the hardware TXREQ state
    TefCountMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// No device answering like an MCP2517FD was found on the bus
    DeviceNotFound,
    /// The oscillator did not report ready within the timeout
    ClockTimeout,
    /// A requested operation mode was not reached within the timeout
    ChangeOpModeTimeout,
    /// The RAM echo test failed, SPI communication is unreliable
    SPIFailedRAMEcho,
    /// A settings value is out of range
    InvalidSettings,
    /// The underlying transport failed
    Bus(Error),
}

impl From<Error> for ConfigError {
    fn from(error: Error) -> Self {
        ConfigError::Bus(error)
    }
}
