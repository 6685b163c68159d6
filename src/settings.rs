use arbitrary_int::{u4, u5, u7};

use crate::error::ConfigError;
use crate::memory::controller::configuration::OperationMode;
use crate::memory::controller::fifo::PayloadSize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pll {
    #[default]
    Off,
    /// Multiplies the oscillator input by 10. Only valid with inputs up to
    /// 4 MHz, so SYSCLK stays within 40 MHz.
    On,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SysClkDivider {
    #[default]
    DivByOne,
    DivByTwo,
}

/// What the CLKO pin carries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockOutput {
    DivideBy1,
    DivideBy2,
    DivideBy4,
    #[default]
    DivideBy10,
    /// Repurposes CLKO as a start-of-frame strobe
    StartOfFrame,
}

impl ClockOutput {
    /// Raw CLKODIV field value; SOF mode keeps the divider at /10 and is
    /// selected separately through IOCON.
    pub(crate) fn divider_bits(self) -> u8 {
        match self {
            ClockOutput::DivideBy1 => 0,
            ClockOutput::DivideBy2 => 1,
            ClockOutput::DivideBy4 => 2,
            ClockOutput::DivideBy10 | ClockOutput::StartOfFrame => 3,
        }
    }

    pub(crate) fn is_start_of_frame(self) -> bool {
        matches!(self, ClockOutput::StartOfFrame)
    }
}

#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OscillatorConfiguration {
    pub pll: Pll,
    pub divider: SysClkDivider,
    pub clock_output: ClockOutput,
}

impl OscillatorConfiguration {
    pub fn new(pll: Pll, divider: SysClkDivider) -> Self {
        Self {
            pll,
            divider,
            clock_output: ClockOutput::default(),
        }
    }

    pub fn with_clock_output(mut self, clock_output: ClockOutput) -> Self {
        self.clock_output = clock_output;
        self
    }
}

/// Function of one of the two GPIO pins.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpioMode {
    /// Dedicated interrupt output (TXIF on pin 0, RXIF on pin 1)
    Interrupt,
    #[default]
    Input,
    OutputHigh,
    OutputLow,
    /// Drives the transceiver standby pin. Only available on pin 0.
    StandbyControl,
}

#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IoConfiguration {
    pub gpio0: GpioMode,
    pub gpio1: GpioMode,
    pub tx_can_open_drain: bool,
    pub interrupt_pin_open_drain: bool,
}

impl IoConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gpio0(mut self, mode: GpioMode) -> Self {
        self.gpio0 = mode;
        self
    }

    pub fn with_gpio1(mut self, mode: GpioMode) -> Self {
        self.gpio1 = mode;
        self
    }

    pub fn with_tx_can_open_drain(mut self, tx_can_open_drain: bool) -> Self {
        self.tx_can_open_drain = tx_can_open_drain;
        self
    }

    pub fn with_interrupt_pin_open_drain(mut self, interrupt_pin_open_drain: bool) -> Self {
        self.interrupt_pin_open_drain = interrupt_pin_open_drain;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NominalBitTimeConfiguration {
    pub baud_rate_prescaler: u8,
    pub time_segment_1: u8,
    pub time_segment_2: u7,
    pub synchronization_jump_width: u7,
}

impl NominalBitTimeConfiguration {
    /// Max bus length of 550m
    pub const RATE_100_KBIT: Self = Self {
        baud_rate_prescaler: 1,
        time_segment_1: 158,
        time_segment_2: u7::new(39),
        synchronization_jump_width: u7::new(39),
    };

    /// Max bus length of 440m
    pub const RATE_125_KBIT: Self = Self {
        baud_rate_prescaler: 0,
        time_segment_1: 254,
        time_segment_2: u7::new(63),
        synchronization_jump_width: u7::new(63),
    };

    /// Max bus length of 200m
    pub const RATE_250_KBIT: Self = Self {
        baud_rate_prescaler: 0,
        time_segment_1: 126,
        time_segment_2: u7::new(31),
        synchronization_jump_width: u7::new(31),
    };

    /// Max bus length of 80m
    pub const RATE_500_KBIT: Self = Self {
        baud_rate_prescaler: 0,
        time_segment_1: 62,
        time_segment_2: u7::new(15),
        synchronization_jump_width: u7::new(15),
    };

    /// Max bus length of 20m
    pub const RATE_1_MBIT: Self = Self {
        baud_rate_prescaler: 0,
        time_segment_1: 30,
        time_segment_2: u7::new(7),
        synchronization_jump_width: u7::new(7),
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataBitTimeConfiguration {
    pub baud_rate_prescaler: u8,
    pub time_segment_1: u5,
    pub time_segment_2: u4,
    pub synchronization_jump_width: u4,

    pub transmitter_delay_compensation_offset: u7,
}

impl DataBitTimeConfiguration {
    pub const RATE_500_KBIT: Self = Self {
        baud_rate_prescaler: 1,
        time_segment_1: u5::new(30),
        time_segment_2: u4::new(7),
        synchronization_jump_width: u4::new(7),
        transmitter_delay_compensation_offset: u7::new(62),
    };

    pub const RATE_1_MBIT: Self = Self {
        baud_rate_prescaler: 0,
        time_segment_1: u5::new(30),
        time_segment_2: u4::new(7),
        synchronization_jump_width: u4::new(7),
        transmitter_delay_compensation_offset: u7::new(31),
    };

    pub const RATE_2_MBIT: Self = Self {
        baud_rate_prescaler: 0,
        time_segment_1: u5::new(14),
        time_segment_2: u4::new(3),
        synchronization_jump_width: u4::new(3),
        transmitter_delay_compensation_offset: u7::new(15),
    };

    pub const RATE_5_MBIT: Self = Self {
        baud_rate_prescaler: 0,
        time_segment_1: u5::new(4),
        time_segment_2: u4::new(1),
        synchronization_jump_width: u4::new(1),
        transmitter_delay_compensation_offset: u7::new(5),
    };
}

/// For best performance, use nominal and data bit rates with the same baud rate
/// prescaler. Identical TQ in both phases prevent quantization errors during
/// bit rate switching.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTimeConfiguration {
    pub nominal: NominalBitTimeConfiguration,
    pub data: DataBitTimeConfiguration,
}

impl BitTimeConfiguration {
    pub fn new(nominal: NominalBitTimeConfiguration, data: DataBitTimeConfiguration) -> Self {
        Self { nominal, data }
    }
}

/// Which framing the controller runs once started.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusMode {
    #[default]
    CanFd,
    Can20,
    /// Frames loop back internally without touching the transceiver
    InternalLoopback,
    ExternalLoopback,
    ListenOnly,
}

impl BusMode {
    pub(crate) fn operation_mode(self) -> OperationMode {
        match self {
            BusMode::CanFd => OperationMode::NormalCanFD,
            BusMode::Can20 => OperationMode::NormalCan2,
            BusMode::InternalLoopback => OperationMode::InternalLoopback,
            BusMode::ExternalLoopback => OperationMode::ExternalLoopback,
            BusMode::ListenOnly => OperationMode::ListenOnly,
        }
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    /// Crystal or external clock frequency in Hz, 1 to 40 MHz
    pub clock_frequency_hz: u32,
    pub oscillator: OscillatorConfiguration,
    pub io_configuration: IoConfiguration,
    #[cfg_attr(feature = "defmt", defmt(Debug2Format))]
    pub bit_time_configuration: BitTimeConfiguration,
    pub bus_mode: BusMode,
    /// Payload capacity of every FIFO element
    pub payload_size: PayloadSize,
    /// Number of single-element transmit FIFOs to allocate (1 to 30)
    pub tx_fifo_count: u8,
    /// Element depth of each receive FIFO (1 to 32)
    pub rx_fifo_depth: u8,
    /// Disable retransmission so each frame gets exactly one attempt
    pub one_shot: bool,
    /// ISO 11898-1:2015 CRC format for FD frames
    pub iso_crc: bool,
    /// Bring the controller back up automatically after bus-off
    pub restart_on_bus_off: bool,
    /// Fetch full FD payloads in one RAM read instead of header-first
    pub bulk_fd_reads: bool,
    /// TX bandwidth sharing exponent, delays between transmissions (0 to 12)
    pub tx_bandwidth_sharing: u8,
}

impl Settings {
    pub fn new(
        clock_frequency_hz: u32,
        oscillator: OscillatorConfiguration,
        bit_time_configuration: BitTimeConfiguration,
    ) -> Self {
        Self {
            clock_frequency_hz,
            oscillator,
            io_configuration: IoConfiguration::default(),
            bit_time_configuration,
            bus_mode: BusMode::default(),
            payload_size: PayloadSize::Bytes64,
            tx_fifo_count: 7,
            rx_fifo_depth: 32,
            one_shot: false,
            iso_crc: true,
            restart_on_bus_off: true,
            bulk_fd_reads: false,
            tx_bandwidth_sharing: 0,
        }
    }

    /// SYSCLK in Hz after the PLL and divider are applied.
    pub fn sys_clock_hz(&self) -> u32 {
        let multiplied = match self.oscillator.pll {
            Pll::Off => self.clock_frequency_hz,
            Pll::On => self.clock_frequency_hz * 10,
        };

        match self.oscillator.divider {
            SysClkDivider::DivByOne => multiplied,
            SysClkDivider::DivByTwo => multiplied / 2,
        }
    }

    /// TBC prescaler that ticks the timestamp counter at 1 MHz.
    pub(crate) fn timestamp_prescaler(&self) -> u32 {
        self.sys_clock_hz() / 1_000_000
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1_000_000..=40_000_000).contains(&self.clock_frequency_hz) {
            return Err(ConfigError::InvalidSettings);
        }

        // The PLL output must not push SYSCLK past 40 MHz
        if self.oscillator.pll == Pll::On && self.clock_frequency_hz > 4_000_000 {
            return Err(ConfigError::InvalidSettings);
        }

        if self.tx_fifo_count == 0 || self.tx_fifo_count > 30 {
            return Err(ConfigError::InvalidSettings);
        }

        if self.rx_fifo_depth == 0 || self.rx_fifo_depth > 32 {
            return Err(ConfigError::InvalidSettings);
        }

        if self.tx_bandwidth_sharing > 12 {
            return Err(ConfigError::InvalidSettings);
        }

        // Only GPIO0 is wired to the transceiver standby control
        if self.io_configuration.gpio1 == GpioMode::StandbyControl {
            return Err(ConfigError::InvalidSettings);
        }

        Ok(())
    }
}
