use core::fmt::Debug;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use log::{debug, info, warn};

use crate::collector::CollectedBatch;
use crate::error::{ConfigError, Error};
use crate::fifos::{FifoAddresses, FifoPlan};
use crate::memory::chip::{EccControlRegister, IoControlRegister, OscillatorControlRegister};
use crate::memory::controller::configuration::{
    CanControlRegister, InterTransmissionDelay, NominalBitTimeConfigurationRegister,
    OperationMode, TimeBaseCounterRegister, TimeStampControlRegister,
    TransmitterDelayCompensationMode, TransmitterDelayCompensationRegister, WakeupFilterTime,
    CON_DEFAULT, CON_DEFAULT_MASK,
};
use crate::memory::controller::configuration::DataBitTimeConfigurationRegister;
use crate::memory::controller::diagnostic::TransmitReceiveErrorCountRegister;
use crate::memory::controller::fifo::{
    FifoControlRegister, RetransmissionAttempts, TxEventFifoControlRegister, UserAddressRegister,
};
use crate::memory::controller::filter::{
    filter_control_byte, FilterIndex, FilterMaskRegister, FilterObjectRegister, FILTER_COUNT,
};
use crate::memory::controller::interrupt::InterruptRegister;
use crate::memory::{RepeatedRegister, SFRAddress, RAM_BASE_ADDRESS};
use crate::message::tx::TxMessage;
use crate::message::TEF_OBJECT_SIZE;
use crate::scheduler::TxScheduler;
use crate::settings::{GpioMode, Pll, Settings, SysClkDivider};
use crate::sink::{BusState, EventSink};
use crate::spi::Bus;

/// Time for the chip to come out of reset before it accepts commands.
const RESET_SETTLE_MS: u32 = 3;

const MODE_POLL_ATTEMPTS: u32 = 40;
const MODE_POLL_INTERVAL_US: u32 = 500;

const OSC_POLL_ATTEMPTS: u32 = 10;
const OSC_POLL_INTERVAL_MS: u32 = 1;

/// Frame and error counters accumulated by the interrupt worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Statistics {
    pub tx_frames: u32,
    pub tx_bytes: u32,
    pub rx_frames: u32,
    pub rx_bytes: u32,
    pub rx_overflows: u32,
    pub bus_errors: u32,
}

/// A live session with the controller.
///
/// Construction only captures the configuration; [`MCP2517FD::start`]
/// probes the chip, lays out its message RAM and brings it onto the bus.
/// From then on [`MCP2517FD::transmit`] submits frames and
/// [`MCP2517FD::on_interrupt`] drains completions, received frames and
/// error conditions into an [`EventSink`].
pub struct MCP2517FD<SPI> {
    pub(crate) bus: Bus<SPI>,
    pub(crate) settings: Settings,
    pub(crate) plan: FifoPlan,
    pub(crate) addresses: FifoAddresses,
    pub(crate) scheduler: TxScheduler,
    /// Software tail of the TEF ring; the chip only exposes the head
    pub(crate) tef_address: u16,
    pub(crate) bus_state: BusState,
    pub(crate) batch: CollectedBatch,
    pub(crate) stats: Statistics,
    pub(crate) force_quit: bool,
    /// Mode the controller last reported or was asked for
    pub(crate) active_mode: OperationMode,
    osc_value: u32,
}

impl<SPI, SPIE> MCP2517FD<SPI>
where
    SPI: SpiDevice<u8, Error = SPIE>,
    SPIE: Debug,
{
    pub fn new(spi: SPI, settings: Settings) -> Result<Self, ConfigError> {
        settings.validate()?;

        let plan = FifoPlan::new(
            settings.payload_size,
            settings.tx_fifo_count,
            settings.rx_fifo_depth,
        )?;
        let scheduler = TxScheduler::new(&plan);

        Ok(Self {
            bus: Bus::new(spi),
            settings,
            plan,
            addresses: FifoAddresses::new(),
            scheduler,
            tef_address: 0,
            bus_state: BusState::Stopped,
            batch: CollectedBatch::new(),
            stats: Statistics::default(),
            force_quit: false,
            active_mode: OperationMode::Configuration,
            osc_value: 0,
        })
    }

    /// Releases ownership of the SPI resources
    pub fn free(self) -> SPI {
        self.bus.free()
    }

    pub fn bus_state(&self) -> BusState {
        self.bus_state
    }

    /// The operation mode the controller is in, tracking both requested
    /// switches and ones the chip performed on its own.
    pub fn active_mode(&self) -> OperationMode {
        self.active_mode
    }

    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    pub fn fifo_plan(&self) -> &FifoPlan {
        &self.plan
    }

    /// True while every transmit FIFO is in flight.
    pub fn tx_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    /// Probes and configures the chip, then brings it onto the bus in the
    /// configured mode with interrupts enabled.
    pub fn start(&mut self, delay: &mut impl DelayNs) -> Result<(), ConfigError> {
        self.probe(delay)?;
        self.verify_ram_echo()?;
        self.setup_oscillator(delay)?;
        self.setup_control_registers()?;
        self.setup_fifos()?;
        self.discover_addresses()?;

        self.set_operation_mode(self.settings.bus_mode.operation_mode(), delay)?;
        self.bus
            .write_register(InterruptRegister::worker_enables())?;

        self.bus_state = BusState::ErrorActive;
        self.force_quit = false;
        info!("controller up in {:?} mode", self.settings.bus_mode);
        Ok(())
    }

    /// Takes the controller off the bus and refuses further frames.
    pub fn stop(&mut self) -> Result<(), Error> {
        self.disable_interrupts()?;
        self.scheduler.stop();
        self.request_mode(OperationMode::Configuration)?;
        self.bus_state = BusState::Stopped;
        Ok(())
    }

    /// Submits a frame on the next free transmit FIFO. Returns `Busy`
    /// while the transmit block is full; the sink's `resume_tx` fires once
    /// it drains. Pausing the producer is signalled through `pause_tx`
    /// before this call returns.
    pub fn transmit<S: EventSink>(
        &mut self,
        mut message: TxMessage,
        sink: &mut S,
    ) -> Result<(), Error> {
        let fifo = match self.scheduler.allocate() {
            Ok(fifo) => fifo,
            Err(Error::Busy) => {
                debug!("transmit while queue full");
                return Err(Error::Busy);
            }
            Err(e) => return Err(e),
        };

        // The event record echoes SEQ, which ties the completion back to
        // the FIFO it went out on
        message.set_sequence(fifo.get() as u32);

        let (len, buffer) = message.as_bytes();
        let address = self.addresses.fifo_start[fifo.get() as usize];

        let armed = self
            .bus
            .write_ram(address, &buffer[..len])
            .and_then(|_| {
                self.bus.write_sfr_masked(
                    FifoControlRegister::get_address_for(fifo),
                    FifoControlRegister::TRIGGER_MASK,
                    FifoControlRegister::TRIGGER_MASK,
                )
            });

        match armed {
            Ok(()) => {
                self.scheduler.confirm(fifo);
                if self.scheduler.is_paused() {
                    sink.pause_tx();
                }
                Ok(())
            }
            Err(e) => {
                self.scheduler.abort(fifo);
                Err(e)
            }
        }
    }

    /// Current transmit and receive error counters.
    pub fn error_counters(&mut self) -> Result<(u8, u8), Error> {
        let trec: TransmitReceiveErrorCountRegister = self.bus.read_register()?;
        Ok((trec.tec(), trec.rec()))
    }

    /// Puts the chip into its lowest power state. The oscillator
    /// configuration is retained so [`MCP2517FD::wake`] can restore it.
    pub fn sleep(&mut self) -> Result<(), Error> {
        self.disable_interrupts()?;
        self.request_mode(OperationMode::Sleep)?;
        self.bus_state = BusState::Stopped;
        Ok(())
    }

    /// Wakes a sleeping chip back into Configuration mode.
    pub fn wake(&mut self, delay: &mut impl DelayNs) -> Result<(), ConfigError> {
        if self.active_mode != OperationMode::Sleep {
            return Ok(());
        }

        // Writing OSC clears OSCDIS and restarts the oscillator
        self.bus
            .write_sfr(SFRAddress::OSC as u16, self.osc_value)?;
        self.wait_oscillator_ready(delay)?;

        self.set_operation_mode(OperationMode::Configuration, delay)
    }

    /* Bring-up steps */

    /// Resets the chip and checks that something answering like this
    /// controller sits on the bus. A part left in a strange state by a
    /// previous session gets one recovery attempt.
    fn probe(&mut self, delay: &mut impl DelayNs) -> Result<(), ConfigError> {
        delay.delay_ms(RESET_SETTLE_MS);
        self.bus.reset()?;
        delay.delay_ms(RESET_SETTLE_MS);

        let osc: OscillatorControlRegister = self.bus.read_register()?;
        if osc.oscdis() && osc.oscrdy() {
            // Disabled and ready at once is not a state this part reports
            warn!("oscillator claims disabled and ready, no controller found");
            return Err(ConfigError::DeviceNotFound);
        } else if osc.oscdis() {
            // Left asleep; restart the oscillator and reset again
            self.bus.write_sfr(SFRAddress::OSC as u16, 0)?;
            self.wait_oscillator_ready(delay)?;
            self.bus.reset()?;
            delay.delay_ms(RESET_SETTLE_MS);
        } else if !osc.oscrdy() {
            if osc.pllen() && !osc.pllrdy() {
                warn!("oscillator up but PLL not locked");
            }
            return Err(ConfigError::DeviceNotFound);
        }

        let con = self.bus.read_sfr(SFRAddress::C1CON as u16)?;
        if con & CON_DEFAULT_MASK != CON_DEFAULT {
            debug!("C1CON {:#010x} not at reset default, forcing it", con);
            self.bus.write_sfr(SFRAddress::C1CON as u16, CON_DEFAULT)?;
            delay.delay_ms(RESET_SETTLE_MS);
            self.bus.reset()?;
            delay.delay_ms(RESET_SETTLE_MS);

            let con = self.bus.read_sfr(SFRAddress::C1CON as u16)?;
            if con & CON_DEFAULT_MASK != CON_DEFAULT {
                warn!("C1CON stuck at {:#010x}, no controller found", con);
                return Err(ConfigError::DeviceNotFound);
            }
        }

        self.disable_interrupts()?;
        Ok(())
    }

    fn wait_oscillator_ready(&mut self, delay: &mut impl DelayNs) -> Result<(), ConfigError> {
        for _ in 0..OSC_POLL_ATTEMPTS {
            let osc: OscillatorControlRegister = self.bus.read_register()?;
            if osc.oscrdy() && !osc.oscdis() {
                return Ok(());
            }
            delay.delay_ms(OSC_POLL_INTERVAL_MS);
        }
        Err(ConfigError::ClockTimeout)
    }

    /// Walks a single set bit through a RAM word and reads it back with the
    /// CRC-guarded command, which catches wiring and SPI clocking problems
    /// before configuration.
    fn verify_ram_echo(&mut self) -> Result<(), ConfigError> {
        for i in 0..32 {
            let pattern: u32 = 1 << i;
            self.bus
                .write_ram(RAM_BASE_ADDRESS, &pattern.to_le_bytes())?;

            let mut readback = [0u8; 4];
            self.bus.read_bytes_crc(RAM_BASE_ADDRESS, &mut readback)?;
            if u32::from_le_bytes(readback) != pattern {
                return Err(ConfigError::SPIFailedRAMEcho);
            }
        }
        Ok(())
    }

    fn setup_oscillator(&mut self, delay: &mut impl DelayNs) -> Result<(), ConfigError> {
        let osc_config = self.settings.oscillator;

        let mut osc = OscillatorControlRegister(0);
        osc.set_pllen(osc_config.pll == Pll::On);
        osc.set_sclkdiv(osc_config.divider == SysClkDivider::DivByTwo);
        osc.set_clkodiv(osc_config.clock_output.divider_bits());

        self.osc_value = u32::from(osc);
        self.bus
            .write_sfr(SFRAddress::OSC as u16, self.osc_value)?;

        for _ in 0..OSC_POLL_ATTEMPTS {
            let osc: OscillatorControlRegister = self.bus.read_register()?;
            let pll_ok = osc_config.pll == Pll::Off || osc.pllrdy();
            if osc.oscrdy() && osc.sclkrdy() && pll_ok {
                return Ok(());
            }
            delay.delay_ms(OSC_POLL_INTERVAL_MS);
        }

        Err(ConfigError::ClockTimeout)
    }

    fn setup_control_registers(&mut self) -> Result<(), Error> {
        let mut ecc = EccControlRegister(0);
        ecc.set_eccen(true);
        self.bus.write_register(ecc)?;

        let io = self.settings.io_configuration;
        let mut iocon = IoControlRegister(0);
        match io.gpio0 {
            GpioMode::Interrupt => iocon.set_pm0(false),
            GpioMode::Input => {
                iocon.set_pm0(true);
                iocon.set_tris0(true);
            }
            GpioMode::OutputHigh => {
                iocon.set_pm0(true);
                iocon.set_lat0(true);
            }
            GpioMode::OutputLow => iocon.set_pm0(true),
            GpioMode::StandbyControl => {
                iocon.set_pm0(true);
                iocon.set_xstbyen(true);
            }
        }
        match io.gpio1 {
            GpioMode::Interrupt => iocon.set_pm1(false),
            GpioMode::Input => {
                iocon.set_pm1(true);
                iocon.set_tris1(true);
            }
            GpioMode::OutputHigh => {
                iocon.set_pm1(true);
                iocon.set_lat1(true);
            }
            // Standby on pin 1 is rejected by validation
            GpioMode::OutputLow | GpioMode::StandbyControl => iocon.set_pm1(true),
        }
        iocon.set_txcanod(io.tx_can_open_drain);
        iocon.set_intod(io.interrupt_pin_open_drain);
        iocon.set_sof(self.settings.oscillator.clock_output.is_start_of_frame());
        self.bus.write_register(iocon)?;

        let timing = &self.settings.bit_time_configuration;

        let mut nbt = NominalBitTimeConfigurationRegister(0);
        nbt.set_brp(timing.nominal.baud_rate_prescaler);
        nbt.set_tseg1(timing.nominal.time_segment_1);
        nbt.set_tseg2(timing.nominal.time_segment_2.value());
        nbt.set_sjw(timing.nominal.synchronization_jump_width.value());
        self.bus.write_register(nbt)?;

        let mut dbt = DataBitTimeConfigurationRegister(0);
        dbt.set_brp(timing.data.baud_rate_prescaler);
        dbt.set_tseg1(timing.data.time_segment_1.value());
        dbt.set_tseg2(timing.data.time_segment_2.value());
        dbt.set_sjw(timing.data.synchronization_jump_width.value());
        self.bus.write_register(dbt)?;

        let mut tdc = TransmitterDelayCompensationRegister(0);
        tdc.set_tdcmod(TransmitterDelayCompensationMode::Automatic);
        tdc.set_tdco(timing.data.transmitter_delay_compensation_offset.value());
        tdc.set_edgflten(true);
        self.bus.write_register(tdc)?;

        // Free-running 1 MHz timestamp counter
        self.bus.write_register(TimeBaseCounterRegister(0))?;
        let mut tscon = TimeStampControlRegister(0);
        tscon.set_tbcen(true);
        tscon.set_tbcpre(self.settings.timestamp_prescaler() as u16);
        self.bus.write_register(tscon)?;

        let mut con = CanControlRegister(0);
        con.set_isocrcen(self.settings.iso_crc);
        con.set_pxedis(true);
        con.set_wakfil(true);
        con.set_wft(WakeupFilterTime::T11Filter);
        con.set_stef(true);
        con.set_txqen(false);
        con.set_rtxat(self.settings.one_shot);
        if let Ok(delay) = InterTransmissionDelay::try_from(self.settings.tx_bandwidth_sharing) {
            con.set_txbws(delay);
        }
        con.set_opmode(OperationMode::Configuration);
        self.bus.write_register(con)?;

        Ok(())
    }

    fn setup_fifos(&mut self) -> Result<(), Error> {
        // Quiesce all acceptance filters before touching the FIFOs
        for i in 0..FILTER_COUNT {
            let filter = match FilterIndex::new(i) {
                Some(f) => f,
                None => break,
            };
            self.bus
                .write_repeated_register(filter, FilterObjectRegister(0))?;
            self.bus
                .write_repeated_register(filter, FilterMaskRegister(0))?;
            self.bus.write_sfr_masked(
                filter.control_address(),
                0,
                0xFF << filter.control_shift(),
            )?;
        }

        let mut tefcon = TxEventFifoControlRegister(0);
        tefcon.set_freset();
        tefcon.set_tefneie(true);
        tefcon.set_teftsen(true);
        tefcon.set_fifo_size(self.plan.tx_fifo_count());
        self.bus.write_register(tefcon)?;

        let attempts = if self.settings.one_shot {
            RetransmissionAttempts::Disabled
        } else {
            RetransmissionAttempts::UnlimitedRetries
        };

        for fifo in self.plan.tx_fifos() {
            let mut con = FifoControlRegister(0);
            con.set_txen(true);
            con.set_freset();
            con.set_payload_size(self.plan.payload_size());
            con.set_fifo_size(1);
            con.set_retransmission_attempts(attempts);
            // Priority tracks the FIFO number so completions keep
            // submission order
            con.set_txpri(fifo.get());
            self.bus.write_repeated_register(fifo, con)?;
        }

        let last_rx = self.plan.rx_fifo_start() + self.plan.rx_fifo_count() - 1;
        for (i, fifo) in self.plan.rx_fifos().enumerate() {
            let mut con = FifoControlRegister(0);
            con.set_freset();
            con.set_payload_size(self.plan.payload_size());
            con.set_fifo_size(self.plan.rx_fifo_depth());
            con.set_rxtsen(true);
            con.set_tfnrfnie(true);
            con.set_tfhrfhie(true);
            con.set_tferffie(true);
            // Overflow is only meaningful once the last FIFO fills
            con.set_rxovie(fifo.get() == last_rx);
            self.bus.write_repeated_register(fifo, con)?;

            // One accept-all filter routed at each receive FIFO
            if let Some(filter) = FilterIndex::new(i as u8) {
                let byte = filter_control_byte(true, fifo);
                self.bus.write_sfr_masked(
                    filter.control_address(),
                    (byte as u32) << filter.control_shift(),
                    0xFF << filter.control_shift(),
                )?;
            }
        }

        Ok(())
    }

    /// The chip assigns RAM addresses when the FIFOs leave reset, which
    /// takes a non-configuration mode. A brief detour through internal
    /// loopback latches them without disturbing the bus.
    fn discover_addresses(&mut self) -> Result<(), Error> {
        self.request_mode(OperationMode::InternalLoopback)?;

        let tef = self.bus.read_sfr(SFRAddress::C1TEFUA as u16)? as u16 + RAM_BASE_ADDRESS;
        self.addresses.tef_start = tef;
        self.addresses.tef_end =
            tef + self.plan.tx_fifo_count() as u16 * TEF_OBJECT_SIZE as u16;
        self.tef_address = tef;

        for fifo in self.plan.rx_fifos().chain(self.plan.tx_fifos()) {
            let ua: UserAddressRegister = self.bus.read_repeated_register(fifo)?;
            self.addresses.fifo_start[fifo.get() as usize] = ua.calculate_ram_address();
        }

        self.request_mode(OperationMode::Configuration)
    }

    /* Mode and interrupt plumbing */

    /// Requests a mode without waiting for the switch to complete.
    pub(crate) fn request_mode(&mut self, mode: OperationMode) -> Result<(), Error> {
        self.bus.modify_register::<CanControlRegister, _>(|mut con| {
            con.set_opmode(mode);
            con
        })?;
        self.active_mode = mode;
        Ok(())
    }

    /// Requests a mode and polls until the controller reports it active.
    fn set_operation_mode(
        &mut self,
        mode: OperationMode,
        delay: &mut impl DelayNs,
    ) -> Result<(), ConfigError> {
        self.request_mode(mode)?;

        for _ in 0..MODE_POLL_ATTEMPTS {
            let con: CanControlRegister = self.bus.read_register()?;
            if con.opmode() == mode {
                return Ok(());
            }
            delay.delay_us(MODE_POLL_INTERVAL_US);
        }

        Err(ConfigError::ChangeOpModeTimeout)
    }

    pub(crate) fn disable_interrupts(&mut self) -> Result<(), Error> {
        self.bus.write_sfr(SFRAddress::C1INT as u16, 0)
    }
}
