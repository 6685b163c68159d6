//! End-to-end tests against a simulated chip: a 4 KiB register/RAM image
//! behind the SPI instruction set, with just enough behaviour modelled to
//! exercise bring-up, transmission, reception and fault handling.

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use crc::{Crc, CRC_16_CMS};
use embedded_can::{Id, StandardId};
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType, Operation, SpiDevice};

use mcp2517fd::memory::controller::fifo::PayloadSize;
use mcp2517fd::spi::Bus;
use mcp2517fd::settings::{
    BitTimeConfiguration, DataBitTimeConfiguration, NominalBitTimeConfiguration,
    OscillatorConfiguration, Settings,
};
use mcp2517fd::{
    BusState, ConfigError, Error, ErrorEvent, EventSink, OperationMode, RxMessage, TxCompletion,
    TxMessage, MCP2517FD,
};

const RAM: usize = 0x400;
const CON_DEFAULT: u32 = 0x0498_0760;

const PAYLOAD_SIZES: [usize; 8] = [8, 12, 16, 20, 24, 32, 48, 64];

struct SimChip {
    mem: [u8; 0x1000],
    prev_mode: u8,
    timestamp: u32,
    /// Report OSCDIS and OSCRDY together after every reset
    osc_stuck: bool,
    /// Come out of the next reset with the oscillator disabled
    osc_asleep: bool,

    tef_size: usize,
    tef_write: usize,
    tef_count: usize,

    fifo_rel: [usize; 32],
    fifo_element: [usize; 32],
    fifo_size: [usize; 32],
    fifo_is_tx: [bool; 32],
    rx_head: [usize; 32],
    rx_count: [usize; 32],
}

impl SimChip {
    fn new() -> Self {
        let mut chip = Self {
            mem: [0; 0x1000],
            prev_mode: 4,
            timestamp: 0,
            osc_stuck: false,
            osc_asleep: false,
            tef_size: 0,
            tef_write: 0,
            tef_count: 0,
            fifo_rel: [0; 32],
            fifo_element: [0; 32],
            fifo_size: [0; 32],
            fifo_is_tx: [false; 32],
            rx_head: [0; 32],
            rx_count: [0; 32],
        };
        chip.reset();
        chip
    }

    fn reset(&mut self) {
        self.mem = [0; 0x1000];
        self.mem[0..4].copy_from_slice(&CON_DEFAULT.to_le_bytes());
        // OSCRDY and SCLKRDY
        self.mem[0xE01] = 0x14;
        if self.osc_stuck {
            self.mem[0xE00] = 0x04;
        }
        if self.osc_asleep {
            self.mem[0xE00] = 0x04;
            self.mem[0xE01] = 0;
            self.osc_asleep = false;
        }
        self.prev_mode = 4;
        self.tef_count = 0;
        self.tef_write = 0;
        self.rx_head = [0; 32];
        self.rx_count = [0; 32];
    }

    fn read_mem(&self, address: u16, data: &mut [u8]) {
        let a = address as usize;
        data.copy_from_slice(&self.mem[a..a + data.len()]);
    }

    fn write_mem(&mut self, address: u16, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            let a = address as usize + i;
            match a {
                // Interrupt flags clear on writing zero
                0x1C | 0x1D => self.mem[a] &= b,
                // FIFOSTA: only the overflow flag is software clearable
                _ if (0x60..=0x1C8).contains(&a) && (a - 0x60) % 12 == 0 => {
                    if b & 0x08 == 0 {
                        self.mem[a] &= !0x08;
                    }
                }
                _ => self.mem[a] = b,
            }
        }

        let range = address as usize..address as usize + data.len();

        if range.contains(&0xE00) {
            if self.mem[0xE00] & 0x04 == 0 {
                self.mem[0xE01] |= 0x15;
            } else {
                self.mem[0xE01] &= !0x15;
            }
        }

        if range.contains(&0x03) {
            let reqop = self.mem[0x03] & 0x07;
            self.mem[0x02] = (self.mem[0x02] & 0x1F) | (reqop << 5);
            if self.prev_mode == 4 && reqop != 4 {
                self.compute_layout();
            }
            self.prev_mode = reqop;
        }

        // TEFCON UINC
        if range.contains(&0x41) && data[0x41 - address as usize] & 0x01 != 0 {
            self.tef_uinc();
        }

        // FIFOCON byte 1: TXREQ|UINC triggers a send, UINC alone releases
        // a receive element
        for f in 1..=31usize {
            let a = 0x51 + 12 * f;
            if range.contains(&a) {
                let b = data[a - address as usize];
                if b & 0x02 != 0 && self.fifo_is_tx[f] {
                    self.send(f);
                } else if b & 0x01 != 0 && !self.fifo_is_tx[f] {
                    self.pop_rx(f);
                }
            }
        }
    }

    /// The chip assigns FIFO RAM when leaving Configuration mode: the TEF
    /// region first, then the FIFOs in numeric order.
    fn compute_layout(&mut self) {
        self.tef_size = (self.mem[0x43] & 0x1F) as usize + 1;
        let mut offset = self.tef_size * 12;
        self.mem[0x48..0x4C].copy_from_slice(&0u32.to_le_bytes());

        for f in 1..=31usize {
            let base = 0x50 + 12 * f;
            let con = u32::from_le_bytes(self.mem[base..base + 4].try_into().unwrap());
            if con == 0 {
                continue;
            }

            let payload = PAYLOAD_SIZES[(con >> 29) as usize & 0x7];
            let size = ((con >> 24) & 0x1F) as usize + 1;
            let is_tx = con & 0x80 != 0;

            self.fifo_rel[f] = offset;
            self.fifo_element[f] = if is_tx { 8 } else { 12 } + payload;
            self.fifo_size[f] = size;
            self.fifo_is_tx[f] = is_tx;
            self.mem[base + 8..base + 12].copy_from_slice(&(offset as u32).to_le_bytes());

            offset += size * self.fifo_element[f];
        }
        assert!(offset <= 2048, "FIFO layout exceeds message RAM");
    }

    /// Instant transmission: copy the header into the next TEF slot,
    /// stamp it and raise TEFIF.
    fn send(&mut self, f: usize) {
        let src = RAM + self.fifo_rel[f];
        let header: [u8; 8] = self.mem[src..src + 8].try_into().unwrap();

        let slot = RAM + self.tef_write * 12;
        self.mem[slot..slot + 8].copy_from_slice(&header);
        self.mem[slot + 8..slot + 12].copy_from_slice(&self.timestamp.to_le_bytes());

        self.timestamp = self.timestamp.wrapping_add(1);
        self.tef_write = (self.tef_write + 1) % self.tef_size;
        self.tef_count += 1;
        self.mem[0x1C] |= 0x10;
    }

    fn tef_uinc(&mut self) {
        if self.tef_count > 0 {
            self.tef_count -= 1;
        }
        if self.tef_count == 0 {
            self.mem[0x1C] &= !0x10;
        }
    }

    fn inject_rx(&mut self, f: usize, sid: u16, data: &[u8], timestamp: u32) {
        assert!(!self.fifo_is_tx[f] && self.rx_count[f] < self.fifo_size[f]);

        let slot = (self.rx_head[f] + self.rx_count[f]) % self.fifo_size[f];
        let base = RAM + self.fifo_rel[f] + slot * self.fifo_element[f];

        self.mem[base..base + 4].copy_from_slice(&(sid as u32).to_le_bytes());
        self.mem[base + 4..base + 8].copy_from_slice(&(data.len() as u32).to_le_bytes());
        self.mem[base + 8..base + 12].copy_from_slice(&timestamp.to_le_bytes());
        self.mem[base + 12..base + 12 + data.len()].copy_from_slice(data);

        self.rx_count[f] += 1;
        self.update_rx_flags(f);
    }

    fn pop_rx(&mut self, f: usize) {
        if self.rx_count[f] > 0 {
            self.rx_count[f] -= 1;
            self.rx_head[f] = (self.rx_head[f] + 1) % self.fifo_size[f];
        }
        self.update_rx_flags(f);
    }

    fn update_rx_flags(&mut self, f: usize) {
        let sta = 0x54 + 12 * f;
        if self.rx_count[f] > 0 {
            self.mem[sta] |= 0x01;
            self.mem[0x20 + f / 8] |= 1 << (f % 8);
        } else {
            self.mem[sta] &= !0x01;
            self.mem[0x20 + f / 8] &= !(1 << (f % 8));
        }

        let ua = 0x58 + 12 * f;
        let tail = self.fifo_rel[f] + self.rx_head[f] * self.fifo_element[f];
        self.mem[ua..ua + 4].copy_from_slice(&(tail as u32).to_le_bytes());

        if self.mem[0x20..0x24].iter().any(|&b| b != 0) {
            self.mem[0x1C] |= 0x02;
        } else {
            self.mem[0x1C] &= !0x02;
        }
    }

    fn raise_warning(&mut self) {
        // TXWARN in TREC plus the CAN error flag
        self.mem[0x36] |= 0x04;
        self.mem[0x1D] |= 0x20;
    }

    fn raise_bus_off(&mut self) {
        // TXBO in TREC plus the CAN error flag
        self.mem[0x36] |= 0x20;
        self.mem[0x1D] |= 0x20;
    }

    fn apply(&mut self, operations: &mut [Operation<'_, u8>]) {
        let mut pending_read: Option<u16> = None;
        // Command echo plus data for a CRC-guarded read in flight
        let mut crc_frame: Option<Vec<u8>> = None;

        for (i, op) in operations.iter_mut().enumerate() {
            match op {
                Operation::Write(buf) if i == 0 => {
                    let opcode = buf[0] >> 4;
                    let address = u16::from_be_bytes([buf[0] & 0x0F, buf[1]]);
                    match opcode {
                        0x0 => self.reset(),
                        0x2 => {
                            let data = buf[2..].to_vec();
                            self.write_mem(address, &data);
                        }
                        0x3 => pending_read = Some(address),
                        0xB => {
                            pending_read = Some(address);
                            crc_frame = Some(buf.to_vec());
                        }
                        _ => panic!("unsupported opcode {opcode}"),
                    }
                }
                Operation::Read(buf) => {
                    if let Some(address) = pending_read.take() {
                        self.read_mem(address, buf);
                        if let Some(frame) = crc_frame.as_mut() {
                            frame.extend_from_slice(buf);
                        }
                    } else if let Some(frame) = crc_frame.take() {
                        let crc = Crc::<u16>::new(&CRC_16_CMS).checksum(&frame);
                        buf.copy_from_slice(&crc.to_be_bytes());
                    } else {
                        panic!("read without command");
                    }
                }
                Operation::Transfer(rx, tx) => {
                    let opcode = tx[0] >> 4;
                    let address = u16::from_be_bytes([tx[0] & 0x0F, tx[1]]);
                    match opcode {
                        0x3 => {
                            rx[0] = 0;
                            rx[1] = 0;
                            let len = rx.len();
                            let mut data = vec![0; len - 2];
                            self.read_mem(address, &mut data);
                            rx[2..].copy_from_slice(&data);
                        }
                        0x2 => {
                            let data = tx[2..].to_vec();
                            self.write_mem(address, &data);
                        }
                        _ => panic!("unsupported duplex opcode {opcode}"),
                    }
                }
                _ => panic!("unexpected SPI operation"),
            }
        }
    }
}

#[derive(Clone)]
struct SimHandle(Rc<RefCell<SimChip>>);

impl SimHandle {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(SimChip::new())))
    }
}

impl ErrorType for SimHandle {
    type Error = Infallible;
}

impl SpiDevice<u8> for SimHandle {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        self.0.borrow_mut().apply(operations);
        Ok(())
    }
}

struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Default)]
struct RecordingSink {
    frames: Vec<(u32, Vec<u8>, Id)>,
    completions: Vec<TxCompletion>,
    states: Vec<BusState>,
    errors: Vec<ErrorEvent>,
    pauses: u32,
    resumes: u32,
}

impl EventSink for RecordingSink {
    fn received(&mut self, frame: RxMessage) {
        self.frames
            .push((frame.timestamp(), frame.data().to_vec(), frame.header().identifier()));
    }

    fn transmit_done(&mut self, completion: TxCompletion) {
        self.completions.push(completion);
    }

    fn error(&mut self, event: ErrorEvent) {
        self.errors.push(event);
    }

    fn state_changed(&mut self, state: BusState) {
        self.states.push(state);
    }

    fn pause_tx(&mut self) {
        self.pauses += 1;
    }

    fn resume_tx(&mut self) {
        self.resumes += 1;
    }
}

fn settings() -> Settings {
    let mut settings = Settings::new(
        40_000_000,
        OscillatorConfiguration::default(),
        BitTimeConfiguration::new(
            NominalBitTimeConfiguration::RATE_500_KBIT,
            DataBitTimeConfiguration::RATE_2_MBIT,
        ),
    );
    settings.payload_size = PayloadSize::Bytes8;
    settings.tx_fifo_count = 7;
    settings.rx_fifo_depth = 1;
    settings
}

fn started(settings: Settings) -> (MCP2517FD<SimHandle>, SimHandle) {
    let handle = SimHandle::new();
    let mut device = MCP2517FD::new(handle.clone(), settings).unwrap();
    device.start(&mut NoDelay).unwrap();
    (device, handle)
}

fn frame(sid: u16, data: &[u8]) -> TxMessage {
    let id = Id::Standard(StandardId::new(sid).unwrap());
    TxMessage::new_2_0(id, data).unwrap()
}

#[test]
fn bring_up_reaches_normal_mode() {
    let (device, handle) = started(settings());

    let chip = handle.0.borrow();
    // OPMOD == NormalCanFD
    assert_eq!(chip.mem[0x02] >> 5, 0);
    // TEF sized for the transmit block, all 31 FIFOs configured
    assert_eq!(chip.tef_size, 7);
    assert!(chip.fifo_is_tx[25] && chip.fifo_is_tx[31]);
    assert!(!chip.fifo_is_tx[1] && !chip.fifo_is_tx[24]);
    // Worker interrupt enables present
    assert_ne!(chip.mem[0x1E], 0);

    assert_eq!(device.bus_state(), BusState::ErrorActive);
    assert_eq!(device.fifo_plan().tx_fifo_start(), 25);
}

#[test]
fn completions_come_back_in_submission_order() {
    let (mut device, _handle) = started(settings());
    let mut sink = RecordingSink::default();

    for i in 0..3 {
        device.transmit(frame(0x100 + i, &[i as u8]), &mut sink).unwrap();
    }

    device.on_interrupt(&mut sink).unwrap();

    let fifos: Vec<u8> = sink.completions.iter().map(|c| c.fifo).collect();
    assert_eq!(fifos, vec![31, 30, 29]);
    assert!(sink.completions.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert_eq!(device.statistics().tx_frames, 3);
}

#[test]
fn full_transmit_block_pauses_then_resumes() {
    let (mut device, _handle) = started(settings());
    let mut sink = RecordingSink::default();

    for i in 0..7 {
        device.transmit(frame(0x200 + i, &[]), &mut sink).unwrap();
    }
    assert_eq!(sink.pauses, 1);
    assert!(device.tx_paused());
    assert_eq!(
        device.transmit(frame(0x300, &[]), &mut sink),
        Err(Error::Busy)
    );

    device.on_interrupt(&mut sink).unwrap();
    assert_eq!(sink.completions.len(), 7);
    assert_eq!(sink.resumes, 1);
    assert!(!device.tx_paused());

    // A fresh cycle starts from the highest FIFO again
    device.transmit(frame(0x400, &[]), &mut sink).unwrap();
    device.on_interrupt(&mut sink).unwrap();
    assert_eq!(sink.completions.last().unwrap().fifo, 31);
}

#[test]
fn received_frames_carry_payload_and_timestamp() {
    let (mut device, handle) = started(settings());
    let mut sink = RecordingSink::default();

    handle.0.borrow_mut().inject_rx(1, 0x123, &[0xAA, 0xBB], 40);
    handle.0.borrow_mut().inject_rx(2, 0x456, &[0xCC], 41);

    device.on_interrupt(&mut sink).unwrap();

    assert_eq!(sink.frames.len(), 2);
    assert_eq!(sink.frames[0].0, 40);
    assert_eq!(sink.frames[0].1, vec![0xAA, 0xBB]);
    assert_eq!(
        sink.frames[0].2,
        Id::Standard(StandardId::new(0x123).unwrap())
    );
    assert_eq!(sink.frames[1].1, vec![0xCC]);
    assert_eq!(device.statistics().rx_frames, 2);
    assert_eq!(device.statistics().rx_bytes, 3);
}

#[test]
fn completions_and_receptions_merge_by_timestamp() {
    let (mut device, handle) = started(settings());
    let mut sink = RecordingSink::default();

    handle.0.borrow_mut().timestamp = 100;
    device.transmit(frame(0x10, &[1]), &mut sink).unwrap();
    handle.0.borrow_mut().inject_rx(1, 0x20, &[2], 50);
    handle.0.borrow_mut().inject_rx(2, 0x30, &[3], 150);

    device.on_interrupt(&mut sink).unwrap();

    // rx@50, tx@100, rx@150
    assert_eq!(sink.frames[0].0, 50);
    assert_eq!(sink.completions[0].timestamp, 100);
    assert_eq!(sink.frames[1].0, 150);
}

#[test]
fn masked_writes_leave_uncovered_bytes_untouched() {
    let handle = SimHandle::new();
    let mut bus = Bus::new(handle);

    // A filter object register, plain read/write memory on the chip
    bus.write_sfr(0x1F0, 0x1122_3344).unwrap();
    bus.write_sfr_masked(0x1F0, 0x0000_AA00, 0x0000_FF00).unwrap();

    assert_eq!(bus.read_sfr(0x1F0).unwrap(), 0x1122_AA44);
    assert_eq!(bus.read_sfr_masked(0x1F0, 0x0000_FF00).unwrap(), 0x0000_AA00);
    assert!(bus.write_sfr_masked(0x1F0, 0, 0).is_err());
}

#[test]
fn bus_off_without_restart_stops_the_controller() {
    let mut config = settings();
    config.restart_on_bus_off = false;
    let (mut device, handle) = started(config);
    let mut sink = RecordingSink::default();

    handle.0.borrow_mut().raise_warning();
    device.on_interrupt(&mut sink).unwrap();
    assert_eq!(device.bus_state(), BusState::ErrorWarning);

    handle.0.borrow_mut().raise_bus_off();
    device.on_interrupt(&mut sink).unwrap();

    assert_eq!(
        sink.states,
        vec![BusState::ErrorWarning, BusState::BusOff, BusState::Stopped]
    );
    assert_eq!(device.bus_state(), BusState::Stopped);
    assert_eq!(
        device.transmit(frame(0x10, &[]), &mut sink),
        Err(Error::Stopped)
    );
}

#[test]
fn deep_backlogs_deliver_as_one_sorted_sequence() {
    let mut config = settings();
    config.rx_fifo_depth = 32;
    let (mut device, handle) = started(config);
    let mut sink = RecordingSink::default();

    // Fill the first FIFO completely, then park one older frame behind it
    {
        let mut chip = handle.0.borrow_mut();
        for i in 0..32u32 {
            chip.inject_rx(1, 0x100, &[i as u8], 100 + i);
        }
        chip.inject_rx(2, 0x200, &[0xEE], 10);
    }
    device.on_interrupt(&mut sink).unwrap();

    assert_eq!(sink.frames.len(), 33);
    assert_eq!(sink.frames[0].0, 10);
    let stamps: Vec<u32> = sink.frames.iter().map(|f| f.0).collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn a_self_initiated_mode_change_is_adopted() {
    let (mut device, handle) = started(settings());
    let mut sink = RecordingSink::default();
    assert_eq!(device.active_mode(), OperationMode::NormalCanFD);

    // The chip drops to Restricted on its own and raises MODIF
    {
        let mut chip = handle.0.borrow_mut();
        chip.mem[0x02] = (chip.mem[0x02] & 0x1F) | (7 << 5);
        chip.mem[0x1C] |= 0x08;
    }
    device.on_interrupt(&mut sink).unwrap();

    assert_eq!(device.active_mode(), OperationMode::Restricted);
    assert_eq!(handle.0.borrow().mem[0x1C] & 0x08, 0);
}

#[test]
fn spurious_event_flag_reports_a_mismatch() {
    let (mut device, handle) = started(settings());
    let mut sink = RecordingSink::default();

    // TEFIF with nothing in flight
    handle.0.borrow_mut().mem[0x1C] |= 0x10;
    assert_eq!(
        device.on_interrupt(&mut sink),
        Err(Error::TefCountMismatch)
    );

    // The pass aborts without clearing the flag
    assert_ne!(handle.0.borrow().mem[0x1C] & 0x10, 0);
    assert!(sink.completions.is_empty());
}

#[test]
fn warning_level_is_noticed_without_an_error_flag() {
    let (mut device, handle) = started(settings());
    let mut sink = RecordingSink::default();

    // TXWARN in TREC but CERRIF already handled; a frame raises the line
    {
        let mut chip = handle.0.borrow_mut();
        chip.mem[0x36] |= 0x04;
        chip.inject_rx(1, 0x123, &[1], 5);
    }
    device.on_interrupt(&mut sink).unwrap();

    assert_eq!(sink.frames.len(), 1);
    assert_eq!(device.bus_state(), BusState::ErrorWarning);
    assert_eq!(sink.states, vec![BusState::ErrorWarning]);
}

#[test]
fn a_part_left_asleep_is_recovered_at_startup() {
    let handle = SimHandle::new();
    handle.0.borrow_mut().osc_asleep = true;

    let mut device = MCP2517FD::new(handle.clone(), settings()).unwrap();
    device.start(&mut NoDelay).unwrap();
    assert_eq!(device.bus_state(), BusState::ErrorActive);
}

#[test]
fn contradictory_oscillator_state_fails_startup() {
    let handle = SimHandle::new();
    handle.0.borrow_mut().osc_stuck = true;

    let mut device = MCP2517FD::new(handle.clone(), settings()).unwrap();
    assert_eq!(device.start(&mut NoDelay), Err(ConfigError::DeviceNotFound));
}
