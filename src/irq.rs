use core::fmt::Debug;

use embedded_hal::spi::SpiDevice;
use log::{debug, info, warn};

use crate::device::MCP2517FD;
use crate::error::Error;
use crate::memory::chip::EccStatusRegister;
use crate::memory::controller::configuration::{OperationMode, CON_OPMOD_MASK};
use crate::memory::controller::diagnostic::BusDiagnosticRegister1;
use crate::memory::controller::fifo::FifoStatusRegister;
use crate::memory::controller::interrupt::InterruptRegister;
use crate::memory::controller::status::{StatusSnapshot, STATUS_SNAPSHOT_SIZE};
use crate::memory::{RepeatedRegister, SFRAddress};
use crate::sink::{BusState, ErrorEvent, EventSink};

impl<SPI, SPIE> MCP2517FD<SPI>
where
    SPI: SpiDevice<u8, Error = SPIE>,
    SPIE: Debug,
{
    /// Services the interrupt line. Keeps taking status snapshots and
    /// handling whatever they report until no enabled flag is left, so one
    /// call covers events that arrive while earlier ones are processed.
    ///
    /// A transport failure aborts the pass without clearing any flags; the
    /// line stays asserted and the next call retries from the snapshot.
    pub fn on_interrupt<S: EventSink>(&mut self, sink: &mut S) -> Result<(), Error> {
        while !self.force_quit {
            let mut buffer = [0u8; STATUS_SNAPSHOT_SIZE];
            self.bus
                .read_bytes(StatusSnapshot::ADDRESS as u16, &mut buffer)?;
            let status = StatusSnapshot::from_bytes(&buffer);

            if !status.intf.any_enabled_flag() {
                break;
            }

            self.handle_status(&status, sink)?;
        }

        Ok(())
    }

    fn handle_status<S: EventSink>(
        &mut self,
        status: &StatusSnapshot,
        sink: &mut S,
    ) -> Result<(), Error> {
        let mut event = ErrorEvent::default();
        let mut int_clear: u32 = 0;
        let mut bdiag1_clear: u32 = 0;

        // Frames before faults: drain both FIFO directions, deliver the
        // merged run in timestamp order, then reopen the queue if this
        // cycle finished a full transmit block
        if status.intf.rxif() {
            self.handle_rx(status, sink)?;
        }
        if status.intf.tefif() {
            self.handle_tef(status, sink)?;
        }
        if !self.batch.is_empty() {
            self.deliver_batch(sink);
        }
        if self.scheduler.restart_if_drained() {
            sink.resume_tx();
        }

        if status.intf.rxovif() {
            for fifo in self.plan.rx_fifos() {
                if status.rxovif & fifo.bit() != 0 {
                    self.bus.write_sfr_masked(
                        FifoStatusRegister::get_address_for(fifo),
                        0,
                        FifoStatusRegister::RXOVIF_MASK,
                    )?;
                    self.stats.rx_overflows += 1;
                }
            }
            event.rx_overflow = true;
        }

        if status.intf.modif() {
            let raw = self
                .bus
                .read_sfr_masked(SFRAddress::C1CON as u16, CON_OPMOD_MASK)?;
            let mode = OperationMode::try_from(((raw & CON_OPMOD_MASK) >> 21) as u8)
                .unwrap_or(OperationMode::Unknown);
            debug!("controller switched itself to {:?}", mode);
            self.active_mode = mode;
            int_clear |= InterruptRegister::MODIF;
        }

        if status.intf.eccif() {
            let ecc: EccStatusRegister = self.bus.read_register()?;
            event.ecc_single_bit = ecc.secif();
            event.ecc_double_bit = ecc.dedif();
            warn!(
                "ECC {} at RAM offset {:#05x}",
                if ecc.dedif() { "double fault" } else { "correction" },
                ecc.erraddr()
            );
            self.bus.write_sfr(SFRAddress::ECCSTAT as u16, 0)?;
        }

        if status.intf.serrif() {
            // A mode change or ECC fault alongside a system error points
            // at the transmit path, otherwise the receive path stalled
            if status.intf.modif() || status.intf.eccif() {
                event.tx_mab_underflow = true;
            } else {
                event.rx_mab_overflow = true;
            }
            int_clear |= InterruptRegister::SERRIF;
        }

        if status.intf.ivmif() {
            event.protocol_violation = true;
            int_clear |= InterruptRegister::IVMIF;
        }

        if status.intf.cerrif() {
            let bdiag1 = &status.bdiag1;
            if bdiag1.nbit0err() || bdiag1.dbit0err() {
                event.bit0_error = true;
                bdiag1_clear |= BusDiagnosticRegister1::BIT0ERR;
            }
            if bdiag1.nbit1err() || bdiag1.dbit1err() {
                event.bit1_error = true;
                bdiag1_clear |= BusDiagnosticRegister1::BIT1ERR;
            }
            if bdiag1.nstuferr() || bdiag1.dstuferr() {
                event.stuff_error = true;
                bdiag1_clear |= BusDiagnosticRegister1::STUFERR;
            }
            if bdiag1.nformerr() || bdiag1.dformerr() {
                event.form_error = true;
                bdiag1_clear |= BusDiagnosticRegister1::FORMERR;
            }
            if bdiag1.nackerr() {
                event.ack_error = true;
                bdiag1_clear |= BusDiagnosticRegister1::ACKERR;
            }
            int_clear |= InterruptRegister::CERRIF;
        }

        // The error counters move without CERRIF firing, so the TREC
        // thresholds are evaluated on every pass
        self.track_bus_state(status, sink)?;

        if !event.is_empty() {
            self.stats.bus_errors += 1;
            sink.error(event);
        }

        // Flags clear on writing zero; ones leave the untouched flags in
        // the same bytes pending
        if int_clear != 0 {
            self.bus
                .write_sfr_masked(SFRAddress::C1INT as u16, 0xFFFF & !int_clear, int_clear)?;
        }
        if bdiag1_clear != 0 {
            self.bus
                .write_sfr_masked(SFRAddress::C1BDIAG1 as u16, 0, bdiag1_clear)?;
        }

        Ok(())
    }

    fn track_bus_state<S: EventSink>(
        &mut self,
        status: &StatusSnapshot,
        sink: &mut S,
    ) -> Result<(), Error> {
        let trec = &status.trec;
        let new_state = if trec.txbo() {
            BusState::BusOff
        } else if trec.txbp() || trec.rxbp() {
            BusState::ErrorPassive
        } else if trec.txwarn() || trec.rxwarn() {
            BusState::ErrorWarning
        } else {
            BusState::ErrorActive
        };

        if new_state == self.bus_state {
            return Ok(());
        }

        info!(
            "bus state {:?} -> {:?} (tec {}, rec {})",
            self.bus_state,
            new_state,
            trec.tec(),
            trec.rec()
        );
        self.bus_state = new_state;
        sink.state_changed(new_state);

        // The controller recovers from bus-off on its own; only a session
        // configured not to restart gets taken down
        if new_state == BusState::BusOff && !self.settings.restart_on_bus_off {
            warn!("bus-off, shutting the controller down");
            self.scheduler.stop();
            self.force_quit = true;
            self.disable_interrupts()?;
            self.request_mode(OperationMode::Sleep)?;
            self.bus_state = BusState::Stopped;
            sink.state_changed(BusState::Stopped);
        }

        Ok(())
    }
}
