use crate::message::rx::RxMessage;

/// Fault confinement state of the controller, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    ErrorActive,
    ErrorWarning,
    ErrorPassive,
    BusOff,
    /// Taken offline, either by teardown or a bus-off without restart
    Stopped,
}

/// A frame that finished transmission, reported from its event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxCompletion {
    /// FIFO the frame was submitted on
    pub fifo: u8,
    /// Payload length of the completed frame
    pub bytes: usize,
    pub timestamp: u32,
}

/// Error conditions observed during one interrupt cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorEvent {
    pub bit0_error: bool,
    pub bit1_error: bool,
    pub stuff_error: bool,
    pub form_error: bool,
    pub ack_error: bool,
    /// Protocol violation reported through the invalid message interrupt
    pub protocol_violation: bool,
    /// A receive FIFO overflowed and dropped frames
    pub rx_overflow: bool,
    /// RAM was read slower than the bus drained it during transmission
    pub tx_mab_underflow: bool,
    /// RAM was written slower than the bus filled it during reception
    pub rx_mab_overflow: bool,
    pub ecc_single_bit: bool,
    pub ecc_double_bit: bool,
}

impl ErrorEvent {
    pub fn is_empty(&self) -> bool {
        *self == ErrorEvent::default()
    }
}

/// Where the interrupt worker delivers its results.
///
/// `received` and `transmit_done` are called in hardware timestamp order
/// across both sources within each interrupt cycle. The flow control pair
/// brackets the time the transmit block is fully occupied.
pub trait EventSink {
    fn received(&mut self, frame: RxMessage);

    fn transmit_done(&mut self, completion: TxCompletion);

    fn error(&mut self, _event: ErrorEvent) {}

    fn state_changed(&mut self, _state: BusState) {}

    /// All transmit FIFOs are in flight; stop submitting frames.
    fn pause_tx(&mut self) {}

    /// The transmit block drained; submission may resume.
    fn resume_tx(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_states_order_by_severity() {
        assert!(BusState::ErrorActive < BusState::ErrorWarning);
        assert!(BusState::ErrorWarning < BusState::ErrorPassive);
        assert!(BusState::ErrorPassive < BusState::BusOff);
        assert!(BusState::BusOff < BusState::Stopped);
    }

    #[test]
    fn a_fresh_error_event_reports_nothing() {
        let mut event = ErrorEvent::default();
        assert!(event.is_empty());
        event.ack_error = true;
        assert!(!event.is_empty());
    }
}
