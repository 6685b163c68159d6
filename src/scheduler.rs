use crate::error::Error;
use crate::fifos::FifoPlan;
use crate::memory::controller::fifo::FifoIndex;

/// Whether new frames may be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum QueueState {
    Running,
    /// Every transmit FIFO is armed; waiting for the lowest one to drain
    Paused,
    /// The lowest FIFO completed; the masks reset on the next drain pass
    RestartPending,
    Stopped,
}

/// Allocates transmit FIFOs and tracks them through their life cycle.
///
/// FIFO numbers double as hardware transmit priority, so frames are handed
/// out from the highest FIFO downwards and the masks are only reset once
/// the whole block has drained. That keeps completions arriving in
/// submission order without ever reordering frames on the wire.
///
/// Three masks follow each frame: `submitted` when a FIFO is handed out,
/// `pending` once the hardware is armed, `processed` once its transmit
/// event record came back. `processed ⊆ pending ⊆ submitted` holds
/// throughout a cycle.
#[derive(Debug)]
pub struct TxScheduler {
    tx_start: u8,
    tx_highest: u8,
    submitted: u32,
    pending: u32,
    processed: u32,
    state: QueueState,
}

impl TxScheduler {
    pub fn new(plan: &FifoPlan) -> Self {
        Self {
            tx_start: plan.tx_fifo_start(),
            tx_highest: plan.highest_tx_fifo(),
            submitted: 0,
            pending: 0,
            processed: 0,
            state: QueueState::Running,
        }
    }

    /// Picks the next free FIFO, one below the lowest occupied one.
    /// Returns `Busy` while the block is full and pauses the queue when
    /// the last free FIFO is handed out.
    pub fn allocate(&mut self) -> Result<FifoIndex, Error> {
        match self.state {
            QueueState::Running => {}
            QueueState::Stopped => return Err(Error::Stopped),
            _ => return Err(Error::Busy),
        }

        let occupied = self.submitted | self.pending;
        let fifo = if occupied == 0 {
            self.tx_highest
        } else {
            match occupied.trailing_zeros() as u8 {
                f if f > self.tx_start => f - 1,
                _ => return Err(Error::Busy),
            }
        };

        if fifo == self.tx_start {
            self.state = QueueState::Paused;
        }

        self.submitted |= 1 << fifo;

        // tx_start >= 1 so the index is always valid
        FifoIndex::new(fifo).ok_or(Error::Busy)
    }

    /// Marks a FIFO as armed in hardware.
    pub fn confirm(&mut self, fifo: FifoIndex) {
        self.pending |= fifo.bit();
    }

    /// Returns a FIFO whose arming failed so it can be handed out again.
    pub fn abort(&mut self, fifo: FifoIndex) {
        self.submitted &= !fifo.bit();
        if self.state == QueueState::Paused && fifo.get() == self.tx_start {
            self.state = QueueState::Running;
        }
    }

    /// Marks a FIFO's transmit event record as collected. Completing the
    /// lowest FIFO means the whole block has drained.
    pub fn complete(&mut self, fifo: FifoIndex) {
        self.processed |= fifo.bit();
        if fifo.get() == self.tx_start {
            self.state = QueueState::RestartPending;
        }
    }

    /// FIFOs armed in hardware whose completion has not been collected.
    pub fn outstanding(&self) -> u32 {
        self.pending & !self.processed
    }

    /// Resets the masks after a full drain. Returns true when the queue
    /// just reopened, so the caller can wake its producer.
    pub fn restart_if_drained(&mut self) -> bool {
        if self.state != QueueState::RestartPending {
            return false;
        }

        self.submitted = 0;
        self.pending = 0;
        self.processed = 0;
        self.state = QueueState::Running;
        true
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, QueueState::Paused | QueueState::RestartPending)
    }

    /// Refuses all further allocations, for teardown and unrecoverable
    /// bus-off.
    pub fn stop(&mut self) {
        self.state = QueueState::Stopped;
    }

    pub fn is_stopped(&self) -> bool {
        self.state == QueueState::Stopped
    }
}
