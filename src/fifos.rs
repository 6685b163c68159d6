use crate::error::Error;
use crate::memory::controller::fifo::{FifoIndex, PayloadSize, FIFO_COUNT};
use crate::memory::RAM_SIZE;
use crate::message::{RX_OBJECT_HEADER_SIZE, TEF_OBJECT_SIZE, TX_OBJECT_HEADER_SIZE};

/// How the 2 KiB of message RAM is carved up: the TEF first, then one
/// receive block, then a run of single-element transmit FIFOs at the top
/// of the index space so transmit priority can follow the FIFO number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FifoPlan {
    payload_size: PayloadSize,
    tx_fifo_count: u8,
    rx_fifo_count: u8,
    rx_fifo_depth: u8,
}

impl FifoPlan {
    /// Sizes the layout. Every transmit FIFO holds one element and carries
    /// a TEF slot; whatever RAM remains is split into receive FIFOs of the
    /// requested depth. The depth shrinks if fewer elements fit, and the
    /// receive FIFO count is capped so all FIFOs fit in the index space.
    pub fn new(
        payload_size: PayloadSize,
        tx_fifo_count: u8,
        rx_fifo_depth: u8,
    ) -> Result<FifoPlan, Error> {
        if tx_fifo_count == 0 || tx_fifo_count >= FIFO_COUNT || rx_fifo_depth == 0 {
            return Err(Error::InvalidArgument);
        }

        let payload = payload_size.num_bytes();
        let tx_mem =
            tx_fifo_count as usize * (TEF_OBJECT_SIZE + TX_OBJECT_HEADER_SIZE + payload);
        let rx_element = RX_OBJECT_HEADER_SIZE + payload;

        if tx_mem + rx_element > RAM_SIZE {
            return Err(Error::ResourceExhausted);
        }

        let rx_elements = (RAM_SIZE - tx_mem) / rx_element;
        let rx_fifo_depth = (rx_fifo_depth as usize).min(rx_elements) as u8;
        let rx_fifo_count = (rx_elements / rx_fifo_depth as usize)
            .min((FIFO_COUNT - tx_fifo_count) as usize) as u8;

        Ok(FifoPlan {
            payload_size,
            tx_fifo_count,
            rx_fifo_count,
            rx_fifo_depth,
        })
    }

    pub fn payload_size(&self) -> PayloadSize {
        self.payload_size
    }

    pub fn tx_fifo_count(&self) -> u8 {
        self.tx_fifo_count
    }

    pub fn rx_fifo_count(&self) -> u8 {
        self.rx_fifo_count
    }

    pub fn rx_fifo_depth(&self) -> u8 {
        self.rx_fifo_depth
    }

    /// Receive FIFOs start right after the TEF.
    pub fn rx_fifo_start(&self) -> u8 {
        1
    }

    /// Transmit FIFOs sit above the receive block.
    pub fn tx_fifo_start(&self) -> u8 {
        1 + self.rx_fifo_count
    }

    pub fn highest_tx_fifo(&self) -> u8 {
        self.tx_fifo_start() + self.tx_fifo_count - 1
    }

    pub fn is_tx_fifo(&self, fifo: u8) -> bool {
        fifo >= self.tx_fifo_start() && fifo <= self.highest_tx_fifo()
    }

    /// Bit mask with one bit set per transmit FIFO, positioned by number.
    pub fn tx_fifo_mask(&self) -> u32 {
        let mut mask = 0;
        for fifo in self.tx_fifos() {
            mask |= fifo.bit();
        }
        mask
    }

    pub fn tx_fifos(&self) -> impl Iterator<Item = FifoIndex> {
        let start = self.tx_fifo_start();
        let end = self.highest_tx_fifo();
        (start..=end).filter_map(FifoIndex::new)
    }

    pub fn rx_fifos(&self) -> impl Iterator<Item = FifoIndex> {
        let start = self.rx_fifo_start();
        let end = start + self.rx_fifo_count - 1;
        (start..=end).filter_map(FifoIndex::new)
    }
}

/// RAM addresses the chip assigned to each FIFO, captured from the user
/// address registers after configuration. The TEF tail is tracked in
/// software because the chip only exposes its head.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FifoAddresses {
    pub tef_start: u16,
    pub tef_end: u16,
    /// Start address per FIFO, indexed by FIFO number
    pub fifo_start: [u16; FIFO_COUNT as usize + 1],
}

impl FifoAddresses {
    pub fn new() -> Self {
        Self {
            tef_start: 0,
            tef_end: 0,
            fifo_start: [0; FIFO_COUNT as usize + 1],
        }
    }
}

impl Default for FifoAddresses {
    fn default() -> Self {
        Self::new()
    }
}
