use core::fmt::Debug;

use embedded_hal::spi::SpiDevice;
use log::warn;

use crate::device::MCP2517FD;
use crate::error::Error;
use crate::memory::controller::fifo::{
    FifoControlRegister, FifoIndex, FifoStatusRegister, UserAddressRegister,
};
use crate::memory::controller::status::StatusSnapshot;
use crate::memory::{RepeatedRegister, SFRAddress, RAM_SIZE};
use crate::message::rx::{CollectedObject, RxMessage, TxEventObject};
use crate::message::{
    len_for_dlc, MAX_FD_BUFFER_SIZE, MIN_PAYLOAD_READ, RX_OBJECT_HEADER_SIZE, TEF_OBJECT_SIZE,
};
use crate::sink::{EventSink, TxCompletion};

/// One batch must hold the worst case a single snapshot can report:
/// every element message RAM fits at the smallest receive element size,
/// plus the event record of the one transmit FIFO that layout leaves
/// room for.
const BATCH_CAPACITY: usize = RAM_SIZE / (RX_OBJECT_HEADER_SIZE + MIN_PAYLOAD_READ) + 1;

/// Upper bound on one bulk RAM transfer; longer runs are split.
const BULK_READ_SIZE: usize = 512;

/// Objects drained from the chip during one interrupt cycle. Completions
/// and received frames are buffered here so they can be delivered in
/// hardware timestamp order rather than collection order.
pub(crate) struct CollectedBatch {
    items: [Option<CollectedObject>; BATCH_CAPACITY],
    len: usize,
}

impl CollectedBatch {
    pub(crate) fn new() -> Self {
        Self {
            items: core::array::from_fn(|_| None),
            len: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.len == BATCH_CAPACITY
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, object: CollectedObject) {
        debug_assert!(!self.is_full());
        if !self.is_full() {
            self.items[self.len] = Some(object);
            self.len += 1;
        }
    }

    fn timestamp_key(&self, index: usize) -> i32 {
        match &self.items[index] {
            Some(object) => object.timestamp() as i32,
            None => 0,
        }
    }

    /// Hands the collected objects to `f` ordered by timestamp. The keys
    /// are compared as signed values so a counter that wrapped mid-batch
    /// still yields the capture order.
    fn drain(&mut self, mut f: impl FnMut(CollectedObject)) {
        let mut order: [usize; BATCH_CAPACITY] = core::array::from_fn(|i| i);

        for i in 1..self.len {
            let mut j = i;
            while j > 0 && self.timestamp_key(order[j - 1]) > self.timestamp_key(order[j]) {
                order.swap(j - 1, j);
                j -= 1;
            }
        }

        for &index in order.iter().take(self.len) {
            if let Some(object) = self.items[index].take() {
                f(object);
            }
        }
        self.len = 0;
    }
}

impl<SPI, SPIE> MCP2517FD<SPI>
where
    SPI: SpiDevice<u8, Error = SPIE>,
    SPIE: Debug,
{
    /// Flushes the batch into the sink, completing transmit FIFOs as
    /// their event records go out.
    pub(crate) fn deliver_batch<S: EventSink>(&mut self, sink: &mut S) {
        let mut batch = core::mem::replace(&mut self.batch, CollectedBatch::new());

        batch.drain(|object| match object {
            CollectedObject::Rx(message) => {
                self.stats.rx_frames += 1;
                self.stats.rx_bytes += message.data().len() as u32;
                sink.received(message);
            }
            CollectedObject::Tef(record) => match FifoIndex::new(record.origin_fifo()) {
                Some(fifo) => {
                    self.scheduler.complete(fifo);
                    self.stats.tx_frames += 1;
                    self.stats.tx_bytes += record.frame_len() as u32;
                    sink.transmit_done(TxCompletion {
                        fifo: fifo.get(),
                        bytes: record.frame_len(),
                        timestamp: record.timestamp(),
                    });
                }
                None => warn!("event record with invalid SEQ {}", record.origin_fifo()),
            },
        });

        self.batch = batch;
    }

    fn queue_object<S: EventSink>(&mut self, object: CollectedObject, sink: &mut S) {
        if self.batch.is_full() {
            self.deliver_batch(sink);
        }
        self.batch.push(object);
    }

    /// Drains every receive FIFO flagged in the snapshot.
    pub(crate) fn handle_rx<S: EventSink>(
        &mut self,
        status: &StatusSnapshot,
        sink: &mut S,
    ) -> Result<(), Error> {
        let payload = self.plan.payload_size().num_bytes();
        let bulk = self.settings.bulk_fd_reads || payload <= MIN_PAYLOAD_READ;

        // Single-element FIFOs sit back to back in RAM, so a run of
        // adjacent pending FIFOs can be lifted in one burst
        if bulk && self.plan.rx_fifo_depth() == 1 {
            return self.drain_rx_runs(status, sink);
        }

        for fifo in self.plan.rx_fifos() {
            if status.rxif & fifo.bit() != 0 {
                self.drain_rx_fifo(fifo, sink)?;
            }
        }
        Ok(())
    }

    fn drain_rx_runs<S: EventSink>(
        &mut self,
        status: &StatusSnapshot,
        sink: &mut S,
    ) -> Result<(), Error> {
        let element = RX_OBJECT_HEADER_SIZE + self.plan.payload_size().num_bytes();
        let max_run = (BULK_READ_SIZE / element) as u8;

        let start = self.plan.rx_fifo_start();
        let end = start + self.plan.rx_fifo_count() - 1;

        let mut fifo = start;
        while fifo <= end {
            if status.rxif & (1u32 << fifo) == 0 {
                fifo += 1;
                continue;
            }

            let mut run = 1u8;
            while fifo + run <= end
                && run < max_run
                && status.rxif & (1u32 << (fifo + run)) != 0
            {
                run += 1;
            }

            let mut buffer = [0u8; BULK_READ_SIZE];
            let span = run as usize * element;
            self.bus
                .read_ram(self.addresses.fifo_start[fifo as usize], &mut buffer[..span])?;

            for i in 0..run {
                let released = match FifoIndex::new(fifo + i) {
                    Some(f) => f,
                    None => continue,
                };
                self.bus.write_sfr_masked(
                    FifoControlRegister::get_address_for(released),
                    1 << 8,
                    FifoControlRegister::TRIGGER_MASK,
                )?;

                let bytes = &buffer[i as usize * element..][..element];
                if let Some(message) = RxMessage::from_ram_bytes(bytes) {
                    self.queue_object(CollectedObject::Rx(message), sink);
                }
            }

            fifo += run;
        }

        Ok(())
    }

    fn drain_rx_fifo<S: EventSink>(&mut self, fifo: FifoIndex, sink: &mut S) -> Result<(), Error> {
        let payload = self.plan.payload_size().num_bytes();
        // Short elements and the bulk-read setting take the whole element
        // in one transfer; otherwise fetch the header plus the classic
        // payload span first and the FD tail only when the DLC calls for it
        let bulk = self.settings.bulk_fd_reads || payload <= MIN_PAYLOAD_READ;

        loop {
            let sta: FifoStatusRegister = self.bus.read_repeated_register(fifo)?;
            if !sta.tfnrfnif() {
                break;
            }

            let ua: UserAddressRegister = self.bus.read_repeated_register(fifo)?;
            let address = ua.calculate_ram_address();

            let mut buffer = [0u8; RX_OBJECT_HEADER_SIZE + MAX_FD_BUFFER_SIZE];
            let first = if bulk {
                RX_OBJECT_HEADER_SIZE + payload
            } else {
                RX_OBJECT_HEADER_SIZE + MIN_PAYLOAD_READ
            };
            self.bus.read_ram(address, &mut buffer[..first])?;

            let mut total = first;
            if !bulk {
                // DLC sits in the low nibble of R1, FDF in its bit 7
                let dlc = buffer[4] & 0x0F;
                let fdf = buffer[4] & 0x80 != 0;
                let len = len_for_dlc(dlc, fdf).unwrap_or(0);
                if len > MIN_PAYLOAD_READ {
                    let remainder = (len - MIN_PAYLOAD_READ + 3) & !3;
                    self.bus
                        .read_ram(address + first as u16, &mut buffer[first..first + remainder])?;
                    total += remainder;
                }
            }

            // Release the element before handing the copy on
            self.bus.write_sfr_masked(
                FifoControlRegister::get_address_for(fifo),
                1 << 8,
                FifoControlRegister::TRIGGER_MASK,
            )?;

            if let Some(message) = RxMessage::from_ram_bytes(&buffer[..total]) {
                self.queue_object(CollectedObject::Rx(message), sink);
            }
        }

        Ok(())
    }

    /// Collects transmit event records. The record count is derived from
    /// the scheduler masks and the hardware TXREQ state instead of polling
    /// TEFSTA per record, saving one register read per completion.
    pub(crate) fn handle_tef<S: EventSink>(
        &mut self,
        status: &StatusSnapshot,
        sink: &mut S,
    ) -> Result<(), Error> {
        let outstanding = self.scheduler.outstanding().count_ones() as i32;
        let still_queued = status.txreq.count_ones() as i32;
        let expected = outstanding - still_queued;

        if expected <= 0 {
            warn!(
                "TEF flag with no completed frames (outstanding {}, txreq {:#010x})",
                outstanding, status.txreq
            );
            return Err(Error::TefCountMismatch);
        }

        for _ in 0..expected {
            let mut buffer = [0u8; TEF_OBJECT_SIZE];
            self.bus.read_ram(self.tef_address, &mut buffer)?;
            self.bus
                .write_sfr_masked(SFRAddress::C1TEFCON as u16, 1 << 8, 1 << 8)?;

            self.tef_address += TEF_OBJECT_SIZE as u16;
            if self.tef_address >= self.addresses.tef_end {
                self.tef_address = self.addresses.tef_start;
            }

            if let Some(record) = TxEventObject::from_ram_bytes(&buffer) {
                self.queue_object(CollectedObject::Tef(record), sink);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tef_with_timestamp(fifo: u8, timestamp: u32) -> CollectedObject {
        let te1: u32 = (fifo as u32) << 9;
        let mut buf = [0u8; TEF_OBJECT_SIZE];
        buf[4..8].copy_from_slice(&te1.to_le_bytes());
        buf[8..12].copy_from_slice(&timestamp.to_le_bytes());
        CollectedObject::Tef(TxEventObject::from_ram_bytes(&buf).unwrap())
    }

    #[test]
    fn drain_orders_by_timestamp_across_a_wraparound() {
        let mut batch = CollectedBatch::new();
        batch.push(tef_with_timestamp(25, 0x10));
        batch.push(tef_with_timestamp(26, 0xFFFF_FFF0));
        batch.push(tef_with_timestamp(27, 0x05));

        let mut seen = Vec::new();
        batch.drain(|object| seen.push(object.timestamp()));

        // The pre-wrap record first, then the post-wrap pair in order
        assert_eq!(seen, vec![0xFFFF_FFF0, 0x05, 0x10]);
        assert!(batch.is_empty());
    }

    #[test]
    fn equal_timestamps_keep_collection_order() {
        let mut batch = CollectedBatch::new();
        batch.push(tef_with_timestamp(31, 7));
        batch.push(tef_with_timestamp(30, 7));

        let mut fifos = Vec::new();
        batch.drain(|object| {
            if let CollectedObject::Tef(record) = object {
                fifos.push(record.origin_fifo());
            }
        });
        assert_eq!(fifos, vec![31, 30]);
    }
}
