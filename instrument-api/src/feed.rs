//! The feed queue: a per-(device, channel) FIFO used by drivers that
//! emit logic signals with large runs of identical levels. Consecutive
//! identical samples are aggregated and flushed as `df-logic` packets
//! bounded at 4 KiB so a long constant run doesn't balloon into one huge
//! allocation before the frontend sees anything.

use crate::packet::{DataPacket, FeedSink};

const MAX_CHUNK: usize = 4096;

pub struct FeedQueue {
    unit_size: u8,
    buf: Vec<u8>,
    sink: FeedSink,
}

impl FeedQueue {
    pub fn new(unit_size: u8, sink: FeedSink) -> Self {
        FeedQueue { unit_size, buf: Vec::with_capacity(MAX_CHUNK), sink }
    }

    /// Appends `count` samples of `level`, flushing full 4 KiB chunks to
    /// the frontend as they fill.
    pub fn submit(&mut self, level: u8, mut count: usize) {
        while count > 0 {
            let room = MAX_CHUNK - self.buf.len();
            let take = room.min(count);
            self.buf.resize(self.buf.len() + take, level);
            count -= take;

            if self.buf.len() >= MAX_CHUNK {
                self.flush();
            }
        }
    }

    /// Forces any buffered, not-yet-full chunk out to the frontend.
    pub fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let bytes = std::mem::take(&mut self.buf);
        (self.sink)(DataPacket::Logic {
            length: bytes.len() as u32,
            unit_size: self.unit_size,
            bytes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collecting_sink() -> (FeedSink, Arc<Mutex<Vec<DataPacket>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let sink: FeedSink = Arc::new(move |p| seen2.lock().unwrap().push(p));
        (sink, seen)
    }

    #[test]
    fn small_run_stays_buffered_until_flush() {
        let (sink, seen) = collecting_sink();
        let mut q = FeedQueue::new(1, sink);
        q.submit(1, 10);
        assert!(seen.lock().unwrap().is_empty());
        q.flush();
        let packets = seen.lock().unwrap();
        match &packets[0] {
            DataPacket::Logic { length, bytes, .. } => {
                assert_eq!(*length, 10);
                assert_eq!(bytes.len(), 10);
            }
            _ => panic!("expected logic packet"),
        }
    }

    #[test]
    fn long_run_auto_flushes_at_4kib_boundary() {
        let (sink, seen) = collecting_sink();
        let mut q = FeedQueue::new(1, sink);
        q.submit(0xAA, 5000);
        let packets = seen.lock().unwrap();
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            DataPacket::Logic { length, .. } => assert_eq!(*length, MAX_CHUNK as u32),
            _ => panic!("expected logic packet"),
        }
    }

    #[test]
    fn flush_of_empty_queue_emits_nothing() {
        let (sink, seen) = collecting_sink();
        let mut q = FeedQueue::new(1, sink);
        q.flush();
        assert!(seen.lock().unwrap().is_empty());
    }
}
