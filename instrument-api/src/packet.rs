//! The data-feed packet taxonomy (component F): the structured event
//! stream a driver emits during acquisition and the frontend callback
//! type that receives it.

use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// What physical quantity a `df-analog` packet's samples represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementQuantity {
    Voltage,
    Current,
    Power,
    Resistance,
    Temperature,
    Frequency,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Volt,
    Ampere,
    Watt,
    Ohm,
    Celsius,
    Hertz,
    Second,
    Unitless,
}

bitflags! {
    /// Measurement flags carried alongside an analog sample batch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SampleFlags: u32 {
        const DC = 1 << 0;
        const AC = 1 << 1;
        const RMS = 1 << 2;
    }
}

/// A key/value refresh, used for out-of-band state changes (e.g. the
/// electronic load driver's regulation-mode meta-updates).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub key: crate::key::Key,
    pub value: crate::value::Value,
}

/// The event stream a driver emits during one acquisition, delivered to
/// the frontend in the order the driver submits them (§5's ordering
/// guarantees apply across this enum).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataPacket {
    /// Emitted exactly once, before any other packet, when an
    /// acquisition successfully starts.
    Header,

    /// An out-of-band key/value refresh.
    Meta(Meta),

    /// A zero-duration marker at the trigger point. Appears between the
    /// sample immediately before and immediately after the trigger
    /// event.
    Trigger,

    /// Brackets a channel's samples within a frame. Strictly precedes
    /// the first `Analog`/`Logic` packet carrying `channel`'s samples in
    /// that frame.
    FrameBegin { channel: usize },

    /// Follows the last `Analog`/`Logic` packet for `channel` in a
    /// frame.
    FrameEnd { channel: usize },

    /// A run of digital samples, aggregated into run-length chunks by
    /// the feed queue.
    Logic { length: u32, unit_size: u8, bytes: Vec<u8> },

    /// A batch of analog samples for one or more channels.
    Analog {
        num_samples: u32,
        channels: Vec<usize>,
        mq: MeasurementQuantity,
        unit: Unit,
        flags: SampleFlags,
        encoding_digits: u8,
        data: Vec<f64>,
    },

    /// Emitted exactly once, terminal: no further packets follow for
    /// this acquisition.
    End,
}

/// The channel through which a driver pushes its packet stream to the
/// frontend. A plain `Fn` rather than an async callback: per §5 the
/// callback is invoked synchronously from the session's single-threaded
/// event loop.
pub type FeedSink = Arc<dyn Fn(DataPacket) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_flags_combine_and_query() {
        let f = SampleFlags::DC | SampleFlags::RMS;
        assert!(f.contains(SampleFlags::DC));
        assert!(f.contains(SampleFlags::RMS));
        assert!(!f.contains(SampleFlags::AC));
    }

    #[test]
    fn packet_serializes_round_trip() {
        let p = DataPacket::FrameBegin { channel: 3 };
        let encoded = serde_json::to_string(&p).unwrap();
        let decoded: DataPacket = serde_json::from_str(&encoded).unwrap();
        assert!(matches!(decoded, DataPacket::FrameBegin { channel: 3 }));
    }
}
