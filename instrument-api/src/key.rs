//! The key registry: a stable enumeration of configuration keys with the
//! metadata a driver or the session pipeline needs to validate a request
//! before ever touching the device.
//!
//! Key identifiers are persisted (logged, stored in session replay
//! buffers elsewhere in the stack) so `Key` variants are never removed or
//! renumbered; add new keys at the end of the list.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A capability flag set. A key may be readable, writable, and/or
/// enumerable in any combination; `config_get`/`config_set`/`config_list`
/// each check the relevant bit before calling into the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caps {
    pub gettable: bool,
    pub settable: bool,
    pub listable: bool,
}

impl Caps {
    pub const fn ro(listable: bool) -> Self {
        Caps { gettable: true, settable: false, listable }
    }
    pub const fn rw(listable: bool) -> Self {
        Caps { gettable: true, settable: true, listable }
    }
}

/// The expected `Value` shape for a key, named without constructing a
/// sample value (most keys have no natural default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Bool,
    U32,
    I32,
    U64,
    I64,
    F64,
    String,
    Rational,
    Tuple2F64,
    Tuple2U64,
    ArrayU32,
    ArrayU64,
    ArrayI32,
    ArrayString,
    ArrayRational,
}

impl Shape {
    pub fn matches(&self, v: &Value) -> bool {
        matches!(
            (self, v),
            (Shape::Bool, Value::Bool(_))
                | (Shape::U32, Value::U32(_))
                | (Shape::I32, Value::I32(_))
                | (Shape::U64, Value::U64(_))
                | (Shape::I64, Value::I64(_))
                | (Shape::F64, Value::F64(_))
                | (Shape::String, Value::String(_))
                | (Shape::Rational, Value::Rational(_))
                | (Shape::Tuple2F64, Value::Tuple2F64(_))
                | (Shape::Tuple2U64, Value::Tuple2U64(_))
                | (Shape::ArrayU32, Value::ArrayU32(_))
                | (Shape::ArrayU64, Value::ArrayU64(_))
                | (Shape::ArrayI32, Value::ArrayI32(_))
                | (Shape::ArrayString, Value::ArrayString(_))
                | (Shape::ArrayRational, Value::ArrayRational(_))
        )
    }
}

/// Every stable configuration key. The discriminant order is the
/// registration order in [`Key::ALL`], not the persisted identifier;
/// `Key::id()` is the persisted, stable integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Key {
    Samplerate,
    LimitSamples,
    LimitMsec,
    LimitFrames,
    CaptureRatio,
    TriggerSource,
    TriggerSlope,
    TriggerMatch,
    HorizTriggerPos,
    Timebase,
    Vdiv,
    Coupling,
    Voltage,
    VoltageTarget,
    Current,
    CurrentLimit,
    Enabled,
    Regulation,
    OverVoltageProtectionEnabled,
    OverVoltageProtectionThreshold,
    OverCurrentProtectionEnabled,
    OverCurrentProtectionThreshold,
    VoltageThreshold,
    PatternMode,
    Conn,
    Serialcomm,
}

/// Metadata recorded for a key: the persisted id, a human name, the
/// expected shape, and the capability flags.
pub struct KeyInfo {
    pub key: Key,
    pub id: u32,
    pub name: &'static str,
    pub shape: Shape,
    pub caps: Caps,
}

macro_rules! keys {
    ($( $id:literal => $variant:ident, $name:literal, $shape:ident, $caps:expr );* $(;)?) => {
        impl Key {
            pub const ALL: &'static [Key] = &[ $( Key::$variant ),* ];

            pub fn info(self) -> KeyInfo {
                match self {
                    $( Key::$variant => KeyInfo {
                        key: Key::$variant,
                        id: $id,
                        name: $name,
                        shape: Shape::$shape,
                        caps: $caps,
                    }, )*
                }
            }

            pub fn by_name(name: &str) -> Option<Key> {
                match name {
                    $( $name => Some(Key::$variant), )*
                    _ => None,
                }
            }

            pub fn by_id(id: u32) -> Option<Key> {
                match id {
                    $( $id => Some(Key::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

keys! {
    1  => Samplerate, "samplerate", U64, Caps::rw(true);
    2  => LimitSamples, "limit-samples", U64, Caps::rw(false);
    3  => LimitMsec, "limit-msec", U64, Caps::rw(false);
    4  => LimitFrames, "limit-frames", U64, Caps::rw(false);
    5  => CaptureRatio, "capture-ratio", U64, Caps::rw(false);
    6  => TriggerSource, "trigger-source", String, Caps::rw(true);
    7  => TriggerSlope, "trigger-slope", U64, Caps::rw(true);
    8  => TriggerMatch, "trigger-match", I32, Caps::rw(true);
    9  => HorizTriggerPos, "horiz-trigger-pos", F64, Caps::rw(false);
    10 => Timebase, "timebase", Rational, Caps::rw(true);
    11 => Vdiv, "vdiv", Rational, Caps::rw(true);
    12 => Coupling, "coupling", String, Caps::rw(true);
    13 => Voltage, "voltage", F64, Caps::ro(false);
    14 => VoltageTarget, "voltage-target", F64, Caps::rw(false);
    15 => Current, "current", F64, Caps::ro(false);
    16 => CurrentLimit, "current-limit", F64, Caps::rw(false);
    17 => Enabled, "enabled", Bool, Caps::rw(false);
    18 => Regulation, "regulation", String, Caps::ro(true);
    19 => OverVoltageProtectionEnabled, "over-voltage-protection-enabled", Bool, Caps::rw(false);
    20 => OverVoltageProtectionThreshold, "over-voltage-protection-threshold", F64, Caps::rw(false);
    21 => OverCurrentProtectionEnabled, "over-current-protection-enabled", Bool, Caps::rw(false);
    22 => OverCurrentProtectionThreshold, "over-current-protection-threshold", F64, Caps::rw(false);
    23 => VoltageThreshold, "voltage-threshold", Tuple2F64, Caps::rw(false);
    24 => PatternMode, "pattern-mode", String, Caps::rw(true);
    25 => Conn, "conn", String, Caps::rw(false);
    26 => Serialcomm, "serialcomm", String, Caps::rw(false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for k in Key::ALL {
            let info = k.info();
            assert!(seen.insert(info.id), "duplicate id {}", info.id);
            assert_eq!(Key::by_id(info.id), Some(*k));
            assert_eq!(Key::by_name(info.name), Some(*k));
        }
    }

    #[test]
    fn shape_matches_rejects_wrong_variant() {
        let info = Key::Samplerate.info();
        assert!(info.shape.matches(&Value::U64(1000)));
        assert!(!info.shape.matches(&Value::Bool(true)));
    }
}
