//! The per-model static tables (§4.5.1): analog/digital topology, the
//! timebase and vdiv rational tables, grid geometry, and the permitted
//! trigger sources. Adding a model is a new table entry, not new code.

use instrument_api::Value;

pub const GRID_DIVS_X: u32 = 12;
pub const GRID_DIVS_Y: u32 = 8;

/// 30 entries, 2 ns to 50 s, in a 1-2-5 progression.
pub const TIMEBASE_TABLE: &[(u64, u64)] = &[
    (2, 1_000_000_000),
    (5, 1_000_000_000),
    (10, 1_000_000_000),
    (20, 1_000_000_000),
    (50, 1_000_000_000),
    (100, 1_000_000_000),
    (200, 1_000_000_000),
    (1, 1_000_000),
    (2, 1_000_000),
    (5, 1_000_000),
    (10, 1_000_000),
    (20, 1_000_000),
    (50, 1_000_000),
    (100, 1_000_000),
    (200, 1_000_000),
    (1, 1_000),
    (2, 1_000),
    (5, 1_000),
    (10, 1_000),
    (20, 1_000),
    (50, 1_000),
    (100, 1_000),
    (200, 1_000),
    (500, 1_000),
    (1, 1),
    (2, 1),
    (5, 1),
    (10, 1),
    (20, 1),
    (50, 1),
];

/// 13 entries, 1 mV to 10 V, in a 1-2-5 progression.
pub const VDIV_TABLE: &[(u64, u64)] = &[
    (1, 1_000),
    (2, 1_000),
    (5, 1_000),
    (10, 1_000),
    (20, 1_000),
    (50, 1_000),
    (100, 1_000),
    (200, 1_000),
    (500, 1_000),
    (1, 1),
    (2, 1),
    (5, 1),
    (10, 1),
];

pub const COUPLING_OPTIONS: &[&str] = &["AC", "ACL", "DC", "DCL", "GND"];

const TRIGGER_SOURCES_2CH: &[&str] = &["CH1", "CH2", "EXT", "LINE"];
const TRIGGER_SOURCES_4CH_POD: &[&str] = &["CH1", "CH2", "CH3", "CH4", "POD1", "EXT", "LINE"];

#[derive(Debug)]
pub struct Model {
    pub name: &'static str,
    pub vendor: &'static str,
    pub analog_channels: usize,
    pub digital_pods: usize,
    pub trigger_sources: &'static [&'static str],
}

pub const MODELS: &[Model] = &[
    Model {
        name: "HMO1024",
        vendor: "HAMEG",
        analog_channels: 4,
        digital_pods: 1,
        trigger_sources: TRIGGER_SOURCES_4CH_POD,
    },
    Model {
        name: "HMO722",
        vendor: "HAMEG",
        analog_channels: 2,
        digital_pods: 0,
        trigger_sources: TRIGGER_SOURCES_2CH,
    },
];

pub fn lookup(name: &str) -> Option<&'static Model> {
    MODELS.iter().find(|m| m.name == name)
}

pub fn timebase_value(idx: usize) -> instrument_api::Result<Value> {
    let (num, den) = *TIMEBASE_TABLE
        .get(idx)
        .ok_or_else(|| instrument_api::Error::InvalidArg(format!("timebase index {idx} out of range")))?;
    Value::rational(num, den)
}

pub fn vdiv_value(idx: usize) -> instrument_api::Result<Value> {
    let (num, den) = *VDIV_TABLE
        .get(idx)
        .ok_or_else(|| instrument_api::Error::InvalidArg(format!("vdiv index {idx} out of range")))?;
    Value::rational(num, den)
}

/// Finds the table index of a rational exactly equal to `(num, den)`'s
/// reduced ratio. The table uses fixed canonical forms so equality of
/// the cross-product is enough; no floating point is involved.
pub fn find_rational(table: &[(u64, u64)], num: u64, den: u64) -> Option<usize> {
    table
        .iter()
        .position(|&(n, d)| n as u128 * den as u128 == d as u128 * num as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timebase_table_has_30_entries_spanning_2ns_to_50s() {
        assert_eq!(TIMEBASE_TABLE.len(), 30);
        let (n, d) = TIMEBASE_TABLE[0];
        assert_eq!((n, d), (2, 1_000_000_000));
        let (n, d) = TIMEBASE_TABLE[TIMEBASE_TABLE.len() - 1];
        assert_eq!((n, d), (50, 1));
    }

    #[test]
    fn vdiv_table_has_13_entries_spanning_1mv_to_10v() {
        assert_eq!(VDIV_TABLE.len(), 13);
        assert_eq!(VDIV_TABLE[0], (1, 1_000));
        assert_eq!(VDIV_TABLE[VDIV_TABLE.len() - 1], (10, 1));
    }

    #[test]
    fn find_rational_matches_reduced_equivalent_forms() {
        assert_eq!(find_rational(TIMEBASE_TABLE, 1, 500_000_000), Some(1));
        assert_eq!(find_rational(TIMEBASE_TABLE, 3, 7), None);
    }

    #[test]
    fn lookup_finds_known_model_by_name() {
        let m = lookup("HMO1024").unwrap();
        assert_eq!(m.analog_channels, 4);
        assert_eq!(m.digital_pods, 1);
        assert!(lookup("NOT-A-MODEL").is_none());
    }
}
