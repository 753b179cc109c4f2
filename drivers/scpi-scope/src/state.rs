//! The in-memory scope state mirror (§4.5.1). `dev_open` populates it by
//! issuing each getter once; `config_set` keeps it in lockstep with the
//! device so `config_get` can answer without a round trip.

#[derive(Debug, Clone)]
pub struct AnalogChannelState {
    pub enabled: bool,
    pub vdiv_index: usize,
    pub vertical_offset: f64,
    pub coupling_index: usize,
}

impl Default for AnalogChannelState {
    fn default() -> Self {
        AnalogChannelState { enabled: false, vdiv_index: 0, vertical_offset: 0.0, coupling_index: 2 }
    }
}

#[derive(Debug, Clone)]
pub struct ScopeState {
    pub analog: Vec<AnalogChannelState>,
    pub digital_enabled: Vec<bool>,
    pub pod_enabled: Vec<bool>,
    pub timebase_index: usize,
    pub horiz_trigger_pos: f64,
    pub trigger_source_index: usize,
    pub trigger_slope_index: usize,
    pub sample_rate: f64,
    pub limit_samples: Option<u64>,
    pub limit_msec: Option<u64>,
    pub limit_frames: Option<u64>,
}

impl ScopeState {
    pub fn new(analog_channels: usize, digital_pods: usize) -> Self {
        ScopeState {
            analog: (0..analog_channels).map(|_| AnalogChannelState::default()).collect(),
            digital_enabled: vec![false; digital_pods * 8],
            pod_enabled: vec![false; digital_pods],
            timebase_index: 0,
            horiz_trigger_pos: 0.0,
            trigger_source_index: 0,
            trigger_slope_index: 1,
            sample_rate: 0.0,
            limit_samples: None,
            limit_msec: None,
            limit_frames: None,
        }
    }

    pub fn enabled_analog_channels(&self) -> Vec<usize> {
        self.analog
            .iter()
            .enumerate()
            .filter(|(_, c)| c.enabled)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn enabled_pods(&self) -> Vec<usize> {
        self.pod_enabled
            .iter()
            .enumerate()
            .filter(|(_, &e)| e)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_has_one_entry_per_channel_and_pod() {
        let s = ScopeState::new(4, 1);
        assert_eq!(s.analog.len(), 4);
        assert_eq!(s.digital_enabled.len(), 8);
        assert_eq!(s.pod_enabled.len(), 1);
    }

    #[test]
    fn enabled_analog_channels_lists_only_enabled_indices() {
        let mut s = ScopeState::new(4, 1);
        s.analog[0].enabled = true;
        s.analog[2].enabled = true;
        assert_eq!(s.enabled_analog_channels(), vec![0, 2]);
    }
}
