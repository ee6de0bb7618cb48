//! Filters, effects, and auxiliary effect slots
//!
//! Filter and effect objects are parameter holders keyed by handles; a
//! slot installs a copy of an effect's parameters and owns the running
//! DSP state on the mixer side. Effect states are a closed enum so the
//! hot path dispatches without trait objects, and a replaced state is
//! handed back through the slot's retirement cell only after the mixer
//! has switched to the new one.

use std::sync::Arc;

use crossbeam_utils::atomic::AtomicCell;

use aural_core::{invalid_value, AuralResult};
use aural_dsp::effects::*;

use crate::props::PropsCell;
use crate::source::FilterProps;

/// Filter object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterKind {
    #[default]
    Null,
    Lowpass,
    Highpass,
    Bandpass,
}

/// A filter object: gains applied at fixed reference frequencies.
#[derive(Debug, Clone, Copy)]
pub struct FilterObject {
    pub kind: FilterKind,
    pub gain: f32,
    pub gain_hf: f32,
    pub gain_lf: f32,
}

impl Default for FilterObject {
    fn default() -> Self {
        Self {
            kind: FilterKind::Null,
            gain: 1.0,
            gain_hf: 1.0,
            gain_lf: 1.0,
        }
    }
}

impl FilterObject {
    /// Validates and sets the gains.
    pub fn set_gain(&mut self, gain: f32) -> AuralResult<()> {
        if !gain.is_finite() || !(0.0..=4.0).contains(&gain) {
            return Err(invalid_value(format!("filter gain {gain} out of range")));
        }
        self.gain = gain;
        Ok(())
    }

    pub fn set_gain_hf(&mut self, gain: f32) -> AuralResult<()> {
        if !gain.is_finite() || !(0.0..=1.0).contains(&gain) {
            return Err(invalid_value(format!("filter gainHF {gain} out of range")));
        }
        self.gain_hf = gain;
        Ok(())
    }

    pub fn set_gain_lf(&mut self, gain: f32) -> AuralResult<()> {
        if !gain.is_finite() || !(0.0..=1.0).contains(&gain) {
            return Err(invalid_value(format!("filter gainLF {gain} out of range")));
        }
        self.gain_lf = gain;
        Ok(())
    }

    /// The per-path filter parameters this object produces.
    pub fn to_props(self) -> FilterProps {
        let mut props = FilterProps {
            gain: self.gain,
            ..FilterProps::default()
        };
        match self.kind {
            FilterKind::Null => props.gain = 1.0,
            FilterKind::Lowpass => props.gain_hf = self.gain_hf,
            FilterKind::Highpass => props.gain_lf = self.gain_lf,
            FilterKind::Bandpass => {
                props.gain_hf = self.gain_hf;
                props.gain_lf = self.gain_lf;
            }
        }
        props
    }
}

/// Effect kinds and their parameters.
#[derive(Debug, Clone, Copy, Default)]
pub enum EffectParams {
    #[default]
    Null,
    Reverb(ReverbParams),
    Echo(EchoParams),
    Chorus(ChorusParams),
    Flanger(ChorusParams),
    Distortion(DistortionParams),
    Equalizer(EqualizerParams),
    Compressor(CompressorParams),
    Modulator(ModulatorParams),
    Autowah(AutowahParams),
    FrequencyShifter(FshifterParams),
    PitchShifter(PshifterParams),
    DedicatedDialog(DedicatedParams),
    DedicatedLfe(DedicatedParams),
}

impl EffectParams {
    /// Same effect kind, regardless of parameter values.
    pub fn same_kind(&self, other: &EffectParams) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// An effect object: a parameter holder installed into slots by value.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectObject {
    pub params: EffectParams,
}

/// Running DSP state for a slot's installed effect.
pub enum EffectState {
    Null,
    Reverb(Box<Reverb>),
    Echo(Box<Echo>),
    Chorus(Box<Chorus>),
    Distortion(Box<Distortion>),
    Equalizer(Box<Equalizer>),
    Compressor(Box<Compressor>),
    Modulator(Box<RingModulator>),
    Autowah(Box<Autowah>),
    FrequencyShifter(Box<FrequencyShifter>),
    PitchShifter(Box<PitchShifter>),
    Dedicated(Box<Dedicated>),
}

impl EffectState {
    /// Builds a state for the effect kind at the device rate.
    pub fn new(params: &EffectParams, sample_rate: u32) -> Self {
        let mut state = match params {
            EffectParams::Null => EffectState::Null,
            EffectParams::Reverb(_) => EffectState::Reverb(Box::new(Reverb::new(sample_rate))),
            EffectParams::Echo(_) => EffectState::Echo(Box::new(Echo::new(sample_rate))),
            EffectParams::Chorus(_) | EffectParams::Flanger(_) => {
                EffectState::Chorus(Box::new(Chorus::new(sample_rate)))
            }
            EffectParams::Distortion(_) => {
                EffectState::Distortion(Box::new(Distortion::new(sample_rate)))
            }
            EffectParams::Equalizer(_) => {
                EffectState::Equalizer(Box::new(Equalizer::new(sample_rate)))
            }
            EffectParams::Compressor(_) => {
                EffectState::Compressor(Box::new(Compressor::new(sample_rate)))
            }
            EffectParams::Modulator(_) => {
                EffectState::Modulator(Box::new(RingModulator::new(sample_rate)))
            }
            EffectParams::Autowah(_) => EffectState::Autowah(Box::new(Autowah::new(sample_rate))),
            EffectParams::FrequencyShifter(_) => {
                EffectState::FrequencyShifter(Box::new(FrequencyShifter::new(sample_rate)))
            }
            EffectParams::PitchShifter(_) => {
                EffectState::PitchShifter(Box::new(PitchShifter::new(sample_rate)))
            }
            EffectParams::DedicatedDialog(_) | EffectParams::DedicatedLfe(_) => {
                EffectState::Dedicated(Box::new(Dedicated::new(sample_rate)))
            }
        };
        state.set_params(params);
        state
    }

    /// Applies parameters of the matching kind; mismatched kinds are
    /// ignored (the caller swaps states on kind changes).
    pub fn set_params(&mut self, params: &EffectParams) {
        match (self, params) {
            (EffectState::Reverb(s), EffectParams::Reverb(p)) => s.set_params(p),
            (EffectState::Echo(s), EffectParams::Echo(p)) => s.set_params(p),
            (EffectState::Chorus(s), EffectParams::Chorus(p))
            | (EffectState::Chorus(s), EffectParams::Flanger(p)) => s.set_params(p),
            (EffectState::Distortion(s), EffectParams::Distortion(p)) => s.set_params(p),
            (EffectState::Equalizer(s), EffectParams::Equalizer(p)) => s.set_params(p),
            (EffectState::Compressor(s), EffectParams::Compressor(p)) => s.set_params(p),
            (EffectState::Modulator(s), EffectParams::Modulator(p)) => s.set_params(p),
            (EffectState::Autowah(s), EffectParams::Autowah(p)) => s.set_params(p),
            (EffectState::FrequencyShifter(s), EffectParams::FrequencyShifter(p)) => {
                s.set_params(p)
            }
            (EffectState::PitchShifter(s), EffectParams::PitchShifter(p)) => s.set_params(p),
            (EffectState::Dedicated(s), EffectParams::DedicatedDialog(p))
            | (EffectState::Dedicated(s), EffectParams::DedicatedLfe(p)) => s.set_params(p),
            _ => {}
        }
    }

    /// Rebuilds per-rate tables after a device reset.
    pub fn device_update(&mut self, sample_rate: u32, max_frames: usize) {
        match self {
            EffectState::Null => {}
            EffectState::Reverb(s) => s.device_update(sample_rate, max_frames),
            EffectState::Echo(s) => s.device_update(sample_rate, max_frames),
            EffectState::Chorus(s) => s.device_update(sample_rate, max_frames),
            EffectState::Distortion(s) => s.device_update(sample_rate, max_frames),
            EffectState::Equalizer(s) => s.device_update(sample_rate, max_frames),
            EffectState::Compressor(s) => s.device_update(sample_rate, max_frames),
            EffectState::Modulator(s) => s.device_update(sample_rate, max_frames),
            EffectState::Autowah(s) => s.device_update(sample_rate, max_frames),
            EffectState::FrequencyShifter(s) => s.device_update(sample_rate, max_frames),
            EffectState::PitchShifter(s) => s.device_update(sample_rate, max_frames),
            EffectState::Dedicated(s) => s.device_update(sample_rate, max_frames),
        }
    }

    /// Runs one update. The null state writes silence.
    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        match self {
            EffectState::Null => {
                out_left[..input.len()].fill(0.0);
                out_right[..input.len()].fill(0.0);
            }
            EffectState::Reverb(s) => s.process(input, out_left, out_right),
            EffectState::Echo(s) => s.process(input, out_left, out_right),
            EffectState::Chorus(s) => s.process(input, out_left, out_right),
            EffectState::Distortion(s) => s.process(input, out_left, out_right),
            EffectState::Equalizer(s) => s.process(input, out_left, out_right),
            EffectState::Compressor(s) => s.process(input, out_left, out_right),
            EffectState::Modulator(s) => s.process(input, out_left, out_right),
            EffectState::Autowah(s) => s.process(input, out_left, out_right),
            EffectState::FrequencyShifter(s) => s.process(input, out_left, out_right),
            EffectState::PitchShifter(s) => s.process(input, out_left, out_right),
            EffectState::Dedicated(s) => s.process(input, out_left, out_right),
        }
    }
}

/// Slot parameters published to the mixer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotProps {
    pub gain: f32,
    /// Whether source sends targeting this slot scale with distance
    /// attenuation.
    pub auto_send: bool,
    /// Downstream slot id, 0 for the dry bus.
    pub target: u32,
    /// Routes output to the LFE channel instead of the spatial bus.
    pub lfe_routing: bool,
}

impl Default for SlotProps {
    fn default() -> Self {
        Self {
            gain: 1.0,
            auto_send: true,
            target: 0,
            lfe_routing: false,
        }
    }
}

/// The slot block shared between control and mixer.
pub struct SlotShared {
    pub id: u32,
    pub props: PropsCell<SlotProps>,
    /// States the mixer displaced; drained control-side.
    pub retired_state: AtomicCell<Option<Box<EffectState>>>,
}

/// Control-plane effect slot.
pub struct EffectSlot {
    pub shared: Arc<SlotShared>,
    pub gain: f32,
    pub auto_send: bool,
    /// Target slot id (0 = dry bus).
    pub target: u32,
    /// Parameters of the installed effect.
    pub params: EffectParams,
    /// References from source sends and other slots' targets; non-zero
    /// forbids deletion.
    pub refs: u32,
}

impl EffectSlot {
    pub fn new(id: u32) -> Self {
        Self {
            shared: Arc::new(SlotShared {
                id,
                props: PropsCell::new(),
                retired_state: AtomicCell::new(None),
            }),
            gain: 1.0,
            auto_send: true,
            target: 0,
            params: EffectParams::Null,
            refs: 0,
        }
    }

    /// Drops any state the mixer handed back.
    pub fn drain_retired(&self) {
        drop(self.shared.retired_state.take());
    }

    pub fn publish(&self) {
        let (gain, auto_send, target) = (self.gain, self.auto_send, self.target);
        let lfe_routing = matches!(self.params, EffectParams::DedicatedLfe(_));
        self.shared.props.publish(move |p| {
            p.gain = gain;
            p.auto_send = auto_send;
            p.target = target;
            p.lfe_routing = lfe_routing;
        });
    }
}
