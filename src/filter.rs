//! Filter node abstraction: typed input ports, output streams, and the
//! refresh contract shared by every decoder.

use crate::cache::AnalysisCache;
use crate::packet::{Packet, PacketMerger};
use crate::parameter::ParamSet;
use crate::signal::{max_level, min_level};
use crate::waveform::{Analog, Digital, SparseWaveform, Timebase, UniformWaveform, Waveform};
use dyn_clone::DynClone;

/// Unit of measurement for a stream axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    Femtoseconds,
    Volts,
    Amps,
    Hertz,
    Counts,
}

/// Which symbol alphabet a protocol stream carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    I2c,
    I2cEeprom,
    I2cRegister,
    J1939Pdu,
    Jtag,
    Usb2Pma,
    Usb2Pcs,
    Usb2Packet,
    Code8b10b,
    Training,
    Ltssm,
    Block128b130b,
    Gen3,
    Autoneg,
    AutonegCode,
    BaseX,
    Sgmii,
    Espi,
    DpAux,
}

/// Semantic type of a stream. Wiring is validated against this.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
    Analog,
    Digital,
    Protocol(SymbolKind),
}

/// Menu grouping for a filter. Not part of the execution model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Analysis,
    Bus,
    Clock,
    Math,
    Measurement,
    Memory,
    Serial,
    Misc,
    Power,
    Rf,
    Generation,
    Export,
    Optical,
}

/// One output stream slot of a filter node: declaration, current waveform,
/// and vertical display scale.
#[derive(Clone, Debug)]
pub struct OutputStream {
    pub name: String,
    pub unit: Unit,
    pub stype: StreamType,
    data: Option<Waveform>,
    vrange: Option<f32>,
    voffset: Option<f32>,
}

impl OutputStream {
    pub fn new(name: &str, unit: Unit, stype: StreamType) -> Self {
        Self {
            name: name.to_string(),
            unit,
            stype,
            data: None,
            vrange: None,
            voffset: None,
        }
    }

    pub fn analog(name: &str) -> Self {
        Self::new(name, Unit::Volts, StreamType::Analog)
    }

    pub fn digital(name: &str) -> Self {
        Self::new(name, Unit::Counts, StreamType::Digital)
    }

    pub fn protocol(name: &str, kind: SymbolKind) -> Self {
        Self::new(name, Unit::Counts, StreamType::Protocol(kind))
    }

    #[inline]
    pub fn data(&self) -> Option<&Waveform> {
        self.data.as_ref()
    }

    /// Replace the output waveform, carrying the revision forward so that a
    /// stream's revision never decreases across refreshes.
    pub fn set_data(&mut self, mut wave: Waveform) {
        if let Some(old) = &self.data {
            wave.set_revision(old.revision() + 1);
        }
        self.data = Some(wave);
    }

    /// Drop the output waveform (missing or empty input).
    pub fn clear_data(&mut self) {
        self.data = None;
    }

    /// Reuse or allocate a sparse digital output, copy the timebase from
    /// the input, bump the revision and clear the samples.
    pub fn setup_sparse_digital(&mut self, timebase: Timebase) -> &mut SparseWaveform<bool> {
        if !matches!(self.data, Some(Waveform::SparseDigital(_))) {
            let mut wave = SparseWaveform::new(timebase);
            if let Some(old) = &self.data {
                wave.set_revision(old.revision());
            }
            self.data = Some(Waveform::SparseDigital(wave));
        }
        match self.data {
            Some(Waveform::SparseDigital(ref mut wave)) => {
                wave.timebase = timebase;
                wave.bump_revision();
                wave.clear();
                wave
            }
            _ => unreachable!(),
        }
    }

    /// Reuse or allocate a uniform digital output.
    pub fn setup_uniform_digital(&mut self, timebase: Timebase) -> &mut UniformWaveform<bool> {
        if !matches!(self.data, Some(Waveform::UniformDigital(_))) {
            let mut wave = UniformWaveform::new(timebase);
            if let Some(old) = &self.data {
                wave.set_revision(old.revision());
            }
            self.data = Some(Waveform::UniformDigital(wave));
        }
        match self.data {
            Some(Waveform::UniformDigital(ref mut wave)) => {
                wave.timebase = timebase;
                wave.bump_revision();
                wave.clear();
                wave
            }
            _ => unreachable!(),
        }
    }

    /// Reuse or allocate a sparse analog output.
    pub fn setup_sparse_analog(&mut self, timebase: Timebase) -> &mut SparseWaveform<f32> {
        if !matches!(self.data, Some(Waveform::SparseAnalog(_))) {
            let mut wave = SparseWaveform::new(timebase);
            if let Some(old) = &self.data {
                wave.set_revision(old.revision());
            }
            self.data = Some(Waveform::SparseAnalog(wave));
        }
        match self.data {
            Some(Waveform::SparseAnalog(ref mut wave)) => {
                wave.timebase = timebase;
                wave.bump_revision();
                wave.clear();
                wave
            }
            _ => unreachable!(),
        }
    }

    /// Reuse or allocate a uniform analog output.
    pub fn setup_uniform_analog(&mut self, timebase: Timebase) -> &mut UniformWaveform<f32> {
        if !matches!(self.data, Some(Waveform::UniformAnalog(_))) {
            let mut wave = UniformWaveform::new(timebase);
            if let Some(old) = &self.data {
                wave.set_revision(old.revision());
            }
            self.data = Some(Waveform::UniformAnalog(wave));
        }
        match self.data {
            Some(Waveform::UniformAnalog(ref mut wave)) => {
                wave.timebase = timebase;
                wave.bump_revision();
                wave.clear();
                wave
            }
            _ => unreachable!(),
        }
    }

    /// Vertical range in volts. Falls back to auto-scale from the current
    /// waveform so that reading always yields a usable nonzero range.
    pub fn voltage_range(&self) -> f32 {
        if let Some(range) = self.vrange {
            return range;
        }
        match self.autoscale() {
            Some((range, _)) => range,
            None => 1.0,
        }
    }

    /// Vertical offset in volts; auto-derived like [`Self::voltage_range`].
    pub fn offset(&self) -> f32 {
        if let Some(offset) = self.voffset {
            return offset;
        }
        match self.autoscale() {
            Some((_, offset)) => offset,
            None => 0.0,
        }
    }

    pub fn set_voltage_range(&mut self, range: f32) {
        self.vrange = Some(range);
    }

    pub fn set_offset(&mut self, offset: f32) {
        self.voffset = Some(offset);
    }

    /// Range and offset that fit the current waveform into the plot area.
    fn autoscale(&self) -> Option<(f32, f32)> {
        let wave = self.data.as_ref()?.as_analog()?;
        if crate::waveform::SampleSource::is_empty(&wave) {
            return None;
        }
        let vmin = min_level(&wave);
        let vmax = max_level(&wave);
        let mut range = vmax - vmin;
        // Give some range to constant waveforms.
        if range < 1e-6 {
            range = vmax * 0.05;
        }
        Some((range * 1.05, -(vmin + vmax) / 2.0))
    }
}

/// Everything a filter sees during one refresh: resolved input waveforms,
/// its own output slots, the packet sink, and the shared analysis cache.
pub struct RefreshContext<'a> {
    pub inputs: &'a [Option<&'a Waveform>],
    pub outputs: &'a mut [OutputStream],
    pub packets: &'a mut Vec<Packet>,
    pub cache: &'a AnalysisCache,
}

impl<'a> RefreshContext<'a> {
    /// Input waveform at port `i`. The borrow is tied to the inputs, not to
    /// the context, so outputs can be written while input views are held.
    #[inline]
    pub fn input(&self, i: usize) -> Option<&'a Waveform> {
        self.inputs.get(i).copied().flatten()
    }

    /// True when every input port is wired to a non-empty waveform.
    pub fn all_inputs_ok(&self) -> bool {
        self.inputs.iter().all(|w| w.is_some_and(|w| !w.is_empty()))
    }

    pub fn digital_input(&self, i: usize) -> Option<Digital<'a>> {
        self.input(i)?.as_digital()
    }

    pub fn analog_input(&self, i: usize) -> Option<Analog<'a>> {
        self.input(i)?.as_analog()
    }

    /// Drop all output waveforms; used when inputs are missing or empty.
    pub fn clear_outputs(&mut self) {
        for stream in self.outputs.iter_mut() {
            stream.clear_data();
        }
        self.packets.clear();
    }
}

/// A filter graph node: consumes waveform streams, produces waveform
/// streams, and optionally emits packets.
///
/// Refresh must be a pure function of the inputs at the time of call: no
/// I/O, no blocking, no mutation of upstream data. Decode problems become
/// error symbols in the output, never refresh failures.
pub trait Filter: Send + DynClone + PacketMerger {
    /// Display name of the protocol. Unique across the registry.
    fn protocol_name(&self) -> &'static str;

    /// Menu category.
    fn category(&self) -> Category;

    /// Names of the input ports, in order.
    fn input_names(&self) -> &'static [&'static str];

    /// Declarations of the output streams, in order. Consumed once when the
    /// filter is placed in a graph.
    fn streams(&self) -> Vec<OutputStream>;

    /// Type-check a stream proposed for input port `port`.
    fn validate_channel(&self, port: usize, stype: StreamType) -> bool;

    fn params(&self) -> &ParamSet;

    fn params_mut(&mut self) -> &mut ParamSet;

    /// Column headers for the packet table, for packet decoders.
    fn headers(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Recompute all outputs from the current inputs.
    fn refresh(&mut self, ctx: &mut RefreshContext);
}

dyn_clone::clone_trait_object!(Filter);
