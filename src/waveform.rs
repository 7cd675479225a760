//! Waveform data model: timebases plus uniform and sparse sample storage.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::dp_aux::DpAuxSymbol;
use crate::espi::EspiSymbol;
use crate::ethernet_autoneg::{AutonegCodeword, AutonegSymbol};
use crate::ethernet_basex::{BaseXSymbol, SgmiiSymbol};
use crate::i2c::I2cSymbol;
use crate::i2c_eeprom::I2cEepromSymbol;
use crate::i2c_register::I2cRegisterSymbol;
use crate::ibm8b10b::CodeSymbol;
use crate::j1939::J1939PduSymbol;
use crate::jtag::JtagSymbol;
use crate::pcie_128b130b::BlockSymbol;
use crate::pcie_gen3::Gen3Symbol;
use crate::pcie_link_training::{LtssmSymbol, TrainingSymbol};
use crate::usb2_packet::Usb2PacketSymbol;
use crate::usb2_pcs::Usb2PcsSymbol;
use crate::usb2_pma::Usb2PmaSymbol;
use duplicate::duplicate_item;

/// Femtoseconds in one second.
pub const FS_PER_SECOND: i64 = 1_000_000_000_000_000;

static NEXT_WAVEFORM_ID: AtomicU64 = AtomicU64::new(1);

fn next_waveform_id() -> u64 {
    NEXT_WAVEFORM_ID.fetch_add(1, Ordering::Relaxed)
}

/// Wall-clock origin and tick scale shared by every sample in a waveform.
///
/// Multiplying a logical sample offset by `timescale` and adding
/// `trigger_phase` yields a femtosecond timestamp relative to the start of
/// the capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timebase {
    /// Start of the capture, in whole seconds since the epoch.
    pub start_timestamp: i64,
    /// Sub-second part of the capture start, in femtoseconds.
    pub start_fs: u64,
    /// Femtoseconds per logical tick. Always positive.
    pub timescale: i64,
    /// Femtosecond bias applied to every converted offset.
    pub trigger_phase: i64,
}

impl Default for Timebase {
    fn default() -> Self {
        Self {
            start_timestamp: 0,
            start_fs: 0,
            timescale: 1,
            trigger_phase: 0,
        }
    }
}

impl Timebase {
    /// Timebase for a decoder output that works directly in femtoseconds.
    /// The capture origin is inherited from `source`; scale becomes unity.
    pub fn fs_unit(source: &Timebase) -> Self {
        Self {
            start_timestamp: source.start_timestamp,
            start_fs: source.start_fs,
            timescale: 1,
            trigger_phase: 0,
        }
    }
}

/// Read access to an ordered run of timestamped samples.
///
/// Implemented by both waveform geometries so that signal primitives can be
/// written once and monomorphized per geometry and sample type.
pub trait SampleSource<T: Copy> {
    /// Number of samples.
    fn len(&self) -> usize;
    /// Sample value at `i`.
    fn at(&self, i: usize) -> T;
    /// Logical offset of sample `i` in timescale ticks.
    fn offset(&self, i: usize) -> i64;
    /// Duration of sample `i` in timescale ticks.
    fn duration(&self, i: usize) -> i64;
    /// Ticks from sample `i` to the next sample. 1 on the last sample.
    fn gap(&self, i: usize) -> i64;
    /// The timebase of the underlying waveform.
    fn timebase(&self) -> &Timebase;
    /// Identity and revision of the backing waveform, for cache keys.
    fn identity(&self) -> (u64, u64);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Femtosecond timestamp of the start of sample `i`.
    #[inline]
    fn offset_fs(&self, i: usize) -> i64 {
        let tb = self.timebase();
        self.offset(i) * tb.timescale + tb.trigger_phase
    }

    /// Femtosecond duration of sample `i`.
    #[inline]
    fn duration_fs(&self, i: usize) -> i64 {
        self.duration(i) * self.timebase().timescale
    }
}

/// Waveform whose sample `i` occupies logical offset `i` with unit duration.
#[derive(Debug)]
pub struct UniformWaveform<T> {
    pub timebase: Timebase,
    pub samples: Vec<T>,
    id: u64,
    revision: u64,
}

impl<T> UniformWaveform<T> {
    pub fn new(timebase: Timebase) -> Self {
        Self {
            timebase,
            samples: Vec::new(),
            id: next_waveform_id(),
            revision: 0,
        }
    }

    /// Create a waveform from existing samples.
    ///
    /// ### Example
    /// ```
    /// use scopedec::waveform::{Timebase, UniformWaveform};
    /// let w = UniformWaveform::from_samples(Timebase::default(), vec![0.0f32, 1.0]);
    /// assert_eq!(w.len(), 2);
    /// ```
    pub fn from_samples(timebase: Timebase, samples: Vec<T>) -> Self {
        Self {
            timebase,
            samples,
            id: next_waveform_id(),
            revision: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Stable identity of this waveform, used in analysis cache keys.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Record that the samples were modified.
    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }

    pub(crate) fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl<T: Clone> Clone for UniformWaveform<T> {
    fn clone(&self) -> Self {
        Self {
            timebase: self.timebase,
            samples: self.samples.clone(),
            id: next_waveform_id(),
            revision: self.revision,
        }
    }
}

// Content equality. Identity and revision are deliberately excluded.
impl<T: PartialEq> PartialEq for UniformWaveform<T> {
    fn eq(&self, other: &Self) -> bool {
        self.timebase == other.timebase && self.samples == other.samples
    }
}

impl<T: Copy> SampleSource<T> for UniformWaveform<T> {
    #[inline]
    fn len(&self) -> usize {
        self.samples.len()
    }
    #[inline]
    fn at(&self, i: usize) -> T {
        self.samples[i]
    }
    #[inline]
    fn offset(&self, i: usize) -> i64 {
        i as i64
    }
    #[inline]
    fn duration(&self, _i: usize) -> i64 {
        1
    }
    #[inline]
    fn gap(&self, _i: usize) -> i64 {
        1
    }
    #[inline]
    fn timebase(&self) -> &Timebase {
        &self.timebase
    }
    #[inline]
    fn identity(&self) -> (u64, u64) {
        (self.id, self.revision)
    }
}

/// Waveform with an explicit offset and duration per sample.
///
/// Invariants: `offsets` is strictly increasing, every duration is at least
/// one tick, and sample `i` ends at or before sample `i + 1` begins. The
/// three vectors always have equal length.
#[derive(Debug)]
pub struct SparseWaveform<T> {
    pub timebase: Timebase,
    pub samples: Vec<T>,
    pub offsets: Vec<i64>,
    pub durations: Vec<i64>,
    id: u64,
    revision: u64,
}

impl<T> SparseWaveform<T> {
    pub fn new(timebase: Timebase) -> Self {
        Self {
            timebase,
            samples: Vec::new(),
            offsets: Vec::new(),
            durations: Vec::new(),
            id: next_waveform_id(),
            revision: 0,
        }
    }

    pub fn with_capacity(timebase: Timebase, capacity: usize) -> Self {
        Self {
            timebase,
            samples: Vec::with_capacity(capacity),
            offsets: Vec::with_capacity(capacity),
            durations: Vec::with_capacity(capacity),
            id: next_waveform_id(),
            revision: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }

    pub(crate) fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.offsets.clear();
        self.durations.clear();
    }

    /// Append a sample spanning `offset .. offset + duration` ticks.
    #[inline]
    pub fn push(&mut self, offset: i64, duration: i64, value: T) {
        self.offsets.push(offset);
        self.durations.push(duration);
        self.samples.push(value);
    }

    /// Recompute durations from consecutive offsets, assuming a gapless
    /// capture: each sample lasts until the next one starts, and the final
    /// sample gets unit duration.
    ///
    /// ### Example
    /// ```
    /// use scopedec::waveform::{SparseWaveform, Timebase};
    /// let mut w = SparseWaveform::new(Timebase::default());
    /// w.push(0, 1, false);
    /// w.push(5, 1, true);
    /// w.push(7, 1, false);
    /// w.fill_durations();
    /// assert_eq!(w.durations, vec![5, 2, 1]);
    /// ```
    pub fn fill_durations(&mut self) {
        let len = self.offsets.len();
        for i in 0..len.saturating_sub(1) {
            self.durations[i] = self.offsets[i + 1] - self.offsets[i];
        }
        if len > 0 {
            self.durations[len - 1] = 1;
        }
    }

    /// Extend the last sample to end at `offset` ticks, if there is one.
    pub fn extend_last_to(&mut self, offset: i64) {
        if let (Some(last_off), Some(last_dur)) = (self.offsets.last(), self.durations.last_mut()) {
            if offset > *last_off {
                *last_dur = offset - *last_off;
            }
        }
    }
}

impl<T: Clone> Clone for SparseWaveform<T> {
    fn clone(&self) -> Self {
        Self {
            timebase: self.timebase,
            samples: self.samples.clone(),
            offsets: self.offsets.clone(),
            durations: self.durations.clone(),
            id: next_waveform_id(),
            revision: self.revision,
        }
    }
}

// Content equality. Identity and revision are deliberately excluded.
impl<T: PartialEq> PartialEq for SparseWaveform<T> {
    fn eq(&self, other: &Self) -> bool {
        self.timebase == other.timebase
            && self.samples == other.samples
            && self.offsets == other.offsets
            && self.durations == other.durations
    }
}

impl<T: Copy> SampleSource<T> for SparseWaveform<T> {
    #[inline]
    fn len(&self) -> usize {
        self.samples.len()
    }
    #[inline]
    fn at(&self, i: usize) -> T {
        self.samples[i]
    }
    #[inline]
    fn offset(&self, i: usize) -> i64 {
        self.offsets[i]
    }
    #[inline]
    fn duration(&self, i: usize) -> i64 {
        self.durations[i]
    }
    #[inline]
    fn gap(&self, i: usize) -> i64 {
        if i + 1 < self.offsets.len() {
            self.offsets[i + 1] - self.offsets[i]
        } else {
            1
        }
    }
    #[inline]
    fn timebase(&self) -> &Timebase {
        &self.timebase
    }
    #[inline]
    fn identity(&self) -> (u64, u64) {
        (self.id, self.revision)
    }
}

/// Color class of a rendered symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolColor {
    Error,
    Idle,
    Control,
    Address,
    Data,
    Preamble,
    ChecksumOk,
    ChecksumBad,
}

/// Stable textual rendering and color hint for protocol symbols.
pub trait SymbolText {
    fn text(&self) -> String;
    fn color(&self) -> SymbolColor;
}

/// Rendering access to a protocol symbol stream of any sample type.
pub trait SymbolSamples {
    fn len(&self) -> usize;
    fn timebase(&self) -> &Timebase;
    fn revision(&self) -> u64;
    fn offset_fs(&self, i: usize) -> i64;
    fn duration_fs(&self, i: usize) -> i64;
    fn text(&self, i: usize) -> String;
    fn color(&self, i: usize) -> SymbolColor;
}

impl<S: SymbolText + Copy> SymbolSamples for SparseWaveform<S> {
    fn len(&self) -> usize {
        self.samples.len()
    }
    fn timebase(&self) -> &Timebase {
        &self.timebase
    }
    fn revision(&self) -> u64 {
        self.revision
    }
    fn offset_fs(&self, i: usize) -> i64 {
        SampleSource::offset_fs(self, i)
    }
    fn duration_fs(&self, i: usize) -> i64 {
        SampleSource::duration_fs(self, i)
    }
    fn text(&self, i: usize) -> String {
        self.samples[i].text()
    }
    fn color(&self, i: usize) -> SymbolColor {
        self.samples[i].color()
    }
}

impl<S: SymbolText + Copy> SymbolSamples for UniformWaveform<S> {
    fn len(&self) -> usize {
        self.samples.len()
    }
    fn timebase(&self) -> &Timebase {
        &self.timebase
    }
    fn revision(&self) -> u64 {
        self.revision
    }
    fn offset_fs(&self, i: usize) -> i64 {
        SampleSource::offset_fs(self, i)
    }
    fn duration_fs(&self, i: usize) -> i64 {
        SampleSource::duration_fs(self, i)
    }
    fn text(&self, i: usize) -> String {
        self.samples[i].text()
    }
    fn color(&self, i: usize) -> SymbolColor {
        self.samples[i].color()
    }
}

#[duplicate_item(
    SymWave                    Geo;
    [ SparseSymbolWaveform ]   [ SparseWaveform ];
    [ UniformSymbolWaveform ]  [ UniformWaveform ];
)]
/// Protocol symbol stream, one arm per symbol alphabet in the crate.
#[derive(Clone, Debug, PartialEq)]
pub enum SymWave {
    I2c(Geo<I2cSymbol>),
    I2cEeprom(Geo<I2cEepromSymbol>),
    I2cRegister(Geo<I2cRegisterSymbol>),
    J1939Pdu(Geo<J1939PduSymbol>),
    Jtag(Geo<JtagSymbol>),
    Usb2Pma(Geo<Usb2PmaSymbol>),
    Usb2Pcs(Geo<Usb2PcsSymbol>),
    Usb2Packet(Geo<Usb2PacketSymbol>),
    Code8b10b(Geo<CodeSymbol>),
    Training(Geo<TrainingSymbol>),
    Ltssm(Geo<LtssmSymbol>),
    Block128b130b(Geo<BlockSymbol>),
    Gen3(Geo<Gen3Symbol>),
    Autoneg(Geo<AutonegSymbol>),
    AutonegCode(Geo<AutonegCodeword>),
    BaseX(Geo<BaseXSymbol>),
    Sgmii(Geo<SgmiiSymbol>),
    Espi(Geo<EspiSymbol>),
    DpAux(Geo<DpAuxSymbol>),
}

#[duplicate_item(
    SymWave;
    [ SparseSymbolWaveform ];
    [ UniformSymbolWaveform ];
)]
impl SymWave {
    /// View the stream through the geometry-agnostic rendering interface.
    pub fn as_samples(&self) -> &dyn SymbolSamples {
        match self {
            Self::I2c(w) => w,
            Self::I2cEeprom(w) => w,
            Self::I2cRegister(w) => w,
            Self::J1939Pdu(w) => w,
            Self::Jtag(w) => w,
            Self::Usb2Pma(w) => w,
            Self::Usb2Pcs(w) => w,
            Self::Usb2Packet(w) => w,
            Self::Code8b10b(w) => w,
            Self::Training(w) => w,
            Self::Ltssm(w) => w,
            Self::Block128b130b(w) => w,
            Self::Gen3(w) => w,
            Self::Autoneg(w) => w,
            Self::AutonegCode(w) => w,
            Self::BaseX(w) => w,
            Self::Sgmii(w) => w,
            Self::Espi(w) => w,
            Self::DpAux(w) => w,
        }
    }

    pub fn len(&self) -> usize {
        self.as_samples().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timebase(&self) -> Timebase {
        *self.as_samples().timebase()
    }

    pub fn revision(&self) -> u64 {
        self.as_samples().revision()
    }
}

/// A captured or derived waveform of any geometry and sample type.
#[derive(Clone, Debug, PartialEq)]
pub enum Waveform {
    UniformAnalog(UniformWaveform<f32>),
    SparseAnalog(SparseWaveform<f32>),
    UniformDigital(UniformWaveform<bool>),
    SparseDigital(SparseWaveform<bool>),
    UniformSymbol(UniformSymbolWaveform),
    SparseSymbol(SparseSymbolWaveform),
}

/// Borrowed view of a digital waveform of either geometry.
#[derive(Clone, Copy)]
pub enum Digital<'a> {
    Uniform(&'a UniformWaveform<bool>),
    Sparse(&'a SparseWaveform<bool>),
}

/// Borrowed view of an analog waveform of either geometry.
#[derive(Clone, Copy)]
pub enum Analog<'a> {
    Uniform(&'a UniformWaveform<f32>),
    Sparse(&'a SparseWaveform<f32>),
}

#[duplicate_item(
    View        value_ty;
    [ Digital ] [ bool ];
    [ Analog ]  [ f32 ];
)]
impl<'a> SampleSource<value_ty> for View<'a> {
    #[inline]
    fn len(&self) -> usize {
        match self {
            Self::Uniform(w) => w.samples.len(),
            Self::Sparse(w) => w.samples.len(),
        }
    }
    #[inline]
    fn at(&self, i: usize) -> value_ty {
        match self {
            Self::Uniform(w) => w.samples[i],
            Self::Sparse(w) => w.samples[i],
        }
    }
    #[inline]
    fn offset(&self, i: usize) -> i64 {
        match self {
            Self::Uniform(_) => i as i64,
            Self::Sparse(w) => w.offsets[i],
        }
    }
    #[inline]
    fn duration(&self, i: usize) -> i64 {
        match self {
            Self::Uniform(_) => 1,
            Self::Sparse(w) => w.durations[i],
        }
    }
    #[inline]
    fn gap(&self, i: usize) -> i64 {
        match self {
            Self::Uniform(_) => 1,
            Self::Sparse(w) => SampleSource::gap(*w, i),
        }
    }
    #[inline]
    fn timebase(&self) -> &Timebase {
        match self {
            Self::Uniform(w) => &w.timebase,
            Self::Sparse(w) => &w.timebase,
        }
    }
    #[inline]
    fn identity(&self) -> (u64, u64) {
        match self {
            Self::Uniform(w) => (w.id, w.revision),
            Self::Sparse(w) => (w.id, w.revision),
        }
    }
}

impl Waveform {
    pub fn len(&self) -> usize {
        match self {
            Waveform::UniformAnalog(w) => w.len(),
            Waveform::SparseAnalog(w) => w.len(),
            Waveform::UniformDigital(w) => w.len(),
            Waveform::SparseDigital(w) => w.len(),
            Waveform::UniformSymbol(w) => w.len(),
            Waveform::SparseSymbol(w) => w.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timebase(&self) -> Timebase {
        match self {
            Waveform::UniformAnalog(w) => w.timebase,
            Waveform::SparseAnalog(w) => w.timebase,
            Waveform::UniformDigital(w) => w.timebase,
            Waveform::SparseDigital(w) => w.timebase,
            Waveform::UniformSymbol(w) => w.timebase(),
            Waveform::SparseSymbol(w) => w.timebase(),
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            Waveform::UniformAnalog(w) => w.revision(),
            Waveform::SparseAnalog(w) => w.revision(),
            Waveform::UniformDigital(w) => w.revision(),
            Waveform::SparseDigital(w) => w.revision(),
            Waveform::UniformSymbol(w) => w.revision(),
            Waveform::SparseSymbol(w) => w.revision(),
        }
    }

    pub(crate) fn set_revision(&mut self, revision: u64) {
        match self {
            Waveform::UniformAnalog(w) => w.set_revision(revision),
            Waveform::SparseAnalog(w) => w.set_revision(revision),
            Waveform::UniformDigital(w) => w.set_revision(revision),
            Waveform::SparseDigital(w) => w.set_revision(revision),
            Waveform::UniformSymbol(w) => match w {
                UniformSymbolWaveform::I2c(x) => x.set_revision(revision),
                UniformSymbolWaveform::I2cEeprom(x) => x.set_revision(revision),
                UniformSymbolWaveform::I2cRegister(x) => x.set_revision(revision),
                UniformSymbolWaveform::J1939Pdu(x) => x.set_revision(revision),
                UniformSymbolWaveform::Jtag(x) => x.set_revision(revision),
                UniformSymbolWaveform::Usb2Pma(x) => x.set_revision(revision),
                UniformSymbolWaveform::Usb2Pcs(x) => x.set_revision(revision),
                UniformSymbolWaveform::Usb2Packet(x) => x.set_revision(revision),
                UniformSymbolWaveform::Code8b10b(x) => x.set_revision(revision),
                UniformSymbolWaveform::Training(x) => x.set_revision(revision),
                UniformSymbolWaveform::Ltssm(x) => x.set_revision(revision),
                UniformSymbolWaveform::Block128b130b(x) => x.set_revision(revision),
                UniformSymbolWaveform::Gen3(x) => x.set_revision(revision),
                UniformSymbolWaveform::Autoneg(x) => x.set_revision(revision),
                UniformSymbolWaveform::AutonegCode(x) => x.set_revision(revision),
                UniformSymbolWaveform::BaseX(x) => x.set_revision(revision),
                UniformSymbolWaveform::Sgmii(x) => x.set_revision(revision),
                UniformSymbolWaveform::Espi(x) => x.set_revision(revision),
                UniformSymbolWaveform::DpAux(x) => x.set_revision(revision),
            },
            Waveform::SparseSymbol(w) => match w {
                SparseSymbolWaveform::I2c(x) => x.set_revision(revision),
                SparseSymbolWaveform::I2cEeprom(x) => x.set_revision(revision),
                SparseSymbolWaveform::I2cRegister(x) => x.set_revision(revision),
                SparseSymbolWaveform::J1939Pdu(x) => x.set_revision(revision),
                SparseSymbolWaveform::Jtag(x) => x.set_revision(revision),
                SparseSymbolWaveform::Usb2Pma(x) => x.set_revision(revision),
                SparseSymbolWaveform::Usb2Pcs(x) => x.set_revision(revision),
                SparseSymbolWaveform::Usb2Packet(x) => x.set_revision(revision),
                SparseSymbolWaveform::Code8b10b(x) => x.set_revision(revision),
                SparseSymbolWaveform::Training(x) => x.set_revision(revision),
                SparseSymbolWaveform::Ltssm(x) => x.set_revision(revision),
                SparseSymbolWaveform::Block128b130b(x) => x.set_revision(revision),
                SparseSymbolWaveform::Gen3(x) => x.set_revision(revision),
                SparseSymbolWaveform::Autoneg(x) => x.set_revision(revision),
                SparseSymbolWaveform::AutonegCode(x) => x.set_revision(revision),
                SparseSymbolWaveform::BaseX(x) => x.set_revision(revision),
                SparseSymbolWaveform::Sgmii(x) => x.set_revision(revision),
                SparseSymbolWaveform::Espi(x) => x.set_revision(revision),
                SparseSymbolWaveform::DpAux(x) => x.set_revision(revision),
            },
        }
    }

    /// Borrow as a digital waveform of either geometry.
    pub fn as_digital(&self) -> Option<Digital<'_>> {
        match self {
            Waveform::UniformDigital(w) => Some(Digital::Uniform(w)),
            Waveform::SparseDigital(w) => Some(Digital::Sparse(w)),
            _ => None,
        }
    }

    /// Borrow as an analog waveform of either geometry.
    pub fn as_analog(&self) -> Option<Analog<'_>> {
        match self {
            Waveform::UniformAnalog(w) => Some(Analog::Uniform(w)),
            Waveform::SparseAnalog(w) => Some(Analog::Sparse(w)),
            _ => None,
        }
    }

    pub fn as_sparse_digital(&self) -> Option<&SparseWaveform<bool>> {
        match self {
            Waveform::SparseDigital(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_uniform_analog(&self) -> Option<&UniformWaveform<f32>> {
        match self {
            Waveform::UniformAnalog(w) => Some(w),
            _ => None,
        }
    }

    /// Rendering view of a protocol symbol stream of either geometry.
    pub fn as_symbols(&self) -> Option<&dyn SymbolSamples> {
        match self {
            Waveform::UniformSymbol(w) => Some(w.as_samples()),
            Waveform::SparseSymbol(w) => Some(w.as_samples()),
            _ => None,
        }
    }
}

#[duplicate_item(
    method              SymTy                 arm;
    [ as_i2c ]          [ I2cSymbol ]         [ I2c ];
    [ as_i2c_eeprom ]   [ I2cEepromSymbol ]   [ I2cEeprom ];
    [ as_i2c_register ] [ I2cRegisterSymbol ] [ I2cRegister ];
    [ as_j1939_pdu ]    [ J1939PduSymbol ]    [ J1939Pdu ];
    [ as_jtag ]         [ JtagSymbol ]        [ Jtag ];
    [ as_usb2_pma ]    [ Usb2PmaSymbol ]    [ Usb2Pma ];
    [ as_usb2_pcs ]    [ Usb2PcsSymbol ]    [ Usb2Pcs ];
    [ as_usb2_packet ] [ Usb2PacketSymbol ] [ Usb2Packet ];
    [ as_8b10b ]       [ CodeSymbol ]       [ Code8b10b ];
    [ as_training ]    [ TrainingSymbol ]   [ Training ];
    [ as_ltssm ]       [ LtssmSymbol ]      [ Ltssm ];
    [ as_128b130b ]    [ BlockSymbol ]      [ Block128b130b ];
    [ as_gen3 ]        [ Gen3Symbol ]       [ Gen3 ];
    [ as_autoneg ]     [ AutonegSymbol ]    [ Autoneg ];
    [ as_autoneg_code ] [ AutonegCodeword ]  [ AutonegCode ];
    [ as_basex ]       [ BaseXSymbol ]      [ BaseX ];
    [ as_sgmii ]       [ SgmiiSymbol ]      [ Sgmii ];
    [ as_espi ]        [ EspiSymbol ]       [ Espi ];
    [ as_dp_aux ]      [ DpAuxSymbol ]      [ DpAux ];
)]
impl Waveform {
    /// Borrow the sparse symbol stream if it carries this protocol.
    pub fn method(&self) -> Option<&SparseWaveform<SymTy>> {
        match self {
            Waveform::SparseSymbol(SparseSymbolWaveform::arm(w)) => Some(w),
            _ => None,
        }
    }
}
