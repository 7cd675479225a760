//! JTAG TAP state machine decoder (IEEE 1149.1).

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::{Packet, PacketMerger};
use crate::parameter::ParamSet;
use crate::signal::{sample_on_edges, EdgeMode};
use crate::waveform::{
    SampleSource, SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Timebase,
    Waveform,
};

/// TAP controller state. The five unknown states walk a freshly attached
/// decoder to Test-Logic-Reset on consecutive TMS-high clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum JtagState {
    TestLogicReset,
    RunTestIdle,
    SelectDrScan,
    SelectIrScan,
    CaptureDr,
    CaptureIr,
    ShiftDr,
    ShiftIr,
    Exit1Dr,
    Exit1Ir,
    PauseDr,
    PauseIr,
    Exit2Dr,
    Exit2Ir,
    UpdateDr,
    UpdateIr,
    Unknown0,
    Unknown1,
    Unknown2,
    Unknown3,
    Unknown4,
}

impl JtagState {
    pub fn name(&self) -> &'static str {
        match self {
            JtagState::TestLogicReset => "TLR",
            JtagState::RunTestIdle => "RTI",
            JtagState::SelectDrScan => "SLDR",
            JtagState::SelectIrScan => "SLIR",
            JtagState::CaptureDr => "CDR",
            JtagState::CaptureIr => "CIR",
            JtagState::ShiftDr => "SDR",
            JtagState::ShiftIr => "SIR",
            JtagState::Exit1Dr => "E1DR",
            JtagState::Exit1Ir => "E1IR",
            JtagState::PauseDr => "PDR",
            JtagState::PauseIr => "PIR",
            JtagState::Exit2Dr => "E2DR",
            JtagState::Exit2Ir => "E2IR",
            JtagState::UpdateDr => "UDR",
            JtagState::UpdateIr => "UIR",
            JtagState::Unknown0 => "UNK0",
            JtagState::Unknown1 => "UNK1",
            JtagState::Unknown2 => "UNK2",
            JtagState::Unknown3 => "UNK3",
            JtagState::Unknown4 => "UNK4",
        }
    }

    /// Next state on a rising TCK edge with the given TMS level.
    pub fn next(&self, tms: bool) -> JtagState {
        use JtagState::*;
        if tms {
            match self {
                TestLogicReset => TestLogicReset,
                RunTestIdle => SelectDrScan,
                SelectDrScan => SelectIrScan,
                SelectIrScan => TestLogicReset,
                CaptureDr => Exit2Dr,
                CaptureIr => Exit2Ir,
                ShiftDr => Exit1Dr,
                ShiftIr => Exit1Ir,
                Exit1Dr => UpdateDr,
                Exit1Ir => UpdateIr,
                PauseDr => Exit2Dr,
                PauseIr => Exit2Ir,
                Exit2Dr => UpdateDr,
                Exit2Ir => UpdateIr,
                UpdateDr => SelectDrScan,
                UpdateIr => SelectDrScan,
                Unknown0 => Unknown1,
                Unknown1 => Unknown2,
                Unknown2 => Unknown3,
                Unknown3 => Unknown4,
                Unknown4 => TestLogicReset,
            }
        } else {
            match self {
                TestLogicReset => RunTestIdle,
                RunTestIdle => RunTestIdle,
                SelectDrScan => CaptureDr,
                SelectIrScan => CaptureIr,
                CaptureDr => ShiftDr,
                CaptureIr => ShiftIr,
                ShiftDr => ShiftDr,
                ShiftIr => ShiftIr,
                Exit1Dr => PauseDr,
                Exit1Ir => PauseIr,
                PauseDr => PauseDr,
                PauseIr => PauseIr,
                Exit2Dr => CaptureDr,
                Exit2Ir => CaptureIr,
                UpdateDr => RunTestIdle,
                UpdateIr => RunTestIdle,
                _ => Unknown0,
            }
        }
    }
}

/// One interval spent in a TAP state, with any bits shifted during it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JtagSymbol {
    pub state: JtagState,
    /// TDI bits accumulated during this interval, LSB first.
    pub idata: u8,
    /// TDO bits accumulated during this interval.
    pub odata: u8,
    /// Number of valid bits, 0 for non-shift states.
    pub len: u8,
}

impl JtagSymbol {
    pub fn new(state: JtagState, idata: u8, odata: u8, len: u8) -> Self {
        Self {
            state,
            idata,
            odata,
            len,
        }
    }
}

impl SymbolText for JtagSymbol {
    fn text(&self) -> String {
        if self.len == 0 {
            self.state.name().to_string()
        } else if self.len == 8 {
            format!("{:02x} / {:02x}", self.idata, self.odata)
        } else {
            format!(
                "{}'h{:02x} / {}'h{:02x}",
                self.len, self.idata, self.len, self.odata
            )
        }
    }

    fn color(&self) -> SymbolColor {
        match self.state {
            JtagState::Unknown0
            | JtagState::Unknown1
            | JtagState::Unknown2
            | JtagState::Unknown3
            | JtagState::Unknown4 => SymbolColor::Error,
            JtagState::ShiftIr | JtagState::ShiftDr => SymbolColor::Data,
            _ => SymbolColor::Control,
        }
    }
}

/// Decoder for the four-wire JTAG interface: samples TDI/TDO/TMS on rising
/// TCK, walks the TAP state machine, and emits IR/DR shift packets.
#[derive(Clone, Default)]
pub struct JtagDecoder {
    params: ParamSet,
}

impl JtagDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketMerger for JtagDecoder {}

impl Filter for JtagDecoder {
    fn protocol_name(&self) -> &'static str {
        "JTAG"
    }

    fn category(&self) -> Category {
        Category::Bus
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["TDI", "TDO", "TMS", "TCK"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::Jtag)]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port < 4 && stype == StreamType::Digital
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn headers(&self) -> Vec<&'static str> {
        vec!["Operation", "IR", "Bits"]
    }

    fn refresh(&mut self, ctx: &mut RefreshContext) {
        if !ctx.all_inputs_ok() {
            ctx.clear_outputs();
            return;
        }
        let (Some(tdi), Some(tdo), Some(tms), Some(tck)) = (
            ctx.digital_input(0),
            ctx.digital_input(1),
            ctx.digital_input(2),
            ctx.digital_input(3),
        ) else {
            ctx.clear_outputs();
            return;
        };

        // Sample the data lines on each rising clock edge.
        let dtdi = sample_on_edges(&tdi, &tck, EdgeMode::Rising);
        let dtdo = sample_on_edges(&tdo, &tck, EdgeMode::Rising);
        let dtms = sample_on_edges(&tms, &tck, EdgeMode::Rising);

        let mut cap = SparseWaveform::new(Timebase::fs_unit(tck.timebase()));
        let packets = &mut *ctx.packets;

        // Assume RTI before the first TMS edge.
        let mut state = JtagState::RunTestIdle;
        let mut istart = 0usize;
        let mut packstart = 0usize;
        let mut nbits = 0u8;
        let mut idata = 0u8;
        let mut odata = 0u8;
        let mut ibytes: Vec<u8> = Vec::new();
        let mut obytes: Vec<u8> = Vec::new();
        let mut irval = "??".to_string();

        let len = dtms.len().min(dtdi.len()).min(dtdo.len());
        for i in 0..len {
            let next_state = state.next(dtms.samples[i]);

            if state == JtagState::ShiftIr || state == JtagState::ShiftDr {
                idata >>= 1;
                if dtdi.samples[i] {
                    idata |= 0x80;
                }
                odata <<= 1;
                if dtdo.samples[i] {
                    odata |= 0x1;
                }
                nbits += 1;
            }

            if next_state != state {
                // Close out the sample for the previous state.
                cap.push(
                    dtms.offsets[istart],
                    dtms.offsets[i] - dtms.offsets[istart],
                    JtagSymbol::new(state, idata, odata, nbits),
                );

                if state == JtagState::ShiftIr || state == JtagState::ShiftDr {
                    // Align a partial final byte.
                    if nbits != 8 {
                        idata >>= 8 - nbits;
                    }
                    ibytes.push(idata);
                    obytes.push(odata);

                    let bits = ibytes.len() * 8 - 8 + nbits as usize;
                    let op = if state == JtagState::ShiftIr {
                        ("IR write", "IR read")
                    } else {
                        ("DR write", "DR read")
                    };

                    let mut wpack = Packet::new(dtms.offsets[packstart]);
                    wpack.set_header("Operation", op.0);
                    wpack.set_header("IR", irval.clone());
                    wpack.set_header("Bits", bits.to_string());
                    wpack.data = ibytes.clone();
                    wpack.len = dtms.offsets[i] - wpack.offset;
                    packets.push(wpack);

                    let mut rpack = Packet::new(dtms.offsets[packstart]);
                    rpack.set_header("Operation", op.1);
                    rpack.set_header("IR", irval.clone());
                    rpack.set_header("Bits", bits.to_string());
                    rpack.data = obytes.clone();
                    rpack.len = dtms.offsets[i] - rpack.offset;
                    packets.push(rpack);

                    if state == JtagState::ShiftIr {
                        irval = ibytes
                            .iter()
                            .map(|b| format!("{b:02x} "))
                            .collect::<String>();
                    }

                    ibytes.clear();
                    obytes.clear();
                    nbits = 0;
                }

                if next_state == JtagState::ShiftIr || next_state == JtagState::ShiftDr {
                    packstart = i;
                    nbits = 0;
                }

                state = next_state;
                istart = i;
            } else if nbits == 8 {
                cap.push(
                    dtms.offsets[istart],
                    dtms.offsets[i] - dtms.offsets[istart],
                    JtagSymbol::new(state, idata, odata, 8),
                );
                ibytes.push(idata);
                obytes.push(odata);
                istart = i;
                nbits = 0;
            }
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Jtag(cap)));
    }
}
