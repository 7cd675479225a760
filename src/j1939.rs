//! J1939 PDU bitmask filter.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::PacketMerger;
use crate::parameter::{ParamSet, ParamType};
use crate::waveform::{SymbolColor, SymbolText, Waveform};
use log::trace;

/// One field of a J1939 protocol data unit, as produced by a CAN-layer
/// J1939 decoder or an import filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum J1939PduSymbol {
    /// Priority field; marks the start of a frame.
    Pri(u8),
    /// Parameter group number.
    Pgn(u32),
    /// Destination address, for PDU1 groups.
    Dest(u8),
    /// Source address.
    Source(u8),
    Data(u8),
}

impl SymbolText for J1939PduSymbol {
    fn text(&self) -> String {
        match self {
            J1939PduSymbol::Pri(p) => format!("Pri: {p}"),
            J1939PduSymbol::Pgn(p) => format!("PGN: {p:05x}"),
            J1939PduSymbol::Dest(d) => format!("Dest: {d:02x}"),
            J1939PduSymbol::Source(s) => format!("Src: {s:02x}"),
            J1939PduSymbol::Data(d) => format!("{d:02x}"),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            J1939PduSymbol::Pri(_) => SymbolColor::Control,
            J1939PduSymbol::Pgn(_) => SymbolColor::Address,
            J1939PduSymbol::Dest(_) | J1939PduSymbol::Source(_) => SymbolColor::Address,
            J1939PduSymbol::Data(_) => SymbolColor::Data,
        }
    }
}

const INIT_VALUE: &str = "Initial Value";
const PGN: &str = "PGN";
const BITMASK: &str = "Pattern Bitmask";
const PATTERN: &str = "Pattern Target";

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Data,
}

/// Boolean-output filter: selects one PGN on a J1939 PDU stream,
/// concatenates the payload MSB first, and goes high while
/// `(payload & mask) == pattern`. Output sample boundaries align with frame
/// boundaries.
#[derive(Clone)]
pub struct J1939BitmaskDecoder {
    params: ParamSet,
}

impl Default for J1939BitmaskDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl J1939BitmaskDecoder {
    pub fn new() -> Self {
        let mut params = ParamSet::new();
        params.declare(INIT_VALUE, ParamType::Bool);
        params.declare(PGN, ParamType::Int);
        params.declare(BITMASK, ParamType::Int);
        params.declare(PATTERN, ParamType::Int);
        Self { params }
    }
}

impl PacketMerger for J1939BitmaskDecoder {}

impl Filter for J1939BitmaskDecoder {
    fn protocol_name(&self) -> &'static str {
        "J1939 Bitmask"
    }

    fn category(&self) -> Category {
        Category::Bus
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["j1939"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::digital("data")]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port == 0 && stype == StreamType::Protocol(SymbolKind::J1939Pdu)
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn refresh(&mut self, ctx: &mut RefreshContext) {
        if !ctx.all_inputs_ok() {
            ctx.clear_outputs();
            return;
        }
        let Some(din) = ctx.input(0).and_then(Waveform::as_j1939_pdu) else {
            ctx.clear_outputs();
            return;
        };
        let len = din.len();
        let timescale = din.timebase.timescale;

        let mask = self.params.int_value(BITMASK);
        let pattern = self.params.int_value(PATTERN);
        let target = self.params.int_value(PGN) as u32;
        let init = self.params.bool_value(INIT_VALUE);

        let timebase = din.timebase;
        let cap = ctx.outputs[0].setup_sparse_digital(timebase);

        // Initial sample at time zero; its duration grows as frames match.
        cap.push(0, 0, init);

        let mut state = State::Idle;
        let mut framestart = 0i64;
        let mut payload = 0i64;

        let mut commit = |cap: &mut crate::waveform::SparseWaveform<bool>,
                          framestart: i64,
                          payload: i64| {
            let nlast = cap.len() - 1;
            cap.durations[nlast] = framestart - cap.offsets[nlast];
            cap.push(framestart, 0, (payload & mask) == pattern);
            trace!("j1939 payload = {payload:016x}");
        };

        for i in 0..len {
            let s = din.samples[i];

            match state {
                // Look for a matching PGN; anything else is uninteresting.
                State::Idle => {
                    if let J1939PduSymbol::Pgn(pgn) = s {
                        if pgn == target {
                            framestart = din.offsets[i] * timescale;
                            payload = 0;
                            state = State::Data;
                        }
                    }
                }

                // Concatenate the data bytes, MSB first. The frame's sample
                // is committed when the next frame begins.
                State::Data => match s {
                    J1939PduSymbol::Data(d) => {
                        payload = (payload << 8) | d as i64;
                    }
                    J1939PduSymbol::Pri(_) => {
                        commit(cap, framestart, payload);
                        state = State::Idle;
                    }
                    _ => {}
                },
            }

            // A priority field mid-frame means the previous frame was
            // truncated.
            if matches!(s, J1939PduSymbol::Pri(_)) {
                state = State::Idle;
            }
        }

        // Commit a frame still pending at the end of the capture.
        if state == State::Data {
            commit(cap, framestart, payload);
        }

        // Extend the last sample to the end of the capture.
        let nlast = cap.len() - 1;
        let tend = din.offsets[len - 1] * timescale;
        if tend > cap.offsets[nlast] {
            cap.durations[nlast] = tend - cap.offsets[nlast];
        } else {
            cap.durations[nlast] = 1;
        }
    }
}
