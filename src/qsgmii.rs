//! QSGMII lane demultiplexer.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::ibm8b10b::{CodeSymbol, K28_1, K28_5};
use crate::packet::PacketMerger;
use crate::parameter::ParamSet;
use crate::waveform::{SparseSymbolWaveform, SparseWaveform, Waveform};
use log::trace;

/// Splits one QSGMII 8b/10b stream into four SGMII lanes. Symbols are
/// striped round robin; lane 0 is marked by K28.1 in place of the usual
/// K28.5 comma, which is substituted back as symbols are distributed.
#[derive(Clone, Default)]
pub struct QsgmiiDecoder {
    params: ParamSet,
}

impl QsgmiiDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketMerger for QsgmiiDecoder {}

impl Filter for QsgmiiDecoder {
    fn protocol_name(&self) -> &'static str {
        "Ethernet - QSGMII"
    }

    fn category(&self) -> Category {
        Category::Serial
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["data"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![
            OutputStream::protocol("Lane 0", SymbolKind::Code8b10b),
            OutputStream::protocol("Lane 1", SymbolKind::Code8b10b),
            OutputStream::protocol("Lane 2", SymbolKind::Code8b10b),
            OutputStream::protocol("Lane 3", SymbolKind::Code8b10b),
        ]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port == 0 && stype == StreamType::Protocol(SymbolKind::Code8b10b)
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
        let Some(din) = ctx.input(0).and_then(Waveform::as_8b10b) else {
            ctx.clear_outputs();
            return;
        };
        let len = din.len();

        // The K28.1 comma marks lane 0.
        let Some(first) = (0..len).find(|&i| din.samples[i].is_k(K28_1)) else {
            trace!("no K28.1 found, cannot determine lane phase");
            ctx.clear_outputs();
            return;
        };
        let phase = first & 3;

        let mut caps: Vec<SparseWaveform<CodeSymbol>> = (0..4)
            .map(|_| SparseWaveform::with_capacity(din.timebase, len / 4))
            .collect();

        for i in 0..len {
            let nlane = (i.wrapping_sub(phase)) & 3;
            let mut s = din.samples[i];

            // Substitute the standard comma for the lane marker.
            if s.is_k(K28_1) {
                s = CodeSymbol {
                    data: K28_5,
                    ..s
                };
            }

            // Each lane sample lasts until that lane's next symbol.
            let duration = if i + 4 >= len {
                din.durations[i]
            } else {
                din.offsets[i + 4] - din.offsets[i]
            };
            caps[nlane].push(din.offsets[i], duration, s);
        }

        for (stream, cap) in ctx.outputs.iter_mut().zip(caps) {
            stream.set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Code8b10b(cap)));
        }
    }
}
