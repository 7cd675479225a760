//! USB 1.x/2.0 bus activity indicator.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::PacketMerger;
use crate::parameter::ParamSet;
use crate::usb2_pcs::Usb2PcsSymbol;
use crate::waveform::Waveform;

/// Digital filter that is high from each SYNC through the end of its EOP,
/// a bus-busy strip for dense captures.
#[derive(Clone, Default)]
pub struct Usb2ActivityDecoder {
    params: ParamSet,
}

impl Usb2ActivityDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketMerger for Usb2ActivityDecoder {}

impl Filter for Usb2ActivityDecoder {
    fn protocol_name(&self) -> &'static str {
        "USB 1.0/2.x Activity"
    }

    fn category(&self) -> Category {
        Category::Serial
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["din"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::digital("data")]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port == 0 && stype == StreamType::Protocol(SymbolKind::Usb2Pcs)
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
        let Some(din) = ctx.input(0).and_then(Waveform::as_usb2_pcs) else {
            ctx.clear_outputs();
            return;
        };

        let cap = ctx.outputs[0].setup_sparse_digital(din.timebase);

        // Low until a SYNC, high until the end of the EOP.
        let mut last = 0i64;
        for i in 0..din.len() {
            match din.samples[i] {
                Usb2PcsSymbol::Sync => {
                    cap.push(last, din.offsets[i] - last, false);
                    last = din.offsets[i];
                }
                Usb2PcsSymbol::Eop => {
                    let end = din.offsets[i] + din.durations[i];
                    cap.push(last, end - last, true);
                    last = end;
                }
                _ => {}
            }
        }
    }
}
