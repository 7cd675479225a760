//! USB 1.x/2.0 physical medium attachment decoder: differential voltages to
//! J/K/SE0/SE1 line states.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::PacketMerger;
use crate::parameter::{ParamSet, ParamType};
use crate::waveform::{
    SampleSource, SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Waveform,
};

pub const SPEED_LOW: i64 = 0;
pub const SPEED_FULL: i64 = 1;
pub const SPEED_HIGH: i64 = 2;

/// USB line state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Usb2PmaSymbol {
    J,
    K,
    Se0,
    Se1,
}

impl SymbolText for Usb2PmaSymbol {
    fn text(&self) -> String {
        match self {
            Usb2PmaSymbol::J => "J".to_string(),
            Usb2PmaSymbol::K => "K".to_string(),
            Usb2PmaSymbol::Se0 => "SE0".to_string(),
            Usb2PmaSymbol::Se1 => "SE1".to_string(),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            Usb2PmaSymbol::J | Usb2PmaSymbol::K => SymbolColor::Data,
            Usb2PmaSymbol::Se0 => SymbolColor::Preamble,
            // SE1 is an invalid bus state.
            Usb2PmaSymbol::Se1 => SymbolColor::Error,
        }
    }
}

const SPEED: &str = "Speed";

/// Classifies each sample of the D+/D- pair into a line state, absorbing
/// SE0/SE1 glitches shorter than the per-speed transition time.
#[derive(Clone)]
pub struct Usb2PmaDecoder {
    params: ParamSet,
}

impl Default for Usb2PmaDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Usb2PmaDecoder {
    pub fn new() -> Self {
        let mut params = ParamSet::new();
        let speed = params.declare(SPEED, ParamType::Enum);
        speed.add_enum_value("Low (1.5 Mbps)", SPEED_LOW);
        speed.add_enum_value("Full (12 Mbps)", SPEED_FULL);
        speed.add_enum_value("High (480 Mbps)", SPEED_HIGH);
        speed.set_int(SPEED_FULL);
        Self { params }
    }
}

impl PacketMerger for Usb2PmaDecoder {}

impl Filter for Usb2PmaDecoder {
    fn protocol_name(&self) -> &'static str {
        "USB 1.0/2.x PMA"
    }

    fn category(&self) -> Category {
        Category::Serial
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["D+", "D-"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::Usb2Pma)]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port < 2 && stype == StreamType::Analog
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
        let (Some(din_p), Some(din_n)) = (ctx.analog_input(0), ctx.analog_input(1)) else {
            ctx.clear_outputs();
            return;
        };
        let len = din_p.len().min(din_n.len());
        let timescale = din_p.timebase().timescale;

        let speed = self.params.int_value(SPEED);
        let threshold: f32 = if speed == SPEED_HIGH { 0.2 } else { 0.4 };
        let transition_time: i64 = match speed {
            // 1 UI
            SPEED_HIGH => 2_083_000,
            // TFST = 14 ns (section 7.1.4.1)
            SPEED_FULL => 14_000_000,
            // TLST = 210 ns (section 7.1.4.1)
            _ => 210_000_000,
        };

        let mut cap = SparseWaveform::new(*din_p.timebase());
        for i in 0..len {
            let vp = din_p.at(i);
            let vn = din_n.at(i);
            let bp = vp > threshold;
            let bn = vn > threshold;
            let vdiff = vp - vn;

            let stype = if vdiff.abs() > threshold {
                // Low speed has inverted J/K polarity.
                if speed == SPEED_FULL || speed == SPEED_HIGH {
                    if vdiff > 0.0 {
                        Usb2PmaSymbol::J
                    } else {
                        Usb2PmaSymbol::K
                    }
                } else if vdiff > 0.0 {
                    Usb2PmaSymbol::K
                } else {
                    Usb2PmaSymbol::J
                }
            } else if bp && bn {
                Usb2PmaSymbol::Se1
            } else {
                Usb2PmaSymbol::Se0
            };

            // First sample goes as-is.
            if cap.is_empty() {
                cap.push(din_p.offset(i), din_p.duration(i), stype);
                continue;
            }

            // Same state? Extend the existing sample.
            let iold = cap.len() - 1;
            let oldtype = cap.samples[iold];
            if oldtype == stype {
                cap.durations[iold] += din_p.duration(i);
                continue;
            }

            // Absorb SE0/SE1 states shorter than the transition time.
            let last_fs = cap.durations[iold] * timescale;
            if matches!(oldtype, Usb2PmaSymbol::Se0 | Usb2PmaSymbol::Se1)
                && last_fs < transition_time
            {
                cap.samples[iold] = stype;
                cap.durations[iold] += din_p.duration(i);
                continue;
            }

            cap.push(din_p.offset(i), din_p.duration(i), stype);
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Usb2Pma(cap)));
    }
}
