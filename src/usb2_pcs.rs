//! USB 1.x/2.0 physical coding sublayer decoder: line states to NRZI-decoded
//! bytes with sync detection and bit unstuffing.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::PacketMerger;
use crate::parameter::ParamSet;
use crate::usb2_pma::Usb2PmaSymbol;
use crate::waveform::{
    SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Waveform,
};
use log::trace;

/// One decoded PCS event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Usb2PcsSymbol {
    Sync,
    Eop,
    Reset,
    Data(u8),
    Error,
}

impl SymbolText for Usb2PcsSymbol {
    fn text(&self) -> String {
        match self {
            Usb2PcsSymbol::Sync => "SYNC".to_string(),
            Usb2PcsSymbol::Eop => "EOP".to_string(),
            Usb2PcsSymbol::Reset => "RESET".to_string(),
            Usb2PcsSymbol::Data(d) => format!("{d:02x}"),
            Usb2PcsSymbol::Error => "ERR".to_string(),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            Usb2PcsSymbol::Sync | Usb2PcsSymbol::Eop => SymbolColor::Preamble,
            Usb2PcsSymbol::Reset => SymbolColor::Control,
            Usb2PcsSymbol::Data(_) => SymbolColor::Data,
            Usb2PcsSymbol::Error => SymbolColor::Error,
        }
    }
}

const UI_WIDTH_480: i64 = 2_083_000;
const UI_WIDTH_12: i64 = 83_333_000;
const UI_WIDTH_1: i64 = 666_666_000;

#[derive(Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Idle,
    Sync,
    Data,
}

/// Decoder from the PMA line-state stream to bytes: detects the KJKJKJKK
/// sync pattern, infers the bus speed from the first K width, then
/// NRZI-decodes with bit unstuffing until EOP.
#[derive(Clone, Default)]
pub struct Usb2PcsDecoder {
    params: ParamSet,
}

impl Usb2PcsDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

struct Decode<'a> {
    din: &'a SparseWaveform<Usb2PmaSymbol>,
    cap: SparseWaveform<Usb2PcsSymbol>,
    state: DecodeState,
    ui_width: i64,
    count: usize,
    data: u8,
    offset: i64,
}

impl<'a> Decode<'a> {
    fn sample_width_ui(&self, i: usize) -> f32 {
        (self.din.durations[i] * self.din.timebase.timescale) as f32 / self.ui_width as f32
    }

    fn iteration_idle(&mut self, i: usize) {
        let sample_fs = self.din.durations[i] * self.din.timebase.timescale;
        match self.din.samples[i] {
            // J is just more idle.
            Usb2PmaSymbol::J => {}

            // Going to K starts a sync symbol. The width of the K tells the
            // clock speed.
            Usb2PmaSymbol::K => {
                self.offset = self.din.offsets[i];
                self.ui_width = if sample_fs < 2 * UI_WIDTH_480 {
                    UI_WIDTH_480
                } else if sample_fs < 2 * UI_WIDTH_12 {
                    UI_WIDTH_12
                } else {
                    UI_WIDTH_1
                };
                trace!("usb2 sync start, ui width {} fs", self.ui_width);
                self.state = DecodeState::Sync;
                self.count = 0;
            }

            Usb2PmaSymbol::Se0 => {
                // A long SE0 outside a packet is a bus reset.
                if sample_fs > 2_500_000_000 {
                    self.cap.push(
                        self.din.offsets[i],
                        self.din.durations[i],
                        Usb2PcsSymbol::Reset,
                    );
                }
            }

            Usb2PmaSymbol::Se1 => {
                self.cap.push(
                    self.din.offsets[i],
                    self.din.durations[i],
                    Usb2PcsSymbol::Error,
                );
            }
        }
    }

    fn sync_error(&mut self, i: usize) {
        // Sync until the error happened, then an error symbol.
        self.cap.push(
            self.offset,
            self.din.offsets[i] - self.offset,
            Usb2PcsSymbol::Sync,
        );
        self.cap.push(
            self.din.offsets[i],
            self.din.durations[i],
            Usb2PcsSymbol::Error,
        );
        self.state = DecodeState::Idle;
    }

    fn iteration_sync(&mut self, i: usize) {
        let timescale = self.din.timebase.timescale;
        let width_ui = self.sample_width_ui(i);
        self.count += 1;
        let sin = self.din.samples[i];

        match self.count {
            // Odd positions should be a J, one UI long.
            1 | 3 | 5 => {
                if !(0.5..=1.5).contains(&width_ui) || sin != Usb2PmaSymbol::J {
                    self.sync_error(i);
                }
            }
            // Even positions before the last should be a K, one UI long.
            2 | 4 => {
                if !(0.5..=1.5).contains(&width_ui) || sin != Usb2PmaSymbol::K {
                    self.sync_error(i);
                }
            }
            // The last K is at least two UIs long.
            _ => {
                if width_ui < 1.5 || sin != Usb2PmaSymbol::K {
                    self.sync_error(i);
                    return;
                }

                if width_ui.round() as i64 == 2 {
                    // Packet starts with a 0 bit; sync ends at the boundary.
                    self.cap.push(
                        self.offset,
                        self.din.offsets[i] + self.din.durations[i] - self.offset,
                        Usb2PcsSymbol::Sync,
                    );
                    self.offset = self.din.offsets[i] + self.din.durations[i];
                    self.count = 0;
                    self.data = 0;
                } else {
                    // Packet begins with 1 bits; sync ends two UIs in.
                    let pdelta = 2 * self.ui_width / timescale;
                    let pstart = self.din.offsets[i] + pdelta;
                    self.cap
                        .push(self.offset, pstart - self.offset, Usb2PcsSymbol::Sync);

                    let num_ones = width_ui.round() as usize - 2;
                    self.offset = pstart + pdelta;
                    if num_ones >= 7 {
                        // Bitstuff violation.
                        self.cap.push(
                            pstart,
                            self.din.durations[i] - pdelta,
                            Usb2PcsSymbol::Error,
                        );
                        self.count = 0;
                    } else {
                        self.data = 0;
                        for _ in 0..num_ones {
                            self.data = (self.data >> 1) | 0x80;
                        }
                        self.count = num_ones;
                    }
                }
                self.state = DecodeState::Data;
            }
        }
    }

    fn iteration_data(&mut self, i: usize) {
        let timescale = self.din.timebase.timescale;
        let width_ui = self.sample_width_ui(i);
        let last_width_ui = self.sample_width_ui(i - 1);
        let sin = self.din.samples[i];

        // SE0 ends the packet.
        if sin == Usb2PmaSymbol::Se0 {
            if width_ui < 1.2 {
                self.cap.push(
                    self.din.offsets[i],
                    self.din.durations[i],
                    Usb2PcsSymbol::Error,
                );
            } else {
                self.cap.push(
                    self.din.offsets[i],
                    self.din.durations[i] + self.ui_width / timescale,
                    Usb2PcsSymbol::Eop,
                );
            }
            self.state = DecodeState::Idle;
            self.count = 0;
            return;
        } else if sin == Usb2PmaSymbol::Se1 {
            self.cap.push(
                self.din.offsets[i],
                self.din.durations[i] + self.ui_width / timescale,
                Usb2PcsSymbol::Error,
            );
            self.state = DecodeState::Idle;
            self.count = 0;
            return;
        }

        // NRZI: a run of N UIs decodes as one 0 bit then N-1 one bits. The
        // 0 after six consecutive ones is a stuffed bit and is dropped.
        let num_bits = width_ui.round() as usize;
        let last_num_bits = last_width_ui.round() as usize;
        for bit in 0..num_bits {
            if bit == 0 {
                if last_num_bits < 7 {
                    self.data >>= 1;
                } else {
                    continue;
                }
            } else {
                self.data = (self.data >> 1) | 0x80;
            }

            self.count += 1;
            if self.count == 8 {
                let mut duration = self.din.offsets[i] - self.offset;
                if bit + 1 == num_bits {
                    duration += self.din.durations[i];
                } else {
                    duration += (bit as i64 + 1) * self.ui_width / timescale;
                }
                self.cap
                    .push(self.offset, duration, Usb2PcsSymbol::Data(self.data));
                self.count = 0;
                self.data = 0;
                self.offset += duration;
            }
        }
    }
}

impl PacketMerger for Usb2PcsDecoder {}

impl Filter for Usb2PcsDecoder {
    fn protocol_name(&self) -> &'static str {
        "USB 1.0/2.x PCS"
    }

    fn category(&self) -> Category {
        Category::Serial
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["PMA"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::Usb2Pcs)]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port == 0 && stype == StreamType::Protocol(SymbolKind::Usb2Pma)
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
        let Some(din) = ctx.input(0).and_then(Waveform::as_usb2_pma) else {
            ctx.clear_outputs();
            return;
        };

        let mut dec = Decode {
            din,
            cap: SparseWaveform::new(din.timebase),
            state: DecodeState::Idle,
            ui_width: UI_WIDTH_1,
            count: 0,
            data: 0,
            offset: 0,
        };

        for i in 0..din.len() {
            match dec.state {
                DecodeState::Idle => dec.iteration_idle(i),
                DecodeState::Sync => dec.iteration_sync(i),
                DecodeState::Data => dec.iteration_data(i),
            }
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Usb2Pcs(
            dec.cap,
        )));
    }
}
