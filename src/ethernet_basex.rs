//! 1000base-X autonegotiation and SGMII frame extraction over 8b/10b.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::{Packet, PacketColor, PacketMerger};
use crate::parameter::{ParamSet, ParamType};
use crate::waveform::{
    SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Waveform,
};

/// K28.5 comma preceding a configuration ordered set.
const COMMA: u8 = 0xbc;
/// D21.5, the /C1/ header.
const C1: u8 = 0xb5;
/// D2.2, the /C2/ header.
const C2: u8 = 0x42;
/// K27.7 start of packet.
const SOP: u8 = 0xfb;
/// K29.7 end of packet.
const EOP: u8 = 0xfd;
/// K23.7 carrier extend.
const EXTEND: u8 = 0xf7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaseXType {
    /// Plain 802.3z base page.
    BasePage,
    /// SGMII control word (bit 0 set).
    Sgmii,
}

/// One 16-bit configuration register from a /C1/ or /C2/ ordered set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BaseXSymbol {
    pub stype: BaseXType,
    pub value: u16,
}

impl SymbolText for BaseXSymbol {
    fn text(&self) -> String {
        let mut ret = String::new();
        match self.stype {
            BaseXType::BasePage => {
                if self.value & 0x8000 != 0 {
                    ret += "NP ";
                }
                if self.value & 0x4000 != 0 {
                    ret += "ACK ";
                }
                if self.value & 0x0020 != 0 {
                    ret += "Full ";
                }
                if self.value & 0x0040 != 0 {
                    ret += "Half ";
                }
                match (self.value >> 7) & 3 {
                    1 => ret += "AsymPause ",
                    2 => ret += "SymPause ",
                    3 => ret += "SymAsymPause ",
                    _ => {}
                }
                match (self.value >> 12) & 3 {
                    1 => ret += "Offline ",
                    2 => ret += "LinkFail ",
                    3 => ret += "AnegFail ",
                    _ => {}
                }
            }
            BaseXType::Sgmii => {
                ret += if self.value & 0x8000 != 0 { "Up " } else { "Down " };
                match (self.value >> 10) & 3 {
                    0 => ret += "10/",
                    1 => ret += "100/",
                    2 => ret += "1000/",
                    _ => {}
                }
                ret += if self.value & 0x1000 != 0 { "Full " } else { "Half " };
            }
        }
        if ret.is_empty() {
            return "Empty".to_string();
        }
        ret.trim_end().to_string()
    }

    fn color(&self) -> SymbolColor {
        match self.stype {
            BaseXType::BasePage => SymbolColor::Data,
            BaseXType::Sgmii => SymbolColor::Control,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Header,
    First,
    Second,
}

/// Decoder for /C1/ and /C2/ configuration ordered sets on a 1000base-X or
/// SGMII link. SGMII control words are recognized by bit 0 of the register.
#[derive(Clone, Default)]
pub struct BaseXAutonegDecoder {
    params: ParamSet,
}

impl BaseXAutonegDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketMerger for BaseXAutonegDecoder {
    fn can_merge(&self, first: &Packet, _cur: &Packet, next: &Packet) -> bool {
        // Repeats of the same register value collapse.
        first.header("Type") == next.header("Type") && first.header("Info") == next.header("Info")
    }

    fn create_merged_header(&self, packets: &[Packet], i: usize) -> Packet {
        let first = &packets[i];
        let mut ret = first.clone();
        for p in &packets[i + 1..] {
            if self.can_merge(first, first, p) {
                ret.len = p.offset + p.len - first.offset;
            } else {
                break;
            }
        }
        ret
    }
}

impl Filter for BaseXAutonegDecoder {
    fn protocol_name(&self) -> &'static str {
        "Ethernet - Base-X Autonegotiation"
    }

    fn category(&self) -> Category {
        Category::Serial
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["din"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::BaseX)]
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

    fn headers(&self) -> Vec<&'static str> {
        vec!["Type", "Ack", "Info"]
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
        let timescale = din.timebase.timescale;
        let trigger_phase = din.timebase.trigger_phase;

        let mut cap = SparseWaveform::new(din.timebase);
        let packets = &mut *ctx.packets;

        let mut state = State::Idle;
        let mut tstart = 0i64;
        let mut low = 0u8;

        for i in 0..din.len() {
            let s = din.samples[i];
            let tnow = din.offsets[i];
            match state {
                State::Idle => {
                    if s.control && s.data == COMMA {
                        tstart = tnow;
                        state = State::Header;
                    }
                }
                State::Header => {
                    state = if !s.control && (s.data == C1 || s.data == C2) {
                        State::First
                    } else {
                        State::Idle
                    };
                }
                State::First => {
                    if !s.control {
                        low = s.data;
                        state = State::Second;
                    } else {
                        state = State::Idle;
                    }
                }
                State::Second => {
                    if !s.control {
                        let code = low as u16 | (s.data as u16) << 8;
                        let stype = if code & 1 != 0 {
                            BaseXType::Sgmii
                        } else {
                            BaseXType::BasePage
                        };
                        let sym = BaseXSymbol { stype, value: code };
                        cap.push(tstart, din.durations[i] + tnow - tstart, sym);

                        let mut pack = Packet::new(tstart * timescale + trigger_phase);
                        pack.len = (tnow + din.durations[i] - tstart) * timescale;
                        pack.set_header(
                            "Type",
                            if stype == BaseXType::Sgmii { "SGMII" } else { "Base" },
                        );
                        pack.set_header("Ack", if code & 0x4000 != 0 { "1" } else { "0" });
                        pack.set_header("Info", sym.text());
                        pack.data.push((code >> 8) as u8);
                        pack.data.push((code & 0xff) as u8);
                        pack.color = PacketColor::DataRead;
                        packets.push(pack);
                    }
                    state = State::Idle;
                }
            }
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::BaseX(cap)));
    }
}

/// One element of an SGMII frame stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SgmiiSymbol {
    /// K27.7 start of packet, rendered as the first preamble byte.
    Start,
    Data(u8),
    /// K29.7 end of packet (or carrier extend).
    End,
    Error,
}

impl SymbolText for SgmiiSymbol {
    fn text(&self) -> String {
        match self {
            SgmiiSymbol::Start => "SOF".to_string(),
            SgmiiSymbol::Data(d) => format!("{d:02x}"),
            SgmiiSymbol::End => "EOF".to_string(),
            SgmiiSymbol::Error => "ERROR".to_string(),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            SgmiiSymbol::Start | SgmiiSymbol::End => SymbolColor::Control,
            SgmiiSymbol::Data(_) => SymbolColor::Data,
            SgmiiSymbol::Error => SymbolColor::Error,
        }
    }
}

pub const SPEED_10M: i64 = 0;
pub const SPEED_100M: i64 = 1;
pub const SPEED_1000M: i64 = 2;

const SPEED: &str = "Speed";

/// Extracts frame byte streams from an SGMII 8b/10b lane. At 10 and 100
/// Mbps each byte is repeated to pad the gigabit symbol rate, so only every
/// Nth symbol is kept.
#[derive(Clone)]
pub struct SgmiiDecoder {
    params: ParamSet,
}

impl Default for SgmiiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SgmiiDecoder {
    pub fn new() -> Self {
        let mut params = ParamSet::new();
        let speed = params.declare(SPEED, ParamType::Enum);
        speed.add_enum_value("10 Mbps", SPEED_10M);
        speed.add_enum_value("100 Mbps", SPEED_100M);
        speed.add_enum_value("1000 Mbps", SPEED_1000M);
        speed.set_int(SPEED_1000M);
        Self { params }
    }
}

impl PacketMerger for SgmiiDecoder {}

impl Filter for SgmiiDecoder {
    fn protocol_name(&self) -> &'static str {
        "Ethernet - SGMII"
    }

    fn category(&self) -> Category {
        Category::Serial
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["din"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::Sgmii)]
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

    fn headers(&self) -> Vec<&'static str> {
        vec!["Len"]
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
        let timescale = din.timebase.timescale;
        let len = din.len();

        let delta = match self.params.int_value(SPEED) {
            SPEED_10M => 100,
            SPEED_100M => 10,
            _ => 1,
        };

        let mut cap = SparseWaveform::new(din.timebase);
        let packets = &mut *ctx.packets;

        let mut i = 0;
        while i < len {
            let symbol = din.samples[i];

            // K27.7 starts a frame; anything else between frames is idle or
            // autonegotiation, which the base-X decoder handles.
            if !(symbol.control && symbol.data == SOP) {
                i += 1;
                continue;
            }
            cap.push(din.offsets[i], din.durations[i], SgmiiSymbol::Start);

            let mut pack = Packet::new(din.offsets[i] * timescale);
            i += 1;

            let mut error = false;
            while i + delta < len {
                let s = din.samples[i];
                if s.control {
                    // K29.7 ends the frame; K23.7 carrier extend can
                    // trail it.
                    if s.data != EOP && s.data != EXTEND {
                        error = true;
                    }
                    break;
                }
                cap.push(
                    din.offsets[i],
                    din.offsets[i + delta] - din.offsets[i],
                    SgmiiSymbol::Data(s.data),
                );
                pack.data.push(s.data);
                i += delta;
            }

            if error {
                cap.push(din.offsets[i], din.durations[i], SgmiiSymbol::Error);
            } else if i < len {
                cap.push(din.offsets[i], din.durations[i], SgmiiSymbol::End);
                pack.len = (din.offsets[i] + din.durations[i]) * timescale - pack.offset;
                let nbytes = pack.data.len();
                pack.set_header("Len", nbytes.to_string());
                packets.push(pack);
            }
            i += 1;
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Sgmii(cap)));
    }
}
