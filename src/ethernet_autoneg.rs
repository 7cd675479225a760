//! Ethernet twisted-pair autonegotiation page decoder.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::{Packet, PacketColor, PacketMerger};
use crate::parameter::ParamSet;
use crate::waveform::{
    SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Waveform,
};

pub const ACK: u16 = 0x4000;
pub const ACK2: u16 = 0x1000;
pub const MP: u16 = 0x2000;
pub const NP: u16 = 0x8000;
pub const TOGGLE: u16 = 0x800;

/// Raw 16-bit autonegotiation codeword recovered from an FLP burst.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutonegCodeword(pub u16);

impl SymbolText for AutonegCodeword {
    fn text(&self) -> String {
        format!("{:04x}", self.0)
    }

    fn color(&self) -> SymbolColor {
        SymbolColor::Data
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageType {
    BasePage,
    Ack,
    MessagePage,
    UnformattedPage,
    Tech1000BaseT0,
    Tech1000BaseT1,
    EeeTech,
}

/// One classified page of the negotiation, with its raw codeword.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutonegSymbol {
    pub ptype: PageType,
    pub code: u16,
}

impl AutonegSymbol {
    pub fn new(ptype: PageType, code: u16) -> Self {
        Self { ptype, code }
    }
}

fn base_page_text(code: u16) -> String {
    let mut s = String::new();
    match code & 0x1f {
        1 => s += "802.3: ",
        2 => s += "802.9: ",
        _ => s += "Unknown selector: ",
    }
    if code & 0x0020 != 0 {
        s += "10bT ";
    }
    if code & 0x0040 != 0 {
        s += "10bT/full ";
    }
    if code & 0x0080 != 0 {
        s += "100bTX ";
    }
    if code & 0x0100 != 0 {
        s += "100bTX/full ";
    }
    if code & 0x0200 != 0 {
        s += "100bT4 ";
    }
    if code & 0x0400 != 0 {
        s += "Pause ";
    }
    if code & TOGGLE != 0 {
        s += "Asym pause ";
    }
    if code & 0x2000 != 0 {
        s += "Remote fault ";
    }
    s.trim_end().to_string()
}

impl SymbolText for AutonegSymbol {
    fn text(&self) -> String {
        match self.ptype {
            PageType::BasePage => base_page_text(self.code),
            PageType::Ack => "ACK".to_string(),
            PageType::MessagePage => match self.code & 0x7ff {
                1 => "Null".to_string(),
                8 => "1000BASE-T".to_string(),
                10 => "EEE".to_string(),
                m => format!("Message {m}"),
            },
            PageType::Tech1000BaseT0 => {
                let mut s = String::new();
                if self.code & 0x001 != 0 {
                    s += "1000bT half ";
                }
                if self.code & 0x002 != 0 {
                    s += "1000bT full ";
                }
                if self.code & 0x004 != 0 {
                    s += "Multiport ";
                }
                s.trim_end().to_string()
            }
            PageType::Tech1000BaseT1 => format!("Seed {:03x}", self.code & 0x7ff),
            PageType::EeeTech => {
                let mut s = String::new();
                if self.code & 0x002 != 0 {
                    s += "100TX-EEE ";
                }
                if self.code & 0x004 != 0 {
                    s += "1000T-EEE ";
                }
                s.trim_end().to_string()
            }
            PageType::UnformattedPage => format!("{:04x}", self.code & 0x7ff),
        }
    }

    fn color(&self) -> SymbolColor {
        match self.ptype {
            PageType::Ack => SymbolColor::ChecksumOk,
            PageType::BasePage | PageType::MessagePage => SymbolColor::Control,
            _ => SymbolColor::Data,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    BasePage,
    Ack,
    NextPage,
}

/// Decoder from a codeword stream to classified pages: base page, next-page
/// message and unformatted pages, with acknowledgement tracking.
#[derive(Clone, Default)]
pub struct AutonegPageDecoder {
    params: ParamSet,
}

impl AutonegPageDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

fn make_packet(
    code: u16,
    ptype: &str,
    info: String,
    offset_fs: i64,
    len_fs: i64,
    color: PacketColor,
    with_ack2: bool,
) -> Packet {
    let mut pack = Packet::new(offset_fs);
    pack.len = len_fs;
    pack.set_header("Type", ptype);
    pack.set_header("Ack", if code & ACK != 0 { "1" } else { "0" });
    pack.set_header("Info", info);
    pack.set_header("T", if code & TOGGLE != 0 { "1" } else { "0" });
    if with_ack2 {
        pack.set_header("Ack2", if code & ACK2 != 0 { "1" } else { "0" });
    }
    pack.set_header("NP", if code & NP != 0 { "1" } else { "0" });
    pack.data.push((code >> 8) as u8);
    pack.data.push((code & 0xff) as u8);
    pack.color = color;
    pack
}

impl PacketMerger for AutonegPageDecoder {
    fn can_merge(&self, first: &Packet, _cur: &Packet, next: &Packet) -> bool {
        // Base pages and their acks collapse into one row.
        if first.header("Type") == Some("Base") && next.header("Type") == Some("Base") {
            return true;
        }

        // A message page absorbs its acks and following unformatted pages.
        if first.header("Type") == Some("Message") {
            if next.header("Type") == Some("Message")
                && (next.header("Info") == Some("ACK") || next.header("Info") == first.header("Info"))
            {
                return true;
            }
            if next.header("Type") == Some("Unformatted") {
                return true;
            }
        }

        false
    }

    fn create_merged_header(&self, packets: &[Packet], i: usize) -> Packet {
        let first = &packets[i];
        let mut ret = first.clone();
        ret.color = PacketColor::DataRead;

        if first.header("Type") == Some("Base") {
            for p in &packets[i + 1..] {
                if self.can_merge(first, first, p) {
                    ret.len = p.offset + p.len - first.offset;
                } else {
                    break;
                }
            }
        } else if first.header("Type") == Some("Message") {
            ret.set_header("Type", first.header("Info").unwrap_or("").to_string());
            let mut info = String::new();
            let mut last_t = first.header("T").unwrap_or("").to_string();

            for p in &packets[i + 1..] {
                if !self.can_merge(first, first, p) {
                    break;
                }
                // Each toggle carries one new unformatted page.
                let cur_t = p.header("T").unwrap_or("").to_string();
                if cur_t != last_t && p.header("Type") == Some("Unformatted") {
                    info += p.header("Info").unwrap_or("");
                    info += " ";
                    last_t = cur_t;
                }
                ret.len = p.offset + p.len - first.offset;
            }
            ret.set_header("Info", info.trim_end().to_string());
        }

        ret
    }
}

impl Filter for AutonegPageDecoder {
    fn protocol_name(&self) -> &'static str {
        "Ethernet - Autonegotiation Page"
    }

    fn category(&self) -> Category {
        Category::Serial
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["din"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::Autoneg)]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port == 0 && stype == StreamType::Protocol(SymbolKind::AutonegCode)
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn headers(&self) -> Vec<&'static str> {
        vec!["Type", "Ack", "Ack2", "T", "NP", "Info"]
    }

    fn refresh(&mut self, ctx: &mut RefreshContext) {
        if !ctx.all_inputs_ok() {
            ctx.clear_outputs();
            return;
        }
        let Some(din) = ctx.input(0).and_then(Waveform::as_autoneg_code) else {
            ctx.clear_outputs();
            return;
        };
        let timescale = din.timebase.timescale;
        let trigger_phase = din.timebase.trigger_phase;

        let mut cap = SparseWaveform::new(din.timebase);
        let packets = &mut *ctx.packets;

        let acks = ACK | ACK2;
        let mut state = State::Idle;
        let mut message_count = 0;
        let mut last_message = 0u16;
        let mut tstart = 0i64;
        let mut code_orig = 0u16;
        let mut last_type = String::new();

        for i in 0..din.len() {
            let code = din.samples[i].0;
            let tnow = din.offsets[i];
            let pack_off = tnow * timescale + trigger_phase;
            let pack_len = din.durations[i] * timescale;

            match state {
                // The first codeword of a conversation is a base page.
                State::Idle => {
                    if code & 0x1f == 1 {
                        state = State::BasePage;
                        tstart = tnow;
                        code_orig = code;
                        let sym = AutonegSymbol::new(PageType::BasePage, code);
                        cap.push(tnow, din.durations[i], sym);
                        packets.push(make_packet(
                            code,
                            "Base",
                            sym.text(),
                            pack_off,
                            pack_len,
                            PacketColor::DataRead,
                            false,
                        ));
                    }
                }

                State::BasePage => {
                    if code & ACK != 0 {
                        // Bit 14 set with matching content: acknowledgement.
                        let nlast = cap.len() - 1;
                        cap.durations[nlast] = tnow - tstart;

                        state = State::Ack;
                        tstart = tnow;
                        code_orig = code;
                        let sym = AutonegSymbol::new(PageType::Ack, code);
                        cap.push(tnow, din.durations[i], sym);
                        last_type = "Base".to_string();
                        packets.push(make_packet(
                            code,
                            "Base",
                            sym.text(),
                            pack_off,
                            pack_len,
                            PacketColor::Status,
                            false,
                        ));
                    } else if code == code_orig {
                        // Repeat of the same codeword; extend.
                        let nlast = cap.len() - 1;
                        cap.durations[nlast] = (tnow + din.durations[i]) - tstart;
                        let sym = AutonegSymbol::new(PageType::BasePage, code);
                        packets.push(make_packet(
                            code,
                            "Base",
                            sym.text(),
                            pack_off,
                            pack_len,
                            PacketColor::DataRead,
                            false,
                        ));
                    }
                }

                State::Ack => {
                    if code & ACK != 0 && (code & !acks) == (code_orig & !acks) {
                        let nlast = cap.len() - 1;
                        cap.durations[nlast] = (tnow + din.durations[i]) - tstart;
                        packets.push(make_packet(
                            code,
                            &last_type.clone(),
                            "ACK".to_string(),
                            pack_off,
                            pack_len,
                            PacketColor::Status,
                            true,
                        ));
                    } else {
                        // New codeword begins.
                        let nlast = cap.len() - 1;
                        cap.durations[nlast] = tnow - tstart;

                        if code & MP != 0 {
                            state = State::NextPage;
                            let sym = AutonegSymbol::new(PageType::MessagePage, code);
                            cap.push(tnow, din.durations[i], sym);
                            last_type = "Message".to_string();
                            packets.push(make_packet(
                                code,
                                "Message",
                                sym.text(),
                                pack_off,
                                pack_len,
                                PacketColor::Control,
                                true,
                            ));
                            message_count = 0;
                            last_message = code & 0x7ff;
                        } else {
                            state = State::NextPage;
                            let ptype = match (last_message, message_count) {
                                (8, 0) => PageType::Tech1000BaseT0,
                                (8, 1) => PageType::Tech1000BaseT1,
                                (10, 0) => PageType::EeeTech,
                                _ => PageType::UnformattedPage,
                            };
                            let sym = AutonegSymbol::new(ptype, code);
                            cap.push(tnow, din.durations[i], sym);
                            last_type = "Unformatted".to_string();
                            packets.push(make_packet(
                                code,
                                "Unformatted",
                                sym.text(),
                                pack_off,
                                pack_len,
                                PacketColor::DataRead,
                                true,
                            ));
                            message_count += 1;
                        }

                        tstart = tnow;
                        code_orig = code;
                    }
                }

                State::NextPage => {
                    if code & ACK != 0 {
                        let nlast = cap.len() - 1;
                        cap.durations[nlast] = tnow - tstart;

                        state = State::Ack;
                        tstart = tnow;
                        code_orig = code;
                        let sym = AutonegSymbol::new(PageType::Ack, code);
                        cap.push(tnow, din.durations[i], sym);
                        packets.push(make_packet(
                            code,
                            &last_type.clone(),
                            sym.text(),
                            pack_off,
                            pack_len,
                            PacketColor::Status,
                            true,
                        ));
                    } else if code == code_orig {
                        let nlast = cap.len() - 1;
                        cap.durations[nlast] = (tnow + din.durations[i]) - tstart;
                        packets.push(make_packet(
                            code,
                            &last_type.clone(),
                            cap.samples[nlast].text(),
                            pack_off,
                            pack_len,
                            PacketColor::DataRead,
                            true,
                        ));
                    }
                }
            }
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Autoneg(cap)));
    }
}
