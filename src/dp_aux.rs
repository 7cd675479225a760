//! DisplayPort AUX channel decoder.
//!
//! Recovers the Manchester-coded half-duplex AUX channel from an analog
//! capture and emits both native AUX symbols and, for I2C-over-AUX traffic,
//! a second stream in I2C symbol form that the I2C overlay decoders can
//! consume.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::i2c::I2cSymbol;
use crate::packet::{Packet, PacketColor, PacketMerger};
use crate::parameter::ParamSet;
use crate::waveform::{
    SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, UniformWaveform, Waveform,
};
use log::trace;

/// One decoded AUX channel event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DpAuxSymbol {
    Error,
    Preamble,
    Sync,
    Command(u8),
    Address(u32),
    I2cAddress(u8),
    Len(u8),
    Pad,
    AuxReply(u8),
    I2cReply(u8),
    Data(u8),
    Stop,
}

pub fn command_text(cmd: u8) -> String {
    if cmd & 0x8 != 0 {
        match cmd & 0x7 {
            0 => "DP Write".to_string(),
            1 => "DP Read".to_string(),
            _ => "DP Reserved".to_string(),
        }
    } else {
        let mut ret = "I2C ".to_string();
        ret += match cmd & 0x3 {
            0 => "Write",
            1 => "Read",
            2 => "WSUR",
            _ => "RSVD",
        };
        if cmd & 0x4 != 0 {
            ret += " MOT";
        }
        ret
    }
}

pub fn aux_reply_text(reply: u8) -> &'static str {
    match reply & 3 {
        0 => "AUX_ACK",
        1 => "AUX_NACK",
        2 => "AUX_DEFER",
        _ => "RESERVED",
    }
}

pub fn i2c_reply_text(reply: u8) -> &'static str {
    match (reply >> 2) & 3 {
        0 => "I2C_ACK",
        1 => "I2C_NACK",
        2 => "I2C_DEFER",
        _ => "RESERVED",
    }
}

impl SymbolText for DpAuxSymbol {
    fn text(&self) -> String {
        match self {
            DpAuxSymbol::Error => "ERR".to_string(),
            DpAuxSymbol::Preamble => "PREAMBLE".to_string(),
            DpAuxSymbol::Sync => "SYNC".to_string(),
            DpAuxSymbol::Command(c) => command_text(*c),
            DpAuxSymbol::Address(a) => format!("Addr: {a:06x}"),
            DpAuxSymbol::I2cAddress(a) => format!("Addr: {a:02x}"),
            DpAuxSymbol::Len(l) => format!("Len: {}", *l as u32 + 1),
            DpAuxSymbol::Pad => "PAD".to_string(),
            DpAuxSymbol::AuxReply(r) => aux_reply_text(*r).to_string(),
            DpAuxSymbol::I2cReply(r) => i2c_reply_text(*r).to_string(),
            DpAuxSymbol::Data(d) => format!("{d:02x}"),
            DpAuxSymbol::Stop => "STOP".to_string(),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            DpAuxSymbol::Error => SymbolColor::Error,
            DpAuxSymbol::Preamble | DpAuxSymbol::Sync | DpAuxSymbol::Stop | DpAuxSymbol::Pad => {
                SymbolColor::Preamble
            }
            DpAuxSymbol::Command(_)
            | DpAuxSymbol::AuxReply(_)
            | DpAuxSymbol::I2cReply(_)
            | DpAuxSymbol::Len(_) => SymbolColor::Control,
            DpAuxSymbol::Address(_) | DpAuxSymbol::I2cAddress(_) => SymbolColor::Address,
            DpAuxSymbol::Data(_) => SymbolColor::Data,
        }
    }
}

/// DPCD register names for the request decoder (DP 2.0 spec table 2-183,
/// abbreviated to the registers link training actually touches).
pub fn register_name(nreg: u32) -> &'static str {
    if (0x68000..=0x68fff).contains(&nreg) {
        return "(unknown, HDCP v1.3)";
    }
    if (0x69000..=0x69fff).contains(&nreg) {
        return "(unknown, HDCP v2.2)";
    }
    match nreg {
        0x0000 => "DCPD_REV",
        0x0001 => "8B10B_MAX_LINK_RATE",
        0x0002 => "MAX_LANE_COUNT",
        0x0003 => "MAX_DOWNSPREAD",
        0x0004 => "NORP/DP_PWR_VOLTAGE_CAP",
        0x0005 => "DOWN_STREAM_PORT_PRESENT",
        0x0006 => "MAIN_LINK_CHANNEL_CODING_CAP",
        0x0007 => "DOWN_STREAM_PORT_COUNT",
        0x000c => "I2C capabilities",
        0x000e => "8B10B_TRAINING_AUX_RD_INTERVAL",
        0x0100 => "LINK_BW_SET",
        0x0101 => "LANE_COUNT_SET",
        0x0102 => "TRAINING_PATTERN_SET",
        0x0103 => "TRAINING_LANE0_SET",
        0x0104 => "TRAINING_LANE1_SET",
        0x0202 => "LANE0_1_STATUS",
        0x0203 => "LANE2_3_STATUS",
        0x0204 => "LANE_ALIGN_STATUS_UPDATED",
        0x0205 => "SINK_STATUS",
        _ => "",
    }
}

// Nominal 1 MHz UI with +-0.2 UI jitter tolerance, all in femtoseconds.
const UI_WIDTH: i64 = 1_000_000_000;
const UI_HALFWIDTH: i64 = 500_000_000;
const JITTER_TOL: i64 = 200_000_000;
const EYE_START: i64 = UI_HALFWIDTH - JITTER_TOL;
const EYE_END: i64 = UI_HALFWIDTH + JITTER_TOL;
const SYNC_WIDTH_MIN: i64 = 1_750_000_000;
const SYNC_WIDTH_MAX: i64 = 3_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameState {
    Preamble0,
    Preamble1,
    Command,
    AddrHi,
    AddrMid,
    AddrLo,
    Payload,
    Len,
    Reply,
    ReplyPad,
    I2cPad1,
    I2cPad2,
    I2cAddr,
    End1,
    End2,
}

fn find_falling_edge(i: &mut usize, cap: &UniformWaveform<f32>) -> bool {
    let mut j = *i;
    while j < cap.len() {
        if cap.samples[j] < -0.125 {
            *i = j;
            return true;
        }
        j += 1;
    }
    false
}

fn find_rising_edge(i: &mut usize, cap: &UniformWaveform<f32>) -> bool {
    let mut j = *i;
    while j < cap.len() {
        if cap.samples[j] > 0.125 {
            *i = j;
            return true;
        }
        j += 1;
    }
    false
}

fn find_edge(i: &mut usize, cap: &UniformWaveform<f32>, polarity: bool) -> bool {
    if polarity {
        find_rising_edge(i, cap)
    } else {
        find_falling_edge(i, cap)
    }
}

/// Decoder for the AUX half-duplex sideband: preamble and sync detection,
/// Manchester bit recovery, native and I2C-over-AUX request/reply parsing.
#[derive(Clone, Default)]
pub struct DpAuxDecoder {
    params: ParamSet,
}

impl DpAuxDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketMerger for DpAuxDecoder {
    fn can_merge(&self, first: &Packet, cur: &Packet, next: &Packet) -> bool {
        let ftype = first.header("Type").unwrap_or("");
        let ntype = next.header("Type").unwrap_or("");

        // Reads and writes merge with their completions.
        if ftype == "DP Read" && ntype == "AUX_ACK" {
            return true;
        }
        if ftype == "DP Write" && (ntype == "AUX_ACK" || ntype == "AUX_NACK") {
            return true;
        }

        if (ftype.starts_with("I2C Write") || ftype.starts_with("I2C Read")) && ntype == "I2C_ACK"
        {
            return true;
        }

        // Read MOT absorbs matching reads and their acks until data shows up.
        if ftype == "I2C Read MOT"
            && (ntype == "I2C Read MOT" || ntype == "I2C_ACK")
            && first.header("Address") == next.header("Address")
        {
            if !std::ptr::eq(cur, first) && !cur.data.is_empty() {
                return false;
            }
            return true;
        }

        false
    }

    fn create_merged_header(&self, packets: &[Packet], i: usize) -> Packet {
        let pack = &packets[i];
        let mut ret = Packet::new(pack.offset);
        ret.len = pack.len;
        for key in ["Type", "Address", "Length", "Info"] {
            if let Some(v) = pack.header(key) {
                ret.set_header(key, v);
            }
        }
        ret.color = pack.color;

        let ptype = pack.header("Type").unwrap_or("").to_string();

        if ptype == "DP Read" {
            if let Some(next) = packets.get(i + 1) {
                ret.data = next.data.clone();
                ret.len = next.offset + next.len - pack.offset;
                if let Some(info) = next.header("Info") {
                    if !info.is_empty() {
                        let merged = match pack.header("Info") {
                            Some(prev) if !prev.is_empty() => format!("{prev}\n{info}"),
                            _ => info.to_string(),
                        };
                        ret.set_header("Info", merged);
                    }
                }
            }
        } else if ptype == "DP Write" {
            ret.data = pack.data.clone();
            if let Some(next) = packets.get(i + 1) {
                ret.len = next.offset + next.len - pack.offset;
            }
        } else if ptype.starts_with("I2C Write") || ptype.starts_with("I2C Read") {
            ret.data = pack.data.clone();

            if !ptype.contains("MOT") {
                if let Some(next) = packets.get(i + 1) {
                    ret.len = next.offset + next.len - pack.offset;
                    ret.data.extend_from_slice(&next.data);
                }
            } else {
                ret.set_header(
                    "Type",
                    if ptype == "I2C Write MOT" {
                        "I2C Write"
                    } else {
                        "I2C Read"
                    },
                );

                for next in &packets[i + 1..] {
                    let ntype = next.header("Type").unwrap_or("");
                    if ntype != ptype && ntype != "I2C_ACK" {
                        break;
                    }
                    if pack.header("Address") != next.header("Address") {
                        break;
                    }
                    ret.len = next.offset + next.len - pack.offset;
                    ret.data.extend_from_slice(&next.data);
                    if !next.data.is_empty() {
                        break;
                    }
                }
            }
        }

        ret
    }
}

impl Filter for DpAuxDecoder {
    fn protocol_name(&self) -> &'static str {
        "DisplayPort - Aux Channel"
    }

    fn category(&self) -> Category {
        Category::Serial
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["aux"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![
            OutputStream::protocol("data", SymbolKind::DpAux),
            OutputStream::protocol("i2c", SymbolKind::I2c),
        ]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port == 0 && stype == StreamType::Analog
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn headers(&self) -> Vec<&'static str> {
        vec!["Type", "Address", "Length", "Info"]
    }

    fn refresh(&mut self, ctx: &mut RefreshContext) {
        if !ctx.all_inputs_ok() {
            ctx.clear_outputs();
            return;
        }
        let Some(din) = ctx.input(0).and_then(Waveform::as_uniform_analog) else {
            ctx.clear_outputs();
            return;
        };
        let len = din.len();
        let timescale = din.timebase.timescale;
        let trigger_phase = din.timebase.trigger_phase;
        let scaled = |i: usize| i as i64 * timescale + trigger_phase;

        let mut cap: SparseWaveform<DpAuxSymbol> = SparseWaveform::new(din.timebase);
        let mut i2ccap: SparseWaveform<I2cSymbol> = SparseWaveform::new(din.timebase);
        let packets = &mut *ctx.packets;

        let mut packet_is_request = true;
        let mut request_addr = 0u32;
        let mut last_was_i2c = false;
        let mut last_was_i2c_request = false;
        let mut last_i2c_was_write = false;
        let mut i2c_transaction_open = false;
        let mut i2c_address_sent = false;

        let mut i = 0usize;
        let mut done = false;
        while i < len && !done {
            // Falling edge of the first preamble bit.
            if !find_falling_edge(&mut i, din) {
                trace!("capture ended before finding another preamble");
                break;
            }
            trace!("start of frame at sample {i}");

            let mut current_byte = 0u8;
            let mut bitcount = 0u32;
            let mut frame_state = FrameState::Preamble0;
            let mut current_state = false;
            let mut ui_start = scaled(i);
            let mut symbol_start = i as i64;
            let mut last_edge = i as i64;
            let mut last_edge2 = i as i64;
            let mut addr_hi = 0u32;

            packets.push(Packet::new(ui_start));

            'frame: while i < len {
                // Expect an opposite polarity edge at the center of the bit.
                if !find_edge(&mut i, din, !current_state) {
                    trace!("capture ended while looking for middle of this bit");
                    done = true;
                    break;
                }

                let edgepos = scaled(i);
                let delta = edgepos - ui_start;

                // More than ten UIs with no edge means a new frame.
                if delta > 10 * UI_WIDTH {
                    trace!("premature end of frame");
                    i += 1;
                    break;
                }

                if !(EYE_START..=EYE_END).contains(&delta) {
                    // Out-of-eye edge: either part of a sync pattern, or a
                    // glitch to resynchronize over.
                    let mut good = false;
                    if delta > SYNC_WIDTH_MIN && delta < SYNC_WIDTH_MAX {
                        match frame_state {
                            // Waiting for the high-going sync pulse.
                            FrameState::Preamble0 => {
                                if current_state {
                                    // Back up two edges: last_edge points
                                    // one half bit into the sync word.
                                    cap.push(
                                        symbol_start,
                                        last_edge2 - symbol_start,
                                        DpAuxSymbol::Preamble,
                                    );
                                    symbol_start = last_edge2;
                                    good = true;
                                    frame_state = FrameState::Preamble1;
                                }
                            }
                            // Waiting for the low-going sync pulse.
                            FrameState::Preamble1 => {
                                if !current_state {
                                    good = true;
                                    frame_state = if packet_is_request {
                                        FrameState::Command
                                    } else {
                                        FrameState::Reply
                                    };

                                    // A 2.5 us pulse includes the first
                                    // half bit of the payload.
                                    if delta > 2_250_000_000 {
                                        i -= (UI_HALFWIDTH / timescale) as usize;
                                    }

                                    cap.push(
                                        symbol_start,
                                        i as i64 - symbol_start,
                                        DpAuxSymbol::Sync,
                                    );
                                    symbol_start = i as i64;
                                    current_byte = 0;
                                    bitcount = 0;
                                }
                            }
                            FrameState::Payload => {
                                if current_state {
                                    good = true;
                                    frame_state = FrameState::End1;
                                }
                            }
                            FrameState::End1 => {
                                if !current_state {
                                    good = true;
                                    frame_state = FrameState::End2;
                                }
                            }
                            _ => {}
                        }
                    }

                    ui_start = scaled(i);
                    i += 1;
                    current_state = !current_state;

                    if !good {
                        trace!("edge in the wrong place (delta {delta}), resyncing");
                    } else if frame_state == FrameState::End1 {
                        let dur = i as i64 - symbol_start + 2 * UI_WIDTH / timescale;
                        cap.push(symbol_start, dur, DpAuxSymbol::Stop);

                        // A completed write request or read reply also ends
                        // the tunneled I2C transaction.
                        if last_was_i2c
                            && ((last_was_i2c_request && !i2c_transaction_open && last_i2c_was_write)
                                || (!last_was_i2c_request
                                    && !i2c_transaction_open
                                    && !last_i2c_was_write))
                        {
                            i2ccap.push(symbol_start, dur, I2cSymbol::Stop);
                        }

                        // Skip the end of the frame.
                        i += (3 * UI_WIDTH / timescale) as usize;
                        packet_is_request = !packet_is_request;

                        if let Some(p) = packets.last_mut() {
                            p.len = ui_start - p.offset;
                            if !p.data.is_empty() {
                                let name = register_name(request_addr);
                                if !name.is_empty() && p.header("Info").unwrap_or("").is_empty()
                                {
                                    p.set_header("Info", name);
                                }
                            }
                        }
                        break 'frame;
                    }

                    last_edge2 = last_edge;
                    last_edge = i as i64;
                    continue;
                }

                let i_middle = i;
                let ui_middle = scaled(i);

                // Manchester polarity and bit order are inverted relative
                // to Ethernet.
                current_byte = (current_byte << 1) | current_state as u8;
                bitcount += 1;

                let mut symbol_done = false;
                if bitcount == 4 {
                    // Command, reply and the high address nibble are only
                    // four bits long.
                    match frame_state {
                        FrameState::Command => {
                            cap.push(
                                symbol_start,
                                i as i64 - symbol_start,
                                DpAuxSymbol::Command(current_byte),
                            );
                            let p = packets.last_mut().unwrap();
                            p.color = if current_byte & 3 == 0 {
                                PacketColor::DataWrite
                            } else {
                                PacketColor::DataRead
                            };
                            p.set_header("Type", command_text(current_byte));

                            if current_byte & 0x8 != 0 {
                                // Native DP request.
                                frame_state = FrameState::AddrHi;
                                last_was_i2c = false;
                                last_was_i2c_request = false;
                            } else {
                                // I2C over AUX.
                                let this_is_write = current_byte & 3 == 0;
                                let acklen = UI_WIDTH / timescale;
                                if i2c_transaction_open {
                                    if this_is_write != last_i2c_was_write {
                                        // Direction change: stop and restart.
                                        i2ccap.push(
                                            symbol_start - acklen,
                                            acklen,
                                            I2cSymbol::Stop,
                                        );
                                        i2ccap.push(
                                            symbol_start,
                                            i as i64 - symbol_start,
                                            I2cSymbol::Start,
                                        );
                                        i2c_address_sent = false;
                                    }
                                } else {
                                    i2ccap.push(
                                        symbol_start,
                                        i as i64 - symbol_start,
                                        I2cSymbol::Start,
                                    );
                                    i2c_address_sent = false;
                                }

                                last_i2c_was_write = this_is_write;
                                frame_state = FrameState::I2cPad1;
                                last_was_i2c = true;
                                last_was_i2c_request = true;
                                i2c_transaction_open = current_byte & 0x4 == 0x4;
                            }

                            symbol_start = i as i64;
                            symbol_done = true;
                            current_byte = 0;
                            bitcount = 0;
                        }

                        FrameState::I2cPad1 => {
                            current_byte = 0;
                            bitcount = 0;
                            frame_state = FrameState::I2cPad2;
                        }

                        FrameState::AddrHi => {
                            addr_hi = current_byte as u32;
                            current_byte = 0;
                            bitcount = 0;
                            frame_state = FrameState::AddrMid;
                        }

                        FrameState::Reply => {
                            last_was_i2c_request = false;

                            let sym = if last_was_i2c {
                                DpAuxSymbol::I2cReply(current_byte)
                            } else {
                                DpAuxSymbol::AuxReply(current_byte)
                            };
                            cap.push(symbol_start, i as i64 - symbol_start, sym);
                            symbol_start = i as i64;

                            let p = packets.last_mut().unwrap();
                            p.set_header("Address", format!("{request_addr:05x}"));
                            p.set_header("Type", sym.text());
                            p.color = PacketColor::DataRead;

                            current_byte = 0;
                            bitcount = 0;
                            frame_state = FrameState::ReplyPad;
                            symbol_done = true;
                        }

                        FrameState::ReplyPad => {
                            cap.push(symbol_start, i as i64 - symbol_start, DpAuxSymbol::Pad);
                            symbol_start = i as i64;
                            current_byte = 0;
                            bitcount = 0;
                            frame_state = FrameState::Payload;
                            symbol_done = true;
                        }

                        _ => {}
                    }
                } else if bitcount == 8 {
                    match frame_state {
                        FrameState::AddrMid => {
                            addr_hi = (addr_hi << 8) | current_byte as u32;
                            frame_state = FrameState::AddrLo;
                        }

                        FrameState::I2cPad2 => {
                            cap.push(symbol_start, i as i64 - symbol_start, DpAuxSymbol::Pad);
                            symbol_start = i as i64;
                            frame_state = FrameState::I2cAddr;
                            symbol_done = true;
                        }

                        FrameState::AddrLo => {
                            addr_hi = (addr_hi << 8) | current_byte as u32;
                            request_addr = addr_hi;

                            let p = packets.last_mut().unwrap();
                            p.set_header("Address", format!("{addr_hi:05x}"));
                            let name = register_name(addr_hi);
                            if !name.is_empty() {
                                p.set_header("Info", name);
                            }

                            cap.push(
                                symbol_start,
                                i as i64 - symbol_start,
                                DpAuxSymbol::Address(addr_hi),
                            );
                            symbol_start = i as i64;
                            frame_state = FrameState::Len;
                            symbol_done = true;
                        }

                        FrameState::I2cAddr => {
                            // Left aligned to match the I2C symbol form.
                            request_addr = (current_byte as u32) << 1;

                            let p = packets.last_mut().unwrap();
                            p.set_header("Address", format!("{request_addr:05x}"));

                            cap.push(
                                symbol_start,
                                i as i64 - symbol_start,
                                DpAuxSymbol::I2cAddress(request_addr as u8),
                            );

                            if !i2c_address_sent {
                                let acklen = UI_WIDTH / timescale;
                                i2ccap.push(
                                    symbol_start,
                                    i as i64 - symbol_start - acklen,
                                    I2cSymbol::Address(
                                        request_addr as u8 | !last_i2c_was_write as u8,
                                    ),
                                );
                                // The far end has not answered yet, so an
                                // ACK is assumed.
                                i2ccap.push(i as i64 - acklen, acklen, I2cSymbol::Ack);
                                i2c_address_sent = true;
                            }

                            symbol_start = i as i64;
                            frame_state = FrameState::Len;
                            symbol_done = true;
                        }

                        FrameState::Len => {
                            let p = packets.last_mut().unwrap();
                            p.set_header("Length", (current_byte as u32 + 1).to_string());
                            cap.push(
                                symbol_start,
                                i as i64 - symbol_start,
                                DpAuxSymbol::Len(current_byte),
                            );
                            symbol_start = i as i64;
                            frame_state = FrameState::Payload;
                            symbol_done = true;
                        }

                        FrameState::Payload => {
                            let p = packets.last_mut().unwrap();
                            p.data.push(current_byte);
                            cap.push(
                                symbol_start,
                                i as i64 - symbol_start,
                                DpAuxSymbol::Data(current_byte),
                            );

                            if last_was_i2c {
                                let acklen = UI_WIDTH / timescale;
                                i2ccap.push(
                                    symbol_start,
                                    i as i64 - symbol_start - acklen,
                                    I2cSymbol::Data(current_byte),
                                );
                                i2ccap.push(i as i64 - acklen, acklen, I2cSymbol::Ack);
                            }

                            symbol_start = i as i64;
                            symbol_done = true;
                        }

                        _ => {}
                    }

                    current_byte = 0;
                    bitcount = 0;
                }

                // Look for an edge at the end of this bit period.
                if !find_edge(&mut i, din, current_state) {
                    trace!("capture ended while looking for end of this bit");
                    done = true;
                    break;
                }
                let edgepos = scaled(i);
                let delta = edgepos - ui_middle;

                if delta > EYE_END {
                    // The next edge is the middle of the next bit; rewind
                    // to half a UI past this bit's center.
                    current_state = !current_state;
                    i = i_middle;
                    let target = ui_middle + UI_HALFWIDTH;
                    while i < len && scaled(i) < target {
                        i += 1;
                    }
                }
                // Otherwise the edge ends this bit and i already points
                // at it.

                // Extend the finished symbol to the end of the full
                // Manchester cell.
                if symbol_done {
                    let nlast = cap.len() - 1;
                    cap.durations[nlast] += i as i64 - symbol_start;
                    symbol_start = i as i64;
                }

                ui_start = scaled(i);
                last_edge2 = last_edge;
                last_edge = i as i64;
            }
        }

        // Drop request packets that never got any content.
        packets.retain(|p| !p.headers.is_empty());

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::DpAux(cap)));
        ctx.outputs[1].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::I2c(i2ccap)));
    }
}
