//! Intel Enhanced Serial Peripheral Interface (eSPI) decoder.
//!
//! Reference: eSPI Base Specification (Intel document 327432-004).

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::{Packet, PacketColor, PacketMerger};
use crate::parameter::{ParamSet, ParamType};
use crate::signal::{advance_to_tick, next_event_tick};
use crate::waveform::{
    Digital, SampleSource, SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Waveform,
};
use log::{trace, warn};

/// Command opcodes (eSPI spec table 3).
pub mod cmd {
    pub const PUT_PC: u8 = 0x00;
    pub const GET_PC: u8 = 0x01;
    pub const PUT_NP: u8 = 0x02;
    pub const GET_NP: u8 = 0x03;
    pub const PUT_VWIRE: u8 = 0x04;
    pub const GET_VWIRE: u8 = 0x05;
    pub const PUT_OOB: u8 = 0x06;
    pub const GET_OOB: u8 = 0x07;
    pub const PUT_FLASH_C: u8 = 0x08;
    pub const GET_FLASH_NP: u8 = 0x09;
    pub const PUT_IORD_SHORT_X1: u8 = 0x40;
    pub const PUT_IORD_SHORT_X2: u8 = 0x41;
    pub const PUT_IORD_SHORT_X4: u8 = 0x43;
    pub const PUT_IOWR_SHORT_X1: u8 = 0x44;
    pub const PUT_IOWR_SHORT_X2: u8 = 0x45;
    pub const PUT_IOWR_SHORT_X4: u8 = 0x47;
    pub const GET_CONFIGURATION: u8 = 0x21;
    pub const SET_CONFIGURATION: u8 = 0x22;
    pub const GET_STATUS: u8 = 0x25;
    pub const RESET: u8 = 0xff;
}

/// Cycle types (eSPI spec table 6).
pub mod cycle {
    pub const READ: u8 = 0x00;
    pub const WRITE: u8 = 0x01;
    pub const ERASE: u8 = 0x02;
    pub const SMBUS: u8 = 0x21;
    pub const SUCCESS_NODATA: u8 = 0x06;
    pub const SUCCESS_DATA_MIDDLE: u8 = 0x09;
    pub const SUCCESS_DATA_FIRST: u8 = 0x0b;
    pub const SUCCESS_DATA_LAST: u8 = 0x0d;
    pub const SUCCESS_DATA_ONLY: u8 = 0x0f;
    pub const FAIL_LAST: u8 = 0x08;
    pub const FAIL_ONLY: u8 = 0x0e;
}

/// One decoded eSPI bus element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EspiSymbol {
    Command(u8),
    CapsAddr(u16),
    CommandData32(u32),
    CommandCrcGood(u8),
    CommandCrcBad(u8),
    ResponseOp(u8),
    ResponseStatus(u16),
    ResponseData32(u32),
    ResponseCrcGood(u8),
    ResponseCrcBad(u8),
    VwireCount(u8),
    VwireIndex(u8),
    VwireData(u8),
    GeneralCapsRd(u32),
    GeneralCapsWr(u32),
    Ch0CapsRd(u32),
    Ch0CapsWr(u32),
    Ch1CapsRd(u32),
    Ch1CapsWr(u32),
    Ch2CapsRd(u32),
    Ch2CapsWr(u32),
    RequestTag(u8),
    RequestLen(u16),
    FlashRequestType(u8),
    FlashRequestAddr(u32),
    FlashRequestData(u8),
    SmbusRequestType(u8),
    SmbusRequestAddr(u8),
    SmbusRequestData(u8),
    IoAddr(u16),
    Wait,
    CompletionType(u8),
    CompletionData(u8),
    Error,
}

pub fn command_name(op: u8) -> String {
    match op {
        cmd::GET_CONFIGURATION => "Get Configuration".to_string(),
        cmd::SET_CONFIGURATION => "Set Configuration".to_string(),
        cmd::GET_OOB => "Get OOB".to_string(),
        cmd::PUT_OOB => "Put OOB".to_string(),
        cmd::GET_PC => "Get Posted Completion".to_string(),
        cmd::PUT_PC => "Put PC".to_string(),
        cmd::GET_NP => "Get Non-Posted".to_string(),
        cmd::PUT_NP => "Put Non-Posted".to_string(),
        cmd::GET_STATUS => "Get Status".to_string(),
        cmd::GET_FLASH_NP => "Get Flash Non-Posted".to_string(),
        cmd::PUT_FLASH_C => "Put Flash Completion".to_string(),
        cmd::GET_VWIRE => "Get Virtual Wire".to_string(),
        cmd::PUT_VWIRE => "Put Virtual Wire".to_string(),
        cmd::PUT_IOWR_SHORT_X1 | cmd::PUT_IOWR_SHORT_X2 | cmd::PUT_IOWR_SHORT_X4 => {
            "Put I/O Write".to_string()
        }
        cmd::PUT_IORD_SHORT_X1 | cmd::PUT_IORD_SHORT_X2 | cmd::PUT_IORD_SHORT_X4 => {
            "Put I/O Read".to_string()
        }
        cmd::RESET => "Reset".to_string(),
        _ => format!("Unknown Cmd ({op:02x})"),
    }
}

fn general_caps_text(data: u32, readable: bool) -> String {
    let mut s = String::new();
    if data & 0x8000_0000 != 0 {
        s += "CRC checking enabled\n";
    }
    if data & 0x4000_0000 != 0 {
        s += "Response modifier enabled\n";
    }
    if data & 0x1000_0000 == 0 {
        s += "DQ1 used as alert\n";
    } else {
        s += "ALERT# used as alert\n";
    }
    s += match (data >> 26) & 0x3 {
        0 => "x1 mode\n",
        1 => "x2 mode\n",
        2 => "x4 mode\n",
        _ => "Invalid IO mode\n",
    };
    if readable {
        s += match (data >> 24) & 0x3 {
            0 => "Supports x1 mode only\n",
            1 => "Supports x1 and x2 modes\n",
            2 => "Supports x1 and x4 modes\n",
            _ => "Supports x1, x2, and x4 modes\n",
        };
    }
    s += match (data >> 20) & 0x7 {
        0 => "20MHz SCK\n",
        1 => "25MHz SCK\n",
        2 => "33MHz SCK\n",
        3 => "50MHz SCK\n",
        4 => "66MHz SCK\n",
        _ => "Invalid SCK speed\n",
    };
    let waits = (data >> 12) & 0xf;
    if waits == 0 {
        s += "Max wait states: 16\n";
    } else {
        s += &format!("Max wait states: {waits}\n");
    }
    if readable {
        if data & 0x08 != 0 {
            s += "Flash channel present\n";
        }
        if data & 0x04 != 0 {
            s += "OOB channel present\n";
        }
        if data & 0x02 != 0 {
            s += "Virtual wire channel present\n";
        }
        if data & 0x01 != 0 {
            s += "Peripheral channel present\n";
        }
    }
    s
}

fn channel_caps_text(data: u32) -> String {
    let mut s = String::new();
    if data & 2 != 0 {
        s += "Ready\n";
    } else {
        s += "Not ready\n";
    }
    if data & 1 != 0 {
        s += "Enabled\n";
    } else {
        s += "Disabled\n";
    }
    s
}

impl SymbolText for EspiSymbol {
    fn text(&self) -> String {
        match *self {
            EspiSymbol::Command(op) => command_name(op),
            EspiSymbol::CapsAddr(a) => match a {
                0x04 => "Device ID".to_string(),
                0x08 => "General Capabilities".to_string(),
                0x10 => "CH0 Capabilities".to_string(),
                0x20 => "CH1 Capabilities".to_string(),
                0x30 => "CH2 Capabilities".to_string(),
                0x40 => "CH3 Capabilities".to_string(),
                _ => format!("{a:04x}"),
            },
            EspiSymbol::CommandData32(d) | EspiSymbol::ResponseData32(d) => format!("{d:08x}"),
            EspiSymbol::CommandCrcGood(c)
            | EspiSymbol::CommandCrcBad(c)
            | EspiSymbol::ResponseCrcGood(c)
            | EspiSymbol::ResponseCrcBad(c) => format!("CRC: {c:02x}"),
            EspiSymbol::ResponseOp(op) => match op & 0xf {
                0x1 => "Defer".to_string(),
                0x2 => "Nonfatal Error".to_string(),
                0x3 => "Fatal Error".to_string(),
                0x8 => "Accept".to_string(),
                0xf => "No Response".to_string(),
                other => format!("Unknown response {other:x}"),
            },
            EspiSymbol::ResponseStatus(d) => format!("Status: {d:04x}"),
            EspiSymbol::VwireCount(c) => format!("Count: {}", c as u32 + 1),
            EspiSymbol::VwireIndex(i) => format!("Index: {i:02x}"),
            EspiSymbol::VwireData(d) => format!("{d:02x}"),
            EspiSymbol::GeneralCapsRd(d) => general_caps_text(d, true),
            EspiSymbol::GeneralCapsWr(d) => general_caps_text(d, false),
            EspiSymbol::Ch0CapsRd(d) | EspiSymbol::Ch0CapsWr(d) => channel_caps_text(d),
            EspiSymbol::Ch1CapsRd(d) | EspiSymbol::Ch1CapsWr(d) => {
                format!(
                    "Operating max vwires: {}\n{}",
                    ((d >> 16) & 0x3f) + 1,
                    channel_caps_text(d)
                )
            }
            EspiSymbol::Ch2CapsRd(d) | EspiSymbol::Ch2CapsWr(d) => channel_caps_text(d),
            EspiSymbol::RequestTag(t) => format!("Tag: {t}"),
            EspiSymbol::RequestLen(l) => format!("Len: {l}"),
            EspiSymbol::FlashRequestType(t) => match t {
                cycle::READ => "Read".to_string(),
                cycle::WRITE => "Write".to_string(),
                cycle::ERASE => "Erase".to_string(),
                _ => format!("Cycle {t:02x}"),
            },
            EspiSymbol::FlashRequestAddr(a) => format!("Addr: {a:08x}"),
            EspiSymbol::FlashRequestData(d)
            | EspiSymbol::SmbusRequestData(d)
            | EspiSymbol::CompletionData(d) => format!("{d:02x}"),
            EspiSymbol::SmbusRequestType(t) => format!("Cycle {t:02x}"),
            EspiSymbol::SmbusRequestAddr(a) => format!("Addr: {a:02x}"),
            EspiSymbol::IoAddr(a) => format!("Addr: {a:04x}"),
            EspiSymbol::Wait => "Wait".to_string(),
            EspiSymbol::CompletionType(t) => match t {
                cycle::SUCCESS_NODATA => "Success".to_string(),
                cycle::SUCCESS_DATA_MIDDLE
                | cycle::SUCCESS_DATA_FIRST
                | cycle::SUCCESS_DATA_LAST
                | cycle::SUCCESS_DATA_ONLY => "Success with data".to_string(),
                cycle::FAIL_LAST | cycle::FAIL_ONLY => "Fail".to_string(),
                _ => format!("Completion {t:02x}"),
            },
            EspiSymbol::Error => "ERR".to_string(),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            EspiSymbol::Command(_)
            | EspiSymbol::ResponseOp(_)
            | EspiSymbol::ResponseStatus(_)
            | EspiSymbol::FlashRequestType(_)
            | EspiSymbol::RequestLen(_)
            | EspiSymbol::CompletionType(_) => SymbolColor::Control,
            EspiSymbol::Wait => SymbolColor::Preamble,
            EspiSymbol::CapsAddr(_)
            | EspiSymbol::VwireCount(_)
            | EspiSymbol::VwireIndex(_)
            | EspiSymbol::RequestTag(_)
            | EspiSymbol::FlashRequestAddr(_)
            | EspiSymbol::SmbusRequestAddr(_)
            | EspiSymbol::IoAddr(_) => SymbolColor::Address,
            EspiSymbol::CommandCrcGood(_) | EspiSymbol::ResponseCrcGood(_) => {
                SymbolColor::ChecksumOk
            }
            EspiSymbol::CommandCrcBad(_) | EspiSymbol::ResponseCrcBad(_) => {
                SymbolColor::ChecksumBad
            }
            EspiSymbol::SmbusRequestType(t) => {
                if *t == cycle::SMBUS {
                    SymbolColor::Control
                } else {
                    SymbolColor::Error
                }
            }
            EspiSymbol::Error => SymbolColor::Error,
            _ => SymbolColor::Data,
        }
    }
}

/// CRC8 with polynomial x^8 + x^2 + x + 1, MSB first.
pub fn update_crc8(mut crc: u8, data: u8) -> u8 {
    for i in (0..8).rev() {
        let mut hi = crc >> 7;
        crc <<= 1;
        hi ^= (data >> i) & 1;
        if hi != 0 {
            crc ^= 0x7;
        }
    }
    crc
}

const BUS_WIDTH: &str = "Bus Width";

const WIDTH_AUTO: i64 = 0;
const WIDTH_X1: i64 = 1;
const WIDTH_X4: i64 = 2;

#[derive(Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Deselected,
    SelectedClkLo,
    SelectedClkHi,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Idle,
    Opcode,
    ConfigAddress,
    ConfigData,
    CommandCrc,
    Response,
    ResponseData,
    Status,
    ResponseCrc,
    VwireCount,
    VwireIndex,
    VwireData,
    FlashType,
    FlashTagLenHi,
    FlashLenLo,
    FlashAddr,
    FlashData,
    SmbusType,
    SmbusTagLenHi,
    SmbusLenLo,
    SmbusAddr,
    SmbusData,
    IoWrAddr,
    IoWrData,
    IoRdAddr,
    CompletionType,
    CompletionTagLenHi,
    CompletionLenLo,
    CompletionData,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    Si,
    So,
    QuadRising,
    QuadFalling,
}

/// Decoder for the eSPI bus: clock, chip select and four data lines, with
/// automatic x1/x4 width detection and CRC8 checking.
#[derive(Clone)]
pub struct EspiDecoder {
    params: ParamSet,
}

impl Default for EspiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EspiDecoder {
    pub fn new() -> Self {
        let mut params = ParamSet::new();
        let width = params.declare(BUS_WIDTH, ParamType::Enum);
        width.add_enum_value("x1", WIDTH_X1);
        width.add_enum_value("x4", WIDTH_X4);
        width.add_enum_value("Auto", WIDTH_AUTO);
        width.set_int(WIDTH_AUTO);
        Self { params }
    }
}

impl PacketMerger for EspiDecoder {
    fn can_merge(&self, first: &Packet, _cur: &Packet, next: &Packet) -> bool {
        let fcmd = first.header("Command").unwrap_or("");
        let fstatus = first.header("Status").unwrap_or("");
        let ncmd = next.header("Command").unwrap_or("");
        let nstatus = next.header("Status").unwrap_or("");

        // Fetch commands requested by the peripheral.
        if fcmd == "Get Status" && fstatus.contains("FLASH_NP_AVAIL") && ncmd == "Get Flash Non-Posted"
        {
            return true;
        }
        if fcmd == "Get Status" && fstatus.contains("FLASH_NP_AVAIL") && ncmd == "Put Flash Completion"
        {
            return true;
        }
        if fcmd == "Get Status" && fstatus.contains("OOB_AVAIL") && (ncmd == "Get OOB" || ncmd == "Put OOB")
        {
            return true;
        }
        if fcmd == "Get Status" && fstatus.contains("VWIRE_AVAIL") && ncmd == "Get Virtual Wire" {
            return true;
        }

        // Split transactions.
        if fcmd == "Put I/O Write" || fcmd == "Put I/O Read" {
            if ncmd == "Get Status" && nstatus.contains("PC_AVAIL") {
                return true;
            }
            if ncmd == "Get Posted Completion" {
                return true;
            }
        }

        // Consecutive status register polls.
        if fcmd == "Get Configuration"
            && ncmd == "Get Configuration"
            && first.header("Address") == next.header("Address")
        {
            return true;
        }

        false
    }

    fn create_merged_header(&self, packets: &[Packet], i: usize) -> Packet {
        let first = &packets[i];
        let mut ret = Packet::new(first.offset);
        ret.len = first.len;

        let fcmd = first.header("Command").unwrap_or("").to_string();

        if fcmd == "Get Status" {
            if let Some(second) = packets.get(i + 1) {
                for key in ["Address", "Len", "Tag"] {
                    if let Some(v) = second.header(key) {
                        ret.set_header(key, v);
                    }
                }

                match second.header("Command").unwrap_or("") {
                    "Get Flash Non-Posted" => {
                        match second.header("Info").unwrap_or("") {
                            "Read" => {
                                ret.color = PacketColor::DataRead;
                                ret.set_header("Command", "Flash Read");
                            }
                            "Write" => {
                                ret.color = PacketColor::DataWrite;
                                ret.set_header("Command", "Flash Write");
                            }
                            "Erase" => {
                                ret.color = PacketColor::DataWrite;
                                ret.set_header("Command", "Flash Erase");
                            }
                            _ => {}
                        }

                        // Append any completions with a matching tag.
                        for p in &packets[i + 2..] {
                            if p.header("Command") != Some("Put Flash Completion")
                                || p.header("Tag") != second.header("Tag")
                            {
                                break;
                            }
                            ret.data.extend_from_slice(&p.data);
                            ret.len = p.offset + p.len - ret.offset;
                        }
                    }
                    "Get OOB" => {
                        ret.set_header("Command", "SMBus Access");
                        ret.color = PacketColor::DataWrite;
                    }
                    "Get Virtual Wire" => {
                        ret.set_header("Command", "Get Virtual Wire");
                        if let Some(info) = second.header("Info") {
                            ret.set_header("Info", info);
                        }
                        ret.color = PacketColor::DataRead;
                    }
                    _ => {}
                }
            }
        } else if fcmd == "Put I/O Write" || fcmd == "Put I/O Read" {
            let write = fcmd == "Put I/O Write";
            ret.set_header("Command", if write { "I/O Write" } else { "I/O Read" });
            ret.color = if write {
                PacketColor::DataWrite
            } else {
                PacketColor::DataRead
            };
            for key in ["Address", "Len"] {
                if let Some(v) = first.header(key) {
                    ret.set_header(key, v);
                }
            }
            if write {
                ret.data.extend_from_slice(&first.data);
            }

            for p in &packets[i + 1..] {
                match p.header("Command").unwrap_or("") {
                    "Get Posted Completion" => {
                        if let Some(r) = p.header("Response") {
                            ret.set_header("Response", r);
                        }
                    }
                    "Get Status" => {}
                    _ => break,
                }
                if !write {
                    ret.data.extend_from_slice(&p.data);
                }
                ret.len = p.offset + p.len - ret.offset;
            }
        } else if fcmd == "Get Configuration" {
            ret.set_header("Command", "Poll Configuration");
            ret.color = PacketColor::Control;
            if let Some(a) = first.header("Address") {
                ret.set_header("Address", a);
            }

            let mut ilast = i;
            for (j, p) in packets.iter().enumerate().skip(i + 1) {
                if p.header("Command") == Some("Get Configuration")
                    && p.header("Address") == first.header("Address")
                {
                    ilast = j;
                } else {
                    break;
                }
            }
            let last = &packets[ilast];
            ret.set_header("Len", (ilast - i).to_string());
            for key in ["Info", "Response"] {
                if let Some(v) = last.header(key) {
                    ret.set_header(key, v);
                }
            }
            ret.data.extend_from_slice(&last.data);
            ret.len = last.len;
        }

        ret
    }
}

impl Filter for EspiDecoder {
    fn protocol_name(&self) -> &'static str {
        "eSPI"
    }

    fn category(&self) -> Category {
        Category::Bus
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["clk", "cs#", "dq3", "dq2", "dq1", "dq0"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::Espi)]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port < 6 && stype == StreamType::Digital
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn headers(&self) -> Vec<&'static str> {
        vec!["Command", "Address", "Len", "Tag", "Info", "Response", "Status"]
    }

    fn refresh(&mut self, ctx: &mut RefreshContext) {
        if !ctx.all_inputs_ok() {
            ctx.clear_outputs();
            return;
        }
        let inputs: Vec<Option<Digital>> = (0..6).map(|i| ctx.digital_input(i)).collect();
        if inputs.iter().any(Option::is_none) {
            ctx.clear_outputs();
            return;
        }
        let clk = inputs[0].unwrap();
        let csn = inputs[1].unwrap();
        // Port order is dq3 down to dq0.
        let dq = [
            inputs[5].unwrap(),
            inputs[4].unwrap(),
            inputs[3].unwrap(),
            inputs[2].unwrap(),
        ];

        let timebase = *clk.timebase();
        let timescale = timebase.timescale;
        let trigger_phase = timebase.trigger_phase;
        let mut cap = SparseWaveform::new(timebase);
        let packets = &mut *ctx.packets;

        let mut bus_width = self.params.int_value(BUS_WIDTH);
        let mut bus_width_next = bus_width;
        let mut bus_width_changed = false;

        let mut ics = 0usize;
        let mut iclk = 0usize;
        let mut idq = [0usize; 4];
        let mut timestamp = 0i64;

        let mut link_state = LinkState::Deselected;
        let mut txn_state = TxnState::Idle;
        let mut read_mode = ReadMode::Si;
        let mut current_cmd = cmd::RESET;
        let mut pack_open = false;

        let mut count = 0usize;
        let mut tstart = 0i64;
        let mut crc = 0u8;
        let mut data = 0u64;
        let mut addr = 0u64;
        let mut payload_len = 0usize;

        let mut skip_bits = 0;
        let mut skip_next_falling = false;
        let mut bitcount = 0;
        let mut bytestart = 0i64;
        let mut current_byte = 0u8;
        let mut byte_valid_next = false;
        let mut cycle_type = cycle::READ;

        loop {
            let cur_cs = csn.at(ics);
            let cur_clk = clk.at(iclk);
            let cur_data = (dq[3].at(idq[3]) as u8) << 3
                | (dq[2].at(idq[2]) as u8) << 2
                | (dq[1].at(idq[1]) as u8) << 1
                | (dq[0].at(idq[0]) as u8);

            let mut byte_valid = false;

            match link_state {
                LinkState::Deselected => {
                    if !cur_cs {
                        link_state = LinkState::SelectedClkLo;
                        current_byte = 0;
                        bitcount = 0;
                        bytestart = timestamp;

                        txn_state = TxnState::Opcode;
                        crc = 0;
                    }
                }

                // Wait for a rising clock edge.
                LinkState::SelectedClkLo => {
                    if cur_clk {
                        if skip_bits > 0 {
                            skip_bits -= 1;
                            bytestart = timestamp;
                            skip_next_falling = true;
                        } else {
                            skip_next_falling = false;

                            // Width detection happens at byte boundaries: if
                            // DQ[3:2] are actively driven low, the bus is in
                            // quad mode (they idle high through pullups).
                            if bitcount == 0 {
                                match bus_width {
                                    WIDTH_X1 => {}
                                    WIDTH_X4 => {
                                        if read_mode == ReadMode::Si || read_mode == ReadMode::So {
                                            read_mode = ReadMode::QuadRising;
                                        }
                                    }
                                    _ => {
                                        if cur_data & 0xc != 0xc {
                                            read_mode = ReadMode::QuadRising;
                                        }
                                    }
                                }
                            }

                            match read_mode {
                                ReadMode::Si => {
                                    bitcount += 1;
                                    current_byte = (current_byte << 1) | (cur_data & 1);
                                }
                                ReadMode::So => {
                                    bitcount += 1;
                                    current_byte = (current_byte << 1) | ((cur_data & 2) >> 1);
                                }
                                ReadMode::QuadRising => {
                                    bitcount += 4;
                                    current_byte = (current_byte << 4) | cur_data;
                                }
                                ReadMode::QuadFalling => {}
                            }

                            if bitcount == 8 {
                                byte_valid_next = true;
                                bitcount = 0;
                            }
                        }
                        link_state = LinkState::SelectedClkHi;
                    }
                }

                // Wait for a falling clock edge.
                LinkState::SelectedClkHi => {
                    if !cur_clk {
                        if read_mode == ReadMode::QuadFalling && !skip_next_falling {
                            bitcount += 4;
                            current_byte = (current_byte << 4) | cur_data;
                            if bitcount == 8 {
                                byte_valid_next = true;
                                bitcount = 0;
                            }
                        }
                        link_state = LinkState::SelectedClkLo;
                        if byte_valid_next {
                            byte_valid = true;
                            byte_valid_next = false;
                        }
                    }
                }
            }

            // Deselect ends the packet.
            if link_state != LinkState::Deselected && cur_cs {
                if pack_open {
                    if let Some(p) = packets.last_mut() {
                        p.len = timestamp * timescale + trigger_phase - p.offset;
                    }
                    pack_open = false;
                }
                bytestart = timestamp;
                link_state = LinkState::Deselected;
                read_mode = ReadMode::Si;
            }

            if byte_valid {
                match txn_state {
                    TxnState::Idle => {}

                    // Every frame begins with an opcode.
                    TxnState::Opcode => {
                        current_cmd = current_byte;
                        trace!("espi opcode {current_cmd:02x} at {timestamp}");

                        let mut pack = Packet::new(bytestart * timescale + trigger_phase);
                        pack.set_header("Command", command_name(current_byte));

                        tstart = timestamp;
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::Command(current_byte),
                        );

                        count = 0;
                        data = 0;
                        addr = 0;

                        match current_cmd {
                            cmd::GET_CONFIGURATION | cmd::SET_CONFIGURATION => {
                                pack.color = PacketColor::Control;
                                txn_state = TxnState::ConfigAddress;
                            }
                            cmd::PUT_FLASH_C => txn_state = TxnState::FlashType,
                            cmd::PUT_OOB => {
                                pack.color = PacketColor::DataRead;
                                txn_state = TxnState::SmbusType;
                            }
                            cmd::PUT_VWIRE => {
                                pack.color = PacketColor::DataWrite;
                                txn_state = TxnState::VwireCount;
                            }
                            cmd::PUT_IOWR_SHORT_X1 => {
                                payload_len = 1;
                                pack.color = PacketColor::DataWrite;
                                txn_state = TxnState::IoWrAddr;
                            }
                            cmd::PUT_IOWR_SHORT_X2 => {
                                payload_len = 2;
                                pack.color = PacketColor::DataWrite;
                                txn_state = TxnState::IoWrAddr;
                            }
                            cmd::PUT_IOWR_SHORT_X4 => {
                                payload_len = 4;
                                pack.color = PacketColor::DataWrite;
                                txn_state = TxnState::IoWrAddr;
                            }
                            cmd::PUT_IORD_SHORT_X1 => {
                                pack.set_header("Len", "1");
                                pack.color = PacketColor::DataRead;
                                txn_state = TxnState::IoRdAddr;
                            }
                            cmd::PUT_IORD_SHORT_X2 => {
                                pack.set_header("Len", "2");
                                pack.color = PacketColor::DataRead;
                                txn_state = TxnState::IoRdAddr;
                            }
                            cmd::PUT_IORD_SHORT_X4 => {
                                pack.set_header("Len", "4");
                                pack.color = PacketColor::DataRead;
                                txn_state = TxnState::IoRdAddr;
                            }
                            cmd::GET_STATUS => {
                                pack.color = PacketColor::Status;
                                txn_state = TxnState::CommandCrc;
                            }
                            cmd::GET_FLASH_NP | cmd::GET_PC => txn_state = TxnState::CommandCrc,
                            cmd::GET_VWIRE => {
                                pack.color = PacketColor::DataRead;
                                txn_state = TxnState::CommandCrc;
                            }
                            cmd::GET_OOB => {
                                pack.color = PacketColor::DataWrite;
                                txn_state = TxnState::CommandCrc;
                            }
                            cmd::RESET => {
                                pack.color = PacketColor::Command;
                                txn_state = TxnState::CommandCrc;
                            }
                            cmd::PUT_PC => {
                                pack.color = PacketColor::DataWrite;
                                txn_state = TxnState::Idle;
                            }
                            _ => {
                                txn_state = TxnState::Idle;
                                pack.color = PacketColor::Error;
                            }
                        }

                        packets.push(pack);
                        pack_open = true;
                    }

                    TxnState::CommandCrc => {
                        if current_byte == crc {
                            cap.push(
                                bytestart,
                                timestamp - bytestart,
                                EspiSymbol::CommandCrcGood(current_byte),
                            );
                        } else {
                            cap.push(
                                bytestart,
                                timestamp - bytestart,
                                EspiSymbol::CommandCrcBad(current_byte),
                            );
                            if let Some(p) = packets.last_mut() {
                                p.color = PacketColor::Error;
                            }
                        }

                        // Response follows after a 2-cycle bus turnaround.
                        txn_state = TxnState::Response;
                        skip_bits = 2;

                        // The peripheral drives the opposite data line.
                        if read_mode == ReadMode::Si {
                            read_mode = ReadMode::So;
                        } else if read_mode == ReadMode::QuadRising {
                            read_mode = ReadMode::QuadFalling;
                        }
                    }

                    TxnState::ConfigAddress => {
                        if count == 0 {
                            tstart = bytestart;
                        }
                        addr = (addr << 8) | current_byte as u64;
                        count += 1;

                        if count == 2 {
                            let sym = EspiSymbol::CapsAddr(addr as u16);
                            cap.push(tstart, timestamp - tstart, sym);
                            if let Some(p) = packets.last_mut() {
                                p.set_header("Address", sym.text());
                            }

                            if current_cmd == cmd::SET_CONFIGURATION {
                                txn_state = TxnState::ConfigData;
                                data = 0;
                                count = 0;
                            } else {
                                txn_state = TxnState::CommandCrc;
                            }
                        }
                    }

                    TxnState::ConfigData => {
                        if count == 0 {
                            tstart = bytestart;
                        }
                        data |= (current_byte as u64) << ((count & 3) * 8);
                        if let Some(p) = packets.last_mut() {
                            p.data.push(current_byte);
                        }
                        count += 1;

                        if count == 4 {
                            let word = data as u32;
                            let sym = match addr {
                                0x8 => {
                                    // The general capabilities register holds
                                    // the I/O width flag. The change applies
                                    // from the next packet; this packet's CRC
                                    // and trailing fields still use the
                                    // current width.
                                    match (word >> 26) & 0x3 {
                                        0 => {
                                            bus_width_next = WIDTH_X1;
                                            bus_width_changed = true;
                                        }
                                        1 => warn!("x2 mode not implemented"),
                                        2 => {
                                            bus_width_next = WIDTH_X4;
                                            bus_width_changed = true;
                                        }
                                        _ => warn!("Invalid IO mode"),
                                    }
                                    EspiSymbol::GeneralCapsWr(word)
                                }
                                0x10 => EspiSymbol::Ch0CapsWr(word),
                                0x20 => EspiSymbol::Ch1CapsWr(word),
                                0x30 => EspiSymbol::Ch2CapsWr(word),
                                _ => EspiSymbol::CommandData32(word),
                            };
                            cap.push(tstart, timestamp - tstart, sym);
                            if !matches!(sym, EspiSymbol::CommandData32(_)) {
                                if let Some(p) = packets.last_mut() {
                                    p.set_header("Info", sym.text().trim_end());
                                }
                            }

                            txn_state = TxnState::CommandCrc;
                        }
                    }

                    TxnState::Response => {
                        // Wait states from the peripheral.
                        if current_byte & 0xcf == 0x0f {
                            let last = cap.len().wrapping_sub(1);
                            if cap.len() > 0 && cap.samples[last] == EspiSymbol::Wait {
                                cap.durations[last] = timestamp - cap.offsets[last];
                            } else {
                                cap.push(bytestart, timestamp - bytestart, EspiSymbol::Wait);
                            }
                        } else {
                            // Fresh CRC for the response phase.
                            crc = 0;

                            let sym = EspiSymbol::ResponseOp(current_byte);
                            cap.push(bytestart, timestamp - bytestart, sym);

                            if current_byte >> 6 != 0 {
                                warn!("Appended completions not implemented yet");
                            }

                            if let Some(p) = packets.last_mut() {
                                p.set_header("Response", sym.text());
                            }

                            count = 0;
                            data = 0;

                            txn_state = match current_cmd {
                                cmd::GET_CONFIGURATION => TxnState::ResponseData,
                                cmd::GET_VWIRE => TxnState::VwireCount,
                                cmd::GET_FLASH_NP => TxnState::FlashType,
                                cmd::GET_OOB => TxnState::SmbusType,
                                cmd::GET_PC => TxnState::CompletionType,
                                _ => TxnState::Status,
                            };
                        }
                    }

                    TxnState::ResponseData => {
                        if count == 0 {
                            tstart = bytestart;
                        }
                        // Data is LSB to MSB.
                        data |= (current_byte as u64) << ((count & 3) * 8);
                        count += 1;
                        if let Some(p) = packets.last_mut() {
                            p.data.push(current_byte);
                        }

                        if count == 4 {
                            let word = data as u32;
                            let sym = match addr {
                                0x8 => EspiSymbol::GeneralCapsRd(word),
                                0x10 => EspiSymbol::Ch0CapsRd(word),
                                0x20 => EspiSymbol::Ch1CapsRd(word),
                                0x30 => EspiSymbol::Ch2CapsRd(word),
                                _ => EspiSymbol::ResponseData32(word),
                            };
                            cap.push(tstart, timestamp - tstart, sym);
                            if !matches!(sym, EspiSymbol::ResponseData32(_)) {
                                if let Some(p) = packets.last_mut() {
                                    p.set_header("Info", sym.text().trim_end());
                                }
                            }

                            count = 0;
                            data = 0;
                            txn_state = TxnState::Status;
                        }
                    }

                    TxnState::Status => {
                        if count == 0 {
                            tstart = bytestart;
                        }
                        data |= (current_byte as u64) << ((count & 3) * 8);
                        count += 1;

                        if count == 2 {
                            cap.push(
                                tstart,
                                timestamp - tstart,
                                EspiSymbol::ResponseStatus(data as u16),
                            );

                            let mut stmp = String::new();
                            if data & 0x2000 != 0 {
                                stmp += "FLASH_NP_AVAIL ";
                            }
                            if data & 0x1000 != 0 {
                                stmp += "FLASH_C_AVAIL ";
                            }
                            if data & 0x0200 != 0 {
                                stmp += "FLASH_NP_FREE ";
                            }
                            if data & 0x0080 != 0 {
                                stmp += "OOB_AVAIL ";
                            }
                            if data & 0x0040 != 0 {
                                stmp += "VWIRE_AVAIL ";
                            }
                            if data & 0x0020 != 0 {
                                stmp += "NP_AVAIL ";
                            }
                            if data & 0x0010 != 0 {
                                stmp += "PC_AVAIL ";
                            }
                            if let Some(p) = packets.last_mut() {
                                p.set_header("Status", stmp);
                            }

                            txn_state = TxnState::ResponseCrc;
                        }
                    }

                    TxnState::ResponseCrc => {
                        if current_byte == crc {
                            cap.push(
                                bytestart,
                                timestamp - bytestart,
                                EspiSymbol::ResponseCrcGood(current_byte),
                            );
                        } else {
                            trace!("invalid espi response crc (got {current_byte:02x}, expected {crc:02x})");
                            cap.push(
                                bytestart,
                                timestamp - bytestart,
                                EspiSymbol::ResponseCrcBad(current_byte),
                            );
                            if let Some(p) = packets.last_mut() {
                                p.color = PacketColor::Error;
                            }
                        }

                        // Bus width changes commit between packets.
                        if bus_width_changed {
                            bus_width = bus_width_next;
                        }

                        txn_state = TxnState::Idle;
                    }

                    TxnState::VwireCount => {
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::VwireCount(current_byte),
                        );
                        count = current_byte as usize;
                        txn_state = TxnState::VwireIndex;
                    }

                    TxnState::VwireIndex => {
                        addr = current_byte as u64;
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::VwireIndex(current_byte),
                        );
                        txn_state = TxnState::VwireData;
                    }

                    TxnState::VwireData => {
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::VwireData(current_byte),
                        );

                        let mut stmp = String::new();
                        if addr <= 1 {
                            // Virtual wire indexes 0/1 are IRQs.
                            let irq = if addr == 0 {
                                (current_byte & 0x7f) as u32
                            } else {
                                (current_byte & 0x7f) as u32 + 128
                            };
                            stmp = format!(
                                "IRQ{irq} {}\n",
                                if current_byte & 0x80 != 0 { "high" } else { "low" }
                            );
                        } else if addr <= 7 {
                            // System events, tables 10 through 15.
                            let named: &[(&str, u8, u8)] = match addr {
                                2 => &[
                                    ("SLP_S5#", 0x40, 0x4),
                                    ("SLP_S4#", 0x20, 0x2),
                                    ("SLP_S3#", 0x10, 0x1),
                                ],
                                3 => &[
                                    ("OOB_RST_WARN", 0x40, 0x4),
                                    ("PLTRST#", 0x20, 0x2),
                                    ("SUS_STAT#", 0x10, 0x1),
                                ],
                                4 => &[
                                    ("PME#", 0x80, 0x8),
                                    ("WAKE#", 0x40, 0x4),
                                    ("OOB_RST_ACK", 0x10, 0x1),
                                ],
                                5 => &[
                                    ("SLAVE_BOOT_LOAD_STATUS", 0x80, 0x8),
                                    ("ERROR_NONFATAL", 0x40, 0x4),
                                    ("ERROR_FATAL", 0x20, 0x2),
                                    ("SLAVE_BOOT_LOAD_DONE", 0x10, 0x1),
                                ],
                                6 => &[
                                    ("HOST_RST_ACK", 0x80, 0x8),
                                    ("RCIN#", 0x40, 0x4),
                                    ("SMI#", 0x20, 0x2),
                                    ("SCI#", 0x10, 0x1),
                                ],
                                _ => &[
                                    ("NMIOUT#", 0x40, 0x4),
                                    ("SMIOUT#", 0x20, 0x2),
                                    ("HOST_RST_WARN", 0x10, 0x1),
                                ],
                            };
                            for (name, valid, level) in named {
                                if current_byte & valid != 0 {
                                    stmp += &format!(
                                        "{name}: {}\n",
                                        if current_byte & level != 0 { "1" } else { "0" }
                                    );
                                }
                            }
                        } else if addr <= 63 {
                            stmp += "Reserved index\n";
                        } else if addr <= 127 {
                            stmp += &format!("Platform specific {addr:02x}:{current_byte:02x}\n");
                        } else {
                            stmp += "GPIO expander decode not implemented\n";
                        }

                        if let Some(p) = packets.last_mut() {
                            let mut info = p.header("Info").unwrap_or("").to_string();
                            info += &stmp;
                            p.set_header("Info", info.trim_end());
                        }

                        if count == 0 {
                            txn_state = if current_cmd == cmd::PUT_VWIRE {
                                TxnState::CommandCrc
                            } else {
                                TxnState::Status
                            };
                            data = 0;
                        } else {
                            txn_state = TxnState::VwireIndex;
                            count -= 1;
                        }
                    }

                    TxnState::FlashType => {
                        if let Some(p) = packets.last_mut() {
                            p.data.push(current_byte);
                        }
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::FlashRequestType(current_byte),
                        );
                        txn_state = TxnState::FlashTagLenHi;
                        cycle_type = current_byte;

                        let (info, color) = match cycle_type {
                            cycle::ERASE => ("Erase", PacketColor::DataWrite),
                            cycle::READ => ("Read", PacketColor::DataRead),
                            cycle::WRITE => ("Write", PacketColor::DataWrite),
                            cycle::SUCCESS_DATA_FIRST
                            | cycle::SUCCESS_DATA_MIDDLE
                            | cycle::SUCCESS_DATA_LAST
                            | cycle::SUCCESS_DATA_ONLY => ("Read Data", PacketColor::DataRead),
                            _ => ("Unknown flash op", PacketColor::Default),
                        };
                        if let Some(p) = packets.last_mut() {
                            p.set_header("Info", info);
                            if color != PacketColor::Default {
                                p.color = color;
                            }
                        }
                    }

                    TxnState::FlashTagLenHi => {
                        if let Some(p) = packets.last_mut() {
                            p.data.push(current_byte);
                            p.set_header("Tag", (current_byte >> 4).to_string());
                        }
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::RequestTag(current_byte >> 4),
                        );
                        data = (current_byte & 0xf) as u64;
                        txn_state = TxnState::FlashLenLo;
                    }

                    TxnState::FlashLenLo => {
                        if let Some(p) = packets.last_mut() {
                            p.data.push(current_byte);
                        }
                        payload_len = (current_byte as u64 | (data << 8)) as usize;
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::RequestLen(payload_len as u16),
                        );
                        if let Some(p) = packets.last_mut() {
                            p.set_header("Len", payload_len.to_string());
                        }

                        count = 0;
                        data = 0;

                        if cycle_type >= cycle::SUCCESS_NODATA {
                            if let Some(p) = packets.last_mut() {
                                p.data.clear();
                            }
                            txn_state = TxnState::FlashData;
                        } else {
                            txn_state = TxnState::FlashAddr;
                        }
                    }

                    TxnState::FlashAddr => {
                        if count == 0 {
                            tstart = bytestart;
                        }
                        data = (data << 8) | current_byte as u64;
                        count += 1;

                        if count == 4 {
                            cap.push(
                                tstart,
                                timestamp - tstart,
                                EspiSymbol::FlashRequestAddr(data as u32),
                            );
                            if let Some(p) = packets.last_mut() {
                                p.set_header("Address", format!("{:08x}", data as u32));
                            }
                            count = 0;
                            data = 0;

                            if cycle_type == cycle::WRITE {
                                if let Some(p) = packets.last_mut() {
                                    p.data.clear();
                                }
                                txn_state = TxnState::FlashData;
                            } else {
                                txn_state = TxnState::Status;
                            }
                        }
                    }

                    TxnState::FlashData => {
                        if let Some(p) = packets.last_mut() {
                            p.data.push(current_byte);
                        }
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::FlashRequestData(current_byte),
                        );

                        count += 1;
                        if count >= payload_len {
                            count = 0;
                            data = 0;
                            txn_state = if current_cmd == cmd::PUT_FLASH_C {
                                TxnState::CommandCrc
                            } else {
                                TxnState::Status
                            };
                        }
                    }

                    TxnState::SmbusType => {
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::SmbusRequestType(current_byte),
                        );
                        txn_state = TxnState::SmbusTagLenHi;
                    }

                    TxnState::SmbusTagLenHi => {
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::RequestTag(current_byte >> 4),
                        );
                        if let Some(p) = packets.last_mut() {
                            p.set_header("Tag", (current_byte >> 4).to_string());
                        }
                        data = (current_byte & 0xf) as u64;
                        txn_state = TxnState::SmbusLenLo;
                    }

                    TxnState::SmbusLenLo => {
                        payload_len = (current_byte as u64 | (data << 8)) as usize;
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::RequestLen(payload_len as u16),
                        );
                        if let Some(p) = packets.last_mut() {
                            p.set_header("Len", payload_len.to_string());
                        }
                        txn_state = TxnState::SmbusAddr;
                    }

                    TxnState::SmbusAddr => {
                        if let Some(p) = packets.last_mut() {
                            p.data.clear();
                            p.set_header("Address", format!("{current_byte:02x}"));
                        }
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::SmbusRequestAddr(current_byte),
                        );

                        // The slave address is the first byte of the SMBus
                        // packet, so the count starts at 1.
                        count = 1;
                        data = 0;
                        txn_state = TxnState::SmbusData;
                    }

                    TxnState::SmbusData => {
                        if let Some(p) = packets.last_mut() {
                            p.data.push(current_byte);
                        }
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::SmbusRequestData(current_byte),
                        );

                        count += 1;
                        if count >= payload_len {
                            count = 0;
                            data = 0;
                            txn_state = if current_cmd == cmd::PUT_OOB {
                                TxnState::CommandCrc
                            } else {
                                TxnState::Status
                            };
                        }
                    }

                    TxnState::IoWrAddr => {
                        if count == 0 {
                            tstart = bytestart;
                        }
                        addr = (addr << 8) | current_byte as u64;
                        count += 1;

                        if count == 2 {
                            cap.push(tstart, timestamp - tstart, EspiSymbol::IoAddr(addr as u16));
                            if let Some(p) = packets.last_mut() {
                                p.set_header("Address", format!("{:04x}", addr as u16));
                                p.set_header("Len", payload_len.to_string());
                            }
                            count = 0;
                            txn_state = TxnState::IoWrData;
                        }
                    }

                    TxnState::IoWrData => {
                        if let Some(p) = packets.last_mut() {
                            p.data.push(current_byte);
                        }
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::SmbusRequestData(current_byte),
                        );

                        count += 1;
                        if count >= payload_len {
                            count = 0;
                            data = 0;
                            txn_state = TxnState::CommandCrc;
                        }
                    }

                    TxnState::IoRdAddr => {
                        if count == 0 {
                            tstart = bytestart;
                        }
                        addr = (addr << 8) | current_byte as u64;
                        count += 1;

                        if count == 2 {
                            cap.push(tstart, timestamp - tstart, EspiSymbol::IoAddr(addr as u16));
                            if let Some(p) = packets.last_mut() {
                                p.set_header("Address", format!("{:04x}", addr as u16));
                            }
                            count = 0;
                            txn_state = TxnState::CommandCrc;
                        }
                    }

                    TxnState::CompletionType => {
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::CompletionType(current_byte),
                        );

                        let color = match current_byte {
                            cycle::SUCCESS_NODATA => PacketColor::Status,
                            cycle::SUCCESS_DATA_MIDDLE
                            | cycle::SUCCESS_DATA_FIRST
                            | cycle::SUCCESS_DATA_LAST
                            | cycle::SUCCESS_DATA_ONLY => PacketColor::DataRead,
                            _ => PacketColor::Error,
                        };
                        if let Some(p) = packets.last_mut() {
                            p.color = color;
                        }

                        txn_state = TxnState::CompletionTagLenHi;
                    }

                    TxnState::CompletionTagLenHi => {
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::RequestTag(current_byte >> 4),
                        );
                        if let Some(p) = packets.last_mut() {
                            p.set_header("Tag", (current_byte >> 4).to_string());
                        }
                        data = (current_byte & 0xf) as u64;
                        txn_state = TxnState::CompletionLenLo;
                    }

                    TxnState::CompletionLenLo => {
                        payload_len = (current_byte as u64 | (data << 8)) as usize;
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::RequestLen(payload_len as u16),
                        );
                        if let Some(p) = packets.last_mut() {
                            p.set_header("Len", payload_len.to_string());
                        }
                        txn_state = if payload_len == 0 {
                            TxnState::Status
                        } else {
                            TxnState::CompletionData
                        };
                    }

                    TxnState::CompletionData => {
                        if let Some(p) = packets.last_mut() {
                            p.data.push(current_byte);
                        }
                        cap.push(
                            bytestart,
                            timestamp - bytestart,
                            EspiSymbol::CompletionData(current_byte),
                        );

                        count += 1;
                        if count >= payload_len {
                            count = 0;
                            data = 0;
                            txn_state = TxnState::Status;
                        }
                    }
                }

                crc = update_crc8(crc, current_byte);
                bytestart = timestamp;
            }

            // Advance to the next clock or chip-select event; data glitches
            // between clock edges are irrelevant.
            let next_cs = next_event_tick(&csn, ics, timestamp);
            let next_clk = next_event_tick(&clk, iclk, timestamp);
            let next = next_cs.min(next_clk);
            if next == timestamp {
                break;
            }
            timestamp = next;
            advance_to_tick(&csn, &mut ics, timestamp);
            advance_to_tick(&clk, &mut iclk, timestamp);
            for (lane, i) in dq.iter().zip(idq.iter_mut()) {
                advance_to_tick(lane, i, timestamp);
            }
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Espi(cap)));
    }
}

#[cfg(test)]
mod tests {
    use super::update_crc8;

    #[test]
    fn crc8_known_values() {
        // CRC of a single zero byte is zero for this polynomial.
        assert_eq!(update_crc8(0, 0x00), 0x00);
        // Reference value for the GET_STATUS opcode.
        assert_eq!(update_crc8(0, 0x25), 0xfb);
    }
}
