//! 24C-series I2C EEPROM transaction decoder.
//!
//! Stateful overlay on the I2C symbol stream: matches device selects,
//! pointer writes and data phases, and classifies each transaction as a
//! poll, read or write.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::{Packet, PacketColor, PacketMerger};
use crate::parameter::{ParamSet, ParamType};
use crate::waveform::{
    SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Waveform,
};
use crate::i2c::I2cSymbol;

/// One decoded EEPROM transaction element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I2cEepromSymbol {
    SelectRead,
    SelectWrite,
    PollBusy,
    PollOk,
    Address(u32),
    Data(u8),
}

impl SymbolText for I2cEepromSymbol {
    fn text(&self) -> String {
        match self {
            I2cEepromSymbol::SelectRead => "Read".to_string(),
            I2cEepromSymbol::SelectWrite => "Write".to_string(),
            I2cEepromSymbol::PollBusy => "Busy".to_string(),
            I2cEepromSymbol::PollOk => "Ready".to_string(),
            I2cEepromSymbol::Address(a) => format!("Addr: {a:05x}"),
            I2cEepromSymbol::Data(d) => format!("{d:02x}"),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            I2cEepromSymbol::SelectRead | I2cEepromSymbol::SelectWrite => SymbolColor::Control,
            I2cEepromSymbol::PollBusy => SymbolColor::Idle,
            I2cEepromSymbol::PollOk => SymbolColor::ChecksumOk,
            I2cEepromSymbol::Address(_) => SymbolColor::Address,
            I2cEepromSymbol::Data(_) => SymbolColor::Data,
        }
    }
}

const MEMTYPE: &str = "Address Bits";
const BASEADDR: &str = "Base Address";
const ADDRPINS: &str = "Address Pins";

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    DeviceAddr,
    SelectAck,
    PointerByte,
    PointerAck,
    WriteOrRestart,
    ReadSelect,
    ReadSelectAck,
    DataByte,
    DataAck,
}

/// Decoder for 24C00 through 24CM02 serial EEPROMs.
#[derive(Clone)]
pub struct I2cEepromDecoder {
    params: ParamSet,
}

impl Default for I2cEepromDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cEepromDecoder {
    pub fn new() -> Self {
        let mut params = ParamSet::new();

        let memtype = params.declare(MEMTYPE, ParamType::Enum);
        memtype.add_enum_value("4 (24C00)", 4);
        memtype.add_enum_value("7 (24C01)", 7);
        memtype.add_enum_value("8 (24C02)", 8);
        memtype.add_enum_value("9 (24C04)", 9);
        memtype.add_enum_value("10 (24C08)", 10);
        memtype.add_enum_value("11 (24C16)", 11);
        memtype.add_enum_value("12 (24C32)", 12);
        memtype.add_enum_value("13 (24C64 / 24C65)", 13);
        memtype.add_enum_value("14 (24C128)", 14);
        memtype.add_enum_value("15 (24C256)", 15);
        memtype.add_enum_value("16 (24C512)", 16);
        // These devices steal extra I2C address LSBs as memory addresses.
        memtype.add_enum_value("16+1 (24CM01)", 17);
        memtype.add_enum_value("16+2 (24CM02)", 18);
        memtype.set_int(4);

        let base = params.declare(BASEADDR, ParamType::Enum);
        base.add_enum_value("0xA0 (standard 24C)", 0xa0);
        base.add_enum_value("0xB0 (AT24MAC address)", 0xb0);
        base.set_int(0xa0);

        let pins = params.declare(ADDRPINS, ParamType::Enum);
        for a in 0..8i64 {
            pins.add_enum_value(&format!("A[2:0] = {a:03b}"), a << 1);
        }
        pins.set_int(0);

        Self { params }
    }
}

impl PacketMerger for I2cEepromDecoder {
    fn can_merge(&self, first: &Packet, _cur: &Packet, next: &Packet) -> bool {
        // Collapse polling loops.
        first.header("Type").is_some_and(|t| t.starts_with("Poll"))
            && next.header("Type").is_some_and(|t| t.starts_with("Poll"))
    }

    fn create_merged_header(&self, packets: &[Packet], i: usize) -> Packet {
        let pack = &packets[i];
        let mut ret = Packet::new(pack.offset);
        ret.len = pack.len;
        ret.set_header("Type", "Poll");
        ret.color = PacketColor::Status;
        ret
    }
}

impl Filter for I2cEepromDecoder {
    fn protocol_name(&self) -> &'static str {
        "I2C EEPROM"
    }

    fn category(&self) -> Category {
        Category::Memory
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["i2c"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::I2cEeprom)]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port == 0 && stype == StreamType::Protocol(SymbolKind::I2c)
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn headers(&self) -> Vec<&'static str> {
        vec!["Type", "Address", "Len"]
    }

    fn refresh(&mut self, ctx: &mut RefreshContext) {
        if !ctx.all_inputs_ok() {
            ctx.clear_outputs();
            return;
        }
        let Some(din) = ctx.input(0).and_then(Waveform::as_i2c) else {
            ctx.clear_outputs();
            return;
        };

        let base_addr =
            (self.params.int_value(BASEADDR) | self.params.int_value(ADDRPINS)) as u8;
        let raw_bits = self.params.int_value(MEMTYPE);
        let device_bits = (raw_bits - 16).max(0) as u32;
        let pointer_bits = raw_bits.min(16);

        // Mask for the device address, ignoring any stolen pointer LSBs.
        let base_mask: u8 = match device_bits {
            2 => 0xf8,
            1 => 0xfc,
            _ => 0xfe,
        };

        let timescale = din.timebase.timescale;
        let mut cap = SparseWaveform::new(din.timebase);
        let packets = &mut *ctx.packets;

        let mut state = State::Idle;
        let mut tstart = 0i64;
        let mut ptr = 0u32;
        let mut addr_count = 0i64;
        let mut ntype = 0usize;
        let mut last_device_addr = 0u8;
        let mut pack: Option<Packet> = None;

        for i in 0..din.len() {
            let s = din.samples[i];
            let mut end = din.offsets[i] + din.durations[i];

            match state {
                // Wait for a start bit; restarts are fine right after
                // another transaction.
                State::Idle => {
                    if matches!(s, I2cSymbol::Start | I2cSymbol::Restart) {
                        tstart = din.offsets[i];
                        state = State::DeviceAddr;

                        let p = pack.get_or_insert_with(Packet::default);
                        p.data.clear();
                        p.headers.clear();
                        p.offset = din.offsets[i] * timescale;
                        p.len = 0;
                    }
                }

                State::DeviceAddr => match s {
                    I2cSymbol::Address(a) => {
                        if (a & base_mask) != base_addr {
                            state = State::Idle;
                            continue;
                        }
                        last_device_addr = a;

                        // Extra pointer bits stolen from the device address
                        // (24CM series).
                        ptr = match device_bits {
                            2 => ((a & 0x6) >> 1) as u32,
                            1 => ((a & 0x2) >> 1) as u32,
                            _ => 0,
                        };

                        // Pointer updates are always I2C writes, even when
                        // reading data afterwards.
                        if a & 1 != 0 {
                            state = State::Idle;
                        } else {
                            let ui = din.durations[i] / 8;
                            end -= device_bits as i64 * ui;

                            cap.push(tstart, end - tstart, I2cEepromSymbol::SelectRead);
                            state = State::SelectAck;
                            tstart = end;
                        }
                    }
                    _ => state = State::Idle,
                },

                // ACK extends the select sample; NAK means the device is
                // busy mid-write.
                State::SelectAck => match s {
                    I2cSymbol::Ack | I2cSymbol::Nak => {
                        let nlast = cap.len() - 1;
                        if device_bits == 0 {
                            cap.durations[nlast] += din.durations[i];
                            tstart += din.durations[i];
                        }
                        state = State::PointerByte;
                        addr_count = 0;
                        ntype = nlast;

                        if s == I2cSymbol::Nak {
                            cap.samples[nlast] = I2cEepromSymbol::PollBusy;
                            if let Some(mut p) = pack.take() {
                                p.len = end * timescale - p.offset;
                                p.set_header("Type", "Poll - Busy");
                                p.color = PacketColor::Status;
                                packets.push(p);
                            }
                            state = State::Idle;
                        }
                    }
                    _ => state = State::Idle,
                },

                State::PointerByte => match s {
                    I2cSymbol::Data(d) => {
                        ptr = (ptr << 8) | d as u32;
                        addr_count += 1;
                        state = State::PointerAck;
                    }
                    // Stop right after the device select is a polling ping.
                    I2cSymbol::Stop if addr_count == 0 => {
                        cap.samples[ntype] = I2cEepromSymbol::PollOk;
                        if let Some(mut p) = pack.take() {
                            p.len = end * timescale - p.offset;
                            p.set_header("Type", "Poll - OK");
                            p.color = PacketColor::Status;
                            packets.push(p);
                        }
                        state = State::Idle;
                    }
                    _ => state = State::Idle,
                },

                State::PointerAck => match s {
                    I2cSymbol::Nak => state = State::Idle,
                    I2cSymbol::Ack => {
                        if addr_count * 8 >= pointer_bits {
                            cap.push(tstart, end - tstart, I2cEepromSymbol::Address(ptr));
                            tstart = end;
                            state = State::WriteOrRestart;

                            let text = if raw_bits > 16 {
                                format!("{ptr:05x}")
                            } else if raw_bits > 12 {
                                format!("{ptr:04x}")
                            } else if raw_bits > 8 {
                                format!("{ptr:03x}")
                            } else if raw_bits > 4 {
                                format!("{ptr:02x}")
                            } else {
                                format!("{ptr:01x}")
                            };
                            if let Some(p) = pack.as_mut() {
                                p.set_header("Address", text);
                            }
                        } else {
                            state = State::PointerByte;
                        }
                    }
                    _ => state = State::Idle,
                },

                // A restart means a read is coming; data right away is a
                // write data byte.
                State::WriteOrRestart => match s {
                    I2cSymbol::Restart => {
                        cap.samples[ntype] = I2cEepromSymbol::SelectRead;
                        state = State::ReadSelect;
                        if let Some(p) = pack.as_mut() {
                            p.set_header("Type", "Read");
                            p.color = PacketColor::DataRead;
                        }
                    }
                    I2cSymbol::Data(d) => {
                        cap.push(tstart, end - tstart, I2cEepromSymbol::Data(d));
                        tstart = end;
                        if let Some(p) = pack.as_mut() {
                            p.data.push(d);
                            p.set_header("Type", "Write");
                            p.color = PacketColor::DataWrite;
                        }
                        state = State::DataAck;
                        cap.samples[ntype] = I2cEepromSymbol::SelectWrite;
                    }
                    _ => state = State::Idle,
                },

                State::ReadSelect => match s {
                    I2cSymbol::Address(a) => {
                        if (a & 0xfe) != (last_device_addr & 0xfe) {
                            state = State::Idle;
                        } else if a & 1 == 0 {
                            // No sense in restarting with a write.
                            state = State::Idle;
                        } else {
                            state = State::ReadSelectAck;
                        }
                    }
                    _ => state = State::Idle,
                },

                State::ReadSelectAck => match s {
                    I2cSymbol::Nak => state = State::Idle,
                    I2cSymbol::Ack => {
                        // Device selected for readback; extend the address
                        // sample to now.
                        let nlast = cap.len() - 1;
                        cap.durations[nlast] = end - cap.offsets[nlast];
                        tstart = end;
                        state = State::DataByte;
                    }
                    _ => state = State::Idle,
                },

                State::DataByte => match s {
                    I2cSymbol::Data(d) => {
                        cap.push(tstart, end - tstart, I2cEepromSymbol::Data(d));
                        if let Some(p) = pack.as_mut() {
                            p.data.push(d);
                        }
                        state = State::DataAck;
                    }
                    other => {
                        if other == I2cSymbol::Stop {
                            if let Some(mut p) = pack.take() {
                                p.len = end * timescale - p.offset;
                                let len = p.data.len();
                                p.set_header("Len", len.to_string());
                                packets.push(p);
                            }
                        }
                        state = State::Idle;
                    }
                },

                State::DataAck => match s {
                    I2cSymbol::Ack | I2cSymbol::Nak => {
                        let nlast = cap.len() - 1;
                        cap.durations[nlast] = end - cap.offsets[nlast];
                        tstart = end;

                        // NAK ends the transfer.
                        if s == I2cSymbol::Nak {
                            if let Some(mut p) = pack.take() {
                                p.len = end * timescale - p.offset;
                                let len = p.data.len();
                                p.set_header("Len", len.to_string());
                                packets.push(p);
                            }
                            state = State::Idle;
                        } else {
                            state = State::DataByte;
                        }
                    }
                    _ => state = State::Idle,
                },
            }
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::I2cEeprom(cap)));
    }
}
