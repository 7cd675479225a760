//! Register-style I2C peripheral decoder: pointer write then data phase.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::i2c::I2cSymbol;
use crate::packet::{Packet, PacketColor, PacketMerger};
use crate::parameter::{ParamSet, ParamType};
use crate::waveform::{SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Waveform};

/// One decoded register-transaction element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I2cRegisterSymbol {
    SelectRead,
    SelectWrite,
    Address(u32),
    Data(u8),
}

impl SymbolText for I2cRegisterSymbol {
    fn text(&self) -> String {
        match self {
            I2cRegisterSymbol::SelectRead => "Read".to_string(),
            I2cRegisterSymbol::SelectWrite => "Write".to_string(),
            I2cRegisterSymbol::Address(a) => format!("Reg: {a:02x}"),
            I2cRegisterSymbol::Data(d) => format!("{d:02x}"),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            I2cRegisterSymbol::SelectRead | I2cRegisterSymbol::SelectWrite => SymbolColor::Control,
            I2cRegisterSymbol::Address(_) => SymbolColor::Address,
            I2cRegisterSymbol::Data(_) => SymbolColor::Data,
        }
    }
}

const ADDR_BYTES: &str = "Address Bytes";
const BUS_ADDR: &str = "Bus Address";

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

/// Decoder for register-mapped I2C peripherals with a 1 to 4 byte register
/// pointer.
#[derive(Clone)]
pub struct I2cRegisterDecoder {
    params: ParamSet,
}

impl Default for I2cRegisterDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cRegisterDecoder {
    pub fn new() -> Self {
        let mut params = ParamSet::new();

        let bytes = params.declare(ADDR_BYTES, ParamType::Enum);
        for i in 1..=4i64 {
            bytes.add_enum_value(&i.to_string(), i);
        }
        bytes.set_int(1);

        params.declare(BUS_ADDR, ParamType::Int).set_int(0x90);

        Self { params }
    }
}

impl PacketMerger for I2cRegisterDecoder {}

impl Filter for I2cRegisterDecoder {
    fn protocol_name(&self) -> &'static str {
        "I2C Register"
    }

    fn category(&self) -> Category {
        Category::Bus
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["i2c"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::I2cRegister)]
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

        let base_addr = self.params.int_value(BUS_ADDR) as u8;
        let pointer_bytes = self.params.int_value(ADDR_BYTES).clamp(1, 4);

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
            let end = din.offsets[i] + din.durations[i];

            match state {
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
                        if (a & 0xfe) != base_addr {
                            state = State::Idle;
                            continue;
                        }
                        last_device_addr = a;

                        // Pointer updates are always I2C writes.
                        if a & 1 != 0 {
                            state = State::Idle;
                        } else {
                            cap.push(tstart, end - tstart, I2cRegisterSymbol::SelectRead);
                            state = State::SelectAck;
                            tstart = end;
                        }
                    }
                    _ => state = State::Idle,
                },

                State::SelectAck => match s {
                    I2cSymbol::Ack => {
                        let nlast = cap.len() - 1;
                        cap.durations[nlast] += din.durations[i];
                        tstart += din.durations[i];

                        state = State::PointerByte;
                        ptr = 0;
                        addr_count = 0;
                        ntype = nlast;
                    }
                    I2cSymbol::Nak => {
                        pack = None;
                        state = State::Idle;
                    }
                    _ => state = State::Idle,
                },

                State::PointerByte => match s {
                    I2cSymbol::Data(d) => {
                        ptr = (ptr << 8) | d as u32;
                        addr_count += 1;
                        state = State::PointerAck;
                    }
                    _ => state = State::Idle,
                },

                State::PointerAck => match s {
                    I2cSymbol::Nak => state = State::Idle,
                    I2cSymbol::Ack => {
                        if addr_count >= pointer_bytes {
                            cap.push(tstart, end - tstart, I2cRegisterSymbol::Address(ptr));
                            tstart = end;
                            state = State::WriteOrRestart;

                            let text = match pointer_bytes {
                                1 => format!("{ptr:02x}"),
                                2 => format!("{ptr:04x}"),
                                3 => format!("{ptr:06x}"),
                                _ => format!("{ptr:08x}"),
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

                // A restart (or stop/start pair) means a read; data right
                // away is a write data byte.
                State::WriteOrRestart => match s {
                    I2cSymbol::Stop => {}
                    I2cSymbol::Restart | I2cSymbol::Start => {
                        cap.samples[ntype] = I2cRegisterSymbol::SelectRead;
                        state = State::ReadSelect;
                        if let Some(p) = pack.as_mut() {
                            p.set_header("Type", "Read");
                            p.color = PacketColor::DataRead;
                        }
                    }
                    I2cSymbol::Data(d) => {
                        cap.push(tstart, end - tstart, I2cRegisterSymbol::Data(d));
                        tstart = end;
                        if let Some(p) = pack.as_mut() {
                            p.data.push(d);
                            p.set_header("Type", "Write");
                            p.color = PacketColor::DataWrite;
                        }
                        state = State::DataAck;
                        cap.samples[ntype] = I2cRegisterSymbol::SelectWrite;
                    }
                    _ => state = State::Idle,
                },

                State::ReadSelect => match s {
                    I2cSymbol::Address(a) => {
                        if (a & 0xfe) != (last_device_addr & 0xfe) {
                            state = State::Idle;
                        } else if a & 1 == 0 {
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
                        let nlast = cap.len() - 1;
                        cap.durations[nlast] = end - cap.offsets[nlast];
                        tstart = end;
                        state = State::DataByte;
                    }
                    _ => state = State::Idle,
                },

                State::DataByte => match s {
                    I2cSymbol::Data(d) => {
                        cap.push(tstart, end - tstart, I2cRegisterSymbol::Data(d));
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

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::I2cRegister(
            cap,
        )));
    }
}
