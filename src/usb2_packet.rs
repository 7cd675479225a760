//! USB 1.x/2.0 packet layer decoder: PCS bytes to PIDs, tokens, data and
//! handshakes, plus packetized transaction summaries.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::{Packet, PacketColor, PacketMerger};
use crate::parameter::ParamSet;
use crate::usb2_pcs::Usb2PcsSymbol;
use crate::waveform::{
    SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Waveform,
};
use log::{debug, trace};

/// Packet identifier low nibbles.
pub mod pid {
    pub const RESERVED: u8 = 0x0;
    pub const OUT: u8 = 0x1;
    pub const ACK: u8 = 0x2;
    pub const DATA0: u8 = 0x3;
    pub const PING: u8 = 0x4;
    pub const SOF: u8 = 0x5;
    pub const NYET: u8 = 0x6;
    pub const DATA2: u8 = 0x7;
    pub const SPLIT: u8 = 0x8;
    pub const IN: u8 = 0x9;
    pub const NAK: u8 = 0xa;
    pub const DATA1: u8 = 0xb;
    pub const PRE_ERR: u8 = 0xc;
    pub const SETUP: u8 = 0xd;
    pub const STALL: u8 = 0xe;
    pub const MDATA: u8 = 0xf;
}

/// One decoded packet-layer field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Usb2PacketSymbol {
    /// Full PID byte; the check nibble has already been validated.
    Pid(u8),
    Addr(u8),
    Endpoint(u8),
    /// SOF frame number.
    NFrame(u16),
    Crc5(u8),
    Crc16(u16),
    Data(u8),
    Error,
}

pub fn pid_name(p: u8) -> &'static str {
    match p & 0xf {
        pid::RESERVED => "RESERVED",
        pid::OUT => "OUT",
        pid::ACK => "ACK",
        pid::DATA0 => "DATA0",
        pid::PING => "PING",
        pid::SOF => "SOF",
        pid::NYET => "NYET",
        pid::DATA2 => "DATA2",
        pid::SPLIT => "SPLIT",
        pid::IN => "IN",
        pid::NAK => "NAK",
        pid::DATA1 => "DATA1",
        pid::PRE_ERR => "PRE/ERR",
        pid::SETUP => "SETUP",
        pid::STALL => "STALL",
        _ => "MDATA",
    }
}

impl SymbolText for Usb2PacketSymbol {
    fn text(&self) -> String {
        match self {
            Usb2PacketSymbol::Pid(p) => pid_name(*p).to_string(),
            Usb2PacketSymbol::Addr(a) => format!("Dev {a}"),
            Usb2PacketSymbol::Endpoint(e) => format!("EP {e}"),
            Usb2PacketSymbol::NFrame(n) => format!("Frame {n}"),
            Usb2PacketSymbol::Crc5(c) => format!("CRC {c:02x}"),
            Usb2PacketSymbol::Crc16(c) => format!("CRC {c:04x}"),
            Usb2PacketSymbol::Data(d) => format!("{d:02x}"),
            Usb2PacketSymbol::Error => "ERROR".to_string(),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            Usb2PacketSymbol::Pid(p) => {
                if (p & 0xf) == pid::RESERVED || (p & 0xf) == pid::STALL {
                    SymbolColor::Error
                } else {
                    SymbolColor::Preamble
                }
            }
            Usb2PacketSymbol::Addr(_) | Usb2PacketSymbol::Endpoint(_) => SymbolColor::Address,
            Usb2PacketSymbol::NFrame(_) | Usb2PacketSymbol::Data(_) => SymbolColor::Data,
            Usb2PacketSymbol::Crc5(_) | Usb2PacketSymbol::Crc16(_) => SymbolColor::ChecksumOk,
            Usb2PacketSymbol::Error => SymbolColor::Error,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Pid,
    End,
    Token0,
    Token1,
    Sof0,
    Sof1,
    Data,
}

/// Decoder from the PCS byte stream to packet-layer symbols and transaction
/// packets.
#[derive(Clone, Default)]
pub struct Usb2PacketDecoder {
    params: ParamSet,
}

impl Usb2PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_sof(
        cap: &SparseWaveform<Usb2PacketSymbol>,
        istart: usize,
        i: &mut usize,
        packets: &mut Vec<Packet>,
    ) {
        let timescale = cap.timebase.timescale;
        if *i + 1 >= cap.len() {
            debug!("truncated SOF");
            return;
        }
        let snframe = cap.samples[*i];
        *i += 1;
        let icrc = *i;
        *i += 1;
        let Usb2PacketSymbol::NFrame(nframe) = snframe else {
            return;
        };
        if !matches!(cap.samples[icrc], Usb2PacketSymbol::Crc5(_)) {
            return;
        }

        let mut pack = Packet::new(cap.offsets[istart] * timescale);
        pack.set_header("Type", "SOF");
        pack.set_header("Details", format!("Sequence = {nframe}"));
        pack.set_header("Device", "--");
        pack.set_header("Endpoint", "--");
        pack.set_header("Length", "2");
        pack.len = (cap.offsets[icrc] + cap.durations[icrc]) * timescale - pack.offset;
        packets.push(pack);
    }

    fn decode_setup(
        cap: &SparseWaveform<Usb2PacketSymbol>,
        istart: usize,
        i: &mut usize,
        packets: &mut Vec<Packet>,
    ) {
        let timescale = cap.timebase.timescale;

        // A SETUP token carries ADDR, ENDP, CRC5.
        if *i + 2 >= cap.len() {
            debug!("truncated SETUP");
            return;
        }
        let saddr = cap.samples[*i];
        *i += 1;
        let sendp = cap.samples[*i];
        *i += 1;
        let scrc = cap.samples[*i];
        *i += 1;
        let Usb2PacketSymbol::Addr(addr) = saddr else {
            return;
        };
        let Usb2PacketSymbol::Endpoint(endp) = sendp else {
            return;
        };
        if !matches!(scrc, Usb2PacketSymbol::Crc5(_)) {
            return;
        }

        // Expect a DATA0 packet: PID, 8 bytes, CRC16.
        if *i + 9 >= cap.len() {
            debug!("truncated data");
            return;
        }
        let Usb2PacketSymbol::Pid(datpid) = cap.samples[*i] else {
            return;
        };
        *i += 1;
        if datpid & 0xf != pid::DATA0 {
            return;
        }
        let mut data = [0u8; 8];
        for byte in &mut data {
            let Usb2PacketSymbol::Data(d) = cap.samples[*i] else {
                return;
            };
            *i += 1;
            *byte = d;
        }
        let idcrc = *i;
        *i += 1;
        if !matches!(cap.samples[idcrc], Usb2PacketSymbol::Crc16(_)) {
            return;
        }

        // Expect the handshake.
        if *i >= cap.len() {
            debug!("truncated ACK");
            return;
        }
        let sack = cap.samples[*i];
        *i += 1;
        let ack = match sack {
            Usb2PacketSymbol::Pid(p) if p & 0xf == pid::ACK => "ACK",
            Usb2PacketSymbol::Pid(p) if p & 0xf == pid::NAK => "NAK",
            Usb2PacketSymbol::Pid(_) => "Unknown end PID",
            _ => "",
        };

        let mut pack = Packet::new(cap.offsets[istart] * timescale);
        pack.set_header("Type", "SETUP");
        pack.set_header("Device", addr.to_string());
        pack.set_header("Endpoint", endp.to_string());
        pack.set_header("Length", "8");

        let bm_request_type = data[0];
        let b_request = data[1];
        let w_value = (data[3] as u16) << 8 | data[2] as u16;
        let w_index = (data[5] as u16) << 8 | data[4] as u16;
        let w_length = (data[7] as u16) << 8 | data[6] as u16;
        let out = bm_request_type >> 7 != 0;
        let stype = match (bm_request_type >> 5) & 3 {
            0 => "Standard",
            1 => "Class",
            2 => "Vendor",
            _ => "Reserved",
        };
        let sdest = match bm_request_type & 0x1f {
            0 => "device",
            1 => "interface",
            2 => "endpoint",
            _ => "reserved",
        };
        pack.set_header(
            "Details",
            format!(
                "{} {} req to {} bRequest={:x} wValue={:x} wIndex={:x} wLength={} {}",
                if out { "Host:" } else { "Dev:" },
                stype,
                sdest,
                b_request,
                w_value,
                w_index,
                w_length,
                ack
            ),
        );

        pack.len = (cap.offsets[idcrc] + cap.durations[idcrc]) * timescale - pack.offset;
        packets.push(pack);
    }

    fn decode_data(
        cap: &SparseWaveform<Usb2PacketSymbol>,
        istart: usize,
        i: &mut usize,
        packets: &mut Vec<Packet>,
    ) {
        let timescale = cap.timebase.timescale;

        // The IN/OUT token carries ADDR, ENDP, CRC5.
        if *i + 2 >= cap.len() {
            return;
        }
        let saddr = cap.samples[*i];
        *i += 1;
        let sendp = cap.samples[*i];
        *i += 1;
        let scrc = cap.samples[*i];
        *i += 1;
        let Usb2PacketSymbol::Addr(addr) = saddr else {
            return;
        };
        let Usb2PacketSymbol::Endpoint(endp) = sendp else {
            return;
        };
        if !matches!(scrc, Usb2PacketSymbol::Crc5(_)) {
            return;
        }

        if *i >= cap.len() {
            debug!("truncated DATA");
            return;
        }

        let in_token = matches!(cap.samples[istart], Usb2PacketSymbol::Pid(p) if p & 0xf == pid::IN);
        let token_type = if in_token { "IN" } else { "OUT" };

        let mut sdatpid = cap.samples[*i];
        let Usb2PacketSymbol::Pid(mut datpid) = sdatpid else {
            return;
        };

        // A SOF can land anywhere; skip past it.
        if datpid & 0xf == pid::SOF {
            debug!("SOF in the middle of a transaction");
            let mut j = *i + 1;
            Self::decode_sof(cap, *i, &mut j, packets);
            *i = j;
            if *i >= cap.len() {
                return;
            }
            sdatpid = cap.samples[*i];
            let Usb2PacketSymbol::Pid(p) = sdatpid else {
                return;
            };
            datpid = p;
        } else if datpid & 0xf == pid::NAK {
            *i += 1;

            // Aborted transaction.
            let mut pack = Packet::new(cap.offsets[istart] * timescale);
            pack.set_header("Type", token_type);
            pack.set_header("Device", addr.to_string());
            pack.set_header("Endpoint", endp.to_string());
            pack.set_header("Details", "NAK");
            pack.color = PacketColor::Error;
            packets.push(pack);
            return;
        } else {
            *i += 1;
        }

        if datpid & 0xf != pid::DATA0 && datpid & 0xf != pid::DATA1 {
            debug!("expected data PID, got {datpid:x}");
            let mut pack = Packet::new(cap.offsets[istart] * timescale);
            pack.set_header("Details", "ERROR");
            pack.color = PacketColor::Error;
            packets.push(pack);
            return;
        }

        let mut pack = Packet::new(cap.offsets[istart] * timescale);
        pack.set_header("Type", token_type);
        pack.set_header("Device", addr.to_string());
        pack.set_header("Endpoint", endp.to_string());
        pack.color = if in_token {
            PacketColor::DataRead
        } else {
            PacketColor::DataWrite
        };

        // Payload runs until the CRC16.
        while *i < cap.len() {
            match cap.samples[*i] {
                Usb2PacketSymbol::Data(d) => {
                    pack.data.push(d);
                    pack.len =
                        (cap.offsets[*i] + cap.durations[*i]) * timescale - pack.offset;
                }
                Usb2PacketSymbol::Crc16(_) => {
                    *i += 1;
                    break;
                }
                _ => {}
            }
            *i += 1;
        }

        if *i >= cap.len() {
            debug!("truncated ACK");
            return;
        }
        let sack = cap.samples[*i];
        *i += 1;
        let ack = match sack {
            Usb2PacketSymbol::Pid(p) if p & 0xf == pid::ACK => "",
            Usb2PacketSymbol::Pid(p) if p & 0xf == pid::NAK => "NAK",
            Usb2PacketSymbol::Pid(_) => "Unknown end PID",
            _ => "Not a PID",
        };

        let mut details: String = pack.data.iter().map(|b| format!("{b:02x} ")).collect();
        details += ack;
        pack.set_header("Details", details);
        pack.set_header("Length", pack.data.len().to_string());
        packets.push(pack);
    }
}

impl PacketMerger for Usb2PacketDecoder {
    fn can_merge(&self, first: &Packet, _cur: &Packet, next: &Packet) -> bool {
        // Collapse runs of keepalive frames.
        first.header("Type") == Some("SOF") && next.header("Type") == Some("SOF")
    }

    fn create_merged_header(&self, packets: &[Packet], i: usize) -> Packet {
        let first = &packets[i];
        let mut count = 1;
        let mut last = first;
        for p in &packets[i + 1..] {
            if p.header("Type") != Some("SOF") {
                break;
            }
            last = p;
            count += 1;
        }
        let mut ret = Packet::new(first.offset);
        ret.len = last.offset + last.len - first.offset;
        ret.set_header("Type", "SOF");
        ret.set_header("Device", "--");
        ret.set_header("Endpoint", "--");
        ret.set_header("Length", (2 * count).to_string());
        ret.set_header("Details", format!("{count} consecutive frames"));
        ret
    }
}

impl Filter for Usb2PacketDecoder {
    fn protocol_name(&self) -> &'static str {
        "USB 1.0/2.x Packet"
    }

    fn category(&self) -> Category {
        Category::Serial
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["PCS"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::Usb2Packet)]
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

    fn headers(&self) -> Vec<&'static str> {
        vec!["Type", "Device", "Endpoint", "Length", "Details"]
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
        let len = din.len();

        let mut cap = SparseWaveform::new(din.timebase);
        let mut state = State::Idle;
        let mut last = 0u8;
        let mut last_offset = 0i64;

        for i in 0..len {
            let sin = din.samples[i];
            let halfdur = din.durations[i] / 2;

            match state {
                State::Idle => match sin {
                    Usb2PcsSymbol::Sync => state = State::Pid,
                    Usb2PcsSymbol::Reset => {}
                    _ => {
                        cap.push(din.offsets[i], din.durations[i], Usb2PacketSymbol::Error);
                    }
                },

                State::Pid => {
                    let Usb2PcsSymbol::Data(byte) = sin else {
                        cap.push(din.offsets[i], din.durations[i], Usb2PacketSymbol::Error);
                        state = State::Idle;
                        continue;
                    };

                    // The check nibble must be the complement of the PID.
                    if byte >> 4 != 0xf & !byte {
                        cap.push(din.offsets[i], din.durations[i], Usb2PacketSymbol::Error);
                        state = State::Idle;
                        continue;
                    }

                    cap.push(din.offsets[i], din.durations[i], Usb2PacketSymbol::Pid(byte));
                    trace!("usb2 pid {}", pid_name(byte));

                    state = match byte & 0xf {
                        pid::ACK | pid::STALL | pid::NAK | pid::NYET | pid::PRE_ERR => State::End,
                        pid::IN | pid::OUT | pid::SETUP | pid::PING | pid::SPLIT => State::Token0,
                        pid::SOF => State::Sof0,
                        pid::DATA0 | pid::DATA1 | pid::DATA2 | pid::MDATA => State::Data,
                        _ => State::Idle,
                    };
                }

                State::End => {
                    if sin != Usb2PcsSymbol::Eop {
                        cap.push(din.offsets[i], din.durations[i], Usb2PacketSymbol::Error);
                    }
                }

                // Tokens cross byte boundaries.
                State::Token0 => {
                    if let Usb2PcsSymbol::Data(byte) = sin {
                        cap.push(
                            din.offsets[i],
                            din.durations[i],
                            Usb2PacketSymbol::Addr(byte & 0x7f),
                        );
                        last = byte;
                        state = State::Token1;
                    } else {
                        cap.push(din.offsets[i], din.durations[i], Usb2PacketSymbol::Error);
                        state = State::Idle;
                    }
                }

                State::Token1 => {
                    if let Usb2PcsSymbol::Data(byte) = sin {
                        cap.push(
                            din.offsets[i],
                            halfdur,
                            Usb2PacketSymbol::Endpoint((last >> 7) | ((byte & 0x7) << 1)),
                        );
                        cap.push(
                            din.offsets[i] + halfdur,
                            halfdur,
                            Usb2PacketSymbol::Crc5(byte >> 3),
                        );
                        state = State::End;
                    } else {
                        cap.push(din.offsets[i], din.durations[i], Usb2PacketSymbol::Error);
                        state = State::Idle;
                    }
                }

                State::Sof0 => {
                    if let Usb2PcsSymbol::Data(byte) = sin {
                        last = byte;
                        last_offset = din.offsets[i];
                        state = State::Sof1;
                    } else {
                        cap.push(din.offsets[i], din.durations[i], Usb2PacketSymbol::Error);
                        state = State::Idle;
                    }
                }

                State::Sof1 => {
                    if let Usb2PcsSymbol::Data(byte) = sin {
                        // Frame number spans the previous byte plus the low
                        // three bits of this one.
                        cap.push(
                            last_offset,
                            din.offsets[i] - last_offset + halfdur,
                            Usb2PacketSymbol::NFrame(((byte & 0x7) as u16) << 8 | last as u16),
                        );
                        cap.push(
                            din.offsets[i] + halfdur,
                            halfdur,
                            Usb2PacketSymbol::Crc5(byte >> 3),
                        );
                        state = State::End;
                    } else {
                        cap.push(din.offsets[i], din.durations[i], Usb2PacketSymbol::Error);
                        state = State::Idle;
                    }
                }

                State::Data => match sin {
                    // Data bytes go in as data; the final two turn out to be
                    // the CRC and get merged when the EOP shows up.
                    Usb2PcsSymbol::Data(byte) => {
                        cap.push(din.offsets[i], din.durations[i], Usb2PacketSymbol::Data(byte));
                    }
                    Usb2PcsSymbol::Eop => {
                        if cap.len() >= 2 {
                            let firstoff = cap.len() - 2;
                            let secondoff = cap.len() - 1;
                            if let (
                                Usb2PacketSymbol::Data(hi),
                                Usb2PacketSymbol::Data(lo),
                            ) = (cap.samples[firstoff], cap.samples[secondoff])
                            {
                                cap.durations[firstoff] += cap.durations[secondoff];
                                cap.samples[firstoff] =
                                    Usb2PacketSymbol::Crc16((hi as u16) << 8 | lo as u16);
                                cap.offsets.truncate(secondoff);
                                cap.durations.truncate(secondoff);
                                cap.samples.truncate(secondoff);
                            }
                        }
                    }
                    _ => {}
                },
            }

            // EOP always returns to idle.
            if sin == Usb2PcsSymbol::Eop {
                state = State::Idle;
            }
        }

        // Packetize the symbol stream.
        if cap.len() > 2 {
            let packets = &mut *ctx.packets;
            let mut i = 0;
            while i < cap.len() - 2 {
                let istart = i;
                let Usb2PacketSymbol::Pid(p) = cap.samples[i] else {
                    i += 1;
                    continue;
                };
                i += 1;

                match p & 0xf {
                    pid::SOF => Self::decode_sof(&cap, istart, &mut i, packets),
                    pid::SETUP => Self::decode_setup(&cap, istart, &mut i, packets),
                    pid::IN | pid::OUT => Self::decode_data(&cap, istart, &mut i, packets),
                    other => debug!("unexpected pid {other:x}"),
                }
            }
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Usb2Packet(
            cap,
        )));
    }
}
