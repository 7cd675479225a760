//! I2C bus decoder.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::{Packet, PacketColor, PacketMerger};
use crate::parameter::ParamSet;
use crate::signal::{advance_to_timestamp, next_event_timestamp};
use crate::waveform::{
    Digital, SampleSource, SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Timebase,
    Waveform,
};
use log::trace;

/// One decoded I2C bus event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I2cSymbol {
    Start,
    Restart,
    Stop,
    /// Address byte including the R/W flag in bit 0.
    Address(u8),
    Data(u8),
    Ack,
    Nak,
    Error,
}

impl SymbolText for I2cSymbol {
    fn text(&self) -> String {
        match self {
            I2cSymbol::Start => "START".to_string(),
            I2cSymbol::Restart => "RESTART".to_string(),
            I2cSymbol::Stop => "STOP".to_string(),
            I2cSymbol::Address(a) => {
                if a & 1 != 0 {
                    format!("R:{:02x}", a & 0xfe)
                } else {
                    format!("W:{:02x}", a & 0xfe)
                }
            }
            I2cSymbol::Data(d) => format!("{d:02x}"),
            I2cSymbol::Ack => "ACK".to_string(),
            I2cSymbol::Nak => "NAK".to_string(),
            I2cSymbol::Error => "ERR".to_string(),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            I2cSymbol::Error => SymbolColor::Error,
            I2cSymbol::Address(_) => SymbolColor::Address,
            I2cSymbol::Data(_) => SymbolColor::Data,
            I2cSymbol::Ack => SymbolColor::ChecksumOk,
            I2cSymbol::Nak => SymbolColor::Idle,
            _ => SymbolColor::Control,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Start,
    Restart,
    Data,
    Ack,
}

/// Decodes start/stop conditions, addresses, data bytes and ACK bits from
/// SDA/SCL, and groups them into one packet per bus transaction.
#[derive(Clone, Default)]
pub struct I2cDecoder {
    params: ParamSet,
}

impl I2cDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner_loop(
        sda: Digital,
        scl: Digital,
        cap: &mut SparseWaveform<I2cSymbol>,
        packets: &mut Vec<Packet>,
    ) {
        let mut pack: Option<Packet> = None;

        let mut last_scl = true;
        let mut last_sda = true;
        let mut tstart = 0i64;
        let mut phase = Phase::Idle;
        let mut current_byte = 0u8;
        let mut bitcount = 0u8;
        let mut last_was_start = false;
        let mut isda = 0usize;
        let mut iscl = 0usize;
        let mut timestamp = 0i64;

        loop {
            let cur_sda = sda.at(isda);
            let cur_scl = scl.at(iscl);

            // SDA falling with SCL high starts a start condition.
            if !cur_sda && last_sda && cur_scl {
                trace!("found i2c start at time {timestamp}");

                if phase == Phase::Data {
                    // Start condition following data is a restart.
                    phase = Phase::Restart;
                    if let Some(mut p) = pack.take() {
                        p.len = timestamp - p.offset;
                        let len = p.data.len();
                        p.set_header("Len", len.to_string());
                        packets.push(p);
                    }
                } else {
                    tstart = timestamp;
                    phase = Phase::Start;
                }

                // New packet; an incomplete aborted one is recycled.
                let p = pack.get_or_insert_with(Packet::default);
                p.data.clear();
                p.headers.clear();
                p.offset = timestamp;
                p.len = 0;
            }
            // A start bit ends when SDA goes high (first data bit is a 1) or
            // on a falling clock edge.
            else if (phase == Phase::Start || phase == Phase::Restart) && (cur_sda || !cur_scl) {
                let symbol = if phase == Phase::Restart {
                    I2cSymbol::Restart
                } else {
                    I2cSymbol::Start
                };
                cap.push(tstart, timestamp - tstart, symbol);

                last_was_start = true;
                phase = Phase::Data;
                tstart = timestamp;
                bitcount = 0;
                current_byte = 0;
            }
            // SDA rising with SCL high is a stop condition.
            else if cur_sda && !last_sda && cur_scl {
                trace!("found i2c stop at time {timestamp}");

                cap.push(tstart, timestamp - tstart, I2cSymbol::Stop);
                last_was_start = false;
                tstart = timestamp;
                phase = Phase::Idle;

                if let Some(mut p) = pack.take() {
                    p.len = timestamp - p.offset;
                    let len = p.data.len();
                    p.set_header("Len", len.to_string());
                    packets.push(p);
                }
            }
            // A rising SCL edge ends the current bit.
            else if cur_scl && !last_scl {
                match phase {
                    Phase::Data => {
                        bitcount += 1;
                        current_byte <<= 1;
                        if cur_sda {
                            current_byte |= 1;
                        }

                        if bitcount == 8 {
                            let this_len = timestamp - tstart;

                            if last_was_start {
                                // If the start bit was insanely long, shorten it.
                                let nlast = cap.len() - 1;
                                if cap.durations[nlast] > 3 * this_len {
                                    let tend = cap.offsets[nlast] + cap.durations[nlast];
                                    cap.durations[nlast] = this_len;
                                    cap.offsets[nlast] = tend - this_len;
                                }

                                cap.samples.push(I2cSymbol::Address(current_byte));
                                if let Some(p) = pack.as_mut() {
                                    p.set_header(
                                        "Address",
                                        format!("{:02x}", current_byte & 0xfe),
                                    );
                                    if current_byte & 1 != 0 {
                                        p.set_header("Op", "Read");
                                        p.color = PacketColor::DataRead;
                                    } else {
                                        p.set_header("Op", "Write");
                                        p.color = PacketColor::DataWrite;
                                    }
                                }
                            } else {
                                cap.samples.push(I2cSymbol::Data(current_byte));
                                if let Some(p) = pack.as_mut() {
                                    p.data.push(current_byte);
                                }
                            }
                            cap.offsets.push(tstart);
                            cap.durations.push(this_len);

                            last_was_start = false;
                            bitcount = 0;
                            current_byte = 0;
                            tstart = timestamp;
                            phase = Phase::Ack;
                        }
                    }
                    Phase::Ack => {
                        let symbol = if cur_sda { I2cSymbol::Nak } else { I2cSymbol::Ack };
                        cap.push(tstart, timestamp - tstart, symbol);
                        last_was_start = false;
                        tstart = timestamp;
                        phase = Phase::Data;
                    }
                    _ => {}
                }
            }

            last_sda = cur_sda;
            last_scl = cur_scl;

            let next_sda = next_event_timestamp(&sda, isda, timestamp);
            let next_scl = next_event_timestamp(&scl, iscl, timestamp);
            let next = next_sda.min(next_scl);
            if next == timestamp {
                break;
            }
            timestamp = next;
            advance_to_timestamp(&sda, &mut isda, timestamp);
            advance_to_timestamp(&scl, &mut iscl, timestamp);
        }
    }
}

impl PacketMerger for I2cDecoder {}

impl Filter for I2cDecoder {
    fn protocol_name(&self) -> &'static str {
        "I2C"
    }

    fn category(&self) -> Category {
        Category::Bus
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["sda", "scl"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::I2c)]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port < 2 && stype == StreamType::Digital
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn headers(&self) -> Vec<&'static str> {
        vec!["Op", "Address", "Len"]
    }

    fn refresh(&mut self, ctx: &mut RefreshContext) {
        if !ctx.all_inputs_ok() {
            ctx.clear_outputs();
            return;
        }
        let (Some(sda), Some(scl)) = (ctx.digital_input(0), ctx.digital_input(1)) else {
            ctx.clear_outputs();
            return;
        };

        let mut cap = SparseWaveform::new(Timebase::fs_unit(sda.timebase()));
        Self::inner_loop(sda, scl, &mut cap, ctx.packets);
        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::I2c(cap)));
    }
}
