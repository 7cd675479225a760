//! PCIe gen 3 logical sublayer decoder: lane destriping and framing tokens.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::PacketMerger;
use crate::parameter::{ParamSet, ParamType};
use crate::pcie_128b130b::{BlockSymbol, BlockType};
use crate::waveform::{
    SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Timebase, Waveform,
};
use log::trace;

/// One logical-layer event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gen3Symbol {
    /// No scrambler lock yet; nothing decodable.
    NoScrambler,
    /// Skip ordered set.
    Skip,
    LogicalIdle,
    StartDllp,
    StartTlp,
    EndDataStream,
    /// EDB: TLP cancelled by the transmitter.
    EndBad,
    /// Implicit end of a TLP.
    End,
    Payload(u8),
    Error,
}

impl SymbolText for Gen3Symbol {
    fn text(&self) -> String {
        match self {
            Gen3Symbol::NoScrambler => "Scrambler desynced".to_string(),
            Gen3Symbol::Skip => "SKP".to_string(),
            Gen3Symbol::LogicalIdle => "IDL".to_string(),
            Gen3Symbol::StartDllp => "SDP".to_string(),
            Gen3Symbol::StartTlp => "STP".to_string(),
            Gen3Symbol::EndDataStream => "EDS".to_string(),
            Gen3Symbol::EndBad => "EDB".to_string(),
            Gen3Symbol::End => "END".to_string(),
            Gen3Symbol::Payload(d) => format!("{d:02x}"),
            Gen3Symbol::Error => "ERROR".to_string(),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            Gen3Symbol::NoScrambler => SymbolColor::Preamble,
            Gen3Symbol::Skip | Gen3Symbol::LogicalIdle => SymbolColor::Idle,
            Gen3Symbol::Payload(_) => SymbolColor::Data,
            Gen3Symbol::Error | Gen3Symbol::EndBad => SymbolColor::Error,
            _ => SymbolColor::Control,
        }
    }
}

const LANE_COUNT: &str = "Lane Count";
/// Destriping supports up to four lanes.
const MAX_LANES: usize = 4;

#[derive(Clone, Copy, PartialEq, Eq)]
enum PacketState {
    Idle,
    StartDllp,
    Dllp,
    Eds1,
    Eds2,
    Eds3,
    Stp1,
    TlpData,
    Edb,
}

/// Decoder from one or more 128b/130b lanes to logical-layer symbols.
/// Lanes are synchronized by their first skip ordered set; bytes are
/// striped across lanes within each 128-bit block, not across blocks.
#[derive(Clone)]
pub struct PcieGen3Decoder {
    params: ParamSet,
}

impl Default for PcieGen3Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PcieGen3Decoder {
    pub fn new() -> Self {
        let mut params = ParamSet::new();
        let lanes = params.declare(LANE_COUNT, ParamType::Enum);
        for i in 1..=MAX_LANES as i64 {
            lanes.add_enum_value(&i.to_string(), i);
        }
        lanes.set_int(1);
        Self { params }
    }

    /// Extend a trailing logical idle or append a new one.
    fn add_logical_idle(cap: &mut SparseWaveform<Gen3Symbol>, start: i64, end: i64) {
        if let Some(last) = cap.len().checked_sub(1) {
            if cap.samples[last] == Gen3Symbol::LogicalIdle {
                cap.durations[last] = end - cap.offsets[last];
                return;
            }
        }
        cap.push(start, end - start, Gen3Symbol::LogicalIdle);
    }
}

impl PacketMerger for PcieGen3Decoder {}

impl Filter for PcieGen3Decoder {
    fn protocol_name(&self) -> &'static str {
        "PCIe Gen 3 Logical"
    }

    fn category(&self) -> Category {
        Category::Bus
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["lane0", "lane1", "lane2", "lane3"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::Gen3)]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port < MAX_LANES && stype == StreamType::Protocol(SymbolKind::Block128b130b)
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn refresh(&mut self, ctx: &mut RefreshContext) {
        let nports = self.params.int_value(LANE_COUNT).clamp(1, MAX_LANES as i64) as usize;

        let mut inputs: Vec<&SparseWaveform<BlockSymbol>> = Vec::new();
        for i in 0..nports {
            match ctx.input(i).and_then(Waveform::as_128b130b) {
                Some(w) if !w.is_empty() => inputs.push(w),
                _ => {
                    ctx.clear_outputs();
                    return;
                }
            }
        }
        let in0 = inputs[0];
        let timescale = in0.timebase.timescale;
        let trigger_phase = in0.timebase.trigger_phase;

        let mut cap = SparseWaveform::new(Timebase::fs_unit(&in0.timebase));

        // Synchronize the lanes on their first skip ordered set.
        let mut indexes: Vec<usize> = Vec::new();
        for input in &inputs {
            let mut j = 0;
            while j < input.len() {
                let sym = input.samples[j];
                if sym.stype == BlockType::OrderedSet && sym.data[0] == 0xaa {
                    break;
                }
                j += 1;
            }
            indexes.push(j);
        }
        if indexes.iter().zip(&inputs).any(|(&j, w)| j >= w.len()) {
            trace!("no skip ordered set found, cannot destripe");
            ctx.clear_outputs();
            return;
        }

        // Nothing is decodable before the first skip set.
        let mut symstart = in0.offsets[indexes[0]] * timescale + trigger_phase;
        if symstart > 0 {
            cap.push(0, symstart, Gen3Symbol::NoScrambler);
        }
        cap.push(
            symstart,
            in0.durations[indexes[0]] * timescale,
            Gen3Symbol::Skip,
        );
        // The synchronizing skip set is already represented; start the walk
        // on the next block of each lane.
        for (j, input) in inputs.iter().enumerate() {
            indexes[j] += 1;
            if indexes[j] >= input.len() {
                ctx.outputs[0]
                    .set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Gen3(cap)));
                return;
            }
        }

        let mut packet_state = PacketState::Idle;
        let mut count = 0i64;
        let mut packet_len = 0i64;

        loop {
            let i0 = indexes[0];
            symstart = in0.offsets[i0] * timescale + trigger_phase;
            let symlen = in0.durations[i0] * timescale;
            let sublen = symlen / (nports as i64 * 16);

            if in0.samples[i0].stype == BlockType::OrderedSet {
                // Ordered sets occupy all lanes at once.
                match in0.samples[i0].data[0] {
                    // SOS
                    0xaa => {
                        cap.push(symstart, symlen, Gen3Symbol::Skip);
                    }
                    // EIEOS / EIOS / FTS / TS1 / TS2 / SDS
                    0x00 | 0x66 | 0x55 | 0x1e | 0x2d | 0xe1 => {
                        Self::add_logical_idle(&mut cap, symstart, symstart + symlen);
                    }
                    _ => {
                        cap.push(symstart, symlen, Gen3Symbol::Error);
                    }
                }
            } else {
                // Bytes are striped across lanes within the block.
                for k in 0..16usize {
                    for (j, data) in inputs.iter().enumerate() {
                        let i = indexes[j];
                        let sym = data.samples[i];
                        let byte = sym.data[k];

                        let off = symstart + (k * nports + j) as i64 * sublen;
                        let mut dur = sublen;
                        let mut seg_end = off + sublen;
                        if k == 15 && j == nports - 1 {
                            seg_end = symstart + symlen;
                            dur = seg_end - off;
                        }

                        let mut error = sym.stype == BlockType::Error;
                        if !error {
                            let len = cap.len();
                            match packet_state {
                                PacketState::Idle => match byte {
                                    0x00 => Self::add_logical_idle(&mut cap, off, seg_end),
                                    // SDP F0 AC
                                    0xf0 => {
                                        cap.push(off, dur, Gen3Symbol::StartDllp);
                                        packet_state = PacketState::StartDllp;
                                    }
                                    // EDS 1F 80 90 00
                                    0x1f => {
                                        cap.push(off, dur, Gen3Symbol::EndDataStream);
                                        packet_state = PacketState::Eds1;
                                    }
                                    // EDB C0 C0 C0 C0
                                    0xc0 => {
                                        cap.push(off, dur, Gen3Symbol::EndBad);
                                        packet_state = PacketState::Edb;
                                        count = 0;
                                    }
                                    // STP: low nibble F, high nibble is the
                                    // bottom of the 11-bit dword length.
                                    b if b & 0x0f == 0x0f => {
                                        count = 0;
                                        packet_len = (b >> 4) as i64;
                                        packet_state = PacketState::Stp1;
                                        cap.push(off, dur, Gen3Symbol::StartTlp);
                                    }
                                    _ => error = true,
                                },

                                PacketState::StartDllp => {
                                    if byte == 0xac {
                                        cap.durations[len - 1] = seg_end - cap.offsets[len - 1];
                                        count = 0;
                                        packet_state = PacketState::Dllp;
                                    } else {
                                        error = true;
                                    }
                                }

                                // DLLPs are always six bytes.
                                PacketState::Dllp => {
                                    cap.push(off, dur, Gen3Symbol::Payload(byte));
                                    count += 1;
                                    if count == 6 {
                                        packet_state = PacketState::Idle;
                                    }
                                }

                                PacketState::Stp1 => {
                                    cap.durations[len - 1] = seg_end - cap.offsets[len - 1];
                                    packet_len |= ((byte & 0x7f) as i64) << 4;
                                    // Length is in dwords; the sequence
                                    // number is not part of the payload.
                                    packet_len = packet_len * 4 - 2;
                                    packet_state = PacketState::TlpData;
                                }

                                PacketState::TlpData => {
                                    count += 1;
                                    if count == packet_len {
                                        // Emit an end marker so the link
                                        // layer sees the frame boundary.
                                        let halflen = dur / 2;
                                        cap.push(off, halflen, Gen3Symbol::Payload(byte));
                                        cap.push(off + halflen, dur - halflen, Gen3Symbol::End);
                                        packet_state = PacketState::Idle;
                                    } else {
                                        cap.push(off, dur, Gen3Symbol::Payload(byte));
                                    }
                                }

                                PacketState::Eds1 => {
                                    if byte == 0x80 {
                                        cap.durations[len - 1] = seg_end - cap.offsets[len - 1];
                                        packet_state = PacketState::Eds2;
                                    } else {
                                        error = true;
                                    }
                                }
                                PacketState::Eds2 => {
                                    if byte == 0x90 {
                                        cap.durations[len - 1] = seg_end - cap.offsets[len - 1];
                                        packet_state = PacketState::Eds3;
                                    } else {
                                        error = true;
                                    }
                                }
                                PacketState::Eds3 => {
                                    if byte == 0x00 {
                                        cap.durations[len - 1] = seg_end - cap.offsets[len - 1];
                                        packet_state = PacketState::Idle;
                                    } else {
                                        error = true;
                                    }
                                }

                                PacketState::Edb => {
                                    if byte == 0xc0 {
                                        cap.durations[len - 1] = seg_end - cap.offsets[len - 1];
                                        count += 1;
                                        if count == 3 {
                                            packet_state = PacketState::Idle;
                                        }
                                    } else {
                                        error = true;
                                    }
                                }
                            }
                        }

                        if error {
                            cap.push(off, dur, Gen3Symbol::Error);
                            packet_state = PacketState::Idle;
                        }
                    }
                }
            }

            let mut done = false;
            for (j, input) in inputs.iter().enumerate() {
                indexes[j] += 1;
                if indexes[j] >= input.len() {
                    done = true;
                }
            }
            if done {
                break;
            }
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Gen3(cap)));
    }
}
