//! PCIe 128b/130b line code decoder (gen 3 and later).

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::PacketMerger;
use crate::parameter::ParamSet;
use crate::signal::{sample_on_edges, EdgeMode};
use crate::waveform::{
    SampleSource, SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Timebase,
    Waveform,
};
use log::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockType {
    /// Scrambler seed not yet recovered; payload bytes are meaningless.
    ScramblerDesynced,
    Data,
    OrderedSet,
    Error,
}

/// One 130-bit block: 2-bit header plus 16 payload bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSymbol {
    pub stype: BlockType,
    pub data: [u8; 16],
    pub len: u8,
}

impl BlockSymbol {
    pub fn new(stype: BlockType, data: [u8; 16]) -> Self {
        Self {
            stype,
            data,
            len: 16,
        }
    }
}

impl SymbolText for BlockSymbol {
    fn text(&self) -> String {
        match self.stype {
            BlockType::ScramblerDesynced => "Scrambler desynced".to_string(),
            BlockType::Error => "ERROR".to_string(),
            _ => self.data[..self.len as usize]
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect(),
        }
    }

    fn color(&self) -> SymbolColor {
        match self.stype {
            BlockType::ScramblerDesynced => SymbolColor::Preamble,
            BlockType::Data => SymbolColor::Data,
            BlockType::OrderedSet => SymbolColor::Control,
            BlockType::Error => SymbolColor::Error,
        }
    }
}

/// Advance the 23-bit LFSR (x^23 + x^21 + x^16 + x^8 + x^5 + x^2 + 1) by
/// one byte and return the descrambling byte.
pub fn run_scrambler(state: &mut u32) -> u8 {
    let mut ret = 0u8;
    for j in 0..8 {
        let b22 = *state & 0x40_0000 != 0;
        *state <<= 1;
        if b22 {
            *state ^= 0x21_0125;
            ret |= 1 << j;
        }
    }
    ret
}

/// Decoder from a serial bitstream plus recovered clock to 128b/130b
/// blocks: finds block alignment by scanning all 130 phases for the one
/// with the fewest invalid headers, recovers the scrambler seed from skip
/// ordered sets, and descrambles data blocks.
#[derive(Clone, Default)]
pub struct Pcie128b130bDecoder {
    params: ParamSet,
}

impl Pcie128b130bDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketMerger for Pcie128b130bDecoder {}

impl Filter for Pcie128b130bDecoder {
    fn protocol_name(&self) -> &'static str {
        "PCIe 128b/130b"
    }

    fn category(&self) -> Category {
        Category::Serial
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["data", "clk"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::Block128b130b)]
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

    fn refresh(&mut self, ctx: &mut RefreshContext) {
        if !ctx.all_inputs_ok() {
            ctx.clear_outputs();
            return;
        }
        let (Some(din), Some(clk)) = (ctx.digital_input(0), ctx.digital_input(1)) else {
            ctx.clear_outputs();
            return;
        };

        let data = sample_on_edges(&din, &clk, EdgeMode::Any);
        if data.len() <= 130 {
            ctx.clear_outputs();
            return;
        }
        let end = data.len() - 130;

        // The two header bits always differ in a valid block; the phase
        // with the fewest equal pairs is the block alignment.
        let mut best_offset = 0;
        let mut best_errors = end;
        for offset in 0..130 {
            let mut errors = 0;
            let mut i = offset;
            while i < end {
                if data.samples[i] == data.samples[i + 1] {
                    errors += 1;
                }
                i += 130;
            }
            if errors < best_errors {
                best_offset = offset;
                best_errors = errors;
            }
        }
        trace!("128b/130b alignment at phase {best_offset} with {best_errors} errors");

        let mut cap: SparseWaveform<BlockSymbol> =
            SparseWaveform::new(Timebase::fs_unit(din.timebase()));

        let mut scrambler_locked = false;
        let mut scrambler = 0u32;
        let mut i = best_offset;
        while i < end {
            let header = (data.samples[i] as u8) << 1 | data.samples[i + 1] as u8;
            let stype = match header {
                0 | 3 => BlockType::Error,
                1 => {
                    if scrambler_locked {
                        BlockType::Data
                    } else {
                        BlockType::ScramblerDesynced
                    }
                }
                _ => BlockType::OrderedSet,
            };

            // Payload bytes are transmitted LSB first.
            let mut symbols = [0u8; 16];
            for (j, sym) in symbols.iter_mut().enumerate() {
                let mut tmp = 0u8;
                for k in 0..8 {
                    tmp |= (data.samples[i + j * 8 + k + 2] as u8) << k;
                }
                *sym = tmp;
            }

            // A skip ordered set starts with 0xAA and carries the scrambler
            // seed after the 0xE1 marker. Variable-length SOS (bridging) is
            // not parsed; the next SOS re-locks the scrambler.
            let mut is_sos = false;
            if stype == BlockType::OrderedSet && symbols[0] == 0xaa {
                is_sos = true;
                for j in 1..13 {
                    if symbols[j] == 0xe1 {
                        scrambler = (symbols[j + 1] as u32) << 16
                            | (symbols[j + 2] as u32) << 8
                            | symbols[j + 3] as u32;
                        break;
                    }
                }
                scrambler_locked = true;
                trace!("scrambler locked, seed {scrambler:06x}");
            }

            if !is_sos {
                if stype == BlockType::OrderedSet {
                    // Ordered sets advance the scrambler without applying it.
                    for _ in 0..16 {
                        run_scrambler(&mut scrambler);
                    }
                } else {
                    for sym in symbols.iter_mut() {
                        *sym ^= run_scrambler(&mut scrambler);
                    }
                }
            }

            let mut tstart = data.offsets[i] - data.durations[i] / 2;
            let tend = data.offsets[i + 130];

            // Merge runs of desynchronized blocks into one symbol.
            if stype == BlockType::ScramblerDesynced && !cap.is_empty() {
                let last = cap.len() - 1;
                if cap.samples[last].stype == BlockType::ScramblerDesynced {
                    tstart = cap.offsets[last];
                    cap.durations[last] = tend - tstart;
                    i += 130;
                    continue;
                }
            }

            cap.push(
                tstart,
                tend - data.offsets[i],
                BlockSymbol::new(stype, symbols),
            );
            i += 130;
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(
            SparseSymbolWaveform::Block128b130b(cap),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::run_scrambler;

    #[test]
    fn scrambler_round_trip() {
        // Descrambling a stream scrambled from the same seed recovers the
        // plaintext.
        let plaintext: Vec<u8> = (0u16..64).map(|i| (i * 37 + 11) as u8).collect();
        let seed = 0x1dbfbc;

        let mut state = seed;
        let scrambled: Vec<u8> = plaintext.iter().map(|b| b ^ run_scrambler(&mut state)).collect();

        let mut state = seed;
        let recovered: Vec<u8> = scrambled.iter().map(|b| b ^ run_scrambler(&mut state)).collect();
        assert_eq!(recovered, plaintext);
        assert_ne!(scrambled, plaintext);
    }
}
