//! IBM 8b/10b line code decoder.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::packet::PacketMerger;
use crate::parameter::{ParamSet, ParamType};
use crate::signal::{sample_on_edges, EdgeMode};
use crate::waveform::{
    SampleSource, SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Timebase,
    Waveform,
};
use lazy_static::lazy_static;
use log::trace;

/// One decoded 10-bit code group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeSymbol {
    /// K character rather than data.
    pub control: bool,
    /// 5b/6b sub-block did not decode.
    pub error5: bool,
    /// 3b/4b sub-block did not decode.
    pub error3: bool,
    /// Running disparity rule violated.
    pub disparity_error: bool,
    /// Decoded byte: 3b value in the high bits, 5b value in the low bits.
    pub data: u8,
    /// Running disparity after this symbol, +1 or -1.
    pub disparity: i8,
}

impl CodeSymbol {
    pub fn data(data: u8, disparity: i8) -> Self {
        Self {
            control: false,
            error5: false,
            error3: false,
            disparity_error: false,
            data,
            disparity,
        }
    }

    pub fn control(data: u8, disparity: i8) -> Self {
        Self {
            control: true,
            ..Self::data(data, disparity)
        }
    }

    pub fn is_error(&self) -> bool {
        self.error5 || self.error3 || self.disparity_error
    }

    /// True for the named K character, ignoring errors and disparity.
    pub fn is_k(&self, data: u8) -> bool {
        self.control && self.data == data
    }
}

/// K28.5, the comma character used by most protocols.
pub const K28_5: u8 = 0xbc;
/// K28.1, the QSGMII comma.
pub const K28_1: u8 = 0x3c;

impl SymbolText for CodeSymbol {
    fn text(&self) -> String {
        if self.error5 {
            return "ERROR (5b/6b)".to_string();
        }
        if self.error3 {
            return "ERROR (3b/4b)".to_string();
        }
        if self.disparity_error {
            return "ERROR (disparity)".to_string();
        }
        let left = self.data & 0x1f;
        let right = self.data >> 5;
        format!(
            "{}{}.{}{}",
            if self.control { "K" } else { "D" },
            left,
            right,
            if self.disparity < 0 { "-" } else { "+" }
        )
    }

    fn color(&self) -> SymbolColor {
        if self.is_error() {
            SymbolColor::Error
        } else if self.control {
            SymbolColor::Control
        } else {
            SymbolColor::Data
        }
    }
}

// 5b/6b decode tables, indexed by the six line bits (first-transmitted bit
// in the MSB).
const CODE5_TABLE: [u8; 64] = [
    0, 0, 0, 0, 0, 23, 8, 7, //00-07
    0, 27, 4, 20, 24, 12, 28, 28, //08-0f
    0, 29, 2, 18, 31, 10, 26, 15, //10-17
    0, 6, 22, 16, 14, 1, 30, 0, //18-1f
    0, 30, 1, 17, 16, 9, 25, 0, //20-27
    15, 5, 21, 31, 13, 2, 29, 0, //28-2f
    28, 3, 19, 24, 11, 4, 27, 0, //30-37
    7, 8, 23, 0, 0, 0, 0, 0, //38-3f
];

const DISP5_TABLE: [i32; 64] = [
    0, 0, 0, 0, 0, -2, -2, 0, //00-07
    0, -2, -2, 0, -2, 0, 0, 2, //08-0f
    0, -2, -2, 0, -2, 0, 0, 2, //10-17
    -2, 0, 0, 2, 0, 2, 2, 0, //18-1f
    0, -2, -2, 0, -2, 0, 0, 2, //20-27
    -2, 0, 0, 2, 0, 2, 2, 0, //28-2f
    -2, 0, 0, 2, 0, 2, 2, 0, //30-37
    0, 2, 2, 0, 0, 0, 0, 0, //38-3f
];

const ERR5_TABLE: [bool; 64] = [
    true, true, true, true, true, false, false, false, //00-07
    true, false, false, false, false, false, false, false, //08-0f
    true, false, false, false, false, false, false, false, //10-17
    false, false, false, false, false, false, false, true, //18-1f
    true, false, false, false, false, false, false, false, //20-27
    false, false, false, false, false, false, false, true, //28-2f
    false, false, false, false, false, false, false, true, //30-37
    false, false, false, true, true, true, true, true, //38-3f
];

const CTL5_TABLE: [bool; 64] = [
    false, false, false, false, false, false, false, false, //00-07
    false, false, false, false, false, false, false, true, //08-0f
    false, false, false, false, false, false, false, false, //10-17
    false, false, false, false, false, false, false, false, //18-1f
    false, false, false, false, false, false, false, false, //20-27
    false, false, false, false, false, false, false, false, //28-2f
    true, false, false, false, false, false, false, false, //30-37
    false, false, false, false, false, false, false, false, //38-3f
];

// 3b/4b decode tables, indexed by the four line bits.
const ERR3_CTL_TABLE: [bool; 16] = [
    true, true, false, false, false, false, false, false, false, false, false, false, false,
    false, true, true,
];

// Control decode depends on the disparity of the 5b/6b sub-block.
const CODE3_POS_CTL_TABLE: [u8; 16] = [0, 0, 4, 3, 0, 2, 6, 7, 7, 1, 5, 0, 3, 4, 0, 0];
const CODE3_NEG_CTL_TABLE: [u8; 16] = [0, 0, 4, 3, 0, 5, 1, 7, 7, 6, 2, 0, 3, 4, 0, 0];

const ERR3_TABLE: [bool; 16] = [
    true, false, false, false, false, false, false, false, false, false, false, false, false,
    false, false, true,
];

const CODE3_TABLE: [u8; 16] = [0, 7, 4, 3, 0, 2, 6, 7, 7, 1, 5, 0, 3, 4, 7, 0];

const DISP3_TABLE: [i32; 16] = [0, -2, -2, 0, -2, 0, 0, 2, -2, 0, 0, 2, 0, 2, 2, 0];

// True only for the Dx.A7 alternate encoding.
const ALT3_TABLE: [bool; 16] = [
    false, false, false, false, false, false, false, true, true, false, false, false, false,
    false, false, false,
];

/// The five 5b values whose .7 code uses the A7 alternate as a K character.
const K5_VALUES: [u8; 4] = [23, 27, 29, 30];

lazy_static! {
    /// 6-bit encodings per 5b value, [RD-, RD+], derived by inverting the
    /// decode tables so encoder and decoder can never disagree.
    static ref ENC6_DATA: [[u8; 2]; 32] = {
        let mut table = [[0u8; 2]; 32];
        for (v, entry) in table.iter_mut().enumerate() {
            let mut neutral = None;
            let mut plus = None;
            let mut minus = None;
            for c in 0..64u8 {
                if ERR5_TABLE[c as usize]
                    || CTL5_TABLE[c as usize]
                    || CODE5_TABLE[c as usize] != v as u8
                {
                    continue;
                }
                match DISP5_TABLE[c as usize] {
                    2 => plus = plus.or(Some(c)),
                    -2 => minus = minus.or(Some(c)),
                    _ => neutral = neutral.or(Some(c)),
                }
            }
            // RD- wants a positive or neutral code, RD+ the opposite.
            entry[0] = plus.or(neutral).unwrap_or(0);
            entry[1] = minus.or(neutral).unwrap_or(0);
        }
        table
    };

    /// 4-bit data encodings per 3b value, [RD-, RD+]. The A7 patterns are
    /// excluded so data never aliases a K character.
    static ref ENC4_DATA: [[u8; 2]; 8] = {
        let mut table = [[0u8; 2]; 8];
        for (v, entry) in table.iter_mut().enumerate() {
            let mut neutral = None;
            let mut plus = None;
            let mut minus = None;
            for c in 0..16u8 {
                if ERR3_TABLE[c as usize]
                    || ALT3_TABLE[c as usize]
                    || CODE3_TABLE[c as usize] != v as u8
                {
                    continue;
                }
                match DISP3_TABLE[c as usize] {
                    2 => plus = plus.or(Some(c)),
                    -2 => minus = minus.or(Some(c)),
                    _ => neutral = neutral.or(Some(c)),
                }
            }
            entry[0] = plus.or(neutral).unwrap_or(0);
            entry[1] = minus.or(neutral).unwrap_or(0);
        }
        table
    };
}

/// Decode one 10-bit code group (first-transmitted bit in bit 9) given the
/// running disparity; updates the disparity in place.
pub fn decode_group(bits: u16, last_disp: &mut i32) -> CodeSymbol {
    let code6 = ((bits >> 4) & 0x3f) as usize;
    let code4 = (bits & 0xf) as usize;

    let code5 = CODE5_TABLE[code6];
    let disp5 = DISP5_TABLE[code6];
    let err5 = ERR5_TABLE[code6];
    let mut ctl5 = CTL5_TABLE[code6];

    let (code3, err3) = if ctl5 {
        let code3 = if disp5 >= 0 {
            CODE3_POS_CTL_TABLE[code4]
        } else {
            CODE3_NEG_CTL_TABLE[code4]
        };
        (code3, ERR3_CTL_TABLE[code4])
    } else {
        (CODE3_TABLE[code4], ERR3_TABLE[code4])
    };
    let disp3 = DISP3_TABLE[code4];

    let total_disp = disp5 + disp3;
    let mut disparity_error = false;
    if total_disp > 0 && *last_disp > 0 {
        disparity_error = true;
        *last_disp = 1;
    } else if total_disp < 0 && *last_disp < 0 {
        disparity_error = true;
        *last_disp = -1;
    } else {
        *last_disp += total_disp;
    }

    // A handful of control codes use the Dx.A7 alternate form.
    if ALT3_TABLE[code4] && K5_VALUES.contains(&code5) {
        ctl5 = true;
    }

    CodeSymbol {
        control: ctl5,
        error5: err5,
        error3: err3,
        disparity_error,
        data: (code3 << 5) | code5,
        disparity: *last_disp as i8,
    }
}

/// Encode a data byte or K character to a 10-bit code group
/// (first-transmitted bit in bit 9); updates the running disparity in
/// place. Returns `None` for control values with no legal encoding.
pub fn encode_group(data: u8, control: bool, rd: &mut i32) -> Option<u16> {
    let v5 = data & 0x1f;
    let v3 = data >> 5;

    let code6;
    let code4;
    if control {
        if v5 == 28 {
            // K28.y: 001111 or 110000 depending on disparity.
            code6 = if *rd < 0 { 0x0f } else { 0x30 };
            *rd += DISP5_TABLE[code6 as usize];
            let table = if DISP5_TABLE[code6 as usize] >= 0 {
                &CODE3_POS_CTL_TABLE
            } else {
                &CODE3_NEG_CTL_TABLE
            };
            let mut found = None;
            for c in 0..16u8 {
                if ERR3_CTL_TABLE[c as usize] || table[c as usize] != v3 {
                    continue;
                }
                let d = DISP3_TABLE[c as usize];
                if (*rd > 0 && d <= 0) || (*rd < 0 && d >= 0) {
                    found = Some(c);
                    break;
                }
            }
            code4 = found?;
            *rd += DISP3_TABLE[code4 as usize];
        } else if K5_VALUES.contains(&v5) && v3 == 7 {
            // K23.7 / K27.7 / K29.7 / K30.7 use the data 5b code plus the
            // A7 alternate 4b pattern.
            code6 = ENC6_DATA[v5 as usize][if *rd < 0 { 0 } else { 1 }];
            *rd += DISP5_TABLE[code6 as usize];
            code4 = if *rd < 0 { 0x7 } else { 0x8 };
            *rd += DISP3_TABLE[code4 as usize];
        } else {
            return None;
        }
    } else {
        code6 = ENC6_DATA[v5 as usize][if *rd < 0 { 0 } else { 1 }];
        *rd += DISP5_TABLE[code6 as usize];
        code4 = ENC4_DATA[v3 as usize][if *rd < 0 { 0 } else { 1 }];
        *rd += DISP3_TABLE[code4 as usize];
    }

    Some(((code6 as u16) << 4) | code4 as u16)
}

const COMMA_WINDOW: &str = "Comma Search Window";

/// Decoder from a serial digital bitstream plus recovered clock to 8b/10b
/// code groups, with comma-based block alignment and running disparity
/// checking.
#[derive(Clone)]
pub struct Ibm8b10bDecoder {
    params: ParamSet,
}

impl Default for Ibm8b10bDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Ibm8b10bDecoder {
    pub fn new() -> Self {
        let mut params = ParamSet::new();
        params.declare(COMMA_WINDOW, ParamType::Int).set_int(20000);
        Self { params }
    }

    /// Find the bit offset (0..10) with the most commas in the search
    /// window and advance `i` to it.
    fn align(data: &SparseWaveform<bool>, i: &mut usize, range: usize) {
        if data.len() < 21 {
            return;
        }
        let dend = data.len() - 20;

        let mut max_commas = 0usize;
        let mut max_offset = 0usize;
        for offset in 0..10 {
            let mut num_commas = 0usize;
            let mut num_errors = 0usize;

            // Only check the first part of the window to avoid repeatedly
            // scanning a huge capture.
            for delta in (0..range).step_by(10) {
                let base = *i + offset + delta;
                if base > dend {
                    break;
                }

                // A comma is exactly five identical bits at positions 2..6
                // of the symbol.
                let mut comma = true;
                for j in 3..=6 {
                    if data.samples[base + j] != data.samples[base + 2] {
                        comma = false;
                        break;
                    }
                }
                if data.samples[base + 1] == data.samples[base + 2] {
                    comma = false;
                }
                if data.samples[base + 7] == data.samples[base + 2] {
                    comma = false;
                }

                // Every legal symbol has four, five or six ones.
                let ones = (0..10).filter(|&j| data.samples[base + j]).count();
                if !(4..=6).contains(&ones) {
                    num_errors += 1;
                }

                if comma {
                    num_commas += 1;
                }
            }

            // Discard any alignment with more errors than commas.
            if num_errors <= num_commas && num_commas > max_commas {
                max_commas = num_commas;
                max_offset = offset;
            }
            trace!("found {num_commas} commas and {num_errors} errors at offset {offset}");
        }

        *i += max_offset;
    }
}

impl PacketMerger for Ibm8b10bDecoder {}

impl Filter for Ibm8b10bDecoder {
    fn protocol_name(&self) -> &'static str {
        "8b/10b (IBM)"
    }

    fn category(&self) -> Category {
        Category::Serial
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["data", "clk"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![OutputStream::protocol("data", SymbolKind::Code8b10b)]
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

        // Sample the data stream at each clock edge.
        let data = sample_on_edges(&din, &clk, EdgeMode::Any);
        let nsamples = data.len();
        if nsamples < 11 {
            ctx.clear_outputs();
            return;
        }

        let mut cap =
            SparseWaveform::with_capacity(Timebase::fs_unit(din.timebase()), nsamples / 10);
        let range = self.params.int_value(COMMA_WINDOW).max(10) as usize;

        let mut last_disp = -1i32;
        let mut first = true;
        let mut last_symbol_length = 0i64;
        let mut last_symbol_end = 0i64;
        let mut i = 0usize;
        while i + 10 <= nsamples {
            // Re-synchronize at the start of the waveform or after a gap in
            // the bitstream.
            if i == 0 || (data.offsets[i] - last_symbol_end) > 3 * last_symbol_length {
                first = true;
            }
            if first {
                trace!("realigning at t={}", data.offsets[i]);
                Self::align(&data, &mut i, range);
                if i + 10 > nsamples {
                    break;
                }
            }

            let mut bits = 0u16;
            for j in 0..10 {
                bits = (bits << 1) | data.samples[i + j] as u16;
            }

            if first {
                // Seed the running disparity so the first symbol decodes
                // cleanly.
                let code6 = ((bits >> 4) & 0x3f) as usize;
                let code4 = (bits & 0xf) as usize;
                let total = DISP5_TABLE[code6] + DISP3_TABLE[code4];
                last_disp = if total < 0 { 1 } else { -1 };
                first = false;
            }

            let symbol = decode_group(bits, &mut last_disp);

            // Shift the symbol back half a UI so its boundaries line up
            // with the data edges rather than the sampling points.
            let symbol_start = data.offsets[i] - data.durations[i] / 2;
            let symbol_end = if i + 10 < nsamples {
                data.offsets[i + 10] - data.durations[i + 10] / 2
            } else {
                data.offsets[i + 9] + data.durations[i + 9]
            };
            let symbol_length = symbol_end - symbol_start;

            if symbol_length > 5 * last_symbol_length && last_symbol_length != 0 {
                trace!("sync lost (big gap)");
                first = true;
            } else {
                cap.push(symbol_start, symbol_length, symbol);
            }

            last_symbol_length = symbol_length;
            last_symbol_end = symbol_end;
            i += 10;
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Code8b10b(
            cap,
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k28_5_decodes() {
        let mut disp = -1;
        let s = decode_group(0b0011111010, &mut disp);
        assert!(s.control);
        assert_eq!(s.data, K28_5);
        assert!(!s.error5 && !s.error3);
    }

    #[test]
    fn encode_decode_round_trip_data() {
        for value in 0..=255u8 {
            for start_rd in [-1i32, 1] {
                let mut rd = start_rd;
                let bits = encode_group(value, false, &mut rd).unwrap();
                let mut dec_rd = start_rd;
                let s = decode_group(bits, &mut dec_rd);
                assert!(!s.control, "D{value:02x} decoded as control");
                assert!(!s.is_error(), "D{value:02x} decode error");
                assert_eq!(s.data, value);
                assert_eq!(rd, dec_rd, "disparity mismatch for D{value:02x}");
                assert!(rd == 1 || rd == -1);
            }
        }
    }

    #[test]
    fn encode_decode_round_trip_control() {
        let k_codes = [
            0x1c, 0x3c, 0x5c, 0x7c, 0x9c, 0xbc, 0xdc, 0xfc, // K28.0-K28.7
            0xf7, 0xfb, 0xfd, 0xfe, // K23.7, K27.7, K29.7, K30.7
        ];
        for &value in &k_codes {
            for start_rd in [-1i32, 1] {
                let mut rd = start_rd;
                let bits = encode_group(value, true, &mut rd).unwrap();
                let mut dec_rd = start_rd;
                let s = decode_group(bits, &mut dec_rd);
                assert!(s.control, "K{value:02x} did not decode as control");
                assert!(!s.is_error(), "K{value:02x} decode error");
                assert_eq!(s.data, value);
                assert_eq!(rd, dec_rd);
            }
        }
    }
}
