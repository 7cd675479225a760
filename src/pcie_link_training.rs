//! PCIe gen 1/2 link training decoder: TS1/TS2 ordered sets and the LTSSM.

use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind};
use crate::ibm8b10b::CodeSymbol;
use crate::packet::{Packet, PacketColor, PacketMerger};
use crate::parameter::ParamSet;
use crate::waveform::{
    SparseSymbolWaveform, SparseWaveform, SymbolColor, SymbolText, Waveform,
};
use log::trace;

/// K28.5 comma at the start of every training set.
const COMMA: u8 = 0xbc;
/// K23.7 PAD for unassigned link/lane numbers.
const PAD: u8 = 0xf7;
/// K28.0, the skip ordered set filler.
const SKP: u8 = 0x1c;
/// K28.3, electrical idle ordered set.
const IDL: u8 = 0x7c;
/// K28.7, electrical idle exit.
const EIE: u8 = 0xfc;
/// D10.2, the TS1 identifier.
const TS1_ID: u8 = 0x4a;
/// D5.2, the TS2 identifier.
const TS2_ID: u8 = 0x45;

/// One field of a TS1/TS2 training set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainingSymbol {
    /// 1 for TS1, 2 for TS2.
    Header(u8),
    LinkNumber(u8),
    LaneNumber(u8),
    NumFts(u8),
    RateId(u8),
    TrainCtl(u8),
    TsId(u8),
    Error,
}

impl SymbolText for TrainingSymbol {
    fn text(&self) -> String {
        match self {
            TrainingSymbol::Header(h) => if *h == 1 { "TS1" } else { "TS2" }.to_string(),
            TrainingSymbol::LinkNumber(l) => {
                if *l == PAD {
                    "Link: Unassigned".to_string()
                } else {
                    format!("Link: {l}")
                }
            }
            TrainingSymbol::LaneNumber(l) => {
                if *l == PAD {
                    "Lane: Unassigned".to_string()
                } else {
                    format!("Lane: {l}")
                }
            }
            TrainingSymbol::NumFts(n) => format!("FTS: {n}"),
            TrainingSymbol::RateId(r) => format!("Rates: {r:02x}"),
            TrainingSymbol::TrainCtl(f) => format!("Flags: {f:02x}"),
            TrainingSymbol::TsId(id) => if *id == TS1_ID { "TS1" } else { "TS2" }.to_string(),
            TrainingSymbol::Error => "ERROR".to_string(),
        }
    }

    fn color(&self) -> SymbolColor {
        match self {
            TrainingSymbol::Header(_)
            | TrainingSymbol::NumFts(_)
            | TrainingSymbol::RateId(_)
            | TrainingSymbol::TrainCtl(_) => SymbolColor::Control,
            TrainingSymbol::TsId(_) => SymbolColor::Data,
            TrainingSymbol::LinkNumber(_) | TrainingSymbol::LaneNumber(_) => SymbolColor::Address,
            TrainingSymbol::Error => SymbolColor::Error,
        }
    }
}

/// LTSSM state over an interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LtssmSymbol {
    Detect,
    PollingActive,
    PollingConfiguration,
    Configuration,
    L0,
    RecoveryRcvrLock,
    RecoverySpeed,
    RecoveryRcvrCfg,
}

impl LtssmSymbol {
    pub fn name(&self) -> &'static str {
        match self {
            LtssmSymbol::Detect => "Detect",
            LtssmSymbol::PollingActive => "Polling.Active",
            LtssmSymbol::PollingConfiguration => "Polling.Configuration",
            LtssmSymbol::Configuration => "Configuration",
            LtssmSymbol::L0 => "L0",
            LtssmSymbol::RecoveryRcvrLock => "Recovery.RcvrLock",
            LtssmSymbol::RecoverySpeed => "Recovery.Speed",
            LtssmSymbol::RecoveryRcvrCfg => "Recovery.RcvrCfg",
        }
    }
}

impl SymbolText for LtssmSymbol {
    fn text(&self) -> String {
        self.name().to_string()
    }

    fn color(&self) -> SymbolColor {
        match self {
            LtssmSymbol::L0 => SymbolColor::Data,
            LtssmSymbol::Detect => SymbolColor::Idle,
            _ => SymbolColor::Control,
        }
    }
}

/// Decoder for PCIe 1.x/2.x link training: parses TS1/TS2 ordered sets from
/// an 8b/10b lane and tracks the link training and status state machine on
/// a second output stream.
#[derive(Clone, Default)]
pub struct PcieLinkTrainingDecoder {
    params: ParamSet,
}

impl PcieLinkTrainingDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketMerger for PcieLinkTrainingDecoder {
    fn can_merge(&self, first: &Packet, _cur: &Packet, next: &Packet) -> bool {
        // Runs of identical training sets collapse to one row.
        first.headers == next.headers
    }

    fn create_merged_header(&self, packets: &[Packet], i: usize) -> Packet {
        let first = &packets[i];
        let mut ret = first.clone();
        for p in &packets[i + 1..] {
            if p.headers == first.headers {
                ret.len = p.offset + p.len - first.offset;
            } else {
                break;
            }
        }
        ret
    }
}

impl Filter for PcieLinkTrainingDecoder {
    fn protocol_name(&self) -> &'static str {
        "PCIe Link Training"
    }

    fn category(&self) -> Category {
        Category::Bus
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["lane"]
    }

    fn streams(&self) -> Vec<OutputStream> {
        vec![
            OutputStream::protocol("packets", SymbolKind::Training),
            OutputStream::protocol("states", SymbolKind::Ltssm),
        ]
    }

    fn validate_channel(&self, port: usize, stype: StreamType) -> bool {
        port == 0 && stype == StreamType::Protocol(SymbolKind::Code8b10b)
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn headers(&self) -> Vec<&'static str> {
        vec!["Type", "Link", "Lane", "Num FTS", "Rates", "Flags"]
    }

    fn refresh(&mut self, ctx: &mut RefreshContext) {
        if !ctx.all_inputs_ok() {
            ctx.clear_outputs();
            return;
        }
        let Some(din) = ctx.input(0).and_then(Waveform::as_8b10b) else {
            ctx.clear_outputs();
            return;
        };
        let len = din.len();
        if len < 16 {
            ctx.clear_outputs();
            return;
        }
        let timescale = din.timebase.timescale;
        let trigger_phase = din.timebase.trigger_phase;

        let mut cap: SparseWaveform<TrainingSymbol> = SparseWaveform::new(din.timebase);
        let mut scap: SparseWaveform<LtssmSymbol> = SparseWaveform::new(din.timebase);
        let packets = &mut *ctx.packets;

        let sym = |s: &CodeSymbol, data: u8| s.control && s.data == data;

        // Find the first comma in the lane and use it as a starting point.
        let end = len - 15;
        let mut i = 0;
        while i < len - 3 && !sym(&din.samples[i], COMMA) {
            i += 1;
        }

        let mut lstate = LtssmSymbol::Detect;
        scap.push(0, 0, LtssmSymbol::Detect);

        while i < end {
            let s = din.samples[i];

            // K28.3 enters electrical idle.
            if sym(&s, IDL) {
                if lstate == LtssmSymbol::RecoverySpeed {
                    let nout = scap.len() - 1;
                    scap.durations[nout] = din.offsets[i] - scap.offsets[nout];

                    lstate = LtssmSymbol::RecoveryRcvrLock;
                    scap.push(din.offsets[i], din.durations[i], lstate);
                    trace!("ltssm -> Recovery.RcvrLock (electrical idle)");
                }
                i += 1;
                continue;
            }

            // K28.7 exits electrical idle; skip the EIE run and a D10.2.
            if sym(&s, EIE) {
                while i < end && sym(&din.samples[i], EIE) {
                    i += 1;
                }
                if i < end && !din.samples[i].control && din.samples[i].data == TS1_ID {
                    i += 1;
                    continue;
                }
                continue;
            }

            // Training sets start with a comma; anything else is payload.
            if !sym(&din.samples[i], COMMA) {
                if lstate == LtssmSymbol::Configuration || lstate == LtssmSymbol::RecoveryRcvrCfg {
                    lstate = LtssmSymbol::L0;
                    scap.push(din.offsets[i], din.durations[i], lstate);
                    trace!("ltssm -> L0");
                }
                if lstate == LtssmSymbol::L0 {
                    let nout = scap.len() - 1;
                    scap.durations[nout] =
                        din.offsets[i] + din.durations[i] - scap.offsets[nout];
                }
                i += 1;
                continue;
            }

            // Discard skip ordered sets (K28.5 K28.0 K28.0 K28.0).
            if i + 3 < end
                && sym(&din.samples[i + 1], SKP)
                && sym(&din.samples[i + 2], SKP)
                && sym(&din.samples[i + 3], SKP)
            {
                i += 4;
                continue;
            }

            // Link ID must be PAD or a D character.
            if din.samples[i + 1].control && din.samples[i + 1].data != PAD {
                i += 1;
                continue;
            }
            // Lane ID must be PAD or a D character no greater than 31.
            if din.samples[i + 2].control && din.samples[i + 2].data != PAD {
                i += 1;
                continue;
            }
            if !din.samples[i + 2].control && din.samples[i + 2].data > 31 {
                i += 1;
                continue;
            }

            // The identifier bytes distinguish TS1 from TS2.
            let mut hit_ts1 = true;
            let mut hit_ts2 = true;
            for k in 0..6 {
                let id = &din.samples[i + 10 + k];
                if id.control {
                    hit_ts1 = false;
                    hit_ts2 = false;
                    break;
                }
                if id.data != TS1_ID {
                    hit_ts1 = false;
                }
                if id.data != TS2_ID {
                    hit_ts2 = false;
                }
            }
            if !hit_ts1 && !hit_ts2 {
                i += 1;
                continue;
            }

            let mut pack = Packet::new(din.offsets[i] * timescale + trigger_phase);
            pack.len =
                (din.offsets[i + 15] + din.durations[i + 15] - din.offsets[i]) * timescale;
            pack.color = PacketColor::Status;

            cap.push(
                din.offsets[i],
                din.durations[i],
                TrainingSymbol::Header(if hit_ts1 { 1 } else { 2 }),
            );
            pack.set_header("Type", if hit_ts1 { "TS1" } else { "TS2" });

            let linkid = din.samples[i + 1].data;
            cap.push(
                din.offsets[i + 1],
                din.durations[i + 1],
                TrainingSymbol::LinkNumber(linkid),
            );
            if linkid == PAD {
                pack.set_header("Link", "Unassigned");
            } else {
                pack.set_header("Link", linkid.to_string());
            }

            let laneid = din.samples[i + 2].data;
            cap.push(
                din.offsets[i + 2],
                din.durations[i + 2],
                TrainingSymbol::LaneNumber(laneid),
            );
            if laneid == PAD {
                pack.set_header("Lane", "Unassigned");
            } else {
                pack.set_header("Lane", laneid.to_string());
            }

            let num_fts = din.samples[i + 3].data;
            cap.push(
                din.offsets[i + 3],
                din.durations[i + 3],
                TrainingSymbol::NumFts(num_fts),
            );
            pack.set_header("Num FTS", num_fts.to_string());

            let rates = din.samples[i + 4].data;
            cap.push(
                din.offsets[i + 4],
                din.durations[i + 4],
                TrainingSymbol::RateId(rates),
            );
            let mut srates = String::new();
            if rates & 2 != 0 {
                srates += "2.5G ";
            }
            if rates & 4 != 0 {
                srates += "5G ";
            }
            if rates & 8 != 0 {
                srates += "8G ";
            }
            if rates & 0x80 != 0 {
                srates += "SpeedChange";
                pack.color = PacketColor::Command;
            }
            pack.set_header("Rates", srates.trim_end());

            let flags = din.samples[i + 5].data;
            cap.push(
                din.offsets[i + 5],
                din.durations[i + 5],
                TrainingSymbol::TrainCtl(flags),
            );
            let mut sflags = String::new();
            if flags & 1 != 0 {
                sflags += "Hot reset ";
            }
            if flags & 2 != 0 {
                sflags += "Disable link ";
            }
            if flags & 4 != 0 {
                sflags += "Loopback ";
            }
            if flags & 8 != 0 {
                sflags += "Disable scrambling ";
            }
            if flags & 0x10 != 0 {
                sflags += "Compliance Receive ";
            }
            if sflags.is_empty() {
                sflags = "None".to_string();
            }
            pack.set_header("Flags", sflags.trim_end());

            cap.push(
                din.offsets[i + 6],
                din.offsets[i + 15] + din.durations[i + 15] - din.offsets[i + 6],
                TrainingSymbol::TsId(din.samples[i + 6].data),
            );

            packets.push(pack);

            match lstate {
                // A training set in L0 means the link is retraining.
                LtssmSymbol::L0 => {
                    lstate = LtssmSymbol::RecoveryRcvrLock;
                    scap.push(din.offsets[i], din.durations[i], lstate);
                    trace!("ltssm -> Recovery.RcvrLock");
                }

                LtssmSymbol::Detect => {
                    // The first TS1 ends receiver detection.
                    if hit_ts1 {
                        let nout = scap.len() - 1;
                        scap.durations[nout] = din.offsets[i] - scap.offsets[nout];

                        lstate = LtssmSymbol::PollingActive;
                        scap.push(din.offsets[i], din.durations[i], lstate);
                        trace!("ltssm -> Polling.Active");
                    }
                }

                LtssmSymbol::RecoveryRcvrLock => {
                    lstate = if rates & 0x80 != 0 {
                        LtssmSymbol::RecoverySpeed
                    } else {
                        LtssmSymbol::RecoveryRcvrCfg
                    };
                    scap.push(din.offsets[i], din.durations[i], lstate);
                    trace!("ltssm -> {}", lstate.name());
                }

                LtssmSymbol::RecoveryRcvrCfg | LtssmSymbol::Configuration => {
                    let nout = scap.len() - 1;
                    scap.durations[nout] =
                        din.offsets[i] + din.durations[i] - scap.offsets[nout];
                }

                LtssmSymbol::RecoverySpeed => {}

                LtssmSymbol::PollingActive => {
                    // TS2s mean the far end saw our TS1s.
                    if hit_ts2 {
                        lstate = LtssmSymbol::PollingConfiguration;
                        scap.push(din.offsets[i], din.durations[i], lstate);
                        trace!("ltssm -> Polling.Configuration");
                    } else {
                        let nout = scap.len() - 1;
                        scap.durations[nout] =
                            din.offsets[i] + din.durations[i] - scap.offsets[nout];
                    }
                }

                LtssmSymbol::PollingConfiguration => {
                    // Back to TS1s with assigned numbers: Configuration.
                    if hit_ts1 {
                        lstate = LtssmSymbol::Configuration;
                        scap.push(din.offsets[i], din.durations[i], lstate);
                        trace!("ltssm -> Configuration");
                    } else {
                        let nout = scap.len() - 1;
                        scap.durations[nout] =
                            din.offsets[i] + din.durations[i] - scap.offsets[nout];
                    }
                }
            }

            // Skip the rest of the set.
            i += 16;
        }

        ctx.outputs[0].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Training(cap)));
        ctx.outputs[1].set_data(Waveform::SparseSymbol(SparseSymbolWaveform::Ltssm(scap)));
    }
}
