//! DisplayPort AUX channel decode from a synthesized Manchester capture.

use scopedec::dp_aux::DpAuxSymbol;
use scopedec::filter::OutputStream;
use scopedec::graph::FilterGraph;
use scopedec::waveform::{Timebase, UniformWaveform, Waveform};

/// 0.1 us per sample: ten samples per 1 MHz unit interval.
const TS: i64 = 100_000_000;
const HALF_UI: usize = 5;

struct AuxSignal {
    samples: Vec<f32>,
}

impl AuxSignal {
    fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    fn idle(&mut self, half_uis: usize) {
        for _ in 0..half_uis * HALF_UI {
            self.samples.push(0.0);
        }
    }

    fn level(&mut self, high: bool, half_uis: usize) {
        let v = if high { 0.3 } else { -0.3 };
        for _ in 0..half_uis * HALF_UI {
            self.samples.push(v);
        }
    }

    /// One Manchester bit: the value is the level of the first half UI.
    fn bit(&mut self, b: bool) {
        self.level(b, 1);
        self.level(!b, 1);
    }

    fn bits(&mut self, value: u32, count: usize) {
        for k in (0..count).rev() {
            self.bit(value & (1 << k) != 0);
        }
    }

    fn preamble(&mut self) {
        for _ in 0..16 {
            self.bit(false);
        }
    }

    /// Sync (and stop) pulse pair: two UIs high then two UIs low.
    fn sync(&mut self) {
        self.level(true, 4);
        self.level(false, 4);
    }
}

fn decode(signal: AuxSignal) -> (FilterGraph, usize) {
    let tb = Timebase {
        timescale: TS,
        ..Timebase::default()
    };
    let mut graph = FilterGraph::new();
    let source = graph.add_source("probe", vec![OutputStream::analog("aux")]);
    let dec = graph.add_filter("DisplayPort - Aux Channel").unwrap();
    graph.connect(source, 0, dec, 0).unwrap();
    graph
        .set_waveform(
            source,
            0,
            Waveform::UniformAnalog(UniformWaveform::from_samples(tb, signal.samples)),
        )
        .unwrap();
    graph.refresh_all().unwrap();
    (graph, dec)
}

#[test]
fn native_read_request_and_reply_merge() {
    let mut sig = AuxSignal::new();

    // Request: native read of one byte at DPCD address 0.
    sig.idle(20);
    sig.preamble();
    sig.sync();
    sig.bits(0x9, 4); // command: DP read
    sig.bits(0x0, 4); // address 19:16
    sig.bits(0x00, 8); // address 15:8
    sig.bits(0x00, 8); // address 7:0
    sig.bits(0x00, 8); // length - 1
    sig.sync(); // stop

    // Reply: ACK plus one data byte.
    sig.idle(60);
    sig.preamble();
    sig.sync();
    sig.bits(0x0, 4); // AUX_ACK
    sig.bits(0x0, 4); // pad
    sig.bits(0x11, 8);
    sig.sync(); // stop
    sig.idle(100);

    let (graph, dec) = decode(sig);

    let packets = graph.packets(dec).unwrap();
    assert_eq!(packets.len(), 2, "expected request and reply packets");

    let req = &packets[0];
    assert_eq!(req.header("Type"), Some("DP Read"));
    assert_eq!(req.header("Address"), Some("00000"));
    assert_eq!(req.header("Length"), Some("1"));

    let reply = &packets[1];
    assert_eq!(reply.header("Type"), Some("AUX_ACK"));
    assert_eq!(reply.data, vec![0x11]);

    // The transaction merges into a single completed read.
    let merged = graph.merged_packets(dec).unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].header("Type"), Some("DP Read"));
    assert_eq!(merged[0].data, vec![0x11]);

    // Symbol stream structure.
    let syms = graph.waveform(dec, 0).unwrap().as_dp_aux().unwrap();
    assert!(syms.samples.contains(&DpAuxSymbol::Preamble));
    assert!(syms.samples.contains(&DpAuxSymbol::Sync));
    assert!(syms.samples.contains(&DpAuxSymbol::Command(0x9)));
    assert!(syms.samples.contains(&DpAuxSymbol::Address(0)));
    assert!(syms.samples.contains(&DpAuxSymbol::Len(0)));
    assert!(syms.samples.contains(&DpAuxSymbol::AuxReply(0)));
    assert!(syms.samples.contains(&DpAuxSymbol::Data(0x11)));
    assert!(syms.samples.contains(&DpAuxSymbol::Stop));
}

#[test]
fn i2c_over_aux_write_produces_i2c_stream() {
    let mut sig = AuxSignal::new();

    // I2C write (no MOT) to address 0x50 with one byte of payload.
    sig.idle(20);
    sig.preamble();
    sig.sync();
    sig.bits(0x0, 4); // command: I2C write, MOT clear
    sig.bits(0x0, 4); // pad
    sig.bits(0x00, 8); // pad
    sig.bits(0x50, 8); // I2C address
    sig.bits(0x00, 8); // length - 1
    sig.bits(0xab, 8); // payload
    sig.sync(); // stop
    sig.idle(100);

    let (graph, dec) = decode(sig);

    let syms = graph.waveform(dec, 0).unwrap().as_dp_aux().unwrap();
    assert!(syms.samples.contains(&DpAuxSymbol::Command(0x0)));
    assert!(syms.samples.contains(&DpAuxSymbol::I2cAddress(0xa0)));

    // The tunneled traffic comes out on the second stream in I2C form, so
    // the I2C overlay decoders can consume it.
    let i2c = graph.waveform(dec, 1).unwrap().as_i2c().unwrap();
    use scopedec::i2c::I2cSymbol;
    assert_eq!(i2c.samples[0], I2cSymbol::Start);
    assert!(i2c.samples.contains(&I2cSymbol::Address(0xa0)));
    assert!(i2c.samples.contains(&I2cSymbol::Data(0xab)));
    assert_eq!(*i2c.samples.last().unwrap(), I2cSymbol::Stop);
}
