//! PCIe link training, 128b/130b block lock, and gen 3 logical framing.

use scopedec::filter::{OutputStream, SymbolKind};
use scopedec::graph::FilterGraph;
use scopedec::ibm8b10b::{CodeSymbol, K28_5};
use scopedec::pcie_128b130b::{run_scrambler, BlockType};
use scopedec::pcie_gen3::Gen3Symbol;
use scopedec::pcie_link_training::LtssmSymbol;
use scopedec::waveform::{
    SparseSymbolWaveform, SparseWaveform, Timebase, UniformWaveform, Waveform,
};

fn code_stream(symbols: Vec<CodeSymbol>) -> Waveform {
    let mut wave = SparseWaveform::new(Timebase::default());
    for (i, s) in symbols.into_iter().enumerate() {
        wave.push(i as i64 * 10, 10, s);
    }
    Waveform::SparseSymbol(SparseSymbolWaveform::Code8b10b(wave))
}

fn ts1(link: u8, lane: u8, fts: u8, rate: u8, ctl: u8) -> Vec<CodeSymbol> {
    let mut out = vec![
        CodeSymbol::control(K28_5, 1),
        CodeSymbol::data(link, 1),
        CodeSymbol::data(lane, 1),
        CodeSymbol::data(fts, 1),
        CodeSymbol::data(rate, 1),
        CodeSymbol::data(ctl, 1),
    ];
    for _ in 0..10 {
        out.push(CodeSymbol::data(0x4a, 1));
    }
    out
}

#[test]
fn gen1_ts1_parses_and_enters_polling() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "lane",
        vec![OutputStream::protocol("data", SymbolKind::Code8b10b)],
    );
    let lt = graph.add_filter("PCIe Link Training").unwrap();
    graph.connect(source, 0, lt, 0).unwrap();

    graph
        .set_waveform(source, 0, code_stream(ts1(0x00, 0x00, 0xff, 0x02, 0x00)))
        .unwrap();
    graph.refresh_all().unwrap();

    let packets = graph.packets(lt).unwrap();
    assert_eq!(packets.len(), 1);
    let p = &packets[0];
    assert_eq!(p.header("Type"), Some("TS1"));
    assert_eq!(p.header("Link"), Some("0"));
    assert_eq!(p.header("Lane"), Some("0"));
    assert_eq!(p.header("Num FTS"), Some("255"));
    assert_eq!(p.header("Rates"), Some("2.5G"));
    assert_eq!(p.header("Flags"), Some("None"));

    // LTSSM: Detect until the TS1, then Polling.Active.
    let states = graph.waveform(lt, 1).unwrap().as_ltssm().unwrap();
    assert_eq!(
        states.samples,
        vec![LtssmSymbol::Detect, LtssmSymbol::PollingActive]
    );
}

#[test]
fn identical_training_sets_merge() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "lane",
        vec![OutputStream::protocol("data", SymbolKind::Code8b10b)],
    );
    let lt = graph.add_filter("PCIe Link Training").unwrap();
    graph.connect(source, 0, lt, 0).unwrap();

    let mut symbols = Vec::new();
    for _ in 0..3 {
        symbols.extend(ts1(0x00, 0x00, 0xff, 0x02, 0x00));
    }
    graph.set_waveform(source, 0, code_stream(symbols)).unwrap();
    graph.refresh_all().unwrap();

    assert_eq!(graph.packets(lt).unwrap().len(), 3);
    let merged = graph.merged_packets(lt).unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].header("Type"), Some("TS1"));
}

/// Build a 130-bit block as bits, LSB first within each payload byte.
fn push_block(bits: &mut Vec<bool>, header: (bool, bool), payload: &[u8; 16]) {
    bits.push(header.0);
    bits.push(header.1);
    for &byte in payload {
        for k in 0..8 {
            bits.push(byte & (1 << k) != 0);
        }
    }
}

#[test]
fn block_lock_and_descramble() {
    // Skip ordered set with scrambler seed zero, then one data block.
    let mut sos = [0xaau8; 16];
    sos[11] = 0xe1;
    sos[12] = 0;
    sos[13] = 0;
    sos[14] = 0;
    let plaintext: [u8; 16] = core::array::from_fn(|i| (i * 31 + 7) as u8);
    let mut scrambler = 0u32;
    let scrambled: [u8; 16] = plaintext.map(|b| b ^ run_scrambler(&mut scrambler));

    let mut bits = Vec::new();
    push_block(&mut bits, (true, false), &sos); // ordered set, header 10
    push_block(&mut bits, (false, true), &scrambled); // data, header 01
    push_block(&mut bits, (true, false), &sos);
    bits.push(false);

    let clock: Vec<bool> = (0..bits.len()).map(|i| i % 2 == 1).collect();
    let tb = Timebase {
        timescale: 1_000_000,
        ..Timebase::default()
    };

    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "serdes",
        vec![OutputStream::digital("data"), OutputStream::digital("clk")],
    );
    let dec = graph.add_filter("PCIe 128b/130b").unwrap();
    graph.connect(source, 0, dec, 0).unwrap();
    graph.connect(source, 1, dec, 1).unwrap();
    graph
        .set_waveform(
            source,
            0,
            Waveform::UniformDigital(UniformWaveform::from_samples(tb, bits)),
        )
        .unwrap();
    graph
        .set_waveform(
            source,
            1,
            Waveform::UniformDigital(UniformWaveform::from_samples(tb, clock)),
        )
        .unwrap();
    graph.refresh_all().unwrap();

    let blocks = graph.waveform(dec, 0).unwrap().as_128b130b().unwrap();
    assert!(blocks
        .samples
        .iter()
        .any(|b| b.stype == BlockType::OrderedSet && b.data[0] == 0xaa));
    assert!(
        blocks
            .samples
            .iter()
            .any(|b| b.stype == BlockType::Data && b.data == plaintext),
        "descrambled data block not found"
    );
}

#[test]
fn gen3_logical_parses_dllp_framing() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "phy",
        vec![OutputStream::protocol("data", SymbolKind::Block128b130b)],
    );
    let dec = graph.add_filter("PCIe Gen 3 Logical").unwrap();
    graph.connect(source, 0, dec, 0).unwrap();

    let mut sos = [0xaau8; 16];
    sos[11] = 0xe1;

    // One block of idle, an SDP token with a 6-byte DLLP, then idle.
    let mut dllp_block = [0u8; 16];
    dllp_block[0] = 0xf0;
    dllp_block[1] = 0xac;
    for (i, b) in [0x11u8, 0x22, 0x33, 0x44, 0x55, 0x66].iter().enumerate() {
        dllp_block[2 + i] = *b;
    }

    let mut wave = SparseWaveform::new(Timebase::default());
    let mut t = 0i64;
    for (stype, payload) in [
        (BlockType::OrderedSet, sos),
        (BlockType::Data, dllp_block),
        (BlockType::OrderedSet, sos),
    ] {
        let sym = scopedec::pcie_128b130b::BlockSymbol::new(stype, payload);
        wave.push(t, 160, sym);
        t += 160;
    }
    graph
        .set_waveform(
            source,
            0,
            Waveform::SparseSymbol(SparseSymbolWaveform::Block128b130b(wave)),
        )
        .unwrap();
    graph.refresh_all().unwrap();

    let out = graph.waveform(dec, 0).unwrap().as_gen3().unwrap();
    assert!(out.samples.contains(&Gen3Symbol::Skip));
    assert!(out.samples.contains(&Gen3Symbol::StartDllp));
    for b in [0x11u8, 0x22, 0x33, 0x44, 0x55, 0x66] {
        assert!(out.samples.contains(&Gen3Symbol::Payload(b)));
    }
    assert!(out.samples.contains(&Gen3Symbol::LogicalIdle));
}
