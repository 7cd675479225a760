//! Ethernet autonegotiation decoders: twisted pair pages and base-X/SGMII.

use scopedec::ethernet_autoneg::{AutonegCodeword, PageType, ACK};
use scopedec::ethernet_basex::{BaseXType, SgmiiSymbol};
use scopedec::filter::{OutputStream, SymbolKind};
use scopedec::graph::FilterGraph;
use scopedec::ibm8b10b::{CodeSymbol, K28_5};
use scopedec::waveform::{SparseSymbolWaveform, SparseWaveform, Timebase, Waveform};

fn codeword_stream(codes: &[u16]) -> Waveform {
    let mut wave = SparseWaveform::new(Timebase::default());
    for (i, &c) in codes.iter().enumerate() {
        wave.push(i as i64 * 100, 100, AutonegCodeword(c));
    }
    Waveform::SparseSymbol(SparseSymbolWaveform::AutonegCode(wave))
}

#[test]
fn base_page_then_ack_sequence() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "mdi",
        vec![OutputStream::protocol("data", SymbolKind::AutonegCode)],
    );
    let dec = graph
        .add_filter("Ethernet - Autonegotiation Page")
        .unwrap();
    graph.connect(source, 0, dec, 0).unwrap();

    // 802.3 base page advertising 10bT, repeated, then acknowledged.
    let base = 0x0021u16;
    graph
        .set_waveform(source, 0, codeword_stream(&[base, base, base | ACK, base | ACK]))
        .unwrap();
    graph.refresh_all().unwrap();

    let syms = graph.waveform(dec, 0).unwrap().as_autoneg().unwrap();
    assert_eq!(syms.samples[0].ptype, PageType::BasePage);
    assert_eq!(syms.samples[1].ptype, PageType::Ack);

    let packets = graph.packets(dec).unwrap();
    assert!(packets.len() >= 3);
    assert!(packets.iter().all(|p| p.header("Type") == Some("Base")));
    // Ack tracking shows up in the headers once bit 14 is set.
    assert_eq!(packets.last().unwrap().header("Ack"), Some("1"));

    // The whole exchange collapses to one merged row.
    let merged = graph.merged_packets(dec).unwrap();
    assert_eq!(merged.len(), 1);
}

#[test]
fn basex_config_registers_classify_sgmii() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "serdes",
        vec![OutputStream::protocol("data", SymbolKind::Code8b10b)],
    );
    let dec = graph
        .add_filter("Ethernet - Base-X Autonegotiation")
        .unwrap();
    graph.connect(source, 0, dec, 0).unwrap();

    // /C1/ with an SGMII control word (bit 0 set), then /C2/ with a plain
    // base page advertising full duplex.
    let mut wave = SparseWaveform::new(Timebase::default());
    let seq = [
        CodeSymbol::control(K28_5, 1),
        CodeSymbol::data(0xb5, 1),
        CodeSymbol::data(0x01, 1),
        CodeSymbol::data(0x20, 1),
        CodeSymbol::control(K28_5, 1),
        CodeSymbol::data(0x42, 1),
        CodeSymbol::data(0x20, 1),
        CodeSymbol::data(0x00, 1),
    ];
    for (i, s) in seq.into_iter().enumerate() {
        wave.push(i as i64 * 10, 10, s);
    }
    graph
        .set_waveform(
            source,
            0,
            Waveform::SparseSymbol(SparseSymbolWaveform::Code8b10b(wave)),
        )
        .unwrap();
    graph.refresh_all().unwrap();

    let syms = graph.waveform(dec, 0).unwrap().as_basex().unwrap();
    assert_eq!(syms.len(), 2);
    assert_eq!(syms.samples[0].stype, BaseXType::Sgmii);
    assert_eq!(syms.samples[0].value, 0x2001);
    assert_eq!(syms.samples[1].stype, BaseXType::BasePage);
    assert_eq!(syms.samples[1].value, 0x0020);

    let packets = graph.packets(dec).unwrap();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].header("Type"), Some("SGMII"));
    assert_eq!(packets[1].header("Type"), Some("Base"));
}

#[test]
fn sgmii_frames_extract_bytes() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "serdes",
        vec![OutputStream::protocol("data", SymbolKind::Code8b10b)],
    );
    let dec = graph.add_filter("Ethernet - SGMII").unwrap();
    graph.connect(source, 0, dec, 0).unwrap();

    // Idle commas, K27.7 start, four data bytes, K29.7 end.
    let mut seq = vec![CodeSymbol::control(K28_5, 1); 2];
    seq.push(CodeSymbol::control(0xfb, 1));
    for b in [0x55u8, 0xd5, 0x00, 0x11] {
        seq.push(CodeSymbol::data(b, 1));
    }
    seq.push(CodeSymbol::control(0xfd, 1));
    seq.push(CodeSymbol::control(K28_5, 1));
    seq.push(CodeSymbol::control(K28_5, 1));

    let mut wave = SparseWaveform::new(Timebase::default());
    for (i, s) in seq.into_iter().enumerate() {
        wave.push(i as i64 * 10, 10, s);
    }
    graph
        .set_waveform(
            source,
            0,
            Waveform::SparseSymbol(SparseSymbolWaveform::Code8b10b(wave)),
        )
        .unwrap();
    graph.refresh_all().unwrap();

    let syms = graph.waveform(dec, 0).unwrap().as_sgmii().unwrap();
    assert_eq!(syms.samples[0], SgmiiSymbol::Start);
    assert!(syms.samples.contains(&SgmiiSymbol::Data(0xd5)));
    assert!(syms.samples.contains(&SgmiiSymbol::End));

    let packets = graph.packets(dec).unwrap();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].data, vec![0x55, 0xd5, 0x00, 0x11]);
    assert_eq!(packets[0].header("Len"), Some("4"));
}
