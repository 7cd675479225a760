//! 8b/10b decode, comma lock and QSGMII destriping.

use scopedec::filter::OutputStream;
use scopedec::graph::FilterGraph;
use scopedec::ibm8b10b::{encode_group, CodeSymbol, K28_1, K28_5};
use scopedec::waveform::{
    SparseSymbolWaveform, SparseWaveform, Timebase, UniformWaveform, Waveform,
};

/// Serialize 10-bit groups into data+clock digital waveforms, one bit per
/// sample with the clock toggling every bit. A trailing pad bit keeps the
/// final data bit inside the sampled region.
fn serialize(groups: &[u16]) -> (Waveform, Waveform) {
    let mut bits = Vec::new();
    for &g in groups {
        for bit in (0..10).rev() {
            bits.push(g & (1 << bit) != 0);
        }
    }
    bits.push(false);

    let clock: Vec<bool> = (0..bits.len()).map(|i| i % 2 == 1).collect();
    let tb = Timebase {
        timescale: 1_000_000,
        ..Timebase::default()
    };
    (
        Waveform::UniformDigital(UniformWaveform::from_samples(tb, bits)),
        Waveform::UniformDigital(UniformWaveform::from_samples(tb, clock)),
    )
}

fn decode_groups(groups: &[u16]) -> Vec<CodeSymbol> {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "serdes",
        vec![OutputStream::digital("data"), OutputStream::digital("clk")],
    );
    let dec = graph.add_filter("8b/10b (IBM)").unwrap();
    graph.connect(source, 0, dec, 0).unwrap();
    graph.connect(source, 1, dec, 1).unwrap();

    let (data, clock) = serialize(groups);
    graph.set_waveform(source, 0, data).unwrap();
    graph.set_waveform(source, 1, clock).unwrap();
    graph.refresh_all().unwrap();

    graph
        .waveform(dec, 0)
        .unwrap()
        .as_8b10b()
        .unwrap()
        .samples
        .clone()
}

#[test]
fn comma_lock_on_three_k28_5() {
    // Three K28.5 code groups, RD- form.
    let symbols = decode_groups(&[0b0011111010, 0b0011111010, 0b0011111010]);
    assert_eq!(symbols.len(), 3);
    for s in &symbols {
        assert!(s.control);
        assert_eq!(s.data, K28_5);
        assert!(!s.error5 && !s.error3);
    }
}

#[test]
fn comma_lock_recovers_misaligned_stream() {
    // Pad three junk bits in front; the comma search must still lock.
    let mut bits = vec![true, false, true];
    let mut rd = -1;
    for _ in 0..8 {
        let g = encode_group(K28_5, true, &mut rd).unwrap();
        for bit in (0..10).rev() {
            bits.push(g & (1 << bit) != 0);
        }
    }
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
    let dec = graph.add_filter("8b/10b (IBM)").unwrap();
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

    let symbols = graph.waveform(dec, 0).unwrap().as_8b10b().unwrap();
    let commas = symbols.samples.iter().filter(|s| s.is_k(K28_5)).count();
    assert!(commas >= 6, "expected most symbols to decode as K28.5");
}

#[test]
fn mixed_control_and_data_stream() {
    // K28.5 then D21.4 D10.2 encoded with correct disparity tracking.
    let mut rd = -1;
    let groups = [
        encode_group(K28_5, true, &mut rd).unwrap(),
        encode_group(0x95, false, &mut rd).unwrap(),
        encode_group(0x4a, false, &mut rd).unwrap(),
    ];
    let symbols = decode_groups(&groups);
    assert_eq!(symbols.len(), 3);
    assert!(symbols[0].is_k(K28_5));
    assert!(!symbols[1].control && symbols[1].data == 0x95);
    assert!(!symbols[2].control && symbols[2].data == 0x4a);
    assert!(symbols.iter().all(|s| !s.is_error()));
}

#[test]
fn qsgmii_destripes_four_lanes() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "serdes",
        vec![OutputStream::protocol(
            "data",
            scopedec::filter::SymbolKind::Code8b10b,
        )],
    );
    let q = graph.add_filter("Ethernet - QSGMII").unwrap();
    graph.connect(source, 0, q, 0).unwrap();

    // Lane 0 carries K28.1 commas, lanes 1-3 carry distinct data bytes.
    let mut wave = SparseWaveform::new(Timebase::default());
    for rep in 0..4i64 {
        let base = rep * 4;
        wave.push(base * 10, 10, CodeSymbol::control(K28_1, 1));
        for lane in 1..4i64 {
            wave.push((base + lane) * 10, 10, CodeSymbol::data(lane as u8 * 17, 1));
        }
    }
    graph
        .set_waveform(
            source,
            0,
            Waveform::SparseSymbol(SparseSymbolWaveform::Code8b10b(wave)),
        )
        .unwrap();
    graph.refresh_all().unwrap();

    // Lane 0 is all commas, substituted to the standard K28.5.
    let lane0 = graph.waveform(q, 0).unwrap().as_8b10b().unwrap();
    assert_eq!(lane0.len(), 4);
    assert!(lane0.samples.iter().all(|s| s.is_k(K28_5)));

    for lane in 1..4usize {
        let cap = graph.waveform(q, lane).unwrap().as_8b10b().unwrap();
        assert_eq!(cap.len(), 4);
        assert!(cap
            .samples
            .iter()
            .all(|s| !s.control && s.data == lane as u8 * 17));
    }
}
