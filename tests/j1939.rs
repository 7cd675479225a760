//! J1939 bitmask filter tests.

use scopedec::filter::{OutputStream, SymbolKind};
use scopedec::graph::FilterGraph;
use scopedec::j1939::J1939PduSymbol;
use scopedec::waveform::{SparseSymbolWaveform, SparseWaveform, Timebase, Waveform};

fn pdu_frame(wave: &mut SparseWaveform<J1939PduSymbol>, t: &mut i64, pgn: u32, data: &[u8]) {
    wave.push(*t, 10, J1939PduSymbol::Pri(6));
    *t += 10;
    wave.push(*t, 10, J1939PduSymbol::Pgn(pgn));
    *t += 10;
    wave.push(*t, 10, J1939PduSymbol::Source(0x42));
    *t += 10;
    for &d in data {
        wave.push(*t, 10, J1939PduSymbol::Data(d));
        *t += 10;
    }
}

fn run(mask: i64, pattern: i64, frames: &[(u32, [u8; 8])]) -> Vec<(i64, bool)> {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "can",
        vec![OutputStream::protocol("data", SymbolKind::J1939Pdu)],
    );
    let filt = graph.add_filter("J1939 Bitmask").unwrap();
    graph.connect(source, 0, filt, 0).unwrap();
    let params = graph.params_mut(filt).unwrap();
    params.set_int("PGN", 0xfef1);
    params.set_int("Pattern Bitmask", mask);
    params.set_int("Pattern Target", pattern);

    let mut wave = SparseWaveform::new(Timebase::default());
    let mut t = 10;
    for (pgn, data) in frames {
        pdu_frame(&mut wave, &mut t, *pgn, data);
    }
    graph
        .set_waveform(
            source,
            0,
            Waveform::SparseSymbol(SparseSymbolWaveform::J1939Pdu(wave)),
        )
        .unwrap();
    graph.refresh_all().unwrap();

    let out = graph.waveform(filt, 0).unwrap().as_sparse_digital().unwrap();
    out.offsets
        .iter()
        .copied()
        .zip(out.samples.iter().copied())
        .collect()
}

#[test]
fn matching_frame_goes_high_at_frame_boundary() {
    let frames = [
        (0xfef1u32, [0, 0, 0, 0, 0, 0, 0, 0x42u8]),
        (0x1234u32, [0u8; 8]),
    ];
    let out = run(0xff, 0x42, &frames);

    // Initial sample low, then high starting at the matching frame's PGN.
    assert_eq!(out[0], (0, false));
    assert_eq!(out[1].1, true);
    assert_eq!(out[1].0, 20);
}

#[test]
fn non_matching_frame_stays_low() {
    let frames = [
        (0xfef1u32, [0, 0, 0, 0, 0, 0, 0, 0x41u8]),
        (0x1234u32, [0u8; 8]),
    ];
    let out = run(0xff, 0x42, &frames);
    assert!(out.iter().all(|&(_, v)| !v));
}

#[test]
fn other_pgns_are_ignored() {
    let frames = [
        (0x1234u32, [0x42u8; 8]),
        (0x5678u32, [0x42u8; 8]),
    ];
    let out = run(0xff, 0x42, &frames);
    assert_eq!(out.len(), 1);
    assert!(!out[0].1);
}
