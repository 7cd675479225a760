//! USB 1.x/2.0 decode chain: PMA line states, PCS bytes, packet layer.

use scopedec::filter::{OutputStream, SymbolKind};
use scopedec::graph::FilterGraph;
use scopedec::usb2_pcs::Usb2PcsSymbol;
use scopedec::usb2_pma::Usb2PmaSymbol;
use scopedec::waveform::{
    SparseSymbolWaveform, SparseWaveform, Timebase, UniformWaveform, Waveform,
};

/// Full-speed unit interval in femtoseconds.
const UI: i64 = 83_333_000;

#[test]
fn pma_classifies_line_states() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "probe",
        vec![OutputStream::analog("D+"), OutputStream::analog("D-")],
    );
    let pma = graph.add_filter("USB 1.0/2.x PMA").unwrap();
    graph.connect(source, 0, pma, 0).unwrap();
    graph.connect(source, 1, pma, 1).unwrap();

    // Four J samples, four K, four SE0.
    let dp: Vec<f32> = [3.3f32, 3.3, 3.3, 3.3, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0].to_vec();
    let dn: Vec<f32> = [0.0f32, 0.0, 0.0, 0.0, 3.3, 3.3, 3.3, 3.3, 0.0, 0.0, 0.0, 0.0].to_vec();
    let tb = Timebase {
        timescale: UI,
        ..Timebase::default()
    };
    graph
        .set_waveform(
            source,
            0,
            Waveform::UniformAnalog(UniformWaveform::from_samples(tb, dp)),
        )
        .unwrap();
    graph
        .set_waveform(
            source,
            1,
            Waveform::UniformAnalog(UniformWaveform::from_samples(tb, dn)),
        )
        .unwrap();
    graph.refresh_all().unwrap();

    let states = graph.waveform(pma, 0).unwrap().as_usb2_pma().unwrap();
    assert_eq!(
        states.samples,
        vec![Usb2PmaSymbol::J, Usb2PmaSymbol::K, Usb2PmaSymbol::Se0]
    );
}

#[test]
fn pcs_decodes_sync_and_nrzi_byte() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "pma",
        vec![OutputStream::protocol("data", SymbolKind::Usb2Pma)],
    );
    let pcs = graph.add_filter("USB 1.0/2.x PCS").unwrap();
    graph.connect(source, 0, pcs, 0).unwrap();

    // Idle J, sync KJKJKJKK (last K two UIs), one 0x00 byte (a transition
    // on every bit), EOP.
    let mut wave = SparseWaveform::new(Timebase::default());
    let mut t = 0i64;
    let mut push = |wave: &mut SparseWaveform<Usb2PmaSymbol>, sym, uis: i64| {
        wave.push(t, uis * UI, sym);
        t += uis * UI;
    };
    push(&mut wave, Usb2PmaSymbol::J, 8);
    for _ in 0..3 {
        push(&mut wave, Usb2PmaSymbol::K, 1);
        push(&mut wave, Usb2PmaSymbol::J, 1);
    }
    push(&mut wave, Usb2PmaSymbol::K, 2);
    for i in 0..8 {
        let sym = if i % 2 == 0 {
            Usb2PmaSymbol::J
        } else {
            Usb2PmaSymbol::K
        };
        push(&mut wave, sym, 1);
    }
    push(&mut wave, Usb2PmaSymbol::Se0, 2);
    push(&mut wave, Usb2PmaSymbol::J, 4);

    graph
        .set_waveform(
            source,
            0,
            Waveform::SparseSymbol(SparseSymbolWaveform::Usb2Pma(wave)),
        )
        .unwrap();
    graph.refresh_all().unwrap();

    let out = graph.waveform(pcs, 0).unwrap().as_usb2_pcs().unwrap();
    assert_eq!(
        out.samples,
        vec![
            Usb2PcsSymbol::Sync,
            Usb2PcsSymbol::Data(0x00),
            Usb2PcsSymbol::Eop
        ]
    );
}

fn pcs_stream(symbols: Vec<Usb2PcsSymbol>) -> Waveform {
    let mut wave = SparseWaveform::new(Timebase::default());
    for (i, s) in symbols.into_iter().enumerate() {
        wave.push((i as i64 + 1) * 8, 8, s);
    }
    Waveform::SparseSymbol(SparseSymbolWaveform::Usb2Pcs(wave))
}

fn packet_graph(symbols: Vec<Usb2PcsSymbol>) -> (FilterGraph, usize) {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "pcs",
        vec![OutputStream::protocol("data", SymbolKind::Usb2Pcs)],
    );
    let pkt = graph.add_filter("USB 1.0/2.x Packet").unwrap();
    graph.connect(source, 0, pkt, 0).unwrap();
    graph.set_waveform(source, 0, pcs_stream(symbols)).unwrap();
    graph.refresh_all().unwrap();
    (graph, pkt)
}

#[test]
fn full_speed_setup_transaction() {
    use Usb2PcsSymbol::*;
    let mut symbols = vec![
        // SETUP token: PID 0x2d, address 1, endpoint 0, CRC5.
        Sync,
        Data(0x2d),
        Data(0x01),
        Data(0x00),
        Eop,
        // DATA0 packet: standard GET_DESCRIPTOR request.
        Sync,
        Data(0xc3),
    ];
    for b in [0x80u8, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00] {
        symbols.push(Data(b));
    }
    symbols.push(Data(0x12)); // CRC16 high
    symbols.push(Data(0x34)); // CRC16 low
    symbols.push(Eop);
    // Handshake.
    symbols.push(Sync);
    symbols.push(Data(0xd2));
    symbols.push(Eop);

    let (graph, pkt) = packet_graph(symbols);
    let packets = graph.packets(pkt).unwrap();
    assert_eq!(packets.len(), 1);
    let p = &packets[0];
    assert_eq!(p.header("Type"), Some("SETUP"));
    assert_eq!(p.header("Device"), Some("1"));
    assert_eq!(p.header("Endpoint"), Some("0"));
    assert_eq!(p.header("Length"), Some("8"));
    assert_eq!(
        p.header("Details"),
        Some("Host: Standard req to device bRequest=6 wValue=100 wIndex=0 wLength=64 ACK")
    );
}

#[test]
fn bad_pid_check_nibble_is_an_error() {
    use Usb2PcsSymbol::*;
    let (graph, pkt) = packet_graph(vec![Sync, Data(0x22), Eop]);
    let out = graph.waveform(pkt, 0).unwrap().as_usb2_packet().unwrap();
    assert!(out
        .samples
        .iter()
        .any(|s| *s == scopedec::usb2_packet::Usb2PacketSymbol::Error));
}

#[test]
fn in_nak_shows_aborted_transaction() {
    use Usb2PcsSymbol::*;
    let (graph, pkt) = packet_graph(vec![
        Sync,
        Data(0x69), // IN
        Data(0x02),
        Data(0x00),
        Eop,
        Sync,
        Data(0x5a), // NAK
        Eop,
    ]);
    let packets = graph.packets(pkt).unwrap();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].header("Type"), Some("IN"));
    assert_eq!(packets[0].header("Details"), Some("NAK"));
}

#[test]
fn activity_strip_follows_packets() {
    use Usb2PcsSymbol::*;
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "pcs",
        vec![OutputStream::protocol("data", SymbolKind::Usb2Pcs)],
    );
    let act = graph.add_filter("USB 1.0/2.x Activity").unwrap();
    graph.connect(source, 0, act, 0).unwrap();
    graph
        .set_waveform(
            source,
            0,
            pcs_stream(vec![Sync, Data(0x2d), Data(0x01), Data(0x00), Eop]),
        )
        .unwrap();
    graph.refresh_all().unwrap();

    let out = graph.waveform(act, 0).unwrap().as_sparse_digital().unwrap();
    assert_eq!(out.samples, vec![false, true]);
}
