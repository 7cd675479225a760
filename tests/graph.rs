//! Filter graph, registry and configuration tests.

use scopedec::filter::{OutputStream, StreamType};
use scopedec::graph::{FilterGraph, GraphError};
use scopedec::packet::{merge_packets, Packet, PacketMerger};
use scopedec::registry::Registry;
use scopedec::waveform::{Timebase, UniformWaveform, Waveform};

fn digital_wave(samples: Vec<bool>) -> Waveform {
    let tb = Timebase {
        timescale: 1_000_000,
        ..Timebase::default()
    };
    Waveform::UniformDigital(UniformWaveform::from_samples(tb, samples))
}

/// SDA/SCL traces for one write transaction: start, one address byte with
/// ACK, one data byte with ACK, stop.
fn small_i2c_traces() -> (Vec<bool>, Vec<bool>) {
    let mut sda = Vec::new();
    let mut scl = Vec::new();
    let mut push = |s: bool, c: bool, sda: &mut Vec<bool>, scl: &mut Vec<bool>| {
        sda.push(s);
        scl.push(c);
    };
    push(true, true, &mut sda, &mut scl);
    push(true, true, &mut sda, &mut scl);
    push(false, true, &mut sda, &mut scl); // start
    push(false, false, &mut sda, &mut scl);
    for byte in [0xa0u8, 0x42] {
        for bit in (0..8).rev() {
            let b = byte & (1 << bit) != 0;
            push(b, false, &mut sda, &mut scl);
            push(b, true, &mut sda, &mut scl);
            push(b, false, &mut sda, &mut scl);
        }
        // ACK
        push(false, false, &mut sda, &mut scl);
        push(false, true, &mut sda, &mut scl);
        push(false, false, &mut sda, &mut scl);
    }
    push(false, true, &mut sda, &mut scl);
    push(true, true, &mut sda, &mut scl); // stop
    (sda, scl)
}

fn i2c_graph() -> (FilterGraph, usize, usize) {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "scope",
        vec![OutputStream::digital("sda"), OutputStream::digital("scl")],
    );
    let i2c = graph.add_filter("I2C").unwrap();
    graph.connect(source, 0, i2c, 0).unwrap();
    graph.connect(source, 1, i2c, 1).unwrap();

    let (sda, scl) = small_i2c_traces();
    graph.set_waveform(source, 0, digital_wave(sda)).unwrap();
    graph.set_waveform(source, 1, digital_wave(scl)).unwrap();
    (graph, source, i2c)
}

#[test]
fn registry_enumerates_protocols_in_order() {
    let reg = Registry::builtin();
    let names = reg.protocols();
    assert!(names.contains(&"I2C"));
    assert!(names.contains(&"JTAG"));
    assert!(names.contains(&"8b/10b (IBM)"));
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn auto_names_count_per_protocol() {
    let mut graph = FilterGraph::new();
    let a = graph.add_filter("I2C").unwrap();
    let b = graph.add_filter("I2C").unwrap();
    let c = graph.add_filter("JTAG").unwrap();
    assert_eq!(graph.name(a).unwrap(), "I2C_1");
    assert_eq!(graph.name(b).unwrap(), "I2C_2");
    assert_eq!(graph.name(c).unwrap(), "JTAG_1");
}

#[test]
fn background_instances_do_not_consume_names() {
    let mut graph = FilterGraph::new();
    let probe = graph.background_instance("I2C").unwrap();
    assert_eq!(probe.input_names(), &["sda", "scl"]);
    let a = graph.add_filter("I2C").unwrap();
    assert_eq!(graph.name(a).unwrap(), "I2C_1");
}

#[test]
fn unknown_protocol_is_rejected() {
    let mut graph = FilterGraph::new();
    assert!(matches!(
        graph.add_filter("No Such Protocol"),
        Err(GraphError::UnknownProtocol(_))
    ));
}

#[test]
fn wiring_is_type_checked() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "scope",
        vec![OutputStream::analog("ch1"), OutputStream::digital("ch2")],
    );
    let i2c = graph.add_filter("I2C").unwrap();

    // Analog into a digital port is rejected.
    assert!(matches!(
        graph.connect(source, 0, i2c, 0),
        Err(GraphError::TypeMismatch { .. })
    ));
    // Digital is fine.
    graph.connect(source, 1, i2c, 0).unwrap();
    assert!(matches!(
        graph.connect(source, 1, i2c, 5),
        Err(GraphError::PortOutOfRange { .. })
    ));
}

#[test]
fn refresh_with_missing_inputs_clears_output() {
    let mut graph = FilterGraph::new();
    let i2c = graph.add_filter("I2C").unwrap();
    graph.refresh(i2c).unwrap();
    assert!(graph.waveform(i2c, 0).is_none());
    assert!(graph.packets(i2c).unwrap().is_empty());
}

#[test]
fn refresh_is_idempotent() {
    let (mut graph, _source, i2c) = i2c_graph();
    graph.refresh_all().unwrap();
    let first_wave = graph.waveform(i2c, 0).unwrap().clone();
    let first_packets = graph.packets(i2c).unwrap().to_vec();

    graph.refresh_all().unwrap();
    assert_eq!(graph.waveform(i2c, 0).unwrap(), &first_wave);
    assert_eq!(graph.packets(i2c).unwrap(), &first_packets[..]);
}

#[test]
fn output_revision_never_decreases() {
    let (mut graph, source, i2c) = i2c_graph();
    graph.refresh_all().unwrap();
    let r1 = graph.waveform(i2c, 0).unwrap().revision();

    // New input data bumps the output revision on the next refresh.
    let (sda, scl) = small_i2c_traces();
    graph.set_waveform(source, 0, digital_wave(sda)).unwrap();
    graph.set_waveform(source, 1, digital_wave(scl)).unwrap();
    graph.refresh_all().unwrap();
    let r2 = graph.waveform(i2c, 0).unwrap().revision();
    assert!(r2 > r1);
}

#[test]
fn cycles_are_detected() {
    let mut graph = FilterGraph::new();
    let q = graph.add_filter("Ethernet - QSGMII").unwrap();
    // QSGMII consumes and produces 8b/10b streams, so it can be wired to
    // itself.
    graph.connect(q, 0, q, 0).unwrap();
    assert!(matches!(graph.refresh_all(), Err(GraphError::Cycle)));
}

#[test]
fn removed_nodes_resolve_to_missing_inputs() {
    let (mut graph, source, i2c) = i2c_graph();
    graph.refresh_all().unwrap();
    assert!(graph.waveform(i2c, 0).is_some());

    graph.remove(source).unwrap();
    graph.refresh_all().unwrap();
    assert!(graph.waveform(i2c, 0).is_none());
}

#[test]
fn autoscale_gives_nonzero_range() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source("scope", vec![OutputStream::analog("ch1")]);
    let tb = Timebase::default();
    graph
        .set_waveform(
            source,
            0,
            Waveform::UniformAnalog(UniformWaveform::from_samples(tb, vec![-1.0, 0.0, 3.0])),
        )
        .unwrap();

    let stream = graph.stream(source, 0).unwrap();
    let range = stream.voltage_range();
    assert!((range - 4.0 * 1.05).abs() < 1e-3);
    assert!((stream.offset() - -1.0).abs() < 1e-3);

    // Explicit settings win.
    graph.stream_mut(source, 0).unwrap().set_voltage_range(2.5);
    assert_eq!(graph.stream(source, 0).unwrap().voltage_range(), 2.5);
}

#[test]
fn config_round_trip_restores_behavior() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "scope",
        vec![OutputStream::digital("sda"), OutputStream::digital("scl")],
    );
    let i2c = graph.add_filter("I2C").unwrap();
    graph.connect(source, 0, i2c, 0).unwrap();
    graph.connect(source, 1, i2c, 1).unwrap();
    let eeprom = graph.add_filter("I2C EEPROM").unwrap();
    graph.connect(i2c, 0, eeprom, 0).unwrap();
    graph
        .params_mut(eeprom)
        .unwrap()
        .set_int("Address Bits", 8);

    let config = graph.save_config();

    let mut restored = FilterGraph::new();
    let ids = restored.load_config(&config).unwrap();
    assert_eq!(ids.len(), 3);

    let (rsource, ri2c, reeprom) = (ids[0], ids[1], ids[2]);
    assert_eq!(restored.filter(ri2c).unwrap().protocol_name(), "I2C");
    assert_eq!(
        restored.filter(reeprom).unwrap().protocol_name(),
        "I2C EEPROM"
    );
    assert_eq!(
        restored
            .filter(reeprom)
            .unwrap()
            .params()
            .int_value("Address Bits"),
        8
    );

    // Wiring came back keyed by the saved ids.
    let wiring = restored.input(reeprom, 0).unwrap().unwrap();
    assert_eq!(wiring.node, ri2c);
    let wiring = restored.input(ri2c, 0).unwrap().unwrap();
    assert_eq!(wiring.node, rsource);

    // The restored pipeline decodes just like the original.
    let (sda, scl) = small_i2c_traces();
    restored.set_waveform(rsource, 0, digital_wave(sda)).unwrap();
    restored.set_waveform(rsource, 1, digital_wave(scl)).unwrap();
    restored.refresh_all().unwrap();
    assert!(!restored.packets(ri2c).unwrap().is_empty());
}

#[test]
fn packet_merging_is_idempotent() {
    struct MergeRuns;
    impl PacketMerger for MergeRuns {
        fn can_merge(&self, first: &Packet, _cur: &Packet, next: &Packet) -> bool {
            first.header("Type") == next.header("Type")
        }
        fn create_merged_header(&self, packets: &[Packet], i: usize) -> Packet {
            let mut ret = packets[i].clone();
            ret.set_header("Type", format!("{}*", ret.header("Type").unwrap()));
            ret
        }
    }

    let mut packets = Vec::new();
    for (i, t) in ["a", "a", "b", "a", "a", "a"].iter().enumerate() {
        let mut p = Packet::new(i as i64 * 100);
        p.len = 50;
        p.set_header("Type", *t);
        packets.push(p);
    }

    let merged = merge_packets(&MergeRuns, &packets);
    assert_eq!(merged.len(), 3);
    let again = merge_packets(&MergeRuns, &merged);
    assert_eq!(again, merged);
}

#[test]
fn parameter_writes_bump_the_version() {
    let mut graph = FilterGraph::new();
    let eeprom = graph.add_filter("I2C EEPROM").unwrap();
    let params = graph.params_mut(eeprom).unwrap();

    let v0 = params.version();
    params.set_int("Address Bits", 16);
    assert!(params.version() > v0);

    // Textual round trip preserves the typed value.
    let text = params.get("Address Bits").unwrap().to_text();
    let v1 = params.version();
    params.parse("Address Bits", &text);
    assert!(params.version() > v1);
    assert_eq!(params.int_value("Address Bits"), 16);
}

#[test]
fn stream_types_are_exposed_for_wiring() {
    let graph = {
        let mut g = FilterGraph::new();
        g.add_filter("I2C").unwrap();
        g
    };
    let stream = graph.stream(0, 0).unwrap();
    assert!(matches!(stream.stype, StreamType::Protocol(_)));
}
