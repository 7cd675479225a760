//! I2C decode scenarios: bus decoder plus EEPROM and register overlays.

use scopedec::filter::OutputStream;
use scopedec::graph::FilterGraph;
use scopedec::i2c::I2cSymbol;
use scopedec::waveform::{
    SparseSymbolWaveform, SparseWaveform, Timebase, UniformWaveform, Waveform,
};

struct TraceBuilder {
    sda: Vec<bool>,
    scl: Vec<bool>,
}

impl TraceBuilder {
    fn new() -> Self {
        Self {
            sda: vec![true, true],
            scl: vec![true, true],
        }
    }

    fn sample(&mut self, sda: bool, scl: bool) {
        self.sda.push(sda);
        self.scl.push(scl);
    }

    fn start(&mut self) {
        self.sample(false, true);
        self.sample(false, false);
    }

    fn byte(&mut self, value: u8, ack: bool) {
        for bit in (0..8).rev() {
            let b = value & (1 << bit) != 0;
            self.sample(b, false);
            self.sample(b, true);
            self.sample(b, false);
        }
        self.sample(!ack, false);
        self.sample(!ack, true);
        self.sample(!ack, false);
    }

    fn stop(&mut self) {
        self.sample(false, true);
        self.sample(true, true);
        self.sample(true, true);
    }

    fn build(self, graph: &mut FilterGraph, source: usize) {
        let tb = Timebase {
            timescale: 1_000_000,
            ..Timebase::default()
        };
        graph
            .set_waveform(
                source,
                0,
                Waveform::UniformDigital(UniformWaveform::from_samples(tb, self.sda)),
            )
            .unwrap();
        graph
            .set_waveform(
                source,
                1,
                Waveform::UniformDigital(UniformWaveform::from_samples(tb, self.scl)),
            )
            .unwrap();
    }
}

fn decode(trace: TraceBuilder) -> (FilterGraph, usize) {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "scope",
        vec![OutputStream::digital("sda"), OutputStream::digital("scl")],
    );
    let i2c = graph.add_filter("I2C").unwrap();
    graph.connect(source, 0, i2c, 0).unwrap();
    graph.connect(source, 1, i2c, 1).unwrap();
    trace.build(&mut graph, source);
    graph.refresh_all().unwrap();
    (graph, i2c)
}

fn symbols(graph: &FilterGraph, node: usize) -> Vec<I2cSymbol> {
    graph
        .waveform(node, 0)
        .unwrap()
        .as_i2c()
        .unwrap()
        .samples
        .clone()
}

#[test]
fn write_transaction_decodes_to_one_packet() {
    let mut t = TraceBuilder::new();
    t.start();
    t.byte(0xa0, true);
    t.byte(0x12, true);
    t.byte(0x34, true);
    t.stop();
    let (graph, i2c) = decode(t);

    assert_eq!(
        symbols(&graph, i2c),
        vec![
            I2cSymbol::Start,
            I2cSymbol::Address(0xa0),
            I2cSymbol::Ack,
            I2cSymbol::Data(0x12),
            I2cSymbol::Ack,
            I2cSymbol::Data(0x34),
            I2cSymbol::Ack,
            I2cSymbol::Stop,
        ]
    );

    let packets = graph.packets(i2c).unwrap();
    assert_eq!(packets.len(), 1);
    let p = &packets[0];
    assert_eq!(p.header("Op"), Some("Write"));
    assert_eq!(p.header("Address"), Some("a0"));
    assert_eq!(p.header("Len"), Some("2"));
    assert_eq!(p.data, vec![0x12, 0x34]);
}

#[test]
fn read_sets_op_and_nak_renders() {
    let mut t = TraceBuilder::new();
    t.start();
    t.byte(0xa1, true);
    t.byte(0x55, false); // master NAKs the last read byte
    t.stop();
    let (graph, i2c) = decode(t);

    let syms = symbols(&graph, i2c);
    assert_eq!(syms[1], I2cSymbol::Address(0xa1));
    assert!(syms.contains(&I2cSymbol::Nak));
    let packets = graph.packets(i2c).unwrap();
    assert_eq!(packets[0].header("Op"), Some("Read"));
}

#[test]
fn restart_splits_packets() {
    let mut t = TraceBuilder::new();
    t.start();
    t.byte(0xa0, true);
    t.byte(0x10, true);
    // Restart instead of stop, then read.
    t.sample(true, false);
    t.sample(true, true);
    t.sample(false, true);
    t.sample(false, false);
    t.byte(0xa1, true);
    t.byte(0x99, false);
    t.stop();
    let (graph, i2c) = decode(t);

    let syms = symbols(&graph, i2c);
    assert!(syms.contains(&I2cSymbol::Restart));
    let packets = graph.packets(i2c).unwrap();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].header("Op"), Some("Write"));
    assert_eq!(packets[1].header("Op"), Some("Read"));
}

/// Overlay pipeline driven directly from an I2C symbol stream.
fn eeprom_graph(symbols: Vec<I2cSymbol>) -> (FilterGraph, usize) {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "i2c",
        vec![OutputStream::protocol(
            "data",
            scopedec::filter::SymbolKind::I2c,
        )],
    );
    let eeprom = graph.add_filter("I2C EEPROM").unwrap();
    graph.connect(source, 0, eeprom, 0).unwrap();
    graph.params_mut(eeprom).unwrap().set_int("Address Bits", 8);

    let mut wave = SparseWaveform::new(Timebase::default());
    for (i, s) in symbols.into_iter().enumerate() {
        wave.push(i as i64 * 10, 10, s);
    }
    graph
        .set_waveform(
            source,
            0,
            Waveform::SparseSymbol(SparseSymbolWaveform::I2c(wave)),
        )
        .unwrap();
    graph.refresh_all().unwrap();
    (graph, eeprom)
}

#[test]
fn eeprom_write_decodes_pointer_and_data() {
    let (graph, eeprom) = eeprom_graph(vec![
        I2cSymbol::Start,
        I2cSymbol::Address(0xa0),
        I2cSymbol::Ack,
        I2cSymbol::Data(0x12),
        I2cSymbol::Ack,
        I2cSymbol::Data(0x55),
        I2cSymbol::Ack,
        I2cSymbol::Stop,
    ]);
    let packets = graph.packets(eeprom).unwrap();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].header("Type"), Some("Write"));
    assert_eq!(packets[0].header("Address"), Some("12"));
    assert_eq!(packets[0].header("Len"), Some("1"));
    assert_eq!(packets[0].data, vec![0x55]);
}

#[test]
fn eeprom_polls_classify_and_merge() {
    let (graph, eeprom) = eeprom_graph(vec![
        // Busy poll: select NAKs.
        I2cSymbol::Start,
        I2cSymbol::Address(0xa0),
        I2cSymbol::Nak,
        I2cSymbol::Stop,
        // Ready poll: select ACKs, then stop.
        I2cSymbol::Start,
        I2cSymbol::Address(0xa0),
        I2cSymbol::Ack,
        I2cSymbol::Stop,
    ]);
    let packets = graph.packets(eeprom).unwrap();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].header("Type"), Some("Poll - Busy"));
    assert_eq!(packets[1].header("Type"), Some("Poll - OK"));

    // Polling loops collapse into one row.
    let merged = graph.merged_packets(eeprom).unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].header("Type"), Some("Poll"));

    // Merging a merged list changes nothing further.
    let filter = graph.filter(eeprom).unwrap();
    let again = scopedec::packet::merge_packets(filter, &merged);
    assert_eq!(again, merged);
}

#[test]
fn register_write_and_read_back() {
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "i2c",
        vec![OutputStream::protocol(
            "data",
            scopedec::filter::SymbolKind::I2c,
        )],
    );
    let reg = graph.add_filter("I2C Register").unwrap();
    graph.connect(source, 0, reg, 0).unwrap();
    graph.params_mut(reg).unwrap().set_int("Bus Address", 0x90);

    let symbols = vec![
        // Pointer write then restart into a read.
        I2cSymbol::Start,
        I2cSymbol::Address(0x90),
        I2cSymbol::Ack,
        I2cSymbol::Data(0x07),
        I2cSymbol::Ack,
        I2cSymbol::Restart,
        I2cSymbol::Address(0x91),
        I2cSymbol::Ack,
        I2cSymbol::Data(0xbe),
        I2cSymbol::Ack,
        I2cSymbol::Data(0xef),
        I2cSymbol::Nak,
    ];
    let mut wave = SparseWaveform::new(Timebase::default());
    for (i, s) in symbols.into_iter().enumerate() {
        wave.push(i as i64 * 10, 10, s);
    }
    graph
        .set_waveform(
            source,
            0,
            Waveform::SparseSymbol(SparseSymbolWaveform::I2c(wave)),
        )
        .unwrap();
    graph.refresh_all().unwrap();

    let packets = graph.packets(reg).unwrap();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].header("Type"), Some("Read"));
    assert_eq!(packets[0].header("Address"), Some("07"));
    assert_eq!(packets[0].data, vec![0xbe, 0xef]);
}
