//! eSPI bus decode: GET_STATUS exchange with CRC and turnaround.

use scopedec::espi::{update_crc8, EspiSymbol};
use scopedec::filter::OutputStream;
use scopedec::graph::FilterGraph;
use scopedec::packet::PacketColor;
use scopedec::waveform::{Timebase, UniformWaveform, Waveform};

struct BusTrace {
    clk: Vec<bool>,
    cs: Vec<bool>,
    dq: [Vec<bool>; 4],
}

impl BusTrace {
    fn new() -> Self {
        let mut t = Self {
            clk: Vec::new(),
            cs: Vec::new(),
            dq: Default::default(),
        };
        // Bus idle, deselected.
        t.tick(false, true, [true; 4]);
        t.tick(false, true, [true; 4]);
        t
    }

    fn tick(&mut self, clk: bool, cs: bool, dq: [bool; 4]) {
        self.clk.push(clk);
        self.cs.push(cs);
        for (lane, v) in self.dq.iter_mut().zip(dq) {
            lane.push(v);
        }
    }

    /// Clock one byte MSB first on DQ0 (command phase, x1).
    fn command_byte(&mut self, byte: u8) {
        for bit in (0..8).rev() {
            let b = byte & (1 << bit) != 0;
            self.tick(false, false, [b, true, true, true]);
            self.tick(true, false, [b, true, true, true]);
        }
    }

    /// Clock one byte MSB first on DQ1 (response phase, x1).
    fn response_byte(&mut self, byte: u8) {
        for bit in (0..8).rev() {
            let b = byte & (1 << bit) != 0;
            self.tick(false, false, [true, b, true, true]);
            self.tick(true, false, [true, b, true, true]);
        }
    }

    /// Two dead clocks of bus turnaround.
    fn turnaround(&mut self) {
        for _ in 0..2 {
            self.tick(false, false, [true; 4]);
            self.tick(true, false, [true; 4]);
        }
    }

    fn deselect(&mut self) {
        self.tick(false, false, [true; 4]);
        self.tick(false, true, [true; 4]);
        self.tick(false, true, [true; 4]);
    }
}

#[test]
fn get_status_exchange() {
    let mut trace = BusTrace::new();

    // Command phase: opcode + CRC.
    let cmd = 0x25u8;
    let cmd_crc = update_crc8(0, cmd);
    trace.tick(false, false, [true; 4]); // select
    trace.command_byte(cmd);
    trace.command_byte(cmd_crc);
    trace.turnaround();

    // Response phase: Accept, 16-bit status (PC_AVAIL | NP_AVAIL), CRC.
    let response = [0x08u8, 0x30, 0x00];
    let mut crc = 0;
    for b in response {
        crc = update_crc8(crc, b);
    }
    for b in response {
        trace.response_byte(b);
    }
    trace.response_byte(crc);
    trace.deselect();

    let tb = Timebase {
        timescale: 1_000_000,
        ..Timebase::default()
    };
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "probe",
        vec![
            OutputStream::digital("clk"),
            OutputStream::digital("cs#"),
            OutputStream::digital("dq3"),
            OutputStream::digital("dq2"),
            OutputStream::digital("dq1"),
            OutputStream::digital("dq0"),
        ],
    );
    let espi = graph.add_filter("eSPI").unwrap();

    let BusTrace { clk, cs, dq } = trace;
    let [dq0, dq1, dq2, dq3] = dq;
    for (port, data) in [clk, cs, dq3, dq2, dq1, dq0].into_iter().enumerate() {
        graph
            .set_waveform(
                source,
                port,
                Waveform::UniformDigital(UniformWaveform::from_samples(tb, data)),
            )
            .unwrap();
        graph.connect(source, port, espi, port).unwrap();
    }
    graph.refresh_all().unwrap();

    let packets = graph.packets(espi).unwrap();
    assert_eq!(packets.len(), 1);
    let p = &packets[0];
    assert_eq!(p.header("Command"), Some("Get Status"));
    assert_eq!(p.header("Response"), Some("Accept"));
    let status = p.header("Status").unwrap();
    assert!(status.contains("PC_AVAIL"));
    assert!(status.contains("NP_AVAIL"));
    assert_eq!(p.color, PacketColor::Status);

    // Both CRCs check out in the symbol stream.
    let syms = graph.waveform(espi, 0).unwrap().as_espi().unwrap();
    assert!(syms
        .samples
        .iter()
        .any(|s| matches!(s, EspiSymbol::CommandCrcGood(_))));
    assert!(syms
        .samples
        .iter()
        .any(|s| matches!(s, EspiSymbol::ResponseCrcGood(_))));
    assert!(!syms
        .samples
        .iter()
        .any(|s| matches!(s, EspiSymbol::CommandCrcBad(_) | EspiSymbol::ResponseCrcBad(_))));
}

#[test]
fn bad_command_crc_flags_packet() {
    let mut trace = BusTrace::new();
    trace.tick(false, false, [true; 4]);
    trace.command_byte(0x25);
    trace.command_byte(0x00); // wrong CRC
    trace.deselect();

    let tb = Timebase {
        timescale: 1_000_000,
        ..Timebase::default()
    };
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "probe",
        vec![
            OutputStream::digital("clk"),
            OutputStream::digital("cs#"),
            OutputStream::digital("dq3"),
            OutputStream::digital("dq2"),
            OutputStream::digital("dq1"),
            OutputStream::digital("dq0"),
        ],
    );
    let espi = graph.add_filter("eSPI").unwrap();
    let BusTrace { clk, cs, dq } = trace;
    let [dq0, dq1, dq2, dq3] = dq;
    for (port, data) in [clk, cs, dq3, dq2, dq1, dq0].into_iter().enumerate() {
        graph
            .set_waveform(
                source,
                port,
                Waveform::UniformDigital(UniformWaveform::from_samples(tb, data)),
            )
            .unwrap();
        graph.connect(source, port, espi, port).unwrap();
    }
    graph.refresh_all().unwrap();

    let syms = graph.waveform(espi, 0).unwrap().as_espi().unwrap();
    assert!(syms
        .samples
        .iter()
        .any(|s| matches!(s, EspiSymbol::CommandCrcBad(_))));
    let packets = graph.packets(espi).unwrap();
    assert_eq!(packets[0].color, PacketColor::Error);
}
