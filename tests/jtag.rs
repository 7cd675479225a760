//! JTAG TAP state machine and shift register tests.

use scopedec::filter::OutputStream;
use scopedec::graph::FilterGraph;
use scopedec::jtag::JtagState;
use scopedec::waveform::{Timebase, UniformWaveform, Waveform};

#[test]
fn tap_walks_to_reset_on_five_tms_ones() {
    let mut state = JtagState::RunTestIdle;
    for _ in 0..5 {
        state = state.next(true);
    }
    assert_eq!(state, JtagState::TestLogicReset);
}

#[test]
fn unknown_states_converge() {
    let mut state = JtagState::Unknown0;
    for _ in 0..5 {
        state = state.next(true);
    }
    assert_eq!(state, JtagState::TestLogicReset);
    assert_eq!(JtagState::Unknown3.next(false), JtagState::Unknown0);
}

#[test]
fn dr_scan_path() {
    use JtagState::*;
    let mut state = RunTestIdle;
    for (tms, expect) in [
        (true, SelectDrScan),
        (false, CaptureDr),
        (false, ShiftDr),
        (true, Exit1Dr),
        (true, UpdateDr),
        (false, RunTestIdle),
    ] {
        state = state.next(tms);
        assert_eq!(state, expect);
    }
}

struct JtagTrace {
    tdi: Vec<bool>,
    tdo: Vec<bool>,
    tms: Vec<bool>,
    tck: Vec<bool>,
}

impl JtagTrace {
    fn new() -> Self {
        Self {
            tdi: Vec::new(),
            tdo: Vec::new(),
            tms: Vec::new(),
            tck: Vec::new(),
        }
    }

    /// One TCK cycle: set lines while the clock is low, then raise it.
    fn cycle(&mut self, tdi: bool, tdo: bool, tms: bool) {
        for clk in [false, true] {
            self.tdi.push(tdi);
            self.tdo.push(tdo);
            self.tms.push(tms);
            self.tck.push(clk);
        }
    }
}

#[test]
fn dr_shift_emits_write_and_read_packets() {
    let mut trace = JtagTrace::new();
    // Idle, then RTI -> SelectDR -> CaptureDR -> ShiftDR.
    trace.cycle(false, false, false);
    trace.cycle(false, false, true);
    trace.cycle(false, false, false);
    trace.cycle(false, false, false);
    // Shift 0xa5 in and 0x3c out, LSB first; the last bit rides the
    // Exit1-DR transition.
    let tdi_byte = 0xa5u8;
    let tdo_byte = 0x3cu8;
    for bit in 0..8 {
        let last = bit == 7;
        trace.cycle(
            tdi_byte & (1 << bit) != 0,
            tdo_byte & (1 << bit) != 0,
            last,
        );
    }
    // Update-DR, back to idle.
    trace.cycle(false, false, true);
    trace.cycle(false, false, false);
    trace.cycle(false, false, false);

    let tb = Timebase {
        timescale: 1_000_000,
        ..Timebase::default()
    };
    let mut graph = FilterGraph::new();
    let source = graph.add_source(
        "probe",
        vec![
            OutputStream::digital("TDI"),
            OutputStream::digital("TDO"),
            OutputStream::digital("TMS"),
            OutputStream::digital("TCK"),
        ],
    );
    let jtag = graph.add_filter("JTAG").unwrap();
    for (port, data) in [trace.tdi, trace.tdo, trace.tms, trace.tck]
        .into_iter()
        .enumerate()
    {
        graph
            .set_waveform(
                source,
                port,
                Waveform::UniformDigital(UniformWaveform::from_samples(tb, data)),
            )
            .unwrap();
        graph.connect(source, port, jtag, port).unwrap();
    }
    graph.refresh_all().unwrap();

    let packets = graph.packets(jtag).unwrap();
    assert_eq!(packets.len(), 2);

    let write = &packets[0];
    assert_eq!(write.header("Operation"), Some("DR write"));
    assert_eq!(write.header("Bits"), Some("8"));
    assert_eq!(write.data, vec![0xa5]);

    let read = &packets[1];
    assert_eq!(read.header("Operation"), Some("DR read"));
    assert_eq!(read.data, vec![0x3c]);

    // The symbol stream tracks the TAP states, including the shift.
    let syms = graph.waveform(jtag, 0).unwrap().as_jtag().unwrap();
    assert!(syms
        .samples
        .iter()
        .any(|s| s.state == scopedec::jtag::JtagState::ShiftDr && s.len == 8));
}
