//! Packetized decoder output and packet merging.

use std::collections::BTreeMap;

/// Background color class of a packet row in an analyzer view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PacketColor {
    #[default]
    Default,
    Error,
    Status,
    Control,
    DataRead,
    DataWrite,
    Command,
}

impl PacketColor {
    /// Hex rendering of the background color.
    pub fn hex(&self) -> &'static str {
        match self {
            PacketColor::Default => "#101010",
            PacketColor::Error => "#800000",
            PacketColor::Status => "#000080",
            PacketColor::Control => "#808000",
            PacketColor::DataRead => "#336699",
            PacketColor::DataWrite => "#339966",
            PacketColor::Command => "#600050",
        }
    }
}

/// Semantic summary of a span of decoded symbols.
///
/// Headers are human-readable key/value pairs in key order; `data` holds the
/// raw payload bytes of the span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Packet {
    /// Offset of the packet from the start of the capture, in femtoseconds.
    pub offset: i64,
    /// Duration of the packet in femtoseconds.
    pub len: i64,
    /// Human-readable header fields.
    pub headers: BTreeMap<String, String>,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Display hint for analyzer views.
    pub color: PacketColor,
}

impl Packet {
    pub fn new(offset: i64) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    /// Insert or replace a header field.
    pub fn set_header(&mut self, key: &str, value: impl Into<String>) {
        self.headers.insert(key.to_string(), value.into());
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// End of the packet in femtoseconds.
    pub fn end(&self) -> i64 {
        self.offset + self.len
    }
}

/// Merge rules supplied by a packet decoder.
///
/// `can_merge` decides whether `next` continues the run started at `first`
/// (with `cur` being the packet merged most recently); `create_merged_header`
/// builds the summary packet for the run beginning at index `i` of `packets`.
pub trait PacketMerger {
    fn can_merge(&self, _first: &Packet, _cur: &Packet, _next: &Packet) -> bool {
        false
    }

    fn create_merged_header(&self, packets: &[Packet], i: usize) -> Packet {
        packets[i].clone()
    }
}

/// Walk `packets` left to right, greedily collapsing every mergeable run
/// into its summary packet. Runs of length one are passed through unchanged,
/// so merging an already-merged list is the identity.
pub fn merge_packets(merger: &dyn PacketMerger, packets: &[Packet]) -> Vec<Packet> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < packets.len() {
        let first = &packets[i];
        let mut end = i + 1;
        while end < packets.len() && merger.can_merge(first, &packets[end - 1], &packets[end]) {
            end += 1;
        }
        if end - i > 1 {
            out.push(merger.create_merged_header(packets, i));
        } else {
            out.push(first.clone());
        }
        i = end;
    }
    out
}
