//! Generic prelude.

pub use super::cache::AnalysisCache;
pub use super::filter::{
    Category, Filter, OutputStream, RefreshContext, StreamType, SymbolKind, Unit,
};
pub use super::graph::{ConfigError, FilterGraph, GraphError, NodeId, StreamRef, WaveformSource};
pub use super::packet::{merge_packets, Packet, PacketColor, PacketMerger};
pub use super::parameter::{ParamSet, ParamType, Parameter};
pub use super::registry::Registry;
pub use super::signal::*;
pub use super::waveform::{
    Analog, Digital, SampleSource, SparseSymbolWaveform, SparseWaveform, SymbolColor,
    SymbolSamples, SymbolText, Timebase, UniformSymbolWaveform, UniformWaveform, Waveform,
    FS_PER_SECOND,
};

pub use super::dp_aux::{DpAuxDecoder, DpAuxSymbol};
pub use super::espi::{EspiDecoder, EspiSymbol};
pub use super::ethernet_autoneg::{AutonegCodeword, AutonegPageDecoder, AutonegSymbol};
pub use super::ethernet_basex::{BaseXAutonegDecoder, BaseXSymbol, SgmiiDecoder, SgmiiSymbol};
pub use super::i2c::{I2cDecoder, I2cSymbol};
pub use super::i2c_eeprom::{I2cEepromDecoder, I2cEepromSymbol};
pub use super::i2c_register::{I2cRegisterDecoder, I2cRegisterSymbol};
pub use super::ibm8b10b::{CodeSymbol, Ibm8b10bDecoder};
pub use super::j1939::{J1939BitmaskDecoder, J1939PduSymbol};
pub use super::jtag::{JtagDecoder, JtagState, JtagSymbol};
pub use super::pcie_128b130b::{BlockSymbol, BlockType, Pcie128b130bDecoder};
pub use super::pcie_gen3::{Gen3Symbol, PcieGen3Decoder};
pub use super::pcie_link_training::{LtssmSymbol, PcieLinkTrainingDecoder, TrainingSymbol};
pub use super::qsgmii::QsgmiiDecoder;
pub use super::usb2_activity::Usb2ActivityDecoder;
pub use super::usb2_packet::{Usb2PacketDecoder, Usb2PacketSymbol};
pub use super::usb2_pcs::{Usb2PcsDecoder, Usb2PcsSymbol};
pub use super::usb2_pma::{Usb2PmaDecoder, Usb2PmaSymbol};
