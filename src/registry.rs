//! Protocol registry: display name to constructor, plus instance naming.

use crate::filter::Filter;
use lazy_static::lazy_static;
use std::collections::{BTreeMap, HashMap};

/// Constructor for one filter type.
pub type CreateProc = fn() -> Box<dyn Filter>;

lazy_static! {
    /// Every decoder built into the crate, keyed by display name.
    static ref BUILTIN_PROTOCOLS: BTreeMap<&'static str, CreateProc> = {
        let mut table: BTreeMap<&'static str, CreateProc> = BTreeMap::new();
        table.insert("8b/10b (IBM)", || Box::new(crate::ibm8b10b::Ibm8b10bDecoder::new()));
        table.insert("DisplayPort - Aux Channel", || Box::new(crate::dp_aux::DpAuxDecoder::new()));
        table.insert("Ethernet - Autonegotiation Page", || {
            Box::new(crate::ethernet_autoneg::AutonegPageDecoder::new())
        });
        table.insert("Ethernet - Base-X Autonegotiation", || {
            Box::new(crate::ethernet_basex::BaseXAutonegDecoder::new())
        });
        table.insert("Ethernet - SGMII", || Box::new(crate::ethernet_basex::SgmiiDecoder::new()));
        table.insert("Ethernet - QSGMII", || Box::new(crate::qsgmii::QsgmiiDecoder::new()));
        table.insert("I2C", || Box::new(crate::i2c::I2cDecoder::new()));
        table.insert("I2C EEPROM", || Box::new(crate::i2c_eeprom::I2cEepromDecoder::new()));
        table.insert("I2C Register", || Box::new(crate::i2c_register::I2cRegisterDecoder::new()));
        table.insert("J1939 Bitmask", || Box::new(crate::j1939::J1939BitmaskDecoder::new()));
        table.insert("JTAG", || Box::new(crate::jtag::JtagDecoder::new()));
        table.insert("PCIe 128b/130b", || {
            Box::new(crate::pcie_128b130b::Pcie128b130bDecoder::new())
        });
        table.insert("PCIe Gen 3 Logical", || Box::new(crate::pcie_gen3::PcieGen3Decoder::new()));
        table.insert("PCIe Link Training", || {
            Box::new(crate::pcie_link_training::PcieLinkTrainingDecoder::new())
        });
        table.insert("eSPI", || Box::new(crate::espi::EspiDecoder::new()));
        table.insert("USB 1.0/2.x Activity", || {
            Box::new(crate::usb2_activity::Usb2ActivityDecoder::new())
        });
        table.insert("USB 1.0/2.x PMA", || Box::new(crate::usb2_pma::Usb2PmaDecoder::new()));
        table.insert("USB 1.0/2.x PCS", || Box::new(crate::usb2_pcs::Usb2PcsDecoder::new()));
        table.insert("USB 1.0/2.x Packet", || {
            Box::new(crate::usb2_packet::Usb2PacketDecoder::new())
        });
        table
    };
}

/// Name-to-constructor table with per-protocol instance counters.
///
/// Registration is eager: [`Registry::builtin`] knows every decoder in the
/// crate. Tests can start from [`Registry::empty`] instead to avoid
/// cross-contamination.
#[derive(Clone)]
pub struct Registry {
    procs: BTreeMap<String, CreateProc>,
    instance_count: HashMap<String, usize>,
}

impl Registry {
    /// Registry with no protocols.
    pub fn empty() -> Self {
        Self {
            procs: BTreeMap::new(),
            instance_count: HashMap::new(),
        }
    }

    /// Registry with every built-in decoder registered.
    pub fn builtin() -> Self {
        let mut procs = BTreeMap::new();
        for (&name, &proc) in BUILTIN_PROTOCOLS.iter() {
            procs.insert(name.to_string(), proc);
        }
        Self {
            procs,
            instance_count: HashMap::new(),
        }
    }

    /// Register a protocol under its display name.
    pub fn register(&mut self, name: &str, proc: CreateProc) {
        self.procs.insert(name.to_string(), proc);
    }

    /// Display names of every registered protocol, in name order.
    pub fn protocols(&self) -> Vec<&str> {
        self.procs.keys().map(String::as_str).collect()
    }

    /// Instantiate a filter by display name.
    pub fn create(&self, protocol: &str) -> Option<Box<dyn Filter>> {
        self.procs.get(protocol).map(|proc| proc())
    }

    /// Allocate the next auto-generated instance name for `protocol`.
    pub fn next_auto_name(&mut self, protocol: &str) -> String {
        let count = self.instance_count.entry(protocol.to_string()).or_insert(0);
        *count += 1;
        format!("{}_{}", protocol, count)
    }

    /// Number of instances created so far for `protocol`.
    pub fn instance_count(&self, protocol: &str) -> usize {
        self.instance_count.get(protocol).copied().unwrap_or(0)
    }

    /// Forget an instance, for background filters that should not consume a
    /// name slot.
    pub fn release_instance(&mut self, protocol: &str) {
        if let Some(count) = self.instance_count.get_mut(protocol) {
            *count = count.saturating_sub(1);
        }
    }
}
