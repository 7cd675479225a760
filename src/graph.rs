//! Filter graph: an arena of filter nodes wired port-to-stream, refreshed
//! in dependency order.

use crate::cache::AnalysisCache;
use crate::filter::{Category, Filter, OutputStream, RefreshContext, StreamType};
use crate::packet::{merge_packets, Packet, PacketMerger};
use crate::parameter::ParamSet;
use crate::registry::Registry;
use crate::waveform::Waveform;
use log::{debug, trace};
use serde_json::{json, Value};
use thiserror::Error;
use tinyvec::TinyVec;

/// Handle to a node in the graph. Ids are never reused.
pub type NodeId = usize;

/// Reference to one output stream of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamRef {
    pub node: NodeId,
    pub stream: usize,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown protocol {0:?}")]
    UnknownProtocol(String),
    #[error("invalid node id {0}")]
    InvalidNode(NodeId),
    #[error("port {port} out of range for node {node}")]
    PortOutOfRange { node: NodeId, port: usize },
    #[error("stream {stream} out of range for node {node}")]
    StreamOutOfRange { node: NodeId, stream: usize },
    #[error("stream type {stype:?} rejected by port {port} of node {node}")]
    TypeMismatch {
        node: NodeId,
        port: usize,
        stype: StreamType,
    },
    #[error("filter graph contains a cycle")]
    Cycle,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Malformed(&'static str),
    #[error("unknown protocol {0:?}")]
    UnknownProtocol(String),
}

/// Waveform supplier node: a filter with no inputs whose output waveforms
/// are assigned from outside the graph, typically by an instrument driver.
#[derive(Clone)]
pub struct WaveformSource {
    streams: Vec<OutputStream>,
    params: ParamSet,
}

impl WaveformSource {
    pub fn new(streams: Vec<OutputStream>) -> Self {
        Self {
            streams,
            params: ParamSet::new(),
        }
    }
}

impl PacketMerger for WaveformSource {}

impl Filter for WaveformSource {
    fn protocol_name(&self) -> &'static str {
        "Source"
    }
    fn category(&self) -> Category {
        Category::Misc
    }
    fn input_names(&self) -> &'static [&'static str] {
        &[]
    }
    fn streams(&self) -> Vec<OutputStream> {
        self.streams.clone()
    }
    fn validate_channel(&self, _port: usize, _stype: StreamType) -> bool {
        false
    }
    fn params(&self) -> &ParamSet {
        &self.params
    }
    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }
    fn refresh(&mut self, _ctx: &mut RefreshContext) {
        // Externally assigned data; nothing to recompute.
    }
}

struct FilterNode {
    /// Absent only while the node's own refresh is running.
    filter: Option<Box<dyn Filter>>,
    name: String,
    ports: TinyVec<[Option<StreamRef>; 8]>,
    outputs: Vec<OutputStream>,
    packets: Vec<Packet>,
}

/// Owner of the filter arena, the protocol registry and the shared analysis
/// cache. Nodes are refreshed only on request, in dependency order.
pub struct FilterGraph {
    nodes: Vec<Option<FilterNode>>,
    registry: Registry,
    cache: AnalysisCache,
}

impl Default for FilterGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterGraph {
    /// Graph with the built-in protocol registry.
    pub fn new() -> Self {
        Self::with_registry(Registry::builtin())
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            nodes: Vec::new(),
            registry,
            cache: AnalysisCache::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    /// Drop all memoized analysis results.
    pub fn clear_analysis_cache(&self) {
        self.cache.clear();
    }

    /// Create a node from a registered protocol, with an auto-generated
    /// name of the form `<Protocol>_<N>`.
    pub fn add_filter(&mut self, protocol: &str) -> Result<NodeId, GraphError> {
        let filter = self
            .registry
            .create(protocol)
            .ok_or_else(|| GraphError::UnknownProtocol(protocol.to_string()))?;
        let name = self.registry.next_auto_name(protocol);
        Ok(self.insert_node(filter, name))
    }

    /// Add an already-constructed filter instance to the graph.
    pub fn add_instance(&mut self, filter: Box<dyn Filter>) -> NodeId {
        let name = self.registry.next_auto_name(filter.protocol_name());
        self.insert_node(filter, name)
    }

    /// Add a waveform supplier node with the given output stream layout.
    pub fn add_source(&mut self, name: &str, streams: Vec<OutputStream>) -> NodeId {
        let source = Box::new(WaveformSource::new(streams));
        self.insert_node(source, name.to_string())
    }

    /// Instantiate a filter for introspection without adding it to the
    /// graph or consuming an instance name.
    pub fn background_instance(&self, protocol: &str) -> Option<Box<dyn Filter>> {
        self.registry.create(protocol)
    }

    fn insert_node(&mut self, filter: Box<dyn Filter>, name: String) -> NodeId {
        let id = self.nodes.len();
        let mut ports = TinyVec::new();
        ports.resize(filter.input_names().len(), None);
        let outputs = filter.streams();
        debug!(
            "adding node {} ({}) with {} ports, {} streams",
            id,
            name,
            ports.len(),
            outputs.len()
        );
        self.nodes.push(Some(FilterNode {
            filter: Some(filter),
            name,
            ports,
            outputs,
            packets: Vec::new(),
        }));
        id
    }

    /// Remove a node. Downstream ports referring to it resolve to a missing
    /// input at their next refresh.
    pub fn remove(&mut self, node: NodeId) -> Result<(), GraphError> {
        let slot = self
            .nodes
            .get_mut(node)
            .ok_or(GraphError::InvalidNode(node))?;
        if slot.is_none() {
            return Err(GraphError::InvalidNode(node));
        }
        *slot = None;
        Ok(())
    }

    /// Ids of all live nodes.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|_| i))
            .collect()
    }

    fn node(&self, id: NodeId) -> Result<&FilterNode, GraphError> {
        self.nodes
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(GraphError::InvalidNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut FilterNode, GraphError> {
        self.nodes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(GraphError::InvalidNode(id))
    }

    pub fn name(&self, id: NodeId) -> Result<&str, GraphError> {
        Ok(&self.node(id)?.name)
    }

    pub fn set_name(&mut self, id: NodeId, name: &str) -> Result<(), GraphError> {
        self.node_mut(id)?.name = name.to_string();
        Ok(())
    }

    pub fn filter(&self, id: NodeId) -> Result<&dyn Filter, GraphError> {
        Ok(self
            .node(id)?
            .filter
            .as_deref()
            .expect("node is mid-refresh"))
    }

    pub fn filter_mut(&mut self, id: NodeId) -> Result<&mut dyn Filter, GraphError> {
        Ok(self
            .node_mut(id)?
            .filter
            .as_deref_mut()
            .expect("node is mid-refresh"))
    }

    /// Parameter set of a node, for configuration before refresh.
    pub fn params_mut(&mut self, id: NodeId) -> Result<&mut ParamSet, GraphError> {
        Ok(self.filter_mut(id)?.params_mut())
    }

    /// Wire output stream (`source`, `stream`) into input `port` of `node`.
    /// The connection is type-checked against the target filter.
    pub fn connect(
        &mut self,
        source: NodeId,
        stream: usize,
        node: NodeId,
        port: usize,
    ) -> Result<(), GraphError> {
        let stype = {
            let src = self.node(source)?;
            src.outputs
                .get(stream)
                .ok_or(GraphError::StreamOutOfRange {
                    node: source,
                    stream,
                })?
                .stype
        };
        let target = self.node(node)?;
        let filter = target.filter.as_deref().expect("node is mid-refresh");
        if port >= target.ports.len() {
            return Err(GraphError::PortOutOfRange { node, port });
        }
        if !filter.validate_channel(port, stype) {
            return Err(GraphError::TypeMismatch { node, port, stype });
        }
        self.node_mut(node)?.ports[port] = Some(StreamRef {
            node: source,
            stream,
        });
        Ok(())
    }

    /// Unwire an input port.
    pub fn disconnect(&mut self, node: NodeId, port: usize) -> Result<(), GraphError> {
        let target = self.node_mut(node)?;
        if port >= target.ports.len() {
            return Err(GraphError::PortOutOfRange { node, port });
        }
        target.ports[port] = None;
        Ok(())
    }

    /// Current wiring of an input port.
    pub fn input(&self, node: NodeId, port: usize) -> Result<Option<StreamRef>, GraphError> {
        let n = self.node(node)?;
        n.ports
            .get(port)
            .copied()
            .ok_or(GraphError::PortOutOfRange { node, port })
    }

    /// Assign a waveform to an output stream from outside the graph. This is
    /// the waveform-supplier interface used for source nodes.
    pub fn set_waveform(
        &mut self,
        node: NodeId,
        stream: usize,
        wave: Waveform,
    ) -> Result<(), GraphError> {
        let n = self.node_mut(node)?;
        let slot = n
            .outputs
            .get_mut(stream)
            .ok_or(GraphError::StreamOutOfRange { node, stream })?;
        slot.set_data(wave);
        Ok(())
    }

    /// Borrow the current waveform of an output stream.
    pub fn waveform(&self, node: NodeId, stream: usize) -> Option<&Waveform> {
        self.nodes
            .get(node)
            .and_then(Option::as_ref)
            .and_then(|n| n.outputs.get(stream))
            .and_then(OutputStream::data)
    }

    /// Borrow an output stream slot (for display scale queries).
    pub fn stream(&self, node: NodeId, stream: usize) -> Result<&OutputStream, GraphError> {
        self.node(node)?
            .outputs
            .get(stream)
            .ok_or(GraphError::StreamOutOfRange { node, stream })
    }

    pub fn stream_mut(
        &mut self,
        node: NodeId,
        stream: usize,
    ) -> Result<&mut OutputStream, GraphError> {
        self.node_mut(node)?
            .outputs
            .get_mut(stream)
            .ok_or(GraphError::StreamOutOfRange { node, stream })
    }

    /// Packets emitted by the node's most recent refresh.
    pub fn packets(&self, node: NodeId) -> Result<&[Packet], GraphError> {
        Ok(&self.node(node)?.packets)
    }

    /// Packets with the decoder's merge rules applied.
    pub fn merged_packets(&self, node: NodeId) -> Result<Vec<Packet>, GraphError> {
        let n = self.node(node)?;
        let filter = n.filter.as_deref().expect("node is mid-refresh");
        Ok(merge_packets(filter as &dyn PacketMerger, &n.packets))
    }

    /// Refresh a single node from its current inputs.
    pub fn refresh(&mut self, id: NodeId) -> Result<(), GraphError> {
        let slot = self.node_mut(id)?;
        let mut filter = slot.filter.take().expect("reentrant refresh");
        let mut outputs = std::mem::take(&mut slot.outputs);
        let mut packets = std::mem::take(&mut slot.packets);
        let ports = slot.ports.clone();
        packets.clear();

        trace!("refresh node {} ({})", id, filter.protocol_name());
        {
            let inputs: Vec<Option<&Waveform>> = ports
                .iter()
                .map(|p| p.as_ref().and_then(|r| self.waveform(r.node, r.stream)))
                .collect();
            let mut ctx = RefreshContext {
                inputs: &inputs,
                outputs: &mut outputs,
                packets: &mut packets,
                cache: &self.cache,
            };
            filter.refresh(&mut ctx);
        }

        let slot = self.nodes[id].as_mut().expect("node vanished mid-refresh");
        slot.filter = Some(filter);
        slot.outputs = outputs;
        slot.packets = packets;
        Ok(())
    }

    /// Refresh every node in dependency order.
    pub fn refresh_all(&mut self) -> Result<(), GraphError> {
        for id in self.topological_order()? {
            self.refresh(id)?;
        }
        Ok(())
    }

    /// Topological order over the live nodes. Ports wired to removed nodes
    /// contribute no edges.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let len = self.nodes.len();
        let mut alive = vec![false; len];
        let mut edges: Vec<(NodeId, NodeId)> = Vec::new();
        for (id, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            alive[id] = true;
            for port in node.ports.iter().flatten() {
                if self.nodes.get(port.node).and_then(Option::as_ref).is_some() {
                    edges.push((port.node, id));
                }
            }
        }

        let mut inputs_left = vec![0usize; len];
        for &(_, dst) in &edges {
            inputs_left[dst] += 1;
        }

        let mut order = Vec::new();
        let mut left = alive.clone();
        let mut remaining = left.iter().filter(|&&a| a).count();
        for id in 0..len {
            if left[id] && inputs_left[id] == 0 {
                left[id] = false;
                order.push(id);
                remaining -= 1;
            }
        }
        let mut cursor = 0;
        while cursor < order.len() {
            let ready = order[cursor];
            cursor += 1;
            for &(src, dst) in &edges {
                if src == ready && left[dst] {
                    inputs_left[dst] -= 1;
                    if inputs_left[dst] == 0 {
                        left[dst] = false;
                        order.push(dst);
                        remaining -= 1;
                    }
                }
            }
        }
        if remaining > 0 {
            return Err(GraphError::Cycle);
        }
        Ok(order)
    }

    /// Serialize every node to a generic attribute map.
    pub fn save_config(&self) -> Value {
        let mut nodes = Vec::new();
        for (id, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            let filter = node.filter.as_deref().expect("node is mid-refresh");

            let mut parameters = serde_json::Map::new();
            for (name, param) in filter.params().iter() {
                parameters.insert(name.to_string(), Value::String(param.to_text()));
            }

            let streams: Vec<Value> = node
                .outputs
                .iter()
                .map(|s| {
                    json!({
                        "name": s.name,
                        "yunit": format!("{:?}", s.unit),
                        "stype": match s.stype {
                            StreamType::Analog => "analog",
                            StreamType::Digital => "digital",
                            StreamType::Protocol(_) => "protocol",
                        },
                        "vrange": s.voltage_range(),
                        "offset": s.offset(),
                    })
                })
                .collect();

            let inputs: Vec<Value> = node
                .ports
                .iter()
                .map(|p| match p {
                    Some(r) => json!({ "node": r.node, "stream": r.stream }),
                    None => Value::Null,
                })
                .collect();

            nodes.push(json!({
                "id": id,
                "protocol": filter.protocol_name(),
                "name": node.name,
                "xunit": "fs",
                "streams": streams,
                "parameters": parameters,
                "inputs": inputs,
            }));
        }
        json!({ "nodes": nodes })
    }

    /// Restore nodes from a configuration saved by [`Self::save_config`].
    /// New nodes are appended; returns the new ids in saved order.
    pub fn load_config(&mut self, config: &Value) -> Result<Vec<NodeId>, ConfigError> {
        let entries = config
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or(ConfigError::Malformed("missing node list"))?;

        // First pass: create the nodes and restore parameters and scale.
        let mut id_map: Vec<(u64, NodeId)> = Vec::new();
        for entry in entries {
            let protocol = entry
                .get("protocol")
                .and_then(Value::as_str)
                .ok_or(ConfigError::Malformed("node without protocol"))?;
            let saved_id = entry
                .get("id")
                .and_then(Value::as_u64)
                .ok_or(ConfigError::Malformed("node without id"))?;

            let id = if protocol == "Source" {
                // Sources carry no samples in the config; restore the
                // stream layout so wiring survives, data comes back from
                // the instrument.
                let mut streams = Vec::new();
                if let Some(decls) = entry.get("streams").and_then(Value::as_array) {
                    for s in decls {
                        let name = s.get("name").and_then(Value::as_str).unwrap_or("data");
                        match s.get("stype").and_then(Value::as_str) {
                            Some("analog") => streams.push(OutputStream::analog(name)),
                            _ => streams.push(OutputStream::digital(name)),
                        }
                    }
                }
                self.add_source(
                    entry.get("name").and_then(Value::as_str).unwrap_or("Source"),
                    streams,
                )
            } else {
                let mut filter = self
                    .registry
                    .create(protocol)
                    .ok_or_else(|| ConfigError::UnknownProtocol(protocol.to_string()))?;
                if let Some(params) = entry.get("parameters").and_then(Value::as_object) {
                    for (name, value) in params {
                        if let Some(text) = value.as_str() {
                            filter.params_mut().parse(name, text);
                        }
                    }
                }
                let name = entry
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| self.registry.next_auto_name(protocol));
                self.insert_node(filter, name)
            };

            if let Some(streams) = entry.get("streams").and_then(Value::as_array) {
                for (i, s) in streams.iter().enumerate() {
                    if let Ok(slot) = self.stream_mut(id, i) {
                        if let Some(vrange) = s.get("vrange").and_then(Value::as_f64) {
                            slot.set_voltage_range(vrange as f32);
                        }
                        if let Some(offset) = s.get("offset").and_then(Value::as_f64) {
                            slot.set_offset(offset as f32);
                        }
                    }
                }
            }
            id_map.push((saved_id, id));
        }

        // Second pass: restore wiring through the saved-id map.
        for (entry, &(_, id)) in entries.iter().zip(&id_map) {
            let Some(inputs) = entry.get("inputs").and_then(Value::as_array) else {
                continue;
            };
            for (port, input) in inputs.iter().enumerate() {
                if input.is_null() {
                    continue;
                }
                let src_saved = input
                    .get("node")
                    .and_then(Value::as_u64)
                    .ok_or(ConfigError::Malformed("input without node id"))?;
                let stream = input
                    .get("stream")
                    .and_then(Value::as_u64)
                    .ok_or(ConfigError::Malformed("input without stream index"))?
                    as usize;
                let src = id_map
                    .iter()
                    .find(|(saved, _)| *saved == src_saved)
                    .map(|&(_, new)| new)
                    .ok_or(ConfigError::Malformed("input refers to unknown node"))?;
                self.connect(src, stream, id, port)
                    .map_err(|_| ConfigError::Malformed("input wiring rejected"))?;
            }
        }

        Ok(id_map.into_iter().map(|(_, id)| id).collect())
    }
}
