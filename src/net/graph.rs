//! The network graph: an arena of typed nodes wired by plugs.
//!
//! A `Common` node is a container: its inputs fan out to subnet inputs,
//! subnets execute in declared order, and subnet outputs feed sibling
//! inputs or the container's own outputs. Plugs are arena indices, so
//! execution is a plain recursive walk without back-pointers.

use std::io::{Read, Write};

use log::debug;

use super::blob::Blob;
use super::hyper::HyperParams;
use super::layers::LayerKind;
use crate::error::{Error, Result};
use crate::reader::{BinReader, BinWriter};

const MAX_SUBNETS: i32 = 1 << 10;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Common,
    Layer(LayerKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Port {
    Input,
    Output,
}

/// A directed edge: the source blob is copied into this slot.
#[derive(Debug, Clone, Copy)]
struct Plug {
    node: usize,
    slot: usize,
    port: Port,
}

pub struct Node {
    pub type_name: String,
    pub kind: NodeKind,
    pub hyper: HyperParams,
    pub params: Vec<Blob>,
    inputs: Vec<Option<Blob>>,
    outputs: Vec<Option<Blob>>,
    input_plugs: Vec<Vec<Plug>>,
    output_plugs: Vec<Vec<Plug>>,
    subnets: Vec<usize>,
    /// Raw wiring pairs as stored in the file, kept for re-serialization:
    /// per subnet, one `(net_idx, blob_idx)` pair per subnet input.
    input_wiring: Vec<Vec<(i32, i32)>>,
    /// One `(net_idx, blob_idx)` pair per own output.
    output_wiring: Vec<(i32, i32)>,
}

impl Node {
    fn new(type_name: String, kind: NodeKind, hyper: HyperParams, num_in: usize, num_out: usize) -> Self {
        Self {
            type_name,
            kind,
            hyper,
            params: Vec::new(),
            inputs: vec![None; num_in],
            outputs: vec![None; num_out],
            input_plugs: vec![Vec::new(); num_in],
            output_plugs: vec![Vec::new(); num_out],
            subnets: Vec::new(),
            input_wiring: Vec::new(),
            output_wiring: Vec::new(),
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }
}

pub struct Graph {
    nodes: Vec<Node>,
    root: usize,
}

impl Graph {
    /// Deserialize a recursive graph stream.
    pub fn load<R: Read>(reader: &mut BinReader<R>) -> Result<Self> {
        let mut nodes = Vec::new();
        let root = Self::load_node(&mut nodes, reader)?;
        let graph = Self { nodes, root };
        graph.validate()?;
        Ok(graph)
    }

    fn load_node<R: Read>(nodes: &mut Vec<Node>, reader: &mut BinReader<R>) -> Result<usize> {
        let type_name = reader.read_string()?;
        debug!("creating {} net", type_name);
        let hyper = HyperParams::load(reader)?;

        let (kind, num_subnet, num_in, num_out, num_params) = if type_name == "Common" {
            let num_subnet = hyper.get_int("num_subnet")?;
            let num_in = hyper.get_int("num_in")?;
            let num_out = hyper.get_int("num_out")?;
            if num_subnet < 0 || num_subnet > MAX_SUBNETS || num_in < 0 || num_out < 0 {
                return Err(Error::InvalidModel(format!(
                    "implausible Common shape: {} subnets, {} in, {} out",
                    num_subnet, num_in, num_out
                )));
            }
            (NodeKind::Common, num_subnet as usize, num_in as usize, num_out as usize, 0)
        } else {
            let layer = LayerKind::from_hyper(&type_name, &hyper)?;
            let (num_in, num_out, num_params) =
                (layer.num_inputs(), layer.num_outputs(), layer.num_params());
            (NodeKind::Layer(layer), 0, num_in, num_out, num_params)
        };

        let id = nodes.len();
        nodes.push(Node::new(type_name.clone(), kind, hyper, num_in, num_out));

        for i in 0..num_params {
            let param = Blob::from_reader(reader)?;
            let shape = param.shape();
            debug!(
                "{} net blobs[{}]: ({},{},{},{})",
                type_name, i, shape[0], shape[1], shape[2], shape[3]
            );
            nodes[id].params.push(param);
        }

        let mut subnets = Vec::with_capacity(num_subnet);
        for _ in 0..num_subnet {
            let child = Self::load_node(nodes, reader)?;
            subnets.push(child);
        }
        nodes[id].subnets = subnets.clone();

        if num_subnet > 0 {
            // Input wiring: one (net, blob) source per subnet input slot.
            let mut input_wiring = Vec::with_capacity(num_subnet);
            for child in subnets.iter() {
                let child_inputs = nodes[*child].num_inputs();
                let mut pairs = Vec::with_capacity(child_inputs);
                for j in 0..child_inputs {
                    let net_idx = reader.read_i32()?;
                    let blob_idx = reader.read_i32()?;
                    pairs.push((net_idx, blob_idx));

                    let plug = Plug {
                        node: *child,
                        slot: j,
                        port: Port::Input,
                    };
                    if net_idx == -1 {
                        let slot = blob_idx as usize;
                        if blob_idx < 0 || slot >= num_in {
                            return Err(Error::InvalidModel(format!(
                                "input plug source {} out of range",
                                blob_idx
                            )));
                        }
                        nodes[id].input_plugs[slot].push(plug);
                    } else {
                        let src = *subnets.get(net_idx as usize).ok_or_else(|| {
                            Error::InvalidModel(format!("plug source net {} out of range", net_idx))
                        })?;
                        let slot = blob_idx as usize;
                        if blob_idx < 0 || slot >= nodes[src].num_outputs() {
                            return Err(Error::InvalidModel(format!(
                                "plug source blob {} out of range",
                                blob_idx
                            )));
                        }
                        nodes[src].output_plugs[slot].push(plug);
                    }
                }
                input_wiring.push(pairs);
            }
            nodes[id].input_wiring = input_wiring;

            // Output wiring: which subnet output feeds each own output.
            let mut output_wiring = Vec::with_capacity(num_out);
            for i in 0..num_out {
                let net_idx = reader.read_i32()?;
                let blob_idx = reader.read_i32()?;
                output_wiring.push((net_idx, blob_idx));

                let src = *subnets.get(net_idx as usize).ok_or_else(|| {
                    Error::InvalidModel(format!("output source net {} out of range", net_idx))
                })?;
                let slot = blob_idx as usize;
                if blob_idx < 0 || slot >= nodes[src].num_outputs() {
                    return Err(Error::InvalidModel(format!(
                        "output source blob {} out of range",
                        blob_idx
                    )));
                }
                nodes[src].output_plugs[slot].push(Plug {
                    node: id,
                    slot: i,
                    port: Port::Output,
                });
            }
            nodes[id].output_wiring = output_wiring;
        }

        Ok(id)
    }

    /// Serialize in the exact format [`load`] parses.
    pub fn save<W: Write>(&self, writer: &mut BinWriter<W>) -> Result<()> {
        self.save_node(self.root, writer)
    }

    fn save_node<W: Write>(&self, id: usize, writer: &mut BinWriter<W>) -> Result<()> {
        let node = &self.nodes[id];
        writer.write_string(&node.type_name)?;
        node.hyper.save(writer)?;
        for param in &node.params {
            param.write(writer)?;
        }
        for child in &node.subnets {
            self.save_node(*child, writer)?;
        }
        if !node.subnets.is_empty() {
            for pairs in &node.input_wiring {
                for (net_idx, blob_idx) in pairs {
                    writer.write_i32(*net_idx)?;
                    writer.write_i32(*blob_idx)?;
                }
            }
            for (net_idx, blob_idx) in &node.output_wiring {
                writer.write_i32(*net_idx)?;
                writer.write_i32(*blob_idx)?;
            }
        }
        Ok(())
    }

    /// Every subnet output must be claimed by at least one plug.
    fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            for child in &node.subnets {
                let child_node = &self.nodes[*child];
                let unlinked = child_node
                    .output_plugs
                    .iter()
                    .filter(|plugs| plugs.is_empty())
                    .count();
                if unlinked > 0 {
                    return Err(Error::InvalidModel(format!(
                        "{} output blobs unlinked in {} net",
                        unlinked, child_node.type_name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    pub fn num_root_inputs(&self) -> usize {
        self.nodes[self.root].num_inputs()
    }

    /// Place a blob into a root input slot.
    pub fn set_input(&mut self, slot: usize, blob: Blob) -> Result<()> {
        let root = self.root;
        if slot >= self.nodes[root].num_inputs() {
            return Err(Error::InvalidArgument(format!(
                "input slot {} out of range",
                slot
            )));
        }
        self.nodes[root].inputs[slot] = Some(blob);
        Ok(())
    }

    /// Remove and return a root output produced by the last execution.
    pub fn take_output(&mut self, slot: usize) -> Result<Blob> {
        let root = self.root;
        self.nodes[root]
            .outputs
            .get_mut(slot)
            .and_then(|o| o.take())
            .ok_or_else(|| Error::InvalidState("graph output not produced".into()))
    }

    pub fn execute(&mut self) -> Result<()> {
        let root = self.root;
        self.execute_node(root)
    }

    fn execute_node(&mut self, id: usize) -> Result<()> {
        match self.nodes[id].kind.clone() {
            NodeKind::Common => {
                debug!("common net executing");
                // Distribute inputs to the plugged subnet slots.
                for slot in 0..self.nodes[id].num_inputs() {
                    let blob = self.nodes[id].inputs[slot].take().ok_or_else(|| {
                        Error::InvalidState("net input has not been initialized".into())
                    })?;
                    let plugs = self.nodes[id].input_plugs[slot].clone();
                    for plug in plugs {
                        self.place(plug, blob.clone());
                    }
                }

                let subnets = self.nodes[id].subnets.clone();
                for child in subnets {
                    self.execute_node(child)?;
                }

                // Forward own outputs written by subnet plugs.
                for slot in 0..self.nodes[id].num_outputs() {
                    let plugs = self.nodes[id].output_plugs[slot].clone();
                    if plugs.is_empty() {
                        continue;
                    }
                    let blob = self.nodes[id].outputs[slot].take().ok_or_else(|| {
                        Error::InvalidState("net output has not been produced".into())
                    })?;
                    for plug in plugs {
                        self.place(plug, blob.clone());
                    }
                }
                Ok(())
            }
            NodeKind::Layer(layer) => {
                let mut inputs = Vec::with_capacity(self.nodes[id].num_inputs());
                for slot in 0..self.nodes[id].num_inputs() {
                    inputs.push(self.nodes[id].inputs[slot].take().ok_or_else(|| {
                        Error::InvalidState("net input has not been initialized".into())
                    })?);
                }

                let output = layer.execute(&inputs, &self.nodes[id].params)?;

                let plugs = self.nodes[id].output_plugs[0].clone();
                if plugs.is_empty() {
                    self.nodes[id].outputs[0] = Some(output);
                } else {
                    for plug in plugs {
                        self.place(plug, output.clone());
                    }
                }
                Ok(())
            }
        }
    }

    fn place(&mut self, plug: Plug, blob: Blob) {
        match plug.port {
            Port::Input => self.nodes[plug.node].inputs[plug.slot] = Some(blob),
            Port::Output => self.nodes[plug.node].outputs[plug.slot] = Some(blob),
        }
    }

    // Programmatic construction, used for the built-in alignment graph.

    /// Create a graph holding a single `Common` root.
    pub fn with_common_root(num_in: usize, num_out: usize) -> Self {
        let mut hyper = HyperParams::new();
        hyper.insert_int("num_subnet", 0);
        hyper.insert_int("num_in", num_in as i32);
        hyper.insert_int("num_out", num_out as i32);
        let root = Node::new("Common".to_string(), NodeKind::Common, hyper, num_in, num_out);
        Self {
            nodes: vec![root],
            root: 0,
        }
    }

    /// Append a layer subnet to a `Common` node, built from the given
    /// hyper-parameters; returns its arena id.
    pub fn add_subnet(
        &mut self,
        parent: usize,
        type_name: &str,
        hyper: HyperParams,
        params: Vec<Blob>,
    ) -> Result<usize> {
        let layer = LayerKind::from_hyper(type_name, &hyper)?;
        if params.len() != layer.num_params() {
            return Err(Error::InvalidArgument(format!(
                "{} expects {} parameter blobs, got {}",
                type_name,
                layer.num_params(),
                params.len()
            )));
        }
        let (num_in, num_out) = (layer.num_inputs(), layer.num_outputs());
        let id = self.nodes.len();
        let mut node = Node::new(
            type_name.to_string(),
            NodeKind::Layer(layer),
            hyper,
            num_in,
            num_out,
        );
        node.params = params;
        self.nodes.push(node);
        self.nodes[parent].subnets.push(id);
        self.nodes[parent].input_wiring.push(Vec::new());
        let count = self.nodes[parent].subnets.len() as i32;
        self.nodes[parent].hyper.set_int("num_subnet", count);
        Ok(id)
    }

    /// Wire a `Common` node's input slot into one of its subnet inputs.
    pub fn wire_input(&mut self, parent: usize, parent_slot: usize, child: usize, child_slot: usize) {
        self.nodes[parent].input_plugs[parent_slot].push(Plug {
            node: child,
            slot: child_slot,
            port: Port::Input,
        });
        let pos = self.subnet_position(parent, child);
        self.record_input_wiring(parent, pos, child_slot, (-1, parent_slot as i32));
    }

    /// Wire one subnet's output into a sibling subnet's input.
    pub fn wire_across(
        &mut self,
        parent: usize,
        src_child: usize,
        src_slot: usize,
        dst_child: usize,
        dst_slot: usize,
    ) {
        self.nodes[src_child].output_plugs[src_slot].push(Plug {
            node: dst_child,
            slot: dst_slot,
            port: Port::Input,
        });
        let src_pos = self.subnet_position(parent, src_child);
        let dst_pos = self.subnet_position(parent, dst_child);
        self.record_input_wiring(parent, dst_pos, dst_slot, (src_pos as i32, src_slot as i32));
    }

    /// Wire a subnet output to the parent `Common` node's output slot.
    pub fn wire_output(&mut self, parent: usize, parent_slot: usize, child: usize, child_slot: usize) {
        self.nodes[child].output_plugs[child_slot].push(Plug {
            node: parent,
            slot: parent_slot,
            port: Port::Output,
        });
        let pos = self.subnet_position(parent, child);
        let wiring = &mut self.nodes[parent].output_wiring;
        if wiring.len() <= parent_slot {
            wiring.resize(parent_slot + 1, (0, 0));
        }
        wiring[parent_slot] = (pos as i32, child_slot as i32);
    }

    fn subnet_position(&self, parent: usize, child: usize) -> usize {
        self.nodes[parent]
            .subnets
            .iter()
            .position(|c| *c == child)
            .expect("child is not a subnet of parent")
    }

    fn record_input_wiring(
        &mut self,
        parent: usize,
        subnet_pos: usize,
        child_slot: usize,
        pair: (i32, i32),
    ) {
        let wiring = &mut self.nodes[parent].input_wiring[subnet_pos];
        if wiring.len() <= child_slot {
            wiring.resize(child_slot + 1, (0, 0));
        }
        wiring[child_slot] = pair;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::hyper::HyperParams;

    /// Common(1 in, 1 out) containing a single Eltwise SCALE subnet.
    fn scale_graph(factor: f32) -> Graph {
        let mut graph = Graph::with_common_root(1, 1);
        let mut hyper = HyperParams::new();
        hyper.insert_str("eltwise_op", "SCALE");
        hyper.insert_float("scale", factor);
        let scale = graph.add_subnet(0, "Eltwise", hyper, Vec::new()).unwrap();
        graph.wire_input(0, 0, scale, 0);
        graph.wire_output(0, 0, scale, 0);
        graph
    }

    #[test]
    fn executes_a_single_layer_graph() {
        let mut graph = scale_graph(3.0);
        let input = Blob::from_data(1, 1, 1, 4, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        graph.set_input(0, input).unwrap();
        graph.execute().unwrap();
        let out = graph.take_output(0).unwrap();
        assert_eq!(out.data(), &[3.0, 6.0, 9.0, 12.0]);
    }

    #[test]
    fn execute_without_input_is_invalid_state() {
        let mut graph = scale_graph(1.0);
        assert!(matches!(
            graph.execute(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn chained_subnets_pass_blobs_across() {
        // scale(2) -> clamp [0, 5]
        let mut graph = Graph::with_common_root(1, 1);
        let mut h1 = HyperParams::new();
        h1.insert_str("eltwise_op", "SCALE");
        h1.insert_float("scale", 2.0);
        let scale = graph.add_subnet(0, "Eltwise", h1, Vec::new()).unwrap();

        let mut h2 = HyperParams::new();
        h2.insert_str("eltwise_op", "CLOSE");
        h2.insert_float("lower", 0.0);
        h2.insert_float("upper", 5.0);
        let clamp = graph.add_subnet(0, "Eltwise", h2, Vec::new()).unwrap();

        graph.wire_input(0, 0, scale, 0);
        graph.wire_across(0, scale, 0, clamp, 0);
        graph.wire_output(0, 0, clamp, 0);

        let input = Blob::from_data(1, 1, 1, 3, vec![1.0, 3.0, -2.0]).unwrap();
        graph.set_input(0, input).unwrap();
        graph.execute().unwrap();
        let out = graph.take_output(0).unwrap();
        assert_eq!(out.data(), &[2.0, 5.0, 0.0]);
    }

    #[test]
    fn save_load_round_trip_is_byte_identical() {
        // Serialize a built graph, load it, serialize again: the two
        // streams must match byte for byte and execute identically.
        let graph = scale_graph(2.5);

        let mut bytes1 = Vec::new();
        graph.save(&mut BinWriter::new(&mut bytes1)).unwrap();

        let mut loaded = Graph::load(&mut BinReader::new(bytes1.as_slice())).unwrap();
        let mut bytes2 = Vec::new();
        loaded.save(&mut BinWriter::new(&mut bytes2)).unwrap();
        assert_eq!(bytes1, bytes2);

        let input = Blob::from_data(1, 1, 1, 2, vec![2.0, 4.0]).unwrap();
        loaded.set_input(0, input).unwrap();
        loaded.execute().unwrap();
        assert_eq!(loaded.take_output(0).unwrap().data(), &[5.0, 10.0]);
    }

    #[test]
    fn unclaimed_subnet_output_fails_validation() {
        let mut graph = Graph::with_common_root(1, 1);
        let mut hyper = HyperParams::new();
        hyper.insert_str("eltwise_op", "SCALE");
        hyper.insert_float("scale", 1.0);
        let scale = graph.add_subnet(0, "Eltwise", hyper, Vec::new()).unwrap();
        graph.wire_input(0, 0, scale, 0);
        graph.wire_output(0, 0, scale, 0);
        let mut bytes = Vec::new();
        graph.save(&mut BinWriter::new(&mut bytes)).unwrap();
        // Loading this is fine (output 0 is wired); now corrupt the
        // output pair to point at a non-existent subnet.
        let len = bytes.len();
        bytes[len - 8..len - 4].copy_from_slice(&5i32.to_le_bytes());
        assert!(matches!(
            Graph::load(&mut BinReader::new(bytes.as_slice())),
            Err(Error::InvalidModel(_))
        ));
    }
}
