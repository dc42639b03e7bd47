//! Named hyper-parameters attached to each graph node.
//!
//! Stored in insertion order so a loaded graph re-serializes to the same
//! byte stream.

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::reader::{BinReader, BinWriter};

const PARAM_INT: i32 = 1;
const PARAM_FLOAT: i32 = 2;
const PARAM_STRING: i32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum HyperValue {
    Int(i32),
    Float(f32),
    Str(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HyperParams {
    entries: Vec<(String, HyperValue)>,
}

impl HyperParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `name, kind, value` triples until the `"end"` sentinel.
    pub fn load<R: Read>(reader: &mut BinReader<R>) -> Result<Self> {
        let mut params = HyperParams::new();
        loop {
            let name = reader.read_string()?;
            if name == "end" {
                break;
            }
            let kind = reader.read_i32()?;
            let value = match kind {
                PARAM_INT => HyperValue::Int(reader.read_i32()?),
                PARAM_FLOAT => HyperValue::Float(reader.read_f32()?),
                PARAM_STRING => HyperValue::Str(reader.read_string()?),
                other => {
                    return Err(Error::InvalidModel(format!(
                        "unknown hyper-parameter kind {} for \"{}\"",
                        other, name
                    )))
                }
            };
            params.entries.push((name, value));
        }
        Ok(params)
    }

    pub fn save<W: Write>(&self, writer: &mut BinWriter<W>) -> Result<()> {
        for (name, value) in &self.entries {
            writer.write_string(name)?;
            match value {
                HyperValue::Int(v) => {
                    writer.write_i32(PARAM_INT)?;
                    writer.write_i32(*v)?;
                }
                HyperValue::Float(v) => {
                    writer.write_i32(PARAM_FLOAT)?;
                    writer.write_f32(*v)?;
                }
                HyperValue::Str(v) => {
                    writer.write_i32(PARAM_STRING)?;
                    writer.write_string(v)?;
                }
            }
        }
        writer.write_string("end")?;
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    fn get(&self, name: &str) -> Result<&HyperValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::InvalidModel(format!("missing hyper-parameter \"{}\"", name)))
    }

    pub fn get_int(&self, name: &str) -> Result<i32> {
        match self.get(name)? {
            HyperValue::Int(v) => Ok(*v),
            _ => Err(Error::InvalidModel(format!(
                "hyper-parameter \"{}\" is not an int",
                name
            ))),
        }
    }

    pub fn get_float(&self, name: &str) -> Result<f32> {
        match self.get(name)? {
            HyperValue::Float(v) => Ok(*v),
            _ => Err(Error::InvalidModel(format!(
                "hyper-parameter \"{}\" is not a float",
                name
            ))),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<&str> {
        match self.get(name)? {
            HyperValue::Str(v) => Ok(v),
            _ => Err(Error::InvalidModel(format!(
                "hyper-parameter \"{}\" is not a string",
                name
            ))),
        }
    }

    pub fn insert_int(&mut self, name: &str, value: i32) {
        self.entries.push((name.to_string(), HyperValue::Int(value)));
    }

    /// Update an int entry in place, keeping its position; insert at the
    /// end when absent.
    pub fn set_int(&mut self, name: &str, value: i32) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = HyperValue::Int(value);
        } else {
            self.insert_int(name, value);
        }
    }

    pub fn insert_float(&mut self, name: &str, value: f32) {
        self.entries.push((name.to_string(), HyperValue::Float(value)));
    }

    pub fn insert_str(&mut self, name: &str, value: &str) {
        self.entries
            .push((name.to_string(), HyperValue::Str(value.to_string())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_order_and_values() {
        let mut params = HyperParams::new();
        params.insert_int("stride", 2);
        params.insert_float("epsilon", 1e-5);
        params.insert_str("type", "bicubic");

        let mut buf = Vec::new();
        params.save(&mut BinWriter::new(&mut buf)).unwrap();
        let loaded = HyperParams::load(&mut BinReader::new(buf.as_slice())).unwrap();
        assert_eq!(loaded, params);
        assert_eq!(loaded.get_int("stride").unwrap(), 2);
        assert_eq!(loaded.get_float("epsilon").unwrap(), 1e-5);
        assert_eq!(loaded.get_str("type").unwrap(), "bicubic");
    }

    #[test]
    fn missing_and_mistyped_parameters_error() {
        let mut params = HyperParams::new();
        params.insert_int("kernel_size", 3);
        assert!(params.get_int("stride").is_err());
        assert!(params.get_str("kernel_size").is_err());
        assert!(params.has("kernel_size"));
        assert!(!params.has("stride"));
    }
}
