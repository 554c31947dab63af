/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Remote register discovery and access.
//!
//! Built on the standard `uavcan.register.List` and `uavcan.register.Access`
//! services. Next to plain registers, devices may expose special function
//! registers that describe a base register's limits: `name<` is the minimum,
//! `name>` the maximum, and `name=` the default value.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::node::LocalNode;
use crate::transport::{NodeId, Priority};
use crate::types::{AccessRequest, AccessResponse, ListRequest, RegisterAccess, RegisterList, Value};
use crate::{Error, Result};

const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);
const REQUEST_ATTEMPTS: u32 = 3;

/// Register name grammar from the standard: lowercase dotted segments, with
/// an optional special function suffix.
pub fn is_valid_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^([a-z]|_[0-9a-z])(_?[0-9a-z])*(\.(_?[0-9a-z])+)+_?[<=>]?$").unwrap());
    pattern.is_match(name)
}

/// One remote register with its metadata and optional limits.
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub name: String,
    pub value: Value,
    pub mutable: bool,
    pub persistent: bool,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub default: Option<Value>,
}

impl Register {
    fn new(name: String, response: AccessResponse) -> Self {
        Self {
            name,
            value: response.value,
            mutable: response.mutable,
            persistent: response.persistent,
            min: None,
            max: None,
            default: None,
        }
    }

    /// DSDL type expression of the stored value, e.g. `natural16[1]`.
    pub fn dtype(&self) -> String {
        self.value.dtype()
    }
}

/// The register map of one remote node.
pub struct Registry {
    node: LocalNode,
    node_id: NodeId,
    registers: BTreeMap<String, Register>,
}

impl Registry {
    /// Walks the remote register list and reads every register, including
    /// the special function registers carrying limits and defaults.
    pub async fn discover(node: LocalNode, node_id: NodeId) -> Result<Self> {
        let mut registry = Self {
            node,
            node_id,
            registers: BTreeMap::new(),
        };
        registry.refresh().await?;
        Ok(registry)
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Registers ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.values()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Register> {
        self.registers.get(name)
    }

    /// Re-reads the complete register map from the device.
    pub async fn refresh(&mut self) -> Result<()> {
        let names = self.list_names().await?;
        let mut registers = BTreeMap::new();
        let mut specials: Vec<(String, char, Value)> = Vec::new();

        for name in names {
            if !is_valid_name(&name) {
                tracing::warn!(node = %self.node_id, name, "ignoring register with invalid name");
                continue;
            }
            let response = self.access(AccessRequest::read(&name)).await?;
            if response.value.is_empty() {
                tracing::warn!(node = %self.node_id, name, "listed register reads as empty");
                continue;
            }
            match name.chars().last() {
                Some(suffix @ ('<' | '>' | '=')) => {
                    if response.mutable || !response.persistent {
                        tracing::warn!(
                            node = %self.node_id,
                            name,
                            "special function register should be immutable and persistent"
                        );
                    }
                    specials.push((name[..name.len() - 1].to_string(), suffix, response.value));
                }
                _ => {
                    registers.insert(name.clone(), Register::new(name, response));
                }
            }
        }

        for (base, suffix, value) in specials {
            let Some(register) = registers.get_mut(&base) else {
                tracing::warn!(node = %self.node_id, name = base, "limit register without base register");
                continue;
            };
            match suffix {
                '<' => register.min = Some(value),
                '>' => register.max = Some(value),
                _ => register.default = Some(value),
            }
        }

        tracing::debug!(node = %self.node_id, count = registers.len(), "register discovery complete");
        self.registers = registers;
        Ok(())
    }

    /// Reads a single register directly from the device and updates the
    /// local cache.
    pub async fn read(&mut self, name: &str) -> Result<Value> {
        let response = self.access(AccessRequest::read(name)).await?;
        if response.value.is_empty() {
            return Err(Error::NoSuchRegister(name.to_string()));
        }
        if let Some(register) = self.registers.get_mut(name) {
            register.value = response.value.clone();
        }
        Ok(response.value)
    }

    /// Writes a register and verifies the device stored the value.
    ///
    /// The input is coerced to the register's own type first, so e.g. an
    /// integer can be assigned to a `real32` register. The device responds
    /// with the value as stored, which may legitimately differ (saturation,
    /// reduced precision); a mismatch beyond that is an error.
    pub async fn set(&mut self, name: &str, value: &Value) -> Result<Value> {
        let register = self
            .registers
            .get(name)
            .ok_or_else(|| Error::NoSuchRegister(name.to_string()))?;
        if !register.mutable {
            return Err(Error::ImmutableRegister(name.to_string()));
        }
        let coerced = coerce(value, &register.value).ok_or_else(|| {
            Error::IncompatibleValue(format!("cannot assign {} to {} '{name}'", value.dtype(), register.dtype()))
        })?;

        let response = self.access(AccessRequest::write(name, coerced.clone())).await?;
        if response.value.is_empty() {
            return Err(Error::NoSuchRegister(name.to_string()));
        }
        let stored = response.value;
        if let Some(register) = self.registers.get_mut(name) {
            register.value = stored.clone();
        }
        if !approx_eq(&stored, &coerced) {
            return Err(Error::WriteRejected {
                register: name.to_string(),
                requested: coerced,
                stored,
            });
        }
        Ok(stored)
    }

    /// Resets a register to its default value, if the device exposes one.
    pub async fn reset(&mut self, name: &str) -> Result<Value> {
        let default = self
            .registers
            .get(name)
            .ok_or_else(|| Error::NoSuchRegister(name.to_string()))?
            .default
            .clone()
            .ok_or_else(|| Error::NoDefaultValue(name.to_string()))?;
        self.set(name, &default).await
    }

    async fn list_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for index in 0..=u16::MAX {
            let response = match self.call_with_retry::<RegisterList>(&ListRequest { index }).await {
                Ok(response) => response,
                // A node without the register API is treated as having none.
                Err(Error::ServiceTimeout(_, _)) if index == 0 => {
                    tracing::warn!(node = %self.node_id, "node does not answer register list requests");
                    return Ok(names);
                }
                Err(error) => return Err(error),
            };
            if response.name.is_empty() {
                break;
            }
            names.push(response.name);
        }
        Ok(names)
    }

    async fn access(&self, request: AccessRequest) -> Result<AccessResponse> {
        self.call_with_retry::<RegisterAccess>(&request).await
    }

    async fn call_with_retry<S: crate::types::Service>(&self, request: &S::Request) -> Result<S::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .node
                .call::<S>(self.node_id, request, Priority::Nominal, RESPONSE_TIMEOUT)
                .await
            {
                Ok(response) => return Ok(response),
                Err(Error::ServiceTimeout(name, node)) if attempt < REQUEST_ATTEMPTS => {
                    tracing::debug!(service = name, node = %node, attempt, "request timed out, retrying");
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Converts `value` to the variant of `template`, if a lossless-enough
/// conversion exists. Numeric arrays convert element-wise; element counts
/// must match.
pub fn coerce(value: &Value, template: &Value) -> Option<Value> {
    if std::mem::discriminant(value) == std::mem::discriminant(template) {
        return Some(value.clone());
    }
    match (template, value) {
        (Value::String(_), _) => Some(Value::String(value.to_string())),
        (Value::Unstructured(_), Value::String(text)) => Some(Value::Unstructured(text.clone().into_bytes())),
        _ => {
            let floats = as_floats(value)?;
            from_floats(template, &floats)
        }
    }
}

fn as_floats(value: &Value) -> Option<Vec<f64>> {
    let floats = match value {
        Value::Bit(values) => values.iter().map(|&bit| f64::from(u8::from(bit))).collect(),
        Value::Integer64(values) => values.iter().map(|&v| v as f64).collect(),
        Value::Integer32(values) => values.iter().map(|&v| f64::from(v)).collect(),
        Value::Integer16(values) => values.iter().map(|&v| f64::from(v)).collect(),
        Value::Integer8(values) => values.iter().map(|&v| f64::from(v)).collect(),
        Value::Natural64(values) => values.iter().map(|&v| v as f64).collect(),
        Value::Natural32(values) => values.iter().map(|&v| f64::from(v)).collect(),
        Value::Natural16(values) => values.iter().map(|&v| f64::from(v)).collect(),
        Value::Natural8(values) => values.iter().map(|&v| f64::from(v)).collect(),
        Value::Real64(values) => values.clone(),
        Value::Real32(values) => values.iter().map(|&v| f64::from(v)).collect(),
        Value::Real16(values) => values.iter().map(|&v| f64::from(v)).collect(),
        Value::Empty | Value::String(_) | Value::Unstructured(_) => return None,
    };
    Some(floats)
}

fn from_floats(template: &Value, floats: &[f64]) -> Option<Value> {
    if template.len() != floats.len() {
        return None;
    }
    let value = match template {
        Value::Bit(_) => Value::Bit(floats.iter().map(|&v| v != 0.0).collect()),
        Value::Integer64(_) => Value::Integer64(floats.iter().map(|&v| v as i64).collect()),
        Value::Integer32(_) => Value::Integer32(floats.iter().map(|&v| v as i32).collect()),
        Value::Integer16(_) => Value::Integer16(floats.iter().map(|&v| v as i16).collect()),
        Value::Integer8(_) => Value::Integer8(floats.iter().map(|&v| v as i8).collect()),
        Value::Natural64(_) => Value::Natural64(floats.iter().map(|&v| v as u64).collect()),
        Value::Natural32(_) => Value::Natural32(floats.iter().map(|&v| v as u32).collect()),
        Value::Natural16(_) => Value::Natural16(floats.iter().map(|&v| v as u16).collect()),
        Value::Natural8(_) => Value::Natural8(floats.iter().map(|&v| v as u8).collect()),
        Value::Real64(_) => Value::Real64(floats.to_vec()),
        Value::Real32(_) => Value::Real32(floats.iter().map(|&v| v as f32).collect()),
        Value::Real16(_) => Value::Real16(floats.iter().map(|&v| v as f32).collect()),
        Value::Empty | Value::String(_) | Value::Unstructured(_) => return None,
    };
    Some(value)
}

/// Parses a command line value expression against the register's current
/// type: numbers (whitespace or comma separated for arrays), booleans, or a
/// plain string.
pub fn parse_value(raw: &str, template: &Value) -> Result<Value> {
    match template {
        Value::Empty => Err(Error::IncompatibleValue("cannot assign to an empty register".into())),
        Value::String(_) => Ok(Value::String(raw.to_string())),
        Value::Unstructured(_) => Ok(Value::Unstructured(raw.as_bytes().to_vec())),
        _ => {
            let floats: Vec<f64> = raw
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|part| !part.is_empty())
                .map(|part| match part.to_ascii_lowercase().as_str() {
                    "true" => Ok(1.0),
                    "false" => Ok(0.0),
                    other => other
                        .parse::<f64>()
                        .map_err(|_| Error::IncompatibleValue(format!("not a number: '{part}'"))),
                })
                .collect::<Result<_>>()?;
            from_floats(template, &floats).ok_or_else(|| {
                Error::IncompatibleValue(format!(
                    "expected {} elements for {}, got {}",
                    template.len(),
                    template.dtype(),
                    floats.len()
                ))
            })
        }
    }
}

/// Value equality with a tolerance for reduced-precision floats.
pub fn approx_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_floats(a), as_floats(b)) {
        (Some(a), Some(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(&b)
                    .all(|(x, y)| (x - y).abs() <= 1e-3 * x.abs().max(y.abs()).max(1.0))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_register_names() {
        assert!(is_valid_name("uavcan.node.id"));
        assert!(is_valid_name("motor.ctl.gain_p"));
        assert!(is_valid_name("motor.ctl.gain_p<"));
        assert!(is_valid_name("aeric.light._internal"));
        assert!(!is_valid_name("NoCaps.allowed"));
        assert!(!is_valid_name("nodots"));
        assert!(!is_valid_name(".leading.dot"));
        assert!(!is_valid_name("uavcan..node"));
    }

    #[test]
    fn coerces_numbers_between_variants() {
        let coerced = coerce(&Value::Natural64(vec![125]), &Value::Natural16(vec![0])).unwrap();
        assert_eq!(coerced, Value::Natural16(vec![125]));

        let coerced = coerce(&Value::Integer32(vec![1, 0]), &Value::Bit(vec![false, false])).unwrap();
        assert_eq!(coerced, Value::Bit(vec![true, false]));

        let coerced = coerce(&Value::Natural8(vec![3]), &Value::Real32(vec![0.0])).unwrap();
        assert_eq!(coerced, Value::Real32(vec![3.0]));
    }

    #[test]
    fn coercion_rejects_shape_mismatch() {
        assert!(coerce(&Value::Natural8(vec![1, 2]), &Value::Natural8(vec![0])).is_some());
        assert!(coerce(&Value::Integer16(vec![1, 2]), &Value::Real32(vec![0.0])).is_none());
        assert!(coerce(&Value::String("x".into()), &Value::Natural8(vec![0])).is_none());
    }

    #[test]
    fn parses_cli_values() {
        let template = Value::Natural16(vec![0]);
        assert_eq!(parse_value("125", &template).unwrap(), Value::Natural16(vec![125]));

        let template = Value::Real32(vec![0.0, 0.0, 0.0]);
        assert_eq!(
            parse_value("1.5, -2, 0.25", &template).unwrap(),
            Value::Real32(vec![1.5, -2.0, 0.25])
        );

        let template = Value::Bit(vec![false]);
        assert_eq!(parse_value("true", &template).unwrap(), Value::Bit(vec![true]));

        let template = Value::String(String::new());
        assert_eq!(
            parse_value("com.starcopter.aeric", &template).unwrap(),
            Value::String("com.starcopter.aeric".into())
        );

        assert!(parse_value("1 2", &Value::Natural8(vec![0])).is_err());
    }

    #[test]
    fn approximate_float_comparison() {
        assert!(approx_eq(&Value::Real16(vec![0.1]), &Value::Real64(vec![0.1_f32 as f64])));
        assert!(!approx_eq(&Value::Real32(vec![1.0]), &Value::Real32(vec![2.0])));
        assert!(approx_eq(&Value::Natural8(vec![5]), &Value::Integer64(vec![5])));
    }
}
