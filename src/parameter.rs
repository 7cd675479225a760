//! Typed filter parameters.
//!
//! A parameter holds one value of a declared type and can always be read and
//! written as text, which is how configuration files talk to it. Writes bump
//! a version counter on the owning set; decoders compare the counter at
//! refresh entry instead of receiving change callbacks.

use std::collections::BTreeMap;

/// Declared type of a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    Int,
    Float,
    Str,
    Filename,
    Enum,
}

/// One typed parameter value.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    ptype: ParamType,
    int_val: i64,
    float_val: f64,
    string_val: String,
    forward: BTreeMap<String, i64>,
    reverse: BTreeMap<i64, String>,
}

impl Parameter {
    pub fn new(ptype: ParamType) -> Self {
        Self {
            ptype,
            int_val: 0,
            float_val: 0.0,
            string_val: String::new(),
            forward: BTreeMap::new(),
            reverse: BTreeMap::new(),
        }
    }

    pub fn param_type(&self) -> ParamType {
        self.ptype
    }

    /// Add a name for an integer value of an enum parameter.
    pub fn add_enum_value(&mut self, name: &str, value: i64) {
        self.forward.insert(name.to_string(), value);
        self.reverse.insert(value, name.to_string());
    }

    /// Enumerate the declared names of an enum parameter, in name order.
    pub fn enum_values(&self) -> impl Iterator<Item = &str> {
        self.forward.keys().map(String::as_str)
    }

    #[inline]
    pub fn int_value(&self) -> i64 {
        self.int_val
    }

    #[inline]
    pub fn float_value(&self) -> f64 {
        self.float_val
    }

    #[inline]
    pub fn bool_value(&self) -> bool {
        self.int_val != 0
    }

    pub fn string_value(&self) -> &str {
        &self.string_val
    }

    pub fn set_bool(&mut self, b: bool) {
        self.int_val = b as i64;
        self.float_val = self.int_val as f64;
        self.string_val = if b { "1" } else { "0" }.to_string();
    }

    pub fn set_int(&mut self, i: i64) {
        self.int_val = i;
        self.float_val = i as f64;
        self.string_val = match self.reverse.get(&i) {
            Some(name) => name.clone(),
            None => String::new(),
        };
    }

    pub fn set_float(&mut self, f: f64) {
        self.int_val = f as i64;
        self.float_val = f;
        self.string_val = String::new();
    }

    pub fn set_string(&mut self, s: &str) {
        self.int_val = 0;
        self.float_val = 0.0;
        self.string_val = s.to_string();
    }

    /// Set the value from its textual representation, converting according
    /// to the declared type. Unknown enum names select value 0.
    pub fn parse_string(&mut self, s: &str) {
        match self.ptype {
            ParamType::Bool => {
                self.int_val = ((s == "1") || (s == "true")) as i64;
                self.float_val = self.int_val as f64;
                self.string_val = String::new();
            }
            // Parse both int and float as float so that e.g. "1.5e6" works
            // for integer parameters.
            ParamType::Int | ParamType::Float => {
                self.float_val = s.parse::<f64>().unwrap_or(0.0);
                self.int_val = self.float_val as i64;
                self.string_val = String::new();
            }
            ParamType::Str | ParamType::Filename => {
                self.int_val = 0;
                self.float_val = 0.0;
                self.string_val = s.to_string();
            }
            ParamType::Enum => {
                self.int_val = self.forward.get(s).copied().unwrap_or(0);
                self.float_val = 0.0;
                self.string_val = s.to_string();
            }
        }
    }

    /// Textual representation of the current value.
    pub fn to_text(&self) -> String {
        match self.ptype {
            ParamType::Float => format!("{}", self.float_val),
            ParamType::Bool | ParamType::Int => format!("{}", self.int_val),
            ParamType::Str | ParamType::Filename => self.string_val.clone(),
            ParamType::Enum => self
                .reverse
                .get(&self.int_val)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// Ordered collection of named parameters with a change-version counter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamSet {
    params: Vec<(String, Parameter)>,
    version: u64,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter. Returns a handle for configuring enum values.
    pub fn declare(&mut self, name: &str, ptype: ParamType) -> &mut Parameter {
        self.params.push((name.to_string(), Parameter::new(ptype)));
        &mut self.params.last_mut().unwrap().1
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    /// Mutable access without a version bump; for enum map setup only.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
    }

    /// Iterate parameters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.params.iter().map(|(n, p)| (n.as_str(), p))
    }

    /// Number of writes this set has seen. Compare across refreshes to
    /// detect parameter changes.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_bool(&mut self, name: &str, b: bool) {
        self.version += 1;
        if let Some(p) = self.get_mut_internal(name) {
            p.set_bool(b);
        }
    }

    pub fn set_int(&mut self, name: &str, i: i64) {
        self.version += 1;
        if let Some(p) = self.get_mut_internal(name) {
            p.set_int(i);
        }
    }

    pub fn set_float(&mut self, name: &str, f: f64) {
        self.version += 1;
        if let Some(p) = self.get_mut_internal(name) {
            p.set_float(f);
        }
    }

    pub fn set_string(&mut self, name: &str, s: &str) {
        self.version += 1;
        if let Some(p) = self.get_mut_internal(name) {
            p.set_string(s);
        }
    }

    /// Set a parameter from text, converting per its declared type.
    pub fn parse(&mut self, name: &str, text: &str) {
        self.version += 1;
        if let Some(p) = self.get_mut_internal(name) {
            p.parse_string(text);
        }
    }

    /// Convenience accessors with defaults for missing parameters.
    pub fn int_value(&self, name: &str) -> i64 {
        self.get(name).map_or(0, Parameter::int_value)
    }

    pub fn float_value(&self, name: &str) -> f64 {
        self.get(name).map_or(0.0, Parameter::float_value)
    }

    pub fn bool_value(&self, name: &str) -> bool {
        self.get(name).is_some_and(Parameter::bool_value)
    }

    fn get_mut_internal(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
    }
}
