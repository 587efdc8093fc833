//! String-keyed runtime options.
//!
//! Recognised keys:
//!
//! | key | kind | default |
//! |---|---|---|
//! | `acc.type` | string | `bvh` |
//! | `bvh.force2level` | float (bool) | 0 |
//! | `bvh.forceflat` | float (bool) | 0 |
//! | `bvh.builder` | string | `sah` |
//! | `bvh.sah.num_bins` | float | 64 |
//! | `bvh.sah.traversal_cost` | float | 10 |
//!
//! Unknown keys are stored and ignored.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Text value.
    String(String),
    /// Numeric value; booleans are stored as 0 or 1.
    Float(f32),
}

/// Key of the acceleration structure selector.
pub const ACC_TYPE: &str = "acc.type";
/// Key forcing the two-level strategy.
pub const FORCE_2LEVEL: &str = "bvh.force2level";
/// Key forcing a flat strategy even with instances.
pub const FORCE_FLAT: &str = "bvh.forceflat";
/// Key of the BVH builder selector.
pub const BUILDER: &str = "bvh.builder";
/// Key of the SAH bin count.
pub const SAH_NUM_BINS: &str = "bvh.sah.num_bins";
/// Key of the SAH traversal cost.
pub const SAH_TRAVERSAL_COST: &str = "bvh.sah.traversal_cost";

/// BVH build algorithm for host-built trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderKind {
    /// Binned surface area heuristic.
    Sah,
    /// Median split along the largest axis.
    Median,
}

/// Runtime options.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    values: BTreeMap<String, OptionValue>,
}

impl Default for Options {
    fn default() -> Self {
        let mut values = BTreeMap::new();
        values.insert(ACC_TYPE.to_string(), OptionValue::String("bvh".into()));
        values.insert(FORCE_2LEVEL.to_string(), OptionValue::Float(0.0));
        values.insert(FORCE_FLAT.to_string(), OptionValue::Float(0.0));
        values.insert(BUILDER.to_string(), OptionValue::String("sah".into()));
        values.insert(SAH_NUM_BINS.to_string(), OptionValue::Float(64.0));
        values.insert(SAH_TRAVERSAL_COST.to_string(), OptionValue::Float(10.0));
        Self { values }
    }
}

fn expects_string(name: &str) -> bool {
    matches!(name, ACC_TYPE | BUILDER)
}

fn expects_float(name: &str) -> bool {
    matches!(name, FORCE_2LEVEL | FORCE_FLAT | SAH_NUM_BINS | SAH_TRAVERSAL_COST)
}

impl Options {
    /// Set a string option.
    pub fn set_string(&mut self, name: &str, value: &str) -> Result<()> {
        if expects_float(name) {
            return Err(Error::InvalidOption {
                name: name.into(),
                reason: "expected a number".into(),
            });
        }
        self.values.insert(name.into(), OptionValue::String(value.into()));
        Ok(())
    }

    /// Set a numeric option.
    pub fn set_float(&mut self, name: &str, value: f32) -> Result<()> {
        if expects_string(name) {
            return Err(Error::InvalidOption {
                name: name.into(),
                reason: "expected a string".into(),
            });
        }
        self.values.insert(name.into(), OptionValue::Float(value));
        Ok(())
    }

    /// Raw value of `name`.
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    /// String value of `name`, if set as a string.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(OptionValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Numeric value of `name`, if set as a number.
    pub fn get_float(&self, name: &str) -> Option<f32> {
        match self.values.get(name) {
            Some(OptionValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Selected acceleration structure name.
    pub fn acc_type(&self) -> &str {
        self.get_string(ACC_TYPE).unwrap_or("bvh")
    }

    /// True if the two-level strategy is forced.
    pub fn force_2level(&self) -> bool {
        self.get_float(FORCE_2LEVEL).unwrap_or(0.0) != 0.0
    }

    /// True if a flat strategy is forced.
    pub fn force_flat(&self) -> bool {
        self.get_float(FORCE_FLAT).unwrap_or(0.0) != 0.0
    }

    /// Host BVH builder. Unknown names fall back to SAH.
    pub fn builder(&self) -> BuilderKind {
        match self.get_string(BUILDER) {
            Some("median") => BuilderKind::Median,
            _ => BuilderKind::Sah,
        }
    }

    /// SAH bin count, at least 2.
    pub fn sah_num_bins(&self) -> usize {
        (self.get_float(SAH_NUM_BINS).unwrap_or(64.0) as usize).max(2)
    }

    /// SAH cost of one traversal step relative to one primitive test.
    pub fn sah_traversal_cost(&self) -> f32 {
        self.get_float(SAH_TRAVERSAL_COST).unwrap_or(10.0)
    }

    /// Parse options from a TOML document, applied over the defaults.
    ///
    /// Nested tables are flattened with dots, so `[bvh.sah] num_bins = 32`
    /// and `"bvh.sah.num_bins" = 32` are equivalent. Booleans become 0 or 1.
    pub fn from_toml(text: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(text)?;
        Self::from_table(&table)
    }

    /// Options from an already parsed TOML table, applied over the defaults.
    pub fn from_table(table: &toml::Table) -> Result<Self> {
        let mut options = Self::default();
        options.apply_table("", table)?;
        Ok(options)
    }

    fn apply_table(&mut self, prefix: &str, table: &toml::Table) -> Result<()> {
        for (key, value) in table {
            let name = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match value {
                toml::Value::Table(inner) => self.apply_table(&name, inner)?,
                toml::Value::String(s) => self.set_string(&name, s)?,
                toml::Value::Float(f) => self.set_float(&name, *f as f32)?,
                toml::Value::Integer(i) => self.set_float(&name, *i as f32)?,
                toml::Value::Boolean(b) => self.set_float(&name, *b as u8 as f32)?,
                other => {
                    return Err(Error::InvalidOption {
                        name,
                        reason: format!("unsupported value type {}", other.type_str()),
                    })
                }
            }
        }
        Ok(())
    }
}
