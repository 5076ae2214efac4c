//! Open, string-keyed runtime attributes attached to nodes and output ports.
//!
//! Passes read well-known keys through the typed accessors at the bottom of this module; any
//! other key is stored and carried untouched.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Marks a node that constant folding must leave alone.
pub const DISABLE_CONSTANT_FOLDING: &str = "disabled_constant_folding_0";

/// Friendly names of the nodes that were merged into a node by rewrites.
pub const FUSED_NAMES: &str = "fused_names_0";

#[derive(Clone)]
pub enum RtValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringList(Vec<String>),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl RtValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RtValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            RtValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RtValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            RtValue::StringList(values) => Some(values),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            RtValue::Opaque(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for RtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtValue::Bool(value) => write!(f, "Bool({value})"),
            RtValue::Int(value) => write!(f, "Int({value})"),
            RtValue::Float(value) => write!(f, "Float({value})"),
            RtValue::String(value) => write!(f, "String({value:?})"),
            RtValue::StringList(values) => write!(f, "StringList({values:?})"),
            RtValue::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RtEntry {
    pub value: RtValue,
    /// Whether generic rt-info copying may carry this entry to another node.
    pub copyable: bool,
}

/// Ordered attribute map attached to a node or an output port.
#[derive(Debug, Clone, Default)]
pub struct RtInfo {
    entries: BTreeMap<String, RtEntry>,
}

impl RtInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&RtValue> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn entry(&self, key: &str) -> Option<&RtEntry> {
        self.entries.get(key)
    }

    /// Inserts a copyable entry.
    pub fn insert(&mut self, key: impl Into<String>, value: RtValue) -> Option<RtValue> {
        self.insert_entry(
            key,
            RtEntry {
                value,
                copyable: true,
            },
        )
    }

    pub fn insert_entry(&mut self, key: impl Into<String>, entry: RtEntry) -> Option<RtValue> {
        self.entries
            .insert(key.into(), entry)
            .map(|previous| previous.value)
    }

    pub fn remove(&mut self, key: &str) -> Option<RtValue> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RtEntry)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.as_str(), entry))
    }

    /// Copies every copyable entry of `other` into `self`, overwriting on conflict.
    pub fn merge_copyable(&mut self, other: &RtInfo) {
        for (key, entry) in other.entries.iter().filter(|(_, entry)| entry.copyable) {
            if key == FUSED_NAMES {
                continue;
            }
            self.entries.insert(key.clone(), entry.clone());
        }
    }
}

/// Sets the constant-folding veto. The entry is not copyable, so rewrites that want the
/// replacement to stay unfolded must call this on the replacement themselves.
pub fn disable_constant_folding(rt_info: &mut RtInfo) {
    rt_info.insert_entry(
        DISABLE_CONSTANT_FOLDING,
        RtEntry {
            value: RtValue::Bool(true),
            copyable: false,
        },
    );
}

pub fn enable_constant_folding(rt_info: &mut RtInfo) {
    rt_info.remove(DISABLE_CONSTANT_FOLDING);
}

pub fn constant_folding_is_disabled(rt_info: &RtInfo) -> bool {
    rt_info.contains(DISABLE_CONSTANT_FOLDING)
}

pub fn fused_names(rt_info: &RtInfo) -> Vec<String> {
    rt_info
        .get(FUSED_NAMES)
        .and_then(RtValue::as_string_list)
        .map(<[String]>::to_vec)
        .unwrap_or_default()
}

/// Adds `names` to the fused-names list, keeping it sorted and free of duplicates.
pub fn add_fused_names<I, S>(rt_info: &mut RtInfo, names: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut merged = fused_names(rt_info);
    merged.extend(names.into_iter().map(Into::into));
    merged.sort();
    merged.dedup();
    rt_info.insert(FUSED_NAMES, RtValue::StringList(merged));
}
