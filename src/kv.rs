//! `; key = value` extraction with per-key type coercion.

use regex::Regex;
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// A value runs from `=` up to the next `;`, newlines included.
static PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r";\s*(\w+)\s*=\s*([^;]+)").expect("key/value pattern"));

const BOOL_KEYS: [&str; 3] = ["hold_in_lmem", "allow_bank_conflict", "one_loop"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KvValue {
    Bool(bool),
    Int(i64),
    IntList(Vec<i64>),
    Str(String),
}

impl KvValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// `shape_secs` with a single section coerces to a plain integer; treat it as a one-element list.
    pub fn as_int_list(&self) -> Option<Vec<i64>> {
        match self {
            Self::IntList(v) => Some(v.clone()),
            Self::Int(v) => Some(vec![*v]),
            _ => None,
        }
    }
}

impl fmt::Display for KvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::IntList(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            Self::Str(v) => f.write_str(v),
        }
    }
}

/// Key → coerced value for one section. Repeated keys keep the last occurrence.
pub type KvMap = BTreeMap<String, KvValue>;

pub fn extract_pairs(section: &str) -> KvMap {
    let mut out = KvMap::new();
    for caps in PAIR_RE.captures_iter(section) {
        let (Some(key), Some(raw)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let key = key.as_str();
        out.insert(key.to_string(), coerce_value(key, raw.as_str()));
    }
    out
}

pub fn coerce_value(key: &str, raw: &str) -> KvValue {
    let val = raw.trim();
    if BOOL_KEYS.contains(&key) {
        return KvValue::Bool(val == "1" || val.eq_ignore_ascii_case("true"));
    }
    if let Some(hex) = val.strip_prefix("0x")
        && let Ok(v) = i64::from_str_radix(hex, 16)
    {
        return KvValue::Int(v);
    }
    if is_plain_int(val)
        && let Ok(v) = val.parse::<i64>()
    {
        return KvValue::Int(v);
    }
    if key == "shape_secs"
        && let Some(list) = parse_int_list(val)
    {
        return KvValue::IntList(list);
    }
    if val.len() >= 2 && val.starts_with('"') && val.ends_with('"') {
        return KvValue::Str(val[1..val.len() - 1].to_string());
    }
    KvValue::Str(val.to_string())
}

fn is_plain_int(val: &str) -> bool {
    let digits = val.strip_prefix('-').unwrap_or(val);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn parse_int_list(val: &str) -> Option<Vec<i64>> {
    val.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| part.trim().parse::<i64>().ok())
        .collect()
}
