//! Timestep-cycle grouping keyed by `shape_secs`.

use serde::{Deserialize, Serialize};

use crate::{KvMap, KvValue, extract_pairs};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestepSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape_secs: Option<Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestepEntry {
    pub timestep: i64,
    pub timestep_type: String,
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tensor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concerning_op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concerning_op_name: Option<String>,
    pub cycle: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape_secs: Option<Vec<i64>>,
    /// Always 0: the log only reports a cycle count per timestep, not its start.
    #[serde(rename = "_cycStart")]
    pub cyc_start: i64,
    #[serde(rename = "_cycEnd")]
    pub cyc_end: i64,
}

impl TimestepEntry {
    fn from_pairs(kv: &KvMap) -> Option<Self> {
        let text = |key: &str| kv.get(key).map(ToString::to_string);
        let timestep = kv.get("timestep").and_then(KvValue::as_int)?;
        let cycle = kv.get("cycle").and_then(KvValue::as_int)?;
        Some(Self {
            timestep,
            timestep_type: text("timestep_type")?,
            op: text("op")?,
            tensor_name: text("tensor_name"),
            concerning_op: text("concerning_op"),
            concerning_op_name: text("concerning_op_name"),
            cycle,
            shape_secs: kv.get("shape_secs").and_then(KvValue::as_int_list),
            cyc_start: 0,
            cyc_end: cycle,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestepGroup {
    pub settings: TimestepSettings,
    pub entries: Vec<TimestepEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct TimestepParse {
    pub groups: Vec<TimestepGroup>,
    /// Highest timestep seen on a valid entry; independent of the LMEM tracker.
    pub max_timestep: i64,
}

pub fn parse_timesteps(sections: &[&str]) -> TimestepParse {
    let mut out = TimestepParse::default();
    for section in sections {
        let kv = extract_pairs(section);
        let Some(entry) = TimestepEntry::from_pairs(&kv) else {
            tracing::debug!("dropped timestep section missing required keys");
            continue;
        };
        let settings = TimestepSettings {
            shape_secs: kv.get("shape_secs").and_then(KvValue::as_int_list),
        };
        out.max_timestep = out.max_timestep.max(entry.timestep);
        match out.groups.last_mut() {
            Some(cur) if cur.settings == settings => cur.entries.push(entry),
            _ => out.groups.push(TimestepGroup {
                settings,
                entries: vec![entry],
            }),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(ts: i64, cycle: i64, shape: &str) -> String {
        format!(
            "; action = timestep_cycle; step = timestep_cycle; tag = result; timestep = {ts}; \
             timestep_type = layer; op = conv{ts}; tensor_name = \"t{ts}\"; cycle = {cycle}; \
             shape_secs = {shape}\n"
        )
    }

    #[test]
    fn groups_by_shape_and_keeps_zero_based_window() {
        let secs = [section(0, 100, "1,1"), section(1, 250, "1,1"), section(0, 40, "2,1")];
        let refs: Vec<&str> = secs.iter().map(String::as_str).collect();
        let parsed = parse_timesteps(&refs);
        assert_eq!(parsed.groups.len(), 2);
        assert_eq!(parsed.max_timestep, 1);
        let e = &parsed.groups[0].entries[1];
        assert_eq!((e.cyc_start, e.cyc_end), (0, 250));
        assert_eq!(e.tensor_name.as_deref(), Some("t1"));
        assert_eq!(e.op, "conv1");
    }

    #[test]
    fn entry_without_cycle_is_dropped() {
        let secs = ["; action = timestep_cycle; timestep = 9; timestep_type = x; op = y\n"];
        let parsed = parse_timesteps(&secs);
        assert!(parsed.groups.is_empty());
        assert_eq!(parsed.max_timestep, 0);
    }

    #[test]
    fn window_serializes_with_underscore_keys() {
        let secs = [section(3, 7, "1")];
        let refs: Vec<&str> = secs.iter().map(String::as_str).collect();
        let parsed = parse_timesteps(&refs);
        let v = serde_json::to_value(&parsed.groups[0].entries[0]).expect("json");
        assert_eq!(v["_cycStart"], 0);
        assert_eq!(v["_cycEnd"], 7);
    }
}
