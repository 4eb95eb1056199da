//! LMEM allocation grouping and failed-allocation address reconstruction.
//!
//! Consecutive `iteration_result` sections that share a settings fingerprint form one
//! [`AllocationGroup`]. Allocations the compiler reported as failed never received a real
//! address; they are laid out after the highest successful address, in encounter order, so
//! the relocated set is non-overlapping and stable across runs.

use serde::{Deserialize, Serialize};

use crate::{ChipSpec, KvMap, KvValue, extract_pairs};

const REQUIRED_KEYS: [&str; 7] = [
    "op_name",
    "addr",
    "size",
    "timestep_start",
    "timestep_end",
    "status",
    "tag",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocStatus {
    Success,
    Failed,
}

impl AllocStatus {
    fn from_log(value: &KvValue) -> Self {
        match value {
            KvValue::Str(s) if s == "success" => Self::Success,
            _ => Self::Failed,
        }
    }
}

/// Scheduling parameters scoping one allocation group, plus the chip constants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmemSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape_secs: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_bank_conflict: Option<bool>,
    #[serde(flatten)]
    pub chip: ChipSpec,
}

impl LmemSettings {
    /// Chip constants never participate in the comparison.
    pub fn same_fingerprint(&self, other: &Self) -> bool {
        self.shape_secs == other.shape_secs && self.allow_bank_conflict == other.allow_bank_conflict
    }

    /// Stable JSON key used to label per-step statistics.
    pub fn fingerprint_key(&self) -> String {
        serde_json::json!({
            "allow_bank_conflict": self.allow_bank_conflict,
            "shape_secs": self.shape_secs,
        })
        .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub op_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op_type: Option<String>,
    pub addr: i64,
    pub size: i64,
    pub timestep_start: i64,
    pub timestep_end: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lmem_type: Option<String>,
    #[serde(default)]
    pub hold_in_lmem: bool,
    pub status: AllocStatus,
    pub tag: String,
    #[serde(default)]
    pub bank_id: i64,
    #[serde(default)]
    pub max_timestep: i64,
}

impl Allocation {
    pub fn end_addr(&self) -> i64 {
        self.addr.saturating_add(self.size)
    }

    pub fn is_success(&self) -> bool {
        self.status == AllocStatus::Success
    }

    /// Builds an allocation from one section's pairs; `None` when a required key is missing
    /// or a numeric field did not coerce to an integer.
    fn from_pairs(kv: &KvMap) -> Option<Self> {
        let tag = kv.get("tag")?.to_string();
        if tag != "iteration_result" || REQUIRED_KEYS.iter().any(|k| !kv.contains_key(*k)) {
            return None;
        }
        let int = |key: &str| kv.get(key).and_then(KvValue::as_int);
        let text = |key: &str| kv.get(key).map(ToString::to_string);
        Some(Self {
            op_name: text("op_name")?,
            op_type: text("op_type"),
            addr: int("addr")?,
            size: int("size")?,
            timestep_start: int("timestep_start")?,
            timestep_end: int("timestep_end")?,
            lmem_type: text("lmem_type"),
            hold_in_lmem: kv
                .get("hold_in_lmem")
                .and_then(KvValue::as_bool)
                .unwrap_or(false),
            status: AllocStatus::from_log(kv.get("status")?),
            tag,
            bank_id: 0,
            max_timestep: 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationGroup {
    pub settings: LmemSettings,
    pub allocations: Vec<Allocation>,
}

impl AllocationGroup {
    pub fn max_timestep(&self) -> i64 {
        self.allocations
            .iter()
            .map(|a| a.max_timestep)
            .max()
            .unwrap_or(0)
    }
}

/// Output of one LMEM parse pass.
#[derive(Debug, Clone, Default)]
pub struct LmemParse {
    pub groups: Vec<AllocationGroup>,
    /// Highest `timestep_end` over every group; starts at 0 and only grows.
    pub max_timestep: i64,
}

/// Parses one section into its allocation (if valid) and the section's fingerprint.
pub fn parse_lmem_section(section: &str, chip: Option<&ChipSpec>) -> (Option<Allocation>, LmemSettings) {
    let kv = extract_pairs(section);
    let settings = LmemSettings {
        shape_secs: kv.get("shape_secs").and_then(KvValue::as_int_list),
        allow_bank_conflict: kv.get("allow_bank_conflict").and_then(KvValue::as_bool),
        chip: chip.cloned().unwrap_or_default(),
    };
    (Allocation::from_pairs(&kv), settings)
}

/// Groups consecutive valid allocations by fingerprint; invalid sections are dropped.
pub fn group_allocations(sections: &[&str], chip: Option<&ChipSpec>) -> Vec<AllocationGroup> {
    let mut groups: Vec<AllocationGroup> = Vec::new();
    let mut dropped = 0usize;
    for section in sections {
        let (entry, settings) = parse_lmem_section(section, chip);
        let Some(entry) = entry else {
            dropped += 1;
            continue;
        };
        match groups.last_mut() {
            Some(cur) if cur.settings.same_fingerprint(&settings) => cur.allocations.push(entry),
            _ => groups.push(AllocationGroup {
                settings,
                allocations: vec![entry],
            }),
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, "dropped lmem sections missing required keys");
    }
    groups
}

/// Relocates failed allocations past the highest successful end address and annotates
/// every allocation with its bank and the group's max timestep.
pub fn reconstruct_group(group: AllocationGroup, bank_bytes: i64) -> AllocationGroup {
    let AllocationGroup {
        settings,
        allocations,
    } = group;
    let (success, failed): (Vec<Allocation>, Vec<Allocation>) =
        allocations.into_iter().partition(Allocation::is_success);

    let mut cursor = success.iter().map(Allocation::end_addr).max().unwrap_or(0);
    let relocated = failed.into_iter().map(|mut a| {
        a.addr = cursor;
        cursor = cursor.saturating_add(a.size);
        a
    });
    let mut merged: Vec<Allocation> = success.into_iter().chain(relocated).collect();

    let max_ts = merged.iter().map(|a| a.timestep_end).max().unwrap_or(0);
    for a in &mut merged {
        a.bank_id = bank_id(a.addr, bank_bytes);
        a.max_timestep = max_ts;
    }
    AllocationGroup {
        settings,
        allocations: merged,
    }
}

pub fn bank_id(addr: i64, bank_bytes: i64) -> i64 {
    if bank_bytes <= 0 {
        return 0;
    }
    addr.div_euclid(bank_bytes)
}

pub fn parse_lmem(sections: &[&str], chip: Option<&ChipSpec>, bank_bytes: i64) -> LmemParse {
    let mut out = LmemParse::default();
    for group in group_allocations(sections, chip) {
        let group = reconstruct_group(group, bank_bytes);
        out.max_timestep = out.max_timestep.max(group.max_timestep());
        out.groups.push(group);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(op: &str, addr: i64, size: i64, status: AllocStatus) -> Allocation {
        Allocation {
            op_name: op.to_string(),
            op_type: None,
            addr,
            size,
            timestep_start: 0,
            timestep_end: 2,
            lmem_type: None,
            hold_in_lmem: false,
            status,
            tag: "iteration_result".to_string(),
            bank_id: 0,
            max_timestep: 0,
        }
    }

    fn section(op: &str, addr: &str, size: i64, status: &str, shape: &str) -> String {
        format!(
            "; action = lmem_assign; tag = iteration_result; op_name = {op}; addr = {addr}; \
             size = {size}; timestep_start = 0; timestep_end = 3; status = {status}; \
             shape_secs = {shape}; allow_bank_conflict = 0\n"
        )
    }

    #[test]
    fn failed_allocations_are_packed_after_successes() {
        let group = AllocationGroup {
            settings: LmemSettings::default(),
            allocations: vec![
                alloc("f1", 0, 100, AllocStatus::Failed),
                alloc("s1", 0, 64, AllocStatus::Success),
                alloc("f2", 0, 50, AllocStatus::Failed),
                alloc("s2", 128, 32, AllocStatus::Success),
            ],
        };
        let out = reconstruct_group(group, 64);
        let names: Vec<&str> = out.allocations.iter().map(|a| a.op_name.as_str()).collect();
        assert_eq!(names, vec!["s1", "s2", "f1", "f2"]);
        assert_eq!(out.allocations[2].addr, 160);
        assert_eq!(out.allocations[3].addr, 260);

        let relocated: Vec<&Allocation> =
            out.allocations.iter().filter(|a| !a.is_success()).collect();
        for (i, a) in relocated.iter().enumerate() {
            for b in &relocated[i + 1..] {
                assert!(a.end_addr() <= b.addr || b.end_addr() <= a.addr);
            }
        }
        for a in &out.allocations {
            assert_eq!(a.bank_id, a.addr / 64);
            assert_eq!(a.max_timestep, 2);
        }
    }

    #[test]
    fn reconstruction_is_deterministic() {
        let group = AllocationGroup {
            settings: LmemSettings::default(),
            allocations: vec![
                alloc("f1", 7, 10, AllocStatus::Failed),
                alloc("f2", 7, 20, AllocStatus::Failed),
            ],
        };
        let a = reconstruct_group(group.clone(), 16);
        let b = reconstruct_group(group, 16);
        assert_eq!(a, b);
        assert_eq!(a.allocations[0].addr, 0);
        assert_eq!(a.allocations[1].addr, 10);
    }

    #[test]
    fn all_success_group_keeps_addresses() {
        let allocs = vec![
            alloc("a", 0, 16, AllocStatus::Success),
            alloc("b", 32, 16, AllocStatus::Success),
        ];
        let group = AllocationGroup {
            settings: LmemSettings::default(),
            allocations: allocs.clone(),
        };
        let out = reconstruct_group(group, 16);
        let addrs: Vec<(i64, i64)> = out.allocations.iter().map(|a| (a.addr, a.size)).collect();
        assert_eq!(addrs, vec![(0, 16), (32, 16)]);
        assert_eq!(out.allocations[1].bank_id, 2);
    }

    #[test]
    fn fingerprint_change_opens_new_group() {
        let secs = [
            section("a", "0x0", 16, "success", "1,1,1"),
            section("b", "0x10", 16, "success", "1,1,1"),
            section("c", "0x0", 16, "failed", "2,1,1"),
            section("d", "0x0", 16, "success", "1,1,1"),
        ];
        let refs: Vec<&str> = secs.iter().map(String::as_str).collect();
        let groups = group_allocations(&refs, None);
        let sizes: Vec<usize> = groups.iter().map(|g| g.allocations.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
        assert_eq!(groups[1].settings.shape_secs, Some(vec![2, 1, 1]));
    }

    #[test]
    fn sections_missing_required_keys_are_dropped() {
        let secs = [
            "; action = lmem_assign; tag = iteration_result; op_name = x; addr = 0\n".to_string(),
            section("ok", "0", 8, "success", "1"),
            "; action = lmem_assign; tag = iteration_result; op_name = y; addr = oops; size = 1; \
             timestep_start = 0; timestep_end = 0; status = success\n"
                .to_string(),
        ];
        let refs: Vec<&str> = secs.iter().map(String::as_str).collect();
        let parsed = parse_lmem(&refs, None, 16);
        assert_eq!(parsed.groups.len(), 1);
        assert_eq!(parsed.groups[0].allocations[0].op_name, "ok");
        assert_eq!(parsed.max_timestep, 3);
    }

    #[test]
    fn chip_constants_are_merged_but_do_not_split_groups() {
        let chip = ChipSpec {
            lmem_bytes: Some(1 << 18),
            lmem_banks: Some(16),
            lmem_bank_bytes: Some(1 << 14),
        };
        let secs = [section("a", "0x4000", 16, "success", "1,1")];
        let refs: Vec<&str> = secs.iter().map(String::as_str).collect();
        let parsed = parse_lmem(&refs, Some(&chip), 1 << 14);
        let g = &parsed.groups[0];
        assert_eq!(g.settings.chip.lmem_banks, Some(16));
        assert_eq!(g.settings.allow_bank_conflict, Some(false));
        assert_eq!(g.allocations[0].bank_id, 1);
    }
}
