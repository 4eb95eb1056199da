//! Splits a raw compiler log into compute sections and the profile tail.

use regex::Regex;
use serde::{Deserialize, Serialize};

use std::collections::HashSet;
use std::sync::LazyLock;

use crate::{KvValue, extract_pairs};

/// A dash rule of 20+ characters followed by a line mentioning `start time`.
static PROFILE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^-{20,}\s*\n.*start time.*$").expect("profile marker pattern")
});

static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"; action = \w+").expect("action pattern"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lmem_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lmem_banks: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lmem_bank_bytes: Option<i64>,
}

impl ChipSpec {
    fn is_empty(&self) -> bool {
        self.lmem_bytes.is_none() && self.lmem_banks.is_none() && self.lmem_bank_bytes.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogSegments<'a> {
    pub lmem_sections: Vec<&'a str>,
    pub timestep_sections: Vec<&'a str>,
    pub profile_text: &'a str,
    pub chip: Option<ChipSpec>,
}

/// Returns `(compute_text, profile_text)`; without a marker everything is compute text.
pub fn split_profile_region(raw_log: &str) -> (&str, &str) {
    match PROFILE_MARKER_RE.find(raw_log) {
        Some(m) => raw_log.split_at(m.start()),
        None => (raw_log, ""),
    }
}

/// Cuts before every `; action = <word>` so each section starts with its own action token.
pub fn split_sections(compute_text: &str) -> Vec<&str> {
    let mut bounds: Vec<usize> = ACTION_RE.find_iter(compute_text).map(|m| m.start()).collect();
    if bounds.first() != Some(&0) {
        bounds.insert(0, 0);
    }
    bounds.push(compute_text.len());
    bounds
        .windows(2)
        .map(|w| &compute_text[w[0]..w[1]])
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn segment_log(raw_log: &str) -> LogSegments<'_> {
    let (compute_text, profile_text) = split_profile_region(raw_log);
    let sections = split_sections(compute_text);

    let lmem_sections: Vec<&str> = sections
        .iter()
        .copied()
        .filter(|s| s.contains("; action = lmem_assign") && s.contains("; tag = iteration_result"))
        .collect();

    let mut timestep_sections = Vec::new();
    if let Some(start) = sections
        .iter()
        .position(|s| s.contains("; action = timestep_cycle; debug_range = given;"))
    {
        let mut seen = HashSet::new();
        for s in &sections[start..] {
            if s.contains("; action = timestep_cycle;")
                && s.contains("; step = timestep_cycle;")
                && s.contains("; tag = result;")
                && seen.insert(*s)
            {
                timestep_sections.push(*s);
            }
        }
    }

    let chip = sections
        .iter()
        .find(|s| s.contains("; action = lmem_assign") && s.contains("; step = lmem_spec"))
        .map(|s| chip_from_section(s))
        .filter(|c| !c.is_empty());

    tracing::debug!(
        sections = sections.len(),
        lmem = lmem_sections.len(),
        timestep = timestep_sections.len(),
        profile_bytes = profile_text.len(),
        "segmented log"
    );

    LogSegments {
        lmem_sections,
        timestep_sections,
        profile_text,
        chip,
    }
}

fn chip_from_section(section: &str) -> ChipSpec {
    let kv = extract_pairs(section);
    let int = |key: &str| kv.get(key).and_then(KvValue::as_int);
    ChipSpec {
        lmem_bytes: int("lmem_bytes"),
        lmem_banks: int("lmem_banks"),
        lmem_bank_bytes: int("lmem_bank_bytes"),
    }
}
