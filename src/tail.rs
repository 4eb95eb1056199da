//! Aggregate counters from the profile tail.

use regex::Regex;
use serde::{Deserialize, Serialize};

use std::sync::LazyLock;

static API_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"API_END total_cycle:(\d+)\|b:(\d+)\|g:(\d+)").expect("API_END pattern")
});
static TCYC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TCYC\s*:\s*(\d+)").expect("TCYC pattern"));
static GDMA_SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"GDMA SUMMARY\s*:.+\|dr\[0\]\s*S2L:(\d+).+\|dr\[1\]\s*L2S:(\d+).+\|dr\[2\]\s*S2S:(\d+).+\|dr\[3\]\s*L2L:(\d+)",
    )
    .expect("GDMA SUMMARY pattern")
});
static DDR_BW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DDR BW USAGE\s*:\s*([\d.]+)%").expect("DDR BW pattern"));
static PERF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"flops:\s*([\d.e+]+),\s*runtime:\s*([\d.]+)ms,\s*ComputationAbility:\s*([\d.]+)T")
        .expect("performance pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdmaBytes {
    #[serde(rename = "S2L")]
    pub s2l: u64,
    #[serde(rename = "L2S")]
    pub l2s: u64,
    #[serde(rename = "S2S")]
    pub s2s: u64,
    #[serde(rename = "L2L")]
    pub l2l: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TailSummary {
    #[serde(rename = "totalCycle", skip_serializing_if = "Option::is_none")]
    pub total_cycle: Option<u64>,
    #[serde(rename = "lastBdId", skip_serializing_if = "Option::is_none")]
    pub last_bd_id: Option<u64>,
    #[serde(rename = "lastGdmaId", skip_serializing_if = "Option::is_none")]
    pub last_gdma_id: Option<u64>,
    #[serde(rename = "tcyc", skip_serializing_if = "Option::is_none")]
    pub tcyc: Option<u64>,
    #[serde(rename = "gdmaBytes", skip_serializing_if = "Option::is_none")]
    pub gdma_bytes: Option<GdmaBytes>,
    #[serde(rename = "ddrBwUsage", skip_serializing_if = "Option::is_none")]
    pub ddr_bw_usage: Option<f64>,
    #[serde(rename = "flops", skip_serializing_if = "Option::is_none")]
    pub flops: Option<u64>,
    #[serde(rename = "runtime_Ms", skip_serializing_if = "Option::is_none")]
    pub runtime_ms: Option<f64>,
    #[serde(rename = "computationAbility_T", skip_serializing_if = "Option::is_none")]
    pub computation_ability_t: Option<f64>,
}

impl TailSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn group<T: std::str::FromStr>(caps: &regex::Captures<'_>, idx: usize) -> Option<T> {
    caps.get(idx)?.as_str().parse().ok()
}

/// Each pattern is searched independently; a pattern that is absent leaves its fields unset.
pub fn extract_tail_summary(text: &str) -> TailSummary {
    let mut out = TailSummary::default();
    if let Some(caps) = API_END_RE.captures(text) {
        out.total_cycle = group(&caps, 1);
        out.last_bd_id = group(&caps, 2);
        out.last_gdma_id = group(&caps, 3);
    }
    if let Some(caps) = TCYC_RE.captures(text) {
        out.tcyc = group(&caps, 1);
    }
    if let Some(caps) = GDMA_SUMMARY_RE.captures(text)
        && let (Some(s2l), Some(l2s), Some(s2s), Some(l2l)) = (
            group(&caps, 1),
            group(&caps, 2),
            group(&caps, 3),
            group(&caps, 4),
        )
    {
        out.gdma_bytes = Some(GdmaBytes { s2l, l2s, s2s, l2l });
    }
    if let Some(caps) = DDR_BW_RE.captures(text) {
        out.ddr_bw_usage = group(&caps, 1);
    }
    if let Some(caps) = PERF_RE.captures(text) {
        out.flops = group::<f64>(&caps, 1).map(|f| f as u64);
        out.runtime_ms = group(&caps, 2);
        out.computation_ability_t = group(&caps, 3);
    }
    out
}
