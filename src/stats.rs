//! Per-step LMEM occupancy, bank and fragmentation statistics.
//!
//! Statistics are a pure function of the allocation groups and the schedule's timestep
//! count. [`StatisticsCache`] memoizes them behind a content hash so repeated requests for the
//! same dataset are free and any change in input recomputes.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{Allocation, AllocationGroup, LmemSettings, TpuProfResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankStatistics {
    #[serde(rename = "usedMemory")]
    pub used_memory: i64,
    #[serde(rename = "allocationCount")]
    pub allocation_count: usize,
    #[serde(rename = "averageAllocationSize")]
    pub average_allocation_size: f64,
    #[serde(rename = "largestAllocation")]
    pub largest_allocation: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedStats {
    #[serde(rename = "successfulAllocations")]
    pub successful_allocations: usize,
    #[serde(rename = "failedAllocations")]
    pub failed_allocations: usize,
    #[serde(rename = "successRate")]
    pub success_rate: f64,
    #[serde(rename = "averageAllocationSize")]
    pub average_allocation_size: f64,
    #[serde(rename = "memoryFragmentation")]
    pub memory_fragmentation: f64,
    #[serde(rename = "allocationTypes")]
    pub allocation_types: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatistics {
    pub step: i64,
    #[serde(rename = "settingsKey")]
    pub settings_key: String,
    #[serde(rename = "totalMemory")]
    pub total_memory: i64,
    /// May exceed `total_memory` when allocations overlap; reported as-is.
    #[serde(rename = "usedMemory")]
    pub used_memory: i64,
    #[serde(rename = "freeMemory")]
    pub free_memory: i64,
    #[serde(rename = "memoryUsagePercentage")]
    pub memory_usage_percentage: f64,
    #[serde(rename = "peakMemory")]
    pub peak_memory: i64,
    #[serde(rename = "allocationCount")]
    pub allocation_count: usize,
    #[serde(rename = "activeAllocations")]
    pub active_allocations: usize,
    #[serde(rename = "bankStatistics")]
    pub bank_statistics: BTreeMap<i64, BankStatistics>,
    #[serde(rename = "detailedStats")]
    pub detailed_stats: DetailedStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    #[serde(rename = "totalAllocations")]
    pub total_allocations: usize,
    #[serde(rename = "successfulAllocations")]
    pub successful_allocations: usize,
    #[serde(rename = "failedAllocations")]
    pub failed_allocations: usize,
    #[serde(rename = "successRate")]
    pub success_rate: f64,
    #[serde(rename = "maxMemoryUsage")]
    pub max_memory_usage: i64,
    #[serde(rename = "averageMemoryUsage")]
    pub average_memory_usage: f64,
    #[serde(rename = "peakAllocationCount")]
    pub peak_allocation_count: usize,
    #[serde(rename = "totalMemoryFootprint")]
    pub total_memory_footprint: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStatistics {
    pub settings: LmemSettings,
    #[serde(rename = "stepStatistics")]
    pub step_statistics: Vec<StepStatistics>,
    pub summary: GroupSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSummary {
    #[serde(rename = "totalGroups")]
    pub total_groups: usize,
    #[serde(rename = "maxMemoryUsage")]
    pub max_memory_usage: i64,
    #[serde(rename = "totalAllocations")]
    pub total_allocations: usize,
    /// Plain mean of per-group rates, not weighted by allocation count.
    #[serde(rename = "avgSuccessRate")]
    pub avg_success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatistics {
    pub groups: Vec<GroupStatistics>,
    #[serde(rename = "globalSummary")]
    pub global_summary: Option<GlobalSummary>,
}

/// An allocation is live at `step` when held in LMEM, inside `[start, end]`, or, for a
/// range that wraps (`start > end`), in `[start, timestep_count]` or `[0, end]`.
pub fn is_active(a: &Allocation, step: i64, timestep_count: i64) -> bool {
    if a.hold_in_lmem {
        return true;
    }
    let (start, end) = (a.timestep_start, a.timestep_end);
    if start <= end {
        return start <= step && step <= end;
    }
    (start <= step && step <= timestep_count) || (0 <= step && step <= end)
}

pub fn compute_statistics(groups: &[AllocationGroup], timestep_count: i64) -> MemoryStatistics {
    if groups.is_empty() {
        return MemoryStatistics {
            groups: Vec::new(),
            global_summary: None,
        };
    }
    let group_stats: Vec<GroupStatistics> = groups
        .iter()
        .map(|g| group_statistics(g, timestep_count))
        .collect();
    let global_summary = global_summary(&group_stats);
    MemoryStatistics {
        groups: group_stats,
        global_summary: Some(global_summary),
    }
}

fn group_statistics(group: &AllocationGroup, timestep_count: i64) -> GroupStatistics {
    let settings_key = group.settings.fingerprint_key();
    let step_statistics: Vec<StepStatistics> = (0..=group.max_timestep())
        .map(|step| step_statistics(&group.allocations, step, timestep_count, &settings_key))
        .collect();
    let summary = group_summary(&step_statistics, &group.allocations);
    GroupStatistics {
        settings: group.settings.clone(),
        step_statistics,
        summary,
    }
}

fn step_statistics(
    allocs: &[Allocation],
    step: i64,
    timestep_count: i64,
    settings_key: &str,
) -> StepStatistics {
    let active: Vec<&Allocation> = allocs
        .iter()
        .filter(|a| is_active(a, step, timestep_count))
        .collect();

    let mut by_bank: BTreeMap<i64, Vec<&Allocation>> = BTreeMap::new();
    for a in active.iter().copied() {
        by_bank.entry(a.bank_id).or_default().push(a);
    }
    let bank_statistics = by_bank
        .into_iter()
        .map(|(bank, bank_allocs)| {
            let stats = BankStatistics {
                used_memory: used_memory(&bank_allocs),
                allocation_count: bank_allocs.len(),
                average_allocation_size: average_size(&bank_allocs),
                largest_allocation: bank_allocs.iter().map(|a| a.size).max().unwrap_or(0),
            };
            (bank, stats)
        })
        .collect();

    let total = total_memory(&active);
    let used = used_memory(&active);
    StepStatistics {
        step,
        settings_key: settings_key.to_string(),
        total_memory: total,
        used_memory: used,
        free_memory: total.saturating_sub(used).max(0),
        memory_usage_percentage: percentage(used as f64, total as f64),
        peak_memory: active.iter().map(|a| a.size).max().unwrap_or(0),
        allocation_count: active.len(),
        active_allocations: active.len(),
        bank_statistics,
        detailed_stats: detailed_stats(&active),
    }
}

fn detailed_stats(active: &[&Allocation]) -> DetailedStats {
    let succeeded = active.iter().filter(|a| a.is_success()).count();
    let mut allocation_types = BTreeMap::new();
    for a in active {
        let kind = a.lmem_type.clone().unwrap_or_else(|| "unknown".to_string());
        *allocation_types.entry(kind).or_insert(0) += 1;
    }
    DetailedStats {
        successful_allocations: succeeded,
        failed_allocations: active.len() - succeeded,
        success_rate: percentage(succeeded as f64, active.len() as f64),
        average_allocation_size: average_size(active),
        memory_fragmentation: fragmentation(active),
        allocation_types,
    }
}

fn group_summary(steps: &[StepStatistics], allocs: &[Allocation]) -> GroupSummary {
    let total = allocs.len();
    let succeeded = allocs.iter().filter(|a| a.is_success()).count();
    let all: Vec<&Allocation> = allocs.iter().collect();
    let average_memory_usage = if steps.is_empty() {
        0.0
    } else {
        steps.iter().map(|s| s.used_memory as f64).sum::<f64>() / steps.len() as f64
    };
    GroupSummary {
        total_allocations: total,
        successful_allocations: succeeded,
        failed_allocations: total - succeeded,
        success_rate: percentage(succeeded as f64, total as f64),
        max_memory_usage: steps.iter().map(|s| s.used_memory).max().unwrap_or(0),
        average_memory_usage,
        peak_allocation_count: steps.iter().map(|s| s.allocation_count).max().unwrap_or(0),
        total_memory_footprint: total_memory(&all),
    }
}

fn global_summary(groups: &[GroupStatistics]) -> GlobalSummary {
    let rates: Vec<f64> = groups.iter().map(|g| g.summary.success_rate).collect();
    let avg_success_rate = if rates.is_empty() {
        0.0
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    };
    GlobalSummary {
        total_groups: groups.len(),
        max_memory_usage: groups
            .iter()
            .map(|g| g.summary.max_memory_usage)
            .max()
            .unwrap_or(0),
        total_allocations: groups.iter().map(|g| g.summary.total_allocations).sum(),
        avg_success_rate,
    }
}

/// Sum of positive gaps between address-sorted neighbours, as a percentage of the
/// step's high-water mark.
pub fn fragmentation(active: &[&Allocation]) -> f64 {
    if active.len() < 2 {
        return 0.0;
    }
    let mut sorted = active.to_vec();
    sorted.sort_by_key(|a| a.addr);
    let gap: i64 = sorted
        .windows(2)
        .map(|w| w[1].addr.saturating_sub(w[0].end_addr()).max(0))
        .fold(0i64, i64::saturating_add);
    percentage(gap as f64, total_memory(active) as f64)
}

fn total_memory(allocs: &[&Allocation]) -> i64 {
    allocs.iter().map(|a| a.end_addr()).max().unwrap_or(0)
}

fn used_memory(allocs: &[&Allocation]) -> i64 {
    allocs.iter().map(|a| a.size).fold(0, i64::saturating_add)
}

fn average_size(allocs: &[&Allocation]) -> f64 {
    if allocs.is_empty() {
        return 0.0;
    }
    used_memory(allocs) as f64 / allocs.len() as f64
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole == 0.0 { 0.0 } else { part / whole * 100.0 }
}

/// Memoizes [`compute_statistics`] on a blake3 digest of its inputs.
#[derive(Debug, Default)]
pub struct StatisticsCache {
    entry: Option<(blake3::Hash, MemoryStatistics)>,
}

impl StatisticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &mut self,
        groups: &[AllocationGroup],
        timestep_count: i64,
    ) -> TpuProfResult<&MemoryStatistics> {
        let key = content_key(groups, timestep_count)?;
        let stale = !matches!(&self.entry, Some((cached, _)) if *cached == key);
        if stale {
            self.entry = None;
        }
        let (_, stats) = self.entry.get_or_insert_with(|| {
            tracing::debug!(groups = groups.len(), "computing lmem statistics");
            (key, compute_statistics(groups, timestep_count))
        });
        Ok(&*stats)
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

fn content_key(groups: &[AllocationGroup], timestep_count: i64) -> TpuProfResult<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serde_json::to_vec(groups)?);
    hasher.update(&timestep_count.to_le_bytes());
    Ok(hasher.finalize())
}
