//! LMEM inspection commands (`tpuprof lmem ...`).

use clap::Subcommand;
use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{
    Config, GlobalSummary, GroupSummary, LmemParse, StatisticsCache, TpuProfError, TpuProfResult,
    compute_statistics, parse_lmem, segment_log,
};

#[derive(Debug, Subcommand)]
pub enum LmemCommand {
    /// Summarize LMEM usage of one or more compiler logs
    Summary {
        #[arg(value_name = "LOG", required = true)]
        logs: Vec<PathBuf>,
    },
    /// Per-step occupancy of one allocation group
    Steps {
        #[arg(value_name = "LOG")]
        log: PathBuf,
        #[arg(long, default_value_t = 0)]
        group: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmemLogSummary {
    pub log: String,
    #[serde(rename = "maxTimestep")]
    pub max_timestep: i64,
    pub groups: Vec<GroupSummary>,
    #[serde(rename = "globalSummary")]
    pub global_summary: Option<GlobalSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRow {
    pub step: i64,
    #[serde(rename = "usedMemory")]
    pub used_memory: i64,
    #[serde(rename = "totalMemory")]
    pub total_memory: i64,
    #[serde(rename = "memoryUsagePercentage")]
    pub memory_usage_percentage: f64,
    #[serde(rename = "activeAllocations")]
    pub active_allocations: usize,
    #[serde(rename = "banksInUse")]
    pub banks_in_use: usize,
    #[serde(rename = "memoryFragmentation")]
    pub memory_fragmentation: f64,
}

pub fn lmem_command(config: &Config, command: &LmemCommand) -> TpuProfResult<serde_json::Value> {
    match command {
        LmemCommand::Summary { logs } => {
            let mut cache = StatisticsCache::new();
            let mut out = Vec::with_capacity(logs.len());
            for log in logs {
                let parsed = load_lmem(config, log)?;
                let stats = cache.get_or_compute(&parsed.groups, parsed.max_timestep)?;
                out.push(LmemLogSummary {
                    log: log.display().to_string(),
                    max_timestep: parsed.max_timestep,
                    groups: stats.groups.iter().map(|g| g.summary.clone()).collect(),
                    global_summary: stats.global_summary.clone(),
                });
            }
            Ok(serde_json::to_value(out)?)
        }
        LmemCommand::Steps { log, group } => {
            let parsed = load_lmem(config, log)?;
            let stats = compute_statistics(&parsed.groups, parsed.max_timestep);
            let Some(selected) = stats.groups.get(*group) else {
                return Err(TpuProfError::InvalidArgument(format!(
                    "group {group} out of range ({} groups in {})",
                    stats.groups.len(),
                    log.display()
                )));
            };
            let rows: Vec<StepRow> = selected
                .step_statistics
                .iter()
                .map(|s| StepRow {
                    step: s.step,
                    used_memory: s.used_memory,
                    total_memory: s.total_memory,
                    memory_usage_percentage: s.memory_usage_percentage,
                    active_allocations: s.active_allocations,
                    banks_in_use: s.bank_statistics.len(),
                    memory_fragmentation: s.detailed_stats.memory_fragmentation,
                })
                .collect();
            Ok(serde_json::to_value(rows)?)
        }
    }
}

fn load_lmem(config: &Config, log: &Path) -> TpuProfResult<LmemParse> {
    let raw = String::from_utf8_lossy(&std::fs::read(log)?).into_owned();
    let segments = segment_log(&raw);
    let bank_bytes = config.bank_bytes(segments.chip.as_ref());
    Ok(parse_lmem(&segments.lmem_sections, segments.chip.as_ref(), bank_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
; action = lmem_assign; tag = iteration_result; op_name = a; addr = 0; size = 100; timestep_start = 0; timestep_end = 1; status = success; hold_in_lmem = 0
; action = lmem_assign; tag = iteration_result; op_name = b; addr = 200; size = 100; timestep_start = 1; timestep_end = 1; status = success; hold_in_lmem = 0
";

    fn temp_log(body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tpuprof-lmem-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("compile.log");
        std::fs::write(&path, body).expect("write");
        path
    }

    #[test]
    fn summary_covers_each_log() {
        let log = temp_log(LOG);
        let out = lmem_command(
            &Config::default(),
            &LmemCommand::Summary {
                logs: vec![log.clone(), log.clone()],
            },
        )
        .expect("summary");
        let items = out.as_array().expect("array");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["maxTimestep"], 1);
        assert_eq!(items[0]["groups"][0]["totalAllocations"], 2);
        assert_eq!(items[0]["globalSummary"], items[1]["globalSummary"]);
    }

    #[test]
    fn steps_report_fragmentation() {
        let log = temp_log(LOG);
        let out = lmem_command(&Config::default(), &LmemCommand::Steps { log, group: 0 })
            .expect("steps");
        let rows = out.as_array().expect("array");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["usedMemory"], 200);
        assert_eq!(rows[1]["totalMemory"], 300);
        assert_eq!(rows[0]["activeAllocations"], 1);
        assert_eq!(rows[0]["totalMemory"], 100);
        assert_eq!(rows[0]["memoryFragmentation"], 0.0);
        let gap = rows[1]["memoryFragmentation"].as_f64().expect("fragmentation");
        assert!((gap - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn missing_group_is_rejected() {
        let log = temp_log(LOG);
        let err = lmem_command(&Config::default(), &LmemCommand::Steps { log, group: 3 })
            .expect_err("out of range");
        assert!(matches!(err, TpuProfError::InvalidArgument(_)));
    }
}
