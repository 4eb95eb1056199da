//! The per-invocation result record and the pipelines that fill it.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::path::Path;

use crate::{
    AllocationGroup, ChipSpec, Config, InstructionEntry, LayerEntry, MemoryStatistics, OpNode,
    TailSummary, TimestepGroup, TpuProfResult, compute_statistics, correlate_layers,
    extract_tail_summary, find_inputs, load_op_graph, parse_lmem, parse_timesteps, parse_trace,
    segment_log,
};

/// One row of a core's timeline: a traced instruction or a correlated layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileEntry {
    Layer(LayerEntry),
    Instruction(InstructionEntry),
}

impl ProfileEntry {
    pub fn start(&self) -> i64 {
        match self {
            Self::Layer(l) => l.start,
            Self::Instruction(i) => i.start,
        }
    }

    pub fn end(&self) -> i64 {
        match self {
            Self::Layer(l) => l.end,
            Self::Instruction(i) => i.end,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreProfile {
    pub settings: TailSummary,
    pub entries: Vec<ProfileEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    pub lmem: bool,
    pub summary: bool,
    pub timestep: bool,
    pub profile: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub lmem: Option<Vec<AllocationGroup>>,
    pub timestep: Option<Vec<TimestepGroup>>,
    pub summary: Option<MemoryStatistics>,
    pub profile: Vec<CoreProfile>,
    pub chip: Option<ChipSpec>,
    pub valid: Validity,
    pub success: bool,
}

impl ParseResult {
    /// The record produced when there is nothing to parse.
    pub fn empty() -> Self {
        Self {
            lmem: None,
            timestep: None,
            summary: None,
            profile: Vec::new(),
            chip: None,
            valid: Validity::default(),
            success: true,
        }
    }
}

/// Instruction trace, layer correlation and tail summary for one core's profile text.
pub fn parse_profile(text: &str, ops: &[OpNode], core_id: i64) -> CoreProfile {
    let instructions = parse_trace(text);
    let layers = correlate_layers(ops, &instructions, core_id);
    let mut entries: Vec<ProfileEntry> = instructions
        .into_iter()
        .map(ProfileEntry::Instruction)
        .chain(layers.into_iter().map(ProfileEntry::Layer))
        .collect();
    entries.sort_by_key(ProfileEntry::start);
    CoreProfile {
        settings: extract_tail_summary(text),
        entries,
    }
}

/// Parses one compiler log. An embedded profile region is traced as core 0 without an op graph.
pub fn parse_log(raw_log: &str, config: &Config) -> ParseResult {
    let segments = segment_log(raw_log);
    let mut result = ParseResult::empty();
    result.chip = segments.chip.clone();

    if !segments.lmem_sections.is_empty() {
        let bank_bytes = config.bank_bytes(segments.chip.as_ref());
        let lmem = parse_lmem(&segments.lmem_sections, segments.chip.as_ref(), bank_bytes);
        result.valid.lmem = true;
        if !lmem.groups.is_empty() {
            result.summary = Some(compute_statistics(&lmem.groups, lmem.max_timestep));
            result.valid.summary = true;
        }
        tracing::debug!(
            groups = lmem.groups.len(),
            max_timestep = lmem.max_timestep,
            "parsed lmem sections"
        );
        result.lmem = Some(lmem.groups);
    }

    if !segments.timestep_sections.is_empty() {
        let timesteps = parse_timesteps(&segments.timestep_sections);
        result.valid.timestep = true;
        result.timestep = Some(timesteps.groups);
    }

    if !segments.profile_text.is_empty() {
        result.profile = vec![parse_profile(segments.profile_text, &[], 0)];
        result.valid.profile = true;
    }
    result
}

/// Parses a run folder: main log, op graph and every `compiler_profile_<n>`.
///
/// The profile array is indexed by core id with empty placeholders for gaps and for
/// profile files that could not be read.
pub fn assemble_run(folder: &Path, config: &Config) -> TpuProfResult<ParseResult> {
    let inputs = find_inputs(folder, config)?;

    let ops = match &inputs.op_graph {
        Some(path) => load_op_graph(path, config.id_range).unwrap_or_else(|err| {
            tracing::warn!("ignoring op graph {}: {err}", path.display());
            Vec::new()
        }),
        None => Vec::new(),
    };

    let mut cores: BTreeMap<i64, CoreProfile> = BTreeMap::new();
    for (core_id, path) in &inputs.profiles {
        let profile = match std::fs::read_to_string(path) {
            Ok(text) => parse_profile(&text, &ops, *core_id),
            Err(err) => {
                tracing::warn!("failed to read profile {}: {err}", path.display());
                CoreProfile::default()
            }
        };
        cores.insert(*core_id, profile);
    }

    let mut result = match &inputs.main_log {
        Some((path, text)) => {
            tracing::info!("main log {}", path.display());
            parse_log(text, config)
        }
        None => ParseResult::empty(),
    };

    let core_count = cores.keys().next_back().map_or(0, |max| max + 1);
    result.profile = (0..core_count)
        .map(|core| cores.remove(&core).unwrap_or_default())
        .collect();
    result.valid.profile = result.profile.iter().any(|p| !p.entries.is_empty());
    Ok(result)
}

pub fn write_result_json(result: &ParseResult, out_dir: &Path) -> TpuProfResult<std::path::PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join("result.json");
    std::fs::write(&path, serde_json::to_vec_pretty(result)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Engine, IdRangeConvention};

    use std::path::PathBuf;

    const TRACE: &str = "\
-----------------------------------------
ENGINE_BD  ENGINE_GDMA
OpA|BD|s:10|b:1|g:0|e:20|t:10   OpB|GDMA|s:12|b:0|g:1|e:22|t:10|dr:0|sz:1024|bw:12.5
OpC|BD|s:2|b:2|g:0|e:5|t:3
API_END total_cycle:500|b:12|g:8
";

    const LOG: &str = "\
; action = lmem_assign; step = lmem_spec; lmem_bytes = 262144; lmem_banks = 16; lmem_bank_bytes = 16384
; action = lmem_assign; tag = iteration_result; op_name = a; addr = 0; size = 100; timestep_start = 0; timestep_end = 1; status = success; hold_in_lmem = 0
; action = lmem_assign; tag = iteration_result; op_name = b; addr = 0; size = 50; timestep_start = 0; timestep_end = 1; status = failed; hold_in_lmem = 0
; action = timestep_cycle; debug_range = given;
; action = timestep_cycle; step = timestep_cycle; tag = result; timestep = 0; timestep_type = gdma; op = load; cycle = 40
";

    fn temp_workspace(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tpuprof-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    fn layer_op() -> OpNode {
        OpNode {
            file_line: serde_json::json!(3),
            core_id: 0,
            name: "Conv2D".to_string(),
            bd_id_range: 1..2,
            gdma_id_range: 0..0,
            operands: Vec::new(),
            results: Vec::new(),
            is_local: false,
        }
    }

    #[test]
    fn profile_entries_are_time_sorted_with_layers_merged() {
        let profile = parse_profile(TRACE, &[layer_op()], 0);
        let starts: Vec<i64> = profile.entries.iter().map(ProfileEntry::start).collect();
        assert_eq!(starts, vec![2, 10, 10, 12]);
        assert!(matches!(&profile.entries[1], ProfileEntry::Instruction(i) if i.engine == Engine::Bd));
        assert!(matches!(&profile.entries[2], ProfileEntry::Layer(l) if l.end == 20));
        assert_eq!(profile.settings.total_cycle, Some(500));
    }

    #[test]
    fn layer_entries_serialize_with_display_fields() {
        let profile = parse_profile(TRACE, &[layer_op()], 0);
        let json = serde_json::to_value(&profile.entries[2]).expect("json");
        assert_eq!(json["engine"], "LAYER");
        assert_eq!(json["type"], "Conv2D(G)");
        assert_eq!(json["isSL"], false);
    }

    #[test]
    fn log_fills_every_section() {
        let result = parse_log(LOG, &Config::default());
        assert!(result.valid.lmem && result.valid.summary && result.valid.timestep);
        assert!(!result.valid.profile);
        assert!(result.success);
        let groups = result.lmem.expect("lmem");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].allocations[1].addr, 100);
        assert_eq!(result.chip.and_then(|c| c.lmem_bank_bytes), Some(16384));
        assert_eq!(result.timestep.expect("timestep")[0].entries.len(), 1);
        assert_eq!(result.summary.expect("summary").groups.len(), 1);
    }

    #[test]
    fn huge_logged_sizes_do_not_abort_the_log() {
        let log = "\
; action = lmem_assign; tag = iteration_result; op_name = a; addr = 0; size = 0x7fffffffffffffff; timestep_start = 0; timestep_end = 0; status = success
; action = lmem_assign; tag = iteration_result; op_name = b; addr = 0; size = 0x7fffffffffffffff; timestep_start = 0; timestep_end = 0; status = success
";
        let result = parse_log(log, &Config::default());
        let summary = result.summary.expect("summary");
        let step = &summary.groups[0].step_statistics[0];
        assert_eq!(step.used_memory, i64::MAX);
        assert_eq!(step.free_memory, 0);
    }

    #[test]
    fn empty_log_is_a_successful_empty_record() {
        let result = parse_log("", &Config::default());
        assert_eq!(result, ParseResult::empty());
        let json = serde_json::to_value(&result).expect("json");
        assert!(json["lmem"].is_null());
        assert_eq!(json["valid"]["profile"], false);
    }

    #[test]
    fn run_folder_fills_profile_gaps() {
        let dir = temp_workspace("run");
        std::fs::write(dir.join("compile.log"), LOG).expect("log");
        std::fs::write(dir.join("notes.log"), "unrelated").expect("notes");
        std::fs::write(
            dir.join("net.bmodel.json"),
            r#"[{"opcode": "tpu.Conv2D", "file-line": 3, "core_id": 2,
                "tiu_dma_id(before)": [0, 0], "tiu_dma_id(after)": [1, 0]}]"#,
        )
        .expect("graph");
        std::fs::write(dir.join("compiler_profile_2"), TRACE).expect("profile");

        let config = Config {
            id_range: IdRangeConvention::Offset,
            ..Config::default()
        };
        let result = assemble_run(&dir, &config).expect("run");
        assert_eq!(result.profile.len(), 3);
        assert!(result.profile[0].entries.is_empty());
        assert!(result.profile[1].settings.is_empty());
        assert_eq!(result.profile[2].entries.len(), 4);
        assert!(result.valid.profile);
        assert!(result.valid.lmem);

        let out = write_result_json(&result, &dir.join("out")).expect("write");
        let back: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out).expect("read")).expect("json");
        assert_eq!(back["profile"].as_array().map(Vec::len), Some(3));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn folder_without_log_yields_skeleton() {
        let dir = temp_workspace("empty");
        let result = assemble_run(&dir, &Config::default()).expect("run");
        assert_eq!(result, ParseResult::empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
