//! Correlates traced instructions with op-graph nodes to build layer entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Engine, InstructionEntry, OpNode, TensorDesc};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    pub engine: Engine,
    pub op: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub start: i64,
    pub end: i64,
    pub cost: i64,
    pub file_line: Value,
    pub info: String,
    #[serde(rename = "isSL")]
    pub is_sl: bool,
}

/// Element type from a declared memory type, first substring match wins.
pub fn element_type(memory_type: &str) -> &'static str {
    const TABLE: [(&str, &str); 7] = [
        ("f32", "FP32"),
        ("f16", "FP16"),
        ("si8", "INT8"),
        ("ui8", "UINT8"),
        ("i16", "INT16"),
        ("bf16", "BF16"),
        ("i32", "INT32"),
    ];
    let lowered = memory_type.to_lowercase();
    TABLE
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map_or("UNKNOWN", |&(_, name)| name)
}

fn tensor_label(t: &TensorDesc) -> String {
    let shape: Vec<String> = t.shape.iter().map(|d| d.to_string()).collect();
    format!("tensor_id=NaN [{}] {}", shape.join("x"), element_type(&t.memory_type))
}

fn tensor_block(title: &str, tensors: &[TensorDesc]) -> String {
    if tensors.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = tensors.iter().map(tensor_label).collect();
    format!("<br>=={title}==<br>{}", lines.join("<br>"))
}

pub fn layer_info(op: &OpNode) -> String {
    let scope = if op.is_local { "local_layer" } else { "global_layer" };
    format!(
        "<br>{scope}{}{}<br>",
        tensor_block("ins", &op.operands),
        tensor_block("outs", &op.results)
    )
}

/// BD ids match only BD entries and GDMA ids only GDMA entries.
fn owned_by(op: &OpNode, entry: &InstructionEntry) -> bool {
    match entry.engine {
        Engine::Bd => entry.bd_id.is_some_and(|id| op.bd_id_range.contains(&id)),
        Engine::Gdma => entry.gdma_id.is_some_and(|id| op.gdma_id_range.contains(&id)),
        Engine::Layer => false,
    }
}

pub fn layer_entry(op: &OpNode, entries: &[InstructionEntry]) -> Option<LayerEntry> {
    let owned: Vec<&InstructionEntry> = entries.iter().filter(|e| owned_by(op, e)).collect();
    let start = owned.iter().map(|e| e.start).min()?;
    let end = owned.iter().map(|e| e.end).max()?;
    let suffix = if op.is_local { "(L)" } else { "(G)" };
    Some(LayerEntry {
        engine: Engine::Layer,
        op: op.name.clone(),
        kind: format!("{}{suffix}", op.name),
        start,
        end,
        cost: end.saturating_sub(start),
        file_line: op.file_line.clone(),
        info: layer_info(op),
        is_sl: op.name == "Load" || op.name == "Store",
    })
}

/// Layer entries for one core, sorted by start. Ops with no traced instruction are skipped.
pub fn correlate_layers(ops: &[OpNode], entries: &[InstructionEntry], core_id: i64) -> Vec<LayerEntry> {
    let mut layers: Vec<LayerEntry> = ops
        .iter()
        .filter(|op| op.core_id == core_id)
        .filter_map(|op| layer_entry(op, entries))
        .collect();
    layers.sort_by_key(|l| l.start);
    tracing::debug!(core_id, layers = layers.len(), "correlated layers");
    layers
}
