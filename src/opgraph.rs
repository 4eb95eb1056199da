//! Operation-graph (`*.bmodel.json`) loading.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::ops::Range;
use std::path::Path;

use crate::{IdRangeConvention, TpuProfError, TpuProfResult};

pub const OPCODE_PREFIX: &str = "tpu.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDesc {
    #[serde(default)]
    pub shape: Vec<i64>,
    #[serde(default)]
    pub memory_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpNode {
    pub file_line: Value,
    pub core_id: i64,
    pub name: String,
    pub bd_id_range: Range<i64>,
    pub gdma_id_range: Range<i64>,
    pub operands: Vec<TensorDesc>,
    pub results: Vec<TensorDesc>,
    pub is_local: bool,
}

#[derive(Debug, Deserialize)]
struct RawOpNode {
    opcode: String,
    #[serde(rename = "file-line", default = "unknown_file_line")]
    file_line: Value,
    #[serde(default = "unassigned_core")]
    core_id: i64,
    #[serde(rename = "tiu_dma_id(before)", default)]
    before: Value,
    #[serde(rename = "tiu_dma_id(after)", default)]
    after: Value,
    #[serde(default)]
    operands: Vec<TensorDesc>,
    #[serde(default)]
    results: Vec<TensorDesc>,
    #[serde(default)]
    is_local: bool,
}

fn unknown_file_line() -> Value {
    Value::String("N/A".to_string())
}

fn unassigned_core() -> i64 {
    -1
}

/// Reads a `[bd, gdma]` counter pair. Absent or short pairs default to `[0, 0]`;
/// non-integer elements make the node unusable.
fn id_pair(value: &Value) -> Result<[i64; 2], String> {
    match value {
        Value::Array(items) if items.len() >= 2 => {
            let bd = items[0].as_i64();
            let gdma = items[1].as_i64();
            match (bd, gdma) {
                (Some(bd), Some(gdma)) => Ok([bd, gdma]),
                _ => Err(format!("non-integer id pair {value}")),
            }
        }
        _ => Ok([0, 0]),
    }
}

/// Strips a UTF-8 BOM and a trailing comma before the closing bracket.
pub fn heal_json_array(text: &str) -> String {
    let text = text.trim_start_matches('\u{feff}').trim();
    if let Some(body) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let body = body.trim_end();
        if let Some(body) = body.strip_suffix(',') {
            return format!("[{body}]");
        }
    }
    text.to_string()
}

fn op_node(raw: RawOpNode, convention: IdRangeConvention) -> Result<OpNode, String> {
    let before = id_pair(&raw.before)?;
    let after = id_pair(&raw.after)?;
    let name = raw
        .opcode
        .rsplit('.')
        .next()
        .unwrap_or(raw.opcode.as_str())
        .to_string();
    Ok(OpNode {
        file_line: raw.file_line,
        core_id: raw.core_id,
        name,
        bd_id_range: convention.range(before[0], after[0]),
        gdma_id_range: convention.range(before[1], after[1]),
        operands: raw.operands,
        results: raw.results,
        is_local: raw.is_local,
    })
}

pub fn parse_op_graph(text: &str, convention: IdRangeConvention) -> TpuProfResult<Vec<OpNode>> {
    let healed = heal_json_array(text);
    let nodes: Vec<Value> =
        serde_json::from_str(&healed).map_err(|e| TpuProfError::MalformedInput {
            source_name: "op graph".to_string(),
            message: e.to_string(),
        })?;

    let mut ops = Vec::new();
    for node in nodes {
        let is_tpu_op = node
            .get("opcode")
            .and_then(Value::as_str)
            .is_some_and(|op| op.starts_with(OPCODE_PREFIX));
        if !is_tpu_op {
            continue;
        }
        let file_line = node.get("file-line").cloned().unwrap_or_else(unknown_file_line);
        let parsed = serde_json::from_value::<RawOpNode>(node)
            .map_err(|e| e.to_string())
            .and_then(|raw| op_node(raw, convention));
        match parsed {
            Ok(op) => ops.push(op),
            Err(err) => tracing::warn!("skipping op graph node at {file_line}: {err}"),
        }
    }
    Ok(ops)
}

/// Missing or empty files give an empty graph; unreadable or malformed ones are errors.
pub fn load_op_graph(path: &Path, convention: IdRangeConvention) -> TpuProfResult<Vec<OpNode>> {
    if !path.exists() {
        tracing::warn!("op graph {} does not exist", path.display());
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        tracing::warn!("op graph {} is empty", path.display());
        return Ok(Vec::new());
    }
    let ops = parse_op_graph(&text, convention).map_err(|err| match err {
        TpuProfError::MalformedInput { message, .. } => TpuProfError::MalformedInput {
            source_name: path.display().to_string(),
            message,
        },
        other => other,
    })?;
    tracing::info!("loaded {} ops from {}", ops.len(), path.display());
    Ok(ops)
}
