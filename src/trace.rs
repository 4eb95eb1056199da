//! Two-column instruction trace parsing (compute engine left, DMA engine right).
//!
//! Each half is `name|type|key:value|...`. Fields, in the order the device emits them:
//!
//! | key  | meaning                     | kind     |
//! |------|-----------------------------|----------|
//! | `s`  | start cycle                 | required |
//! | `b`  | compute-engine (BD) id      | optional |
//! | `g`  | DMA-engine (GDMA) id        | optional |
//! | `h`  | hardware slot, ignored      | optional |
//! | `sd` | sub-device, ignored         | optional |
//! | `e`  | end cycle, may be negative  | required |
//! | `t`  | cost in cycles              | required |
//! | `dr` | DMA direction               | optional |
//! | `sz` | bytes moved                 | optional |
//! | `bw` | bandwidth (GB/s)            | optional |
//!
//! Unknown keys are skipped. A negative end marks an in-flight instruction and drops it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Engine {
    #[serde(rename = "BD")]
    Bd,
    #[serde(rename = "GDMA")]
    Gdma,
    #[serde(rename = "LAYER")]
    Layer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionEntry {
    pub engine: Engine,
    pub op: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub start: i64,
    pub end: i64,
    pub cost: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bd_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gdma_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceTokenError {
    #[error("expected at least name|type|field, got {0} fields")]
    TooFewFields(usize),
    #[error("empty instruction name or type")]
    EmptyName,
    #[error("field {key:?} has non-numeric value {value:?}")]
    BadNumber { key: String, value: String },
    #[error("missing required field {0:?}")]
    Missing(&'static str),
    #[error("instruction still in flight (end {0})")]
    InFlight(i64),
}

/// Splits on the first run of two or more spaces.
pub fn split_columns(line: &str) -> (&str, Option<&str>) {
    match line.find("  ") {
        Some(at) => {
            let right = line[at..].trim_start_matches(' ');
            (&line[..at], Some(right))
        }
        None => (line, None),
    }
}

pub fn parse_instruction(text: &str, engine: Engine) -> Result<InstructionEntry, TraceTokenError> {
    let fields: Vec<&str> = text.split('|').collect();
    if fields.len() < 3 {
        return Err(TraceTokenError::TooFewFields(fields.len()));
    }
    let (op, kind) = (fields[0].trim(), fields[1].trim());
    if op.is_empty() || kind.is_empty() {
        return Err(TraceTokenError::EmptyName);
    }

    let mut start = None;
    let mut end = None;
    let mut cost = None;
    let mut entry = InstructionEntry {
        engine,
        op: op.to_string(),
        kind: kind.to_string(),
        start: 0,
        end: 0,
        cost: 0,
        bd_id: None,
        gdma_id: None,
        direction: None,
        size: None,
        bandwidth: None,
    };
    for field in &fields[2..] {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "s" => start = Some(int_field(key, value)?),
            "e" => end = Some(int_field(key, value)?),
            "t" => cost = Some(int_field(key, value)?),
            "b" => entry.bd_id = Some(int_field(key, value)?),
            "g" => entry.gdma_id = Some(int_field(key, value)?),
            "dr" => entry.direction = Some(int_field(key, value)?),
            "sz" => entry.size = Some(int_field(key, value)?),
            "bw" => {
                entry.bandwidth = Some(value.parse::<f64>().map_err(|_| bad_number(key, value))?)
            }
            "h" | "sd" => {
                int_field(key, value)?;
            }
            _ => {}
        }
    }

    entry.start = start.ok_or(TraceTokenError::Missing("s"))?;
    entry.end = end.ok_or(TraceTokenError::Missing("e"))?;
    entry.cost = cost.ok_or(TraceTokenError::Missing("t"))?;
    if entry.end < 0 {
        return Err(TraceTokenError::InFlight(entry.end));
    }
    Ok(entry)
}

fn int_field(key: &str, value: &str) -> Result<i64, TraceTokenError> {
    value.parse::<i64>().map_err(|_| bad_number(key, value))
}

fn bad_number(key: &str, value: &str) -> TraceTokenError {
    TraceTokenError::BadNumber {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn is_trace_line(line: &str) -> bool {
    !line.is_empty() && !line.starts_with('-') && !line.contains("ENGINE_")
}

/// Parses every BD/GDMA instruction in profile text, in line order (BD before GDMA per line).
pub fn parse_trace(text: &str) -> Vec<InstructionEntry> {
    let mut out = Vec::new();
    let mut rejected = 0usize;
    for line in text.lines().map(str::trim_end).filter(|l| is_trace_line(l)) {
        let (left, right) = split_columns(line);
        let halves = [(Some(left), Engine::Bd), (right, Engine::Gdma)];
        for (half, engine) in halves {
            let Some(half) = half.filter(|h| !h.is_empty()) else {
                continue;
            };
            match parse_instruction(half, engine) {
                Ok(entry) => out.push(entry),
                Err(err) => {
                    rejected += 1;
                    tracing::trace!("skipping {engine:?} half {half:?}: {err}");
                }
            }
        }
    }
    if rejected > 0 {
        tracing::debug!(rejected, parsed = out.len(), "instruction trace lines skipped");
    }
    out
}

/// Normalizes GDMA bandwidth into a display height in `[0, 1]` against the trace's peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthScale {
    max_bandwidth: f64,
}

impl BandwidthScale {
    pub fn from_entries(entries: &[InstructionEntry]) -> Self {
        let max_bandwidth = entries
            .iter()
            .filter(|e| e.engine == Engine::Gdma)
            .filter_map(|e| e.bandwidth)
            .fold(None, |acc: Option<f64>, bw| Some(acc.map_or(bw, |m| m.max(bw))))
            .unwrap_or(1.0);
        Self { max_bandwidth }
    }

    pub fn height(&self, bandwidth: f64) -> f64 {
        if self.max_bandwidth > 0.0 {
            (bandwidth / self.max_bandwidth).min(1.0)
        } else {
            0.5
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIR: &str =
        "OpA|BD|s:10|b:1|g:0|e:20|t:10   OpB|GDMA|s:12|b:0|g:1|e:22|t:10|dr:0|sz:1024|bw:12.5";

    #[test]
    fn two_column_line_yields_bd_and_gdma() {
        let entries = parse_trace(PAIR);
        assert_eq!(entries.len(), 2);
        let bd = &entries[0];
        assert_eq!(bd.engine, Engine::Bd);
        assert_eq!((bd.op.as_str(), bd.start, bd.end, bd.cost), ("OpA", 10, 20, 10));
        assert_eq!(bd.bd_id, Some(1));
        let dma = &entries[1];
        assert_eq!(dma.engine, Engine::Gdma);
        assert_eq!((dma.op.as_str(), dma.start, dma.end, dma.cost), ("OpB", 12, 22, 10));
        assert_eq!(dma.direction, Some(0));
        assert_eq!(dma.size, Some(1024));
        assert_eq!(dma.bandwidth, Some(12.5));
        assert_eq!(dma.gdma_id, Some(1));
    }

    #[test]
    fn skips_headers_rules_and_blank_lines() {
        let text = "------------\nENGINE_BD  ENGINE_GDMA\n\n   \nOpA|BD|s:1|b:1|g:0|e:2|t:1\n";
        let entries = parse_trace(text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].engine, Engine::Bd);
    }

    #[test]
    fn in_flight_instruction_is_dropped() {
        assert_eq!(
            parse_instruction("OpA|BD|s:5|b:1|g:0|e:-1|t:0", Engine::Bd),
            Err(TraceTokenError::InFlight(-1))
        );
    }

    #[test]
    fn hardware_fields_are_accepted_and_ignored() {
        let e = parse_instruction("Mv|DMA_tensor|s:5|b:0|g:3|h:2|sd:1|e:9|t:4|dr:1", Engine::Gdma)
            .expect("entry");
        assert_eq!(e.gdma_id, Some(3));
        assert_eq!(e.direction, Some(1));
        assert_eq!(e.bandwidth, None);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        assert_eq!(
            parse_instruction("OpA|BD|s:5|b:1|g:0|e:9", Engine::Bd),
            Err(TraceTokenError::Missing("t"))
        );
        assert_eq!(
            parse_instruction("OpA|BD", Engine::Bd),
            Err(TraceTokenError::TooFewFields(2))
        );
        assert!(matches!(
            parse_instruction("OpA|BD|s:x|e:1|t:1", Engine::Bd),
            Err(TraceTokenError::BadNumber { .. })
        ));
    }

    #[test]
    fn right_column_only_line() {
        let entries = parse_trace("   OpB|GDMA|s:1|b:0|g:4|e:3|t:2");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].engine, Engine::Gdma);
    }

    #[test]
    fn bandwidth_scale_against_peak() {
        let entries = parse_trace(
            "A|BD|s:0|b:1|g:0|e:1|t:1  B|G|s:0|b:0|g:1|e:1|t:1|bw:10.0\n\
             C|BD|s:1|b:2|g:0|e:2|t:1  D|G|s:1|b:0|g:2|e:2|t:1|bw:40.0",
        );
        let scale = BandwidthScale::from_entries(&entries);
        assert!((scale.height(10.0) - 0.25).abs() < 1e-9);
        assert_eq!(scale.height(80.0), 1.0);
        let none = BandwidthScale::from_entries(&[]);
        assert_eq!(none.height(0.5), 0.5);
    }
}
