//! Per-core CSV export of profile entries.

use csv::Writer;

use std::io;
use std::path::{Path, PathBuf};

use crate::{BandwidthScale, CoreProfile, Engine, InstructionEntry, ParseResult, ProfileEntry, TpuProfResult};

pub const CSV_HEADER: [&str; 17] = [
    "core_id",
    "entry_id",
    "engine",
    "op",
    "type",
    "start",
    "end",
    "cost",
    "bd_id",
    "gdma_id",
    "direction",
    "size",
    "bandwidth",
    "height",
    "file_line",
    "isSL",
    "info",
];

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn engine_label(engine: Engine) -> &'static str {
    match engine {
        Engine::Bd => "BD",
        Engine::Gdma => "GDMA",
        Engine::Layer => "LAYER",
    }
}

fn row(core_id: usize, entry_id: usize, entry: &ProfileEntry, scale: &BandwidthScale) -> Vec<String> {
    let mut out = vec![core_id.to_string(), entry_id.to_string()];
    match entry {
        ProfileEntry::Instruction(i) => {
            let height = match i.engine {
                Engine::Gdma => i.bandwidth.map(|bw| scale.height(bw)),
                _ => None,
            };
            out.extend([
                engine_label(i.engine).to_string(),
                i.op.clone(),
                i.kind.clone(),
                i.start.to_string(),
                i.end.to_string(),
                i.cost.to_string(),
                opt(i.bd_id),
                opt(i.gdma_id),
                opt(i.direction),
                opt(i.size),
                opt(i.bandwidth),
                opt(height),
                String::new(),
                String::new(),
                String::new(),
            ]);
        }
        ProfileEntry::Layer(l) => {
            let file_line = match &l.file_line {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.extend([
                engine_label(l.engine).to_string(),
                l.op.clone(),
                l.kind.clone(),
                l.start.to_string(),
                l.end.to_string(),
                l.cost.to_string(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                file_line,
                l.is_sl.to_string(),
                l.info.clone(),
            ]);
        }
    }
    out
}

pub fn write_core_csv<W: io::Write>(writer: &mut Writer<W>, core_id: usize, profile: &CoreProfile) -> TpuProfResult<()> {
    let instructions: Vec<InstructionEntry> = profile
        .entries
        .iter()
        .filter_map(|e| match e {
            ProfileEntry::Instruction(i) => Some(i.clone()),
            ProfileEntry::Layer(_) => None,
        })
        .collect();
    let scale = BandwidthScale::from_entries(&instructions);

    writer.write_record(CSV_HEADER)?;
    for (entry_id, entry) in profile.entries.iter().enumerate() {
        writer.write_record(row(core_id, entry_id, entry, &scale))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `core_<n>.csv` for every core that has entries and returns the written paths.
pub fn export_csv(result: &ParseResult, out_dir: &Path) -> TpuProfResult<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)?;
    let mut written = Vec::new();
    for (core_id, profile) in result.profile.iter().enumerate() {
        if profile.entries.is_empty() {
            continue;
        }
        let path = out_dir.join(format!("core_{core_id}.csv"));
        let mut writer = Writer::from_path(&path)?;
        write_core_csv(&mut writer, core_id, profile)?;
        tracing::info!("wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}
