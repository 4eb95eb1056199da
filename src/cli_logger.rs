use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tpuprof::{ParseResult, ProfileEntry};

use std::path::PathBuf;

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

/// What `tpuprof parse` wrote.
#[derive(Debug, Serialize)]
pub struct ParseOutcome<'a> {
    #[serde(rename = "resultPath")]
    pub result_path: PathBuf,
    #[serde(rename = "csvPaths")]
    pub csv_paths: Vec<PathBuf>,
    #[serde(skip)]
    pub result: &'a ParseResult,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
            return Ok(());
        }

        let rendered = render_value(&serde_json::to_value(value)?, 0);
        println!("{rendered}");
        Ok(())
    }

    pub fn print_parse_outcome(&self, outcome: &ParseOutcome<'_>) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(outcome)?);
            return Ok(());
        }

        let result = outcome.result;
        let flag = |ok: bool, name: &str| {
            if ok {
                self.style(name, "32;1")
            } else {
                self.style(name, "90")
            }
        };

        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {} {} {}\n",
            self.style("tpuprof", "36;1"),
            flag(result.valid.lmem, "lmem"),
            flag(result.valid.summary, "summary"),
            flag(result.valid.timestep, "timestep"),
            flag(result.valid.profile, "profile"),
        ));

        if let Some(groups) = &result.lmem {
            let allocs: usize = groups.iter().map(|g| g.allocations.len()).sum();
            out.push_str(&format!(
                "{} groups={} allocations={}\n",
                self.style("lmem", "90"),
                groups.len(),
                allocs
            ));
        }
        if let Some(global) = result.summary.as_ref().and_then(|s| s.global_summary.as_ref()) {
            out.push_str(&format!(
                "{} max_used={} allocations={} avg_success={:.2}%\n",
                self.style("summary", "90"),
                global.max_memory_usage,
                global.total_allocations,
                global.avg_success_rate
            ));
        }
        if let Some(groups) = &result.timestep {
            let entries: usize = groups.iter().map(|g| g.entries.len()).sum();
            out.push_str(&format!(
                "{} groups={} entries={}\n",
                self.style("timestep", "90"),
                groups.len(),
                entries
            ));
        }
        for (core, profile) in result.profile.iter().enumerate() {
            if profile.entries.is_empty() {
                continue;
            }
            let layers = profile
                .entries
                .iter()
                .filter(|e| matches!(e, ProfileEntry::Layer(_)))
                .count();
            let span = profile.entries.iter().map(ProfileEntry::end).max().unwrap_or(0);
            out.push_str(&format!(
                "{} entries={} layers={} last_end={}",
                self.style(&format!("core {core}"), "90"),
                profile.entries.len(),
                layers,
                span
            ));
            if let Some(total) = profile.settings.total_cycle {
                out.push_str(&format!(" total_cycle={total}"));
            }
            out.push('\n');
        }

        out.push_str(&format!(
            "{} {}\n",
            self.style("result", "90"),
            outcome.result_path.display()
        ));
        for path in &outcome.csv_paths {
            out.push_str(&format!("{} {}\n", self.style("csv", "90"), path.display()));
        }

        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    pub fn print_warning(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "warning",
                "code": "warning",
                "message": msg,
            });
            eprintln!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("warn", "33;1"));
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

fn render_value(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(items) => render_array(items, indent),
        Value::Object(map) => render_object(map, indent),
    }
}

fn render_array(items: &[Value], indent: usize) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for item in items {
        match item {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}-\n{}\n", render_value(item, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}- {}\n", render_value(item, indent + 2))),
        }
    }
    out.trim_end().to_string()
}

fn render_object(map: &serde_json::Map<String, Value>, indent: usize) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (key, value) in map {
        match value {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!(
                    "{pad}{key}:\n{}\n",
                    render_value(value, indent + 2)
                ));
            }
            _ => out.push_str(&format!(
                "{pad}{key}: {}\n",
                render_value(value, indent + 2)
            )),
        }
    }
    out.trim_end().to_string()
}
