//! Single-profile commands (`tpuprof profile ...`).

use clap::Subcommand;
use serde::{Deserialize, Serialize};

use std::path::PathBuf;

use crate::{
    Config, CoreProfile, TailSummary, TpuProfResult, core_id, extract_tail_summary, load_op_graph,
    parse_profile,
};

const CORE_HELP: &str = "Core id used to select op-graph nodes; defaults to the n in compiler_profile_<n>, else 0.";

#[derive(Debug, Subcommand)]
pub enum ProfileCommand {
    /// Parse one profile into time-sorted instruction and layer entries.
    Parse {
        #[arg(value_name = "PROFILE")]
        file: PathBuf,
        /// Operation graph (`*.bmodel.json`) used for layer correlation.
        #[arg(long, value_name = "BMODEL_JSON")]
        bmodel: Option<PathBuf>,
        #[arg(long, help = CORE_HELP)]
        core: Option<i64>,
    },
    /// Show only the tail summary counters of one profile.
    Tail {
        #[arg(value_name = "PROFILE")]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOutput {
    pub file: String,
    #[serde(rename = "coreId")]
    pub core_id: i64,
    #[serde(rename = "opCount")]
    pub op_count: usize,
    #[serde(flatten)]
    pub profile: CoreProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailOutput {
    pub file: String,
    pub settings: TailSummary,
}

pub fn profile_command(config: &Config, command: &ProfileCommand) -> TpuProfResult<serde_json::Value> {
    match command {
        ProfileCommand::Parse { file, bmodel, core } => {
            let text = std::fs::read_to_string(file)?;
            let core = core.or_else(|| core_id(file)).unwrap_or(0);
            let ops = match bmodel {
                Some(path) => load_op_graph(path, config.id_range)?,
                None => Vec::new(),
            };
            let out = ProfileOutput {
                file: file.display().to_string(),
                core_id: core,
                op_count: ops.len(),
                profile: parse_profile(&text, &ops, core),
            };
            Ok(serde_json::to_value(out)?)
        }
        ProfileCommand::Tail { file } => {
            let text = std::fs::read_to_string(file)?;
            Ok(serde_json::to_value(TailOutput {
                file: file.display().to_string(),
                settings: extract_tail_summary(&text),
            })?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::TpuProfError;

    const TRACE: &str = "\
OpA|BD|s:10|b:1|g:0|e:20|t:10   OpB|GDMA|s:12|b:0|g:1|e:22|t:10|dr:0|sz:1024|bw:12.5
TCYC : 99
";

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tpuprof-profile-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn parse_uses_core_from_file_name() {
        let dir = temp_dir();
        let file = dir.join("compiler_profile_3");
        std::fs::write(&file, TRACE).expect("profile");
        let graph = dir.join("net.bmodel.json");
        std::fs::write(
            &graph,
            r#"[{"opcode": "tpu.Load", "core_id": 3, "tiu_dma_id(before)": [0, 0], "tiu_dma_id(after)": [0, 1]}]"#,
        )
        .expect("graph");

        let out = profile_command(
            &Config::default(),
            &ProfileCommand::Parse {
                file,
                bmodel: Some(graph),
                core: None,
            },
        )
        .expect("parse");
        assert_eq!(out["coreId"], 3);
        assert_eq!(out["opCount"], 1);
        assert_eq!(out["settings"]["tcyc"], 99);
        let entries = out["entries"].as_array().expect("entries");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2]["type"], "Load(G)");
        assert_eq!(entries[2]["isSL"], true);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn tail_reads_counters_only() {
        let dir = temp_dir();
        let file = dir.join("trace.txt");
        std::fs::write(&file, TRACE).expect("profile");
        let out = profile_command(&Config::default(), &ProfileCommand::Tail { file }).expect("tail");
        assert_eq!(out["settings"], serde_json::json!({"tcyc": 99}));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unreadable_profile_is_an_io_error() {
        let err = profile_command(
            &Config::default(),
            &ProfileCommand::Tail {
                file: PathBuf::from("/nonexistent/compiler_profile_0"),
            },
        )
        .expect_err("missing");
        assert!(matches!(err, TpuProfError::Io(_)));
    }
}
