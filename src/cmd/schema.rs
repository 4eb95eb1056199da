//! Result-record introspection for downstream exporters.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SchemaDoc {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    #[serde(rename = "topLevelKeys")]
    pub top_level_keys: Vec<&'static str>,
    #[serde(rename = "validFlags")]
    pub valid_flags: Vec<&'static str>,
    #[serde(rename = "entryVariants")]
    pub entry_variants: Vec<EntryVariant>,
    #[serde(rename = "tailSummaryKeys")]
    pub tail_summary_keys: Vec<&'static str>,
    #[serde(rename = "csvColumns")]
    pub csv_columns: Vec<&'static str>,
    #[serde(rename = "minimalExample")]
    pub minimal_example: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryVariant {
    pub engine: &'static str,
    #[serde(rename = "requiredKeys")]
    pub required_keys: Vec<&'static str>,
    #[serde(rename = "optionalKeys")]
    pub optional_keys: Vec<&'static str>,
}

pub fn schema_doc() -> SchemaDoc {
    SchemaDoc {
        schema_version: "tpuprof.result.v1".to_string(),
        top_level_keys: vec!["lmem", "timestep", "summary", "profile", "chip", "valid", "success"],
        valid_flags: vec!["lmem", "summary", "timestep", "profile"],
        entry_variants: vec![
            EntryVariant {
                engine: "BD",
                required_keys: vec!["engine", "op", "type", "start", "end", "cost"],
                optional_keys: vec!["bd_id", "gdma_id"],
            },
            EntryVariant {
                engine: "GDMA",
                required_keys: vec!["engine", "op", "type", "start", "end", "cost"],
                optional_keys: vec!["bd_id", "gdma_id", "direction", "size", "bandwidth"],
            },
            EntryVariant {
                engine: "LAYER",
                required_keys: vec![
                    "engine", "op", "type", "start", "end", "cost", "file_line", "info", "isSL",
                ],
                optional_keys: Vec::new(),
            },
        ],
        tail_summary_keys: vec![
            "totalCycle",
            "lastBdId",
            "lastGdmaId",
            "tcyc",
            "gdmaBytes",
            "ddrBwUsage",
            "flops",
            "runtime_Ms",
            "computationAbility_T",
        ],
        csv_columns: crate::CSV_HEADER.to_vec(),
        minimal_example: serde_json::to_value(crate::ParseResult::empty())
            .unwrap_or(serde_json::Value::Null),
    }
}
