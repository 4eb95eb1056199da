//! Run-folder input discovery.

use globset::{Glob, GlobMatcher};
use regex::Regex;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use walkdir::WalkDir;

use crate::{Config, TpuProfError, TpuProfResult};

static CORE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"compiler_profile_(\d+)").expect("core id pattern"));

/// Profiles at or above this core id are skipped; the profile array is indexed by core id.
pub const MAX_CORE_ID: i64 = 4096;

const MAIN_LOG_MARKERS: [&str; 2] = ["; action = lmem_assign", "; action = timestep_cycle"];

#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    /// First log (in name order) that carries LMEM or timestep actions, with its text.
    pub main_log: Option<(PathBuf, String)>,
    pub op_graph: Option<PathBuf>,
    /// `(core_id, path)` sorted by file name.
    pub profiles: Vec<(i64, PathBuf)>,
}

pub fn find_inputs(folder: &Path, config: &Config) -> TpuProfResult<RunInputs> {
    if !folder.is_dir() {
        return Err(TpuProfError::InvalidArgument(format!(
            "input path is not a folder: {}",
            folder.display()
        )));
    }
    let log_glob = compile_glob(&config.log_glob)?;
    let opgraph_glob = compile_glob(&config.opgraph_glob)?;
    let profile_glob = compile_glob(&config.profile_glob)?;

    let mut inputs = RunInputs::default();
    for path in list_files(folder)? {
        let Some(name) = path.file_name() else {
            continue;
        };
        if log_glob.is_match(name) && inputs.main_log.is_none() {
            let text = match std::fs::read(&path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) => {
                    tracing::warn!("skipping unreadable log {}: {err}", path.display());
                    continue;
                }
            };
            if MAIN_LOG_MARKERS.iter().any(|m| text.contains(m)) {
                tracing::info!("main log: {}", path.display());
                inputs.main_log = Some((path.clone(), text));
            }
        }
        if opgraph_glob.is_match(name) && inputs.op_graph.is_none() {
            tracing::info!("op graph: {}", path.display());
            inputs.op_graph = Some(path.clone());
        }
        if profile_glob.is_match(name) {
            match core_id(&path) {
                Some(core) if core >= MAX_CORE_ID => {
                    tracing::warn!("skipping profile {}: core id {core} is out of range", path.display());
                }
                Some(core) => {
                    tracing::info!("profile: {} (core {core})", path.display());
                    inputs.profiles.push((core, path));
                }
                None => tracing::warn!("no core id in profile name {}", path.display()),
            }
        }
    }
    Ok(inputs)
}

/// Core id from a `compiler_profile_<n>` file name.
pub fn core_id(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    CORE_ID_RE.captures(name)?.get(1)?.as_str().parse().ok()
}

fn list_files(folder: &Path) -> TpuProfResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(folder).max_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let msg = e.to_string();
            TpuProfError::Io(e.into_io_error().unwrap_or_else(|| std::io::Error::other(msg)))
        })?;
        if entry.file_type().is_file() {
            out.push(entry.into_path());
        }
    }
    out.sort();
    Ok(out)
}

fn compile_glob(pattern: &str) -> TpuProfResult<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| TpuProfError::InvalidArgument(format!("invalid glob {pattern:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tpuprof-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn discovers_log_graph_and_profiles() {
        let dir = temp_workspace("discover");
        std::fs::write(dir.join("a.log"), "nothing useful").expect("a");
        std::fs::write(dir.join("b.log"), "; action = timestep_cycle; x = 1").expect("b");
        std::fs::write(dir.join("c.log"), "; action = lmem_assign").expect("c");
        std::fs::write(dir.join("net.bmodel.json"), "[]").expect("graph");
        std::fs::write(dir.join("compiler_profile_1"), "").expect("p1");
        std::fs::write(dir.join("compiler_profile_0.txt"), "").expect("p0");
        std::fs::write(dir.join("compiler_profile_x"), "").expect("px");
        std::fs::create_dir_all(dir.join("nested")).expect("nested");
        std::fs::write(dir.join("nested").join("compiler_profile_7"), "").expect("p7");

        let inputs = find_inputs(&dir, &Config::default()).expect("inputs");
        let (log, _) = inputs.main_log.expect("main log");
        assert_eq!(log.file_name().and_then(|n| n.to_str()), Some("b.log"));
        assert!(inputs.op_graph.is_some());
        let cores: Vec<i64> = inputs.profiles.iter().map(|(c, _)| *c).collect();
        assert_eq!(cores, vec![0, 1]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn out_of_range_core_ids_are_skipped() {
        let dir = temp_workspace("cores");
        std::fs::write(dir.join("compiler_profile_99999999999"), "").expect("huge");
        std::fs::write(dir.join("compiler_profile_4096"), "").expect("cap");
        std::fs::write(dir.join("compiler_profile_4095"), "").expect("last");

        let inputs = find_inputs(&dir, &Config::default()).expect("inputs");
        let cores: Vec<i64> = inputs.profiles.iter().map(|(c, _)| *c).collect();
        assert_eq!(cores, vec![4095]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_path_is_not_a_folder() {
        let err = find_inputs(Path::new("/nonexistent/tpuprof"), &Config::default())
            .expect_err("not a folder");
        assert!(matches!(err, TpuProfError::InvalidArgument(_)));
    }

    #[test]
    fn core_id_from_name() {
        assert_eq!(core_id(Path::new("/x/compiler_profile_12")), Some(12));
        assert_eq!(core_id(Path::new("/x/compiler_profile_")), None);
    }
}
