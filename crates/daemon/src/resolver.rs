//! Input resolution and script discovery
//!
//! Turns the static configuration plus a run's input selection into the
//! concrete things the daemon needs: the set of runnable script ids and the
//! process invocation for a run.

use crate::config::{DaemonConfig, DiscoveryConfig};
use crate::engine::Invocation;
use std::collections::BTreeMap;
use testdeck_common::RunRequest;
use tracing::warn;

/// Replace `{key}` placeholders with values from `vars`. Unknown
/// placeholders are left in place.
pub fn resolve_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{}}}", key), value);
    }
    result
}

/// Apply the configured value rewrites to an input selection.
pub fn apply_mappings(
    discovery: &DiscoveryConfig,
    inputs: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut vars = inputs.clone();
    for (key, mapping) in &discovery.path_mappings {
        if let Some(selected) = inputs.get(key) {
            if let Some(mapped) = mapping.get(selected) {
                vars.insert(key.clone(), mapped.clone());
            }
        }
    }
    vars
}

/// Runnable script ids for the given (possibly partial) input selection.
///
/// Scripts are grouped by directory: each subdirectory of the resolved
/// lookup path is one script id. A missing directory yields an empty set.
pub fn available_scripts(
    config: &DaemonConfig,
    selection: &BTreeMap<String, String>,
) -> Vec<String> {
    let vars = apply_mappings(&config.discovery, selection);
    let resolved = resolve_template(&config.discovery.lookup_path, &vars);
    let full_path = config.suite_dir.join(resolved);

    let mut scripts = Vec::new();
    match std::fs::read_dir(&full_path) {
        Ok(entries) => {
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        scripts.push(name.to_string());
                    }
                }
            }
        }
        Err(_) => {
            warn!("Script directory not found: {}", full_path.display());
        }
    }

    scripts.sort();
    scripts
}

/// Build the process invocation for one run.
///
/// Mirrors what the dashboard always did: apply value mappings, expand each
/// selected script through `script_path_pattern`, join the result into
/// `{scriptPaths}`, then resolve the arg and env templates.
pub fn build_invocation(config: &DaemonConfig, run_id: &str, request: &RunRequest) -> Invocation {
    let mut vars = apply_mappings(&config.discovery, &request.inputs);
    vars.insert("runId".to_string(), run_id.to_string());

    let script_paths: Vec<String> = request
        .scripts
        .iter()
        .map(|script| {
            let mut script_vars = vars.clone();
            script_vars.insert("script".to_string(), script.clone());
            resolve_template(&config.runner.script_path_pattern, &script_vars)
        })
        .collect();
    vars.insert("scriptPaths".to_string(), script_paths.join(" "));

    let mut parts = config.runner.command.split_whitespace();
    let program = parts.next().unwrap_or_default().to_string();
    let mut args: Vec<String> = parts.map(str::to_string).collect();
    args.extend(config.runner.args.iter().map(|arg| resolve_template(arg, &vars)));

    let env = config
        .runner
        .env
        .iter()
        .map(|(key, value)| (key.clone(), resolve_template(value, &vars)))
        .collect();

    Invocation {
        program,
        args,
        env,
        cwd: config.suite_dir.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn template_substitutes_all_occurrences() {
        let resolved = resolve_template(
            "regions/{region}/{suite}/{region}.ts",
            &vars(&[("region", "ZA"), ("suite", "smoke")]),
        );
        assert_eq!(resolved, "regions/ZA/smoke/ZA.ts");
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let resolved = resolve_template("run-{runId}", &vars(&[("region", "ZA")]));
        assert_eq!(resolved, "run-{runId}");
    }

    #[test]
    fn mappings_rewrite_selected_values() {
        let mut discovery = DiscoveryConfig::default();
        let mut region_map = HashMap::new();
        region_map.insert("ZA".to_string(), "za-prod".to_string());
        discovery.path_mappings.insert("region".to_string(), region_map);

        let mapped = apply_mappings(&discovery, &vars(&[("region", "ZA"), ("env", "uat")]));
        assert_eq!(mapped.get("region").unwrap(), "za-prod");
        assert_eq!(mapped.get("env").unwrap(), "uat");

        // Unmapped values pass through untouched
        let unmapped = apply_mappings(&discovery, &vars(&[("region", "NG")]));
        assert_eq!(unmapped.get("region").unwrap(), "NG");
    }

    #[test]
    fn scripts_are_discovered_from_directories() {
        let dir = tempfile::tempdir().unwrap();
        let scripts_root = dir.path().join("regions/ZA/smoke");
        std::fs::create_dir_all(scripts_root.join("login")).unwrap();
        std::fs::create_dir_all(scripts_root.join("deposit")).unwrap();
        std::fs::write(scripts_root.join("README.md"), "not a script").unwrap();

        let mut config = DaemonConfig::default();
        config.suite_dir = dir.path().to_path_buf();
        config.discovery.lookup_path = "regions/{region}/{suite}".to_string();

        let scripts =
            available_scripts(&config, &vars(&[("region", "ZA"), ("suite", "smoke")]));
        assert_eq!(scripts, vec!["deposit".to_string(), "login".to_string()]);
    }

    #[test]
    fn missing_script_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.suite_dir = dir.path().to_path_buf();
        config.discovery.lookup_path = "does/not/exist".to_string();

        assert!(available_scripts(&config, &BTreeMap::new()).is_empty());
    }

    #[test]
    fn invocation_expands_script_paths_args_and_env() {
        let mut config = DaemonConfig::default();
        config.suite_dir = "/srv/suite".into();
        config.runner.command = "npx playwright test".to_string();
        config.runner.args = vec!["--reporter=json".to_string(), "{scriptPaths}".to_string()];
        config.runner.script_path_pattern = "regions/{region}/{script}.spec.ts".to_string();
        config
            .runner
            .env
            .insert("TARGET_REGION".to_string(), "{region}".to_string());
        config
            .runner
            .env
            .insert("RUN_ID".to_string(), "{runId}".to_string());

        let request = RunRequest::new(
            vec!["login".to_string(), "deposit".to_string()],
            vars(&[("region", "ZA")]),
        );
        let invocation = build_invocation(&config, "run-42", &request);

        assert_eq!(invocation.program, "npx");
        assert_eq!(
            invocation.args,
            vec![
                "playwright".to_string(),
                "test".to_string(),
                "--reporter=json".to_string(),
                "regions/ZA/login.spec.ts regions/ZA/deposit.spec.ts".to_string(),
            ]
        );
        assert_eq!(invocation.cwd, std::path::PathBuf::from("/srv/suite"));

        let env: BTreeMap<_, _> = invocation.env.into_iter().collect();
        assert_eq!(env.get("TARGET_REGION").unwrap(), "ZA");
        assert_eq!(env.get("RUN_ID").unwrap(), "run-42");
    }

    #[test]
    fn invocation_applies_mappings_before_expansion() {
        let mut config = DaemonConfig::default();
        let mut region_map = HashMap::new();
        region_map.insert("ZA".to_string(), "za-prod".to_string());
        config
            .discovery
            .path_mappings
            .insert("region".to_string(), region_map);
        config.runner.script_path_pattern = "{region}/{script}.spec.ts".to_string();

        let request = RunRequest::new(vec!["login".to_string()], vars(&[("region", "ZA")]));
        let invocation = build_invocation(&config, "r", &request);

        assert!(invocation
            .args
            .iter()
            .any(|arg| arg == "za-prod/login.spec.ts"));
    }
}
