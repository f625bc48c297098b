//! Manifest tree validator.
//!
//! Walks a directory of protocol manifests (`*.json`, `*.yaml`), validates
//! every file, and reports failures with their offending field path.
//!
//! ```text
//! validate-manifests <dir> [--strict]
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use modelwire::manifest::{validate_manifest, ProtocolManifest, ValidationMode};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let strict = args.iter().any(|a| a == "--strict");
    let root = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("manifests"));

    if !root.exists() {
        eprintln!("error: manifest root '{}' does not exist", root.display());
        return ExitCode::FAILURE;
    }

    let mode = if strict {
        ValidationMode::Strict
    } else {
        ValidationMode::from_env()
    };

    let mut checked = 0usize;
    let mut failed = 0usize;
    let mut stack = vec![root];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!("error: cannot read '{}': {e}", dir.display());
                failed += 1;
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if !is_manifest_file(&path) {
                continue;
            }
            checked += 1;
            match check_file(&path, mode) {
                Ok(id) => println!("ok    {} ({id})", path.display()),
                Err(reason) => {
                    failed += 1;
                    eprintln!("FAIL  {}\n      {reason}", path.display());
                }
            }
        }
    }

    println!("{checked} manifests checked, {failed} failed");
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn is_manifest_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("yaml") | Some("yml")
    )
}

fn check_file(path: &Path, mode: ValidationMode) -> Result<String, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let yaml = !matches!(path.extension().and_then(|e| e.to_str()), Some("json"));
    let manifest: ProtocolManifest = if yaml {
        serde_yaml::from_str(&content).map_err(|e| e.to_string())?
    } else {
        serde_json::from_str(&content).map_err(|e| e.to_string())?
    };
    validate_manifest(&manifest, mode).map_err(|e| e.to_string())?;
    Ok(manifest.id)
}
