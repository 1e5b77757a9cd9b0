//! Monitor descriptor discovery and loading.

use anyhow::{Context, Result, bail};
use fleet::{MonitorConfig, MonitorSpec};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

use crate::cli::ConfigParser;

/// Directories never searched for descriptors
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", ".git", "__pycache__", ".venv"];

/// Load `.env.{CANARY_ENV}` and `.env` from the working directory.
///
/// Variables already set in the environment win, then the more specific file.
pub fn load_env() {
    if let Ok(env) = std::env::var("CANARY_ENV")
        && !env.is_empty()
    {
        let _ = dotenvy::from_filename(format!(".env.{env}"));
    }
    let _ = dotenvy::dotenv();
}

/// Find descriptor files named `file_name` under each path.
///
/// A file path is taken as is; a directory is searched recursively.
pub fn discover(paths: &[PathBuf], file_name: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for path in paths {
        if path.is_file() {
            found.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            return Err(fleet::Error::config(format!(
                "{} is neither a file nor a directory",
                path.display()
            ))
            .into());
        }

        let started = Instant::now();
        let mut scanned = 0usize;
        let before = found.len();
        let walker = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !SKIPPED_DIRS.iter().any(|dir| e.file_name() == *dir)
            });
        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            scanned += 1;
            if entry.file_name() == file_name {
                found.push(entry.into_path());
            }
        }

        if found.len() == before {
            bail!(
                "no {file_name} found in {} ({scanned} files scanned in {:.2?})",
                path.display(),
                started.elapsed()
            );
        }
        log::debug!(
            "found {} descriptors in {} ({scanned} files)",
            found.len() - before,
            path.display()
        );
    }

    found.sort();
    found.dedup();
    Ok(found)
}

/// Replace `${VAR}` and `$VAR` references using `lookup`; unknown ones become empty
pub fn interpolate_with<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    shellexpand::env_with_context_no_errors(content, |name: &str| {
        Some(lookup(name).unwrap_or_default())
    })
    .into_owned()
}

pub fn interpolate(content: &str) -> String {
    interpolate_with(content, |name| std::env::var(name).ok())
}

/// Format of a descriptor, from the explicit parser or the file extension
pub fn parser_for(path: &Path, explicit: Option<ConfigParser>) -> ConfigParser {
    explicit.unwrap_or_else(|| {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ConfigParser::Json,
            Some("toml") => ConfigParser::Toml,
            _ => ConfigParser::Yml,
        }
    })
}

pub fn parse(content: &str, parser: ConfigParser) -> Result<MonitorConfig> {
    let config = match parser {
        ConfigParser::Yml => serde_yaml::from_str(content)?,
        ConfigParser::Json => serde_json::from_str(content)?,
        ConfigParser::Toml => toml::from_str(content)?,
    };
    Ok(config)
}

/// Read, interpolate, parse and validate one descriptor.
///
/// The monitor is named after its directory when the descriptor has no name.
pub fn load_file(path: &Path, parser: Option<ConfigParser>) -> Result<MonitorSpec> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    let content = interpolate(&content);
    let config = parse(&content, parser_for(path, parser))
        .with_context(|| format!("Invalid descriptor {}", path.display()))?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let fallback = base_dir
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();

    MonitorSpec::from_config(config, &fallback, base_dir)
        .with_context(|| format!("Invalid descriptor {}", path.display()))
}

/// Discover and load every descriptor, sorted by monitor name
pub fn load_all(
    paths: &[PathBuf],
    file_name: &str,
    parser: Option<ConfigParser>,
) -> Result<Vec<MonitorSpec>> {
    let files = discover(paths, file_name)?;
    let mut specs = files
        .par_iter()
        .map(|path| load_file(path, parser))
        .collect::<Result<Vec<_>>>()?;
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_interpolation_replaces_known_and_blanks_unknown() {
        let lookup = |name: &str| (name == "STAGE").then(|| "prod".to_string());
        assert_eq!(
            interpolate_with("url: https://${STAGE}.example.com/$MISSING", lookup),
            "url: https://prod.example.com/"
        );
    }

    #[test]
    fn test_parser_from_extension() {
        assert_eq!(parser_for(Path::new("a/canary.json"), None), ConfigParser::Json);
        assert_eq!(parser_for(Path::new("a/canary.toml"), None), ConfigParser::Toml);
        assert_eq!(parser_for(Path::new("a/canary.yml"), None), ConfigParser::Yml);
        assert_eq!(
            parser_for(Path::new("a/canary.yml"), Some(ConfigParser::Json)),
            ConfigParser::Json
        );
    }

    #[test]
    fn test_parse_formats() {
        let yml = parse(
            "name: web\nmemory: 1500\nschedule:\n  expression: rate(5 minutes)\n",
            ConfigParser::Yml,
        )
        .unwrap();
        assert_eq!(yml.name, "web");
        assert_eq!(yml.memory, 1500);
        assert_eq!(yml.schedule.expression, "rate(5 minutes)");

        let json = parse(
            r#"{"name": "api", "tags": {"team": "core"}}"#,
            ConfigParser::Json,
        )
        .unwrap();
        assert_eq!(json.tags.get("team").map(String::as_str), Some("core"));

        let toml = parse("name = \"batch\"\ntracing = true\n", ConfigParser::Toml).unwrap();
        assert!(toml.tracing);
    }

    #[test]
    fn test_discover_skips_dependency_dirs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "web/canary.yml", "name: web\n");
        write(dir.path(), "api/canary.yml", "name: api\n");
        write(dir.path(), "web/node_modules/pkg/canary.yml", "name: nope\n");

        let found = discover(&[dir.path().to_path_buf()], "canary.yml").unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| !p.to_string_lossy().contains("node_modules")));
    }

    #[test]
    fn test_discover_empty_dir_is_error() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "README.md", "");
        let err = discover(&[dir.path().to_path_buf()], "canary.yml").unwrap_err();
        assert!(err.to_string().contains("1 files scanned"));
    }

    #[test]
    fn test_discover_rejects_missing_path() {
        let dir = TempDir::new().unwrap();
        let err = discover(&[dir.path().join("absent")], "canary.yml").unwrap_err();
        assert!(err.downcast_ref::<fleet::Error>().is_some());
    }

    #[test]
    fn test_load_all_names_from_directory() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "checkout/canary.yml", "memory: 1200\n");
        write(dir.path(), "api/canary.yml", "name: api-health\n");

        let specs = load_all(&[dir.path().to_path_buf()], "canary.yml", None).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["api-health", "checkout"]);
        assert_eq!(specs[1].code.src, dir.path().join("checkout").join("./"));
    }
}
