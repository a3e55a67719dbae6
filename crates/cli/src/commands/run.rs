//! Run command - ingest, analyze, export

use anyhow::{Context as _, Result};
use biocluster_common::{AnalysisError, FeatureSchema, MediaLink};
use biocluster_core::{run_pipeline, validate_request, AnalysisRequest, ParamBag, PipelineConfig};
use biocluster_ingestion::{read_media_links, read_occurrences};
use clap::Args;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Args)]
pub struct RunCommand {
    /// GBIF occurrence export (tab-delimited, with header)
    #[arg(long, value_name = "FILE")]
    occurrences: PathBuf,

    /// GBIF multimedia export; omit to run without media links
    #[arg(long, value_name = "FILE")]
    multimedia: Option<PathBuf>,

    /// Clustering strategy (kmeans, hierarchical or dbscan)
    #[arg(short, long)]
    algorithm: String,

    /// Strategy parameters as a JSON object; overrides --params-file
    #[arg(long, value_name = "JSON")]
    params: Option<String>,

    /// Strategy parameters from a YAML or JSON file
    #[arg(long, value_name = "FILE")]
    params_file: Option<PathBuf>,

    /// Fixed cluster count; skips the silhouette sweep
    #[arg(short = 'k', long)]
    n_clusters: Option<usize>,

    /// Comma-separated feature columns (default: all nine)
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Wall-time budget for the cluster-count sweep, 0 disables it
    #[arg(long, default_value = "300")]
    sweep_timeout_secs: u64,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl RunCommand {
    pub fn execute(self) -> Result<ExitCode> {
        let start = Instant::now();

        let schema = if self.columns.is_empty() {
            FeatureSchema::default()
        } else {
            FeatureSchema::from_names(&self.columns).context("Invalid --columns")?
        };
        let params = self.load_params()?;

        let mut config = PipelineConfig::default();
        config.sweep.budget =
            (self.sweep_timeout_secs > 0).then(|| Duration::from_secs(self.sweep_timeout_secs));

        let mut request = AnalysisRequest::new(&self.algorithm)
            .with_params(params)
            .with_schema(schema)
            .with_config(config);
        request.n_clusters = self.n_clusters;

        // Selector and parameter errors win over unreadable inputs
        if let Err(e) = validate_request(&request) {
            return report_failure(&e);
        }

        let records = read_occurrences(&self.occurrences, &request.schema)
            .with_context(|| format!("Failed to read {}", self.occurrences.display()))?;
        let links: Vec<MediaLink> = match &self.multimedia {
            Some(path) => read_media_links(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            None => Vec::new(),
        };

        let result = match run_pipeline(records, links, &request) {
            Ok(result) => result,
            Err(e) => return report_failure(&e),
        };

        let json = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
        match &self.output {
            Some(path) => {
                fs::write(path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Wrote {} points to {}", result.len(), path.display());
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{json}").context("Failed to write result")?;
            }
        }

        info!("Total time: {:.2?}", start.elapsed());
        Ok(ExitCode::SUCCESS)
    }

    /// Merge --params-file and --params (inline keys win)
    fn load_params(&self) -> Result<ParamBag> {
        let mut params = match &self.params_file {
            Some(path) => read_params_file(path)?,
            None => ParamBag::new(),
        };

        if let Some(inline) = &self.params {
            let value: serde_json::Value =
                serde_json::from_str(inline).context("--params is not valid JSON")?;
            let inline = ParamBag::from_value(value).context("--params must be a JSON object")?;
            // A null inline value masks the file's value
            for key in inline.keys() {
                let value = inline.raw(key).cloned().unwrap_or(serde_json::Value::Null);
                params.insert(key, value);
            }
        }
        Ok(params)
    }
}

/// Print the `{"kind", "message"}` report on stderr
fn report_failure(error: &AnalysisError) -> Result<ExitCode> {
    let report =
        serde_json::to_string(&error.report()).context("Failed to serialize error report")?;
    eprintln!("{report}");
    Ok(ExitCode::FAILURE)
}

/// YAML is a superset of JSON, so one parser covers both file formats
fn read_params_file(path: &Path) -> Result<ParamBag> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameter file {}", path.display()))?;
    let value: serde_json::Value = serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse parameter file {}", path.display()))?;
    ParamBag::from_value(value)
        .with_context(|| format!("Parameter file {} must hold a mapping", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunCommand,
    }

    fn parse(args: &[&str]) -> RunCommand {
        let mut argv = vec!["biocluster", "--occurrences", "occurrence.txt", "-a", "kmeans"];
        argv.extend_from_slice(args);
        Harness::parse_from(argv).run
    }

    #[test]
    fn test_inline_params_override_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("params.yaml");
        fs::write(&path, "init: random\nmax_iter: 50\n").unwrap();

        let cmd = parse(&[
            "--params-file",
            path.to_str().unwrap(),
            "--params",
            r#"{"max_iter": 10, "random_state": 3}"#,
        ]);
        let params = cmd.load_params().unwrap();
        assert_eq!(params.get_str("init").unwrap(), Some("random"));
        assert_eq!(params.get_usize("max_iter").unwrap(), Some(10));
        assert_eq!(params.get_u64("random_state").unwrap(), Some(3));
    }

    #[test]
    fn test_inline_null_resets_file_value() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("params.yaml");
        fs::write(&path, "random_state: 5\nmax_iter: 50\n").unwrap();

        let cmd = parse(&[
            "--params-file",
            path.to_str().unwrap(),
            "--params",
            r#"{"random_state": null}"#,
        ]);
        let params = cmd.load_params().unwrap();
        assert_eq!(params.get_u64("random_state").unwrap(), None);
        assert_eq!(params.get_usize("max_iter").unwrap(), Some(50));
    }

    #[test]
    fn test_bad_request_reported_before_reading_inputs() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent.txt");
        let missing = missing.to_str().unwrap();

        // A read attempt would surface as an Err from the missing file
        for args in [
            vec!["--occurrences", missing, "--algorithm", "spectral"],
            vec!["--occurrences", missing, "-a", "dbscan", "--params", r#"{"eps": -1}"#],
        ] {
            let cmd = Harness::parse_from(std::iter::once("biocluster").chain(args)).run;
            assert!(cmd.execute().is_ok());
        }
    }

    #[test]
    fn test_params_must_be_object() {
        let cmd = parse(&["--params", "[1, 2]"]);
        assert!(cmd.load_params().is_err());
    }

    #[test]
    fn test_columns_and_defaults() {
        let cmd = parse(&["--columns", "decimalLatitude,decimalLongitude", "-k", "3"]);
        assert_eq!(cmd.columns, vec!["decimalLatitude", "decimalLongitude"]);
        assert_eq!(cmd.n_clusters, Some(3));
        assert_eq!(cmd.sweep_timeout_secs, 300);
        assert!(cmd.multimedia.is_none());
    }
}
