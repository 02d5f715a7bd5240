use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ShimError;

/// Grace period between SIGTERM and a hard kill.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

fn default_stop_timeout_ms() -> u64 {
	DEFAULT_STOP_TIMEOUT_MS
}

/// What to supervise and how to stop it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ShimConfig {
	pub program: PathBuf,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default = "default_stop_timeout_ms")]
	pub stop_timeout_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialConfig {
	program: Option<PathBuf>,
	args: Option<Vec<String>>,
	stop_timeout_ms: Option<u64>,
}

impl ShimConfig {
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			args: Vec::new(),
			stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
		}
	}

	#[must_use]
	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args = args.into_iter().map(Into::into).collect();
		self
	}

	#[must_use]
	pub fn stop_timeout(mut self, timeout: Duration) -> Self {
		self.stop_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
		self
	}

	pub fn stop_timeout_duration(&self) -> Duration {
		Duration::from_millis(self.stop_timeout_ms)
	}

	/// Loads a complete configuration from a TOML file.
	pub fn load(path: &Path) -> Result<Self, ShimError> {
		let text = read(path)?;
		toml::from_str(&text).map_err(|source| ShimError::ParseConfig {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Merges an optional TOML file with command line overrides.
	///
	/// Overrides win field by field; the program must come from one of them.
	pub fn resolve(file: Option<&Path>, program: Option<PathBuf>, args: Vec<String>, stop_timeout_ms: Option<u64>) -> Result<Self, ShimError> {
		let base = match file {
			Some(path) => {
				let text = read(path)?;
				toml::from_str::<PartialConfig>(&text).map_err(|source| ShimError::ParseConfig {
					path: path.to_path_buf(),
					source,
				})?
			}
			None => PartialConfig::default(),
		};

		let program = program.or(base.program).ok_or(ShimError::MissingProgram)?;
		let args = if args.is_empty() { base.args.unwrap_or_default() } else { args };
		Ok(Self {
			program,
			args,
			stop_timeout_ms: stop_timeout_ms.or(base.stop_timeout_ms).unwrap_or(DEFAULT_STOP_TIMEOUT_MS),
		})
	}
}

fn read(path: &Path) -> Result<String, ShimError> {
	std::fs::read_to_string(path).map_err(|source| ShimError::ReadConfig {
		path: path.to_path_buf(),
		source,
	})
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use pretty_assertions::assert_eq;

	use super::*;

	fn write_config(text: &str) -> tempfile::NamedTempFile {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(text.as_bytes()).unwrap();
		file
	}

	#[test]
	fn loads_full_config() {
		let file = write_config(
			r#"
program = "/opt/telemetrify/bin/pipeline"
args = ["--site", "lab"]
stop-timeout-ms = 250
"#,
		);
		let config = ShimConfig::load(file.path()).unwrap();
		assert_eq!(
			config,
			ShimConfig::new("/opt/telemetrify/bin/pipeline")
				.args(["--site", "lab"])
				.stop_timeout(Duration::from_millis(250))
		);
	}

	#[test]
	fn defaults_apply_to_missing_fields() {
		let file = write_config("program = \"pipeline\"\n");
		let config = ShimConfig::load(file.path()).unwrap();
		assert!(config.args.is_empty());
		assert_eq!(config.stop_timeout_duration(), Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS));
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let file = write_config("program = \"pipeline\"\nrestart-on-crash = true\n");
		let err = ShimConfig::load(file.path()).unwrap_err();
		assert!(matches!(err, ShimError::ParseConfig { .. }));
	}

	#[test]
	fn missing_file_reports_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("absent.toml");
		let err = ShimConfig::load(&path).unwrap_err();
		assert!(matches!(err, ShimError::ReadConfig { path: ref p, .. } if *p == path));
	}

	#[test]
	fn command_line_overrides_file() {
		let file = write_config("program = \"from-file\"\nargs = [\"a\"]\nstop-timeout-ms = 10\n");

		let config = ShimConfig::resolve(Some(file.path()), Some("from-cli".into()), Vec::new(), None).unwrap();
		assert_eq!(config, ShimConfig::new("from-cli").args(["a"]).stop_timeout(Duration::from_millis(10)));

		let config = ShimConfig::resolve(Some(file.path()), None, vec!["b".into()], Some(20)).unwrap();
		assert_eq!(config, ShimConfig::new("from-file").args(["b"]).stop_timeout(Duration::from_millis(20)));
	}

	#[test]
	fn program_is_required() {
		let err = ShimConfig::resolve(None, None, Vec::new(), None).unwrap_err();
		assert!(matches!(err, ShimError::MissingProgram));
	}
}
