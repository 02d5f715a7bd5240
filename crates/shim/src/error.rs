use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShimError {
	#[error("failed to read {}: {source}", path.display())]
	ReadConfig {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("invalid config {}: {source}", path.display())]
	ParseConfig {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("no program to supervise; set `program` in the config or pass --program")]
	MissingProgram,

	#[error("unknown control action {0:?}")]
	UnknownAction(String),

	#[error("supervisor is no longer running")]
	SupervisorGone,
}
