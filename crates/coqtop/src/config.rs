//! Prover launch configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// How to locate and launch the prover.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoqtopConfig {
	/// Directory containing the prover binaries; empty means `$PATH`.
	pub bin_path: PathBuf,
	/// Binary used for releases below 8.9 (`-ideslave` mode).
	pub coqtop_exe: String,
	/// Binary used for 8.9 and later.
	pub coqidetop_exe: String,
	/// Extra arguments appended to the launch command.
	pub args: Vec<String>,
	/// Extra environment variables for the child process.
	pub env: HashMap<String, String>,
	/// Working directory for the child process (the project root).
	pub working_dir: PathBuf,
}

impl Default for CoqtopConfig {
	fn default() -> Self {
		Self {
			bin_path: PathBuf::new(),
			coqtop_exe: "coqtop".to_owned(),
			coqidetop_exe: "coqidetop".to_owned(),
			args: Vec::new(),
			env: HashMap::new(),
			working_dir: PathBuf::from("."),
		}
	}
}

impl CoqtopConfig {
	fn resolve(&self, exe: &str) -> PathBuf {
		if self.bin_path.as_os_str().is_empty() {
			PathBuf::from(exe)
		} else {
			self.bin_path.join(exe)
		}
	}

	/// Full path of the legacy `coqtop` binary.
	pub fn coqtop_bin(&self) -> PathBuf {
		self.resolve(&self.coqtop_exe)
	}

	/// Full path of the `coqidetop` binary.
	pub fn coqidetop_bin(&self) -> PathBuf {
		self.resolve(&self.coqidetop_exe)
	}

	/// Working directory, if it exists.
	pub fn cwd(&self) -> Option<&Path> {
		let dir = self.working_dir.as_path();
		dir.is_dir().then_some(dir)
	}
}
