//! Prover version probing.
//!
//! The installed release decides which binary to launch and which call
//! syntax to speak, so a lightweight probe (`<bin> -v`, parse the banner)
//! runs once at startup. Probe failure is never fatal: a conservative
//! fallback release is assumed and a warning recorded.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;
use tokio::process::Command;
use tracing::{debug, warn};

/// Release assumed when the probe fails; call syntax has not changed in
/// ways we depend on since this version.
pub const FALLBACK_VERSION: Version = Version::new(8, 10, 0);

static VERSION_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"version (\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("static regex"));

/// Parse a version out of the `-v` banner text.
pub(crate) fn parse_banner(banner: &str) -> Option<Version> {
	let captures = VERSION_RE.captures(banner)?;
	let part = |idx: usize| -> u64 {
		captures
			.get(idx)
			.and_then(|m| m.as_str().parse().ok())
			.unwrap_or(0)
	};
	Some(Version::new(part(1), part(2), part(3)))
}

/// Probe the prover binary for its release version.
///
/// Returns the fallback version when the binary cannot be run or prints an
/// unrecognized banner.
pub async fn detect_version(binary: &Path, working_dir: Option<&Path>) -> Version {
	let mut command = Command::new(binary);
	command.arg("-v");
	if let Some(dir) = working_dir {
		command.current_dir(dir);
	}
	let output = match command.output().await {
		Ok(output) => output,
		Err(err) => {
			warn!(binary = %binary.display(), error = %err, fallback = %FALLBACK_VERSION, "version probe failed, assuming fallback");
			return FALLBACK_VERSION;
		}
	};
	let banner = String::from_utf8_lossy(&output.stdout);
	match parse_banner(&banner) {
		Some(version) => {
			debug!(binary = %binary.display(), %version, "detected prover version");
			version
		}
		None => {
			warn!(binary = %binary.display(), fallback = %FALLBACK_VERSION, "unrecognized version banner, assuming fallback");
			FALLBACK_VERSION
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_standard_banner() {
		let banner = "The Coq Proof Assistant, version 8.13.2 (April 2021)\ncompiled on ...";
		assert_eq!(parse_banner(banner), Some(Version::new(8, 13, 2)));
	}

	#[test]
	fn test_parse_two_component_version() {
		assert_eq!(
			parse_banner("The Coq Proof Assistant, version 8.9"),
			Some(Version::new(8, 9, 0))
		);
	}

	#[test]
	fn test_unrecognized_banner_yields_none() {
		assert_eq!(parse_banner("not a banner"), None);
	}

	#[tokio::test]
	async fn test_probe_of_missing_binary_falls_back() {
		let version = detect_version(Path::new("/nonexistent/coqtop-probe"), None).await;
		assert_eq!(version, FALLBACK_VERSION);
	}
}
