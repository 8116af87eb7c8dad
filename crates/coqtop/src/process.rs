//! Spawning and supervising the prover process.
//!
//! The prover does not speak its protocol over stdio: at startup it connects
//! back to TCP endpoints named on its command line, one read port and one
//! write port per channel (`HOST:READPORT:WRITEPORT`). The listeners must
//! therefore exist *before* the process is spawned. Four connections are
//! accepted in all: the main channel pair carrying the protocol, and a
//! control channel pair that stays open but unused (closing it makes some
//! releases exit).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use semver::{Version, VersionReq};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};
use vernac_protocol::{
	EditId, Goals, OptionValue, ProtocolVariant, RouteId, StateId, Status,
};

use crate::session::{AddResult, CoqtopEvent, EditAtFocus, IdeSession, Prover};
use crate::{CallError, CoqtopConfig, Error, Result, detect_version};

const HANDSHAKE_WINDOW: Duration = Duration::from_secs(10);
const QUIT_WINDOW: Duration = Duration::from_secs(1);

/// The resolved launch command for a prover release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProverCommand {
	pub binary: PathBuf,
	pub args: Vec<String>,
}

impl ProverCommand {
	/// Pick binary and arguments for `version`.
	///
	/// 8.9 moved the IDE protocol into a dedicated `coqidetop` binary;
	/// before that, `coqtop -ideslave` served it. 8.10 added `-topfile` so
	/// the script is elaborated under its own module name.
	pub fn for_version(
		config: &CoqtopConfig,
		version: &Version,
		script_path: Option<&Path>,
		main_channel: &str,
		control_channel: &str,
	) -> Self {
		let at_least = |range: &str| {
			VersionReq::parse(range).expect("static version range").matches(version)
		};
		let mut args = vec![
			"-main-channel".to_owned(),
			main_channel.to_owned(),
			"-control-channel".to_owned(),
			control_channel.to_owned(),
		];
		let binary = if at_least(">= 8.9") {
			config.coqidetop_bin()
		} else {
			args.push("-ideslave".to_owned());
			config.coqtop_bin()
		};
		args.push("-async-proofs".to_owned());
		args.push("on".to_owned());
		args.extend(config.args.iter().cloned());
		if at_least(">= 8.10") {
			if let Some(path) = script_path {
				args.push("-topfile".to_owned());
				args.push(path.display().to_string());
			}
		}
		Self { binary, args }
	}
}

struct ChannelEndpoints {
	main_r: TcpListener,
	main_w: TcpListener,
	control_r: TcpListener,
	control_w: TcpListener,
}

impl ChannelEndpoints {
	async fn bind() -> Result<Self> {
		let bind = || TcpListener::bind("127.0.0.1:0");
		Ok(Self {
			main_r: bind().await?,
			main_w: bind().await?,
			control_r: bind().await?,
			control_w: bind().await?,
		})
	}

	fn channel_arg(read: &TcpListener, write: &TcpListener) -> Result<String> {
		let read = read.local_addr()?;
		let write = write.local_addr()?;
		Ok(format!("{}:{}:{}", read.ip(), read.port(), write.port()))
	}

	fn main_arg(&self) -> Result<String> {
		Self::channel_arg(&self.main_r, &self.main_w)
	}

	fn control_arg(&self) -> Result<String> {
		Self::channel_arg(&self.control_r, &self.control_w)
	}

	async fn accept(self) -> Result<(TcpStream, TcpStream, TcpStream, TcpStream)> {
		let accept_all = async {
			let (main_r, _) = self.main_r.accept().await?;
			let (main_w, _) = self.main_w.accept().await?;
			let (control_r, _) = self.control_r.accept().await?;
			let (control_w, _) = self.control_w.accept().await?;
			Ok::<_, std::io::Error>((main_r, main_w, control_r, control_w))
		};
		match timeout(HANDSHAKE_WINDOW, accept_all).await {
			Ok(channels) => Ok(channels?),
			Err(_) => Err(Error::HandshakeTimeout),
		}
	}
}

/// A supervised prover process with a live [`IdeSession`].
pub struct CoqtopProcess {
	session: Arc<IdeSession>,
	version: Version,
	pid: Pid,
	kill_tx: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
	// The prover exits on some releases if the control channel drops.
	_control: (TcpStream, TcpStream),
}

impl CoqtopProcess {
	/// Probe the installed release, launch the prover, and wait for it to
	/// connect back.
	pub async fn spawn(
		config: &CoqtopConfig,
		script_path: Option<&Path>,
	) -> Result<(Self, mpsc::UnboundedReceiver<CoqtopEvent>)> {
		// The probe always uses `coqtop`: it exists on every release and
		// prints the same banner as `coqidetop`.
		let version = detect_version(&config.coqtop_bin(), config.cwd()).await;
		let variant = ProtocolVariant::for_version(&version);

		let endpoints = ChannelEndpoints::bind().await?;
		let command = ProverCommand::for_version(
			config,
			&version,
			script_path,
			&endpoints.main_arg()?,
			&endpoints.control_arg()?,
		);
		info!(binary = %command.binary.display(), %version, "launching prover");
		debug!(args = ?command.args, "prover arguments");

		let mut child = {
			let mut cmd = Command::new(&command.binary);
			cmd.args(&command.args)
				.envs(&config.env)
				.stdout(std::process::Stdio::piped())
				.stderr(std::process::Stdio::piped())
				.kill_on_drop(true);
			if let Some(dir) = config.cwd() {
				cmd.current_dir(dir);
			}
			cmd.spawn().map_err(|err| {
				let binary = command.binary.display().to_string();
				if err.kind() == std::io::ErrorKind::NotFound {
					Error::BinaryMissing { binary }
				} else {
					Error::Spawn { binary, source: err }
				}
			})?
		};
		let pid = Pid::from_raw(child.id().ok_or(Error::NotRunning)? as i32);

		let (main_r, main_w, control_r, control_w) = match endpoints.accept().await {
			Ok(channels) => channels,
			Err(err) => {
				let _ = child.kill().await;
				return Err(err);
			}
		};
		info!(%pid, "prover connected");

		if let Some(stdout) = child.stdout.take() {
			tokio::spawn(drain_output(stdout, "stdout"));
		}
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(drain_output(stderr, "stderr"));
		}

		let (session, events) = IdeSession::new(main_r, main_w, variant);
		let (kill_tx, kill_rx) = oneshot::channel();
		tokio::spawn(supervise(child, session.clone(), kill_rx));

		Ok((
			Self {
				session,
				version,
				pid,
				kill_tx: parking_lot::Mutex::new(Some(kill_tx)),
				_control: (control_r, control_w),
			},
			events,
		))
	}

	/// The probed prover release.
	pub fn version(&self) -> &Version {
		&self.version
	}
}

async fn drain_output(pipe: impl tokio::io::AsyncRead + Unpin, stream: &'static str) {
	use tokio::io::AsyncBufReadExt;

	let mut lines = tokio::io::BufReader::new(pipe).lines();
	while let Ok(Some(line)) = lines.next_line().await {
		debug!(stream, line, "prover output");
	}
}

async fn supervise(
	mut child: tokio::process::Child,
	session: Arc<IdeSession>,
	kill_rx: oneshot::Receiver<()>,
) {
	tokio::select! {
		status = child.wait() => match status {
			Ok(status) => {
				info!(%status, "prover exited");
				session.close(!status.success(), Some(format!("prover exited: {status}")));
			}
			Err(err) => {
				warn!(error = %err, "failed to reap prover");
				session.close(true, Some(err.to_string()));
			}
		},
		_ = kill_rx => {
			debug!("terminating prover");
			let _ = child.kill().await;
			session.close(false, None);
		}
	}
}

#[async_trait::async_trait]
impl Prover for CoqtopProcess {
	async fn init(&self, script_path: Option<String>) -> Result<StateId, CallError> {
		self.session.init(script_path).await
	}

	async fn add(
		&self,
		command: &str,
		edit_id: EditId,
		state_id: StateId,
		verbose: bool,
	) -> Result<AddResult, CallError> {
		self.session.add(command, edit_id, state_id, verbose).await
	}

	async fn edit_at(&self, state_id: StateId) -> Result<Option<EditAtFocus>, CallError> {
		self.session.edit_at(state_id).await
	}

	async fn goal(&self) -> Result<Option<Goals>, CallError> {
		self.session.goal().await
	}

	async fn status(&self, force: bool) -> Result<Status, CallError> {
		self.session.status(force).await
	}

	async fn query(
		&self,
		route: RouteId,
		text: &str,
		state_id: StateId,
	) -> Result<(), CallError> {
		self.session.query(route, text, state_id).await
	}

	async fn set_options(
		&self,
		options: Vec<(Vec<String>, OptionValue)>,
	) -> Result<(), CallError> {
		self.session.set_options(options).await
	}

	fn interrupt(&self) -> bool {
		if self.session.is_dead() {
			return false;
		}
		// The command channel is busy while a command runs; the only way to
		// preempt it is a signal to the process itself.
		debug!(pid = %self.pid, "sending SIGINT");
		signal::kill(self.pid, Signal::SIGINT).is_ok()
	}

	fn is_running(&self) -> bool {
		!self.session.is_dead()
	}

	async fn dispose(&self) {
		if !self.session.is_dead() {
			// Ask politely first; not every release honors Quit promptly.
			let _ = timeout(QUIT_WINDOW, self.session.quit()).await;
		}
		if let Some(kill_tx) = self.kill_tx.lock().take() {
			let _ = kill_tx.send(());
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn config() -> CoqtopConfig {
		CoqtopConfig {
			bin_path: PathBuf::from("/opt/coq/bin"),
			..CoqtopConfig::default()
		}
	}

	#[test]
	fn test_modern_release_uses_coqidetop_and_topfile() {
		let command = ProverCommand::for_version(
			&config(),
			&Version::new(8, 13, 2),
			Some(Path::new("/work/Foo.v")),
			"127.0.0.1:4000:4001",
			"127.0.0.1:4002:4003",
		);
		assert_eq!(command.binary, PathBuf::from("/opt/coq/bin/coqidetop"));
		assert_eq!(
			command.args,
			vec![
				"-main-channel",
				"127.0.0.1:4000:4001",
				"-control-channel",
				"127.0.0.1:4002:4003",
				"-async-proofs",
				"on",
				"-topfile",
				"/work/Foo.v",
			]
		);
	}

	#[test]
	fn test_legacy_release_uses_ideslave_without_topfile() {
		let command = ProverCommand::for_version(
			&config(),
			&Version::new(8, 8, 0),
			Some(Path::new("/work/Foo.v")),
			"127.0.0.1:4000:4001",
			"127.0.0.1:4002:4003",
		);
		assert_eq!(command.binary, PathBuf::from("/opt/coq/bin/coqtop"));
		assert!(command.args.contains(&"-ideslave".to_owned()));
		assert!(!command.args.iter().any(|a| a == "-topfile"));
	}

	#[test]
	fn test_intermediate_release_uses_coqidetop_without_topfile() {
		let command = ProverCommand::for_version(
			&config(),
			&Version::new(8, 9, 1),
			Some(Path::new("/work/Foo.v")),
			"127.0.0.1:4000:4001",
			"127.0.0.1:4002:4003",
		);
		assert_eq!(command.binary, PathBuf::from("/opt/coq/bin/coqidetop"));
		assert!(!command.args.iter().any(|a| a == "-topfile"));
	}
}
