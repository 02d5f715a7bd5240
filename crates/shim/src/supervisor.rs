//! Supervising actor that owns the pipeline child process.

use std::process::Stdio;

use async_trait::async_trait;
use telemetrify_worker::{Actor, ActorContext, ActorExit, ActorFlow, ActorHandle, ActorSpec, TaskClass, spawn_actor};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::action::ControlAction;
use crate::config::ShimConfig;
use crate::error::ShimError;

enum SupervisorCmd {
	Action(ControlAction),
	ChildPid { reply: oneshot::Sender<Option<u32>> },
}

struct ProcessSupervisor {
	config: ShimConfig,
	child: Option<Child>,
	starts: u64,
}

impl ProcessSupervisor {
	fn new(config: ShimConfig) -> Self {
		Self {
			config,
			child: None,
			starts: 0,
		}
	}

	/// Returns the child if it is still running, reaping it otherwise.
	fn running(&mut self) -> Option<&mut Child> {
		let exited = match self.child.as_mut()?.try_wait() {
			Ok(None) => false,
			Ok(Some(status)) => {
				tracing::info!(?status, "shim.child_exited");
				true
			}
			Err(err) => {
				tracing::warn!(error = %err, "shim.child_wait_failed");
				true
			}
		};
		if exited {
			self.child = None;
		}
		self.child.as_mut()
	}

	fn start(&mut self) {
		if let Some(child) = self.running() {
			tracing::info!(pid = ?child.id(), "shim.already_running");
			return;
		}

		let program = &self.config.program;
		tracing::info!(program = %program.display(), args = ?self.config.args, "shim.starting");
		let spawned = Command::new(program)
			.args(&self.config.args)
			.stdin(Stdio::null())
			.stdout(Stdio::inherit())
			.stderr(Stdio::inherit())
			.kill_on_drop(true)
			.spawn();
		match spawned {
			Ok(child) => {
				self.starts += 1;
				tracing::info!(pid = ?child.id(), starts = self.starts, "shim.started");
				self.child = Some(child);
			}
			Err(err) => {
				tracing::error!(program = %program.display(), error = %err, "shim.spawn_failed");
			}
		}
	}

	async fn stop(&mut self) {
		if self.running().is_none() {
			tracing::debug!("shim.not_running");
			return;
		}
		let Some(mut child) = self.child.take() else {
			return;
		};

		let pid = child.id();
		tracing::info!(?pid, "shim.stopping");
		if !terminate(&mut child) {
			tracing::warn!(?pid, "shim.terminate_failed");
		}

		match tokio::time::timeout(self.config.stop_timeout_duration(), child.wait()).await {
			Ok(Ok(status)) => tracing::info!(?pid, ?status, "shim.stopped"),
			Ok(Err(err)) => tracing::warn!(?pid, error = %err, "shim.child_wait_failed"),
			Err(_) => {
				tracing::warn!(?pid, timeout_ms = self.config.stop_timeout_ms, "shim.stop_timeout; killing");
				if let Err(err) = child.kill().await {
					tracing::error!(?pid, error = %err, "shim.kill_failed");
				}
			}
		}
	}
}

/// Asks the child to exit.
#[cfg(unix)]
fn terminate(child: &mut Child) -> bool {
	use nix::sys::signal::{self, Signal};
	use nix::unistd::Pid;

	let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
		return false;
	};
	signal::kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> bool {
	child.start_kill().is_ok()
}

#[async_trait]
impl Actor for ProcessSupervisor {
	type Cmd = SupervisorCmd;

	async fn on_start(&mut self, _ctx: &mut ActorContext<Self::Cmd>) -> Result<(), String> {
		self.start();
		Ok(())
	}

	async fn handle(&mut self, cmd: Self::Cmd, _ctx: &mut ActorContext<Self::Cmd>) -> Result<ActorFlow, String> {
		match cmd {
			SupervisorCmd::Action(action) => {
				tracing::debug!(%action, "shim.action");
				match action {
					ControlAction::Start => self.start(),
					ControlAction::Stop => self.stop().await,
					ControlAction::Restart => {
						self.stop().await;
						self.start();
					}
					ControlAction::Teardown => {
						self.stop().await;
						return Ok(ActorFlow::Stop);
					}
				}
			}
			SupervisorCmd::ChildPid { reply } => {
				let _ = reply.send(self.running().and_then(|child| child.id()));
			}
		}
		Ok(ActorFlow::Continue)
	}

	async fn on_stop(&mut self, _ctx: &mut ActorContext<Self::Cmd>) {
		self.stop().await;
	}
}

/// Handle to the supervising loop.
///
/// The child is started as soon as the loop runs. Actions are processed in
/// the order they were sent.
pub struct Supervisor {
	actor: ActorHandle<SupervisorCmd>,
}

impl Supervisor {
	/// Starts supervising. Must be called from within a tokio runtime.
	pub fn spawn(config: ShimConfig) -> Self {
		let actor = spawn_actor(ActorSpec::new("shim.supervisor", TaskClass::Supervision), ProcessSupervisor::new(config));
		Self { actor }
	}

	pub async fn send(&self, action: ControlAction) -> Result<(), ShimError> {
		self.actor.send(SupervisorCmd::Action(action)).await.map_err(|_| ShimError::SupervisorGone)
	}

	/// Pid of the running child, if any.
	pub async fn child_pid(&self) -> Result<Option<u32>, ShimError> {
		let (reply, rx) = oneshot::channel();
		self.actor
			.send(SupervisorCmd::ChildPid { reply })
			.await
			.map_err(|_| ShimError::SupervisorGone)?;
		rx.await.map_err(|_| ShimError::SupervisorGone)
	}

	/// Waits for the supervising loop to end.
	pub async fn join(&self) -> Option<ActorExit> {
		self.actor.join().await
	}
}

#[cfg(all(test, unix))]
mod tests {
	use std::time::Duration;

	use super::*;

	fn sleeper() -> ShimConfig {
		ShimConfig::new("sleep").args(["30"]).stop_timeout(Duration::from_secs(5))
	}

	#[tokio::test]
	async fn starts_on_spawn_and_follows_actions() {
		let supervisor = Supervisor::spawn(sleeper());
		let first = supervisor.child_pid().await.unwrap();
		assert!(first.is_some());

		supervisor.send(ControlAction::Start).await.unwrap();
		assert_eq!(supervisor.child_pid().await.unwrap(), first);

		supervisor.send(ControlAction::Restart).await.unwrap();
		let second = supervisor.child_pid().await.unwrap();
		assert!(second.is_some());
		assert_ne!(second, first);

		supervisor.send(ControlAction::Stop).await.unwrap();
		assert_eq!(supervisor.child_pid().await.unwrap(), None);

		supervisor.send(ControlAction::Start).await.unwrap();
		assert!(supervisor.child_pid().await.unwrap().is_some());

		supervisor.send(ControlAction::Teardown).await.unwrap();
		assert_eq!(supervisor.join().await, Some(ActorExit::Stopped));
		assert!(matches!(supervisor.child_pid().await, Err(ShimError::SupervisorGone)));
	}

	#[tokio::test]
	async fn child_ignoring_sigterm_is_killed() {
		let config = ShimConfig::new("sh")
			.args(["-c", "trap '' TERM; exec sleep 30"])
			.stop_timeout(Duration::from_millis(200));
		let supervisor = Supervisor::spawn(config);
		assert!(supervisor.child_pid().await.unwrap().is_some());
		// Let the shell install its trap before signalling.
		tokio::time::sleep(Duration::from_millis(100)).await;

		let stopped = tokio::time::timeout(Duration::from_secs(5), async {
			supervisor.send(ControlAction::Stop).await.unwrap();
			supervisor.child_pid().await.unwrap()
		})
		.await
		.unwrap();
		assert_eq!(stopped, None);
		supervisor.send(ControlAction::Teardown).await.unwrap();
	}

	#[tokio::test]
	async fn spawn_failure_keeps_supervising() {
		let supervisor = Supervisor::spawn(ShimConfig::new("/nonexistent/telemetrify-pipeline"));
		assert_eq!(supervisor.child_pid().await.unwrap(), None);

		supervisor.send(ControlAction::Restart).await.unwrap();
		assert_eq!(supervisor.child_pid().await.unwrap(), None);

		supervisor.send(ControlAction::Teardown).await.unwrap();
		assert_eq!(supervisor.join().await, Some(ActorExit::Stopped));
	}

	#[tokio::test]
	async fn exited_child_is_restarted_by_start() {
		let supervisor = Supervisor::spawn(ShimConfig::new("true"));
		let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
		while supervisor.child_pid().await.unwrap().is_some() {
			assert!(tokio::time::Instant::now() < deadline, "child never exited");
			tokio::time::sleep(Duration::from_millis(10)).await;
		}

		supervisor.send(ControlAction::Start).await.unwrap();
		supervisor.send(ControlAction::Teardown).await.unwrap();
		assert_eq!(supervisor.join().await, Some(ActorExit::Stopped));
	}
}
