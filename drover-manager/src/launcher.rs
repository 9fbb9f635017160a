//! Worker process launching

use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use drover_config::WorkersConfig;
use drover_messaging::WorkerChannel;

use crate::error::OrchestratorError;

/// Spawn the configured number of local worker processes with piped stdio
/// and hand their channels to the process messenger. Worker stderr is
/// inherited so worker logs reach the manager's terminal.
pub fn launch_workers(
    config: &WorkersConfig,
) -> Result<(Vec<Child>, Vec<WorkerChannel>), OrchestratorError> {
    let launch = config.launch.as_ref().ok_or_else(|| {
        OrchestratorError::Launch("no launch settings for locally spawned workers".into())
    })?;

    let mut children = Vec::new();
    let mut channels = Vec::new();
    for index in 1..=config.number {
        info!(program = %launch.program, "launching worker {index} of {}", config.number);
        let mut child = Command::new(&launch.program)
            .args(&launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OrchestratorError::Launch(e.to_string()))?;
        channels.push(WorkerChannel::from_child(&mut child)?);
        children.push(child);
    }
    Ok((children, channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_launch_settings() {
        let config = WorkersConfig {
            remote: true,
            ..Default::default()
        };
        assert!(matches!(
            launch_workers(&config),
            Err(OrchestratorError::Launch(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_program_fails() {
        let config = WorkersConfig {
            number: 1,
            launch: Some(drover_config::WorkerLaunchConfig {
                program: "/definitely/not/a/binary".into(),
                args: vec![],
            }),
            ..Default::default()
        };
        assert!(matches!(
            launch_workers(&config),
            Err(OrchestratorError::Launch(_))
        ));
    }
}
