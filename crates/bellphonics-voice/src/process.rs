//! Subprocess helpers shared by the external-engine backends.

use crate::error::VoiceError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum text input size (64 KiB) passed to an engine.
pub(crate) const MAX_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for one synthesis or playback process.
pub(crate) const PROCESS_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) fn check_input_size(text: &str) -> Result<(), VoiceError> {
    if text.len() > MAX_INPUT_BYTES {
        return Err(VoiceError::Tts(format!(
            "text exceeds maximum size: {} bytes (limit: {} bytes)",
            text.len(),
            MAX_INPUT_BYTES
        )));
    }
    Ok(())
}

/// Runs `command` to completion, optionally feeding `stdin`, and fails on a
/// non-zero exit. `label` names the engine in errors; `wrap` picks the error
/// variant.
pub(crate) async fn run(
    mut command: Command,
    label: &str,
    stdin: Option<String>,
    wrap: fn(String) -> VoiceError,
) -> Result<(), VoiceError> {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| wrap(format!("Failed to spawn {}: {}", label, e)))?;

    // Write stdin from a separate task so a full stderr pipe cannot deadlock us.
    let write_task = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => Some(tokio::spawn(async move {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await
        })),
        (Some(_), None) => return Err(wrap(format!("Failed to open {} stdin", label))),
        _ => None,
    };

    let output = tokio::time::timeout(PROCESS_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            wrap(format!(
                "{} timed out after {} seconds",
                label,
                PROCESS_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| wrap(format!("Failed to wait for {}: {}", label, e)))?;

    if let Some(task) = write_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(wrap(format!("Failed to write to {} stdin: {}", label, e))),
            Err(e) => return Err(wrap(format!("{} stdin task failed: {}", label, e))),
        }
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(wrap(format!("{} failed: {}", label, stderr.trim())));
    }
    Ok(())
}
