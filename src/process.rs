//! Spawning shell commands.

#[cfg(unix)]
pub use crate::process_posix::run_command;

/// Portable fallback: runs through the platform shell with std::process,
/// stdout before stderr.
#[cfg(not(unix))]
pub fn run_command(cmdline: &str, output: &mut Vec<u8>) -> anyhow::Result<i32> {
    let mut cmd = std::process::Command::new("cmd").arg("/C").arg(cmdline).output()?;
    output.append(&mut cmd.stdout);
    output.append(&mut cmd.stderr);
    Ok(cmd.status.code().unwrap_or(1))
}
