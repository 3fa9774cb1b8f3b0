//! Implements run_command on posix using posix_spawn.
//! See run_command comments for why.

use anyhow::Context;
use std::ffi::CString;
use std::io::Read;
use std::os::fd::FromRawFd;

/// posix_spawn and friends return the error number directly.
fn check_spawn(func: &str, ret: libc::c_int) -> anyhow::Result<()> {
    if ret != 0 {
        return Err(std::io::Error::from_raw_os_error(ret)).context(func.to_owned());
    }
    Ok(())
}

/// Classic syscalls return -1 and set errno.
fn check_errno(func: &str, ret: libc::c_int) -> anyhow::Result<()> {
    if ret < 0 {
        return Err(std::io::Error::last_os_error()).context(func.to_owned());
    }
    Ok(())
}

/// Wraps libc::posix_spawn_file_actions_t, in particular to implement Drop.
struct PosixSpawnFileActions(libc::posix_spawn_file_actions_t);

impl PosixSpawnFileActions {
    fn new() -> anyhow::Result<Self> {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            check_spawn(
                "posix_spawn_file_actions_init",
                libc::posix_spawn_file_actions_init(&mut actions),
            )?;
            Ok(Self(actions))
        }
    }

    fn as_ptr(&mut self) -> *mut libc::posix_spawn_file_actions_t {
        &mut self.0
    }

    fn adddup2(&mut self, fd: i32, newfd: i32) -> anyhow::Result<()> {
        unsafe {
            check_spawn(
                "posix_spawn_file_actions_adddup2",
                libc::posix_spawn_file_actions_adddup2(&mut self.0, fd, newfd),
            )
        }
    }

    fn addclose(&mut self, fd: i32) -> anyhow::Result<()> {
        unsafe {
            check_spawn(
                "posix_spawn_file_actions_addclose",
                libc::posix_spawn_file_actions_addclose(&mut self.0, fd),
            )
        }
    }
}

impl Drop for PosixSpawnFileActions {
    fn drop(&mut self) {
        unsafe { libc::posix_spawn_file_actions_destroy(&mut self.0) };
    }
}

extern "C" {
    static environ: *const *mut libc::c_char;
}

/// Run `cmdline` under /bin/sh, appending its combined stdout and stderr to
/// `output`.  Returns the exit code, or 128 + the signal number if the shell
/// was killed by a signal.
pub fn run_command(cmdline: &str, output: &mut Vec<u8>) -> anyhow::Result<i32> {
    // Spawn the subprocess using posix_spawn with output redirected to the pipe.
    // We want to feed both stdout and stderr into the same pipe, which cannot
    // be done with the existing std::process API.
    let cmdline_nul =
        CString::new(cmdline).with_context(|| format!("command contains NUL: {:?}", cmdline))?;
    let (pid, mut pipe) = unsafe {
        let mut pipe: [libc::c_int; 2] = [0; 2];
        check_errno("pipe", libc::pipe(pipe.as_mut_ptr()))?;
        let pipe_read = std::fs::File::from_raw_fd(pipe[0]);
        let write_fd = pipe[1];

        let spawned = (|| -> anyhow::Result<libc::pid_t> {
            let mut actions = PosixSpawnFileActions::new()?;
            // stdout/stderr => pipe
            actions.adddup2(write_fd, 1)?;
            actions.adddup2(write_fd, 2)?;
            // close pipe in child
            actions.addclose(pipe[0])?;
            actions.addclose(write_fd)?;

            let path = b"/bin/sh\0".as_ptr() as *const libc::c_char;
            let argv: [*mut libc::c_char; 4] = [
                path as *mut libc::c_char,
                b"-c\0".as_ptr() as *mut libc::c_char,
                cmdline_nul.as_ptr() as *mut libc::c_char,
                std::ptr::null_mut(),
            ];
            let mut pid: libc::pid_t = 0;
            check_spawn(
                "posix_spawn",
                libc::posix_spawn(
                    &mut pid,
                    path,
                    actions.as_ptr(),
                    std::ptr::null(),
                    argv.as_ptr(),
                    environ,
                ),
            )?;
            Ok(pid)
        })();
        // The write end belongs to the child now (or to nobody, on failure).
        libc::close(write_fd);
        (spawned?, pipe_read)
    };

    pipe.read_to_end(output)?;

    let status = loop {
        let mut status: libc::c_int = 0;
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err).context("waitpid");
        }
        break status;
    };

    if libc::WIFEXITED(status) {
        Ok(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        let sig = libc::WTERMSIG(status);
        match sig {
            libc::SIGINT => output.extend_from_slice(b"interrupted\n"),
            _ => output.extend_from_slice(format!("signal {}\n", sig).as_bytes()),
        }
        Ok(128 + sig)
    } else {
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_and_output() -> anyhow::Result<()> {
        let mut output = Vec::new();
        assert_eq!(run_command("echo out; echo err >&2", &mut output)?, 0);
        assert_eq!(String::from_utf8_lossy(&output), "out\nerr\n");

        output.clear();
        assert_eq!(run_command("exit 7", &mut output)?, 7);
        Ok(())
    }

    #[test]
    fn killed_by_signal() -> anyhow::Result<()> {
        let mut output = Vec::new();
        let status = run_command("kill -TERM $$", &mut output)?;
        assert_eq!(status, 128 + libc::SIGTERM);
        assert_eq!(String::from_utf8_lossy(&output), format!("signal {}\n", libc::SIGTERM));
        Ok(())
    }
}
