//! Thin, platform-specific process primitives used by the process manager.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::*;

#[cfg(not(unix))]
mod fallback {
    use std::io;
    use std::process::Command;

    pub fn prepare_command(_cmd: &mut Command) -> io::Result<()> {
        Ok(())
    }

    pub fn prepare_command_tokio(_cmd: &mut tokio::process::Command) -> io::Result<()> {
        Ok(())
    }

    pub fn process_alive(_pid: u32) -> bool {
        false
    }

    pub fn send_sigterm(_pid: u32) {}
    pub fn send_sigkill(_pid: u32) {}
    pub fn terminate_process(_pid: u32) {}
}
#[cfg(not(unix))]
pub use fallback::*;
