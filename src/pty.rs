//! Live passthrough of a child attached to a pseudo-terminal.

use crossterm::terminal;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use std::io::{self, IsTerminal, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::ExecError;
use crate::exit_status;
use crate::runner::Outcome;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

type SharedMaster = Arc<Mutex<Box<dyn MasterPty + Send>>>;

/// Run `program` on a fresh pseudo-terminal, copying its output to our
/// stdout as it arrives and forwarding stdin and window-size changes.
///
/// Only failing to set up the terminal is an error; a child that cannot be
/// started comes back as a failed `Outcome`.
pub fn run_attached(
    program: &str,
    args: &[String],
    working_dir: Option<&Path>,
) -> Result<Outcome, ExecError> {
    let pair = native_pty_system()
        .openpty(current_size())
        .map_err(|e| ExecError::Terminal(format!("failed to open pseudo-terminal: {}", e)))?;
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| ExecError::Terminal(format!("failed to read pseudo-terminal: {}", e)))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| ExecError::Terminal(format!("failed to write pseudo-terminal: {}", e)))?;

    let mut builder = CommandBuilder::new(program);
    builder.args(args);
    if let Some(dir) = working_dir.map(Path::to_path_buf).or_else(|| std::env::current_dir().ok()) {
        builder.cwd(dir);
    }

    debug!(program, ?args, "spawning process on pseudo-terminal");
    let mut child = match pair.slave.spawn_command(builder) {
        Ok(child) => child,
        Err(err) => {
            warn!(program, error = %err, "failed to start process");
            return Ok(Outcome::spawn_failure(format!(
                "failed to start '{}': {}",
                program, err
            )));
        }
    };
    // The child holds its own copy; ours would keep the master from seeing EOF.
    drop(pair.slave);

    let master: SharedMaster = Arc::new(Mutex::new(pair.master));
    let stop = Arc::new(AtomicBool::new(false));

    let raw_mode = RawModeGuard::enable();
    let output_handle = spawn_output_copy(reader);
    let input_handle = spawn_input_pump(writer, Arc::clone(&stop));
    let resize_handle = spawn_resize_forwarder(Arc::clone(&master), Arc::clone(&stop));

    let status = child.wait();

    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = resize_handle {
        let _ = handle.join();
    }
    if let Some(handle) = input_handle {
        if let Ok(Err(err)) = handle.join() {
            debug!(error = %err, "stdin forwarding stopped");
        }
    }
    let _ = output_handle.join();
    drop(raw_mode);

    let outcome = match status {
        Ok(status) => {
            let (code, precise) = exit_status::pty_exit_code(&status);
            Outcome {
                exit_code: Some(code),
                precise,
                stdout: String::new(),
                stderr: String::new(),
                combined: String::new(),
                success: status.success(),
            }
        }
        Err(err) => Outcome {
            exit_code: None,
            precise: false,
            stdout: String::new(),
            stderr: format!("wait: {}", err),
            combined: String::new(),
            success: false,
        },
    };
    debug!(program, code = ?outcome.exit_code, success = outcome.success, "process finished");
    Ok(outcome)
}

/// Size of the caller's terminal, or 80x24 when there is none.
fn current_size() -> PtySize {
    let (cols, rows) = terminal::size().unwrap_or((80, 24));
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    fn enable() -> Self {
        if !io::stdin().is_terminal() {
            return Self { enabled: false };
        }

        static INIT_CTRL_C: Once = Once::new();
        INIT_CTRL_C.call_once(|| {
            let _ = ctrlc::set_handler(move || {
                // Restore the terminal before dying from an outside SIGINT.
                let _ = terminal::disable_raw_mode();
                std::process::exit(130);
            });
        });

        match terminal::enable_raw_mode() {
            Ok(()) => Self { enabled: true },
            Err(err) => {
                warn!(error = %err, "could not switch terminal to raw mode");
                Self { enabled: false }
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            let _ = terminal::disable_raw_mode();
        }
    }
}

fn spawn_output_copy(mut reader: Box<dyn Read + Send>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            // Linux reports EIO once the slave side is closed.
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let mut handle = io::stdout();
            if handle.write_all(&buffer[..bytes_read]).is_err() || handle.flush().is_err() {
                break;
            }
        }
    })
}

#[cfg(unix)]
fn spawn_input_pump(
    mut writer: Box<dyn Write + Send>,
    stop: Arc<AtomicBool>,
) -> Option<JoinHandle<io::Result<()>>> {
    Some(thread::spawn(move || -> io::Result<()> {
        let fd = libc::STDIN_FILENO;
        let mut buffer = [0u8; 1024];
        while !stop.load(Ordering::SeqCst) {
            let mut poll_fd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: `poll_fd` is a valid pollfd that outlives the call, and
            // the count of 1 matches it.
            let ready = unsafe { libc::poll(&mut poll_fd, 1, POLL_INTERVAL.as_millis() as libc::c_int) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if ready == 0 {
                continue;
            }
            if poll_fd.revents & libc::POLLIN == 0 {
                // Hang-up or invalid descriptor: nothing more to forward.
                return Ok(());
            }
            // Read the descriptor directly so no bytes sit in a std buffer
            // after this run ends.
            // SAFETY: the buffer is valid for `buffer.len()` writable bytes.
            let n = unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if n == 0 {
                return Ok(());
            }
            writer.write_all(&buffer[..n as usize])?;
            writer.flush()?;
        }
        Ok(())
    }))
}

#[cfg(not(unix))]
fn spawn_input_pump(
    mut writer: Box<dyn Write + Send>,
    _stop: Arc<AtomicBool>,
) -> Option<JoinHandle<io::Result<()>>> {
    // A blocking console read cannot be interrupted; the thread ends on the
    // first write after the child has gone.
    thread::spawn(move || -> io::Result<()> {
        let mut stdin = io::stdin();
        let mut buffer = [0u8; 1024];
        loop {
            let n = stdin.read(&mut buffer)?;
            if n == 0 {
                return Ok(());
            }
            writer.write_all(&buffer[..n])?;
            writer.flush()?;
        }
    });
    None
}

fn spawn_resize_forwarder(master: SharedMaster, stop: Arc<AtomicBool>) -> Option<JoinHandle<()>> {
    let mut watcher = match ResizeWatcher::install() {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(error = %err, "terminal resize forwarding disabled");
            return None;
        }
    };
    Some(thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
            if !watcher.resized() {
                continue;
            }
            let size = current_size();
            debug!(rows = size.rows, cols = size.cols, "forwarding terminal resize");
            let resized = master
                .lock()
                .map_err(|_| anyhow::anyhow!("pseudo-terminal lock poisoned"))
                .and_then(|master| master.resize(size));
            if let Err(err) = resized {
                warn!(error = %err, "failed to resize pseudo-terminal");
            }
        }
        drop(watcher);
    }))
}

#[cfg(unix)]
static RESIZE_PENDING: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_window_change(_: libc::c_int) {
    RESIZE_PENDING.store(true, Ordering::SeqCst);
}

/// Catches SIGWINCH for the lifetime of one stream run and restores the
/// previous disposition afterwards.
#[cfg(unix)]
struct ResizeWatcher {
    previous: libc::sigaction,
}

#[cfg(unix)]
impl ResizeWatcher {
    fn install() -> io::Result<Self> {
        RESIZE_PENDING.store(false, Ordering::SeqCst);
        // SAFETY: both sigaction structs are zero-initialised plain data owned
        // by this frame, and the handler only stores to an atomic, which is
        // async-signal-safe.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_window_change as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            let mut previous: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(libc::SIGWINCH, &action, &mut previous) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { previous })
        }
    }

    fn resized(&mut self) -> bool {
        RESIZE_PENDING.swap(false, Ordering::SeqCst)
    }
}

#[cfg(unix)]
impl Drop for ResizeWatcher {
    fn drop(&mut self) {
        // SAFETY: `previous` was filled in by the sigaction call in `install`.
        unsafe {
            libc::sigaction(libc::SIGWINCH, &self.previous, std::ptr::null_mut());
        }
    }
}

/// Without SIGWINCH, compare the console size on every tick.
#[cfg(not(unix))]
struct ResizeWatcher {
    last: (u16, u16),
}

#[cfg(not(unix))]
impl ResizeWatcher {
    fn install() -> io::Result<Self> {
        Ok(Self {
            last: terminal::size()?,
        })
    }

    fn resized(&mut self) -> bool {
        match terminal::size() {
            Ok(size) if size != self.last => {
                self.last = size;
                true
            }
            _ => false,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    // Each run installs and restores the process-wide SIGWINCH handler.
    static SIGNAL_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn reports_exit_status_without_capturing() {
        let _guard = SIGNAL_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let outcome = run_attached("sh", &["-c".to_string(), "exit 3".to_string()], None).unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.success);
        assert!(outcome.combined.is_empty());
    }

    #[test]
    fn successful_child_reports_zero() {
        let _guard = SIGNAL_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let outcome = run_attached("true", &[], None).unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.success);
    }

    #[test]
    fn window_change_signal_is_observed_and_handler_restored() {
        let _guard = SIGNAL_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let mut watcher = ResizeWatcher::install().unwrap();
        assert!(!watcher.resized());
        // SAFETY: the handler installed above only sets an atomic flag.
        unsafe {
            libc::raise(libc::SIGWINCH);
        }
        assert!(watcher.resized());
        assert!(!watcher.resized());
        drop(watcher);
    }

    #[test]
    fn signal_death_matches_capture_mode() {
        let _guard = SIGNAL_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let args = vec!["-c".to_string(), "kill -9 $$".to_string()];
        let streamed = run_attached("sh", &args, None).unwrap();
        let captured = crate::runner::ProcessRunner::new().run("sh", &args, crate::runner::Input::Null);
        assert_eq!(streamed.exit_code, Some(137));
        assert_eq!(streamed.exit_code, captured.exit_code);
        assert!(streamed.precise);
        assert!(!streamed.success);
    }

    #[test]
    fn missing_binary_is_a_failed_outcome() {
        let _guard = SIGNAL_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let outcome = run_attached("cmdvault-no-such-binary", &[], None).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.stderr.contains("failed to start 'cmdvault-no-such-binary'"));
    }
}
