// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for the streaming worker
//!
//! The controller owns the worker thread. Resources (capture handle, sink
//! handle) are created on that thread during initialization so that they are
//! owned and released by the thread that uses them. The outcome of
//! initialization is reported back through a one-shot handshake channel,
//! which lets the caller surface startup errors synchronously.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Runs the exit hook when dropped, including during unwinding
struct ExitGuard<X: FnOnce()> {
    hook: Option<X>,
}

impl<X: FnOnce()> Drop for ExitGuard<X> {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook();
        }
    }
}

/// Controller for a frame loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let stop = Arc::new(AtomicBool::new(false));
/// let (controller, ready) = CaptureLoopController::start_with_init(
///     "stream-worker",
///     Arc::clone(&stop),
///     || open_devices(),
///     |devices| devices.step(),
///     || mark_idle(),
/// );
/// ready.recv_timeout(timeout)??;
/// ```
pub struct CaptureLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Start a loop with initialization on the worker thread
    ///
    /// `init_fn` runs once; its outcome is sent through the returned
    /// receiver. If it fails the loop never runs. `loop_fn` is then called
    /// until it returns `LoopAction::Stop` or `stop_signal` is raised.
    /// `on_exit` runs last on every path out of the thread, including a
    /// failed init or a panic in `loop_fn`.
    ///
    /// # Arguments
    ///
    /// * `name` - Thread name, also used in logging
    /// * `stop_signal` - Shared flag checked before every iteration
    /// * `init_fn` - Initialization closure, returns Ok(state) or Err(error)
    /// * `loop_fn` - Loop closure that receives the state and returns LoopAction
    /// * `on_exit` - Hook run when the thread finishes
    pub fn start_with_init<S, E, I, F, X>(
        name: &str,
        stop_signal: Arc<AtomicBool>,
        init_fn: I,
        mut loop_fn: F,
        on_exit: X,
    ) -> (Self, Receiver<Result<(), E>>)
    where
        S: 'static,
        E: Send + 'static,
        I: FnOnce() -> Result<S, E> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
        X: FnOnce() + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting frame loop");

        let body = move || {
            let _exit = ExitGuard {
                hook: Some(on_exit),
            };
            debug!(name = %name_clone, "Frame loop thread started, initializing...");

            let mut state = match init_fn() {
                Ok(s) => {
                    debug!(name = %name_clone, "Initialization successful");
                    // Receiver may have given up waiting; nothing to report to then
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    warn!(name = %name_clone, "Initialization failed");
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            loop {
                if stop_signal_clone.load(Ordering::SeqCst) {
                    debug!(name = %name_clone, "Stop signal received");
                    break;
                }

                match loop_fn(&mut state) {
                    LoopAction::Continue => {}
                    LoopAction::Stop => {
                        debug!(name = %name_clone, "Loop requested stop");
                        break;
                    }
                }
            }

            // Release loop resources before the exit hook runs
            drop(state);
            info!(name = %name_clone, "Frame loop thread exiting");
        };

        let thread_handle = match thread::Builder::new().name(name.to_string()).spawn(body) {
            Ok(handle) => Some(handle),
            Err(e) => {
                // The closure (and with it the handshake sender) is dropped,
                // so the receiver observes a disconnect
                warn!(name = %name, error = %e, "Failed to spawn frame loop thread");
                None
            }
        };

        (
            Self {
                thread_handle,
                stop_signal,
                name: name.to_string(),
            },
            ready_rx,
        )
    }

    /// Check if the loop thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Get a clone of the stop signal for external use
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting frame loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for frame loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Frame loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Frame loop thread finished");
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_loop_runs_until_stop_action() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let (mut controller, ready) = CaptureLoopController::start_with_init(
            "test-loop",
            flag(),
            || Ok::<_, String>(()),
            move |_| {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                if count >= 10 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            },
            || {},
        );

        assert_eq!(ready.recv().unwrap(), Ok(()));
        controller.join();
        assert_eq!(counter.load(Ordering::SeqCst), 11); // 0-10 inclusive
    }

    #[test]
    fn test_external_stop_signal() {
        let stop = flag();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let (mut controller, _ready) = CaptureLoopController::start_with_init(
            "test-stop",
            Arc::clone(&stop),
            || Ok::<_, String>(()),
            move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                LoopAction::Continue
            },
            || {},
        );

        thread::sleep(Duration::from_millis(30));
        stop.store(true, Ordering::SeqCst);
        controller.join();
        assert!(counter.load(Ordering::SeqCst) > 0);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_init_state_reaches_loop() {
        let result = Arc::new(AtomicU32::new(0));
        let result_clone = Arc::clone(&result);

        let (mut controller, _ready) = CaptureLoopController::start_with_init(
            "test-init",
            flag(),
            || Ok::<_, String>(42u32),
            move |state| {
                result_clone.store(*state, Ordering::SeqCst);
                LoopAction::Stop
            },
            || {},
        );

        controller.join();
        assert_eq!(result.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_init_failure_reported_and_exit_hook_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let exited = Arc::new(AtomicBool::new(false));
        let exited_clone = Arc::clone(&exited);

        let (mut controller, ready) = CaptureLoopController::start_with_init(
            "test-fail-init",
            flag(),
            || Err::<(), _>("Init failed".to_string()),
            move |_| {
                ran_clone.store(true, Ordering::SeqCst);
                LoopAction::Stop
            },
            move || exited_clone.store(true, Ordering::SeqCst),
        );

        assert_eq!(ready.recv().unwrap(), Err("Init failed".to_string()));
        controller.join();
        assert!(!ran.load(Ordering::SeqCst));
        assert!(exited.load(Ordering::SeqCst));
    }

    #[test]
    fn test_exit_hook_runs_after_panic() {
        let exited = Arc::new(AtomicBool::new(false));
        let exited_clone = Arc::clone(&exited);

        let (mut controller, _ready) = CaptureLoopController::start_with_init(
            "test-panic",
            flag(),
            || Ok::<_, String>(()),
            |_| panic!("worker blew up"),
            move || exited_clone.store(true, Ordering::SeqCst),
        );

        controller.join();
        assert!(exited.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_stops_loop() {
        let (controller, _ready) = CaptureLoopController::start_with_init(
            "test-drop",
            flag(),
            || Ok::<_, String>(()),
            |_| {
                thread::sleep(Duration::from_millis(10));
                LoopAction::Continue
            },
            || {},
        );

        let stop = controller.stop_signal();
        drop(controller);
        assert!(stop.load(Ordering::SeqCst));
    }
}
