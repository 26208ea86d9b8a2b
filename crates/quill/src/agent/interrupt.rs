//! Interrupt handling: one atomic flag, three writers.
//!
//! The [`InterruptController`] is an owned handle around a shared atomic
//! boolean. The CLI's signal handler sets it, the background key watcher
//! sets it on ESC / Ctrl-C, and the agent loop reads and clears it. There
//! is deliberately no global: clones of one controller are passed to
//! whoever needs the flag, and the signal handler gets its own clone.
//!
//! The flag is level-triggered. Firing it does not cancel anything by
//! itself — the loop checks at its suspension points (top of iteration,
//! after each stream delta, between tool calls) and stops starting new
//! work. It is cleared explicitly at the top of each turn.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

/// Shared interrupt flag. Cheap to clone; all clones observe one flag.
#[derive(Clone, Default)]
pub struct InterruptController {
    flag: Arc<AtomicBool>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an interrupt has fired and not yet been cleared.
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fire the interrupt.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear the flag (top of each agent turn).
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Start the background key watcher: a thread polling terminal key
    /// events and firing the flag on ESC or Ctrl-C. Returns a guard that
    /// stops the thread when dropped.
    pub fn spawn_key_watcher(&self) -> KeyWatcher {
        let controller = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();

        let handle = std::thread::Builder::new()
            .name("quill-key-watcher".into())
            .spawn(move || {
                use crossterm::event::{Event, KeyCode, KeyModifiers, poll, read};
                while !stop_thread.load(Ordering::SeqCst) {
                    match poll(Duration::from_millis(50)) {
                        Ok(true) => {
                            if let Ok(Event::Key(key)) = read() {
                                let esc = key.code == KeyCode::Esc;
                                let ctrl_c = key.code == KeyCode::Char('c')
                                    && key.modifiers.contains(KeyModifiers::CONTROL);
                                if esc || ctrl_c {
                                    debug!("Key watcher: interrupt key received");
                                    controller.interrupt();
                                }
                            }
                        }
                        Ok(false) => {}
                        // No terminal (tests, pipes): stop watching quietly.
                        Err(_) => break,
                    }
                }
            })
            .ok();

        KeyWatcher { stop, handle }
    }
}

/// Guard for the key-watcher thread; stops it on drop.
pub struct KeyWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for KeyWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
