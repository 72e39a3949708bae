//! Ctrl-C handling for synchronous runs.
//!
//! One listener thread owns the process's SIGINT handler. While a
//! synchronous run is in flight the signal is relayed to it so the engine
//! can be stopped and reaped. With nothing in flight the process exits
//! with [`INTERRUPTED_EXIT_CODE`], as it would without a handler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, Once};
use tokio::sync::broadcast;

pub const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InterruptAction {
    Forward,
    Exit,
}

pub(crate) fn action_for(in_flight: usize) -> InterruptAction {
    if in_flight == 0 {
        InterruptAction::Exit
    } else {
        InterruptAction::Forward
    }
}

struct Relay {
    in_flight: AtomicUsize,
    sender: broadcast::Sender<()>,
}

static RELAY: LazyLock<Relay> = LazyLock::new(|| Relay {
    in_flight: AtomicUsize::new(0),
    sender: broadcast::channel(16).0,
});

static LISTENER: Once = Once::new();

fn start_listener() {
    LISTENER.call_once(|| {
        let spawned = std::thread::Builder::new()
            .name("platsim-interrupt".to_string())
            .spawn(listen);
        if let Err(e) = spawned {
            tracing::warn!("Cannot start the interrupt listener: {}", e);
        }
    });
}

// Runs on its own runtime so the handler outlives whichever runtime
// started the first run.
fn listen() {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::warn!("Cannot build the interrupt runtime: {}", e);
            return;
        }
    };

    runtime.block_on(async {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                return;
            }
            let in_flight = RELAY.in_flight.load(Ordering::SeqCst);
            match action_for(in_flight) {
                InterruptAction::Forward => {
                    tracing::warn!("Interrupted, stopping {} running simulations", in_flight);
                    let _ = RELAY.sender.send(());
                }
                InterruptAction::Exit => std::process::exit(INTERRUPTED_EXIT_CODE),
            }
        }
    });
}

/// Marks a synchronous run as in flight until dropped.
#[derive(Debug)]
pub(crate) struct InterruptGuard {
    receiver: broadcast::Receiver<()>,
}

pub(crate) fn watch() -> InterruptGuard {
    start_listener();
    let receiver = RELAY.sender.subscribe();
    RELAY.in_flight.fetch_add(1, Ordering::SeqCst);
    InterruptGuard { receiver }
}

impl InterruptGuard {
    /// Resolves on the first Ctrl-C relayed after the guard was taken.
    pub(crate) async fn interrupted(&mut self) {
        match self.receiver.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
        }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        RELAY.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_idle_process_exits_on_interrupt() {
        assert_eq!(action_for(0), InterruptAction::Exit);
        assert_eq!(action_for(1), InterruptAction::Forward);
        assert_eq!(action_for(4), InterruptAction::Forward);
    }

    #[tokio::test]
    async fn test_guard_counts_run_and_receives_relay() {
        let mut guard = watch();
        assert!(RELAY.in_flight.load(Ordering::SeqCst) >= 1);
        assert_eq!(action_for(RELAY.in_flight.load(Ordering::SeqCst)), InterruptAction::Forward);

        RELAY.sender.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), guard.interrupted())
            .await
            .unwrap();

        let later = watch();
        drop(guard);
        drop(later);
        assert_eq!(RELAY.in_flight.load(Ordering::SeqCst), 0);
    }
}
