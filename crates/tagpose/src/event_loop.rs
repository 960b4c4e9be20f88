//! Single-threaded cooperative scheduler.
//!
//! Other threads never touch the loop's context directly: they post
//! callbacks through a [`LoopHandle`] and the loop thread runs them in FIFO
//! order. A [`CancelToken`] stops the loop at the next drain boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// Default wait between cancellation checks on an idle loop.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(100);

type Task<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Shared stop flag. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel on SIGINT/SIGTERM. Only one handler can exist per process.
    pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupt received, stopping");
            token.cancel();
        })
    }
}

/// Posts work onto a running [`EventLoop`] from any thread.
pub struct LoopHandle<C> {
    tx: Sender<Task<C>>,
    cancel: CancelToken,
}

impl<C> Clone for LoopHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<C> LoopHandle<C> {
    /// Queue `f` to run on the loop thread after everything already queued.
    ///
    /// Returns `false` when the loop has been dropped.
    pub fn call_later<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.tx.send(Box::new(f)).is_ok()
    }

    /// Stop the loop and wake it if idle.
    pub fn exit(&self) {
        self.cancel.cancel();
        let _ = self.tx.send(Box::new(|_: &mut C| {}));
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

pub struct EventLoop<C> {
    tx: Sender<Task<C>>,
    rx: Receiver<Task<C>>,
    cancel: CancelToken,
    idle_wait: Duration,
}

impl<C> EventLoop<C> {
    pub fn new(cancel: CancelToken) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            cancel,
            idle_wait: DEFAULT_IDLE_WAIT,
        }
    }

    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    pub fn handle(&self) -> LoopHandle<C> {
        LoopHandle {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run every queued callback, including ones queued while draining.
    ///
    /// The token is checked before each dequeue, so a producer that keeps
    /// the queue non-empty cannot hold the drain open past cancellation.
    /// Returns how many callbacks ran.
    pub fn dispatch_pending(&self, ctx: &mut C) -> usize {
        let mut ran = 0;
        while !self.cancel.is_cancelled() {
            match self.rx.try_recv() {
                Ok(task) => {
                    task(ctx);
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        ran
    }

    /// Block on the queue until the token is cancelled.
    ///
    /// Cancellation is checked between callbacks, so a callback that has
    /// been dequeued always completes.
    pub fn exec(&self, ctx: &mut C) -> usize {
        let mut total = 0;
        while !self.cancel.is_cancelled() {
            match self.rx.recv_timeout(self.idle_wait) {
                Ok(task) => {
                    task(ctx);
                    total += 1;
                    total += self.dispatch_pending(ctx);
                }
                Err(RecvTimeoutError::Timeout) => {}
                // Unreachable while `self.tx` lives.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!("event loop stopped after {total} callbacks");
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn callbacks_run_in_fifo_order_including_late_additions() {
        let ev = EventLoop::<Vec<&'static str>>::new(CancelToken::new());
        let handle = ev.handle();
        let h2 = handle.clone();

        handle.call_later(move |log: &mut Vec<&'static str>| {
            log.push("a");
            h2.call_later(|log: &mut Vec<&'static str>| log.push("c"));
        });
        handle.call_later(|log: &mut Vec<&'static str>| log.push("b"));

        let mut log = Vec::new();
        assert_eq!(ev.dispatch_pending(&mut log), 3);
        assert_eq!(log, ["a", "b", "c"]);
        assert_eq!(ev.dispatch_pending(&mut log), 0);
    }

    #[test]
    fn exit_from_another_thread_stops_exec() {
        let ev = EventLoop::<u32>::new(CancelToken::new()).with_idle_wait(Duration::from_secs(5));
        let handle = ev.handle();
        let (done_tx, done_rx) = mpsc::channel();

        for _ in 0..3 {
            let done_tx = done_tx.clone();
            handle.call_later(move |n: &mut u32| {
                *n += 1;
                if *n == 3 {
                    let _ = done_tx.send(());
                }
            });
        }
        let worker = thread::spawn(move || {
            done_rx.recv().expect("third callback ran");
            handle.exit();
        });

        let mut count = 0;
        ev.exec(&mut count);
        worker.join().expect("worker");
        assert!(ev.cancel_token().is_cancelled());
        assert_eq!(count, 3);
    }

    #[test]
    fn self_requeuing_callback_cannot_outrun_cancel() {
        fn step(n: &mut u32, handle: LoopHandle<u32>) {
            *n += 1;
            thread::sleep(Duration::from_millis(2));
            if *n == 10 {
                handle.cancel_token().cancel();
            }
            let next = handle.clone();
            handle.call_later(move |n: &mut u32| step(n, next));
        }

        let ev = EventLoop::<u32>::new(CancelToken::new());
        let handle = ev.handle();
        let first = handle.clone();
        handle.call_later(move |n: &mut u32| step(n, first));

        let (done_tx, done_rx) = mpsc::channel();
        let runner = thread::spawn(move || {
            let mut n = 0;
            let ran = ev.exec(&mut n);
            let _ = done_tx.send((ran, n));
        });

        let (ran, n) = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("exec returned after cancel");
        runner.join().expect("runner");
        assert_eq!(ran, 10);
        assert_eq!(n, 10);
    }

    #[test]
    fn drain_stops_at_cancel_and_keeps_the_rest_queued() {
        let ev = EventLoop::<Vec<u32>>::new(CancelToken::new());
        let handle = ev.handle();
        let token = ev.cancel_token().clone();
        handle.call_later(|log: &mut Vec<u32>| log.push(1));
        handle.call_later(move |log: &mut Vec<u32>| {
            log.push(2);
            token.cancel();
        });
        handle.call_later(|log: &mut Vec<u32>| log.push(3));

        let mut log = Vec::new();
        assert_eq!(ev.dispatch_pending(&mut log), 2);
        assert_eq!(log, [1, 2]);
    }

    #[test]
    fn cancelled_loop_does_not_start() {
        let token = CancelToken::new();
        token.cancel();
        let ev = EventLoop::<u32>::new(token);
        ev.handle().call_later(|n: &mut u32| *n += 1);
        let mut n = 0;
        assert_eq!(ev.exec(&mut n), 0);
        assert_eq!(n, 0);
    }
}
