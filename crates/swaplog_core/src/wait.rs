//! Spin-then-yield waiting.

use crossbeam::utils::Backoff;

/// Spins until `done` returns true, backing off to `yield_now` as the wait
/// grows. Never parks the thread.
///
/// Returns the number of times `done` returned false.
pub(crate) fn spin_until(mut done: impl FnMut() -> bool) -> usize {
    let backoff = Backoff::new();
    let mut spins = 0;
    while !done() {
        spins += 1;
        backoff.snooze();
    }
    spins
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn returns_immediately_when_done() {
        assert_eq!(spin_until(|| true), 0);
    }

    #[test]
    fn counts_failed_checks() {
        let mut calls = 0;
        let spins = spin_until(|| {
            calls += 1;
            calls > 3
        });
        assert_eq!(spins, 3);
    }

    #[test]
    fn observes_other_thread() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                flag.store(true, Ordering::SeqCst);
            })
        };

        spin_until(|| flag.load(Ordering::SeqCst));
        setter.join().unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
