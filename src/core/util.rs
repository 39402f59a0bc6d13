//! # Core internal utilites
//! The module contains miscellaneous datastructures and functionalities
//! used by patternmq

use crate::core::serializer;
use crate::core::serializer::{Deserializer, Serializable, Serializer};
use std::fmt;

/// # Identifier
/// Used as an identifier in messages as peer and other identifiers
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub struct Identifier {
    core: u64,
}

impl Identifier {
    /// Create a new identifier from seed
    pub fn new(core: u64) -> Self {
        Self { core }
    }

    /// Create a random identifier
    pub fn new_random() -> Self {
        Self {
            core: rand::random(),
        }
    }

    /// Query internal state of identifier
    pub fn get(&self) -> u64 {
        self.core
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.core)
    }
}

impl Serializable for Identifier {
    fn serialize<T: Serializer>(&self, serializer: &mut T) {
        serializer.serialize(&self.core);
    }
    fn deserialize<T: Deserializer>(deserializer: &mut T) -> Result<Self, serializer::Error> {
        Ok(Self::new(deserializer.deserialize()?))
    }
}

/// # Timing related helpers
/// Timing functionality used internally by patternmq
pub mod time {
    use std::time::{Duration, Instant};

    /// # DurationBackoff interface
    /// Trait to implement a backoff algorithm
    pub trait DurationBackoff: Clone {
        /// Step backoff algorithm to next state
        fn step(&mut self) -> Duration;
        /// Get current state of backoff algorithm
        fn current(&self) -> Duration;
        /// Reset backoff algorithm to default state
        fn reset(&mut self) -> Duration;
    }

    /// # LinearDurationBackoff
    /// Implementation of a linear backoff algorithm that linearly increases the backoff duration
    /// between two states
    #[derive(Clone, Debug)]
    pub struct LinearDurationBackoff {
        low: Duration,
        high: Duration,
        step: Duration,
        state: Duration,
    }

    impl LinearDurationBackoff {
        /// Create an instance that backs of between `low` and `high` in `steps` number of steps
        pub fn new(low: Duration, high: Duration, steps: u16) -> Self {
            Self {
                low,
                high,
                step: (high - low) / u32::from(steps.max(1)),
                state: low,
            }
        }
    }

    impl DurationBackoff for LinearDurationBackoff {
        #[inline]
        fn step(&mut self) -> Duration {
            let result = self.state;
            if self.state < self.high {
                self.state = (self.state + self.step).min(self.high);
            }
            result
        }

        #[inline]
        fn current(&self) -> Duration {
            self.state
        }

        #[inline]
        fn reset(&mut self) -> Duration {
            self.state = self.low;
            self.state
        }
    }

    /// # DurationBackoffWithDebounce
    /// Duration backoff implementation that debounces a given number of steps before handing over
    /// to the internal backoff algorithm
    #[derive(Clone, Debug)]
    pub struct DurationBackoffWithDebounce<T: DurationBackoff> {
        backoff: T,
        debounce: usize,
        state: usize,
    }

    impl<T: DurationBackoff> DurationBackoffWithDebounce<T> {
        /// Create new instance with `backoff` algorithm with `debounce` number of debouncing before it
        pub fn new(backoff: T, debounce: usize) -> Self {
            Self {
                backoff,
                debounce,
                state: 0,
            }
        }
    }

    impl<T: DurationBackoff> DurationBackoff for DurationBackoffWithDebounce<T> {
        #[inline]
        fn step(&mut self) -> Duration {
            if self.state < self.debounce {
                self.state += 1;
                Duration::ZERO
            } else {
                self.backoff.step()
            }
        }

        #[inline]
        fn current(&self) -> Duration {
            if self.state < self.debounce {
                Duration::ZERO
            } else {
                self.backoff.current()
            }
        }

        #[inline]
        fn reset(&mut self) -> Duration {
            self.state = 0;
            self.backoff.reset();
            Duration::ZERO
        }
    }

    /// Backoff used by polling loops: a few immediate retries, then 1ms up to 50ms
    pub fn polling_backoff() -> DurationBackoffWithDebounce<LinearDurationBackoff> {
        DurationBackoffWithDebounce::new(
            LinearDurationBackoff::new(Duration::from_millis(1), Duration::from_millis(50), 10),
            8,
        )
    }

    /// Remaining time until `deadline`, `None` once it has passed
    pub fn remaining(deadline: Instant) -> Option<Duration> {
        deadline
            .checked_duration_since(Instant::now())
            .filter(|remaining| !remaining.is_zero())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn linear_backoff_saturates_at_high() {
            let mut backoff =
                LinearDurationBackoff::new(Duration::from_millis(0), Duration::from_millis(10), 2);
            assert_eq!(backoff.step(), Duration::from_millis(0));
            assert_eq!(backoff.step(), Duration::from_millis(5));
            assert_eq!(backoff.step(), Duration::from_millis(10));
            assert_eq!(backoff.step(), Duration::from_millis(10));
            assert_eq!(backoff.reset(), Duration::from_millis(0));
        }

        #[test]
        fn debounce_delays_backoff() {
            let mut backoff = DurationBackoffWithDebounce::new(
                LinearDurationBackoff::new(Duration::from_millis(1), Duration::from_millis(3), 2),
                2,
            );
            assert_eq!(backoff.step(), Duration::ZERO);
            assert_eq!(backoff.step(), Duration::ZERO);
            assert_eq!(backoff.step(), Duration::from_millis(1));
            assert_eq!(backoff.current(), Duration::from_millis(2));
            backoff.reset();
            assert_eq!(backoff.current(), Duration::ZERO);
        }
    }
}

/// # Threaded operation helper functionality
/// Thread coordination used internally by patternmq
pub mod thread {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Condvar, LockResult, Mutex, MutexGuard, PoisonError, WaitTimeoutResult};
    use std::time::{Duration, Instant};

    #[inline]
    pub fn sleep(sleep_time: Duration) {
        if !sleep_time.is_zero() {
            std::thread::sleep(sleep_time)
        }
    }

    /// #Sleeper
    /// A helper struct that allows for sleeping the currrent thread according to a duration backoff algorithm
    pub struct Sleeper<T: super::time::DurationBackoff> {
        backoff: T,
    }

    impl<T: super::time::DurationBackoff> Sleeper<T> {
        /// Construct new sleeper with `backoff` algorithm
        pub fn new(backoff: T) -> Self {
            Self { backoff }
        }

        /// Sleep the current thread according to the next state of the backoff algorithm
        pub fn sleep(&mut self) {
            sleep(self.backoff.step())
        }

        /// Reset the internal backoff algorithm
        pub fn reset(&mut self) {
            self.backoff.reset();
        }
    }

    /// # Semaphore
    /// Shared flag used to signal a thread or a loop that it should stop.
    ///
    /// Clones observe the same flag; once signaled it stays signaled.
    #[derive(Clone, Debug, Default)]
    pub struct Semaphore {
        semaphore: Arc<AtomicBool>,
    }

    /// Process level stop flag, set by the signal handler of the binaries
    pub type Shutdown = Semaphore;

    impl Semaphore {
        /// Create semaphore
        pub fn new() -> Self {
            Self::default()
        }

        /// Check if semaphore has been signaled
        pub fn is_signaled(&self) -> bool {
            self.semaphore.load(Ordering::SeqCst)
        }

        /// Explicity signal stopped state of semaphore
        pub fn signal(&self) {
            self.semaphore.store(true, Ordering::SeqCst);
        }

        /// Sleep for `duration` in short slices, returning early with `true` once signaled
        pub fn sleep_unless_signaled(&self, duration: Duration) -> bool {
            const SLICE: Duration = Duration::from_millis(20);
            let deadline = Instant::now() + duration;
            while !self.is_signaled() {
                match super::time::remaining(deadline) {
                    Some(remaining) => sleep(remaining.min(SLICE)),
                    None => return false,
                }
            }
            true
        }
    }

    /// Guard of a [`ChangeNotifyMutex`] that wakes up all waiters when dropped
    pub struct ChangeNotifyMutexGuard<'a, T>
    where
        T: Send,
    {
        internal_mutex_guard: Option<MutexGuard<'a, T>>,
        mutex: &'a ChangeNotifyMutex<T>,
    }

    impl<'a, T> Drop for ChangeNotifyMutexGuard<'a, T>
    where
        T: Send,
    {
        fn drop(&mut self) {
            if self.internal_mutex_guard.take().is_some() {
                self.mutex.notify_all();
            }
        }
    }

    impl<'a, T> std::ops::Deref for ChangeNotifyMutexGuard<'a, T>
    where
        T: Send,
    {
        type Target = T;
        fn deref(&self) -> &Self::Target {
            match self.internal_mutex_guard.as_ref() {
                Some(guard) => guard,
                None => unreachable!("guard is only taken on drop"),
            }
        }
    }

    impl<'a, T> std::ops::DerefMut for ChangeNotifyMutexGuard<'a, T>
    where
        T: Send,
    {
        fn deref_mut(&mut self) -> &mut Self::Target {
            match self.internal_mutex_guard.as_mut() {
                Some(guard) => guard,
                None => unreachable!("guard is only taken on drop"),
            }
        }
    }

    /// Mutex paired with a condition variable; changes made through
    /// [`ChangeNotifyMutex::lock_notify`] wake up every waiter
    pub struct ChangeNotifyMutex<T>
    where
        T: Send,
    {
        value: Mutex<T>,
        var: Condvar,
    }

    pub type ChgNtfMutex<T> = ChangeNotifyMutex<T>;

    impl<T> ChangeNotifyMutex<T>
    where
        T: Send,
    {
        pub fn new(value: T) -> Self {
            Self {
                value: Mutex::new(value),
                var: Condvar::new(),
            }
        }

        pub fn lock(&self) -> LockResult<MutexGuard<'_, T>> {
            self.value.lock()
        }

        pub fn lock_notify(
            &self,
        ) -> Result<ChangeNotifyMutexGuard<'_, T>, PoisonError<MutexGuard<'_, T>>> {
            Ok(ChangeNotifyMutexGuard {
                internal_mutex_guard: Some(self.value.lock()?),
                mutex: self,
            })
        }

        pub fn wait_on_locked<'a>(
            &'a self,
            guard: MutexGuard<'a, T>,
        ) -> LockResult<MutexGuard<'a, T>> {
            self.var.wait(guard)
        }

        pub fn wait_timeout_on_locked<'a>(
            &'a self,
            mutex_guard: MutexGuard<'a, T>,
            timeout: Duration,
        ) -> LockResult<(MutexGuard<'a, T>, WaitTimeoutResult)> {
            self.var.wait_timeout(mutex_guard, timeout)
        }

        pub fn notify_all(&self) {
            self.var.notify_all();
        }
    }

}
