use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(10);

/// Whatever the scheduler drives: a host or a connecting peer.
pub trait TickDriver: Send + Sync + 'static {
    /// True while the authoritative side is unresponsive.
    fn waiting_on_peer(&self) -> bool {
        false
    }

    /// Advances the simulation by exactly one tick.
    fn tick(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Stopped = 0,
    Running = 1,
    WaitingOnPeer = 2,
}

impl From<u8> for SchedulerState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::WaitingOnPeer,
            _ => Self::Stopped,
        }
    }
}

/// One scheduler iteration: either a tick or a skipped one while waiting.
pub fn step<D: TickDriver + ?Sized>(driver: &D) -> SchedulerState {
    if driver.waiting_on_peer() {
        SchedulerState::WaitingOnPeer
    } else {
        driver.tick();
        SchedulerState::Running
    }
}

pub struct TickScheduler {
    period: Duration,
    state: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TickScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            state: Arc::new(AtomicU8::new(SchedulerState::Stopped as u8)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start<D: TickDriver>(&mut self, driver: Arc<D>) {
        if self.handle.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        self.state
            .store(SchedulerState::Running as u8, Ordering::SeqCst);

        let period = self.period;
        let running = Arc::clone(&self.running);
        let state = Arc::clone(&self.state);

        self.handle = Some(thread::spawn(move || {
            let mut next = Instant::now();
            while running.load(Ordering::SeqCst) {
                let current = step(driver.as_ref());
                let previous = SchedulerState::from(state.swap(current as u8, Ordering::SeqCst));
                if previous != current {
                    match current {
                        SchedulerState::WaitingOnPeer => {
                            log::warn!("Host unresponsive, holding ticks")
                        }
                        _ => log::info!("Host responsive again, resuming ticks"),
                    }
                }

                next += period;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
            state.store(SchedulerState::Stopped as u8, Ordering::SeqCst);
        }));
    }

    /// Lets the in-flight tick finish, then halts.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Tick thread panicked");
            }
        }
        self.state
            .store(SchedulerState::Stopped as u8, Ordering::SeqCst);
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    struct Counter {
        ticks: AtomicU64,
        waiting: AtomicBool,
    }

    impl TickDriver for Counter {
        fn waiting_on_peer(&self) -> bool {
            self.waiting.load(Ordering::SeqCst)
        }

        fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn step_ticks_once_unless_waiting() {
        let counter = Counter::default();
        assert_eq!(step(&counter), SchedulerState::Running);
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 1);

        counter.waiting.store(true, Ordering::SeqCst);
        assert_eq!(step(&counter), SchedulerState::WaitingOnPeer);
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runs_at_fixed_period_until_stopped() {
        let counter = Arc::new(Counter::default());
        let mut scheduler = TickScheduler::new(Duration::from_millis(5));
        scheduler.start(Arc::clone(&counter));
        thread::sleep(Duration::from_millis(100));
        scheduler.stop();

        let ticks = counter.ticks.load(Ordering::SeqCst);
        assert!(ticks >= 5, "only {} ticks", ticks);
        assert!(ticks <= 40, "{} ticks in 100ms", ticks);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.ticks.load(Ordering::SeqCst), ticks);
    }

    #[test]
    fn waiting_holds_ticks_and_resumes() {
        let counter = Arc::new(Counter::default());
        counter.waiting.store(true, Ordering::SeqCst);
        let mut scheduler = TickScheduler::new(Duration::from_millis(2));
        scheduler.start(Arc::clone(&counter));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(scheduler.state(), SchedulerState::WaitingOnPeer);
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 0);

        counter.waiting.store(false, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        scheduler.stop();
        assert!(counter.ticks.load(Ordering::SeqCst) > 0);
    }
}
