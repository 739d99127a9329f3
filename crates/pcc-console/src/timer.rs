use pcc_core::health::{TimerDriver, TimerId};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Poll timers as tokio tasks; each firing is delivered as its timer id so the
/// poller can discard ticks from a timer it already replaced.
pub struct TokioTimerDriver {
    tick_tx: mpsc::UnboundedSender<TimerId>,
}

impl TokioTimerDriver {
    pub fn new(tick_tx: mpsc::UnboundedSender<TimerId>) -> Self {
        Self { tick_tx }
    }
}

impl TimerDriver for TokioTimerDriver {
    type Handle = JoinHandle<()>;

    fn start(&mut self, timer_id: TimerId, period: Duration) -> Self::Handle {
        let tick_tx = self.tick_tx.clone();
        debug!(event = "poll_timer_start", timer_id, period_ms = period.as_millis() as u64);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick_tx.send(timer_id).is_err() {
                    break;
                }
            }
        })
    }

    fn cancel(&mut self, handle: Self::Handle) {
        handle.abort();
        debug!(event = "poll_timer_cancel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcc_core::health::{HealthPoller, PollAction, PollInterval, PollMode};

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_arrive_once_per_period() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = TokioTimerDriver::new(tx);
        let handle = driver.start(7, Duration::from_secs(30));
        settle().await;

        tokio::time::advance(Duration::from_secs(29)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(rx.try_recv().ok(), Some(7));

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(rx.try_recv().ok(), Some(7));
        driver.cancel(handle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_stays_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = TokioTimerDriver::new(tx);
        let handle = driver.start(1, Duration::from_secs(5));
        settle().await;
        driver.cancel(handle);
        settle().await;

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_replaces_timer_on_apply() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = HealthPoller::new(TokioTimerDriver::new(tx), PollInterval::new(0, 10));
        assert_eq!(poller.set_mode(PollMode::Auto), PollAction::ProbeNow);
        let (first_id, _) = poller.active_timer().expect("timer");
        settle().await;

        poller.apply_interval(1, 0);
        let (second_id, period) = poller.active_timer().expect("timer");
        assert_ne!(first_id, second_id);
        assert_eq!(period, Duration::from_secs(60));
        settle().await;

        tokio::time::advance(Duration::from_secs(59)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        let tick = rx.try_recv().expect("tick");
        assert_eq!(tick, second_id);
        assert_eq!(poller.on_tick(tick), PollAction::ProbeNow);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_auto_polling() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = HealthPoller::new(TokioTimerDriver::new(tx), PollInterval::new(0, 2));
        poller.set_mode(PollMode::Auto);
        settle().await;
        poller.shutdown();
        settle().await;

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
        assert!(poller.active_timer().is_none());
    }
}
