//! 周期任务
//!
//! 单个 tokio 任务顺序执行 job：上一轮没结束时不会开始下一轮，错过的 tick 直接跳过。
//! `stop()` 只发送停止信号并等待任务退出，正在执行的一轮会完整跑完，不会被 abort。

use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 周期执行的任务体
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// 周期上限，超出的值按此截断
const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub struct PeriodicTask {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// 启动任务，第一次执行在 `period` 之后
    pub fn spawn(name: &'static str, period: Duration, job: Job) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = period.min(MAX_PERIOD);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("[Scheduler] 🔄 周期任务 {} 已启动，间隔: {:?}", name, period);

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        // 发送端被丢弃也视为停止
                        let stop = changed.is_err() || *stop_rx.borrow();
                        if stop {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        debug!("[Scheduler] 周期任务 {} 开始执行", name);
                        job().await;
                    }
                }
            }
            info!("[Scheduler] 周期任务 {} 已停止", name);
        });

        Self {
            name,
            stop_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// 停止任务并等待正在执行的一轮结束；可重复调用
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("[Scheduler] 周期任务 {} 异常退出: {}", self.name, e);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn counting_job(runs: Arc<AtomicUsize>, work: Duration, overlap: Arc<AtomicBool>) -> Job {
        let busy = Arc::new(AtomicBool::new(false));
        Arc::new(move || {
            let runs = runs.clone();
            let busy = busy.clone();
            let overlap = overlap.clone();
            async move {
                if busy.swap(true, Ordering::SeqCst) {
                    overlap.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(work).await;
                runs.fetch_add(1, Ordering::SeqCst);
                busy.store(false, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn runs_repeatedly_without_overlap() {
        let runs = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        // job 比周期长，错过的 tick 被跳过而不是并发执行
        let task = PeriodicTask::spawn(
            "test",
            Duration::from_millis(10),
            counting_job(runs.clone(), Duration::from_millis(25), overlap.clone()),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        task.stop().await;

        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert!(!overlap.load(Ordering::SeqCst));
        assert!(!task.is_running().await);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        let task = PeriodicTask::spawn(
            "slow",
            Duration::from_millis(10),
            counting_job(runs.clone(), Duration::from_millis(100), overlap),
        );

        // 等第一轮开始后再停止
        tokio::time::sleep(Duration::from_millis(40)).await;
        task.stop().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_first_tick_is_delayed() {
        let runs = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        let task = PeriodicTask::spawn(
            "idle",
            Duration::from_secs(60),
            counting_job(runs.clone(), Duration::ZERO, overlap),
        );

        assert!(task.is_running().await);
        task.stop().await;
        task.stop().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_period_is_clamped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        let task = PeriodicTask::spawn(
            "forever",
            Duration::MAX,
            counting_job(runs.clone(), Duration::ZERO, overlap),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(task.is_running().await);
        task.stop().await;
        assert!(!task.is_running().await);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
