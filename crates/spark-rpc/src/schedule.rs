//! # 周期任务注册表
//!
//! 每个 [`ScheduledService`] 拥有一个单工作线程的 Tokio 运行时，按固定频率或固定延迟反复执行
//! 同一个同步任务（地址轮询、心跳等）。[`ScheduledTaskRegistry`] 跟踪所有已启动的实例，
//! 在宿主检测到时钟或环境被挂起/恢复后，通过 [`ScheduledTaskRegistry::reset`] 整体重建。
//!
//! 表由运行时上下文持有并显式传递，不存在进程级静态变量。

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Result, RpcError};

/// 调度模式。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScheduleMode {
    /// 以固定频率触发，间隔从上一次触发时刻算起。
    FixedRate,
    /// 上一次执行结束后再等待固定时长。
    FixedDelay,
}

type Task = Arc<dyn Fn() + Send + Sync>;

/// 同步停止时等待正在执行的任务体结束的最长时间。
pub const STOP_GRACE: Duration = Duration::from_secs(5);

struct Running {
    runtime: Runtime,
    handle: JoinHandle<()>,
}

/// 单个周期任务。
///
/// # 契约说明（What）
/// - [`ScheduledService::start`] 幂等：已启动时直接返回；
/// - [`ScheduledService::stop`] 取消调度句柄并关闭执行器，未启动时调用也安全；
///   同步调用方会等待正在执行的任务体结束，超过 [`STOP_GRACE`] 则放弃等待；
/// - 任务体 panic 会被捕获并记录，不会终止后续调度。
pub struct ScheduledService {
    id: u64,
    name: Arc<str>,
    mode: ScheduleMode,
    initial_delay: Duration,
    period: Duration,
    task: Task,
    registry: Weak<ScheduledTaskRegistry>,
    this: Weak<ScheduledService>,
    running: Mutex<Option<Running>>,
}

impl fmt::Debug for ScheduledService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledService")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("initial_delay", &self.initial_delay)
            .field("period", &self.period)
            .field("started", &self.is_started())
            .finish()
    }
}

impl ScheduledService {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    pub fn is_started(&self) -> bool {
        self.running.lock().is_some()
    }

    /// 启动调度。
    ///
    /// 执行器创建与登记表更新在同一临界区内完成，与 [`Self::stop`] 之间不存在"已运行但未登记"
    /// 的窗口。锁顺序固定为 `running` → 登记表。
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("spark-rpc-{}", self.name))
            .enable_time()
            .build()
            .map_err(|err| {
                RpcError::internal(format!(
                    "failed to build executor for scheduled task `{}`: {err}",
                    self.name
                ))
            })?;
        let handle = runtime.spawn(drive(
            Arc::clone(&self.name),
            self.mode,
            self.initial_delay,
            self.period,
            Arc::clone(&self.task),
        ));
        *running = Some(Running { runtime, handle });
        if let Some(registry) = self.registry.upgrade() {
            registry.track(self.id, self.this.clone());
        }
        drop(running);
        tracing::info!(task = %self.name, mode = ?self.mode, "scheduled task started");
        Ok(())
    }

    /// 停止调度，返回本次调用是否真正停掉了一个运行中的实例。
    ///
    /// 在非异步上下文中调用时，会等待正在执行的任务体结束（最多 [`STOP_GRACE`]）；
    /// 在 Tokio 上下文中（包括任务体内部）只做后台关闭，不阻塞。
    pub fn stop(&self) -> bool {
        let taken = {
            let mut running = self.running.lock();
            let taken = running.take();
            if taken.is_some() {
                if let Some(registry) = self.registry.upgrade() {
                    registry.untrack(self.id);
                }
            }
            taken
        };
        let Some(Running { runtime, handle }) = taken else {
            return false;
        };
        handle.abort();
        if Handle::try_current().is_err() {
            runtime.shutdown_timeout(STOP_GRACE);
        } else {
            runtime.shutdown_background();
        }
        tracing::info!(task = %self.name, "scheduled task stopped");
        true
    }
}

impl Drop for ScheduledService {
    fn drop(&mut self) {
        if let Some(Running { runtime, handle }) = self.running.get_mut().take() {
            handle.abort();
            runtime.shutdown_background();
            if let Some(registry) = self.registry.upgrade() {
                registry.untrack(self.id);
            }
        }
    }
}

async fn drive(
    name: Arc<str>,
    mode: ScheduleMode,
    initial_delay: Duration,
    period: Duration,
    task: Task,
) {
    tokio::time::sleep(initial_delay).await;
    match mode {
        ScheduleMode::FixedRate => {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                ticker.tick().await;
                run_once(&name, &task);
            }
        }
        ScheduleMode::FixedDelay => loop {
            run_once(&name, &task);
            tokio::time::sleep(period).await;
        },
    }
}

fn run_once(name: &str, task: &Task) {
    if catch_unwind(AssertUnwindSafe(|| task())).is_err() {
        tracing::warn!(task = name, "scheduled task panicked, next run is still scheduled");
    }
}

/// 已启动周期任务的登记表。
#[derive(Debug, Default)]
pub struct ScheduledTaskRegistry {
    started: Mutex<BTreeMap<u64, Weak<ScheduledService>>>,
    next_id: AtomicU64,
    resetting: AtomicBool,
}

impl ScheduledTaskRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 创建（但不启动）一个周期任务。`period` 必须大于零。
    pub fn create<F>(
        self: &Arc<Self>,
        name: impl Into<String>,
        mode: ScheduleMode,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) -> Result<Arc<ScheduledService>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let name: String = name.into();
        if period.is_zero() {
            return Err(RpcError::config(format!(
                "scheduled task `{name}` requires a non-zero period"
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::downgrade(self);
        Ok(Arc::new_cyclic(|this| ScheduledService {
            id,
            name: Arc::from(name),
            mode,
            initial_delay,
            period,
            task: Arc::new(task),
            registry,
            this: this.clone(),
            running: Mutex::new(None),
        }))
    }

    fn track(&self, id: u64, service: Weak<ScheduledService>) {
        self.started.lock().insert(id, service);
    }

    fn untrack(&self, id: u64) {
        self.started.lock().remove(&id);
    }

    fn snapshot(&self) -> Vec<Arc<ScheduledService>> {
        let started = self.started.lock();
        started.values().filter_map(Weak::upgrade).collect()
    }

    /// 当前已启动的任务数。
    pub fn started_count(&self) -> usize {
        self.snapshot().len()
    }

    /// 是否正在重建。
    pub fn is_resetting(&self) -> bool {
        self.resetting.load(Ordering::Acquire)
    }

    /// 停止并重新启动所有已启动的任务，按创建顺序逐个处理。
    ///
    /// 执行期间 [`Self::is_resetting`] 为 `true`；重入调用直接返回。重建过程中被其他线程
    /// 停掉的任务不会被重新拉起。单个任务重启失败只记录日志，其余任务照常重建。
    pub fn reset(&self) {
        if self.resetting.swap(true, Ordering::AcqRel) {
            return;
        }
        let services = self.snapshot();
        tracing::info!(tasks = services.len(), "resetting scheduled tasks");
        for service in services {
            if !service.stop() {
                continue;
            }
            if let Err(err) = service.start() {
                tracing::error!(task = %service.name(), error = %err, "failed to restart scheduled task");
            }
        }
        self.resetting.store(false, Ordering::Release);
    }

    /// 停止全部任务，用于运行时关闭。
    pub fn stop_all(&self) {
        for service in self.snapshot() {
            service.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_period_is_rejected() {
        let registry = ScheduledTaskRegistry::new();
        let err = registry
            .create("bad", ScheduleMode::FixedRate, Duration::ZERO, Duration::ZERO, || {})
            .expect_err("零周期应被拒绝");
        assert_eq!(err.code(), "rpc.config.invalid");
    }

    #[test]
    fn stop_before_start_is_safe() {
        let registry = ScheduledTaskRegistry::new();
        let service = registry
            .create("idle", ScheduleMode::FixedDelay, Duration::ZERO, Duration::from_secs(1), || {})
            .unwrap();
        assert!(!service.stop());
        assert!(!service.is_started());
        assert_eq!(registry.started_count(), 0);
    }

    #[test]
    fn start_is_idempotent_and_tracked() {
        let registry = ScheduledTaskRegistry::new();
        let service = registry
            .create("tick", ScheduleMode::FixedRate, Duration::from_secs(60), Duration::from_secs(60), || {})
            .unwrap();
        service.start().unwrap();
        service.start().unwrap();
        assert_eq!(registry.started_count(), 1);
        assert!(service.stop());
        assert_eq!(registry.started_count(), 0);
        assert!(!service.stop(), "重复停止不应再报告停掉了实例");
    }

    #[test]
    fn dropping_a_started_service_untracks_it() {
        let registry = ScheduledTaskRegistry::new();
        let service = registry
            .create("dropped", ScheduleMode::FixedRate, Duration::from_secs(60), Duration::from_secs(60), || {})
            .unwrap();
        service.start().unwrap();
        assert_eq!(registry.started.lock().len(), 1);
        drop(service);
        assert!(registry.started.lock().is_empty());
    }
}
