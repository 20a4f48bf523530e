//! # 后台周期任务
//!
//! - 渠道路由表定时全量重载（间隔为 0 时不注册）
//! - 冷却表过期条目清理

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::context::AppContext;
use crate::app::task_scheduler::{ScheduledTask, TaskScheduler};
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo, lwarn};

/// 后台任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// 路由表定时重载
    ChannelReload,
    /// 冷却表清理
    CooldownSweep,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelReload => write!(f, "channel_reload"),
            Self::CooldownSweep => write!(f, "cooldown_sweep"),
        }
    }
}

/// 固定间隔执行的任务
///
/// 首次执行在一个间隔之后，停止时等待当前一轮结束
pub struct PeriodicTask {
    task_type: TaskType,
    interval: Duration,
    cancel: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    #[must_use]
    pub const fn new(task_type: TaskType, interval: Duration) -> Self {
        Self {
            task_type,
            interval,
            cancel: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// 启动循环，已在运行时不做任何事
    pub fn start<F, Fut>(&self, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut cancel_slot = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if cancel_slot.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let interval = self.interval;
        let task_type = self.task_type;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    _ = ticker.tick() => {
                        ldebug!(
                            "system",
                            LogStage::BackgroundTask,
                            LogComponent::Scheduler,
                            "task_tick",
                            "执行周期任务",
                            task = %task_type
                        );
                        tick().await;
                    }
                }
            }
        });

        *cancel_slot = Some(token);
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// 停止循环并等待退出
    pub async fn stop(&self) {
        let token = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(token) = token {
            token.cancel();
        }
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            lwarn!(
                "system",
                LogStage::Shutdown,
                LogComponent::Scheduler,
                "task_join_failed",
                "后台任务退出异常",
                task = %self.task_type,
                error = %e
            );
        }
    }
}

/// 后台任务集合
pub struct AppTasks {
    scheduler: Arc<TaskScheduler>,
}

impl AppTasks {
    /// 按配置注册后台任务
    pub async fn initialize(context: &AppContext) -> Result<Arc<Self>> {
        let scheduler = Arc::new(TaskScheduler::new());

        let reload_secs = context.config.channels.reload_interval_seconds;
        if reload_secs > 0 {
            let task = Arc::new(PeriodicTask::new(
                TaskType::ChannelReload,
                Duration::from_secs(reload_secs),
            ));
            let registry = Arc::clone(&context.registry);
            let groups = Arc::clone(&context.groups);
            scheduler
                .register(
                    ScheduledTask::builder(TaskType::ChannelReload)
                        .on_start({
                            let task = Arc::clone(&task);
                            move || {
                                let registry = Arc::clone(&registry);
                                let groups = Arc::clone(&groups);
                                task.start(move || {
                                    let registry = Arc::clone(&registry);
                                    let groups = Arc::clone(&groups);
                                    async move {
                                        // 失败时保留旧快照，等待下一轮
                                        if let Err(e) = registry.load().await {
                                            lwarn!(
                                                "system",
                                                LogStage::BackgroundTask,
                                                LogComponent::Scheduler,
                                                "channel_reload_skipped",
                                                "定时重载渠道失败",
                                                error = %e
                                            );
                                        }
                                        if let Err(e) = groups.load().await {
                                            lwarn!(
                                                "system",
                                                LogStage::BackgroundTask,
                                                LogComponent::Scheduler,
                                                "group_reload_skipped",
                                                "定时重载用户分组失败",
                                                error = %e
                                            );
                                        }
                                    }
                                });
                                async { Ok(()) }
                            }
                        })
                        .on_stop(move || {
                            let task = Arc::clone(&task);
                            async move {
                                task.stop().await;
                                Ok(())
                            }
                        })
                        .build()?,
                )
                .await;
        }

        let sweep_secs = context.config.channels.cooldown_sweep_interval_seconds.max(1);
        let sweep = Arc::new(PeriodicTask::new(
            TaskType::CooldownSweep,
            Duration::from_secs(sweep_secs),
        ));
        let cooldowns = Arc::clone(&context.cooldowns);
        scheduler
            .register(
                ScheduledTask::builder(TaskType::CooldownSweep)
                    .on_start({
                        let sweep = Arc::clone(&sweep);
                        move || {
                            let cooldowns = Arc::clone(&cooldowns);
                            sweep.start(move || {
                                let cooldowns = Arc::clone(&cooldowns);
                                async move {
                                    let removed = cooldowns.cleanup_expired();
                                    if removed > 0 {
                                        linfo!(
                                            "system",
                                            LogStage::Cooldown,
                                            LogComponent::Cooldown,
                                            "cooldown_sweep",
                                            "清理过期冷却条目",
                                            removed = removed,
                                            remaining = cooldowns.len()
                                        );
                                    }
                                }
                            });
                            async { Ok(()) }
                        }
                    })
                    .on_stop(move || {
                        let sweep = Arc::clone(&sweep);
                        async move {
                            sweep.stop().await;
                            Ok(())
                        }
                    })
                    .build()?,
            )
            .await;

        Ok(Arc::new(Self { scheduler }))
    }

    #[must_use]
    pub fn scheduler(&self) -> Arc<TaskScheduler> {
        Arc::clone(&self.scheduler)
    }
}
