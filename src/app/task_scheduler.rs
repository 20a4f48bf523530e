//! # 后台任务调度器
//!
//! 统一注册、启动与停止后台任务

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::app::tasks::TaskType;
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::{lerror, linfo};

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type TaskAction = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// 调度任务定义
#[derive(Clone)]
pub struct ScheduledTask {
    task_type: TaskType,
    start: TaskAction,
    stop: Option<TaskAction>,
}

impl ScheduledTask {
    #[must_use]
    pub const fn builder(task_type: TaskType) -> ScheduledTaskBuilder {
        ScheduledTaskBuilder {
            task_type,
            start: None,
            stop: None,
        }
    }

    #[must_use]
    pub const fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn start(&self) -> Result<()> {
        linfo!(
            "system",
            LogStage::BackgroundTask,
            LogComponent::Scheduler,
            "task_start",
            "启动后台任务",
            task = %self.task_type
        );
        (self.start)().await
    }

    async fn stop(&self) -> Result<()> {
        let Some(action) = &self.stop else {
            return Ok(());
        };
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Scheduler,
            "task_stop",
            "停止后台任务",
            task = %self.task_type
        );
        action().await
    }
}

/// 任务构建器
pub struct ScheduledTaskBuilder {
    task_type: TaskType,
    start: Option<TaskAction>,
    stop: Option<TaskAction>,
}

impl ScheduledTaskBuilder {
    #[must_use]
    pub fn on_start<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.start = Some(Arc::new(move || Box::pin(action())));
        self
    }

    #[must_use]
    pub fn on_stop<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.stop = Some(Arc::new(move || Box::pin(action())));
        self
    }

    /// 构建任务，未注册启动逻辑时返回错误
    pub fn build(self) -> Result<ScheduledTask> {
        let start = self
            .start
            .ok_or_else(|| crate::internal_error!("后台任务 {} 缺少启动逻辑", self.task_type))?;
        Ok(ScheduledTask {
            task_type: self.task_type,
            start,
            stop: self.stop,
        })
    }
}

/// 后台任务调度器
#[derive(Default)]
pub struct TaskScheduler {
    tasks: RwLock<Vec<ScheduledTask>>,
}

impl TaskScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, task: ScheduledTask) {
        self.tasks.write().await.push(task);
    }

    /// 已注册的任务类型
    pub async fn registered(&self) -> Vec<TaskType> {
        self.tasks
            .read()
            .await
            .iter()
            .map(ScheduledTask::task_type)
            .collect()
    }

    /// 按注册顺序启动全部任务
    pub async fn start_all(&self) -> Result<()> {
        let tasks = self.tasks.read().await.clone();
        for task in tasks {
            if let Err(err) = task.start().await {
                lerror!(
                    "system",
                    LogStage::BackgroundTask,
                    LogComponent::Scheduler,
                    "task_start_failed",
                    "后台任务启动失败",
                    task = %task.task_type,
                    error = %err
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// 逆序停止全部任务，单个任务失败不影响其余任务
    pub async fn shutdown(&self) {
        let tasks = self.tasks.read().await.clone();
        for task in tasks.into_iter().rev() {
            if let Err(err) = task.stop().await {
                lerror!(
                    "system",
                    LogStage::Shutdown,
                    LogComponent::Scheduler,
                    "task_stop_failed",
                    "后台任务停止失败",
                    task = %task.task_type,
                    error = %err
                );
            }
        }
    }
}
