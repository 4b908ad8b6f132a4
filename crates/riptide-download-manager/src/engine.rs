//! 下载引擎
//!
//! 引擎上下文对象持有任务登记表、HTTP 抓取器、作业池与各项运行期
//! 开关，构造即就绪，`shutdown` 即回收。所有公开操作都是引擎方法，
//! 错误以数值错误码（`ErrorCode`）返回。
//!
//! 引擎需要运行在 tokio 运行时内：`execute_task` 会派生协调器任务，
//! 分片作业经由内部作业池执行。

use crate::error::ErrorCode;
use crate::fetcher::{FetchConfig, Fetcher};
use crate::pool::WorkerPool;
use crate::registry::TaskRegistry;
use crate::scheduler;
use crate::task::{TaskDescriptor, TaskId, TaskInfo, TaskState};
use crate::coordinator;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// 引擎版本号
pub const VERSION: &str = "1.0.0";

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 默认下载端点（`host:port`）；任务 URL 为空时使用
    pub endpoint: String,
    /// 最大并发任务数
    pub max_concurrent_task_count: u32,
    /// 下载速度限制，单位是KiB/s，默认为不限速1000MB/s
    pub download_speed_limit: u64,
    /// 上传开关（仅作为配置项保留）
    pub upload_switch: bool,
    /// 上传速度限制（仅作为配置项保留），单位 KiB/s
    pub upload_speed_limit: u64,
    /// HTTP 抓取配置
    pub fetch: FetchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:8848".to_string(),
            max_concurrent_task_count: 20,
            download_speed_limit: 1024 * 1000,
            upload_switch: false,
            upload_speed_limit: 100,
            fetch: FetchConfig::default(),
        }
    }
}

/// 引擎内部共享状态：协调器与分片作业通过 `Arc` 共同持有
pub(crate) struct EngineShared {
    pub(crate) registry: TaskRegistry,
    pub(crate) fetcher: Fetcher,
    pub(crate) pool: WorkerPool,
    pub(crate) endpoint: String,
    pub(crate) running_count: AtomicU32,
    pub(crate) max_concurrent: AtomicU32,
    pub(crate) download_speed_limit_kib: AtomicU64,
    pub(crate) upload_switch: AtomicBool,
    pub(crate) upload_speed_limit_kib: AtomicU64,
    alive: AtomicBool,
}

/// 下载引擎
///
/// 并发分片下载引擎的上下文对象。任务经 `create_server_task` /
/// `create_batch_task` 创建后进入待调度队列，`schedule_and_start_tasks`
/// 按优先级准入，协调器完成探测、分片、合并与校验。
pub struct DownloadEngine {
    pub(crate) shared: Arc<EngineShared>,
}

impl DownloadEngine {
    /// 以默认配置创建引擎
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// 以指定配置创建引擎
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let max_concurrent = config.max_concurrent_task_count;
        info!("Download engine starting, max concurrent tasks: {max_concurrent}");
        Self {
            shared: Arc::new(EngineShared {
                registry: TaskRegistry::new(),
                fetcher: Fetcher::with_config(&config.fetch),
                pool: WorkerPool::new(max_concurrent as usize),
                endpoint: config.endpoint,
                running_count: AtomicU32::new(0),
                max_concurrent: AtomicU32::new(max_concurrent),
                download_speed_limit_kib: AtomicU64::new(config.download_speed_limit),
                upload_switch: AtomicBool::new(config.upload_switch),
                upload_speed_limit_kib: AtomicU64::new(config.upload_speed_limit),
                alive: AtomicBool::new(true),
            }),
        }
    }

    fn ensure_alive(&self) -> Result<(), ErrorCode> {
        if self.shared.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ErrorCode::SdkNotInit)
        }
    }

    /// 关闭引擎：停止所有任务、关闭作业池并清空登记表。
    /// 重复关闭返回 `SdkNotInit`。
    ///
    /// # Errors
    ///
    /// Returns `SdkNotInit` if the engine has already been shut down
    pub fn shutdown(&self) -> Result<(), ErrorCode> {
        if !self.shared.alive.swap(false, Ordering::SeqCst) {
            return Err(ErrorCode::SdkNotInit);
        }

        for task_id in self.shared.registry.all_ids() {
            let _ = self.shared.registry.stop(task_id);
        }
        self.shared.pool.close();
        self.shared.registry.clear();
        self.shared.running_count.store(0, Ordering::SeqCst);
        info!("Download engine shut down");
        Ok(())
    }

    // ---- 任务创建 ----

    /// 创建服务器下载任务并加入待调度队列
    ///
    /// # Errors
    ///
    /// - 文件名为空 ⇒ `ParamError`
    /// - 存在同名且未失败的任务 ⇒ `TaskAlreadyExist`
    pub fn create_server_task(&self, desc: TaskDescriptor) -> Result<TaskId, ErrorCode> {
        self.ensure_alive()?;
        if desc.save_name.is_empty() {
            return Err(ErrorCode::ParamError);
        }

        let task_id = self.shared.registry.create_server_task(desc)?;
        debug!("Created server task {task_id}");
        Ok(task_id)
    }

    /// 批量创建任务：重复检查全部通过后才整批插入，并按声明顺序入队
    ///
    /// # Errors
    ///
    /// - 列表为空或包含空文件名 ⇒ `ParamError`
    /// - 任意一项与现有未失败任务同名 ⇒ `TaskAlreadyExist`（整批回绝）
    pub fn create_batch_task(&self, descs: Vec<TaskDescriptor>) -> Result<Vec<TaskId>, ErrorCode> {
        self.ensure_alive()?;
        if descs.is_empty() || descs.iter().any(|d| d.save_name.is_empty()) {
            return Err(ErrorCode::ParamError);
        }

        let task_ids = self.shared.registry.create_batch_tasks(descs)?;
        debug!("Created batch of {} task(s)", task_ids.len());
        Ok(task_ids)
    }

    // ---- 任务控制 ----

    /// 启动任务：状态迁入 `Started` 并派生协调器任务
    ///
    /// # Errors
    ///
    /// - 任务不存在 ⇒ `TaskNotExist`
    /// - 已在运行或已暂停 ⇒ `TaskAlreadyRunning`
    pub fn execute_task(&self, task_id: TaskId) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        let desc = self.shared.registry.try_begin_execute(task_id)?;
        self.shared.running_count.fetch_add(1, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            coordinator::run_task(Arc::clone(&shared), task_id, desc).await;
            shared.running_count.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }

    /// 按优先级调度并启动待调度任务
    ///
    /// # Errors
    ///
    /// Returns `SdkNotInit` if the engine has been shut down
    pub fn schedule_and_start_tasks(&self) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        scheduler::schedule(self);
        Ok(())
    }

    /// 暂停运行中的任务；级联暂停运行中的分片子任务，并以盘上
    /// 文件大小回填已下载字节数
    ///
    /// # Errors
    ///
    /// - 任务不存在 ⇒ `TaskNotExist`
    /// - 任务未在运行 ⇒ `TaskNotRunning`
    pub fn pause_task(&self, task_id: TaskId) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        let to_stat = self.shared.registry.mark_paused(task_id)?;

        // 锁外 stat，避免在登记表锁内做文件 I/O
        let mut sizes = Vec::with_capacity(to_stat.len());
        for (id, path) in to_stat {
            if let Ok(meta) = std::fs::metadata(&path) {
                sizes.push((id, meta.len()));
            }
        }
        self.shared.registry.update_downloaded(&sizes);
        Ok(())
    }

    /// 停止任务：任何非 `Stopped` 状态都可停止
    ///
    /// # Errors
    ///
    /// - 任务不存在 ⇒ `TaskNotExist`
    /// - 已停止 ⇒ `TaskAlreadyStopped`
    pub fn stop_task(&self, task_id: TaskId) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        self.shared.registry.stop(task_id)
    }

    /// 删除任务及其分片子任务；`delete_files` 为真时同时删除盘上文件
    ///
    /// # Errors
    ///
    /// Returns `TaskNotExist` if the task is not found
    pub fn delete_task(&self, task_id: TaskId, delete_files: bool) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        let removed = self.shared.registry.remove_task(task_id)?;

        if delete_files {
            for path in &removed.chunk_files {
                let _ = std::fs::remove_file(path);
            }
            if let Some(path) = &removed.target_file {
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }

    // ---- 任务查询 ----

    /// 任务状态快照
    ///
    /// # Errors
    ///
    /// Returns `TaskNotExist` if the task is not found
    pub fn task_state(&self, task_id: TaskId) -> Result<TaskState, ErrorCode> {
        self.ensure_alive()?;
        self.shared.registry.state(task_id).ok_or(ErrorCode::TaskNotExist)
    }

    /// 按信息名称读取任务信息；支持的名称：`url`、`save_path`、
    /// `save_name`、`hash`、`file_size`、`chunk_count`、`chunk_task_ids`、
    /// `finish_chunk`
    ///
    /// # Errors
    ///
    /// - 任务不存在 ⇒ `TaskNotExist`
    /// - 名称不在支持集合内 ⇒ `InfoNameNotSupport`
    pub fn task_info(&self, task_id: TaskId, info_name: &str) -> Result<TaskInfo, ErrorCode> {
        self.ensure_alive()?;
        self.shared.registry.task_info(task_id, info_name)
    }

    /// 未完成任务快照（缓冲区协议）：`len` 传入 `out` 的容量；容量不足
    /// 时写回所需数量并返回成功，不填数据
    ///
    /// # Errors
    ///
    /// Returns `SdkNotInit` if the engine has been shut down
    pub fn unfinished_tasks(&self, out: &mut [TaskId], len: &mut u32) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        self.shared.registry.unfinished_tasks(out, len);
        Ok(())
    }

    /// 已完成任务快照（缓冲区协议），语义同 `unfinished_tasks`
    ///
    /// # Errors
    ///
    /// Returns `SdkNotInit` if the engine has been shut down
    pub fn finished_tasks(&self, out: &mut [TaskId], len: &mut u32) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        self.shared.registry.finished_tasks(out, len);
        Ok(())
    }

    /// 原始文件下载进度（0-100）；任务不存在时返回 0
    #[must_use]
    pub fn task_progress(&self, task_id: TaskId) -> f64 {
        self.shared.registry.progress(task_id)
    }

    // ---- 优先级与令牌 ----

    /// 设置任务优先级（值越小优先级越高），级联到分片子任务
    ///
    /// # Errors
    ///
    /// Returns `TaskNotExist` if the task is not found
    pub fn set_task_priority(&self, task_id: TaskId, priority: u32) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        self.shared.registry.set_priority(task_id, priority)
    }

    /// 读取任务优先级
    ///
    /// # Errors
    ///
    /// Returns `TaskNotExist` if the task is not found
    pub fn task_priority(&self, task_id: TaskId) -> Result<u32, ErrorCode> {
        self.ensure_alive()?;
        self.shared.registry.priority(task_id)
    }

    /// 存储任务令牌（不透明字符串，引擎不解释其内容）
    ///
    /// # Errors
    ///
    /// Returns `TaskNotExist` if the task is not found
    pub fn set_task_token(&self, task_id: TaskId, token: &str) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        self.shared.registry.set_token(task_id, token)
    }

    // ---- 运行期开关 ----

    /// 设置最大并发任务数（只影响后续调度准入，作业池宽度在创建时固定）
    ///
    /// # Errors
    ///
    /// Returns `SdkNotInit` if the engine has been shut down
    pub fn set_concurrent_task_count(&self, count: u32) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        self.shared.max_concurrent.store(count, Ordering::SeqCst);
        Ok(())
    }

    /// 设置下载速度限制（KiB/s），对后续发起的分片拉取生效
    ///
    /// # Errors
    ///
    /// Returns `SdkNotInit` if the engine has been shut down
    pub fn set_download_speed_limit(&self, speed_kib: u64) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        self.shared.download_speed_limit_kib.store(speed_kib, Ordering::SeqCst);
        Ok(())
    }

    /// 设置上传开关（仅保存配置）
    ///
    /// # Errors
    ///
    /// Returns `SdkNotInit` if the engine has been shut down
    pub fn set_upload_switch(&self, upload_switch: bool) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        self.shared.upload_switch.store(upload_switch, Ordering::SeqCst);
        Ok(())
    }

    /// 设置上传速度限制（仅保存配置），单位 KiB/s
    ///
    /// # Errors
    ///
    /// Returns `SdkNotInit` if the engine has been shut down
    pub fn set_upload_speed_limit(&self, speed_kib: u64) -> Result<(), ErrorCode> {
        self.ensure_alive()?;
        self.shared.upload_speed_limit_kib.store(speed_kib, Ordering::SeqCst);
        Ok(())
    }

    /// 引擎版本号
    #[must_use]
    pub fn version(&self) -> &'static str {
        VERSION
    }
}

impl Default for DownloadEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DownloadEngine {
    fn drop(&mut self) {
        if self.shared.alive.load(Ordering::SeqCst) {
            let _ = self.shutdown();
        }
    }
}
