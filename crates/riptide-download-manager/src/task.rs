// 任务数据模型：状态码、状态快照与任务描述符
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 任务ID，进程生命周期内单调递增，不复用
pub type TaskId = u64;

/// 任务状态码（数值与既有外部接口保持一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StateCode {
    /// 未知状态
    Unknown = 0,
    /// 开始等待
    StartWaiting = 3,
    /// 开始挂起
    StartPending = 4,
    /// 已启动
    Started = 5,
    /// 停止挂起
    StopPending = 6,
    /// 已停止
    Stopped = 7,
    /// 成功
    Succeeded = 8,
    /// 失败
    Failed = 9,
    /// 已暂停
    Paused = 10,
}

impl StateCode {
    /// 终态：成功、失败或已停止，不再参与调度
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, StateCode::Succeeded | StateCode::Failed | StateCode::Stopped)
    }

    /// 可以从该状态调用 `execute_task` 进入 `Started`
    #[must_use]
    pub fn can_start(self) -> bool {
        !matches!(self, StateCode::Started | StateCode::Paused)
    }
}

/// 任务状态快照
#[derive(Debug, Clone, Copy)]
pub struct TaskState {
    /// 当前速度（字节/秒）
    pub speed: u64,
    /// 总大小（字节）
    pub total_size: u64,
    /// 已下载大小（字节）
    pub downloaded_size: u64,
    /// 状态码
    pub state_code: StateCode,
    /// 任务错误码
    pub task_err_code: u32,
    /// 任务令牌错误
    pub task_token_err: u32,
    /// 任务优先级，值越小优先级越高
    pub priority: u32,
}

impl TaskState {
    /// 新建任务的初始状态（`speed` 字段沿用历史接口的种子值）
    pub(crate) fn pending(seed_speed: u64) -> Self {
        Self {
            speed: seed_speed,
            total_size: 0,
            downloaded_size: 0,
            state_code: StateCode::StartPending,
            task_err_code: 0,
            task_token_err: 0,
            priority: 100,
        }
    }
}

/// 任务描述符
///
/// 创建后除分片相关字段（`chunk_count` / `chunk_task_ids` / `finish_chunk`）
/// 外不再变化。
#[derive(Debug, Clone, Default)]
pub struct TaskDescriptor {
    /// 最终落盘文件名
    pub save_name: String,
    /// 保存目录
    pub save_path: PathBuf,
    /// 任务URL；为空时按配置端点推导
    pub url: String,
    /// 调用方预期的文件哈希（可为空）
    pub hash: String,
    /// 任务令牌（不透明字符串，仅存储）
    pub token: Option<String>,
    /// 文件总大小；探测前为 0
    pub file_size: u64,
    /// 文件分片数量
    pub chunk_count: u32,
    /// 分片子任务ID（按分片顺序）
    pub chunk_task_ids: Vec<TaskId>,
    /// 已下载完成分片数量
    pub finish_chunk: u32,
}

impl TaskDescriptor {
    /// 新建一个还未探测过大小的任务描述符
    #[must_use]
    pub fn new(save_name: impl Into<String>, save_path: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            save_name: save_name.into(),
            save_path: save_path.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// 目标文件完整路径
    #[must_use]
    pub fn target_path(&self) -> PathBuf {
        self.save_path.join(&self.save_name)
    }
}

/// `task_info` 按信息名称返回的类型化取值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskInfo {
    /// `url` / `save_name` / `hash`
    Text(String),
    /// `save_path`
    Path(PathBuf),
    /// `file_size`
    Size(u64),
    /// `chunk_count` / `finish_chunk`
    Count(u32),
    /// `chunk_task_ids`
    Ids(Vec<TaskId>),
}
