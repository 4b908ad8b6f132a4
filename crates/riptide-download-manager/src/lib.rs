//! # riptide-download-manager
//!
//! 并发分片下载引擎：把大文件切成固定大小的字节区间并行拉取，落盘
//! 进度可跨进程重启续传，合并后按内容哈希校验完整性；多个任务在有界
//! 作业池上按优先级调度，受全局接收限速约束。
//!
//! ## 功能模块
//!
//! - [`engine`] - 引擎上下文对象与全部公开操作
//! - [`task`] - 任务状态码、状态快照与描述符
//! - [`error`] - 数值错误码与内部错误类型
//! - [`fetcher`] - HTTP 探测与 Range 流式拉取
//! - [`planner`] - 分片区间规划
//! - [`hasher`] - 流式 MD5
//! - [`pool`] - 有界作业池

pub mod engine;
pub mod error;
pub mod fetcher;
pub mod hasher;
pub mod planner;
pub mod pool;
pub mod task;

mod coordinator;
mod merger;
mod registry;
mod scheduler;
mod worker;

// 重新导出主要类型
pub use engine::{DownloadEngine, EngineConfig, VERSION};
pub use error::{DownloadError, DownloadResult, ErrorCode};
pub use fetcher::{FetchConfig, Fetcher, ProbeInfo};
pub use planner::{ChunkRange, CHUNK_SIZE, CHUNK_THRESHOLD};
pub use task::{StateCode, TaskDescriptor, TaskId, TaskInfo, TaskState};
