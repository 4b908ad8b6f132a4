// Riptide 项目根库
// 主要用于支持集成测试，重新导出下载引擎核心功能

pub use riptide_download_manager as download_manager;

// 重新导出常用类型，方便集成测试使用
pub use riptide_download_manager::{
    DownloadEngine, DownloadError, EngineConfig, ErrorCode, StateCode, TaskDescriptor, TaskId,
    TaskInfo, TaskState,
};
