//! 分片下载作业
//!
//! 每个作业负责一个分片：检查盘上已有字节决定续传区间，流式拉取到
//! `<save_name>.chunkN`，最后复核文件长度并登记终态。作业内的任何
//! 失败都不外抛，统一落为分片的 `Failed` 状态加日志。

use crate::engine::EngineShared;
use crate::error::{DownloadError, DownloadResult};
use crate::fetcher;
use crate::task::{StateCode, TaskId};
use log::{debug, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::sync::Notify;

/// 一个分片作业的输入
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkJob {
    pub chunk_id: TaskId,
    pub parent_id: TaskId,
    /// 分片起始字节（含）
    pub start: u64,
    /// 分片结束字节（含）
    pub end: u64,
}

/// 执行一个分片作业；无论成败都会通知 `done` 以唤醒等待方
pub(crate) async fn run_chunk(shared: Arc<EngineShared>, job: ChunkJob, done: Arc<Notify>) {
    if let Err(e) = download_chunk(&shared, job).await {
        warn!(
            "下载分片失败 (task {} range {}-{}): {e}",
            job.chunk_id, job.start, job.end
        );
        shared.registry.mark_chunk_failed(job.chunk_id);
    }
    done.notify_one();
}

async fn download_chunk(shared: &EngineShared, job: ChunkJob) -> DownloadResult<()> {
    let Some(chunk_desc) = shared.registry.descriptor(job.chunk_id) else {
        // 任务在排队期间被删除
        return Ok(());
    };

    // 暂停/停止在分片边界生效：父任务已不在运行态就不再拉取
    match shared.registry.state(job.parent_id).map(|s| s.state_code) {
        Some(StateCode::Started) => {}
        _ => {
            debug!("Parent task {} no longer running, skipping chunk {}", job.parent_id, job.chunk_id);
            return Ok(());
        }
    }

    let chunk_path = chunk_desc.target_path();
    let expected_size = job.end - job.start + 1;

    let existing = match tokio::fs::metadata(&chunk_path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    // 盘上已有完整分片：直接登记成功，不再发请求
    if existing >= expected_size {
        debug!("Chunk {} already complete on disk ({existing} bytes)", job.chunk_id);
        shared.registry.mark_chunk_done(job.chunk_id, job.parent_id, existing, expected_size);
        return Ok(());
    }

    tokio::fs::create_dir_all(&chunk_desc.save_path).await?;

    let mut file = if existing > 0 {
        OpenOptions::new().append(true).open(&chunk_path).await?
    } else {
        OpenOptions::new().create(true).write(true).truncate(true).open(&chunk_path).await?
    };

    // 续传区间从已有字节之后开始
    let request_start = job.start + existing;
    if request_start > job.end {
        shared.registry.mark_chunk_done(job.chunk_id, job.parent_id, existing, expected_size);
        return Ok(());
    }

    // 分片URL为空时按父文件名回退到配置端点
    let base_name = match chunk_desc.save_name.find(".chunk") {
        Some(pos) => &chunk_desc.save_name[..pos],
        None => chunk_desc.save_name.as_str(),
    };
    let url = fetcher::resolve_url(&chunk_desc.url, &shared.endpoint, base_name)?;

    shared.registry.mark_started(job.chunk_id);

    let rate_cap_bps = shared.download_speed_limit_kib.load(Ordering::Relaxed) * 1024;
    let registry = &shared.registry;
    let fetch_result = shared
        .fetcher
        .fetch_range(&url, &mut file, Some((request_start, job.end)), rate_cap_bps, |received, speed| {
            registry.chunk_progress(
                job.chunk_id,
                job.parent_id,
                existing + received,
                expected_size,
                speed,
            );
        })
        .await;

    drop(file);
    fetch_result?;

    // 重新检查盘上长度，防止短写
    let current_size = match tokio::fs::metadata(&chunk_path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    if current_size < expected_size {
        return Err(DownloadError::ShortChunk { expected: expected_size, actual: current_size });
    }

    shared.registry.mark_chunk_done(job.chunk_id, job.parent_id, current_size, expected_size);
    debug!("Chunk {} finished ({current_size} bytes)", job.chunk_id);
    Ok(())
}
