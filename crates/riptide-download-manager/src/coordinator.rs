//! 任务协调器
//!
//! 驱动单个任务从头到尾：探测大小、规划分片、派发分片作业、等待
//! 完成、合并校验、发布终态。重启场景下若所有分片已在盘上完成，
//! 直接跳到合并收尾，不重复下载。

use crate::engine::EngineShared;
use crate::fetcher;
use crate::merger;
use crate::planner;
use crate::registry::{AwaitVerdict, ChildrenStatus};
use crate::task::{TaskDescriptor, TaskId};
use crate::worker::{self, ChunkJob};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// 驱动一个任务到终态；由 `execute_task` 在独立 tokio 任务中调用
pub(crate) async fn run_task(shared: Arc<EngineShared>, parent_id: TaskId, desc: TaskDescriptor) {
    // 1. 探测文件大小与服务端哈希
    let url = match fetcher::resolve_url(&desc.url, &shared.endpoint, &desc.save_name) {
        Ok(url) => url,
        Err(e) => {
            warn!("任务 {parent_id} URL 无效: {e}");
            shared.registry.mark_task_failed(parent_id);
            return;
        }
    };
    let probe = match shared.fetcher.probe(&url).await {
        Ok(probe) if probe.file_size > 0 => probe,
        Ok(_) => {
            warn!("任务 {parent_id} 获取到的文件大小为 0");
            shared.registry.mark_task_failed(parent_id);
            return;
        }
        Err(e) => {
            warn!("任务 {parent_id} 探测失败: {e}");
            shared.registry.mark_task_failed(parent_id);
            return;
        }
    };
    let file_size = probe.file_size;
    let server_hash = probe.server_hash;
    debug!("Task {parent_id}: size={file_size}, server hash: {server_hash:?}");

    // 2. 重启短路：所有分片已完成时直接合并收尾
    if let ChildrenStatus::AllSucceeded(children) = shared.registry.children_status(parent_id) {
        info!("任务 {parent_id} 检测到所有分片已下载完成，准备合并");
        finalize(&shared, parent_id, &desc, &children, file_size, server_hash.as_deref()).await;
        return;
    }

    // 3. 规划分片并确定子任务清单
    let ranges = planner::plan_chunks(file_size);
    let children = match shared.registry.children_status(parent_id) {
        ChildrenStatus::Incomplete(existing) if existing.len() == ranges.len() => existing,
        // 从未规划过，或旧清单与当前大小不符：重新落实子任务
        _ => match shared.registry.plan_children(parent_id, &ranges) {
            Ok(children) => children,
            Err(e) => {
                warn!("任务 {parent_id} 分片规划失败: {e}");
                shared.registry.mark_task_failed(parent_id);
                return;
            }
        },
    };

    // 4. 派发分片作业
    let done = Arc::new(Notify::new());
    for (range, chunk_id) in ranges.iter().zip(&children) {
        let job = ChunkJob {
            chunk_id: *chunk_id,
            parent_id,
            start: range.start,
            end: range.end,
        };
        shared.pool.submit(worker::run_chunk(Arc::clone(&shared), job, Arc::clone(&done)));
    }

    // 5. 等待全部分片到达终态（分片作业每次终态迁移都会通知）
    loop {
        let notified = done.notified();
        match shared.registry.await_verdict(parent_id, &children) {
            AwaitVerdict::AllSucceeded => break,
            AwaitVerdict::ChildFailed => {
                warn!("任务 {parent_id} 存在失败分片");
                shared.registry.mark_task_failed(parent_id);
                return;
            }
            AwaitVerdict::Interrupted => {
                // 暂停/停止/删除：保留盘上数据，等用户再次启动时续传
                debug!("Task {parent_id} interrupted, leaving partial data in place");
                return;
            }
            AwaitVerdict::Pending => notified.await,
        }
    }

    // 6. 合并校验并发布终态
    finalize(&shared, parent_id, &desc, &children, file_size, server_hash.as_deref()).await;
}

/// 合并 → 哈希校验 → 清理子任务 → 发布成功
async fn finalize(
    shared: &EngineShared,
    parent_id: TaskId,
    desc: &TaskDescriptor,
    children: &[TaskId],
    file_size: u64,
    server_hash: Option<&str>,
) {
    let final_path = desc.target_path();

    if children.len() > 1 {
        let chunk_paths: Vec<PathBuf> = children
            .iter()
            .filter_map(|chunk_id| shared.registry.descriptor(*chunk_id))
            .map(|chunk_desc| chunk_desc.target_path())
            .collect();
        if let Err(e) = merger::merge_chunks(&final_path, &chunk_paths).await {
            warn!("任务 {parent_id} 合并分片失败: {e}");
            shared.registry.mark_task_failed(parent_id);
            return;
        }
    }

    // 预期哈希：服务端优先，其次调用方在创建时给出的哈希
    let expected = match server_hash {
        Some(hash) if !hash.is_empty() => Some(hash),
        _ if !desc.hash.is_empty() => Some(desc.hash.as_str()),
        _ => None,
    };
    if let Err(e) = merger::verify_output(&final_path, expected).await {
        warn!("任务 {parent_id} 校验失败: {e}");
        shared.registry.mark_task_failed(parent_id);
        return;
    }

    shared.registry.finalize_success(parent_id, file_size);
    info!("任务 {parent_id} 下载完成: {}", final_path.display());
}
