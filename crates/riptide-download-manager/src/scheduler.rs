// 任务调度：按优先级排序待调度队列并在并发额度内准入
use crate::engine::DownloadEngine;
use log::{debug, warn};
use std::sync::atomic::Ordering;

/// 取空待调度队列，按优先级升序稳定排序后逐个准入。
///
/// 同优先级任务保持入队顺序。额度用尽或启动失败的任务按当前顺序
/// 回到队尾，下一轮调度时排序结果不变。
pub(crate) fn schedule(engine: &DownloadEngine) {
    let mut pending = engine.shared.registry.drain_pending();
    if pending.is_empty() {
        return;
    }

    // 稳定排序：同优先级保持原有顺序
    pending.sort_by_key(|(_, priority)| *priority);
    debug!("Scheduling {} pending task(s)", pending.len());

    for (task_id, _) in pending {
        let running = engine.shared.running_count.load(Ordering::SeqCst);
        let max_concurrent = engine.shared.max_concurrent.load(Ordering::SeqCst);
        if running >= max_concurrent {
            engine.shared.registry.requeue(task_id);
            continue;
        }

        if let Err(code) = engine.execute_task(task_id) {
            warn!("Start task id = {task_id} failed: {code}");
            engine.shared.registry.requeue(task_id);
        }
    }
}
