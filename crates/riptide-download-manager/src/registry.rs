//! 任务登记表
//!
//! 状态索引与描述符索引成对维护，外加待调度队列与ID分配器，
//! 由同一把读写锁保护。持锁区间只做内存操作，任何文件或网络 I/O
//! 都在锁外进行；工作作业只在进度上报与终态迁移时短暂持锁。

use crate::error::ErrorCode;
use crate::planner::ChunkRange;
use crate::task::{StateCode, TaskDescriptor, TaskId, TaskInfo, TaskState};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// 新建父任务的速度种子值（沿用历史接口）
const PARENT_SPEED_SEED: u64 = 10 * 1024;

/// 父任务分片集的整体状况
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChildrenStatus {
    /// 尚无可用的分片子任务（从未规划过，或登记表里已查不到旧ID）
    None,
    /// 所有分片子任务均已成功
    AllSucceeded(Vec<TaskId>),
    /// 分片子任务齐全但还有未完成的
    Incomplete(Vec<TaskId>),
}

/// 等待分片完成时的判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AwaitVerdict {
    /// 全部分片成功
    AllSucceeded,
    /// 有分片失败（或子任务条目丢失）
    ChildFailed,
    /// 父任务被暂停/停止/删除，停止等待
    Interrupted,
    /// 仍有分片在进行
    Pending,
}

/// 删除任务时收集到的待清理文件路径
#[derive(Debug, Default)]
pub(crate) struct RemovedFiles {
    pub chunk_files: Vec<PathBuf>,
    pub target_file: Option<PathBuf>,
}

struct RegistryInner {
    states: HashMap<TaskId, TaskState>,
    descriptors: HashMap<TaskId, TaskDescriptor>,
    pending: VecDeque<TaskId>,
    next_task_id: TaskId,
}

impl RegistryInner {
    fn alloc_id(&mut self) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        id
    }

    /// 同名且未失败的任务视为重复
    fn has_duplicate(&self, save_name: &str) -> bool {
        self.states.iter().any(|(id, state)| {
            state.state_code != StateCode::Failed
                && self
                    .descriptors
                    .get(id)
                    .is_some_and(|desc| desc.save_name == save_name)
        })
    }

    fn insert_task(&mut self, mut desc: TaskDescriptor, seed_speed: u64) -> TaskId {
        // 分片相关字段由规划阶段填写
        desc.chunk_count = 0;
        desc.chunk_task_ids.clear();
        desc.finish_chunk = 0;

        let id = self.alloc_id();
        self.states.insert(id, TaskState::pending(seed_speed));
        self.descriptors.insert(id, desc);
        id
    }

    /// 以分片子任务的当前值刷新父任务的汇总进度
    fn refresh_parent_totals(&mut self, parent_id: TaskId) {
        let Some(chunk_ids) = self.descriptors.get(&parent_id).map(|d| d.chunk_task_ids.clone())
        else {
            return;
        };
        if chunk_ids.is_empty() {
            return;
        }

        let mut downloaded = 0u64;
        let mut total = 0u64;
        let mut speed = 0u64;
        for chunk_id in &chunk_ids {
            if let Some(state) = self.states.get(chunk_id) {
                downloaded += state.downloaded_size;
                total += state.total_size;
                speed += state.speed;
            }
        }

        if let Some(state) = self.states.get_mut(&parent_id) {
            state.downloaded_size = downloaded;
            state.total_size = total;
            state.speed = speed;
        }
    }
}

/// 任务登记表
pub(crate) struct TaskRegistry {
    inner: RwLock<RegistryInner>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                states: HashMap::new(),
                descriptors: HashMap::new(),
                pending: VecDeque::new(),
                next_task_id: 1,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 创建单个服务器任务并加入待调度队列
    pub(crate) fn create_server_task(&self, desc: TaskDescriptor) -> Result<TaskId, ErrorCode> {
        let mut inner = self.write();
        if inner.has_duplicate(&desc.save_name) {
            return Err(ErrorCode::TaskAlreadyExist);
        }

        let id = inner.insert_task(desc, PARENT_SPEED_SEED);
        inner.pending.push_back(id);
        Ok(id)
    }

    /// 批量创建：重复检查全部通过后才整批插入、按声明顺序入队
    pub(crate) fn create_batch_tasks(
        &self,
        descs: Vec<TaskDescriptor>,
    ) -> Result<Vec<TaskId>, ErrorCode> {
        let mut inner = self.write();
        for desc in &descs {
            if inner.has_duplicate(&desc.save_name) {
                return Err(ErrorCode::TaskAlreadyExist);
            }
        }

        let mut ids = Vec::with_capacity(descs.len());
        for desc in descs {
            let id = inner.insert_task(desc, PARENT_SPEED_SEED);
            inner.pending.push_back(id);
            ids.push(id);
        }
        Ok(ids)
    }

    /// 未完成任务快照（缓冲区协议）：`out` 容量不足时只写回所需
    /// 数量并返回成功，不填数据
    pub(crate) fn unfinished_tasks(&self, out: &mut [TaskId], len: &mut u32) {
        self.tasks_matching(out, len, |state| !state.state_code.is_finished());
    }

    /// 已完成任务快照（缓冲区协议），语义同 `unfinished_tasks`
    pub(crate) fn finished_tasks(&self, out: &mut [TaskId], len: &mut u32) {
        self.tasks_matching(out, len, |state| state.state_code.is_finished());
    }

    fn tasks_matching<F>(&self, out: &mut [TaskId], len: &mut u32, keep: F)
    where
        F: Fn(&TaskState) -> bool,
    {
        let inner = self.read();
        let mut ids: Vec<TaskId> =
            inner.states.iter().filter(|(_, s)| keep(s)).map(|(id, _)| *id).collect();
        ids.sort_unstable();

        let count = ids.len() as u32;
        if (*len as usize) < ids.len() {
            *len = count;
            return;
        }
        out[..ids.len()].copy_from_slice(&ids);
        *len = count;
    }

    pub(crate) fn state(&self, id: TaskId) -> Option<TaskState> {
        self.read().states.get(&id).copied()
    }

    pub(crate) fn descriptor(&self, id: TaskId) -> Option<TaskDescriptor> {
        self.read().descriptors.get(&id).cloned()
    }

    pub(crate) fn all_ids(&self) -> Vec<TaskId> {
        self.read().states.keys().copied().collect()
    }

    /// `execute_task` 的状态迁移：运行/已暂停中的任务拒绝重复启动，
    /// 其余状态进入 `Started` 并返回描述符快照
    pub(crate) fn try_begin_execute(&self, id: TaskId) -> Result<TaskDescriptor, ErrorCode> {
        let mut inner = self.write();
        let state = inner.states.get_mut(&id).ok_or(ErrorCode::TaskNotExist)?;
        if !state.state_code.can_start() {
            return Err(ErrorCode::TaskAlreadyRunning);
        }
        state.state_code = StateCode::Started;

        inner.descriptors.get(&id).cloned().ok_or(ErrorCode::TaskNotExist)
    }

    /// 工作作业开始拉取字节时标记自身为 `Started`
    pub(crate) fn mark_started(&self, id: TaskId) {
        if let Some(state) = self.write().states.get_mut(&id) {
            state.state_code = StateCode::Started;
        }
    }

    pub(crate) fn mark_task_failed(&self, id: TaskId) {
        let mut inner = self.write();
        if let Some(state) = inner.states.get_mut(&id) {
            state.state_code = StateCode::Failed;
            state.task_err_code = ErrorCode::Failed.code();
        }
    }

    /// 暂停：仅允许从 `Started` 暂停；级联暂停所有运行中的分片子任务。
    /// 返回需要在锁外 stat 的文件路径（用于回填已下载字节数）。
    pub(crate) fn mark_paused(&self, id: TaskId) -> Result<Vec<(TaskId, PathBuf)>, ErrorCode> {
        let mut inner = self.write();
        let state = inner.states.get_mut(&id).ok_or(ErrorCode::TaskNotExist)?;
        if state.state_code != StateCode::Started {
            return Err(ErrorCode::TaskNotRunning);
        }
        state.state_code = StateCode::Paused;

        let mut to_stat = Vec::new();
        let chunk_ids = inner
            .descriptors
            .get(&id)
            .map(|d| d.chunk_task_ids.clone())
            .unwrap_or_default();
        for chunk_id in chunk_ids {
            let is_running = inner
                .states
                .get(&chunk_id)
                .is_some_and(|s| s.state_code == StateCode::Started);
            if !is_running {
                continue;
            }
            if let Some(chunk_state) = inner.states.get_mut(&chunk_id) {
                chunk_state.state_code = StateCode::Paused;
            }
            if let Some(chunk_desc) = inner.descriptors.get(&chunk_id) {
                to_stat.push((chunk_id, chunk_desc.target_path()));
            }
        }

        if let Some(desc) = inner.descriptors.get(&id) {
            to_stat.push((id, desc.target_path()));
        }
        Ok(to_stat)
    }

    /// 锁外 stat 之后回填各任务的已下载字节数
    pub(crate) fn update_downloaded(&self, sizes: &[(TaskId, u64)]) {
        let mut inner = self.write();
        for (id, size) in sizes {
            if let Some(state) = inner.states.get_mut(id) {
                state.downloaded_size = *size;
            }
        }
    }

    /// 停止：任何非 `Stopped` 状态都可停止；同时移出待调度队列
    pub(crate) fn stop(&self, id: TaskId) -> Result<(), ErrorCode> {
        let mut inner = self.write();
        let state = inner.states.get_mut(&id).ok_or(ErrorCode::TaskNotExist)?;
        if state.state_code == StateCode::Stopped {
            return Err(ErrorCode::TaskAlreadyStopped);
        }
        state.state_code = StateCode::Stopped;
        inner.pending.retain(|pending_id| *pending_id != id);
        Ok(())
    }

    /// 删除任务及其分片子任务的登记项；返回待清理的文件路径，
    /// 实际删除文件由调用方在锁外完成
    pub(crate) fn remove_task(&self, id: TaskId) -> Result<RemovedFiles, ErrorCode> {
        let mut inner = self.write();
        if !inner.states.contains_key(&id) {
            return Err(ErrorCode::TaskNotExist);
        }

        let mut removed = RemovedFiles::default();
        let chunk_ids = inner
            .descriptors
            .get(&id)
            .map(|d| d.chunk_task_ids.clone())
            .unwrap_or_default();
        for chunk_id in chunk_ids {
            if let Some(chunk_desc) = inner.descriptors.get(&chunk_id) {
                removed.chunk_files.push(chunk_desc.target_path());
            }
            inner.states.remove(&chunk_id);
            inner.descriptors.remove(&chunk_id);
            inner.pending.retain(|pending_id| *pending_id != chunk_id);
        }

        if let Some(desc) = inner.descriptors.get(&id) {
            removed.target_file = Some(desc.target_path());
        }
        inner.states.remove(&id);
        inner.descriptors.remove(&id);
        inner.pending.retain(|pending_id| *pending_id != id);
        Ok(removed)
    }

    /// 设置优先级并级联到分片子任务
    pub(crate) fn set_priority(&self, id: TaskId, priority: u32) -> Result<(), ErrorCode> {
        let mut inner = self.write();
        let state = inner.states.get_mut(&id).ok_or(ErrorCode::TaskNotExist)?;
        state.priority = priority;

        let chunk_ids = inner
            .descriptors
            .get(&id)
            .map(|d| d.chunk_task_ids.clone())
            .unwrap_or_default();
        for chunk_id in chunk_ids {
            if let Some(chunk_state) = inner.states.get_mut(&chunk_id) {
                chunk_state.priority = priority;
            }
        }
        Ok(())
    }

    pub(crate) fn priority(&self, id: TaskId) -> Result<u32, ErrorCode> {
        self.read().states.get(&id).map(|s| s.priority).ok_or(ErrorCode::TaskNotExist)
    }

    /// 存储任务令牌（不透明字符串）
    pub(crate) fn set_token(&self, id: TaskId, token: &str) -> Result<(), ErrorCode> {
        let mut inner = self.write();
        let desc = inner.descriptors.get_mut(&id).ok_or(ErrorCode::TaskNotExist)?;
        desc.token = Some(token.to_string());
        Ok(())
    }

    /// 按信息名称读取任务描述符字段
    pub(crate) fn task_info(&self, id: TaskId, info_name: &str) -> Result<TaskInfo, ErrorCode> {
        let inner = self.read();
        let desc = inner.descriptors.get(&id).ok_or(ErrorCode::TaskNotExist)?;
        match info_name {
            "url" => Ok(TaskInfo::Text(desc.url.clone())),
            "save_path" => Ok(TaskInfo::Path(desc.save_path.clone())),
            "save_name" => Ok(TaskInfo::Text(desc.save_name.clone())),
            "hash" => Ok(TaskInfo::Text(desc.hash.clone())),
            "file_size" => Ok(TaskInfo::Size(desc.file_size)),
            "chunk_count" => Ok(TaskInfo::Count(desc.chunk_count)),
            "chunk_task_ids" => Ok(TaskInfo::Ids(desc.chunk_task_ids.clone())),
            "finish_chunk" => Ok(TaskInfo::Count(desc.finish_chunk)),
            _ => Err(ErrorCode::InfoNameNotSupport),
        }
    }

    /// 原始文件下载进度（0-100）；任务不存在时返回 0
    pub(crate) fn progress(&self, id: TaskId) -> f64 {
        let inner = self.read();
        let Some(state) = inner.states.get(&id) else { return 0.0 };

        let total = state.total_size;
        if total == 0 {
            return 0.0;
        }
        let downloaded = state.downloaded_size.min(total);
        (downloaded as f64 / total as f64) * 100.0
    }

    // ---- 调度队列 ----

    /// 一次性取空待调度队列，返回 `(任务ID, 优先级)`；
    /// 只保留仍处于待启动状态的任务
    pub(crate) fn drain_pending(&self) -> Vec<(TaskId, u32)> {
        let mut inner = self.write();
        let ids: Vec<TaskId> = inner.pending.drain(..).collect();
        ids.into_iter()
            .filter_map(|id| {
                let state = inner.states.get(&id)?;
                matches!(state.state_code, StateCode::StartPending | StateCode::StartWaiting)
                    .then(|| (id, state.priority))
            })
            .collect()
    }

    /// 重新入队（保持传入顺序，追加到队尾）
    pub(crate) fn requeue(&self, id: TaskId) {
        self.write().pending.push_back(id);
    }

    // ---- 分片规划与父子联动 ----

    /// 为父任务落实分片子任务：分配子ID、生成 `.chunkN` 描述符、
    /// 记录分片清单。旧的分片登记项（若有）会先被清掉。
    /// 单分片任务的子任务沿用父任务的文件名。
    pub(crate) fn plan_children(
        &self,
        parent_id: TaskId,
        ranges: &[ChunkRange],
    ) -> Result<Vec<TaskId>, ErrorCode> {
        let mut inner = self.write();
        let parent = inner.descriptors.get(&parent_id).ok_or(ErrorCode::TaskNotExist)?;
        let save_name = parent.save_name.clone();
        let save_path = parent.save_path.clone();
        let url = parent.url.clone();
        let stale_ids = parent.chunk_task_ids.clone();

        for stale_id in stale_ids {
            inner.states.remove(&stale_id);
            inner.descriptors.remove(&stale_id);
        }

        let mut chunk_ids = Vec::with_capacity(ranges.len());
        for range in ranges {
            let chunk_name = if ranges.len() == 1 {
                save_name.clone()
            } else {
                format!("{}.chunk{}", save_name, range.index)
            };
            let chunk_desc = TaskDescriptor {
                save_name: chunk_name,
                save_path: save_path.clone(),
                url: url.clone(),
                hash: String::new(),
                token: None,
                file_size: range.len(),
                chunk_count: 0,
                chunk_task_ids: Vec::new(),
                finish_chunk: 0,
            };

            let chunk_id = inner.alloc_id();
            inner.states.insert(chunk_id, TaskState::pending(range.len()));
            inner.descriptors.insert(chunk_id, chunk_desc);
            chunk_ids.push(chunk_id);
        }

        if let Some(parent) = inner.descriptors.get_mut(&parent_id) {
            parent.chunk_count = ranges.len() as u32;
            parent.chunk_task_ids = chunk_ids.clone();
            parent.finish_chunk = 0;
        }
        Ok(chunk_ids)
    }

    /// 父任务分片集的整体状况（重启续传判定用）
    pub(crate) fn children_status(&self, parent_id: TaskId) -> ChildrenStatus {
        let inner = self.read();
        let Some(parent) = inner.descriptors.get(&parent_id) else {
            return ChildrenStatus::None;
        };
        if parent.chunk_task_ids.is_empty() {
            return ChildrenStatus::None;
        }

        let mut all_succeeded = true;
        for chunk_id in &parent.chunk_task_ids {
            match inner.states.get(chunk_id) {
                Some(state) if state.state_code == StateCode::Succeeded => {}
                Some(_) => all_succeeded = false,
                // 旧ID已被清理，需要重新规划
                None => return ChildrenStatus::None,
            }
        }

        if all_succeeded {
            ChildrenStatus::AllSucceeded(parent.chunk_task_ids.clone())
        } else {
            ChildrenStatus::Incomplete(parent.chunk_task_ids.clone())
        }
    }

    /// 等待分片完成时的一次判定
    pub(crate) fn await_verdict(&self, parent_id: TaskId, children: &[TaskId]) -> AwaitVerdict {
        let inner = self.read();
        match inner.states.get(&parent_id) {
            Some(state) if state.state_code == StateCode::Started => {}
            _ => return AwaitVerdict::Interrupted,
        }

        let mut pending = false;
        for chunk_id in children {
            match inner.states.get(chunk_id).map(|s| s.state_code) {
                Some(StateCode::Succeeded) => {}
                Some(StateCode::Failed) | Some(StateCode::Stopped) | None => {
                    return AwaitVerdict::ChildFailed;
                }
                Some(_) => pending = true,
            }
        }

        if pending {
            AwaitVerdict::Pending
        } else {
            AwaitVerdict::AllSucceeded
        }
    }

    /// 分片进度上报：刷新分片自身与父任务的汇总值
    pub(crate) fn chunk_progress(
        &self,
        chunk_id: TaskId,
        parent_id: TaskId,
        downloaded: u64,
        total: u64,
        speed: u64,
    ) {
        let mut inner = self.write();
        if let Some(state) = inner.states.get_mut(&chunk_id) {
            state.downloaded_size = downloaded;
            state.total_size = total;
            state.speed = speed;
        }
        inner.refresh_parent_totals(parent_id);
    }

    /// 分片成功终态：分片置 `Succeeded`，父任务 `finish_chunk` 加一
    pub(crate) fn mark_chunk_done(
        &self,
        chunk_id: TaskId,
        parent_id: TaskId,
        downloaded: u64,
        total: u64,
    ) {
        let mut inner = self.write();
        if let Some(state) = inner.states.get_mut(&chunk_id) {
            state.state_code = StateCode::Succeeded;
            state.downloaded_size = downloaded;
            state.total_size = total;
            state.speed = 0;
        }
        if let Some(parent) = inner.descriptors.get_mut(&parent_id) {
            parent.finish_chunk += 1;
        }
        inner.refresh_parent_totals(parent_id);
    }

    /// 分片失败终态；部分数据保留在盘上供后续续传
    pub(crate) fn mark_chunk_failed(&self, chunk_id: TaskId) {
        let mut inner = self.write();
        if let Some(state) = inner.states.get_mut(&chunk_id) {
            state.state_code = StateCode::Failed;
            state.task_err_code = ErrorCode::Failed.code();
            state.speed = 0;
        }
    }

    /// 任务成功收尾：移除分片登记项并发布最终状态，单个独占临界区内完成。
    /// 观察到 `Succeeded` 的读者必然同时观察到最终大小与已移除的子任务。
    pub(crate) fn finalize_success(&self, parent_id: TaskId, file_size: u64) {
        let mut inner = self.write();
        let chunk_ids = inner
            .descriptors
            .get(&parent_id)
            .map(|d| d.chunk_task_ids.clone())
            .unwrap_or_default();
        for chunk_id in chunk_ids {
            inner.states.remove(&chunk_id);
            inner.descriptors.remove(&chunk_id);
        }

        if let Some(desc) = inner.descriptors.get_mut(&parent_id) {
            desc.file_size = file_size;
            desc.finish_chunk = desc.chunk_count;
        }
        if let Some(state) = inner.states.get_mut(&parent_id) {
            state.state_code = StateCode::Succeeded;
            state.downloaded_size = file_size;
            state.total_size = file_size;
            state.speed = 0;
        }
    }

    /// 清空登记表：两个索引、待调度队列与ID分配器一并复位
    pub(crate) fn clear(&self) {
        let mut inner = self.write();
        inner.states.clear();
        inner.descriptors.clear();
        inner.pending.clear();
        inner.next_task_id = 1;
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.read().pending.len()
    }
}
