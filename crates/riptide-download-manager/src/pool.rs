// 作业池：信号量限宽的 tokio 任务派发
use log::debug;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// 有界作业池
///
/// 所有分片下载作业经由此处派发；同时运行的作业数不超过创建时的
/// 工位数，超出的作业排队等待空闲工位。`close` 之后提交的作业直接丢弃。
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// 创建一个 `max_workers` 个工位的作业池
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(max_workers)) }
    }

    /// 提交一个作业；作业在拿到空闲工位后运行
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let permit = match permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    // 池已关闭
                    debug!("Worker pool closed, dropping job");
                    return;
                }
            };
            job.await;
            drop(permit);
        });
    }

    /// 关闭池：唤醒所有等待工位的作业并使其放弃执行；
    /// 已经运行中的作业不受影响
    pub fn close(&self) {
        self.permits.close();
    }
}
