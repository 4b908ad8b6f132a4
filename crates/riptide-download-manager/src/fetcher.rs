//! HTTP 抓取器
//!
//! HEAD 探测文件大小与服务端哈希；Range GET 将响应体流式写入文件句柄，
//! 支持接收限速与低频进度回调（每个作业约 100ms 最多上报一次）。

use crate::error::{DownloadError, DownloadResult};
use futures::StreamExt;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

/// 进度上报的最小间隔
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// 抓取配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// 用户代理
    pub user_agent: Option<String>,
    /// 请求总超时时间（秒）
    pub timeout_seconds: u64,
    /// 连接超时时间（秒）
    pub connect_timeout_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: Some("riptide-download-manager/0.1.0".to_string()),
            timeout_seconds: 300,
            connect_timeout_seconds: 30,
        }
    }
}

/// HEAD 探测结果
#[derive(Debug, Clone, Default)]
pub struct ProbeInfo {
    /// `Content-Length` 解析出的文件大小
    pub file_size: u64,
    /// `X-File-Md5` 响应头携带的服务端哈希
    pub server_hash: Option<String>,
}

/// HTTP 抓取器
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// 创建默认配置的抓取器
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&FetchConfig::default())
    }

    /// 使用指定配置创建抓取器
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen with
    /// valid configuration)
    #[must_use]
    pub fn with_config(config: &FetchConfig) -> Self {
        let mut client_builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .tcp_keepalive(Duration::from_secs(60));

        if let Some(user_agent) = &config.user_agent {
            client_builder = client_builder.user_agent(user_agent);
        }

        let client = client_builder.build().expect("Failed to create HTTP client");

        Self { client }
    }

    /// HEAD 探测：取 `Content-Length` 与可选的 `X-File-Md5`
    ///
    /// # Errors
    ///
    /// - 网络请求失败
    /// - 服务器返回非成功状态
    /// - `Content-Length` 缺失或无法解析
    pub async fn probe(&self, url: &Url) -> DownloadResult<ProbeInfo> {
        debug!("Probing file info: {url}");

        let response = self.client.head(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(DownloadError::ServerStatus(response.status().as_u16()));
        }

        // reqwest 的头部查找本身不区分大小写
        let file_size = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or(DownloadError::ProbeFailed)?;

        let server_hash = response
            .headers()
            .get("x-file-md5")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        debug!("Probe result: size={file_size}, server hash present: {}", server_hash.is_some());
        Ok(ProbeInfo { file_size, server_hash })
    }

    /// Range GET：将响应体流式写入 `file`，返回接收的字节数
    ///
    /// - `range` 为 `Some((start, end))` 时携带 `Range: bytes=start-end`；
    /// - `rate_cap_bps` 为接收限速（字节/秒），0 表示不限速；
    /// - `progress` 以约 100ms 的节流间隔收到 `(已接收字节数, 瞬时速度)`。
    ///
    /// # Errors
    ///
    /// - 网络请求失败或服务器返回错误状态
    /// - 文件写入失败
    pub async fn fetch_range<F>(
        &self,
        url: &Url,
        file: &mut File,
        range: Option<(u64, u64)>,
        rate_cap_bps: u64,
        mut progress: F,
    ) -> DownloadResult<u64>
    where
        F: FnMut(u64, u64),
    {
        let mut request = self.client.get(url.clone());
        if let Some((start, end)) = range {
            debug!("Fetching {url} range {start}-{end}");
            request = request.header("Range", format!("bytes={start}-{end}"));
        } else {
            debug!("Fetching {url} (full body)");
        }

        let response = request.send().await?;
        if !response.status().is_success() && response.status().as_u16() != 206 {
            return Err(DownloadError::ServerStatus(response.status().as_u16()));
        }

        let mut limiter = RateLimiter::new(rate_cap_bps);
        let mut throttle = ProgressThrottle::new();
        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            limiter.pace(chunk.len() as u64).await;
            if let Some(speed) = throttle.tick(chunk.len() as u64) {
                progress(received, speed);
            }
        }

        file.flush().await?;
        Ok(received)
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// 构造请求 URL：任务 URL 为空时退回 `http://<endpoint>/download_endpoint?filename=<name>`
///
/// # Errors
///
/// Returns an error if the URL cannot be parsed
pub fn resolve_url(task_url: &str, endpoint: &str, file_name: &str) -> DownloadResult<Url> {
    if task_url.is_empty() {
        let mut url = Url::parse(&format!("http://{endpoint}/download_endpoint"))?;
        url.query_pairs_mut().append_pair("filename", file_name);
        Ok(url)
    } else {
        Ok(Url::parse(task_url)?)
    }
}

/// 接收限速：按经过时间核算字节预算，超支则补眠
struct RateLimiter {
    cap_bps: u64,
    window_start: Instant,
    window_bytes: u64,
}

impl RateLimiter {
    fn new(cap_bps: u64) -> Self {
        Self { cap_bps, window_start: Instant::now(), window_bytes: 0 }
    }

    async fn pace(&mut self, just_received: u64) {
        if self.cap_bps == 0 {
            return;
        }

        self.window_bytes += just_received;
        let elapsed = self.window_start.elapsed().as_secs_f64();
        let budget_secs = self.window_bytes as f64 / self.cap_bps as f64;
        if budget_secs > elapsed {
            tokio::time::sleep(Duration::from_secs_f64(budget_secs - elapsed)).await;
        }

        // 每秒滚动一次窗口，避免长连接里历史字节摊薄限速
        if self.window_start.elapsed() >= Duration::from_secs(1) {
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }
    }
}

/// 进度节流：时间戳归属于本次抓取作业，作业之间互不干扰
struct ProgressThrottle {
    last_tick: Instant,
    bytes_since_tick: u64,
}

impl ProgressThrottle {
    fn new() -> Self {
        Self { last_tick: Instant::now(), bytes_since_tick: 0 }
    }

    /// 距上次上报不足间隔时返回 `None`，否则返回期间的平均速度
    fn tick(&mut self, just_received: u64) -> Option<u64> {
        self.bytes_since_tick += just_received;
        let elapsed = self.last_tick.elapsed();
        if elapsed < PROGRESS_INTERVAL {
            return None;
        }

        let speed = (self.bytes_since_tick as f64 / elapsed.as_secs_f64()) as u64;
        self.last_tick = Instant::now();
        self.bytes_since_tick = 0;
        Some(speed)
    }
}
