//! 集成测试共用工具
//!
//! 内置一个极简 HTTP 测试服务器：支持 HEAD 探测（`Content-Length` /
//! `X-File-Md5`）与带 `Range` 头的 GET 切片响应，并记录收到的请求，
//! 供断言续传区间与调度顺序使用。测试不依赖外部网络。

use md5::{Digest, Md5};
use riptide_download_manager::{DownloadEngine, StateCode, TaskId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// 服务器收到的一次请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub filename: String,
    pub range: Option<String>,
}

#[derive(Debug, Clone)]
struct ServedFile {
    body: Vec<u8>,
    md5: Option<String>,
}

/// 测试用 HTTP 文件服务器
pub struct TestServer {
    endpoint: String,
    files: Arc<Mutex<HashMap<String, ServedFile>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// 在随机端口启动服务器
    pub async fn start() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("绑定测试端口失败");
        let endpoint = listener.local_addr().expect("读取监听地址失败").to_string();
        let files: Arc<Mutex<HashMap<String, ServedFile>>> = Arc::new(Mutex::new(HashMap::new()));
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));

        let files_for_loop = Arc::clone(&files);
        let requests_for_loop = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let files = Arc::clone(&files_for_loop);
                let requests = Arc::clone(&requests_for_loop);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, files, requests).await;
                });
            }
        });

        Self { endpoint, files, requests, handle }
    }

    /// 服务器地址（`host:port`），可直接用作引擎端点
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 注册一个文件，`X-File-Md5` 为其真实摘要
    pub fn serve(&self, name: &str, body: Vec<u8>) {
        let digest = md5_hex(&body);
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), ServedFile { body, md5: Some(digest) });
    }

    /// 注册一个文件并指定（可能错误的）`X-File-Md5`
    pub fn serve_with_md5(&self, name: &str, body: Vec<u8>, md5: Option<String>) {
        self.files.lock().unwrap().insert(name.to_string(), ServedFile { body, md5 });
    }

    /// 已记录的请求快照
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    files: Arc<Mutex<HashMap<String, ServedFile>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    // 请求没有正文，读到空行即可
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > 64 * 1024 {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("").to_string();

    let mut range = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                range = Some(value.trim().to_string());
            }
        }
    }

    let filename = target
        .split("filename=")
        .nth(1)
        .map(|s| s.split('&').next().unwrap_or(s).to_string())
        .unwrap_or_default();

    requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        filename: filename.clone(),
        range: range.clone(),
    });

    let served = files.lock().unwrap().get(&filename).cloned();
    let Some(file) = served else {
        stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await?;
        return stream.shutdown().await;
    };

    let md5_header = file
        .md5
        .as_ref()
        .map(|digest| format!("X-File-Md5: {digest}\r\n"))
        .unwrap_or_default();

    if method == "HEAD" {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{md5_header}Connection: close\r\n\r\n",
            file.body.len()
        );
        stream.write_all(head.as_bytes()).await?;
        return stream.shutdown().await;
    }

    // GET：有合法 Range 头时回 206 切片
    if let Some(range_value) = range.as_deref().and_then(parse_range) {
        let (start, end) = range_value;
        let end = end.min(file.body.len() as u64 - 1);
        if start > end {
            stream
                .write_all(
                    b"HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .await?;
            return stream.shutdown().await;
        }
        let slice = &file.body[start as usize..=end as usize];
        let head = format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {start}-{end}/{}\r\n{md5_header}Connection: close\r\n\r\n",
            slice.len(),
            file.body.len()
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(slice).await?;
    } else {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{md5_header}Connection: close\r\n\r\n",
            file.body.len()
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&file.body).await?;
    }
    stream.shutdown().await
}

/// 解析 `bytes=a-b` 形式的 Range 头
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

/// 计算字节串的 MD5 十六进制摘要
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// 生成确定性的测试负载
pub fn test_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// 轮询等待任务进入目标状态；超时返回 `false`
pub async fn wait_for_state(
    engine: &DownloadEngine,
    task_id: TaskId,
    expected: StateCode,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Ok(state) = engine.task_state(task_id) {
            if state.state_code == expected {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
