// 流式 MD5 计算
use log::warn;
use md5::{Digest, Md5};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// 按 1 KiB 缓冲区流式计算文件的 MD5
///
/// 返回 32 位小写十六进制摘要；文件无法读取时返回空字符串，
/// 调用方将空字符串视为"未知，不参与比对"。
pub async fn file_md5(path: &Path) -> String {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Unable to open {} for MD5 calculation: {e}", path.display());
            return String::new();
        }
    };

    let mut hasher = Md5::new();
    let mut buffer = [0u8; 1024];
    loop {
        match file.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) => {
                warn!("Read error while hashing {}: {e}", path.display());
                return String::new();
            }
        }
    }

    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
