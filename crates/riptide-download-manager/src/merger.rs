// 分片合并与产物校验
use crate::error::{DownloadError, DownloadResult};
use crate::hasher;
use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// 将分片文件按序拼接为最终文件，并删除分片文件
///
/// 幂等：分片文件都已被上一次合并消费掉时不做任何事，
/// 不会把已经合并好的最终文件清空。个别分片文件缺失时跳过。
///
/// # Errors
///
/// Returns an error if the output file cannot be written
pub(crate) async fn merge_chunks(final_path: &Path, chunk_paths: &[PathBuf]) -> DownloadResult<()> {
    let mut any_chunk_present = false;
    for chunk_path in chunk_paths {
        if tokio::fs::try_exists(chunk_path).await.unwrap_or(false) {
            any_chunk_present = true;
            break;
        }
    }
    if !any_chunk_present {
        return Ok(());
    }

    let mut output = File::create(final_path).await?;
    for chunk_path in chunk_paths {
        match File::open(chunk_path).await {
            Ok(mut chunk_file) => {
                tokio::io::copy(&mut chunk_file, &mut output).await?;
                if let Err(e) = tokio::fs::remove_file(chunk_path).await {
                    warn!("Failed to remove chunk file {}: {e}", chunk_path.display());
                }
            }
            Err(e) => {
                warn!("Skipping missing chunk file {}: {e}", chunk_path.display());
            }
        }
    }

    output.flush().await?;
    output.sync_all().await?;
    Ok(())
}

/// 合并后的哈希校验
///
/// 本地哈希算不出来（文件缺失或不可读）一律按校验失败处理并删除产物；
/// `expected` 已知且不匹配时同样删除产物。没有预期哈希时接受结果。
pub(crate) async fn verify_output(path: &Path, expected: Option<&str>) -> DownloadResult<()> {
    let local_md5 = hasher::file_md5(path).await;
    if local_md5.is_empty() {
        warn!("Download file {} failed! MD5 checksum mismatch", path.display());
        let _ = tokio::fs::remove_file(path).await;
        return Err(DownloadError::HashMismatch);
    }

    if let Some(expected) = expected {
        if !expected.is_empty() && !local_md5.eq_ignore_ascii_case(expected) {
            warn!("Download file {} failed! MD5 checksum mismatch", path.display());
            let _ = tokio::fs::remove_file(path).await;
            return Err(DownloadError::HashMismatch);
        }
    }

    info!("File downloaded successfully, the file saving path is {}", path.display());
    Ok(())
}
