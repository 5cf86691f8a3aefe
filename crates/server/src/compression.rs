//! Gzip compression of generated documents.
//!
//! Two compressors produce the same decompressed bytes: the system `gzip`
//! program (`-9 -n`, so the output carries no name or timestamp) and an
//! in-process encoder.

use async_compression::Level;
use async_compression::tokio::write::GzipEncoder;
use larder_core::config::CompressorConfig;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Compress `data` with the configured compressor.
pub async fn gzip(data: &[u8], compressor: CompressorConfig) -> std::io::Result<Vec<u8>> {
    match compressor {
        CompressorConfig::External => gzip_external(data).await,
        CompressorConfig::Native => gzip_native(data).await,
    }
}

/// Compress in-process at the best compression level.
pub async fn gzip_native(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut output = Vec::new();
    let mut encoder = GzipEncoder::with_quality(&mut output, Level::Best);
    encoder.write_all(data).await?;
    encoder.shutdown().await?;
    Ok(output)
}

/// Pipe `data` through `gzip -9 -n -c`.
pub async fn gzip_external(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut child = Command::new("gzip")
        .args(["-9", "-n", "-c"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("gzip stdin unavailable"))?;

    // stdin must be fed while stdout is drained
    let input = data.to_vec();
    let writer = tokio::spawn(async move {
        stdin.write_all(&input).await?;
        stdin.shutdown().await
    });

    let output = child.wait_with_output().await?;
    writer.await.map_err(std::io::Error::other)??;

    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "gzip exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}
