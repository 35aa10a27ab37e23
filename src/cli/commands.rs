use anyhow::{Context, Result};
use stashd::s3::types::DEFAULT_PRESIGN_MINUTES;
use stashd::ObjectStoreClient;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Upload a local file
pub async fn cmd_put(
    client: &ObjectStoreClient,
    file: &Path,
    key: &str,
    content_type: Option<&str>,
    stream: bool,
) -> Result<()> {
    let source = tokio::fs::File::open(file)
        .await
        .context(format!("Failed to open {}", file.display()))?;
    let file_size = source.metadata().await?.len();

    println!("{} -> s3://{}/{}", file.display(), client.bucket(), key);

    if stream {
        // Size is decided by probing, like any reader of unknown length
        client.upload_stream(key, source).await?;
    } else {
        client
            .upload_file(key, source, file_size, content_type.unwrap_or(""))
            .await?;
    }

    println!("  {} uploaded", format_bytes(file_size));
    Ok(())
}

/// Download an object to a file, or to stdout
pub async fn cmd_get(client: &ObjectStoreClient, key: &str, output: Option<&Path>) -> Result<()> {
    let mut reader = client.download_file(key).await?;

    let bytes_written = match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let mut file = tokio::fs::File::create(path)
                .await
                .context(format!("Failed to create {}", path.display()))?;
            let written = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            eprintln!("s3://{}/{} -> {}", client.bucket(), key, path.display());
            written
        }
        None => {
            let mut stdout = tokio::io::stdout();
            let written = tokio::io::copy(&mut reader, &mut stdout).await?;
            stdout.flush().await?;
            written
        }
    };

    eprintln!("  {} downloaded", format_bytes(bytes_written));
    Ok(())
}

/// Remove objects
pub async fn cmd_rm(client: &ObjectStoreClient, keys: &[String]) -> Result<()> {
    match keys {
        [] => anyhow::bail!("At least one key is required"),
        [key] => client.delete_file(key).await?,
        _ => client.delete_files(keys).await?,
    }

    for key in keys {
        println!("Deleted: s3://{}/{}", client.bucket(), key);
    }
    Ok(())
}

/// Show object info
pub async fn cmd_stat(client: &ObjectStoreClient, key: &str, json: bool) -> Result<()> {
    let meta = client.get_file_metadata(key).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&meta)?);
        return Ok(());
    }

    println!("Object: s3://{}/{}", client.bucket(), key);
    println!("Size: {} ({})", format_bytes(meta.size), meta.size);
    println!("Content-Type: {}", meta.content_type);
    match meta.last_modified {
        Some(ts) => println!("Last Modified: {}", ts.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last Modified: Unknown"),
    }
    if !meta.etag.is_empty() {
        println!("ETag: {}", meta.etag);
    }
    Ok(())
}

/// Check existence; exit status reflects the answer
pub async fn cmd_exists(client: &ObjectStoreClient, key: &str) -> Result<bool> {
    let exists = client.file_exists(key).await?;
    println!("{}", if exists { "true" } else { "false" });
    Ok(exists)
}

/// Print a presigned GET URL
pub fn cmd_presign(client: &ObjectStoreClient, key: &str, minutes: Option<i64>) -> Result<()> {
    let url = client.get_presigned_url(key, minutes.unwrap_or(DEFAULT_PRESIGN_MINUTES))?;
    println!("{}", url);
    Ok(())
}

/// Format bytes in human-readable form (B, KB, MB, GB, TB)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exponent = (bytes_f64.ln() / 1024_f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let value = bytes_f64 / 1024_f64.powi(exponent as i32);

    if exponent == 0 {
        format!("{} {}", bytes, UNITS[exponent])
    } else {
        format!("{:.2} {}", value, UNITS[exponent])
    }
}
