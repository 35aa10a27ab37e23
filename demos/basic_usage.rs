//! Basic usage of the object store client
//!
//! Reads credentials from the environment (see `config::load_from_env`):
//!
//! ```bash
//! S3_ENDPOINT=http://localhost:9000 S3_BUCKET=demo \
//!   AWS_ACCESS_KEY_ID=minioadmin AWS_SECRET_ACCESS_KEY=minioadmin \
//!   cargo run --example basic_usage
//! ```

use anyhow::{Context, Result};
use stashd::config;
use stashd::ObjectStoreClient;
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stashd=debug".into()),
        )
        .init();

    let config = config::load_from_env()?;
    let storage = config.get_profile(None).context("No profile configured")?;
    let client = ObjectStoreClient::connect(storage).await?;

    // Known size: one streaming PUT
    let greeting = b"hello from stashd\n";
    client
        .upload_file("demo/hello.txt", &greeting[..], greeting.len() as u64, "text/plain")
        .await?;

    let meta = client.get_file_metadata("demo/hello.txt").await?;
    println!("demo/hello.txt: {} bytes, {}", meta.size, meta.content_type);

    // Unknown size: probed, multipart above 10 MiB
    let large: Vec<u8> = (0..12 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    client.upload_stream("demo/large.bin", &large[..]).await?;

    let mut reader = client.download_file("demo/large.bin").await?;
    let mut downloaded = Vec::new();
    reader.read_to_end(&mut downloaded).await?;
    println!("demo/large.bin round-trip ok: {}", downloaded == large);

    println!("presigned: {}", client.get_presigned_url("demo/hello.txt", 5)?);

    client
        .delete_files(&["demo/hello.txt", "demo/large.bin"])
        .await?;
    println!("exists after delete: {}", client.file_exists("demo/hello.txt").await?);

    Ok(())
}
