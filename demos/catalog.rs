use std::fs;

use minato::{Cache, CacheConfig};

/// Allocate files for a few URLs, list the catalog and drop one entry.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let mut cache = Cache::init(CacheConfig::with_root(".minato"))?;

    let urls = [
        "https://example.com/data/train.jsonl",
        "https://example.com/data/valid.jsonl",
        "s3://bucket/models/weights.bin",
    ];
    for url in urls {
        if cache.contains(url)? {
            continue;
        }
        let entry = cache.transaction(|cache| cache.add(url))?;
        // stands in for the actual download
        fs::write(&entry.local_path, url)?;
    }

    for entry in cache.list()? {
        println!("[{}] {} -> {}", entry.id, entry.url, entry.local_path.display());
    }

    let removed = cache.transaction(|cache| cache.remove(urls[0]))?;
    println!("removed [{}] {}", removed.id, removed.url);

    Ok(())
}
