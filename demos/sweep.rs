use minato::maintenance::{MaintenanceOpts, MaintenanceRunner};
use minato::{Cache, CacheConfig};

/// Evict entries older than `EXPIRE_DAYS` (default 30) and repair the cache.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let expire_days = match std::env::var("EXPIRE_DAYS") {
        Ok(days) => days.parse()?,
        Err(_) => 30,
    };
    let config = CacheConfig::with_root(".minato").with_expire_days(Some(expire_days));
    let mut cache = Cache::init(config)?;

    for entry in cache.list_expired()? {
        println!("expired: [{}] {} (updated {})", entry.id, entry.url, entry.updated_at);
    }

    let opts = MaintenanceOpts::builder()
        .run_cache_cleaning(true)
        .remove_missing(true)
        .prune_dangling(true)
        .build()?;
    let report = MaintenanceRunner::new(&mut cache, opts).run_once()?;
    println!("{:?}", report);

    Ok(())
}
