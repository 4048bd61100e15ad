//! Config command implementation.

use catsync_engine::EngineConfig;

/// Prints the default engine configuration.
pub fn run(format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::default();
    config.validate()?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let pool = &config.pool;
    println!("Worker pool");
    println!("  workers:          {}..={}", pool.min_workers, pool.max_workers);
    println!(
        "  scale up/down:    depth > {} / depth < {} (step {}, every {:?})",
        pool.scale_up_threshold, pool.scale_down_threshold, pool.scale_step, pool.scale_interval
    );
    println!("Batching");
    println!("  enabled:          {}", config.batch.enabled);
    println!(
        "  size / interval:  {} / {:?} (polled every {:?})",
        config.batch.batch_size, config.batch.flush_interval, config.batch.poll_interval
    );
    println!("  bypass at:        {} and above", config.batch.bypass_priority);
    println!("Retries");
    println!("  max retries:      {}", config.retry.max_retries);
    println!(
        "  backoff:          {:?} base, {:?} cap, x{} for rate limits",
        config.retry.base_delay, config.retry.max_delay, config.retry.rate_limit_multiplier
    );
    println!("Conflicts");
    println!("  enabled:          {}", config.conflict.enabled);
    println!("  default strategy: {}", config.conflict.default_strategy.as_str());
    println!("  compared fields:  {}", config.conflict.fields.len());
    println!("Other");
    println!("  metrics interval: {:?}", config.metrics.interval);
    println!("  dequeue timeout:  {:?}", config.dequeue_timeout);
    println!("  pressure defer:   {:?}", config.pressure_defer);
    Ok(())
}
