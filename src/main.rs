use colored::*;
use reconmap::aggregator::{ScanResult, ScanStatus};
use reconmap::cache::ResultCache;
use reconmap::config::{Config, USAGE};
use reconmap::error::{ReconError, Result};
use reconmap::logging;
use reconmap::metrics::MetricsCollector;
use reconmap::module::ModuleStatus;
use reconmap::modules;
use reconmap::orchestrator::{Orchestrator, ScanRequest};
use reconmap::rate_limit::RateLimiter;
use reconmap::registry::ModuleRegistry;
use reconmap::shutdown::ShutdownManager;
use std::env;
use std::process;
use std::sync::Arc;

/// Application entry point
fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || Config::wants_help(&args) {
        eprint!("{}", USAGE);
        process::exit(0);
    }

    let config = match Config::from_args(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{} {}", "ERROR".red().bold(), e);
            process::exit(1);
        }
    };

    let _guards = match logging::init_logging(&config.logging) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("{} {}", "ERROR".red().bold(), e);
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} Failed to start runtime: {}", "ERROR".red().bold(), e);
            process::exit(1);
        }
    };

    match runtime.block_on(run(&config)) {
        Ok(result) => output_result(&result, &config),
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            process::exit(1);
        }
    }
}

/// Main application logic
async fn run(config: &Config) -> Result<ScanResult> {
    let shutdown = ShutdownManager::new(config.shutdown_timeout);
    shutdown.start_signal_handler()?;

    let metrics = Arc::new(MetricsCollector::new(config.metrics.clone()));
    metrics.initialize().await?;

    let orchestrator = Orchestrator::new(
        Arc::new(build_registry(config)?),
        Arc::new(RateLimiter::new(config.rate_limit.clone())?),
        Arc::new(ResultCache::new()),
    )?
    .with_metrics(Arc::clone(&metrics))
    .with_defaults(config.scan_options())
    .with_shutdown_token(shutdown.token());

    let mut request = ScanRequest::new(config.target.clone(), config.selection.clone());
    for (module, options) in &config.module_options {
        request = request.with_module_options(module.clone(), options.clone());
    }

    if !config.json_mode {
        println!(
            "{} {} with modules: {}",
            "SCAN".bright_yellow(),
            config.target,
            config.selection
        );
    }

    let result = shutdown.run_until_drained(orchestrator.scan(request)).await??;

    if metrics.is_enabled() {
        eprint!("{}", metrics.export_prometheus().await?);
    }
    Ok(result)
}

/// Reference modules with configured cache TTL and enable toggles applied
fn build_registry(config: &Config) -> Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    for module in modules::builtin() {
        let mut descriptor = module.descriptor();
        if let (Some(ttl), Some(_)) = (config.cache_ttl, descriptor.cache_ttl) {
            descriptor.cache_ttl = Some(ttl);
        }
        registry.register(descriptor, module)?;
    }
    for (id, enabled) in &config.module_toggles {
        registry.set_enabled(id, *enabled)?;
    }
    Ok(registry)
}

/// Output the result in the configured format
fn output_result(result: &ScanResult, config: &Config) {
    if config.json_mode {
        match serde_json::to_string_pretty(result) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                let err = ReconError::parse(format!("Failed to serialize JSON: {}", e));
                eprintln!("{} {}", "✗".red().bold(), err);
                process::exit(1);
            }
        }
    } else {
        print_summary(result);
    }
}

fn print_summary(result: &ScanResult) {
    let status = match result.status() {
        ScanStatus::Success => "SUCCESS".green().bold(),
        ScanStatus::Partial => "PARTIAL".yellow().bold(),
        ScanStatus::Error => "ERROR".red().bold(),
    };
    println!(
        "\n{} {} in {}ms",
        status,
        result.target(),
        result.duration().as_millis()
    );

    for outcome in result.outcomes() {
        let label = match outcome.status() {
            ModuleStatus::Success => "ok".green(),
            ModuleStatus::Partial => "partial".yellow(),
            ModuleStatus::Error => "error".red(),
            ModuleStatus::Timeout => "timeout".red(),
            ModuleStatus::Skipped => "skipped".dimmed(),
        };
        let cached = if outcome.is_cached() { " (cached)" } else { "" };
        print!(
            "  {:<16} {:<8} {:>6}ms{}",
            outcome.module_id().cyan(),
            label,
            outcome.duration_ms(),
            cached
        );
        match outcome.error_detail() {
            Some(detail) => println!("  {}", detail.dimmed()),
            None => println!(),
        }
    }

    let target = result.target();
    if !target.ip_addresses().is_empty() {
        let ips: Vec<String> = target.ip_addresses().iter().map(ToString::to_string).collect();
        println!("{} {}", "Addresses:".bold(), ips.join(", "));
    }
    if !target.subdomains().is_empty() {
        let subs: Vec<&str> = target.subdomains().iter().map(String::as_str).collect();
        println!("{} {}", "Subdomains:".bold(), subs.join(", "));
    }
}
