use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use fetchgate_core::bulk::{ProgressCallback, bulk_fetch_with_progress};
use fetchgate_core::report::{
    ReportFormat, generate_blocked_report, generate_bulk_report, generate_intelligence_report,
};
use fetchgate_core::{BulkSummary, FetchProxy, IntelligenceRecorder, ProxyConfig};
use fetchgate_fetcher::{
    BulkFetchRequest, FetchRequest, FetchResult, Fetcher, HttpFetcher, HttpMethod,
    IntegrationMode, RemoteFetcher,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Install the fmt subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

// Helpers for URL and header arguments

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(
    url: Option<&Url>,
    hosts_file: Option<&PathBuf>,
) -> Result<Vec<String>, String> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if let Some(url) = url {
        Ok(vec![url.as_str().to_string()])
    } else {
        Err("Either --url or --hosts-file must be provided".to_string())
    }
}

/// Load and parse URLs from a file. Blank lines and `#` comments are skipped.
pub fn load_urls_from_file(path: &Path) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as an http(s) URL, adding http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(parsed) = Url::parse(line)
        && matches!(parsed.scheme(), "http" | "https")
        && parsed.host_str().is_some()
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if let Ok(parsed) = Url::parse(&with_scheme)
        && parsed.host_str().is_some()
    {
        return Some(with_scheme);
    }

    eprintln!("⚠️  Skipping invalid URL '{}'", line);
    None
}

/// Split a `Name: value` header argument
pub fn parse_header_arg(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("Header '{}' must look like 'Name: value'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("Header '{}' has an empty name", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

pub fn integration_mode(proxy: Option<&Url>, fallback: bool) -> IntegrationMode {
    match (proxy, fallback) {
        (None, _) => IntegrationMode::Direct,
        (Some(_), false) => IntegrationMode::Proxy,
        (Some(_), true) => IntegrationMode::ProxyWithFallback,
    }
}

/// The fetcher a caller should use for `mode`
pub fn build_fetcher(
    mode: IntegrationMode,
    proxy: Option<&Url>,
    api_key: Option<&str>,
) -> Result<Arc<dyn Fetcher>> {
    let direct = || -> Result<Arc<dyn Fetcher>> { Ok(Arc::new(HttpFetcher::new()?)) };

    if mode == IntegrationMode::Direct {
        return direct();
    }

    let proxy = proxy.ok_or_else(|| anyhow!("--proxy is required for {} mode", mode.as_str()))?;
    let mut remote = RemoteFetcher::new(proxy.as_str())?;
    if let Some(key) = api_key {
        remote = remote.with_api_key(key);
    }
    if mode == IntegrationMode::ProxyWithFallback {
        remote = remote.with_fallback(direct()?);
    }
    Ok(Arc::new(remote))
}

fn fetcher_from_args(args: &ArgMatches) -> Result<Arc<dyn Fetcher>> {
    let proxy = args.get_one::<Url>("proxy");
    let fallback = args.get_flag("fallback");
    let api_key = args.get_one::<String>("api-key").map(String::as_str);
    build_fetcher(integration_mode(proxy, fallback), proxy, api_key)
}

fn report_format(args: &ArgMatches) -> ReportFormat {
    args.get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text)
}

/// `--config` with a leading `~` expanded
pub fn expand_config_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn load_config(path: &Path) -> Result<ProxyConfig> {
    ProxyConfig::load(&expand_config_path(path))
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn status_colored(result: &FetchResult) -> String {
    let code = result.status_code.to_string();
    if result.succeeded {
        format!("{} {}", "✓".green().bold(), code.green())
    } else if result.status_code >= 500 {
        format!("{} {}", "✗".red().bold(), code.red())
    } else {
        format!("{} {}", "⚠".yellow().bold(), code.yellow())
    }
}

// Command handlers

pub async fn handle_serve(args: &ArgMatches, config_path: &Path) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(host) = args.get_one::<String>("host") {
        config.proxy.host = host.clone();
    }
    if let Some(port) = args.get_one::<u16>("port") {
        config.proxy.port = *port;
    }

    let reload_path = expand_config_path(config_path);
    let proxy = FetchProxy::start(config.clone(), Some(&reload_path)).await?;
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;

    println!(
        "{} Serving on {}",
        "→".blue(),
        format!("http://{}", config.bind_address()).bright_white()
    );

    fetchgate_server::serve(proxy, listener, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

pub async fn handle_fetch(args: &ArgMatches) -> Result<()> {
    let url = args
        .get_one::<Url>("url")
        .ok_or_else(|| anyhow!("--url is required"))?;
    let method: HttpMethod = args
        .get_one::<String>("method")
        .map(String::as_str)
        .unwrap_or("GET")
        .parse()?;

    let mut request = FetchRequest::new(url.as_str())
        .with_method(method)
        .with_cache(!args.get_flag("no-cache"));
    if let Some(timeout) = args.get_one::<u64>("timeout") {
        request = request.with_timeout(*timeout);
    }
    if let Some(body) = args.get_one::<String>("data") {
        request = request.with_body(body.clone());
    }
    if let Some(headers) = args.get_many::<String>("header") {
        for raw in headers {
            let (name, value) = parse_header_arg(raw).map_err(|e| anyhow!(e))?;
            request = request.with_header(name, value);
        }
    }

    let fetcher = fetcher_from_args(args)?;
    let result = fetcher.fetch(request).await;

    match report_format(args) {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        ReportFormat::Text => {
            println!("{} {}", status_colored(&result), result.url.bright_white());
            if result.final_url != result.url {
                println!("  {} {}", "↪".cyan(), result.final_url);
            }
            println!(
                "  {:.3}s, {} bytes{}",
                result.elapsed.as_secs_f64(),
                result.byte_size,
                if result.cached { ", cached" } else { "" }
            );
            if let Some(ref error) = result.error {
                println!("  {} {}", "✗".red(), error);
            } else {
                println!();
                println!("{}", result.body);
            }
        }
    }

    if result.is_failure() {
        bail!(
            "Fetch failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

pub async fn handle_bulk(args: &ArgMatches) -> Result<()> {
    let urls = load_urls_from_source(
        args.get_one::<Url>("url"),
        args.get_one::<PathBuf>("hosts-file"),
    )
    .map_err(|e| anyhow!(e))?;

    let mut batch = BulkFetchRequest::new(urls);
    if let Some(limit) = args.get_one::<usize>("concurrency") {
        batch.concurrency_limit = *limit;
    }
    if let Some(tags) = args.get_many::<String>("tag") {
        batch.tags = tags.cloned().collect();
    }

    let fetcher = fetcher_from_args(args)?;

    let pb = ProgressBar::new(batch.urls.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let progress_bar = pb.clone();
    let progress: ProgressCallback = Arc::new(move |_: usize, result: &FetchResult| {
        progress_bar.set_message(result.url.clone());
        progress_bar.inc(1);
    });

    let results = bulk_fetch_with_progress(
        fetcher,
        batch.to_requests(),
        batch.concurrency_limit,
        Some(progress),
    )
    .await;
    pb.finish_and_clear();

    let summary = BulkSummary::from_results(&results);
    print!("{}", generate_bulk_report(&summary, report_format(args)));
    Ok(())
}

pub async fn handle_intelligence_list(args: &ArgMatches, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let recorder = IntelligenceRecorder::open(&config.intelligence)?;
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(50);

    let records = recorder.list(limit).await?;
    let total = recorder.count().await?;
    print!(
        "{}",
        generate_intelligence_report(&records, total, report_format(args))
    );
    Ok(())
}

pub async fn handle_blocked(args: &ArgMatches, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let recorder = IntelligenceRecorder::open(&config.intelligence)?;
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(50);

    let blocked = recorder.blocked(limit).await?;
    let total = recorder.blocked_count().await?;
    print!("{}", generate_blocked_report(&blocked, total, report_format(args)));
    Ok(())
}

pub async fn handle_housekeeping(args: &ArgMatches, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let recorder = IntelligenceRecorder::open(&config.intelligence)?;
    let keep = args
        .get_one::<usize>("keep")
        .copied()
        .unwrap_or(config.intelligence.max_records);

    let deleted = recorder.trim(keep).await?;
    let remaining = recorder.count().await?;
    println!(
        "{} Deleted {} records, {} remaining",
        "✓".green().bold(),
        deleted,
        remaining
    );
    Ok(())
}

pub fn handle_config_show(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    println!("{}", serde_json::to_string_pretty(&config.sanitized())?);
    Ok(())
}
