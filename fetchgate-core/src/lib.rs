pub mod bulk;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod intelligence;
pub mod policy;
pub mod proxy;
pub mod ratelimit;
pub mod report;
pub mod store;

use colored::Colorize;

pub use bulk::{BulkItem, BulkSummary, bulk_fetch};
pub use config::ProxyConfig;
pub use error::{ConfigError, CoreError, Result};
pub use intelligence::IntelligenceRecorder;
pub use proxy::{ClientFetcher, FetchProxy, HealthReport, HousekeepingReport};
pub use store::KvStore;

pub fn print_banner() {
    let banner = r#"
   __      _       _                _
  / _| ___| |_ ___| |__   __ _  __ _| |_ ___
 | |_ / _ \ __/ __| '_ \ / _` |/ _` | __/ _ \
 |  _|  __/ || (__| | | | (_| | (_| | ||  __/
 |_|  \___|\__\___|_| |_|\__, |\__,_|\__\___|
                         |___/
"#;
    println!("{}", banner.bright_cyan().bold());
    println!(
        "  {} {}\n",
        "caching, rate-limited fetch proxy".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
}
