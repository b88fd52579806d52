//! Progress bar and summary reporting for the CLI.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Url;

use crate::{InstallProgress, InstallReport, UpgradeCheck};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Install progress shown as one bar over the manifest.
pub struct InstallBar {
    bar: ProgressBar,
}

impl InstallBar {
    /// Creates a bar for `assets` manifest entries.
    pub fn new(assets: usize) -> Self {
        let bar = ProgressBar::new(assets as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("progress template is valid")
                .progress_chars("━━╌"),
        );
        Self { bar }
    }

    /// Removes the bar from the terminal.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl InstallProgress for InstallBar {
    fn on_asset_start(&self, url: &Url) {
        self.bar.set_message(url.path().to_string());
    }

    fn on_asset_fetched(&self, _url: &Url, _bytes: u64) {
        self.bar.inc(1);
    }

    fn on_asset_failed(&self, url: &Url, reason: &str) {
        self.bar
            .println(format!("  {} {url}: {reason}", style("failed").red()));
    }
}

/// Prints a summary of a successful install.
pub fn print_install_summary(report: &InstallReport) {
    println!("\n{SEPARATOR}");
    println!("Install Summary");
    println!("{SEPARATOR}");
    println!("  Cache:       {}", report.cache_name);
    println!("  Assets:      {}", report.assets);
    println!("  Bytes:       {}", report.bytes);
    println!("  Time:        {:.1}s", report.elapsed.as_secs_f64());
    println!("{SEPARATOR}");
}

/// Prints one bucket and its entries.
pub fn print_bucket(name: &str, urls: &[String], active: bool) {
    let marker = if active {
        style(" (active)").green().to_string()
    } else {
        String::new()
    };
    println!("{}{marker}", style(name).bold());
    if urls.is_empty() {
        println!("  (empty)");
    }
    for url in urls {
        println!("  {url}");
    }
}

/// Prints the outcome of comparing two worker scripts.
pub fn print_upgrade_check(check: &UpgradeCheck) {
    match check {
        UpgradeCheck::Unchanged => println!("Worker unchanged."),
        UpgradeCheck::Renamed { from, to } => {
            println!("Cache renamed {from} -> {to}; clients will re-install.");
        }
        UpgradeCheck::StaleRisk {
            cache_name,
            added,
            removed,
        } => {
            println!(
                "{} manifest changed but cache name {cache_name} did not.",
                style("warning:").yellow().bold()
            );
            for path in added {
                println!("  + {path}");
            }
            for path in removed {
                println!("  - {path}");
            }
            println!("Rename the cache so clients drop the old assets.");
        }
    }
}
