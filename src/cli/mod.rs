//! Command-line interface for asset-cache.

mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::server::run_server;
use crate::{
    AppConfig, CacheStorage, DiskCacheStorage, HttpNetwork, Registration, UpgradeCheck,
    check_upgrade, fingerprint_bundle, parse_service_worker, render_service_worker,
};

use output::{InstallBar, print_bucket, print_install_summary, print_upgrade_check};

/// Offline-first asset cache for progressive web apps.
#[derive(Debug, Parser)]
#[command(name = "asset-cache", version)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory).
    #[arg(short, long, global = true, env = "ASSET_CACHE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Pre-cache the configured manifest into the on-disk cache.
    Install {
        /// Origin to fetch assets from, overriding the config.
        #[arg(long)]
        upstream: Option<String>,
    },
    /// Serve the app cache-first, installing the manifest on startup.
    Serve {
        /// Bind address.
        #[arg(long)]
        host: Option<String>,
        /// Bind port.
        #[arg(long)]
        port: Option<u16>,
        /// Origin to forward cache misses to.
        #[arg(long)]
        upstream: Option<String>,
    },
    /// List cache buckets and their entries.
    List,
    /// Print the browser service-worker script for the configured worker.
    RenderSw {
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Content-hash a built bundle in place and print its manifest.
    Fingerprint {
        /// Staging directory holding `<name>.js`, `<name>_bg.wasm` and `index.html`.
        dir: PathBuf,
        /// Bundle name.
        #[arg(long, default_value = "pf1_spell_search")]
        name: String,
    },
    /// Compare two worker scripts; exits with status 2 if the manifest
    /// changed without a cache rename.
    Check {
        /// Currently deployed script.
        old: PathBuf,
        /// Script about to be deployed.
        new: PathBuf,
    },
}

/// Exit status of `check` when the manifest changed under the same cache name.
pub const STALE_RISK_EXIT: u8 = 2;

/// Parses arguments and runs the selected command, returning the process
/// exit status.
///
/// # Errors
///
/// Returns an error if configuration loading or the command fails.
pub async fn run() -> crate::Result<ExitCode> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path)?;

    match cli.command {
        Command::Install { upstream } => install(config, upstream).await?,
        Command::Serve {
            host,
            port,
            upstream,
        } => serve(config, host, port, upstream).await?,
        Command::List => list(&config).await?,
        Command::RenderSw { out } => render(&config, out.as_deref()).await?,
        Command::Fingerprint { dir, name } => fingerprint(&dir, &name).await?,
        Command::Check { old, new } => {
            let outcome = check(&old, &new).await?;
            if matches!(outcome, UpgradeCheck::StaleRisk { .. }) {
                return Ok(ExitCode::from(STALE_RISK_EXIT));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

type DiskRegistration = Registration<DiskCacheStorage, HttpNetwork>;

fn build_registration(config: &AppConfig) -> crate::Result<DiskRegistration> {
    let scope = config.serve.upstream_url()?;
    let storage = DiskCacheStorage::new(&config.paths.cache_dir);
    let network = HttpNetwork::new(&config.network)?;
    log::debug!(
        "Scope {scope}, cache directory {}",
        config.paths.cache_dir.display()
    );
    Ok(Registration::new(scope, Arc::new(storage), Arc::new(network)))
}

async fn install(mut config: AppConfig, upstream: Option<String>) -> crate::Result<()> {
    if let Some(upstream) = upstream {
        config.serve.upstream = upstream;
    }
    let registration = build_registration(&config)?;

    let bar = InstallBar::new(config.worker.files.len());
    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = registration
        .register_with_cancellation(config.worker, &bar, token)
        .await;
    bar.finish();
    print_install_summary(&result?);
    Ok(())
}

async fn serve(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    upstream: Option<String>,
) -> crate::Result<()> {
    if let Some(host) = host {
        config.serve.host = host;
    }
    if let Some(port) = port {
        config.serve.port = port;
    }
    if let Some(upstream) = upstream {
        config.serve.upstream = upstream;
    }
    let registration = Arc::new(build_registration(&config)?);

    if let Err(e) = registration.register(config.worker.clone()).await {
        log::error!("Install failed: {e}");
        if !registration.resume(config.worker.clone()).await? {
            log::warn!("No installed worker; forwarding every request upstream");
        }
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received SIGINT");
        }
        signal.cancel();
    });

    run_server(registration, &config.serve.host, config.serve.port, shutdown).await
}

async fn list(config: &AppConfig) -> crate::Result<()> {
    let storage = DiskCacheStorage::new(&config.paths.cache_dir);
    let names = storage.cache_names().await?;
    if names.is_empty() {
        println!("No caches in {}", storage.root().display());
        return Ok(());
    }
    for name in names {
        let urls = storage.keys(&name).await?;
        print_bucket(&name, &urls, name == config.worker.cache_name);
    }
    Ok(())
}

async fn render(config: &AppConfig, out: Option<&Path>) -> crate::Result<()> {
    let script = render_service_worker(&config.worker);
    match out {
        Some(path) => {
            tokio::fs::write(path, script).await?;
            log::info!("Wrote {}", path.display());
        }
        None => print!("{script}"),
    }
    Ok(())
}

async fn fingerprint(dir: &Path, name: &str) -> crate::Result<()> {
    let bundle = fingerprint_bundle(dir, name).await?;
    println!("# integrity of {}: {}", bundle.js_file, bundle.js_integrity);
    let table = toml::to_string(&FilesTable {
        files: bundle.manifest(),
    })
    .map_err(|e| crate::Error::Config(e.to_string()))?;
    print!("{table}");
    Ok(())
}

#[derive(serde::Serialize)]
struct FilesTable {
    files: crate::AssetManifest,
}

async fn check(old: &Path, new: &Path) -> crate::Result<UpgradeCheck> {
    let old_config = parse_service_worker(&tokio::fs::read_to_string(old).await?)?;
    let new_config = parse_service_worker(&tokio::fs::read_to_string(new).await?)?;

    let outcome = check_upgrade(&old_config, &new_config);
    print_upgrade_check(&outcome);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_serve_overrides() {
        let cli = Cli::try_parse_from([
            "asset-cache",
            "serve",
            "--port",
            "9000",
            "--upstream",
            "http://localhost:8080/",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Serve { port: Some(9000), ref upstream, .. }
                if upstream.as_deref() == Some("http://localhost:8080/")
        ));
    }

    #[test]
    fn fingerprint_defaults_to_app_name() {
        let cli = Cli::try_parse_from(["asset-cache", "fingerprint", "dist"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Fingerprint { ref name, .. } if name == "pf1_spell_search"
        ));
    }

    #[tokio::test]
    async fn check_reports_stale_risk_without_exiting() {
        let dir = tempfile::TempDir::new().unwrap();
        let v1 = crate::WorkerConfig::new()
            .with_files(crate::AssetManifest::for_bundle("a-1.js", "a_bg-1.wasm"));
        let v2 = v1
            .clone()
            .with_files(crate::AssetManifest::for_bundle("a-2.js", "a_bg-1.wasm"));
        let old = dir.path().join("old.js");
        let new = dir.path().join("new.js");
        std::fs::write(&old, render_service_worker(&v1)).unwrap();
        std::fs::write(&new, render_service_worker(&v2)).unwrap();

        assert!(matches!(
            check(&old, &new).await.unwrap(),
            UpgradeCheck::StaleRisk { ref added, .. } if added == &["./a-2.js"]
        ));
        assert_eq!(check(&old, &old).await.unwrap(), UpgradeCheck::Unchanged);
    }

    #[test]
    fn files_table_renders_as_toml_list() {
        let table = toml::to_string(&FilesTable {
            files: crate::AssetManifest::for_bundle("a-1.js", "a_bg-2.wasm"),
        })
        .unwrap();
        assert!(table.starts_with("files = ["));
        assert!(table.contains("\"./a-1.js\""));
    }
}
