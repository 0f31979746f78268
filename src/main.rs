//! f3 -- operator tool for the FTP-to-object-store driver layer.
//!
//! Every subcommand authenticates against the credential file, builds a
//! driver factory from the layered configuration (YAML file, then flags and
//! environment) and runs exactly one driver operation, so an operator sees
//! the same feature gates and overwrite policy an FTP session would.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use f3::config::{load_config, split_listen_addr, Config};
use f3::credentials::Credentials;
use f3::driver::{Download, ObjectMetadata};
use f3::factory::DriverFactory;
use f3::logging::init_logging;
use f3::DriverError;

/// Command-line arguments for f3.
#[derive(Parser, Debug)]
#[command(
    name = "f3",
    version,
    about = "Run FTP driver operations against an object store"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File of `username:password` lines.
    #[arg(long, env = "F3_CREDENTIALS_FILE")]
    credentials_file: PathBuf,

    /// FTP user to act as.
    #[arg(short, long, env = "F3_USER")]
    user: String,

    #[arg(short, long, env = "F3_PASSWORD", hide_env_values = true)]
    password: String,

    /// Listen address handed to the protocol engine (host[:port]).
    #[arg(long, env = "FTP_ADDR")]
    ftp_addr: Option<String>,

    /// Comma-separated feature list: cd, ls, rmdir, rm, mv, mkdir, get, put.
    #[arg(long, env = "FTP_FEATURES")]
    features: Option<String>,

    /// Refuse to replace existing objects.
    #[arg(long)]
    no_overwrite: bool,

    /// Bucket credentials as `access_key:secret_key`.
    #[arg(long, env = "S3_CREDENTIALS", hide_env_values = true)]
    s3_credentials: Option<String>,

    /// Bucket URL, e.g. https://my-bucket.s3.example.com.
    #[arg(long = "s3-bucket", env = "BUCKET_URL")]
    bucket_url: Option<String>,

    #[arg(long, env = "S3_REGION")]
    s3_region: Option<String>,

    /// Address the bucket as endpoint/bucket.
    #[arg(long)]
    path_style: bool,

    /// Storage backend: s3, memory or fs.
    #[arg(long)]
    backend: Option<String>,

    /// Root directory for the fs backend.
    #[arg(long)]
    root_dir: Option<String>,

    /// Do not report transfers.
    #[arg(long)]
    disable_telemetry: bool,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and confirm the bucket is reachable
    Check,
    /// Show metadata of a path
    Stat { path: String },
    /// List entries under a path
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Download a file
    Get {
        path: String,
        /// Start reading at this byte offset.
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Write here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload a file
    Put {
        path: String,
        /// Read from here instead of stdin.
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        append: bool,
    },
    /// Delete a file
    Rm { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Delete a directory
    Rmdir { path: String },
    /// Rename a file or directory
    Mv { from: String, to: String },
    /// Check that a directory can be entered
    Cd { path: String },
}

/// Apply flag and environment overrides on top of the file configuration.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(addr) = &cli.ftp_addr {
        config.server.listen = addr.clone();
    }
    if let Some(features) = &cli.features {
        config.driver.features = features.clone();
    }
    if cli.no_overwrite {
        config.driver.no_overwrite = true;
    }
    if let Some(creds) = &cli.s3_credentials {
        config.storage.credentials = creds.clone();
    }
    if let Some(url) = &cli.bucket_url {
        config.storage.bucket_url = url.clone();
    }
    if let Some(region) = &cli.s3_region {
        config.storage.region = region.clone();
    }
    if cli.path_style {
        config.storage.path_style = true;
    }
    if let Some(backend) = &cli.backend {
        config.storage.backend = backend.clone();
    }
    if let Some(root) = &cli.root_dir {
        config.storage.root_dir = root.clone();
    }
    if cli.disable_telemetry {
        config.telemetry.enabled = false;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    apply_overrides(&mut config, &cli);
    init_logging(&config.logging.level, &config.logging.format, cli.verbose);

    if let Err(e) = run(cli, config).await {
        match e.downcast_ref::<DriverError>() {
            Some(driver_err) if driver_err.is_construction_error() => {
                eprintln!("f3: configuration error: {} ({})", driver_err, driver_err.code())
            }
            Some(driver_err) => eprintln!("f3: {} ({})", driver_err, driver_err.code()),
            None => eprintln!("f3: {e:#}"),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let (host, port) = split_listen_addr(&config.server.listen)?;

    let users = Credentials::load_from_file(&cli.credentials_file)?;
    users.authenticate(&cli.user, &cli.password)?;
    info!(user = %cli.user, users = users.user_count(), "Authenticated");

    let factory = DriverFactory::build(&config.to_factory_config()?).await?;
    let driver = factory.new_driver();

    match cli.command {
        Command::Check => {
            factory.verify_bucket().await?;
            println!("listen:   {host}:{port}");
            println!("features: {}", factory.settings().features);
            if let Some(bucket) = factory.bucket() {
                println!("bucket:   {bucket}");
            }
            println!("ok");
        }
        Command::Stat { path } => {
            let meta = driver.stat(&path).await?;
            println!("{}", format_entry(&meta));
        }
        Command::Ls { path } => {
            driver
                .list_dir(&path, &mut |meta: &ObjectMetadata| -> anyhow::Result<()> {
                    println!("{}", format_entry(meta));
                    Ok(())
                })
                .await?;
        }
        Command::Get {
            path,
            offset,
            output,
        } => {
            let download = driver.get_file(&path, offset).await?;
            let written = match output {
                Some(file) => {
                    let mut out = tokio::fs::File::create(&file).await?;
                    let n = copy_download(download, offset, &mut out).await?;
                    out.flush().await?;
                    n
                }
                None => {
                    let mut out = tokio::io::stdout();
                    let n = copy_download(download, offset, &mut out).await?;
                    out.flush().await?;
                    n
                }
            };
            info!(path = %path, bytes = written, "Downloaded");
        }
        Command::Put {
            path,
            input,
            append,
        } => {
            let data: Box<dyn AsyncRead + Send + Unpin> = match input {
                Some(file) => Box::new(tokio::fs::File::open(&file).await?),
                None => Box::new(tokio::io::stdin()),
            };
            let written = driver.put_file(&path, data, append).await?;
            info!(path = %path, bytes = written, "Uploaded");
        }
        Command::Rm { path } => driver.delete_file(&path).await?,
        Command::Mkdir { path } => driver.make_dir(&path).await?,
        Command::Rmdir { path } => driver.delete_dir(&path).await?,
        Command::Mv { from, to } => driver.rename(&from, &to).await?,
        Command::Cd { path } => {
            driver.change_dir(&path).await?;
            println!("{path}");
        }
    }
    Ok(())
}

/// Copy a download to `out`, discarding leading bytes the backend returned
/// because it could not honor `offset`.
async fn copy_download<W>(download: Download, offset: u64, out: &mut W) -> anyhow::Result<u64>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut reader = download.reader;
    let skip = offset.saturating_sub(download.offset);
    if skip > 0 {
        debug!(skip, "Backend ignored offset, discarding leading bytes");
        let mut discard = (&mut reader).take(skip);
        tokio::io::copy(&mut discard, &mut tokio::io::sink()).await?;
    }
    Ok(tokio::io::copy(&mut reader, out).await?)
}

/// One `ls -l` style line.
fn format_entry(meta: &ObjectMetadata) -> String {
    format!(
        "{}{} 1 {} {} {:>12} {} {}",
        if meta.is_prefix { 'd' } else { '-' },
        permission_string(meta.mode),
        meta.owner(),
        meta.group(),
        meta.size,
        format_time(meta.modified),
        meta.name
    )
}

fn permission_string(mode: u32) -> String {
    const FLAGS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    FLAGS
        .iter()
        .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
        .collect()
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%b %d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_string() {
        assert_eq!(permission_string(0o755), "rwxr-xr-x");
        assert_eq!(permission_string(0o644), "rw-r--r--");
        assert_eq!(permission_string(0), "---------");
    }

    #[test]
    fn test_format_entry() {
        let modified = DateTime::parse_from_rfc3339("2024-03-05T10:20:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let line = format_entry(&ObjectMetadata::object("a.txt", 42, modified));
        assert_eq!(line, "-rw-r--r-- 1 Unknown Unknown           42 Mar 05 10:20 a.txt");
        assert!(format_entry(&ObjectMetadata::prefix("dir")).starts_with("drwxr-xr-x"));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let cli = Cli::parse_from([
            "f3",
            "--credentials-file",
            "users.txt",
            "--user",
            "u",
            "--password",
            "p",
            "--features",
            "ls,get",
            "--no-overwrite",
            "--s3-bucket",
            "https://b.example.com",
            "--disable-telemetry",
            "ls",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.driver.features, "ls,get");
        assert!(config.driver.no_overwrite);
        assert_eq!(config.storage.bucket_url, "https://b.example.com");
        assert!(!config.telemetry.enabled);
        assert_eq!(config.storage.region, "custom");
    }

    #[tokio::test]
    async fn test_copy_download_discards_unranged_prefix() {
        let download = Download {
            size: 10,
            offset: 0,
            reader: Box::new(std::io::Cursor::new(b"0123456789".to_vec())),
        };
        let mut out = Vec::new();
        let n = copy_download(download, 6, &mut out).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(out, b"6789");
    }
}
