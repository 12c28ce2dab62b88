// Tiny Gratitude command-line front end
// Entry point and logging setup

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use gratitude::app::AppState;
use gratitude::config::{APP_DIR_NAME, DEFAULT_REMINDER_HOUR_UTC};
use gratitude::database::{Entry, SettingsPatch};
use gratitude::offline::{
    spawn_agent, AgentManifest, DiskCacheStorage, FetchOutcome, FetchRequest, HttpNetwork, Network,
    OfflineAgent, StaticDirNetwork,
};
use gratitude::services::{daily_reminder_ics, today_ymd};
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "One small good thing a day, kept on your device", long_about = None)]
struct Args {
    /// Directory holding the journal database and logs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Passcode for an encrypted journal
    #[arg(long, global = true, env = "GRATITUDE_PASSCODE", hide_env_values = true)]
    passcode: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save the entry for a day (today by default)
    Write {
        text: String,
        #[arg(long)]
        day: Option<String>,
        #[arg(long)]
        mood: Option<String>,
    },
    /// Show the entry for a day (today by default)
    Show {
        #[arg(long)]
        day: Option<String>,
    },
    /// List entries, optionally within an inclusive day range
    List {
        #[arg(long, requires = "to")]
        from: Option<String>,
        #[arg(long, requires = "from")]
        to: Option<String>,
    },
    /// Delete the entry for a day
    Delete { day: String },
    /// Write every entry and setting to a JSON file
    Export { path: PathBuf },
    /// Merge a JSON export into the journal
    Import { path: PathBuf },
    /// Show or change preferences
    Settings {
        #[arg(long)]
        theme: Option<String>,
        #[arg(long, conflicts_with = "no_reminder")]
        reminder_hour: Option<u8>,
        #[arg(long)]
        no_reminder: bool,
        #[arg(long)]
        badge_nudges: Option<bool>,
        #[arg(long)]
        typeface: Option<String>,
    },
    /// Write a daily reminder as an iCalendar file
    Reminder { path: PathBuf },
    /// Turn passcode encryption on or off
    Encryption {
        #[command(subcommand)]
        action: EncryptionAction,
    },
    /// Show or clear the error log
    Errors {
        #[arg(long)]
        clear: bool,
    },
    /// Install a build directory into the offline cache and fetch a path through it
    Offline {
        /// Build output served as the app origin; fetch `--origin` over HTTP when absent
        #[arg(long)]
        site: Option<PathBuf>,
        /// JSON manifest with version and assets
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long, default_value = "http://localhost")]
        origin: Url,
        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,
        path: String,
    },
}

#[derive(Subcommand, Debug)]
enum EncryptionAction {
    Enable,
    Disable,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

/// Parse a CLI word into one of the serialized setting choices
fn parse_choice<T: DeserializeOwned>(value: &str) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| anyhow!("Unknown value {:?}", value))
}

fn print_entry(entry: &Entry) {
    match &entry.mood {
        Some(mood) => println!("{}  {} {}", entry.ymd, mood, entry.entry),
        None => println!("{}  {}", entry.ymd, entry.entry),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gratitude=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);

    if let Command::Offline {
        site,
        manifest,
        origin,
        navigate,
        path,
    } = args.command
    {
        return run_offline(data_dir, site, manifest, origin, navigate, path).await;
    }

    let state = AppState::open(&data_dir)
        .await
        .with_context(|| format!("Failed to open journal at {}", data_dir.display()))?;

    let result = run(&state, args.command, args.passcode).await;
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
        state.errors.append(format!("{:#}", e), None).await;
    }
    state.close().await;
    result
}

async fn run(state: &AppState, command: Command, passcode: Option<String>) -> anyhow::Result<()> {
    let encrypted = state.settings.get().encryption;
    if encrypted {
        if let Some(passcode) = &passcode {
            state.journal.unlock(passcode).await?;
        }
    }

    match command {
        Command::Write { text, day, mood } => {
            let day = day.unwrap_or_else(today_ymd);
            let entry = state.journal.save_day(&day, &text, mood.as_deref()).await?;
            print_entry(&entry);
        }
        Command::Show { day } => {
            let day = day.unwrap_or_else(today_ymd);
            match state.journal.get_day(&day).await? {
                Some(entry) => print_entry(&entry),
                None => println!("Nothing saved for {}", day),
            }
        }
        Command::List { from, to } => {
            let entries = match (from, to) {
                (Some(from), Some(to)) => state.journal.list_range(&from, &to).await?,
                _ => state.journal.list_all().await?,
            };
            for entry in &entries {
                print_entry(entry);
            }
        }
        Command::Delete { day } => match state.journal.get_day(&day).await? {
            Some(entry) => {
                state.journal.delete(&entry.id).await?;
                println!("Deleted {}", day);
            }
            None => println!("Nothing saved for {}", day),
        },
        Command::Export { path } => {
            state.transfer.export_to_file(&path).await?;
            println!("Exported to {}", path.display());
        }
        Command::Import { path } => {
            let summary = state.transfer.import_from_file(&path).await?;
            println!(
                "Imported {} entries and {} settings",
                summary.entries, summary.settings
            );
        }
        Command::Settings {
            theme,
            reminder_hour,
            no_reminder,
            badge_nudges,
            typeface,
        } => {
            let patch = SettingsPatch {
                theme: theme.as_deref().map(parse_choice).transpose()?,
                reminder_hour: if no_reminder {
                    Some(None)
                } else {
                    reminder_hour.map(Some)
                },
                badge_nudges,
                typeface: typeface.as_deref().map(parse_choice).transpose()?,
            };
            let settings = state.settings.update(patch).await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Reminder { path } => {
            let hour = state
                .settings
                .get()
                .reminder_hour
                .unwrap_or(DEFAULT_REMINDER_HOUR_UTC);
            let ics = daily_reminder_ics(
                "Tiny Gratitude",
                "Write down one good thing from today.",
                hour,
                Utc::now(),
            )?;
            tokio::fs::write(&path, ics).await?;
            println!("Reminder written to {}", path.display());
        }
        Command::Encryption { action } => match action {
            EncryptionAction::Enable => {
                let Some(passcode) = passcode.as_deref() else {
                    bail!("A passcode is required to enable encryption");
                };
                if encrypted {
                    println!("Encryption is already on");
                } else {
                    state.journal.enable_encryption(passcode).await?;
                    println!("Encryption enabled");
                }
            }
            EncryptionAction::Disable => {
                if encrypted {
                    state.journal.disable_encryption().await?;
                    println!("Encryption disabled");
                } else {
                    println!("Encryption is already off");
                }
            }
        },
        Command::Errors { clear } => {
            if clear {
                state.errors.clear().await;
            } else {
                for record in state.errors.list().await {
                    println!("{}  {}", record.t, record.m);
                }
            }
        }
        Command::Offline { .. } => bail!("The offline command does not use the journal"),
    }

    Ok(())
}

async fn run_offline(
    data_dir: PathBuf,
    site: Option<PathBuf>,
    manifest: PathBuf,
    origin: Url,
    navigate: bool,
    path: String,
) -> anyhow::Result<()> {
    let manifest = AgentManifest::load(&manifest)
        .await
        .with_context(|| format!("Failed to read manifest {}", manifest.display()))?;

    let caches = DiskCacheStorage::new(data_dir.join("caches"));
    caches.initialize().await?;

    let network: Arc<dyn Network> = match site {
        Some(site) => Arc::new(StaticDirNetwork::new(site)),
        None => Arc::new(HttpNetwork::new(origin.clone())?),
    };

    let agent = OfflineAgent::new(origin.clone(), manifest, Arc::new(caches), network)?;
    let handle = spawn_agent(agent);

    let report = handle.install().await?;
    for (asset, reason) in &report.failed {
        eprintln!("not cached: {} ({})", asset, reason);
    }
    handle.activate().await?;

    let url = origin.join(&path)?;
    let request = if navigate {
        FetchRequest::navigate(url)
    } else {
        FetchRequest::get(url)
    };

    match handle.fetch(request).await? {
        FetchOutcome::Respond(response) => {
            println!("{} ({:?})", response.status(), response.source);
            println!("{}", response.response.body_text());
        }
        FetchOutcome::Passthrough => println!("not intercepted"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_offline_site_is_optional() {
        let args = Args::try_parse_from([
            "gratitude",
            "offline",
            "--manifest",
            "manifest.json",
            "--origin",
            "http://127.0.0.1:8080",
            "/",
        ])
        .unwrap();

        match args.command {
            Command::Offline { site, origin, .. } => {
                assert!(site.is_none());
                assert_eq!(origin.as_str(), "http://127.0.0.1:8080/");
            }
            other => panic!("parsed as {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_offline_without_site_uses_live_origin() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 8192];
                let _ = stream.read(&mut buf).await;
                let body = "<shell>";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("manifest.json");
        tokio::fs::write(&manifest, r#"{ "version": "1", "assets": ["/"] }"#)
            .await
            .unwrap();

        run_offline(temp.path().join("data"), None, manifest, origin, false, "/".to_string())
            .await
            .unwrap();

        // Installed over HTTP once, then served from the cache
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
