//! `ocsync config` — the saved configuration.
//!
//! `set` goes through the daemon when it is running so the new values take
//! effect at once; otherwise the file is written directly and picked up on
//! the next `daemon start`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use ocsync_core::{ConfigStore, Configuration, YamlConfigStore};
use ocsync_daemon::{request_configure, DaemonError};

use super::home;
use crate::ProtocolArg;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the saved configuration (password masked).
    Show {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Write the default configuration.
    Init {
        /// Overwrite an existing configuration.
        #[arg(long)]
        force: bool,
    },
    /// Change one or more fields.
    Set(ConfigSetArgs),
    /// Print where the configuration lives.
    Path,
}

#[derive(Args, Debug, Default)]
pub struct ConfigSetArgs {
    /// Synchronizer executable.
    #[arg(long)]
    pub exe: Option<PathBuf>,

    /// Local folder to keep in sync.
    #[arg(long)]
    pub local_path: Option<PathBuf>,

    /// owncloud | ownclouds | smb | sftp
    #[arg(long)]
    pub protocol: Option<ProtocolArg>,

    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Server path, e.g. files/webdav.php
    #[arg(long)]
    pub remote_path: Option<String>,

    /// Folder below the remote path.
    #[arg(long)]
    pub subfolder: Option<String>,

    /// Seconds between automatic syncs.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl ConfigSetArgs {
    fn is_empty(&self) -> bool {
        self.exe.is_none()
            && self.local_path.is_none()
            && self.protocol.is_none()
            && self.user.is_none()
            && self.password.is_none()
            && self.host.is_none()
            && self.port.is_none()
            && self.remote_path.is_none()
            && self.subfolder.is_none()
            && self.timeout.is_none()
    }

    /// Overlay the given flags onto `base`.
    fn apply(self, mut base: Configuration) -> Configuration {
        if let Some(exe) = self.exe {
            base.exe = exe;
        }
        if let Some(local_path) = self.local_path {
            base.local_path = local_path;
        }
        if let Some(protocol) = self.protocol {
            base.protocol = protocol.into();
        }
        if let Some(user) = self.user {
            base.user = user;
        }
        if let Some(password) = self.password {
            base.password = password;
        }
        if let Some(host) = self.host {
            base.host = host;
        }
        if let Some(port) = self.port {
            base.port = port;
        }
        if let Some(remote_path) = self.remote_path {
            base.remote_path = remote_path;
        }
        if let Some(subfolder) = self.subfolder {
            base.subfolder = subfolder;
        }
        if let Some(timeout) = self.timeout {
            base.timeout = Duration::from_secs(timeout);
        }
        base
    }
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = home()?;
    let store = YamlConfigStore::at_home(&home);

    match command {
        ConfigCommand::Show { json } => show(&store, &home, json),
        ConfigCommand::Init { force } => init(&store, &home, force),
        ConfigCommand::Set(args) => set(&store, &home, args),
        ConfigCommand::Path => {
            println!("{}", store.path().display());
            Ok(())
        }
    }
}

fn load_or_defaults(store: &YamlConfigStore, home: &Path) -> Result<(Configuration, bool)> {
    let saved = store
        .load()
        .with_context(|| format!("failed to read {}", store.path().display()))?;
    Ok(match saved {
        Some(config) => (config, true),
        None => (Configuration::defaults_at(home), false),
    })
}

fn show(store: &YamlConfigStore, home: &Path, json: bool) -> Result<()> {
    let (config, saved) = load_or_defaults(store, home)?;
    let masked = Configuration {
        password: mask(&config.password),
        ..config
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&masked).context("failed to serialize config JSON")?
        );
        return Ok(());
    }

    if !saved {
        println!(
            "{}",
            "No configuration saved yet; showing defaults (run 'ocsync config init')."
                .yellow()
        );
    }
    print_table(&masked);
    Ok(())
}

fn init(store: &YamlConfigStore, home: &Path, force: bool) -> Result<()> {
    if store.path().exists() && !force {
        bail!(
            "{} already exists; use --force to overwrite",
            store.path().display()
        );
    }
    let config = Configuration::defaults_at(home);
    store
        .save(&config)
        .with_context(|| format!("failed to write {}", store.path().display()))?;
    println!("✓ Wrote default configuration to {}", store.path().display());
    if !config.exe_is_executable() {
        println!(
            "{}",
            format!("  warning: {} is not an executable file", config.exe.display()).yellow()
        );
    }
    Ok(())
}

fn set(store: &YamlConfigStore, home: &Path, args: ConfigSetArgs) -> Result<()> {
    if args.is_empty() {
        bail!("nothing to change; pass at least one option (see 'ocsync config set --help')");
    }
    let (current, _) = load_or_defaults(store, home)?;
    let next = args.apply(current);
    next.validate().context("invalid configuration")?;

    match request_configure(home, &next) {
        Ok(_) => println!("✓ Configuration applied by the running daemon"),
        Err(DaemonError::DaemonNotRunning { .. }) => {
            store
                .save(&next)
                .with_context(|| format!("failed to write {}", store.path().display()))?;
            println!("✓ Configuration saved to {}", store.path().display());
        }
        Err(err) => return Err(err).context("daemon rejected the configuration"),
    }

    if !next.exe_is_executable() {
        println!(
            "{}",
            format!("  warning: {} is not an executable file", next.exe.display()).yellow()
        );
    }
    Ok(())
}

fn mask(password: &str) -> String {
    if password.is_empty() {
        String::new()
    } else {
        "***".to_string()
    }
}

#[derive(Tabled)]
struct ConfigRow {
    #[tabled(rename = "key")]
    key: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

fn print_table(config: &Configuration) {
    let row = |key: &'static str, value: String| ConfigRow { key, value };
    let rows = vec![
        row("exe", config.exe.display().to_string()),
        row("local_path", config.local_path.display().to_string()),
        row("protocol", config.protocol.to_string()),
        row("user", config.user.clone()),
        row("password", config.password.clone()),
        row("host", config.host.clone()),
        row("port", config.port.to_string()),
        row("remote_path", config.remote_path.clone()),
        row("subfolder", config.subfolder.clone()),
        row("timeout", format!("{}s", config.timeout.as_secs())),
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("url: {}", config.redacted_url());
}
