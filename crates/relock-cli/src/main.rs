use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relock_core::paths::{data_dir, POLICY_FILE, SETTINGS_FILE};
use relock_core::platform::{
    AuthSink, Authenticator, CapabilityProbe, PromptHandle, PromptRequest, SessionTokenProvider,
    Surface,
};
use relock_core::preferences::FilePreferences;
use relock_core::secure_storage::{delete_session_token, store_session_token, KeyringSessionTokens};
use relock_core::storage::load_settings;
use relock_core::{Collaborators, LockGate};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod simulate;

#[derive(Parser)]
#[command(name = "relock")]
#[command(about = "Inspect and exercise the application re-authentication gate", long_about = None)]
struct Cli {
    /// Override the data directory (settings and policy files)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keyring profile holding the session token
    #[arg(long, global = true, default_value = "default")]
    profile: String,

    /// Treat strong authentication as unavailable on this device
    #[arg(long, global = true)]
    no_capability: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show policy, capability and session token state
    Status,

    /// Turn the lock on (stored as off when the capability is missing)
    Enable,

    /// Turn the lock off
    Disable,

    /// Manage the session token in the OS keyring
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Replay a JSON lifecycle script against an in-memory gate
    Simulate {
        /// Path to the script
        script: PathBuf,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store a session token
    Set { token: String },
    /// Remove the session token
    Clear,
}

struct FixedCapability(bool);

impl CapabilityProbe for FixedCapability {
    fn available(&self) -> bool {
        self.0
    }
}

/// The CLI never shows a prompt; policy commands only need the gate's policy surface.
struct NoPrompt;

struct NoHandle;

impl PromptHandle for NoHandle {
    fn cancel(&self) {}
}

impl Authenticator for NoPrompt {
    fn authenticate(
        &self,
        _surface: Arc<dyn Surface>,
        _request: PromptRequest,
        _sink: Arc<dyn AuthSink>,
    ) -> Box<dyn PromptHandle> {
        Box::new(NoHandle)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    let dir = match cli.data_dir.clone() {
        Some(dir) => dir,
        None => data_dir()?,
    };

    match &cli.command {
        Commands::Status => status(&cli, &dir),
        Commands::Enable => set_policy(&cli, &dir, true).map(|_| ()),
        Commands::Disable => set_policy(&cli, &dir, false).map(|_| ()),
        Commands::Token { action } => match action {
            TokenAction::Set { token } => {
                store_session_token(&cli.profile, token)?;
                info!(profile = %cli.profile, "session token stored");
                Ok(())
            }
            TokenAction::Clear => {
                delete_session_token(&cli.profile)?;
                info!(profile = %cli.profile, "session token cleared");
                Ok(())
            }
        },
        Commands::Simulate { script } => {
            let settings = load_settings(&dir.join(SETTINGS_FILE))?;
            let data = std::fs::read(script)
                .with_context(|| format!("reading script {}", script.display()))?;
            let script: simulate::Script = serde_json::from_slice(&data)?;
            let report = simulate::run(settings, script)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn open_gate(
    cli: &Cli,
    dir: &Path,
    tokens: Arc<dyn SessionTokenProvider>,
) -> Result<Arc<LockGate>> {
    let settings = load_settings(&dir.join(SETTINGS_FILE))?;
    let prefs = FilePreferences::open(dir.join(POLICY_FILE))?;
    let (gate, _driver) = LockGate::new(
        settings,
        Collaborators {
            prefs: Arc::new(prefs),
            capability: Arc::new(FixedCapability(!cli.no_capability)),
            tokens,
            authenticator: Arc::new(NoPrompt),
        },
    )?;
    Ok(gate)
}

fn keyring_tokens(cli: &Cli) -> Arc<dyn SessionTokenProvider> {
    Arc::new(KeyringSessionTokens::new(cli.profile.clone()))
}

/// Protection is evaluated first so a lost capability is reflected in `lockEnabled`.
fn status_report(gate: &LockGate, tokens: &dyn SessionTokenProvider, dir: &Path) -> serde_json::Value {
    let protected = gate.is_session_protected();
    serde_json::json!({
        "lockEnabled": gate.is_lock_enabled(),
        "toggleAvailable": gate.should_show_settings_toggle(),
        "sessionToken": tokens.has_token(),
        "sessionProtected": protected,
        "dataDir": dir.display().to_string(),
    })
}

fn status(cli: &Cli, dir: &Path) -> Result<()> {
    let tokens = keyring_tokens(cli);
    let gate = open_gate(cli, dir, tokens.clone())?;
    let status = status_report(&gate, tokens.as_ref(), dir);
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn set_policy(cli: &Cli, dir: &Path, want: bool) -> Result<bool> {
    let gate = open_gate(cli, dir, keyring_tokens(cli))?;
    let effective = gate.set_lock_enabled(want)?;
    if want && !effective {
        println!("Strong authentication unavailable; lock stays disabled");
    } else {
        println!("Lock {}", if effective { "enabled" } else { "disabled" });
    }
    Ok(effective)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct Token(bool);

    impl SessionTokenProvider for Token {
        fn has_token(&self) -> bool {
            self.0
        }
    }

    fn cli(dir: &Path, args: &[&str]) -> Cli {
        let mut argv = vec!["relock", "--data-dir"];
        argv.push(dir.to_str().unwrap());
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn enable_persists_to_data_dir() {
        let dir = tempdir().unwrap();
        let enable = cli(dir.path(), &["enable"]);
        assert!(set_policy(&enable, dir.path(), true).unwrap());
        assert!(dir.path().join(POLICY_FILE).exists());

        let status = cli(dir.path(), &["status"]);
        let tokens: Arc<dyn SessionTokenProvider> = Arc::new(Token(true));
        let gate = open_gate(&status, dir.path(), tokens.clone()).unwrap();
        let report = status_report(&gate, tokens.as_ref(), dir.path());
        assert_eq!(report["lockEnabled"], true);
        assert_eq!(report["sessionProtected"], true);
    }

    #[test]
    fn enable_without_capability_stays_disabled() {
        let dir = tempdir().unwrap();
        let enable = cli(dir.path(), &["--no-capability", "enable"]);
        assert!(!set_policy(&enable, dir.path(), true).unwrap());
    }

    #[test]
    fn status_heals_policy_after_capability_loss() {
        let dir = tempdir().unwrap();
        assert!(set_policy(&cli(dir.path(), &["enable"]), dir.path(), true).unwrap());

        let status = cli(dir.path(), &["--no-capability", "status"]);
        let tokens: Arc<dyn SessionTokenProvider> = Arc::new(Token(true));
        let gate = open_gate(&status, dir.path(), tokens.clone()).unwrap();
        let report = status_report(&gate, tokens.as_ref(), dir.path());
        assert_eq!(report["sessionProtected"], false);
        assert_eq!(report["lockEnabled"], false);
        assert_eq!(report["toggleAvailable"], false);

        // the reset was written through to disk
        let reopened = open_gate(&cli(dir.path(), &["status"]), dir.path(), tokens).unwrap();
        assert!(!reopened.is_lock_enabled());
    }
}
