//! Keyward CLI - Envelope encryption round-trip against a token.
//!
//! Loads a token module, opens a session on the labelled slot, logs in,
//! finds or generates the envelope key, then encrypts and decrypts a message.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::Parser;
use keyward_hsm::{
    decrypt, encrypt, resolve_or_generate_key, AssociatedData, Module, Session,
};
use keyward_token::{Loader, SoftTokenLoader};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_MESSAGE: &str = "Hello, Keyward!";

#[derive(Parser)]
#[command(name = "keyward")]
#[command(about = "Keyward - Seal and open an AES-GCM envelope inside a token")]
#[command(version)]
struct Cli {
    /// Token module (software token profile)
    #[arg(env = "KEYWARD_MODULE")]
    module: PathBuf,

    /// Label of the slot to open
    #[arg(env = "KEYWARD_SLOT")]
    slot: String,

    /// User PIN
    #[arg(env = "KEYWARD_PIN", hide_env_values = true)]
    pin: String,

    /// Label of the envelope key, generated when absent
    #[arg(long, default_value = "keyward-envelope-key", env = "KEYWARD_KEY_LABEL")]
    key_label: String,

    /// Message to round-trip
    #[arg(long, conflicts_with = "input")]
    message: Option<String>,

    /// Read the message from a file
    #[arg(long)]
    input: Option<PathBuf>,
}

/// Stage at which the round-trip failed, one exit code each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    SessionOpen,
    Login,
    Key,
    Cipher,
    Mismatch,
    ModuleLoad,
    Input,
}

impl Stage {
    fn exit_code(self) -> u8 {
        match self {
            Self::SessionOpen => 1,
            Self::Login => 2,
            Self::Key => 3,
            Self::Cipher => 4,
            Self::Mismatch => 5,
            Self::ModuleLoad => 6,
            Self::Input => 7,
        }
    }
}

#[derive(Debug)]
struct Failure {
    stage: Stage,
    error: anyhow::Error,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, Failure>;
}

impl<T, E: Into<anyhow::Error>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, Failure> {
        self.map_err(|e| Failure {
            stage,
            error: e.into(),
        })
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run(&cli, &SoftTokenLoader) {
        Ok(envelope) => {
            println!("{envelope}");
            ExitCode::SUCCESS
        },
        Err(failure) => {
            error!(stage = ?failure.stage, "Round-trip failed");
            eprintln!("Error: {:#}", failure.error);
            ExitCode::from(failure.stage.exit_code())
        },
    }
}

fn read_message(cli: &Cli) -> Result<Vec<u8>> {
    match (&cli.input, &cli.message) {
        (Some(path), _) => {
            fs::read(path).with_context(|| format!("Failed to read input {}", path.display()))
        },
        (None, Some(message)) => Ok(message.clone().into_bytes()),
        (None, None) => Ok(DEFAULT_MESSAGE.as_bytes().to_vec()),
    }
}

/// Runs the round-trip against the module `loader` yields and returns the
/// envelope, base64 encoded.
fn run(cli: &Cli, loader: &dyn Loader) -> Result<String, Failure> {
    let message = read_message(cli).at(Stage::Input)?;

    let mut module = Module::load(loader, &cli.module).at(Stage::ModuleLoad)?;
    info!(module = %cli.module.display(), "Token module loaded");

    let envelope = {
        let mut session = Session::open(module.token(), &cli.slot).at(Stage::SessionOpen)?;
        session.login(&cli.pin).at(Stage::Login)?;

        let (key, origin) = resolve_or_generate_key(&session, &cli.key_label).at(Stage::Key)?;
        info!(label = %cli.key_label, ?origin, "Envelope key ready");

        let aad = AssociatedData::DEFAULT;
        let envelope = encrypt(&session, key, aad, &message).at(Stage::Cipher)?;
        let plaintext = decrypt(&session, key, aad, envelope.as_bytes()).at(Stage::Cipher)?;

        if plaintext.as_slice() != message.as_slice() {
            return Err(Failure {
                stage: Stage::Mismatch,
                error: anyhow::anyhow!("Decrypted message does not match the input"),
            });
        }
        info!(len = message.len(), envelope_len = envelope.len(), "Round-trip verified");

        session.close().at(Stage::SessionOpen)?;
        BASE64.encode(envelope.as_bytes())
    };

    module.finalize().at(Stage::ModuleLoad)?;
    Ok(envelope)
}
