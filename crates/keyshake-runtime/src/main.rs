//! Keyshake command-line tool.
//!
//! # Usage
//!
//! ```bash
//! # Password-based file encryption
//! keyshake encrypt-file --password hunter2 notes.txt notes.txt.enc
//! keyshake decrypt-file --password hunter2 notes.txt.enc notes.txt
//!
//! # Echo server and client over TCP
//! keyshake listen --bind 127.0.0.1:7878
//! keyshake connect --addr 127.0.0.1:7878 --message hello --message world
//! ```
//!
//! `RUST_LOG` takes precedence over `--log-level`.

use std::{path::PathBuf, time::Duration};

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use keyshake_core::{ConnectionConfig, InitiatorRole, ResponderRole};
use keyshake_crypto::{
    DEFAULT_KEY_BITS, PasswordCipher, decrypt_file, encrypt_file, password::SALT_LEN,
    session::IV_LEN,
};
use keyshake_runtime::{SessionConfig, SystemEnv, TcpTransport, request_replies, serve_echo};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keyshake encrypted session tool
#[derive(Parser, Debug)]
#[command(name = "keyshake")]
#[command(about = "RSA-bootstrapped AES sessions and password file encryption")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt a file with a password
    EncryptFile(FileArgs),

    /// Decrypt a file produced by `encrypt-file`
    DecryptFile(FileArgs),

    /// Accept connections as the responder and echo every message
    Listen {
        /// Address to bind to
        #[arg(short, long, default_value = "127.0.0.1:7878")]
        bind: String,

        /// RSA modulus size for each connection's key pair
        #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
        key_bits: usize,

        /// Seconds allowed for each handshake
        #[arg(long, default_value = "30")]
        handshake_timeout: u64,
    },

    /// Connect as the initiator, send messages, and log the replies
    Connect {
        /// Address of the listener
        #[arg(short, long)]
        addr: String,

        /// Session algorithm (AES, AES-128, AES-192, AES-256)
        #[arg(long, default_value = "AES")]
        algorithm: String,

        /// Message to send; repeat for several
        #[arg(short, long = "message", required = true)]
        messages: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct FileArgs {
    /// Password the key is derived from
    #[arg(short, long)]
    password: String,

    /// Hex salt for PBKDF2; without it a fixed, insecure derivation is used
    #[arg(long, requires = "iv_hex")]
    salt_hex: Option<String>,

    /// Hex IV (16 bytes)
    #[arg(long, requires = "salt_hex")]
    iv_hex: Option<String>,

    /// Input file
    source: PathBuf,

    /// Output file
    dest: PathBuf,
}

impl FileArgs {
    fn cipher(&self) -> Result<PasswordCipher, Box<dyn std::error::Error>> {
        match (&self.salt_hex, &self.iv_hex) {
            (Some(salt), Some(iv)) => {
                let salt = hex::decode(salt)?;
                if salt.len() < SALT_LEN {
                    return Err(format!("salt must be at least {SALT_LEN} bytes").into());
                }
                let iv: [u8; IV_LEN] = hex::decode(iv)?
                    .try_into()
                    .map_err(|_| format!("IV must be exactly {IV_LEN} bytes"))?;
                Ok(PasswordCipher::derive(&self.password, &salt, iv))
            },
            _ => {
                tracing::warn!("no salt or IV given; using the fixed password derivation");
                Ok(PasswordCipher::from_password(&self.password))
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match cli.command {
        Command::EncryptFile(args) => {
            let bytes = encrypt_file(&args.cipher()?, &args.source, &args.dest)?;
            tracing::info!(bytes, dest = %args.dest.display(), "file encrypted");
        },
        Command::DecryptFile(args) => {
            let bytes = decrypt_file(&args.cipher()?, &args.source, &args.dest)?;
            tracing::info!(bytes, dest = %args.dest.display(), "file decrypted");
        },
        Command::Listen { bind, key_bits, handshake_timeout } => {
            let config = SessionConfig {
                connection: ConnectionConfig {
                    handshake_timeout: Duration::from_secs(handshake_timeout),
                    ..ConnectionConfig::default()
                },
                ..SessionConfig::default()
            };
            listen(&bind, ResponderRole::with_key_bits(key_bits), config).await?;
        },
        Command::Connect { addr, algorithm, messages } => {
            let transport = TcpTransport::connect(&addr).await?;
            tracing::info!(peer = %transport.peer_addr(), "connected");

            let messages = messages.into_iter().map(Bytes::from).collect();
            let replies = request_replies(
                InitiatorRole::with_algorithm(algorithm),
                transport,
                SystemEnv::new(),
                SessionConfig::default(),
                messages,
            )
            .await?;

            for reply in replies {
                tracing::info!(reply = %String::from_utf8_lossy(&reply), "echo");
            }
        },
    }

    Ok(())
}

async fn listen(
    bind: &str,
    role: ResponderRole,
    config: SessionConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let transport = match TcpTransport::new(stream) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "failed to set up connection");
                continue;
            },
        };

        let config = config.clone();
        tokio::spawn(async move {
            tracing::info!(%peer, "connection accepted");
            match serve_echo(role, transport, SystemEnv::new(), config).await {
                Ok(reason) => tracing::info!(%peer, %reason, "connection finished"),
                Err(e) => tracing::warn!(%peer, kind = %e.kind(), error = %e, "connection failed"),
            }
        });
    }
}
