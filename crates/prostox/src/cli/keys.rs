//! The `prostox keys` command for managing stored API keys.
//!
//! Credentials are identified on the command line by their full id or any
//! unique prefix of it (the listing shows the first eight characters).

use clap::{Args, Subcommand};
use dialoguer::Password;
use prostox_core::{Config, Credential, CredentialStore, ModelId};
use uuid::Uuid;

use super::theme;

/// Arguments for the `keys` command.
#[derive(Args, Debug)]
pub struct KeysArgs {
    #[command(subcommand)]
    pub command: KeysCommand,
}

#[derive(Subcommand, Debug)]
pub enum KeysCommand {
    /// Store a new API key for a model (prompts when --secret is omitted)
    Add {
        /// Model the key is for (see `prostox models`)
        model: ModelId,

        /// Friendly name shown in listings
        #[arg(short, long)]
        nickname: Option<String>,

        /// The secret itself, or `${ENV_VAR}` to resolve at request time
        #[arg(long, env = "PROSTOX_API_KEY", hide_env_values = true)]
        secret: Option<String>,
    },

    /// List stored keys with masked secrets and usage
    List {
        /// Only show keys for this model
        #[arg(short, long)]
        model: Option<ModelId>,
    },

    /// Delete a key
    Remove { id: String },

    /// Mark a key active
    Activate { id: String },

    /// Mark a key inactive
    Deactivate { id: String },
}

pub fn execute(args: KeysArgs, config: &Config) -> anyhow::Result<()> {
    let store = super::open_credentials(config)?;
    run(args.command, &store)
}

fn run(command: KeysCommand, store: &CredentialStore) -> anyhow::Result<()> {
    match command {
        KeysCommand::Add {
            model,
            nickname,
            secret,
        } => {
            let secret = match secret {
                Some(secret) => secret,
                None => prompt_secret(model)?,
            };
            let credential = store.add(model, &secret, nickname.as_deref())?;
            eprintln!(
                "{} Added key {} for {} ({})",
                theme::ok().apply_to("✓"),
                short_id(&credential),
                model.display_name(),
                credential.masked_secret()
            );
            if store.list_for(model).len() > 1 {
                eprintln!(
                    "  {}",
                    theme::dim().apply_to(format!("Policy: {:?}", store.policy()))
                );
            }
        }

        KeysCommand::List { model } => {
            let credentials = match model {
                Some(model) => store.list_for(model),
                None => store.list(),
            };
            if credentials.is_empty() {
                eprintln!("No API keys stored. Add one with `prostox keys add <model>`.");
            } else {
                println!("{}", render_list(&credentials));
            }
        }

        KeysCommand::Remove { id } => {
            let id = resolve_id(store, &id)?;
            let removed = store.remove(id)?;
            eprintln!("Removed key {} ({})", removed.label(), removed.model);
        }

        KeysCommand::Activate { id } => {
            let id = resolve_id(store, &id)?;
            let credential = store.set_active(id, true)?;
            eprintln!(
                "{} {} is active for {}",
                theme::ok().apply_to("✓"),
                credential.label(),
                credential.model
            );
        }

        KeysCommand::Deactivate { id } => {
            let id = resolve_id(store, &id)?;
            let credential = store.set_active(id, false)?;
            eprintln!("{} is inactive", credential.label());
            if store.select(credential.model).is_none() {
                eprintln!(
                    "  {}",
                    theme::warn().apply_to(format!(
                        "No active key left for {}; processing with it will fail",
                        credential.model
                    ))
                );
            }
        }
    }
    Ok(())
}

fn prompt_secret(model: ModelId) -> anyhow::Result<String> {
    let secret = Password::with_theme(&theme::prostox_theme())
        .with_prompt(format!("{} API key", model.display_name()))
        .interact()?;
    Ok(secret)
}

fn short_id(credential: &Credential) -> String {
    credential.id.to_string()[..8].to_string()
}

/// Resolve a full id or unique id prefix.
fn resolve_id(store: &CredentialStore, input: &str) -> anyhow::Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(input) {
        return Ok(id);
    }
    let needle = input.trim().to_lowercase();
    if needle.is_empty() {
        anyhow::bail!("Key id must not be empty");
    }
    let matches: Vec<Uuid> = store
        .list()
        .iter()
        .map(|c| c.id)
        .filter(|id| id.to_string().starts_with(&needle))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => anyhow::bail!("No key matches '{input}'"),
        _ => anyhow::bail!("'{input}' matches {} keys; use a longer prefix", matches.len()),
    }
}

fn render_list(credentials: &[Credential]) -> String {
    let mut lines = vec![format!(
        "  {:<8}  {:<18} {:<14} {:<16} {:>8}  {}",
        "ID", "MODEL", "NICKNAME", "SECRET", "REQUESTS", "LAST USED"
    )];
    for credential in credentials {
        let marker = if credential.is_active {
            theme::ok().apply_to("●").to_string()
        } else {
            theme::dim().apply_to("○").to_string()
        };
        let last_used = credential
            .last_used_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        lines.push(format!(
            "{marker} {:<8}  {:<18} {:<14} {:<16} {:>8}  {}",
            short_id(credential),
            credential.model.as_str(),
            credential.nickname.as_deref().unwrap_or("-"),
            credential.masked_secret(),
            credential.requests_made,
            last_used
        ));
    }
    lines.join("\n")
}
