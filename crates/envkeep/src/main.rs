//! envkeep - Namespaced secrets in the OS credential store
//!
//! Commands:
//! - set NAMESPACE KEY [KEY ...]: Prompt for values and store them
//! - list [NAMESPACE]: List namespaces, or the variables under one
//! - unset NAMESPACE KEY [KEY ...]: Remove stored variables
//! - exec NAMESPACES CMD [ARG ...]: Run a command with the variables set

use std::ffi::OsStr;
use std::io::{self, BufRead, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use envkeep::store::{collect_env, open_default_store, AccessPolicy, SecretStore};

#[derive(Parser)]
#[command(name = "envkeep")]
#[command(about = "Namespaced secrets in the OS credential store, injected as environment variables")]
#[command(version)]
#[command(after_help = r#"NAMESPACES:
    Group related variables under one name and recall them together:
    - envkeep set aws AWS_ACCESS_KEY_ID AWS_SECRET_ACCESS_KEY
    - envkeep exec aws terraform plan
    - envkeep exec aws,github ./deploy.sh

SECURITY:
    - Values live in the macOS Keychain or the Secret Service (GNOME
      Keyring, KWallet), never in files managed by this tool
    - On macOS, --require-passphrase makes every read prompt for the
      keychain passphrase; --no-require-passphrase trusts this binary only
    - Decrypted values are wiped from memory when no longer needed"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store values for one or more variables (prompts for each)
    Set {
        /// Suppress echo while typing values (requires a terminal)
        #[arg(short = 'n', long)]
        noecho: bool,

        /// Require the keychain passphrase on every future read (macOS)
        #[arg(short = 'p', long, conflicts_with = "no_require_passphrase")]
        require_passphrase: bool,

        /// Grant this binary silent read access (macOS)
        #[arg(short = 'P', long)]
        no_require_passphrase: bool,

        /// Namespace to store under (e.g., aws, github)
        namespace: String,

        /// Environment variable names to prompt for
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// List namespaces, or the variables under one namespace
    List {
        /// Namespace to list variables for
        namespace: Option<String>,

        /// Print values alongside variable names
        #[arg(short = 'v', long)]
        show_value: bool,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Remove stored variables from a namespace
    Unset {
        /// Namespace the variables live under
        namespace: String,

        /// Environment variable names to remove
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Run a command with a namespace's variables in its environment
    Exec {
        /// Namespace, or several joined with commas (later ones win)
        namespaces: String,

        /// Command to run with the variables set
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut store = open_default_store()?;

    match cli.command {
        Commands::Set {
            noecho,
            require_passphrase,
            no_require_passphrase,
            namespace,
            keys,
        } => cmd_set(
            store.as_mut(),
            noecho,
            policy_from_flags(require_passphrase, no_require_passphrase),
            &namespace,
            &keys,
        ),
        Commands::List {
            namespace,
            show_value,
            json,
        } => cmd_list(store.as_mut(), namespace.as_deref(), show_value, json),
        Commands::Unset { namespace, keys } => cmd_unset(store.as_mut(), &namespace, &keys),
        Commands::Exec {
            namespaces,
            command,
        } => cmd_exec(store.as_mut(), &namespaces, &command),
    }
}

fn policy_from_flags(require: bool, no_require: bool) -> AccessPolicy {
    if require {
        AccessPolicy::RequirePassphrase
    } else if no_require {
        AccessPolicy::NoPassphraseRequired
    } else {
        AccessPolicy::Unspecified
    }
}

/// Prompt for and store each key's value
fn cmd_set(
    store: &mut dyn SecretStore,
    noecho: bool,
    policy: AccessPolicy,
    namespace: &str,
    keys: &[String],
) -> Result<()> {
    for key in keys {
        let value = ask_value(namespace, key, noecho)?;
        match store.save_value(namespace, key, value.as_bytes(), policy) {
            Ok(()) => {}
            Err(err) if err.is_warning() => eprintln!("warning: {}", err),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to store {}.{}", namespace, key))
            }
        }
    }
    Ok(())
}

/// Read one value from the terminal
fn ask_value(namespace: &str, key: &str, noecho: bool) -> Result<Zeroizing<String>> {
    let prompt = format!("{}.{}", namespace, key);

    if noecho {
        let value = rpassword::prompt_password(format!("{} (noecho): ", prompt))
            .context("failed to read value (--noecho requires a terminal)")?;
        return Ok(Zeroizing::new(value));
    }

    print!("{}: ", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read value")?;
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Zeroizing::new(line))
}

/// List namespaces, or the variables under one
fn cmd_list(
    store: &mut dyn SecretStore,
    namespace: Option<&str>,
    show_value: bool,
    json: bool,
) -> Result<()> {
    let namespace = match namespace {
        None => {
            if show_value {
                bail!("--show-value requires a namespace");
            }
            let names = store.search_namespaces()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                for name in names {
                    println!("{}", name);
                }
            }
            return Ok(());
        }
        Some(namespace) => namespace,
    };

    let entries = match store.search_values(namespace) {
        Ok(entries) => entries,
        Err(err) if err.is_warning() => {
            warn_undefined(namespace);
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    if json {
        #[derive(Serialize)]
        struct Row {
            key: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            value: Option<String>,
        }

        let rows: Vec<Row> = entries
            .iter()
            .map(|entry| Row {
                key: entry.key.clone(),
                value: show_value
                    .then(|| String::from_utf8_lossy(entry.value.as_bytes()).into_owned()),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for entry in &entries {
        if show_value {
            println!(
                "{}={}",
                entry.key,
                String::from_utf8_lossy(entry.value.as_bytes())
            );
        } else {
            println!("{}", entry.key);
        }
    }
    Ok(())
}

/// Remove each key from the namespace
fn cmd_unset(store: &mut dyn SecretStore, namespace: &str, keys: &[String]) -> Result<()> {
    for key in keys {
        store
            .delete_value(namespace, key)
            .with_context(|| format!("failed to remove {}.{}", namespace, key))?;
    }
    Ok(())
}

/// Gather variables for the comma-joined namespaces and replace this
/// process with the command
fn cmd_exec(store: &mut dyn SecretStore, namespaces: &str, command: &[String]) -> Result<()> {
    if command.is_empty() {
        bail!("command required. Usage: envkeep exec <namespaces> <command>");
    }

    let names: Vec<&str> = namespaces
        .split(',')
        .filter(|name| !name.is_empty())
        .collect();

    let mut missing = Vec::new();
    let env = collect_env(store, &names, &mut missing)?;
    for name in &missing {
        warn_undefined(name);
    }

    let program = &command[0];
    let args = &command[1..];

    let mut cmd = Command::new(program);
    cmd.args(args);
    for (key, value) in &env {
        cmd.env(key, OsStr::from_bytes(value.as_bytes()));
    }

    // Replace the current process with the command
    let err = cmd.exec();

    // exec() only returns if there was an error
    Err(err).with_context(|| format!("failed to execute {}", program))
}

fn warn_undefined(namespace: &str) {
    eprintln!("warning: namespace `{}` is not defined.", namespace);
    eprintln!(
        "         define it with: envkeep set {} SOME_ENV_NAME",
        namespace
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["envkeep", "set", "aws", "ACCESS_KEY"]).unwrap();
        if let Commands::Set {
            noecho,
            require_passphrase,
            no_require_passphrase,
            namespace,
            keys,
        } = cli.command
        {
            assert!(!noecho);
            assert!(!require_passphrase);
            assert!(!no_require_passphrase);
            assert_eq!(namespace, "aws");
            assert_eq!(keys, vec!["ACCESS_KEY".to_string()]);
        } else {
            panic!("Expected Set command");
        }

        let cli = Cli::try_parse_from(["envkeep", "list", "aws", "--show-value"]).unwrap();
        if let Commands::List {
            namespace,
            show_value,
            json,
        } = cli.command
        {
            assert_eq!(namespace.as_deref(), Some("aws"));
            assert!(show_value);
            assert!(!json);
        } else {
            panic!("Expected List command");
        }

        let cli = Cli::try_parse_from(["envkeep", "unset", "aws", "ACCESS_KEY", "SECRET_KEY"])
            .unwrap();
        if let Commands::Unset { namespace, keys } = cli.command {
            assert_eq!(namespace, "aws");
            assert_eq!(keys.len(), 2);
        } else {
            panic!("Expected Unset command");
        }
    }

    #[test]
    fn test_cli_set_requires_a_key() {
        assert!(Cli::try_parse_from(["envkeep", "set", "aws"]).is_err());
    }

    #[test]
    fn test_cli_passphrase_flags_conflict() {
        assert!(Cli::try_parse_from(["envkeep", "set", "-p", "-P", "aws", "KEY"]).is_err());
    }

    #[test]
    fn test_cli_exec_keeps_command_arguments() {
        let cli =
            Cli::try_parse_from(["envkeep", "exec", "aws,github", "terraform", "plan", "-json"])
                .unwrap();
        if let Commands::Exec {
            namespaces,
            command,
        } = cli.command
        {
            assert_eq!(namespaces, "aws,github");
            assert_eq!(command, vec!["terraform", "plan", "-json"]);
        } else {
            panic!("Expected Exec command");
        }
    }

    #[test]
    fn test_policy_from_flags() {
        assert_eq!(policy_from_flags(false, false), AccessPolicy::Unspecified);
        assert_eq!(policy_from_flags(true, false), AccessPolicy::RequirePassphrase);
        assert_eq!(
            policy_from_flags(false, true),
            AccessPolicy::NoPassphraseRequired
        );
    }
}
