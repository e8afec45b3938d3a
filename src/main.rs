//! ASiC container CLI
//!
//! Entry point for the `asic` command-line tool.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use asic_container::config::host_config_path;
use asic_container::signing::{compute_key_fingerprint, encode_signing_key, generate_keypair};
use asic_container::{
    Configuration, Container, ContainerBuilder, ContainerError, ContainerType, Ed25519Signer,
    Ed25519Validator, EffectiveConfig, Result,
};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

/// Exit code when a container fails validation
const EXIT_VALIDATION_FAILED: i32 = 3;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Parser)]
#[command(name = "asic")]
#[command(about = "Build, sign and inspect signable document containers", version)]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(flatten)]
    storage: StorageArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StorageArgs {
    /// Config file layered over the host config
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Largest data file kept in memory, in megabytes (0 spills everything)
    #[arg(long, global = true)]
    max_in_memory_mb: Option<u64>,

    /// Exact in-memory threshold in bytes; wins over --max-in-memory-mb
    #[arg(long, global = true)]
    max_in_memory_bytes: Option<u64>,

    /// Directory for spill files
    #[arg(long, global = true)]
    temp_dir: Option<PathBuf>,

    /// Restrict disk writes to these directories (repeatable)
    #[arg(long = "allow-dir", global = true)]
    allow_dirs: Vec<PathBuf>,

    /// Refuse every disk write
    #[arg(long, global = true, conflicts_with = "allow_dirs")]
    deny_writes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a container from files
    Create {
        /// Output container path
        #[arg(long, short = 'o')]
        output: PathBuf,

        /// Container type (bdoc, asice)
        #[arg(long = "type", short = 't', default_value = "bdoc")]
        container_type: ContainerType,

        /// Store every data file on disk regardless of size
        #[arg(long)]
        large: bool,

        /// Sign with the base64 Ed25519 key in this file
        #[arg(long)]
        sign_key: Option<PathBuf>,

        /// Data files as PATH or PATH=MIME_TYPE
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// List the data files and signatures of a container
    List {
        container: PathBuf,

        /// Output the manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract data files into a directory
    Extract {
        container: PathBuf,

        /// Destination directory
        #[arg(long, short = 'd', default_value = ".")]
        dir: PathBuf,
    },

    /// Generate an Ed25519 signing key
    Keygen {
        /// Key file to write
        #[arg(long, short = 'o')]
        output: PathBuf,
    },

    /// Add a signature to an existing container
    Sign {
        container: PathBuf,

        /// Base64 Ed25519 key file
        #[arg(long, short = 'k')]
        key: PathBuf,

        /// Output path (default: overwrite the input)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Validate the signatures of a container
    Verify {
        container: PathBuf,

        /// Require signatures made with the key of this fingerprint
        #[arg(long)]
        pin: Option<String>,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Output as JSON with provenance
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = load_configuration(&cli.storage).and_then(|(effective, configuration)| match cli.command {
        Commands::Create {
            output,
            container_type,
            large,
            sign_key,
            files,
        } => run_create(configuration, &output, container_type, large, sign_key.as_deref(), &files),
        Commands::List { container, json } => run_list(configuration, &container, json),
        Commands::Extract { container, dir } => run_extract(configuration, &container, &dir),
        Commands::Keygen { output } => run_keygen(configuration, &output),
        Commands::Sign {
            container,
            key,
            output,
        } => run_sign(configuration, &container, &key, output.as_deref()),
        Commands::Verify {
            container,
            pin,
            json,
        } => run_verify(configuration, &container, pin, json),
        Commands::Config { json } => run_config(&effective, &configuration, json),
    });

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// CLI flags as the highest-precedence config layer.
fn cli_overrides(args: &StorageArgs) -> Option<Value> {
    let mut storage = Map::new();
    if let Some(mb) = args.max_in_memory_mb {
        storage.insert("max_in_memory_mb".to_string(), json!(mb));
    }
    // A byte threshold from a lower layer would shadow the megabyte flag.
    match (args.max_in_memory_bytes, args.max_in_memory_mb) {
        (Some(bytes), _) => {
            storage.insert("max_in_memory_bytes".to_string(), json!(bytes));
        }
        (None, Some(_)) => {
            storage.insert("max_in_memory_bytes".to_string(), Value::Null);
        }
        (None, None) => {}
    }
    if let Some(dir) = &args.temp_dir {
        storage.insert("temp_dir".to_string(), json!(dir));
    }

    let mut root = Map::new();
    if !storage.is_empty() {
        root.insert("storage".to_string(), Value::Object(storage));
    }
    if args.deny_writes {
        root.insert("write_policy".to_string(), json!({ "mode": "deny_all" }));
    } else if !args.allow_dirs.is_empty() {
        root.insert(
            "write_policy".to_string(),
            json!({ "mode": "allow_list", "dirs": args.allow_dirs }),
        );
    }

    if root.is_empty() {
        None
    } else {
        Some(Value::Object(root))
    }
}

fn load_configuration(args: &StorageArgs) -> Result<(EffectiveConfig, Configuration)> {
    let host = host_config_path();
    let effective = EffectiveConfig::build(host.as_deref(), args.config.as_deref(), cli_overrides(args))?;
    let configuration = effective.configuration()?;
    Ok((effective, configuration))
}

fn open_container(path: &Path, configuration: Configuration) -> Result<Container> {
    ContainerBuilder::a_container(ContainerType::Bdoc)
        .from_existing_file(path)
        .with_configuration(configuration)
        .build()
}

/// Split `PATH=MIME_TYPE`; a bare path gets the default mime type.
fn parse_file_arg(arg: &str) -> (PathBuf, String) {
    match arg.rsplit_once('=') {
        Some((path, mime)) if mime.contains('/') => (PathBuf::from(path), mime.to_string()),
        _ => (PathBuf::from(arg), DEFAULT_MIME_TYPE.to_string()),
    }
}

fn run_create(
    configuration: Configuration,
    output: &Path,
    container_type: ContainerType,
    large: bool,
    sign_key: Option<&Path>,
    files: &[String],
) -> Result<i32> {
    let signer = sign_key.map(Ed25519Signer::from_key_file).transpose()?;

    let mut builder = ContainerBuilder::a_container(container_type).with_configuration(configuration);
    for arg in files {
        let (path, mime_type) = parse_file_arg(arg);
        builder = if large {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| ContainerError::InvalidName(path.display().to_string()))?
                .to_string();
            let file = File::open(&path)?;
            builder.with_large_data_file(file, name, mime_type)
        } else {
            builder.with_data_file_from_path(&path, mime_type)
        };
    }
    let mut container = builder.build()?;

    if let Some(signer) = &signer {
        container.sign_with(signer)?;
    }
    let written = container.save_to_path(output)?;

    println!(
        "Created {} ({}, {} data file(s), {} signature(s), {} bytes)",
        output.display(),
        container.container_type(),
        container.data_files().len(),
        container.signatures().len(),
        written
    );
    Ok(0)
}

fn run_list(configuration: Configuration, path: &Path, json: bool) -> Result<i32> {
    let container = open_container(path, configuration)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&container.manifest()?)?);
        return Ok(0);
    }

    println!("{} ({}, {})", path.display(), container.container_type(), container.state());
    for file in container.data_files() {
        println!(
            "  {:<40} {:<28} {:>12} {}",
            file.name(),
            file.mime_type(),
            file.file_size(),
            file.placement()
        );
    }
    println!("  {} signature(s)", container.signatures().len());
    Ok(0)
}

fn run_extract(configuration: Configuration, path: &Path, dir: &Path) -> Result<i32> {
    let container = open_container(path, configuration)?;
    let gate = container.storage_policy().gate();

    for file in container.data_files() {
        let target = dir.join(file.name());
        if let Some(parent) = target.parent() {
            gate.create_dir_all(parent)?;
        }
        let mut out = gate.create(&target)?;
        io::copy(&mut file.as_stream()?, &mut out)?;
        println!("  {}", target.display());
    }

    println!(
        "Extracted {} data file(s) ({} write attempt(s))",
        container.data_files().len(),
        gate.attempt_count()
    );
    Ok(0)
}

fn run_keygen(configuration: Configuration, output: &Path) -> Result<i32> {
    let key = generate_keypair();
    let mut file = configuration.write_gate().create(output)?;
    writeln!(file, "{}", encode_signing_key(&key))?;
    println!("Wrote {}", output.display());
    println!("Fingerprint: {}", compute_key_fingerprint(&key.verifying_key()));
    Ok(0)
}

fn run_sign(configuration: Configuration, path: &Path, key: &Path, output: Option<&Path>) -> Result<i32> {
    let signer = Ed25519Signer::from_key_file(key)?;
    let mut container = open_container(path, configuration)?;
    container.sign_with(&signer)?;

    // Content was fully ingested at open, so the input may be overwritten.
    let target = output.unwrap_or(path);
    container.save_to_path(target)?;

    println!(
        "Signed {} ({} signature(s), key {})",
        target.display(),
        container.signatures().len(),
        signer.fingerprint()
    );
    Ok(0)
}

fn run_verify(configuration: Configuration, path: &Path, pin: Option<String>, json: bool) -> Result<i32> {
    let mut container = open_container(path, configuration)?;
    let validator = match pin {
        Some(fingerprint) => Ed25519Validator::pinned(fingerprint),
        None => Ed25519Validator::new(),
    };
    let report = container.validate(&validator);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary);
        for error in &report.errors {
            println!("  - {}", error);
        }
    }

    Ok(if report.passed { 0 } else { EXIT_VALIDATION_FAILED })
}

fn run_config(effective: &EffectiveConfig, configuration: &Configuration, json: bool) -> Result<i32> {
    if json {
        println!("{}", effective.to_json()?);
        return Ok(0);
    }

    println!("Storage threshold: {}", configuration.storage_threshold());
    println!("Spill directory:   {}", configuration.spill_dir().display());
    println!("Write policy:      {}", configuration.write_policy.mode_name());
    for source in &effective.sources {
        match &source.path {
            Some(path) => println!("  layer {:?}: {}", source.origin, path),
            None => println!("  layer {:?}", source.origin),
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use asic_container::WritePolicy;

    fn storage_args() -> StorageArgs {
        StorageArgs {
            config: None,
            max_in_memory_mb: None,
            max_in_memory_bytes: None,
            temp_dir: None,
            allow_dirs: Vec::new(),
            deny_writes: false,
        }
    }

    #[test]
    fn test_parse_file_arg() {
        assert_eq!(
            parse_file_arg("doc.pdf=application/pdf"),
            (PathBuf::from("doc.pdf"), "application/pdf".to_string())
        );
        assert_eq!(
            parse_file_arg("a=b.txt"),
            (PathBuf::from("a=b.txt"), DEFAULT_MIME_TYPE.to_string())
        );
    }

    #[test]
    fn test_no_flags_no_overrides() {
        assert!(cli_overrides(&storage_args()).is_none());
    }

    #[test]
    fn test_overrides_from_flags() {
        let mut args = storage_args();
        args.max_in_memory_mb = Some(1);
        args.allow_dirs = vec![PathBuf::from("/var/cache/asic")];

        let value = cli_overrides(&args).unwrap();
        assert_eq!(value["storage"]["max_in_memory_mb"], 1);
        assert_eq!(value["storage"]["max_in_memory_bytes"], Value::Null);
        assert_eq!(value["write_policy"]["mode"], "allow_list");
        assert_eq!(value["write_policy"]["dirs"][0], "/var/cache/asic");
    }

    #[test]
    fn test_megabyte_flag_beats_file_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "[storage]\nmax_in_memory_bytes = 16\n").unwrap();

        let mut args = storage_args();
        args.config = Some(file);
        args.max_in_memory_mb = Some(2);
        let (_, configuration) = load_configuration(&args).unwrap();
        assert_eq!(configuration.storage.max_in_memory_bytes, None);
        assert_eq!(configuration.storage_threshold().max_in_memory_bytes(), 2 * 1024 * 1024);

        args.max_in_memory_bytes = Some(8);
        let value = cli_overrides(&args).unwrap();
        assert_eq!(value["storage"]["max_in_memory_bytes"], 8);
    }

    #[test]
    fn test_keygen_respects_write_gate() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("signing.key");
        let configuration = Configuration::default().with_write_policy(WritePolicy::DenyAll);

        let err = run_keygen(configuration, &output).unwrap_err();
        assert!(matches!(err, ContainerError::StorageRestricted { .. }));
        assert!(!output.exists());

        assert_eq!(run_keygen(Configuration::default(), &output).unwrap(), 0);
        assert!(Ed25519Signer::from_key_file(&output).is_ok());
    }

    #[test]
    fn test_deny_writes_override() {
        let mut args = storage_args();
        args.deny_writes = true;
        let value = cli_overrides(&args).unwrap();
        assert_eq!(value["write_policy"], json!({ "mode": "deny_all" }));
    }
}
