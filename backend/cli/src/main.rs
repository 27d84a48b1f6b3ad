//! Module signing tool.
//!
//! `keygen` writes a PEM key pair, `sign`/`verify` operate on one module
//! directory, `sign-all` batch-signs every module under a directory, and
//! `scan` validates manifests without touching signatures.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use modforge_loader::ModuleScanner;
use modforge_security::{ModuleSigner, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, SIGNATURE_FILE};

#[derive(Parser)]
#[command(name = "modforge-sign")]
#[command(about = "Module signing tool for the modforge runtime")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an RSA key pair
    Keygen {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Sign a module directory
    Sign {
        module_path: PathBuf,
        /// Private key path
        #[arg(short, long, default_value = PRIVATE_KEY_FILE)]
        key: PathBuf,
    },
    /// Verify a module's signature
    Verify {
        module_path: PathBuf,
        /// Public key path (optional; a key embedded in the module wins)
        #[arg(short, long)]
        key: Option<PathBuf>,
    },
    /// Sign every module under a directory
    SignAll {
        modules_dir: PathBuf,
        /// Private key path
        #[arg(short, long, default_value = PRIVATE_KEY_FILE)]
        key: PathBuf,
    },
    /// Validate every module manifest under a directory
    Scan { modules_dir: PathBuf },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Keygen { output } => keygen(&output),
        Commands::Sign { module_path, key } => sign(&module_path, &key),
        Commands::Verify { module_path, key } => verify(&module_path, key.as_deref()),
        Commands::SignAll { modules_dir, key } => sign_all(&modules_dir, &key),
        Commands::Scan { modules_dir } => scan(&modules_dir),
    }
}

fn keygen(output: &Path) -> Result<i32> {
    let mut signer = ModuleSigner::new();
    println!("Generating RSA key pair...");
    signer.generate_key_pair()?;

    std::fs::create_dir_all(output)?;
    let private_key_path = output.join(PRIVATE_KEY_FILE);
    let public_key_path = output.join(PUBLIC_KEY_FILE);
    signer.save_key_pair(&private_key_path, &public_key_path)?;

    println!("✓ Key pair generated successfully");
    println!("  Private key: {}", private_key_path.display());
    println!("  Public key: {}", public_key_path.display());
    println!("\nKeep your private key secure!");
    Ok(0)
}

fn sign(module_path: &Path, key: &Path) -> Result<i32> {
    let mut signer = ModuleSigner::new();
    println!("Signing module: {}", module_path.display());
    println!("Using private key: {}", key.display());

    signer.load_private_key(key)?;
    let signature = signer.sign_module(module_path)?;

    println!("✓ Module signed successfully");
    println!("  Signature: {}...", &signature[..signature.len().min(64)]);
    println!("  Signature file: {}", module_path.join(SIGNATURE_FILE).display());
    Ok(0)
}

fn verify(module_path: &Path, key: Option<&Path>) -> Result<i32> {
    let mut signer = ModuleSigner::new();
    println!("Verifying module: {}", module_path.display());

    if let Some(key) = key {
        println!("Using public key: {}", key.display());
        signer.load_public_key(key)?;
    }

    // Signature metadata first, then the verdict.
    if let Some(info) = signer.get_signature_info(module_path) {
        println!("\nSignature Info:");
        println!("  Module: {} v{}", info.name, info.version);
        println!("  Signed at: {}", info.timestamp);
        println!("  Files: {}", info.file_count);
    }

    println!("\nVerifying signature...");
    let outcome = signer.verify_module(module_path)?;

    if outcome.is_valid() {
        println!("✓ Signature is valid");
        println!("✓ All files are intact");
        Ok(0)
    } else {
        println!("✗ Signature verification failed");
        for failure in &outcome.failures {
            println!("  - {failure}");
        }
        println!("✗ Module may have been tampered with");
        Ok(1)
    }
}

fn sign_all(modules_dir: &Path, key: &Path) -> Result<i32> {
    let mut signer = ModuleSigner::new();
    println!("Signing all modules in: {}", modules_dir.display());
    println!("Using private key: {}", key.display());
    signer.load_private_key(key)?;

    let mut modules: Vec<PathBuf> = std::fs::read_dir(modules_dir)
        .with_context(|| format!("read modules directory {}", modules_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && path.join("module.json").is_file())
        .collect();
    modules.sort();

    println!("Found {} modules\n", modules.len());

    let mut success = 0usize;
    let mut failed = 0usize;
    for module_path in modules {
        let name = module_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        print!("Signing {name}... ");
        match signer.sign_module(&module_path) {
            Ok(_) => {
                println!("✓");
                success += 1;
            }
            Err(e) => {
                println!("✗ {e:#}");
                failed += 1;
            }
        }
    }

    println!("\nSummary:");
    println!("  Success: {success}");
    println!("  Failed: {failed}");
    Ok(if failed > 0 { 1 } else { 0 })
}

fn scan(modules_dir: &Path) -> Result<i32> {
    let scanner = ModuleScanner::new(modules_dir);
    let results = scanner.scan()?;

    let mut invalid = 0usize;
    for result in &results {
        if result.is_valid() {
            let manifest = result.manifest.as_ref().unwrap();
            println!("✓ {} v{}", manifest.name, manifest.version);
        } else {
            invalid += 1;
            println!("✗ {}", result.module_name);
            for error in &result.errors {
                println!("    - {error}");
            }
        }
    }

    println!("\n{} modules, {} invalid", results.len(), invalid);
    Ok(if invalid > 0 { 1 } else { 0 })
}
