//! Module signing and verification.
//!
//! A signature record is a Merkle-style manifest of per-file SHA-256 hashes,
//! signed as a unit with RSA-SHA256 (PKCS#1 v1.5). Verifying it is as strong
//! as signing a tarball of the module, without materializing one.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::sha2::Sha256 as RsaSha256;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use modforge_core::{ManifestParser, SignatureFailure};

pub const SIGNATURE_FILE: &str = "module.signature";
pub const PRIVATE_KEY_FILE: &str = "module.private.key";
pub const PUBLIC_KEY_FILE: &str = "module.public.key";

/// Path fragments never covered by a signature: the record itself, key
/// material, and build litter.
const EXCLUDED_PATTERNS: &[&str] = &[
    SIGNATURE_FILE,
    PRIVATE_KEY_FILE,
    PUBLIC_KEY_FILE,
    "node_modules",
    ".git",
];

const RSA_BITS: usize = 2048;

/// The signed portion of a signature record. Serialized as canonical pretty
/// JSON (BTreeMap keys keep the byte stream deterministic) both at signing
/// and verification time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureData {
    pub name: String,
    pub version: String,
    pub dependencies: BTreeMap<String, String>,
    /// Relative path -> hex SHA-256 of every covered file.
    pub file_hashes: BTreeMap<String, String>,
    /// RFC 3339 signing time.
    pub timestamp: String,
}

/// On-disk `module.signature` content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRecord {
    /// Base64 RSA-SHA256 signature over the canonical serialization of `data`.
    pub signature: String,
    pub data: SignatureData,
}

/// Metadata read from a signature record without touching the file tree.
#[derive(Debug, Clone)]
pub struct SignatureInfo {
    pub name: String,
    pub version: String,
    pub timestamp: String,
    pub file_count: usize,
}

/// Result of verifying a module. Every detected tamper class is reported,
/// not just the first.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub failures: Vec<SignatureFailure>,
}

impl VerifyOutcome {
    pub fn valid() -> Self {
        Self { failures: Vec::new() }
    }

    pub fn failed(failure: SignatureFailure) -> Self {
        Self { failures: vec![failure] }
    }

    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
pub struct ModuleSigner {
    private_key: Option<RsaPrivateKey>,
    public_key: Option<RsaPublicKey>,
}

impl ModuleSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh RSA-2048 key pair and hold it in memory.
    pub fn generate_key_pair(&mut self) -> Result<()> {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_BITS)
            .context("RSA key generation failed")?;
        self.public_key = Some(private_key.to_public_key());
        self.private_key = Some(private_key);
        Ok(())
    }

    pub fn load_private_key(&mut self, path: &Path) -> Result<()> {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("read private key {path:?}"))?;
        self.private_key =
            Some(RsaPrivateKey::from_pkcs8_pem(&pem).context("parse PKCS#8 private key")?);
        Ok(())
    }

    pub fn load_public_key(&mut self, path: &Path) -> Result<()> {
        let pem =
            std::fs::read_to_string(path).with_context(|| format!("read public key {path:?}"))?;
        self.public_key =
            Some(RsaPublicKey::from_public_key_pem(&pem).context("parse SPKI public key")?);
        Ok(())
    }

    /// Write the held key pair as PEM files.
    pub fn save_key_pair(&self, private_path: &Path, public_path: &Path) -> Result<()> {
        let private_key = self.private_key.as_ref().context("no key pair generated")?;
        let public_key = self.public_key.as_ref().context("no key pair generated")?;

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .context("encode private key")?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .context("encode public key")?;

        std::fs::write(private_path, private_pem.as_bytes())?;
        std::fs::write(public_path, public_pem.as_bytes())?;
        Ok(())
    }

    /// Sign a module directory: hash the file tree, build the signature
    /// record, write `module.signature`, and co-locate the public key when
    /// held. Returns the base64 signature.
    pub fn sign_module(&self, dir: &Path) -> Result<String> {
        let private_key = match self.private_key.as_ref() {
            Some(key) => key,
            None => bail!("private key not loaded"),
        };

        let manifest = ManifestParser::parse_dir(dir)
            .with_context(|| format!("read module manifest in {dir:?}"))?;

        let file_hashes = hash_directory(dir)?;
        let data = SignatureData {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            dependencies: manifest.dependencies.clone(),
            file_hashes,
            timestamp: Utc::now().to_rfc3339(),
        };

        let payload = canonical_json(&data)?;
        let signing_key = SigningKey::<RsaSha256>::new(private_key.clone());
        let signature = BASE64.encode(signing_key.sign(payload.as_bytes()).to_bytes());

        let record = SignatureRecord { signature: signature.clone(), data };
        std::fs::write(
            dir.join(SIGNATURE_FILE),
            serde_json::to_string_pretty(&record)?,
        )?;

        if let Some(public_key) = self.public_key.as_ref() {
            let pem = public_key
                .to_public_key_pem(LineEnding::LF)
                .context("encode public key")?;
            std::fs::write(dir.join(PUBLIC_KEY_FILE), pem)?;
        }

        info!(
            "[Signer] Signed module {} v{} ({} files)",
            manifest.name,
            manifest.version,
            record.data.file_hashes.len()
        );
        Ok(signature)
    }

    /// Verify a module directory against its signature record.
    ///
    /// Policy failures (missing record, missing key, tampering) come back in
    /// the outcome; only I/O and parse problems are hard errors.
    pub fn verify_module(&self, dir: &Path) -> Result<VerifyOutcome> {
        let record = match self.read_record(dir)? {
            Some(record) => record,
            None => return Ok(VerifyOutcome::failed(SignatureFailure::RecordMissing)),
        };

        // Prefer a public key embedded alongside the module.
        let embedded = dir.join(PUBLIC_KEY_FILE);
        let public_key = if embedded.is_file() {
            let pem = std::fs::read_to_string(&embedded)?;
            Some(RsaPublicKey::from_public_key_pem(&pem).context("parse embedded public key")?)
        } else {
            self.public_key.clone()
        };
        let public_key = match public_key {
            Some(key) => key,
            None => {
                warn!("[Signer] No public key available to verify {dir:?}");
                return Ok(VerifyOutcome::failed(SignatureFailure::NoKey));
            }
        };

        let payload = canonical_json(&record.data)?;
        let verifying_key = VerifyingKey::<RsaSha256>::new(public_key);
        let sig_bytes = match BASE64.decode(&record.signature) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(VerifyOutcome::failed(SignatureFailure::BadSignature)),
        };
        let signature = match Signature::try_from(sig_bytes.as_slice()) {
            Ok(sig) => sig,
            Err(_) => return Ok(VerifyOutcome::failed(SignatureFailure::BadSignature)),
        };
        if verifying_key.verify(payload.as_bytes(), &signature).is_err() {
            warn!("[Signer] Signature mismatch for {dir:?}");
            return Ok(VerifyOutcome::failed(SignatureFailure::BadSignature));
        }

        // The record is authentic; now diff the tree against it. All three
        // tamper classes are collected so each shows up in the logs.
        let current = hash_directory(dir)?;
        let mut failures = Vec::new();

        for (file, recorded) in &record.data.file_hashes {
            match current.get(file) {
                None => {
                    warn!("[Signer] Signed file missing: {file}");
                    failures.push(SignatureFailure::MissingFile(file.clone()));
                }
                Some(hash) if hash != recorded => {
                    warn!("[Signer] File hash mismatch: {file}");
                    failures.push(SignatureFailure::HashMismatch(file.clone()));
                }
                Some(_) => {}
            }
        }

        for file in current.keys() {
            if !record.data.file_hashes.contains_key(file) {
                warn!("[Signer] Unexpected file not covered by signature: {file}");
                failures.push(SignatureFailure::UnexpectedFile(file.clone()));
            }
        }

        Ok(VerifyOutcome { failures })
    }

    /// Read signature metadata without recomputing any hashes. `None` when
    /// the record is absent or unreadable.
    pub fn get_signature_info(&self, dir: &Path) -> Option<SignatureInfo> {
        let record = self.read_record(dir).ok()??;
        Some(SignatureInfo {
            name: record.data.name,
            version: record.data.version,
            timestamp: record.data.timestamp,
            file_count: record.data.file_hashes.len(),
        })
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    fn read_record(&self, dir: &Path) -> Result<Option<SignatureRecord>> {
        let path = dir.join(SIGNATURE_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let record =
            serde_json::from_str(&raw).with_context(|| format!("parse signature record {path:?}"))?;
        Ok(Some(record))
    }
}

/// Canonical serialization signed and verified: pretty JSON of the typed
/// record, with map keys in sorted order.
fn canonical_json(data: &SignatureData) -> Result<String> {
    Ok(serde_json::to_string_pretty(data)?)
}

fn hash_file(path: &Path) -> Result<String> {
    let content = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&content)))
}

/// Hash every file under `dir` (recursively), keyed by `/`-separated
/// relative path, with the standard exclusions applied.
fn hash_directory(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut hashes = BTreeMap::new();
    walk(dir, dir, &mut hashes)?;
    Ok(hashes)
}

fn walk(root: &Path, current: &Path, hashes: &mut BTreeMap<String, String>) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .expect("walked path is under root")
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if EXCLUDED_PATTERNS.iter().any(|pattern| relative.contains(pattern)) {
            continue;
        }

        if path.is_dir() {
            walk(root, &path, hashes)?;
        } else if path.is_file() {
            hashes.insert(relative, hash_file(&path)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn module_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("module.json"),
            r#"{
                "name": "report-center",
                "displayName": "Report Center",
                "version": "1.0.0",
                "dependencies": { "auth": "^1.0.0" }
            }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("service.sql"), "SELECT 1;").unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/logo.txt"), "logo").unwrap();
        dir
    }

    fn signer_with_keys() -> ModuleSigner {
        let mut signer = ModuleSigner::new();
        signer.generate_key_pair().unwrap();
        signer
    }

    #[test]
    fn test_sign_then_verify_is_valid() {
        let dir = module_dir();
        let signer = signer_with_keys();
        signer.sign_module(dir.path()).unwrap();

        let outcome = signer.verify_module(dir.path()).unwrap();
        assert!(outcome.is_valid(), "failures: {:?}", outcome.failures);
    }

    #[test]
    fn test_modified_file_is_a_hash_mismatch() {
        let dir = module_dir();
        let signer = signer_with_keys();
        signer.sign_module(dir.path()).unwrap();

        std::fs::write(dir.path().join("service.sql"), "SELECT 2;").unwrap();

        let outcome = signer.verify_module(dir.path()).unwrap();
        assert!(!outcome.is_valid());
        assert!(outcome
            .failures
            .iter()
            .any(|f| matches!(f, SignatureFailure::HashMismatch(p) if p == "service.sql")));
    }

    #[test]
    fn test_added_file_is_unexpected() {
        let dir = module_dir();
        let signer = signer_with_keys();
        signer.sign_module(dir.path()).unwrap();

        std::fs::write(dir.path().join("smuggled.txt"), "x").unwrap();

        let outcome = signer.verify_module(dir.path()).unwrap();
        assert!(!outcome.is_valid());
        assert!(outcome
            .failures
            .iter()
            .any(|f| matches!(f, SignatureFailure::UnexpectedFile(p) if p == "smuggled.txt")));
    }

    #[test]
    fn test_removed_file_is_missing() {
        let dir = module_dir();
        let signer = signer_with_keys();
        signer.sign_module(dir.path()).unwrap();

        std::fs::remove_file(dir.path().join("assets/logo.txt")).unwrap();

        let outcome = signer.verify_module(dir.path()).unwrap();
        assert!(!outcome.is_valid());
        assert!(outcome
            .failures
            .iter()
            .any(|f| matches!(f, SignatureFailure::MissingFile(p) if p == "assets/logo.txt")));
    }

    #[test]
    fn test_signature_info_survives_file_deletion() {
        let dir = module_dir();
        let signer = signer_with_keys();
        signer.sign_module(dir.path()).unwrap();

        std::fs::remove_file(dir.path().join("service.sql")).unwrap();

        // Count comes from the record, not the current directory.
        let info = signer.get_signature_info(dir.path()).unwrap();
        assert_eq!(info.name, "report-center");
        assert_eq!(info.version, "1.0.0");
        assert_eq!(info.file_count, 3);

        assert!(!signer.verify_module(dir.path()).unwrap().is_valid());
    }

    #[test]
    fn test_missing_record_and_missing_key() {
        let dir = module_dir();
        let signer = ModuleSigner::new();
        let outcome = signer.verify_module(dir.path()).unwrap();
        assert_eq!(outcome.failures, vec![SignatureFailure::RecordMissing]);

        // Sign without a public key on either side: verification cannot run.
        let mut signing_only = ModuleSigner::new();
        signing_only.generate_key_pair().unwrap();
        let priv_path = dir.path().join("outside.private.pem");
        let pub_path = dir.path().join("outside.public.pem");
        signing_only.save_key_pair(&priv_path, &pub_path).unwrap();

        let mut signer = ModuleSigner::new();
        signer.load_private_key(&priv_path).unwrap();
        std::fs::remove_file(&priv_path).unwrap();
        std::fs::remove_file(&pub_path).unwrap();
        signer.sign_module(dir.path()).unwrap();

        let verifier = ModuleSigner::new();
        let outcome = verifier.verify_module(dir.path()).unwrap();
        assert_eq!(outcome.failures, vec![SignatureFailure::NoKey]);
    }

    #[test]
    fn test_foreign_key_rejects_signature() {
        let dir = module_dir();
        let signer = signer_with_keys();
        signer.sign_module(dir.path()).unwrap();

        // Replace the embedded public key with an unrelated one.
        let mut other = ModuleSigner::new();
        other.generate_key_pair().unwrap();
        let priv_path = dir.path().join("k.private.pem");
        let pub_path = dir.path().join(PUBLIC_KEY_FILE);
        other.save_key_pair(&priv_path, &pub_path).unwrap();
        std::fs::remove_file(&priv_path).unwrap();

        let verifier = ModuleSigner::new();
        let outcome = verifier.verify_module(dir.path()).unwrap();
        assert_eq!(outcome.failures, vec![SignatureFailure::BadSignature]);
    }

    #[test]
    fn test_key_round_trip_through_pem() {
        let dir = TempDir::new().unwrap();
        let priv_path = dir.path().join("module.private.key");
        let pub_path = dir.path().join("module.public.key");

        let mut signer = ModuleSigner::new();
        signer.generate_key_pair().unwrap();
        signer.save_key_pair(&priv_path, &pub_path).unwrap();

        let mut reloaded = ModuleSigner::new();
        reloaded.load_private_key(&priv_path).unwrap();
        reloaded.load_public_key(&pub_path).unwrap();
        assert!(reloaded.has_private_key());

        let module = module_dir();
        reloaded.sign_module(module.path()).unwrap();
        assert!(reloaded.verify_module(module.path()).unwrap().is_valid());
    }
}
