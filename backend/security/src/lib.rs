pub mod signer;

pub use signer::{
    ModuleSigner, SignatureData, SignatureInfo, SignatureRecord, VerifyOutcome, PRIVATE_KEY_FILE,
    PUBLIC_KEY_FILE, SIGNATURE_FILE,
};
