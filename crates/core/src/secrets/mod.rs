//! Encryption of the bot configuration's sensitive fields at rest.
//!
//! - `cipher` - AES-256-GCM field cipher keyed by record salt and instance id
//! - `mapper` - conversion between the decrypted record and its stored row
//! - `redact` - operator-facing view with credentials masked

pub mod cipher;
pub mod mapper;
pub mod redact;

pub use cipher::{CipherError, FieldCipher};
pub use mapper::{BotConfigMapper, ConfigurationError};
pub use redact::{redact_secret, RedactedBotConfig};
