pub mod age;

use crate::backup::encrypt::age::AgeEncryptorConfig;
use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddDebugObjectAndFnName;
use ::age::stream::{StreamReader, StreamWriter};
use derive_more::From;
use io_enum::{Read, Write};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::result;

use validator::{Validate, ValidationErrors};

/// First bytes of a binary age file.
pub const AGE_MAGIC: &[u8] = b"age-encryption.org/v1";

#[derive(Write, From)]
pub enum Encryptor<W: Write> {
    None(W),
    AgeEncryptor(StreamWriter<W>),
}

#[derive(Read)]
pub enum Decryptor<R: BufRead> {
    None(R),
    AgeDecryptor(StreamReader<R>),
}

#[derive(Clone, Default, From, Serialize, Deserialize, Debug)]
#[serde(tag = "encryptor_type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum EncryptorConfig {
    #[default]
    None,
    Age(AgeEncryptorConfig),
}

impl EncryptorConfig {
    /// Passphrase-encrypted container, the usual way a job asks for one.
    pub fn passphrase<P: Into<RedactedString>>(passphrase: P) -> Self {
        EncryptorConfig::Age(AgeEncryptorConfig::Passphrase {
            passphrase: passphrase.into(),
            work_factor: None,
        })
    }
}

impl Validate for EncryptorConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            EncryptorConfig::None => Ok(()),
            EncryptorConfig::Age(inner) => inner.validate(),
        }
    }
}

pub trait EncryptorBuilder<W: Write> {
    fn build_encryptor(&self, writer: W) -> Result<Encryptor<W>>;
}

impl<W: Write> Finish<W> for Encryptor<W> {
    fn finish(self) -> result::Result<W, std::io::Error> {
        match self {
            Encryptor::None(w) => Ok(w),
            Encryptor::AgeEncryptor(w) => w.finish(),
        }
    }
}

impl<W: Write> EncryptorBuilder<W> for EncryptorConfig {
    fn build_encryptor(&self, writer: W) -> Result<Encryptor<W>> {
        match self {
            EncryptorConfig::None => {
                tracing::info!("Using no encryption");
                Ok(writer.into())
            }
            EncryptorConfig::Age(age) => {
                tracing::info!("Initializing Age encryption with passphrase");
                age.build_encryptor(writer)
            }
        }
        .add_debug_object_and_fn_name(self.clone(), "build_encryptor")
    }
}

impl FileExtProvider for EncryptorConfig {
    fn file_ext(&self) -> Option<&'static str> {
        match self {
            EncryptorConfig::None => None,
            EncryptorConfig::Age(_) => Some("age"),
        }
    }
}

/// Wraps `reader` in an age decryptor when the stream carries the age
/// header. A missing or wrong passphrase is reported as
/// [`Error::AuthFailure`] before any payload byte is handed out.
pub fn detect_decryptor<R: BufRead>(
    mut reader: R,
    passphrase: Option<&RedactedString>,
) -> Result<Decryptor<R>> {
    if !reader.fill_buf()?.starts_with(AGE_MAGIC) {
        if passphrase.is_some() {
            tracing::warn!("Passphrase supplied but container is not encrypted, ignoring it");
        }
        return Ok(Decryptor::None(reader));
    }

    let passphrase = passphrase.ok_or_else(|| {
        Error::AuthFailure("container is encrypted and no passphrase was given".into())
    })?;
    tracing::debug!("Detected age encrypted stream");
    self::age::decrypt_with_passphrase(reader, passphrase).map(Decryptor::AgeDecryptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::result_error::error::ErrorKind;
    use std::io::{BufReader, Cursor, Read};

    fn encrypt(plain: &[u8], passphrase: &str) -> Vec<u8> {
        let config = EncryptorConfig::Age(AgeEncryptorConfig::Passphrase {
            passphrase: passphrase.into(),
            work_factor: Some(2),
        });
        let mut encryptor = config.build_encryptor(Vec::new()).unwrap();
        encryptor.write_all(plain).unwrap();
        encryptor.finish().unwrap()
    }

    #[test]
    fn test_encryptor_config_none() {
        let config = EncryptorConfig::None;
        assert!(config.validate().is_ok());
        assert!(config.file_ext().is_none());
        assert!(matches!(
            config.build_encryptor(Cursor::new(Vec::new())).unwrap(),
            Encryptor::None(_)
        ));
    }

    #[test]
    fn test_encryptor_config_serialization() {
        let serialized = serde_json::to_string(&EncryptorConfig::None).unwrap();
        assert_eq!(serialized, "{\"encryptor_type\":\"none\"}");

        let config = EncryptorConfig::passphrase("long enough secret");
        assert_eq!(config.file_ext(), Some("age"));
    }

    #[test]
    fn test_detect_decryptor_round_trip() {
        let encrypted = encrypt(b"top secret", "correct horse");
        assert!(encrypted.starts_with(AGE_MAGIC));

        let passphrase = RedactedString::from("correct horse");
        let mut reader =
            detect_decryptor(BufReader::new(Cursor::new(encrypted)), Some(&passphrase)).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "top secret");
    }

    #[test]
    fn test_detect_decryptor_wrong_passphrase() {
        let encrypted = encrypt(b"top secret", "correct horse");
        let passphrase = RedactedString::from("battery staple");
        let res = detect_decryptor(BufReader::new(Cursor::new(encrypted)), Some(&passphrase));
        assert_eq!(res.err().map(|e| e.kind()), Some(ErrorKind::AuthFailure));
    }

    #[test]
    fn test_detect_decryptor_missing_passphrase() {
        let encrypted = encrypt(b"top secret", "correct horse");
        let res = detect_decryptor(BufReader::new(Cursor::new(encrypted)), None);
        assert_eq!(res.err().map(|e| e.kind()), Some(ErrorKind::AuthFailure));
    }

    #[test]
    fn test_detect_decryptor_plain_with_passphrase() {
        let passphrase = RedactedString::from("unused passphrase");
        let reader = detect_decryptor(BufReader::new(&b"plain"[..]), Some(&passphrase)).unwrap();
        assert!(matches!(reader, Decryptor::None(_)));
    }
}
