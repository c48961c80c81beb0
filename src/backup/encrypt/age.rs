use crate::backup::encrypt::{Encryptor, EncryptorBuilder};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::result::Result;
use age::stream::StreamReader;
use derive_more::From;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::{BufRead, Write};
use std::result;
use validator::{Validate, ValidationError, ValidationErrors};

/// Configuration for age encryption of the whole container stream.
///
/// Only scrypt passphrase recipients are supported. `work_factor` is the
/// scrypt log2(N); when absent age picks one that takes about a second on
/// the current machine. Every extract unit of a restore re-derives the key,
/// so large archives restored on slow machines may want a lower value.
#[skip_serializing_none]
#[derive(From, Clone, Deserialize, Serialize, Debug)]
#[serde(tag = "secret_type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum AgeEncryptorConfig {
    Passphrase {
        passphrase: RedactedString,
        #[serde(default)]
        work_factor: Option<u8>,
    },
}

fn validate_work_factor(work_factor: &Option<u8>) -> result::Result<(), ValidationError> {
    match work_factor {
        Some(wf) if *wf == 0 || *wf > 30 => Err(ValidationError::new("InvalidWorkFactor")
            .with_message(format!("work_factor must be within 1..=30, got {wf}").into())),
        _ => Ok(()),
    }
}

impl<W: Write> EncryptorBuilder<W> for AgeEncryptorConfig {
    fn build_encryptor(&self, writer: W) -> Result<Encryptor<W>> {
        match self {
            AgeEncryptorConfig::Passphrase {
                passphrase,
                work_factor,
            } => {
                let mut recipient = age::scrypt::Recipient::new(passphrase.inner().as_str().into());
                if let Some(work_factor) = work_factor {
                    tracing::debug!("Using scrypt work factor {work_factor}");
                    recipient.set_work_factor(*work_factor);
                }
                let encryptor = age::Encryptor::with_recipients(std::iter::once(
                    &recipient as &dyn age::Recipient,
                ))?;
                Ok(encryptor.wrap_output(writer)?.into())
            }
        }
    }
}

impl Validate for AgeEncryptorConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            AgeEncryptorConfig::Passphrase {
                passphrase,
                work_factor,
            } => {
                let mut errors = match passphrase.validate() {
                    Ok(()) => ValidationErrors::new(),
                    Err(e) => e,
                };
                if let Err(e) = validate_work_factor(work_factor) {
                    errors.add("work_factor", e);
                }
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(errors)
                }
            }
        }
    }
}

/// Opens an age stream with an scrypt passphrase identity.
pub fn decrypt_with_passphrase<R: BufRead>(
    reader: R,
    passphrase: &RedactedString,
) -> Result<StreamReader<R>> {
    let decryptor = age::Decryptor::new(reader)?;
    if !decryptor.is_scrypt() {
        return Err(crate::backup::result_error::error::Error::AuthFailure(
            "container is encrypted to a key, not a passphrase".into(),
        ));
    }
    let identity = age::scrypt::Identity::new(passphrase.inner().as_str().into());
    Ok(decryptor.decrypt(std::iter::once(&identity as &dyn age::Identity))?)
}
