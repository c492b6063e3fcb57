use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dk_core::{Encryptor, EncryptorError, KeyScope, WrapperKind};

/// Envelope codec for local projects.
///
/// Values are bound to their key scope (a value encrypted for one configuration does not
/// decrypt under another) but are only encoded, not enciphered.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEncryptor;

impl Encryptor for LocalEncryptor {
    fn encrypt(
        &self,
        plaintext: &str,
        wrapper: WrapperKind,
        scope: &KeyScope,
    ) -> Result<String, EncryptorError> {
        let key = scope.key_id(wrapper)?;
        Ok(format!(
            "{}{}",
            wrapper.prefix(),
            BASE64.encode(format!("{key}:{plaintext}"))
        ))
    }

    fn decrypt(&self, value: &str, scope: &KeyScope) -> Result<String, EncryptorError> {
        let wrapper = WrapperKind::detect(value).ok_or(EncryptorError::NotEncrypted)?;
        let decoded = BASE64
            .decode(&value[wrapper.prefix().len()..])
            .map_err(|e| EncryptorError::Malformed(e.to_string()))?;
        let text = String::from_utf8(decoded).map_err(|e| EncryptorError::Malformed(e.to_string()))?;
        let (key, plain) = text
            .split_once(':')
            .ok_or_else(|| EncryptorError::Malformed("missing key id".to_string()))?;
        if key != scope.key_id(wrapper)? {
            return Err(EncryptorError::ScopeMismatch(wrapper.to_string()));
        }
        Ok(plain.to_string())
    }
}
