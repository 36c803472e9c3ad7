use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::models::AddressKeysError;

const FLAG_VERIFY_SIGNATURE: u8 = 0b01;
const FLAG_ENCRYPT: u8 = 0b10;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressKeyId(pub String);

impl AddressKeyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AddressKeyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One PGP key pair attached to a mail address.
///
/// Values are immutable; the `with_*` helpers return an updated copy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AddressKey {
    pub id: AddressKeyId,
    pub version: u32,
    pub can_encrypt: bool,
    pub can_verify_signature: bool,
    pub public_key: String,
    pub private_key: String,
    pub token: Option<String>,
    pub signature: Option<String>,
    pub activation: Option<String>,
    /// Whether the private key can currently be decrypted.
    pub active: bool,
}

impl AddressKey {
    /// Packs the capability booleans into the backend `Flags` field.
    pub fn build_back_end_flags(&self) -> u8 {
        let mut flags = 0;
        if self.can_encrypt {
            flags |= FLAG_ENCRYPT;
        }
        if self.can_verify_signature {
            flags |= FLAG_VERIFY_SIGNATURE;
        }
        flags
    }

    /// Splits a backend `Flags` value into `(can_encrypt, can_verify_signature)`.
    /// Bits above the two capability bits are ignored.
    pub fn from_back_end_flags(flags: u8) -> (bool, bool) {
        (flags & FLAG_ENCRYPT != 0, flags & FLAG_VERIFY_SIGNATURE != 0)
    }

    pub fn is_activation_pending(&self) -> bool {
        self.activation.is_some()
    }

    pub fn with_active(&self, active: bool) -> Self {
        Self {
            active,
            ..self.clone()
        }
    }

    pub fn with_activation_cleared(&self) -> Self {
        Self {
            activation: None,
            ..self.clone()
        }
    }

    pub fn to_response(&self) -> AddressKeyResponse {
        AddressKeyResponse {
            id: self.id.0.clone(),
            version: self.version,
            flags: self.build_back_end_flags(),
            public_key: self.public_key.clone(),
            private_key: self.private_key.clone(),
            token: self.token.clone(),
            signature: self.signature.clone(),
            activation: self.activation.clone(),
            active: u8::from(self.active),
        }
    }
}

/// Address key as returned by the mail API.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddressKeyResponse {
    #[serde(rename = "ID")]
    pub id: String,
    pub version: u32,
    pub flags: u8,
    pub public_key: String,
    pub private_key: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub activation: Option<String>,
    pub active: u8,
}

impl From<AddressKeyResponse> for AddressKey {
    fn from(response: AddressKeyResponse) -> Self {
        let (can_encrypt, can_verify_signature) = AddressKey::from_back_end_flags(response.flags);
        AddressKey {
            id: AddressKeyId(response.id),
            version: response.version,
            can_encrypt,
            can_verify_signature,
            public_key: response.public_key,
            private_key: response.private_key,
            token: response.token,
            signature: response.signature,
            activation: response.activation,
            active: response.active != 0,
        }
    }
}

/// All keys of one address, with an optional primary that must belong to the set.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AddressKeys {
    primary_key: Option<AddressKey>,
    keys: Vec<AddressKey>,
}

impl AddressKeys {
    pub const EMPTY: AddressKeys = AddressKeys {
        primary_key: None,
        keys: Vec::new(),
    };

    pub fn new(
        primary_key: Option<AddressKey>,
        keys: Vec<AddressKey>,
    ) -> Result<Self, AddressKeysError> {
        if let Some(primary) = &primary_key
            && !keys.contains(primary)
        {
            return Err(AddressKeysError::PrimaryKeyNotInKeys {
                id: primary.id.clone(),
            });
        }

        Ok(Self { primary_key, keys })
    }

    pub fn from_keys_with_primary_id(
        keys: Vec<AddressKey>,
        primary_id: &AddressKeyId,
    ) -> Result<Self, AddressKeysError> {
        let primary = keys
            .iter()
            .find(|key| &key.id == primary_id)
            .cloned()
            .ok_or_else(|| AddressKeysError::UnknownPrimaryKeyId {
                id: primary_id.clone(),
            })?;
        Self::new(Some(primary), keys)
    }

    pub fn primary_key(&self) -> Option<&AddressKey> {
        self.primary_key.as_ref()
    }

    pub fn keys(&self) -> &[AddressKey] {
        &self.keys
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AddressKey> {
        self.keys.iter()
    }

    pub fn find(&self, id: &AddressKeyId) -> Option<&AddressKey> {
        self.keys.iter().find(|key| &key.id == id)
    }

    pub fn into_parts(self) -> (Option<AddressKey>, Vec<AddressKey>) {
        (self.primary_key, self.keys)
    }
}

impl Default for AddressKeys {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl<'a> IntoIterator for &'a AddressKeys {
    type Item = &'a AddressKey;
    type IntoIter = std::slice::Iter<'a, AddressKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
