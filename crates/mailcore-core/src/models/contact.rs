use serde::{Deserialize, Serialize};

/// Local row id of a contact. `-1` marks a contact that was never stored.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactDbId(pub i64);

impl ContactDbId {
    pub const ABSENT: ContactDbId = ContactDbId(-1);

    pub fn is_absent(self) -> bool {
        self == Self::ABSENT
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub db_id: ContactDbId,
    /// Server-side id, assigned once the contact has been uploaded.
    pub contact_id: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NewContact {
    pub contact_id: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContactEmail {
    pub email: String,
    pub name: String,
    pub contact_id: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}
