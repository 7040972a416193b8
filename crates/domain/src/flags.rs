//! GATT flag vocabulary.
//!
//! Flags are opaque capability tags forwarded to the publisher unchanged.
//! The constants below are the strings BlueZ understands.

/// Characteristic flags.
pub mod characteristic {
    pub const BROADCAST: &str = "broadcast";
    pub const READ: &str = "read";
    pub const WRITE_WITHOUT_RESPONSE: &str = "write-without-response";
    pub const WRITE: &str = "write";
    pub const NOTIFY: &str = "notify";
    pub const INDICATE: &str = "indicate";
    pub const AUTHENTICATED_SIGNED_WRITES: &str = "authenticated-signed-writes";
    pub const EXTENDED_PROPERTIES: &str = "extended-properties";
    pub const RELIABLE_WRITE: &str = "reliable-write";
    pub const WRITABLE_AUXILIARIES: &str = "writable-auxiliaries";
    pub const ENCRYPT_READ: &str = "encrypt-read";
    pub const ENCRYPT_WRITE: &str = "encrypt-write";
    pub const ENCRYPT_AUTHENTICATED_READ: &str = "encrypt-authenticated-read";
    pub const ENCRYPT_AUTHENTICATED_WRITE: &str = "encrypt-authenticated-write";
    pub const SECURE_READ: &str = "secure-read";
    pub const SECURE_WRITE: &str = "secure-write";
    pub const AUTHORIZE: &str = "authorize";
}

/// Descriptor flags.
pub mod descriptor {
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    pub const ENCRYPT_READ: &str = "encrypt-read";
    pub const ENCRYPT_WRITE: &str = "encrypt-write";
    pub const ENCRYPT_AUTHENTICATED_READ: &str = "encrypt-authenticated-read";
    pub const ENCRYPT_AUTHENTICATED_WRITE: &str = "encrypt-authenticated-write";
    pub const SECURE_READ: &str = "secure-read";
    pub const SECURE_WRITE: &str = "secure-write";
    pub const AUTHORIZE: &str = "authorize";
}

/// Collect flag names into the owned form stored on entities.
pub fn collect<I, S>(flags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    flags.into_iter().map(Into::into).collect()
}

/// Flags given to newly allocated characteristics.
#[must_use]
pub fn default_characteristic() -> Vec<String> {
    collect([characteristic::READ, characteristic::WRITE])
}

/// Flags given to newly allocated descriptors.
#[must_use]
pub fn default_descriptor() -> Vec<String> {
    collect([descriptor::READ, descriptor::WRITE])
}
