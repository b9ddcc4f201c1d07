//! Per-user key check.
//!
//! A wrong password derives a perfectly valid key, so it can only be caught
//! by trying to open something. Each user gets a small canary document in
//! the `keychecks` collection holding a known plaintext encrypted under
//! their key. Users without a canary yet are checked against their existing
//! encrypted records and enrolled on success. The same check decides whether
//! a canary that fails to open is damaged or the key is wrong.

use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::record::{fields, StoredContent};
use lockbox_common::{Collection, Error, RecordId, Result, UserId};
use lockbox_crypto::{decrypt_field, encrypt_field, CipherEnvelope, EncryptionKey};
use lockbox_store::{DocumentStore, Fields, Filter};

/// Collection holding one canary document per user, keyed by uid.
pub const KEYCHECK_COLLECTION: &str = "keychecks";

const CANARY_FIELD: &str = "canary";
const CANARY_PLAINTEXT: &[u8] = b"lockbox key check";

/// Outcome of trying a key against the user's encrypted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordCheck {
    Opened,
    NoEncryptedRecords,
    NoneOpened,
}

/// Confirm that `key` is the user's key, enrolling a canary if needed.
///
/// A canary that does not open is only trusted when the key also opens none
/// of the user's records. If a record opens, the canary is taken to be
/// damaged and is replaced.
///
/// # Errors
/// - `InvalidCredential` if the key opens neither the canary nor any of the
///   user's encrypted records
/// - `StoreUnavailable` if the store cannot be reached
pub async fn verify_or_enroll(
    store: &dyn DocumentStore,
    user: &UserId,
    key: &EncryptionKey,
) -> Result<()> {
    let id = RecordId::new(user.as_str());

    if let Some(doc) = store.get(KEYCHECK_COLLECTION, &id).await? {
        match doc.str_field(CANARY_FIELD).map(CipherEnvelope::parse) {
            Some(Ok(envelope)) => {
                if check_canary(key, &envelope).is_ok() {
                    return Ok(());
                }
                return match check_records(store, user, key).await? {
                    RecordCheck::Opened => {
                        warn!(user = %user, "Key check record is corrupted, re-enrolling");
                        enroll(store, user, key).await
                    }
                    RecordCheck::NoEncryptedRecords | RecordCheck::NoneOpened => {
                        Err(Error::InvalidCredential)
                    }
                };
            }
            _ => warn!(user = %user, "Key check record is malformed, re-checking"),
        }
    }

    match check_records(store, user, key).await? {
        RecordCheck::Opened | RecordCheck::NoEncryptedRecords => enroll(store, user, key).await,
        RecordCheck::NoneOpened => Err(Error::InvalidCredential),
    }
}

fn check_canary(key: &EncryptionKey, envelope: &CipherEnvelope) -> Result<()> {
    let plaintext = decrypt_field(key, envelope).map_err(|_| Error::InvalidCredential)?;

    if bool::from(plaintext.as_bytes().ct_eq(CANARY_PLAINTEXT)) {
        Ok(())
    } else {
        Err(Error::InvalidCredential)
    }
}

/// Try the key on the user's encrypted records until one opens.
/// Malformed envelopes are skipped.
async fn check_records(
    store: &dyn DocumentStore,
    user: &UserId,
    key: &EncryptionKey,
) -> Result<RecordCheck> {
    let mut attempts = 0usize;

    for collection in [Collection::Notes, Collection::Passwords] {
        let filter = Filter::eq(fields::USER_ID, user.as_str()).and_eq(fields::ENCRYPTED, true);
        let docs = store.query(collection.name(), &filter).await?;

        for doc in docs {
            let Ok(StoredContent::Encrypted(envelope)) = StoredContent::from_fields(&doc.fields)
            else {
                continue;
            };

            attempts += 1;
            if decrypt_field(key, &envelope).is_ok() {
                debug!(user = %user, collection = %collection, record = %doc.id, "Key opened existing record");
                return Ok(RecordCheck::Opened);
            }
        }
    }

    debug!(user = %user, attempts, "Checked encrypted records");
    Ok(if attempts == 0 {
        RecordCheck::NoEncryptedRecords
    } else {
        RecordCheck::NoneOpened
    })
}

async fn enroll(store: &dyn DocumentStore, user: &UserId, key: &EncryptionKey) -> Result<()> {
    let text = std::str::from_utf8(CANARY_PLAINTEXT)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    let envelope = encrypt_field(key, text)?;

    let mut doc = Fields::new();
    doc.insert(fields::USER_ID.into(), user.as_str().into());
    doc.insert(CANARY_FIELD.into(), envelope.into_string().into());

    store
        .put(KEYCHECK_COLLECTION, &RecordId::new(user.as_str()), doc)
        .await?;
    info!(user = %user, "Key check enrolled");
    Ok(())
}
