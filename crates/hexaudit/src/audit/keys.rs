//! Audit key lifecycle: load the persisted key or mint one on first start

use chrono::{DateTime, Utc};

use super::crypto::{AuditCipher, KEY_LEN};
use super::store::AuditStorage;
use super::{AuditConfigRow, AuditError, Result};

/// Load the key from the config row, creating the row with a fresh key if absent.
///
/// The row is inserted with `INSERT OR IGNORE` and read back, so a concurrent
/// initializer's key wins for everyone. A stored key of the wrong length is
/// an error and is never replaced.
pub async fn load_or_create(
    store: &dyn AuditStorage,
    retention_days: i64,
    now: DateTime<Utc>,
) -> Result<(AuditCipher, AuditConfigRow)> {
    let row = match store.load_config().await? {
        Some(row) => row,
        None => {
            let key = AuditCipher::generate_key()?;
            store.create_config(&key, retention_days, now).await?;
            tracing::info!("Generated new audit encryption key");
            store.load_config().await?.ok_or_else(|| {
                AuditError::KeyInit("config row missing after creation".to_string())
            })?
        }
    };

    if row.encryption_key.len() != KEY_LEN {
        return Err(AuditError::KeyInit(format!(
            "stored key is {} bytes, expected {KEY_LEN}",
            row.encryption_key.len()
        )));
    }

    let cipher = AuditCipher::new(&row.encryption_key)?;
    Ok((cipher, row))
}
