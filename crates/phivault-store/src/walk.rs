//! Sensitive-field discovery over record trees.
//!
//! Arrays are walked element-wise, objects key-wise. A field is replaced only
//! when its name is in the requested set and its value has the right shape;
//! every other value is descended into.

use std::collections::{BTreeSet, HashSet};

use phivault_core::{VaultError, VaultResult};
use phivault_crypto::EncryptedField;
use serde_json::Value;

/// Replace every non-empty string under a name in `names` with a sealed field.
///
/// Names that were actually sealed are added to `sealed`.
pub(crate) fn seal_fields<F>(
    value: &mut Value,
    names: &HashSet<&str>,
    sealed: &mut BTreeSet<String>,
    seal: &mut F,
) -> VaultResult<()>
where
    F: FnMut(&str) -> VaultResult<EncryptedField>,
{
    match value {
        Value::Object(map) => {
            for (name, child) in map.iter_mut() {
                match child {
                    Value::String(s) if !s.is_empty() && names.contains(name.as_str()) => {
                        let field = seal(s)?;
                        *child = serde_json::to_value(field)
                            .map_err(|e| VaultError::Serialization(e.to_string()))?;
                        sealed.insert(name.clone());
                    }
                    _ => seal_fields(child, names, sealed, seal)?,
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                seal_fields(item, names, sealed, seal)?;
            }
            Ok(())
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
    }
}

/// Replace every sealed field under a name in `names` with its plaintext.
///
/// Objects under those names without `ciphertext` or `algorithm` keys are
/// walked as ordinary data. Objects carrying either key must parse as an
/// [`EncryptedField`] or the walk fails with [`VaultError::InvalidFormat`].
pub(crate) fn open_fields<F>(
    value: &mut Value,
    names: &BTreeSet<String>,
    open: &mut F,
) -> VaultResult<()>
where
    F: FnMut(&EncryptedField) -> VaultResult<String>,
{
    match value {
        Value::Object(map) => {
            for (name, child) in map.iter_mut() {
                let sealed = match &*child {
                    Value::Object(fields)
                        if names.contains(name)
                            && (fields.contains_key("ciphertext")
                                || fields.contains_key("algorithm")) =>
                    {
                        let shaped = Value::Object(fields.clone());
                        let field = serde_json::from_value::<EncryptedField>(shaped).map_err(|_| {
                            VaultError::InvalidFormat(format!("malformed encrypted field `{name}`"))
                        })?;
                        Some(field)
                    }
                    _ => None,
                };
                match sealed {
                    Some(field) => *child = Value::String(open(&field)?),
                    None => open_fields(child, names, open)?,
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                open_fields(item, names, open)?;
            }
            Ok(())
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
    }
}
