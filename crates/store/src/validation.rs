use std::path::{Component, Path};

use crate::StoreError;

/// Validates an object key before it is used as a store path.
///
/// Keys are `/`-separated and relative. Rejects:
/// - Empty keys and keys ending in `/`
/// - Leading `/` or Windows prefixes (`C:`, `\\server`)
/// - Parent directory segments (`..`)
pub fn validate_object_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("empty key".into()));
    }
    if key.ends_with('/') {
        return Err(StoreError::InvalidKey(format!("key names a folder: {key}")));
    }

    for component in Path::new(key).components() {
        match component {
            Component::ParentDir => {
                return Err(StoreError::InvalidKey(format!(
                    "parent directory segment not allowed: {key}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(StoreError::InvalidKey(format!(
                    "absolute key not allowed: {key}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_key() {
        assert!(validate_object_key("").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_object_key("../etc/passwd").is_err());
        assert!(validate_object_key("renders/../../escape").is_err());
    }

    #[test]
    fn rejects_absolute_key() {
        assert!(validate_object_key("/renders/frame.exr").is_err());
    }

    #[test]
    fn rejects_folder_key() {
        assert!(validate_object_key("renders/").is_err());
    }

    #[test]
    fn accepts_nested_key() {
        assert!(validate_object_key("job-42/frames/0001.exr").is_ok());
        assert!(validate_object_key(".hidden/scene.blend").is_ok());
    }
}
