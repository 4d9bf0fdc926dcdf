//! Access-control store
//!
//! Per-class ACL row-sets and the global allow/reject lists, with the dirty
//! flags that decide what a persist has to write.

use crate::acl::{
    AllowEntry, ClassAcl, RejectEntry, ALLOW_ENTRY_LEN, CLASS_IMAGE_LEN,
    REJECT_ENTRY_LEN,
};
use drawbridge_common::{DrawbridgeError, PolicyClass, MAX_CLASSES};

/// Rows in the allow table
pub const MAX_ALLOW_ENTRIES: usize = 32;

/// Rows in the reject table
pub const MAX_REJECT_ENTRIES: usize = 256;

/// Bytes in the allow table image
pub const ALLOW_IMAGE_LEN: usize = MAX_ALLOW_ENTRIES * ALLOW_ENTRY_LEN;

/// Bytes in the reject table image
pub const REJECT_IMAGE_LEN: usize = MAX_REJECT_ENTRIES * REJECT_ENTRY_LEN;

/// Bytes in the concatenated image of every class
pub const CLASSES_IMAGE_LEN: usize = MAX_CLASSES * CLASS_IMAGE_LEN;

/// Tables held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclTable {
    /// Reject list
    Reject,
    /// Allow list
    Allow,
    /// All class row-sets
    Classes,
}

/// ACL tables
pub struct AccessControlStore {
    classes: Vec<ClassAcl>,
    allow: Vec<AllowEntry>,
    reject: Vec<RejectEntry>,
    dirty_classes: bool,
    dirty_allow: bool,
    dirty_reject: bool,
}

impl AccessControlStore {
    /// Create store holding the compiled-in defaults
    pub fn new() -> Self {
        Self {
            classes: vec![ClassAcl::default(); MAX_CLASSES],
            allow: Vec::new(),
            reject: Vec::new(),
            dirty_classes: false,
            dirty_allow: false,
            dirty_reject: false,
        }
    }

    /// Row-sets for a class
    #[inline(always)]
    pub fn class(&self, class: PolicyClass) -> &ClassAcl {
        &self.classes[class as usize]
    }

    /// Allow list in scan order
    #[inline(always)]
    pub fn allow(&self) -> &[AllowEntry] {
        &self.allow
    }

    /// Reject list in scan order
    #[inline(always)]
    pub fn reject(&self) -> &[RejectEntry] {
        &self.reject
    }

    /// Replace the four row-sets of one class
    pub fn replace_class(&mut self, class: PolicyClass, acl: ClassAcl) {
        self.classes[class as usize] = acl;
        self.dirty_classes = true;
    }

    /// Replace the allow list
    pub fn replace_allow(&mut self, entries: Vec<AllowEntry>) {
        self.allow = entries;
        self.dirty_allow = true;
    }

    /// Replace the reject list
    pub fn replace_reject(&mut self, entries: Vec<RejectEntry>) {
        self.reject = entries;
        self.dirty_reject = true;
    }

    /// Restore a table to its compiled-in default.
    ///
    /// The caller also removes the persisted copy, so the table ends clean.
    pub fn reset(&mut self, table: AclTable) {
        match table {
            AclTable::Classes => self.classes = vec![ClassAcl::default(); MAX_CLASSES],
            AclTable::Allow => self.allow.clear(),
            AclTable::Reject => self.reject.clear(),
        }
        self.set_dirty(table, false);
    }

    /// Whether a table changed since it was last persisted
    pub fn is_dirty(&self, table: AclTable) -> bool {
        match table {
            AclTable::Classes => self.dirty_classes,
            AclTable::Allow => self.dirty_allow,
            AclTable::Reject => self.dirty_reject,
        }
    }

    /// Set or clear a dirty flag
    pub fn set_dirty(&mut self, table: AclTable, dirty: bool) {
        match table {
            AclTable::Classes => self.dirty_classes = dirty,
            AclTable::Allow => self.dirty_allow = dirty,
            AclTable::Reject => self.dirty_reject = dirty,
        }
    }

    // ========================================================================
    // Images
    // ========================================================================

    /// Fixed-size image of a table
    pub fn encode(&self, table: AclTable) -> Vec<u8> {
        match table {
            AclTable::Classes => {
                let mut buf = Vec::with_capacity(CLASSES_IMAGE_LEN);
                for acl in &self.classes {
                    acl.encode(&mut buf);
                }
                buf
            }
            AclTable::Allow => {
                let mut buf = Vec::with_capacity(ALLOW_IMAGE_LEN);
                for entry in self.allow.iter().take(MAX_ALLOW_ENTRIES) {
                    entry.encode(&mut buf);
                }
                buf.resize(ALLOW_IMAGE_LEN, 0);
                buf
            }
            AclTable::Reject => {
                let mut buf = Vec::with_capacity(REJECT_IMAGE_LEN);
                for entry in self.reject.iter().take(MAX_REJECT_ENTRIES) {
                    entry.encode(&mut buf);
                }
                buf.resize(REJECT_IMAGE_LEN, 0);
                buf
            }
        }
    }

    /// Image of a single class
    pub fn encode_class(&self, class: PolicyClass) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CLASS_IMAGE_LEN);
        self.class(class).encode(&mut buf);
        buf
    }

    /// Install a whole table from its image.
    ///
    /// Loaded tables match their persisted copy, so they start clean.
    pub fn install_image(&mut self, table: AclTable, image: &[u8]) -> Result<(), DrawbridgeError> {
        match table {
            AclTable::Classes => {
                check_len("class", image, CLASSES_IMAGE_LEN)?;
                let mut buf = image;
                let mut classes = Vec::with_capacity(MAX_CLASSES);
                for _ in 0..MAX_CLASSES {
                    classes.push(ClassAcl::decode(&mut buf)?);
                }
                self.classes = classes;
            }
            AclTable::Allow => self.allow = decode_allow(image)?,
            AclTable::Reject => self.reject = decode_reject(image)?,
        }
        self.set_dirty(table, false);
        Ok(())
    }
}

impl Default for AccessControlStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_len(what: &str, image: &[u8], expected: usize) -> Result<(), DrawbridgeError> {
    if image.len() != expected {
        return Err(DrawbridgeError::MalformedTable(format!(
            "{} image is {} bytes, expected {}",
            what,
            image.len(),
            expected
        )));
    }
    Ok(())
}

/// Decode an allow table image, stopping at the zero-network row
pub fn decode_allow(image: &[u8]) -> Result<Vec<AllowEntry>, DrawbridgeError> {
    check_len("allow", image, ALLOW_IMAGE_LEN)?;
    let mut buf = image;
    let mut entries = Vec::new();
    for _ in 0..MAX_ALLOW_ENTRIES {
        let entry = AllowEntry::decode(&mut buf)?;
        if entry.network == 0 {
            break;
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Decode a reject table image, stopping at the zero-network row
pub fn decode_reject(image: &[u8]) -> Result<Vec<RejectEntry>, DrawbridgeError> {
    check_len("reject", image, REJECT_IMAGE_LEN)?;
    let mut buf = image;
    let mut entries = Vec::new();
    for _ in 0..MAX_REJECT_ENTRIES {
        let entry = RejectEntry::decode(&mut buf)?;
        if entry.network == 0 {
            break;
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Decode a single class image
pub fn decode_class(image: &[u8]) -> Result<ClassAcl, DrawbridgeError> {
    check_len("class", image, CLASS_IMAGE_LEN)?;
    ClassAcl::decode(&mut &image[..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::PortRangeList;

    #[test]
    fn test_defaults_are_permissive_and_clean() {
        let store = AccessControlStore::new();
        assert!(store.class(0).inbound.check_port(22));
        assert!(store.class(255).udp.check_port(53));
        assert_eq!(store.class(7), &ClassAcl::default());
        assert!(store.allow().is_empty());
        assert!(store.reject().is_empty());
        assert!(!store.is_dirty(AclTable::Classes));
    }

    #[test]
    fn test_replace_marks_dirty_and_reset_cleans() {
        let mut store = AccessControlStore::new();
        let acl = ClassAcl {
            inbound: PortRangeList::from_ranges(&[(25, 25)]),
            ..ClassAcl::default()
        };
        store.replace_class(3, acl.clone());
        assert!(store.is_dirty(AclTable::Classes));
        assert_eq!(store.class(3), &acl);

        store.reset(AclTable::Classes);
        assert!(!store.is_dirty(AclTable::Classes));
        assert_eq!(store.class(3), &ClassAcl::default());
    }

    #[test]
    fn test_table_images() {
        let mut store = AccessControlStore::new();
        store.replace_reject(vec![RejectEntry { network: 0x8C00_0000, mask: 0xFF00_0000 }]);
        store.replace_allow(vec![AllowEntry {
            network: 0xC0A8_0100,
            mask: 0xFFFF_FF00,
            ranges: PortRangeList::from_ranges(&[(6000, 6010)]),
        }]);

        let reject = store.encode(AclTable::Reject);
        let allow = store.encode(AclTable::Allow);
        let classes = store.encode(AclTable::Classes);
        assert_eq!(reject.len(), REJECT_IMAGE_LEN);
        assert_eq!(allow.len(), ALLOW_IMAGE_LEN);
        assert_eq!(classes.len(), CLASSES_IMAGE_LEN);

        let mut other = AccessControlStore::new();
        other.install_image(AclTable::Reject, &reject).unwrap();
        other.install_image(AclTable::Allow, &allow).unwrap();
        other.install_image(AclTable::Classes, &classes).unwrap();
        assert_eq!(other.reject(), store.reject());
        assert_eq!(other.allow(), store.allow());
        assert!(!other.is_dirty(AclTable::Allow));
    }

    #[test]
    fn test_wrong_image_length() {
        let mut store = AccessControlStore::new();
        assert!(store.install_image(AclTable::Reject, &[0u8; 12]).is_err());
        assert!(decode_class(&[0u8; 4]).is_err());
    }
}
