use super::FileDescriptor;

/// Decides whether a source file has to be (re-)copied.
///
/// The check is ordered cheapest first: presence, then size, then
/// timestamp. Hashes only matter once timestamps disagree, so callers can
/// defer reading file contents until a stat comparison is inconclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector {
    use_hash_comparison: bool,
}

impl ChangeDetector {
    pub fn new(use_hash_comparison: bool) -> Self {
        Self { use_hash_comparison }
    }

    pub fn uses_hashes(&self) -> bool {
        self.use_hash_comparison
    }

    pub fn should_backup(&self, source: &FileDescriptor, backup: Option<&FileDescriptor>) -> bool {
        let Some(backup) = backup else {
            return true;
        };

        if source.size != backup.size {
            return true;
        }

        if source.modified_at_millis != backup.modified_at_millis {
            if self.use_hash_comparison {
                if let (Some(src_hash), Some(bak_hash)) = (&source.hash, &backup.hash) {
                    return src_hash != bak_hash;
                }
            }
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::ContentHash;
    use proptest::prelude::*;

    fn desc(size: u64, mtime: i64, content: Option<&[u8]>) -> FileDescriptor {
        FileDescriptor {
            size,
            modified_at_millis: mtime,
            hash: content.map(ContentHash::from_bytes),
        }
    }

    #[test]
    fn missing_backup_is_new_file() {
        let detector = ChangeDetector::new(false);
        assert!(detector.should_backup(&desc(0, 0, None), None));
    }

    #[test]
    fn timestamp_change_without_hashes_copies() {
        let detector = ChangeDetector::new(true);
        assert!(detector.should_backup(&desc(10, 1, None), Some(&desc(10, 2, None))));
        assert!(detector.should_backup(&desc(10, 1, Some(b"x")), Some(&desc(10, 2, None))));
    }

    #[test]
    fn hashes_ignored_when_comparison_disabled() {
        let detector = ChangeDetector::new(false);
        assert!(detector.should_backup(
            &desc(10, 1, Some(b"x")),
            Some(&desc(10, 2, Some(b"x")))
        ));
    }

    #[test]
    fn differing_hash_copies() {
        let detector = ChangeDetector::new(true);
        assert!(detector.should_backup(
            &desc(10, 1, Some(b"x")),
            Some(&desc(10, 2, Some(b"y")))
        ));
    }

    proptest! {
        #[test]
        fn absent_backup_always_copies(size in any::<u64>(), mtime in any::<i64>(), hashing in any::<bool>()) {
            prop_assert!(ChangeDetector::new(hashing).should_backup(&desc(size, mtime, None), None));
        }

        #[test]
        fn equal_stat_never_copies(
            size in any::<u64>(),
            mtime in any::<i64>(),
            hashing in any::<bool>(),
            a in proptest::option::of(any::<Vec<u8>>()),
            b in proptest::option::of(any::<Vec<u8>>()),
        ) {
            let source = desc(size, mtime, a.as_deref());
            let backup = desc(size, mtime, b.as_deref());
            prop_assert!(!ChangeDetector::new(hashing).should_backup(&source, Some(&backup)));
        }

        #[test]
        fn equal_hash_suppresses_timestamp_only_change(
            size in any::<u64>(),
            m1 in any::<i64>(),
            m2 in any::<i64>(),
            content in any::<Vec<u8>>(),
        ) {
            prop_assume!(m1 != m2);
            let source = desc(size, m1, Some(&content));
            let backup = desc(size, m2, Some(&content));
            prop_assert!(!ChangeDetector::new(true).should_backup(&source, Some(&backup)));
        }

        #[test]
        fn size_change_always_copies(
            s1 in any::<u64>(),
            s2 in any::<u64>(),
            m1 in any::<i64>(),
            m2 in any::<i64>(),
            hashing in any::<bool>(),
            content in any::<Vec<u8>>(),
        ) {
            prop_assume!(s1 != s2);
            let source = desc(s1, m1, Some(&content));
            let backup = desc(s2, m2, Some(&content));
            prop_assert!(ChangeDetector::new(hashing).should_backup(&source, Some(&backup)));
        }
    }
}
