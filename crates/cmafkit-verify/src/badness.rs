//! Conformance failure categories.

use bitflags::bitflags;

bitflags! {
    /// Independent failure categories found for one asset. Empty means the
    /// asset is conformant. The bit values double as the process exit code.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Badness: u8 {
        /// Index durations, sizes or start time disagree with the fragments.
        const SIDX = 0x01;
        /// Representations of one adaptation set are cut differently.
        const ALIGNMENT = 0x02;
        const MANIFEST = 0x04;
        const NONZERO_FIRST_TIME = 0x08;
        /// A `tfdt` does not continue the previous fragment.
        const NON_CONSISTENT_TFDT_TIMELINE = 0x10;
        const OTHER = 0x80;
    }
}

const DESCRIPTIONS: [(Badness, &str); 6] = [
    (Badness::SIDX, "sidx mismatch"),
    (Badness::ALIGNMENT, "representation misalignment"),
    (Badness::MANIFEST, "bad manifest"),
    (Badness::NONZERO_FIRST_TIME, "first decode time is not 0"),
    (Badness::NON_CONSISTENT_TFDT_TIMELINE, "tfdt decode timeline not consistent"),
    (Badness::OTHER, "other problem"),
];

impl Badness {
    /// Comma-separated category names, e.g. `"sidx mismatch, bad manifest"`.
    pub fn describe(&self) -> String {
        DESCRIPTIONS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, text)| *text)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for Badness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("ok")
        } else {
            f.write_str(&self.describe())
        }
    }
}
