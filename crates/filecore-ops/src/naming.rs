//! Collision-safe target naming: "name (copy)", "name (copy 2)", ...

use filecore_core::EngineConfig;

/// Picks target names that do not collide with an existing listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameResolver {
    /// " (copy)"
    first_copy: String,
    /// " (copy "
    left: String,
    /// ")"
    right: String,
    prefix: Option<String>,
}

impl NameResolver {
    /// A resolver producing " (<copy_word>)" / " (<copy_word> N)" suffixes.
    pub fn new(copy_word: &str) -> Self {
        Self {
            first_copy: format!(" ({copy_word})"),
            left: format!(" ({copy_word} "),
            right: ")".to_string(),
            prefix: None,
        }
    }

    /// Prepend `prefix` to every name that does not already start with it.
    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.copy_word).with_prefix(config.target_prefix.clone())
    }

    /// `name` with the configured prefix applied.
    pub fn prefixed(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) if !name.starts_with(prefix.as_str()) => format!("{prefix}{name}"),
            _ => name.to_string(),
        }
    }

    /// A name for `candidate` that is not in `existing`.
    ///
    /// Unchanged (apart from the prefix) when there is no collision. Otherwise
    /// the copy suffix is stripped to recover the original name, and the next
    /// copy index above every copy already present is used.
    pub fn resolve<S: AsRef<str>>(&self, candidate: &str, existing: &[S]) -> String {
        let full = self.prefixed(candidate);
        if !existing.iter().any(|name| name.as_ref() == full) {
            return full;
        }

        let (name, extension) = split_extension(&full);
        let base = self.original_base(name);
        let taken = |name: &str| existing.iter().any(|e| e.as_ref() == name);

        let resolved = self.compose(base, extension, self.next_index(base, extension, existing));
        if !taken(resolved.as_str()) {
            return resolved;
        }
        // The highest index is saturated; take the lowest free one instead.
        (1..=u64::MAX)
            .map(|index| self.compose(base, extension, index))
            .find(|name| !taken(name.as_str()))
            .unwrap_or(resolved)
    }

    fn compose(&self, base: &str, extension: &str, index: u64) -> String {
        let suffix = if index == 1 {
            self.first_copy.clone()
        } else {
            format!("{}{index}{}", self.left, self.right)
        };
        if extension.is_empty() {
            format!("{base}{suffix}")
        } else {
            format!("{base}{suffix}.{extension}")
        }
    }

    /// Strip a trailing " (copy)" or " (copy N)" from `name`.
    fn original_base<'a>(&self, name: &'a str) -> &'a str {
        if let Some(base) = name.strip_suffix(self.first_copy.as_str()) {
            return base;
        }
        if name.ends_with(self.right.as_str()) {
            if let Some(pos) = name.rfind(self.left.as_str()) {
                return &name[..pos];
            }
        }
        name
    }

    /// Copy index of `name` relative to `base`: 1 for " (copy)", N for
    /// " (copy N)", 0 otherwise. Malformed indices, or ones past `u64`, count as 0.
    fn copy_index(&self, name: &str) -> u64 {
        if name.ends_with(self.first_copy.as_str()) {
            return 1;
        }
        let Some(without_right) = name.strip_suffix(self.right.as_str()) else {
            return 0;
        };
        let Some(pos) = without_right.rfind(self.left.as_str()) else {
            return 0;
        };
        without_right[pos + self.left.len()..]
            .parse::<u64>()
            .unwrap_or(0)
    }

    fn next_index<S: AsRef<str>>(&self, base: &str, extension: &str, existing: &[S]) -> u64 {
        let max = existing
            .iter()
            .filter_map(|entry| {
                let (name, ext) = split_extension(entry.as_ref());
                (ext == extension && name.starts_with(base)).then(|| self.copy_index(name))
            })
            .max()
            .unwrap_or(0);
        max.saturating_add(1)
    }
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::new("copy")
    }
}

/// Split at the last `.`; the extension is empty when there is no dot.
fn split_extension(full: &str) -> (&str, &str) {
    match full.rfind('.') {
        Some(pos) => (&full[..pos], &full[pos + 1..]),
        None => (full, ""),
    }
}

/// Names present in one destination directory, plus the names claimed for
/// earlier sources of the same batch.
#[derive(Debug, Clone, Default)]
pub struct DirectoryNames {
    names: Vec<String>,
}

impl DirectoryNames {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve a collision-free name for `candidate` and reserve it.
    pub fn claim(&mut self, resolver: &NameResolver, candidate: &str) -> String {
        let name = resolver.resolve(candidate, &self.names);
        self.names.push(name.clone());
        name
    }

    /// Reserve `name` as-is (overwrite mode).
    pub fn claim_literal(&mut self, resolver: &NameResolver, candidate: &str) -> String {
        let name = resolver.prefixed(candidate);
        if !self.names.contains(&name) {
            self.names.push(name.clone());
        }
        name
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(candidate: &str, existing: &[&str]) -> String {
        NameResolver::default().resolve(candidate, existing)
    }

    #[test]
    fn test_no_collision_is_unchanged() {
        assert_eq!(resolve("a.txt", &["b.txt"]), "a.txt");
        assert_eq!(resolve("a.txt", &[]), "a.txt");
    }

    #[test]
    fn test_first_and_next_copies() {
        assert_eq!(resolve("a.txt", &["a.txt"]), "a (copy).txt");
        assert_eq!(
            resolve("a.txt", &["a.txt", "a (copy).txt", "a (copy 2).txt"]),
            "a (copy 3).txt"
        );
    }

    #[test]
    fn test_copying_a_copy_uses_original_base() {
        assert_eq!(
            resolve("a (copy).txt", &["a.txt", "a (copy).txt", "a (copy 2).txt"]),
            "a (copy 3).txt"
        );
        assert_eq!(
            resolve("a (copy 2).txt", &["a.txt", "a (copy 2).txt"]),
            "a (copy 3).txt"
        );
    }

    #[test]
    fn test_gaps_are_not_filled() {
        assert_eq!(resolve("a.txt", &["a.txt", "a (copy 7).txt"]), "a (copy 8).txt");
    }

    #[test]
    fn test_other_extensions_are_ignored() {
        assert_eq!(resolve("a.txt", &["a.txt", "a (copy 4).mp4"]), "a (copy).txt");
    }

    #[test]
    fn test_no_extension() {
        assert_eq!(resolve("Alarm", &["Alarm"]), "Alarm (copy)");
        assert_eq!(
            resolve("Alarm (copy)", &["Alarm", "Alarm (copy)"]),
            "Alarm (copy 2)"
        );
    }

    #[test]
    fn test_malformed_index_is_skipped() {
        assert_eq!(
            resolve(
                "a.txt",
                &["a.txt", "a (copy x).txt", "a (copy 99999999999999999999999).txt"]
            ),
            "a (copy).txt"
        );
    }

    #[test]
    fn test_indices_past_u32_keep_counting() {
        let resolver = NameResolver::default();
        let mut names = DirectoryNames::new(["a.txt", "a (copy 4294967295).txt"]);
        assert_eq!(names.claim(&resolver, "a.txt"), "a (copy 4294967296).txt");
        assert_eq!(names.claim(&resolver, "a.txt"), "a (copy 4294967297).txt");
    }

    #[test]
    fn test_saturated_index_falls_back_to_a_free_one() {
        let resolver = NameResolver::default();
        let max = format!("a (copy {}).txt", u64::MAX);
        let mut names = DirectoryNames::new(["a.txt".to_string(), max]);
        assert_eq!(names.claim(&resolver, "a.txt"), "a (copy).txt");
        assert_eq!(names.claim(&resolver, "a.txt"), "a (copy 2).txt");
        assert_eq!(names.claim(&resolver, "a.txt"), "a (copy 3).txt");
    }

    #[test]
    fn test_custom_copy_word_and_prefix() {
        let resolver = NameResolver::new("Kopie").with_prefix(Some("bak_".into()));
        assert_eq!(resolver.resolve("a.txt", &["a.txt"]), "bak_a.txt");
        assert_eq!(resolver.resolve("a.txt", &["bak_a.txt"]), "bak_a (Kopie).txt");
        assert_eq!(resolver.resolve("bak_a.txt", &["x"]), "bak_a.txt");
    }

    #[test]
    fn test_batch_siblings_get_distinct_names() {
        let resolver = NameResolver::default();
        let mut names = DirectoryNames::new(["Alarm", "Alarm (copy)"]);
        assert_eq!(names.claim(&resolver, "Alarm"), "Alarm (copy 2)");
        assert_eq!(names.claim(&resolver, "Alarm (copy)"), "Alarm (copy 3)");
        assert_eq!(names.claim(&resolver, "Other"), "Other");
        assert_eq!(names.claim(&resolver, "Other"), "Other (copy)");
        assert!(names.contains("Alarm (copy 3)"));
    }
}
