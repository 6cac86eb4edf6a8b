// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PARTITION QoS policy (DDS v1.4 Sec.2.2.3.13)
//!
//! Writers and readers communicate only if their partitions intersect.
//! An empty list is the default partition `""`. Names may contain
//! fnmatch-style wildcards (`*`, `?`, `[...]`) on either side.
//!
//! - Writer `["sensor"]`, Reader `["sensor"]` -> compatible
//! - Writer `["sensor"]`, Reader `["actuator"]` -> incompatible
//! - Writer `[]`, Reader `[]` -> compatible (default partition)
//! - Writer `["robot/*"]`, Reader `["robot/7"]` -> compatible

/// PARTITION QoS policy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Partition {
    /// Partition names; empty = default partition.
    pub names: Vec<String>,
}

impl Partition {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn single(name: &str) -> Self {
        Self {
            names: vec![name.to_string()],
        }
    }

    pub fn is_default(&self) -> bool {
        self.names.is_empty() || self.names.iter().all(|n| n.is_empty())
    }

    fn effective(&self) -> Vec<&str> {
        if self.names.is_empty() {
            vec![""]
        } else {
            self.names.iter().map(String::as_str).collect()
        }
    }

    /// True if at least one name of `self` matches one name of `other`.
    pub fn is_compatible_with(&self, other: &Partition) -> bool {
        let mine = self.effective();
        let theirs = other.effective();
        mine.iter().any(|a| {
            theirs
                .iter()
                .any(|b| a == b || wildcard_match(a, b) || wildcard_match(b, a))
        })
    }
}

/// fnmatch-style match of `name` against `pattern`.
///
/// Supports `*` (any run), `?` (one char) and `[...]` classes with ranges and
/// `!` negation. A malformed class matches nothing.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    match_from(&p, &n)
}

fn match_from(p: &[char], n: &[char]) -> bool {
    let (mut pi, mut ni) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ni));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ni += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(&p[pi..], n[ni]) {
                        if matched {
                            pi += next;
                            ni += 1;
                            continue;
                        }
                    } else {
                        return false;
                    }
                }
                c if c == n[ni] => {
                    pi += 1;
                    ni += 1;
                    continue;
                }
                _ => {}
            }
        }
        // Mismatch: backtrack to last star, consuming one more char.
        match star {
            Some((sp, sn)) => {
                pi = sp + 1;
                ni = sn + 1;
                star = Some((sp, sn + 1));
            }
            None => return false,
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Returns (matched, pattern chars consumed) or None if the class is unterminated.
fn match_class(p: &[char], c: char) -> Option<(bool, usize)> {
    let mut i = 1;
    let negate = matches!(p.get(i), Some('!'));
    if negate {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < p.len() {
        if p[i] == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;
        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            if p[i] <= c && c <= p[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if p[i] == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_partitions_match() {
        assert!(Partition::default().is_compatible_with(&Partition::default()));
        assert!(Partition::default().is_default());
    }

    #[test]
    fn test_named_vs_default() {
        assert!(!Partition::single("sensor").is_compatible_with(&Partition::default()));
    }

    #[test]
    fn test_intersection() {
        let w = Partition::new(vec!["sensor".into(), "actuator".into()]);
        let r = Partition::single("actuator");
        assert!(w.is_compatible_with(&r));
        assert!(!Partition::single("a").is_compatible_with(&Partition::single("b")));
    }

    #[test]
    fn test_wildcards_either_side() {
        assert!(Partition::single("robot/*").is_compatible_with(&Partition::single("robot/7")));
        assert!(Partition::single("robot/7").is_compatible_with(&Partition::single("robot/*")));
        assert!(!Partition::single("robot/*").is_compatible_with(&Partition::single("drone/1")));
    }

    #[test]
    fn test_wildcard_match_grammar() {
        assert!(wildcard_match("a?c", "abc"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("a*b*c", "aXXbYc"));
        assert!(!wildcard_match("a*b", "aXXc"));
        assert!(wildcard_match("[a-c]1", "b1"));
        assert!(!wildcard_match("[!a-c]1", "b1"));
        assert!(wildcard_match("[!a-c]1", "z1"));
        assert!(!wildcard_match("[abc", "a"));
    }
}
