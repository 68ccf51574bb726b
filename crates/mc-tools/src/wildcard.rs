//! `dir/pattern` wildcards as accepted by `makersp`.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

/// Match `name` against a pattern where `*` is any run of characters and
/// `?` is exactly one. `*.*` matches every name, dotted or not.
pub fn matches(pattern: &str, name: &str) -> bool {
    if pattern == "*.*" {
        return true;
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    // Last `*` seen and the name position it currently stands for.
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p).copied() {
            Some('*') => {
                star = Some((p, n));
                p += 1;
            }
            Some(c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match star {
                Some((star_p, star_n)) => {
                    p = star_p + 1;
                    n = star_n + 1;
                    star = Some((star_p, star_n + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// A wildcard split into its directory part (with trailing `/`, possibly
/// empty) and the file name pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wildcard {
    dir: String,
    pattern: String,
}

impl Wildcard {
    /// Split at the last separator. Backslashes count as separators.
    pub fn parse(text: &str) -> Self {
        let text = text.replace('\\', "/");
        match text.rfind('/') {
            Some(split) => Self {
                dir: text[..=split].to_string(),
                pattern: text[split + 1..].to_string(),
            },
            None => Self {
                dir: String::new(),
                pattern: text,
            },
        }
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// List the regular files in `base/dir` whose names match, as
    /// `dir/name` strings in sorted order. Subdirectories are not searched
    /// and a missing directory matches nothing.
    pub fn expand(&self, base: &Path) -> io::Result<Vec<String>> {
        let dir = base.join(&self.dir);
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut found = Vec::new();
        for entry in listing {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!("Skipping non UTF-8 file name in {}", dir.display());
                continue;
            };
            if matches(&self.pattern, &name) {
                found.push(format!("{}{}", self.dir, name));
            }
        }
        found.sort();
        Ok(found)
    }
}

impl fmt::Display for Wildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dir, self.pattern)
    }
}
