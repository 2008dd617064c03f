use relative_path::{RelativePath, RelativePathBuf};
use std::path::Path;

/* 📖 # Why a relative FilePath for configuration files?

Settings are always looked up relative to the directory the service was started in
(`exposer.toml` next to the deployment). Keeping the path relative makes the same lookup
work against RealPal (resolved under its base directory) and MockPal (a plain map key).
*/

/// Path of a file relative to the PAL's base directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilePath(RelativePathBuf);

impl FilePath {
    pub fn as_relative(&self) -> &RelativePath {
        &self.0
    }

    /// The relative path as a std Path, without any base directory.
    pub fn as_path(&self) -> &Path {
        Path::new(self.0.as_str())
    }
}

impl From<&str> for FilePath {
    fn from(s: &str) -> Self {
        Self(RelativePathBuf::from(s))
    }
}

impl From<String> for FilePath {
    fn from(s: String) -> Self {
        Self(RelativePathBuf::from(s))
    }
}

impl std::fmt::Display for FilePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_path_from_str() {
        let path = FilePath::from("conf/exposer.toml");
        assert_eq!(path.as_path(), Path::new("conf/exposer.toml"));
        assert_eq!(path.to_string(), "conf/exposer.toml");
    }

    #[test]
    fn test_file_path_hash_and_equality() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(FilePath::from("exposer.toml"));
        assert!(set.contains(&FilePath::from(String::from("exposer.toml"))));
        assert!(!set.contains(&FilePath::from("other.toml")));
    }
}
