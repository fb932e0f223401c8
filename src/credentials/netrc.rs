//! Reader for `~/.netrc` style credential files
//!
//! Only the `machine`, `default`, `login`, `password` and `account` keywords
//! are interpreted. `macdef` bodies are skipped up to the next blank line.

use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum NetrcError {
    #[error("Failed to read credentials file: {0}")]
    ReadError(#[from] io::Error),
}

/// One `machine` (or `default`) block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetrcEntry {
    pub login: Option<String>,
    pub password: Option<String>,
    pub account: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Netrc {
    machines: Vec<(String, NetrcEntry)>,
    default: Option<NetrcEntry>,
}

impl Netrc {
    /// Read a credentials file, tightening its permissions first
    ///
    /// A missing file yields an empty `Netrc`.
    pub fn load(path: &Path) -> Result<Self, NetrcError> {
        if !path.exists() {
            debug!("No credentials file at {}", path.display());
            return Ok(Self::default());
        }

        restrict_permissions(path)?;
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut netrc = Netrc::default();
        let mut current: Option<(Option<String>, NetrcEntry)> = None;
        let mut tokens = Tokens::new(content);

        while let Some(token) = tokens.next() {
            match token.as_str() {
                "machine" => {
                    netrc.push(current.take());
                    let name = tokens.next().unwrap_or_default();
                    current = Some((Some(name), NetrcEntry::default()));
                }
                "default" => {
                    netrc.push(current.take());
                    current = Some((None, NetrcEntry::default()));
                }
                "login" | "password" | "account" => {
                    let value = tokens.next();
                    if let Some((_, entry)) = current.as_mut() {
                        match token.as_str() {
                            "login" => entry.login = value,
                            "password" => entry.password = value,
                            _ => entry.account = value,
                        }
                    }
                }
                "macdef" => {
                    tokens.next();
                    tokens.skip_macro();
                }
                other => debug!("Ignoring unknown netrc token '{}'", other),
            }
        }
        netrc.push(current);

        netrc
    }

    fn push(&mut self, block: Option<(Option<String>, NetrcEntry)>) {
        match block {
            Some((Some(machine), entry)) => self.machines.push((machine, entry)),
            Some((None, entry)) => self.default = Some(entry),
            None => {}
        }
    }

    /// Entry for `machine`, falling back to the `default` block
    pub fn entry(&self, machine: &str) -> Option<&NetrcEntry> {
        self.machines
            .iter()
            .find(|(name, _)| name == machine)
            .map(|(_, entry)| entry)
            .or(self.default.as_ref())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode();
    if mode & 0o077 != 0 {
        info!(
            "Restricting permissions of {} from {:o} to 600",
            path.display(),
            mode & 0o777
        );
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Whitespace separated tokens with double-quote support
struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(content: &'a str) -> Self {
        Self { rest: content }
    }

    /// Skip a macro body, which ends at the first empty line
    fn skip_macro(&mut self) {
        match self.rest.find("\n\n") {
            Some(end) => self.rest = &self.rest[end + 2..],
            None => self.rest = "",
        }
    }
}

impl<'a> Tokens<'a> {
    /// Read a quoted token up to the closing quote; `\` escapes the next char
    fn quoted(&mut self, body: &'a str) -> String {
        let mut token = String::new();
        let mut chars = body.char_indices();
        let mut rest = "";

        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    rest = &body[i + 1..];
                    break;
                }
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        token.push(escaped);
                    }
                }
                c => token.push(c),
            }
        }

        self.rest = rest;
        token
    }
}

impl Iterator for Tokens<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            self.rest = self.rest.trim_start();
            // Comments run to end of line
            if self.rest.starts_with('#') {
                let end = self.rest.find('\n').unwrap_or(self.rest.len());
                self.rest = &self.rest[end..];
                continue;
            }
            break;
        }

        if self.rest.is_empty() {
            return None;
        }

        if let Some(quoted) = self.rest.strip_prefix('"') {
            return Some(self.quoted(quoted));
        }

        let end = self
            .rest
            .find(char::is_whitespace)
            .unwrap_or(self.rest.len());
        let token = self.rest[..end].to_string();
        self.rest = &self.rest[end..];
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_single_line() {
        let netrc = Netrc::parse("machine remote.ucsf.edu login alice password secret\n");
        let entry = netrc.entry("remote.ucsf.edu").unwrap();
        assert_eq!(entry.login.as_deref(), Some("alice"));
        assert_eq!(entry.password.as_deref(), Some("secret"));
        assert_eq!(entry.account, None);
    }

    #[test]
    fn test_parse_multiple_machines() {
        let content = "\
machine github.com
  login bob
  password gh-token

machine remote.ucsf.edu
  login alice
  password \"two words\"
  account push
";
        let netrc = Netrc::parse(content);

        let entry = netrc.entry("remote.ucsf.edu").unwrap();
        assert_eq!(entry.login.as_deref(), Some("alice"));
        assert_eq!(entry.password.as_deref(), Some("two words"));
        assert_eq!(entry.account.as_deref(), Some("push"));

        let entry = netrc.entry("github.com").unwrap();
        assert_eq!(entry.login.as_deref(), Some("bob"));
    }

    #[test]
    fn test_quoted_tokens_with_escapes() {
        let netrc = Netrc::parse(
            r#"machine remote.ucsf.edu login "alice smith" password "pa\"ss\\word" account push"#,
        );
        let entry = netrc.entry("remote.ucsf.edu").unwrap();
        assert_eq!(entry.login.as_deref(), Some("alice smith"));
        assert_eq!(entry.password.as_deref(), Some(r#"pa"ss\word"#));
        assert_eq!(entry.account.as_deref(), Some("push"));
    }

    #[test]
    fn test_default_fallback() {
        let netrc = Netrc::parse("machine a.example login a\ndefault login anon password guest\n");
        assert_eq!(
            netrc.entry("b.example").unwrap().login.as_deref(),
            Some("anon")
        );
        assert_eq!(netrc.entry("a.example").unwrap().login.as_deref(), Some("a"));
    }

    #[test]
    fn test_no_match() {
        let netrc = Netrc::parse("machine a.example login a\n");
        assert!(netrc.entry("remote.ucsf.edu").is_none());
    }

    #[test]
    fn test_comments_and_macdef_skipped() {
        let content = "\
# personal credentials
macdef init
login ignored
password ignored

machine remote.ucsf.edu login alice password secret
";
        let netrc = Netrc::parse(content);
        let entry = netrc.entry("remote.ucsf.edu").unwrap();
        assert_eq!(entry.login.as_deref(), Some("alice"));
        assert_eq!(entry.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let netrc = Netrc::load(&temp_dir.path().join("missing")).unwrap();
        assert!(netrc.entry("remote.ucsf.edu").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_load_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".netrc");
        fs::write(&path, "machine remote.ucsf.edu login alice password secret\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let netrc = Netrc::load(&path).unwrap();
        assert!(netrc.entry("remote.ucsf.edu").is_some());

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
