//! Credential resolution
//!
//! Username, password and one-time token are each taken from the first of:
//!
//! 1. the command line (or `UCSF_VPN_TOKEN` for the token)
//! 2. the matching entry of the `~/.netrc` credentials file
//! 3. an interactive prompt (masked for password and token)

pub mod netrc;
pub mod token;

pub use netrc::{Netrc, NetrcEntry, NetrcError};

use crate::config::RunConfig;
use std::fmt;
use std::io::{self, BufRead, Write};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error(
        "Invalid token '{0}': expected 'push', 'phone[1-9]', 'sms[1-9]', 'text[1-9]', 'false', \
         a 6 or 7 digit code, or a 44 character YubiKey code"
    )]
    InvalidToken(String),
    #[error("No {0} provided")]
    Missing(&'static str),
    #[error("Prompt failed: {0}")]
    PromptError(#[from] io::Error),
    #[error(transparent)]
    Netrc(#[from] NetrcError),
}

/// Credentials for one connection attempt
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub token: String,
}

impl Credentials {
    /// False when the token disables the second factor
    pub fn has_second_factor(&self) -> bool {
        self.token != "false"
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Source of interactive answers
pub trait Prompter {
    fn prompt_line(&self, label: &str) -> io::Result<String>;
    fn prompt_secret(&self, label: &str) -> io::Result<String>;
}

/// Prompts on the controlling terminal
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt_line(&self, label: &str) -> io::Result<String> {
        eprint!("{}", label);
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }

    fn prompt_secret(&self, label: &str) -> io::Result<String> {
        rpassword::prompt_password(label).map(|s| s.trim().to_string())
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliCredentials {
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

pub struct CredentialResolver<'a> {
    cli: CliCredentials,
    netrc: Option<NetrcEntry>,
    prompter: &'a dyn Prompter,
}

impl<'a> CredentialResolver<'a> {
    pub fn new(cli: CliCredentials, netrc: Option<NetrcEntry>, prompter: &'a dyn Prompter) -> Self {
        Self {
            cli,
            netrc,
            prompter,
        }
    }

    /// Resolver for the configured server, reading `~/.netrc`
    pub fn from_config(config: &RunConfig, prompter: &'a dyn Prompter) -> Result<Self, CredentialError> {
        let netrc = Netrc::load(&config.netrc_path)?;
        let cli = CliCredentials {
            user: config.user.clone(),
            password: config.password.clone(),
            token: config.token.clone(),
        };
        Ok(Self::new(cli, netrc.entry(&config.server).cloned(), prompter))
    }

    pub fn resolve(&self) -> Result<Credentials, CredentialError> {
        let username = self.username()?;
        let password = self.password(&username)?;
        let token = self.token()?;

        debug!("Resolved credentials for {}", username);
        Ok(Credentials {
            username,
            password,
            token,
        })
    }

    fn username(&self) -> Result<String, CredentialError> {
        if let Some(user) = self.cli.user.as_ref().filter(|u| !u.is_empty()) {
            return Ok(user.clone());
        }
        if let Some(login) = self.netrc.as_ref().and_then(|e| e.login.clone()) {
            debug!("Using username from credentials file");
            return Ok(login);
        }

        let user = self.prompter.prompt_line("Username: ")?;
        if user.is_empty() {
            return Err(CredentialError::Missing("username"));
        }
        Ok(user)
    }

    fn password(&self, username: &str) -> Result<String, CredentialError> {
        if let Some(password) = &self.cli.password {
            return Ok(password.clone());
        }

        // A password stored for another login is not ours to use
        if let Some(entry) = &self.netrc {
            let same_user = entry.login.as_deref().is_none_or(|login| login == username);
            match (&entry.password, same_user) {
                (Some(password), true) => {
                    debug!("Using password from credentials file");
                    return Ok(password.clone());
                }
                (Some(_), false) => {
                    warn!("Credentials file password belongs to another login, ignoring it")
                }
                (None, _) => {}
            }
        }

        let password = self
            .prompter
            .prompt_secret(&format!("Password for {}: ", username))?;
        if password.is_empty() {
            return Err(CredentialError::Missing("password"));
        }
        Ok(password)
    }

    fn token(&self) -> Result<String, CredentialError> {
        let supplied = self
            .cli
            .token
            .clone()
            .or_else(|| self.netrc.as_ref().and_then(|e| e.account.clone()));

        if let Some(token) = supplied {
            return if token::is_valid(&token) {
                Ok(token)
            } else {
                Err(CredentialError::InvalidToken(token))
            };
        }

        loop {
            let answer = self.prompter.prompt_secret(
                "Enter 'push' (default), 'phone', 'sms', a 6 or 7 digit token, or press your YubiKey: ",
            )?;
            let answer = if answer.is_empty() {
                token::DEFAULT_TOKEN.to_string()
            } else {
                answer
            };
            if token::is_valid(&answer) {
                return Ok(answer);
            }
            eprintln!("{}", CredentialError::InvalidToken(answer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays canned answers and records which labels were asked
    #[derive(Default)]
    struct ScriptedPrompter {
        answers: RefCell<VecDeque<String>>,
        asked: RefCell<Vec<String>>,
    }

    impl ScriptedPrompter {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: RefCell::new(answers.iter().map(|s| s.to_string()).collect()),
                asked: RefCell::new(Vec::new()),
            }
        }

        fn next(&self, label: &str) -> io::Result<String> {
            self.asked.borrow_mut().push(label.to_string());
            self.answers
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no more answers"))
        }
    }

    impl Prompter for ScriptedPrompter {
        fn prompt_line(&self, label: &str) -> io::Result<String> {
            self.next(label)
        }

        fn prompt_secret(&self, label: &str) -> io::Result<String> {
            self.next(label)
        }
    }

    fn cli(user: Option<&str>, password: Option<&str>, token: Option<&str>) -> CliCredentials {
        CliCredentials {
            user: user.map(String::from),
            password: password.map(String::from),
            token: token.map(String::from),
        }
    }

    fn file_entry(login: Option<&str>, password: Option<&str>, account: Option<&str>) -> NetrcEntry {
        NetrcEntry {
            login: login.map(String::from),
            password: password.map(String::from),
            account: account.map(String::from),
        }
    }

    #[test]
    fn test_cli_values_win() {
        let prompter = ScriptedPrompter::default();
        let resolver = CredentialResolver::new(
            cli(Some("alice"), Some("cli-pwd"), Some("phone2")),
            Some(file_entry(Some("alice"), Some("file-pwd"), Some("sms"))),
            &prompter,
        );

        let creds = resolver.resolve().unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "cli-pwd");
        assert_eq!(creds.token, "phone2");
        assert!(prompter.asked.borrow().is_empty());
    }

    #[test]
    fn test_username_precedence() {
        let prompter = ScriptedPrompter::default();
        let resolver = CredentialResolver::new(
            cli(Some("alice"), Some("p"), Some("push")),
            Some(file_entry(Some("bob"), None, None)),
            &prompter,
        );
        assert_eq!(resolver.resolve().unwrap().username, "alice");

        let resolver = CredentialResolver::new(
            cli(None, Some("p"), Some("push")),
            Some(file_entry(Some("bob"), None, None)),
            &prompter,
        );
        assert_eq!(resolver.resolve().unwrap().username, "bob");

        let prompter = ScriptedPrompter::new(&["carol"]);
        let resolver = CredentialResolver::new(cli(None, Some("p"), Some("push")), None, &prompter);
        assert_eq!(resolver.resolve().unwrap().username, "carol");
        assert_eq!(prompter.asked.borrow().as_slice(), ["Username: "]);
    }

    #[test]
    fn test_password_precedence() {
        let prompter = ScriptedPrompter::default();
        let resolver = CredentialResolver::new(
            cli(Some("alice"), Some("cli-pwd"), Some("push")),
            Some(file_entry(Some("alice"), Some("file-pwd"), None)),
            &prompter,
        );
        assert_eq!(resolver.resolve().unwrap().password, "cli-pwd");

        let resolver = CredentialResolver::new(
            cli(Some("alice"), None, Some("push")),
            Some(file_entry(Some("alice"), Some("file-pwd"), None)),
            &prompter,
        );
        assert_eq!(resolver.resolve().unwrap().password, "file-pwd");

        let prompter = ScriptedPrompter::new(&["typed-pwd"]);
        let resolver =
            CredentialResolver::new(cli(Some("alice"), None, Some("push")), None, &prompter);
        assert_eq!(resolver.resolve().unwrap().password, "typed-pwd");
        assert_eq!(prompter.asked.borrow().as_slice(), ["Password for alice: "]);
    }

    #[test]
    fn test_file_password_for_other_login_ignored() {
        let prompter = ScriptedPrompter::new(&["typed-pwd"]);
        let resolver = CredentialResolver::new(
            cli(Some("alice"), None, Some("push")),
            Some(file_entry(Some("bob"), Some("bobs-pwd"), None)),
            &prompter,
        );
        assert_eq!(resolver.resolve().unwrap().password, "typed-pwd");
    }

    #[test]
    fn test_token_precedence() {
        let prompter = ScriptedPrompter::default();
        let resolver = CredentialResolver::new(
            cli(Some("a"), Some("p"), Some("123456")),
            Some(file_entry(None, None, Some("sms"))),
            &prompter,
        );
        assert_eq!(resolver.resolve().unwrap().token, "123456");

        let resolver = CredentialResolver::new(
            cli(Some("a"), Some("p"), None),
            Some(file_entry(None, None, Some("sms"))),
            &prompter,
        );
        assert_eq!(resolver.resolve().unwrap().token, "sms");

        let prompter = ScriptedPrompter::new(&["phone"]);
        let resolver = CredentialResolver::new(cli(Some("a"), Some("p"), None), None, &prompter);
        assert_eq!(resolver.resolve().unwrap().token, "phone");
    }

    #[test]
    fn test_token_prompt_reprompts_until_valid() {
        let prompter = ScriptedPrompter::new(&["nope", "12", "1234567"]);
        let resolver = CredentialResolver::new(cli(Some("a"), Some("p"), None), None, &prompter);
        assert_eq!(resolver.resolve().unwrap().token, "1234567");
        assert_eq!(prompter.asked.borrow().len(), 3);
    }

    #[test]
    fn test_token_prompt_empty_means_push() {
        let prompter = ScriptedPrompter::new(&[""]);
        let resolver = CredentialResolver::new(cli(Some("a"), Some("p"), None), None, &prompter);
        assert_eq!(resolver.resolve().unwrap().token, "push");
    }

    #[test]
    fn test_non_interactive_invalid_token_is_fatal() {
        let prompter = ScriptedPrompter::default();
        let resolver =
            CredentialResolver::new(cli(Some("a"), Some("p"), Some("maybe")), None, &prompter);
        assert!(matches!(
            resolver.resolve(),
            Err(CredentialError::InvalidToken(t)) if t == "maybe"
        ));

        let resolver = CredentialResolver::new(
            cli(Some("a"), Some("p"), None),
            Some(file_entry(None, None, Some("PUSH"))),
            &prompter,
        );
        assert!(matches!(resolver.resolve(), Err(CredentialError::InvalidToken(_))));
    }

    #[test]
    fn test_empty_username_prompt_fails() {
        let prompter = ScriptedPrompter::new(&[""]);
        let resolver = CredentialResolver::new(cli(None, Some("p"), Some("push")), None, &prompter);
        assert!(matches!(
            resolver.resolve(),
            Err(CredentialError::Missing("username"))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            token: "123456".to_string(),
        };
        let shown = format!("{:?}", creds);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("123456"));
    }

    #[test]
    fn test_second_factor() {
        let mut creds = Credentials {
            username: "a".to_string(),
            password: "p".to_string(),
            token: "push".to_string(),
        };
        assert!(creds.has_second_factor());
        creds.token = "false".to_string();
        assert!(!creds.has_second_factor());
    }
}
