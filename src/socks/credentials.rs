//! Credentials for SOCKS negotiation
//!
//! Usernames and passwords come from the selected profile first, then from
//! the environment, and the username finally falls back to the name of the
//! user running the program.

use crate::config::ServerProfile;
use crate::error::SessionError;
use std::fmt;

/// Environment variable overriding the SOCKS5 username
pub const USERNAME_ENV: &str = "SOCKSIFY_USERNAME";

/// Environment variable overriding the SOCKS5 password
pub const PASSWORD_ENV: &str = "SOCKSIFY_PASSWORD";

/// A credential sent to a SOCKS server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    /// SOCKS4 user id
    UserId,
    /// SOCKS5 username
    Username,
    /// SOCKS5 password
    Password,
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialField::UserId => write!(f, "user id"),
            CredentialField::Username => write!(f, "username"),
            CredentialField::Password => write!(f, "password"),
        }
    }
}

/// Process-wide credential sources, captured once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSource {
    env_username: Option<String>,
    env_password: Option<String>,
    os_user: Option<String>,
}

impl CredentialSource {
    /// Create a source from explicit values
    pub fn new(
        env_username: Option<String>,
        env_password: Option<String>,
        os_user: Option<String>,
    ) -> Self {
        Self {
            env_username,
            env_password,
            os_user,
        }
    }

    /// Capture the environment overrides and the current user name
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|value| !value.is_empty());
        Self::new(var(USERNAME_ENV), var(PASSWORD_ENV), os_user_name())
    }

    /// Resolve the identity to present to a server of `profile`
    ///
    /// An empty value counts as unset.
    pub fn identity_for(&self, profile: &ServerProfile) -> Identity {
        Identity {
            user_id: self.os_user.clone().unwrap_or_default(),
            username: non_empty(&profile.default_user)
                .or_else(|| non_empty(&self.env_username))
                .or_else(|| non_empty(&self.os_user)),
            password: non_empty(&profile.default_pass).or_else(|| non_empty(&self.env_password)),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|value| !value.is_empty()).cloned()
}

/// What a session presents to its server
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    /// SOCKS4 user id, possibly empty
    pub user_id: String,
    /// SOCKS5 username
    pub username: Option<String>,
    /// SOCKS5 password
    pub password: Option<String>,
}

impl Identity {
    /// Username and password for SOCKS5 authentication
    pub fn credentials(&self) -> Result<(&str, &str), SessionError> {
        let username = self
            .username
            .as_deref()
            .ok_or(SessionError::MissingCredentials(CredentialField::Username))?;
        let password = self
            .password
            .as_deref()
            .ok_or(SessionError::MissingCredentials(CredentialField::Password))?;
        Ok((username, password))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Name of the user running this process
#[cfg(unix)]
pub fn os_user_name() -> Option<String> {
    use std::ffi::CStr;

    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    let mut buf = vec![0 as libc::c_char; 1024];
    // SAFETY: passwd is plain data, all-zero is a valid value.
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    loop {
        // SAFETY: every pointer refers to live storage and buf.len() is its size.
        let rc = unsafe {
            libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result)
        };
        if rc == libc::ERANGE && buf.len() < 1 << 16 {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
            return None;
        }
        break;
    }

    // SAFETY: on success pw_name points to a NUL-terminated string inside buf.
    let name = unsafe { CStr::from_ptr(pwd.pw_name) };
    name.to_str().ok().map(str::to_owned)
}

/// Name of the user running this process
#[cfg(not(unix))]
pub fn os_user_name() -> Option<String> {
    std::env::var("USERNAME").ok().filter(|name| !name.is_empty())
}
