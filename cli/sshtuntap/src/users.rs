//! OS user directory lookup.

use anyhow::Result;
use nix::unistd::User;
use tracing::debug;

use crate::error::CliError;

/// Resolve an account by name, failing if it does not exist.
pub fn lookup_user(name: &str) -> Result<User> {
    let user = User::from_name(name)
        .map_err(|source| CliError::UserLookup {
            name: name.to_string(),
            source,
        })?
        .ok_or_else(|| CliError::UnknownUser(name.to_string()))?;

    debug!(user = %user.name, uid = %user.uid, "Resolved OS user");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_exists() {
        let user = lookup_user("root").unwrap();
        assert_eq!(user.uid.as_raw(), 0);
    }

    #[test]
    fn test_unknown_user() {
        let err = lookup_user("no-such-user-sshtuntap").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::UnknownUser(_))
        ));
    }
}
