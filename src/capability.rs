use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Role {
    #[default]
    Player,
    Host,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Player => write!(f, "player"),
            Role::Host => write!(f, "host"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        let string = string.to_lowercase();

        match string.as_str() {
            "player" => Ok(Self::Player),
            "host" => Ok(Self::Host),
            "admin" => Ok(Self::Admin),
            _ => Err(anyhow::Error::msg(format!(
                "Error trying to convert '{string}' to a Role!"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Capability {
    ApproveWithdrawals,
    HostTournaments,
    JoinTournaments,
    ManageAnyTournament,
    ManageLedger,
    ResolveDisputes,
    SubmitAnyScore,
}

pub type Capabilities = HashSet<Capability>;

/// The single place a role turns into permissions. Every privileged store
/// operation takes the resolved set, never the role.
#[must_use]
pub fn capabilities(role: Role) -> Capabilities {
    let mut capabilities = HashSet::new();
    capabilities.insert(Capability::JoinTournaments);

    if role >= Role::Host {
        capabilities.insert(Capability::HostTournaments);
    }

    if role == Role::Admin {
        capabilities.insert(Capability::ApproveWithdrawals);
        capabilities.insert(Capability::ManageAnyTournament);
        capabilities.insert(Capability::ManageLedger);
        capabilities.insert(Capability::ResolveDisputes);
        capabilities.insert(Capability::SubmitAnyScore);
    }

    capabilities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_grow_monotonically() {
        let player = capabilities(Role::Player);
        let host = capabilities(Role::Host);
        let admin = capabilities(Role::Admin);

        assert!(player.is_subset(&host));
        assert!(host.is_subset(&admin));

        assert!(!player.contains(&Capability::HostTournaments));
        assert!(host.contains(&Capability::HostTournaments));
        assert!(!host.contains(&Capability::ResolveDisputes));
        assert!(admin.contains(&Capability::ApproveWithdrawals));
    }
}
