use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Id;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum RegistrationStatus {
    Pending,
    #[default]
    Confirmed,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
        }
    }
}

impl FromStr for RegistrationStatus {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        match string {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            _ => Err(anyhow::Error::msg(format!(
                "Error trying to convert '{string}' to a RegistrationStatus!"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum PaymentStatus {
    #[default]
    Paid,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paid => write!(f, "paid"),
            Self::Refunded => write!(f, "refunded"),
        }
    }
}

/// Links a paying account to a tournament. For solo tournaments the entrant
/// is the username itself; for team tournaments it is the team name the
/// user registered.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Registration {
    pub tournament: Id,
    pub username: String,
    pub entrant: String,
    #[serde(default)]
    pub status: RegistrationStatus,
    #[serde(default)]
    pub payment: PaymentStatus,
    pub registered_at: i64,
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.username, self.entrant, self.status, self.payment
        )
    }
}
