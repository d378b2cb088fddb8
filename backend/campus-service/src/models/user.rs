use chrono::{DateTime, Utc};
/// User model
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Legacy plaintext until the password migration has run, bcrypt after
    #[serde(skip_serializing)]
    pub password: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the stored credential is already a bcrypt hash
    pub fn has_hashed_password(&self) -> bool {
        crypto_core::is_password_hash(&self.password)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    #[default]
    Student,
    Teacher,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "STUDENT",
            UserRole::Teacher => "TEACHER",
            UserRole::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STUDENT" => Ok(UserRole::Student),
            "TEACHER" => Ok(UserRole::Teacher),
            "ADMIN" => Ok(UserRole::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The `(id, email, password)` triple scanned by the password migration
#[derive(Clone, FromRow)]
pub struct UserCredential {
    pub id: i64,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredential")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<UserRole>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("teacher".parse::<UserRole>(), Ok(UserRole::Teacher));
        assert_eq!(" ADMIN ".parse::<UserRole>(), Ok(UserRole::Admin));
        assert!("janitor".parse::<UserRole>().is_err());
        assert_eq!(UserRole::default().as_str(), "STUDENT");
    }

    #[test]
    fn test_password_never_serialized() {
        let user = User {
            id: 7,
            email: "carol@x.edu".into(),
            password: "hunter2".into(),
            role: "STUDENT".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["email"], "carol@x.edu");

        let cred = UserCredential {
            id: 7,
            email: user.email.clone(),
            password: user.password.clone(),
        };
        assert!(!format!("{cred:?}").contains("hunter2"));
    }
}
