use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Student,
    Mentor,
    Admin,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::Student => write!(f, "student"),
            UserRole::Mentor => write!(f, "mentor"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "student" => Ok(UserRole::Student),
            "mentor" => Ok(UserRole::Mentor),
            "admin" => Ok(UserRole::Admin),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// JWT claims issued by the auth service. The chat service only validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

impl Claims {
    pub fn new(user_id: Uuid, role: UserRole, duration_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id,
            role,
            iat: now,
            exp: now + duration_secs,
            jti: Uuid::now_v7(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
    pub token_id: Uuid,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
            token_id: claims.jti,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_claims_are_not_expired() {
        let claims = Claims::new(Uuid::new_v4(), UserRole::Student, 3600);
        assert!(!claims.is_expired());
    }

    #[test]
    fn past_expiry_is_expired() {
        let claims = Claims::new(Uuid::new_v4(), UserRole::Student, -10);
        assert!(claims.is_expired());
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [UserRole::Student, UserRole::Mentor, UserRole::Admin] {
            let parsed: UserRole = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("superuser".parse::<UserRole>().is_err());
    }
}
