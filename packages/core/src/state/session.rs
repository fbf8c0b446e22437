// Сессия пользователя

use crate::state::models::UserId;
use crate::utils::error::{RealtimeError, Result};
use std::fmt;

/// Аутентифицированная сессия
///
/// Создается при login, уничтожается при logout. Realtime клиент строится
/// из сессии и живет не дольше нее.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub display_name: String,
    pub auth_token: String,
}

impl Session {
    pub fn new(user_id: UserId, display_name: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let auth_token = auth_token.into();
        if auth_token.trim().is_empty() {
            return Err(RealtimeError::InvalidInput("auth token is empty".to_string()));
        }
        Ok(Self {
            user_id,
            display_name: display_name.into(),
            auth_token,
        })
    }

    /// Имя до первого пробела
    pub fn first_name(&self) -> &str {
        self.display_name.split(' ').next().unwrap_or("")
    }

    /// Все после первого пробела
    pub fn last_name(&self) -> &str {
        self.display_name
            .split_once(' ')
            .map(|(_, rest)| rest)
            .unwrap_or("")
    }
}

// Токен в логи не попадает
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}
