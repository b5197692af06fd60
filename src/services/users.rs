use serde::Deserialize;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::db::{Db, StoreError};
use crate::error::{AppError, Result};
use crate::models::{parse_id, NotificationSettings, Role, User};

pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub phone: Option<String>,
    pub telegram_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileReq {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub telegram_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdminUpdateUserReq {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub phone: Option<String>,
    pub telegram_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, Default)]
pub struct NotificationSettingsReq {
    pub email: Option<bool>,
    pub telegram: Option<bool>,
    pub sms: Option<bool>,
    pub websocket: Option<bool>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Empty strings clear an optional contact field.
fn contact(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[derive(Clone)]
pub struct UserService {
    db: Db,
    clock: SharedClock,
}

impl UserService {
    pub fn new(db: Db, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    pub async fn create(&self, new: NewUser) -> Result<User> {
        let email = normalize_email(&new.email);
        if !email.contains('@') {
            return Err(AppError::validation("a valid email is required"));
        }
        if new.name.trim().is_empty() {
            return Err(AppError::validation("name is required"));
        }
        let user = User {
            id: Uuid::new_v4(),
            email,
            name: new.name.trim().to_string(),
            password_hash: new.password_hash,
            role: new.role,
            phone: new.phone.and_then(contact),
            telegram_id: new.telegram_id.and_then(contact),
            notification_settings: NotificationSettings::default(),
            created_at: self.clock.now(),
        };
        match self.db.insert(&user).await {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => {
                return Err(AppError::Conflict("email is already registered".to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(user_id = %user.id, role = user.role.as_str(), "user created");
        Ok(user)
    }

    pub async fn get(&self, id: Uuid) -> Result<User> {
        self.db
            .get::<User>(id)
            .await?
            .ok_or_else(|| AppError::not_found("user", id))
    }

    pub async fn get_str(&self, id: &str) -> Result<User> {
        self.get(parse_id("id", id)?).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .db
            .find_one::<User>(serde_json::json!({ "email": normalize_email(email) }))
            .await?)
    }

    pub async fn update_profile(&self, id: Uuid, req: UpdateProfileReq) -> Result<User> {
        let user = self.get(id).await?;
        self.update_fields(
            user,
            AdminUpdateUserReq {
                name: req.name,
                role: None,
                phone: req.phone,
                telegram_id: req.telegram_id,
            },
        )
        .await
    }

    pub async fn update_settings(
        &self,
        id: Uuid,
        req: NotificationSettingsReq,
    ) -> Result<NotificationSettings> {
        let mut user = self.get(id).await?;
        let s = &mut user.notification_settings;
        s.email = req.email.unwrap_or(s.email);
        s.telegram = req.telegram.unwrap_or(s.telegram);
        s.sms = req.sms.unwrap_or(s.sms);
        s.websocket = req.websocket.unwrap_or(s.websocket);
        self.db.save(&user).await?;
        Ok(user.notification_settings)
    }

    pub async fn set_password_hash(&self, id: Uuid, password_hash: String) -> Result<()> {
        self.db
            .set_fields::<User>(id, serde_json::json!({ "passwordHash": password_hash }))
            .await?
            .ok_or_else(|| AppError::not_found("user", id))?;
        Ok(())
    }

    pub async fn admin_update(&self, id: &str, req: AdminUpdateUserReq) -> Result<User> {
        let mut user = self.get_str(id).await?;
        if let Some(role) = req.role {
            user.role = role;
        }
        let user = self.update_fields(user, req).await?;
        tracing::info!(user_id = %user.id, role = user.role.as_str(), "user updated by admin");
        Ok(user)
    }

    async fn update_fields(&self, mut user: User, req: AdminUpdateUserReq) -> Result<User> {
        if let Some(name) = req.name {
            if name.trim().is_empty() {
                return Err(AppError::validation("name is required"));
            }
            user.name = name.trim().to_string();
        }
        if let Some(phone) = req.phone {
            user.phone = contact(phone);
        }
        if let Some(telegram_id) = req.telegram_id {
            user.telegram_id = contact(telegram_id);
        }
        self.db.save(&user).await?;
        Ok(user)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = parse_id("id", id)?;
        if !self.db.delete::<User>(id).await? {
            return Err(AppError::not_found("user", id));
        }
        tracing::info!(user_id = %id, "user deleted");
        Ok(())
    }
}
